//! Learning-Rate Schedule
//!
//! Linear warmup followed by cosine decay to a floor:
//!
//! ```text
//! lr
//! max ┤     ╭──╮
//!     │    ╱    ╲
//!     │   ╱      ╲
//!     │  ╱        ╲
//! min ┤ ╱          ╰──────────
//!     └┬────┬──────┬──────────  it
//!      0  warmup  max_steps
//! ```
//!
//! For step `it` (0-indexed):
//!
//! ```text
//! it <  warmup            max_lr × (it + 1) / warmup
//! it >  max_steps         min_lr
//! otherwise               ratio = (it - warmup) / (max_steps - warmup)
//!                         coeff = 0.5 × (1 + cos(π × ratio))
//!                         min_lr + coeff × (max_lr - min_lr)
//! ```
//!
//! The cosine segment starts at `max_lr`, ends at `min_lr` and is symmetric
//! about its midpoint.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineSchedule {
    pub max_lr: f32,
    pub min_lr: f32,
    pub warmup_steps: usize,
    pub max_steps: usize,
}

impl CosineSchedule {
    pub fn new(max_lr: f32, min_lr: f32, warmup_steps: usize, max_steps: usize) -> Self {
        Self {
            max_lr,
            min_lr,
            warmup_steps,
            max_steps,
        }
    }

    /// Learning rate for step `it`; any step past `max_steps` gets `min_lr`
    pub fn get_lr(&self, it: usize) -> f32 {
        if it < self.warmup_steps {
            return self.max_lr * (it + 1) as f32 / self.warmup_steps as f32;
        }
        if it > self.max_steps {
            return self.min_lr;
        }
        let span = self.max_steps - self.warmup_steps;
        if span == 0 {
            return self.min_lr;
        }
        let decay_ratio = (it - self.warmup_steps) as f64 / span as f64;
        let coeff = 0.5 * (1.0 + (PI * decay_ratio).cos());
        let (max_lr, min_lr) = (f64::from(self.max_lr), f64::from(self.min_lr));
        (min_lr + coeff * (max_lr - min_lr)) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> CosineSchedule {
        CosineSchedule::new(6e-4, 6e-5, 10, 50)
    }

    #[test]
    fn test_warmup_is_linear() {
        let s = schedule();
        assert!((s.get_lr(0) - 6e-5).abs() < 1e-10);
        assert!((s.get_lr(4) - 3e-4).abs() < 1e-10);
        assert!((s.get_lr(9) - 6e-4).abs() < 1e-10);
    }

    #[test]
    fn test_cosine_endpoints() {
        let s = schedule();
        assert!((s.get_lr(10) - 6e-4).abs() < 1e-10);
        assert!((s.get_lr(30) - 3.3e-4).abs() < 1e-9);
        assert!((s.get_lr(50) - 6e-5).abs() < 1e-10);
    }

    #[test]
    fn test_floor_after_max_steps_is_exact() {
        let s = schedule();
        assert_eq!(s.get_lr(51), s.min_lr);
        assert_eq!(s.get_lr(10_000), s.min_lr);
    }

    #[test]
    fn test_decay_is_monotone_and_symmetric() {
        let s = schedule();
        let lrs: Vec<f32> = (10..=50).map(|it| s.get_lr(it)).collect();
        assert!(lrs.windows(2).all(|w| w[1] <= w[0]));

        let mid = (s.max_lr + s.min_lr) / 2.0;
        for k in 0..=20 {
            let above = s.get_lr(10 + k) - mid;
            let below = mid - s.get_lr(50 - k);
            assert!((above - below).abs() < 1e-9, "k = {k}");
        }
    }

    #[test]
    fn test_warmup_equal_to_max_steps() {
        let s = CosineSchedule::new(1.0, 0.1, 5, 5);
        assert_eq!(s.get_lr(4), 1.0);
        assert_eq!(s.get_lr(5), 0.1);
        assert_eq!(s.get_lr(6), 0.1);
    }
}
