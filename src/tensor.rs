//! Dense Tensors for the Transformer
//!
//! A small row-major tensor type carrying exactly the operations the GPT
//! forward and backward passes need. Data is always contiguous: operations
//! that permute axes (`transpose`) copy into a fresh buffer instead of
//! producing strided views.
//!
//! ## Core Concepts
//!
//! - **Data**: flat `Vec<f32>` in row-major order
//! - **Shape**: dimensions, e.g. `[batch, seq, n_embd]`
//! - **Strides**: elements to skip per step along each dimension
//!
//! ## Batched Matrix Products
//!
//! `matmul` and `matmul_t` treat every dimension except the last two as a
//! batch. Both operands must agree on those batch dimensions, which is how
//! attention multiplies `[B, n_head, T, head_dim]` stacks in one call:
//!
//! ```text
//! scores = q.matmul_t(&k)    // [B, nh, T, hs] x [B, nh, T, hs]^T -> [B, nh, T, T]
//! y      = att.matmul(&v)    // [B, nh, T, T]  x [B, nh, T, hs]   -> [B, nh, T, hs]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use nanogpt::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! assert_eq!(c.data, vec![4.0, 5.0, 10.0, 11.0]);
//! ```
//!
//! ## Performance
//!
//! Matrix products, softmax and the elementwise kernels are parallelized
//! with Rayon over output rows. Row-wise kernels keep each row's arithmetic
//! sequential, so results for one row never depend on any other row.

use rayon::prelude::*;

/// Elements per task in order-stable parallel reductions
const REDUCE_CHUNK: usize = 4096;

/// A multi-dimensional array of `f32` values in row-major layout
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all elements
    pub data: Vec<f32>,
    /// Dimensions of the tensor
    pub shape: Vec<usize>,
    /// Row-major strides derived from `shape`
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a tensor from flat data and a shape
    ///
    /// # Panics
    ///
    /// Panics if the product of `shape` differs from `data.len()`. Shapes are
    /// produced by the layers themselves, so a mismatch is a programming error.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected
        );
        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Tensor of zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Tensor with every element set to `value`
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Lower-triangular matrix of ones, `[n, n]`
    ///
    /// Entry `(i, j)` is 1.0 when `j <= i` and 0.0 otherwise.
    pub fn tril(n: usize) -> Self {
        let data = (0..n * n)
            .map(|idx| if idx % n <= idx / n { 1.0 } else { 0.0 })
            .collect();
        Self::new(data, vec![n, n])
    }

    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the last dimension
    pub fn last_dim(&self) -> usize {
        *self.shape.last().unwrap_or(&1)
    }

    /// Number of rows when viewed as `[len / last_dim, last_dim]`
    pub fn rows(&self) -> usize {
        let cols = self.last_dim();
        if cols == 0 {
            0
        } else {
            self.data.len() / cols
        }
    }

    fn resolve_dim(&self, dim: isize) -> usize {
        let ndim = self.shape.len() as isize;
        let d = if dim < 0 { ndim + dim } else { dim };
        assert!(
            (0..ndim).contains(&d),
            "dimension {} out of range for shape {:?}",
            dim,
            self.shape
        );
        d as usize
    }

    /// Split the shape into `(batch, rows, cols)` for batched matrix products
    fn matrix_dims(&self) -> (usize, usize, usize) {
        assert!(
            self.shape.len() >= 2,
            "matrix operation needs at least 2 dimensions, got {:?}",
            self.shape
        );
        let n = self.shape.len();
        let batch = self.shape[..n - 2].iter().product();
        (batch, self.shape[n - 2], self.shape[n - 1])
    }

    // ==================== MATRIX PRODUCTS ====================

    /// Batched matrix product `self @ other`
    ///
    /// `self` is `[..., M, K]` and `other` is `[..., K, N]` with identical
    /// leading dimensions. The result is `[..., M, N]`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        let (batch, m, k) = self.matrix_dims();
        let (other_batch, k2, n) = other.matrix_dims();
        assert_eq!(
            batch, other_batch,
            "batch dimensions differ: {:?} vs {:?}",
            self.shape, other.shape
        );
        assert_eq!(k, k2, "inner dimensions differ: {:?} @ {:?}", self.shape, other.shape);

        let mut out = vec![0.0; batch * m * n];
        if n > 0 {
            out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
                let b = row / m;
                let a_row = &self.data[row * k..(row + 1) * k];
                let b_mat = &other.data[b * k * n..(b + 1) * k * n];
                // i-k-j order: stream rows of `other` for cache locality
                for (p, &a) in a_row.iter().enumerate() {
                    let b_row = &b_mat[p * n..(p + 1) * n];
                    for (o, &bv) in out_row.iter_mut().zip(b_row) {
                        *o += a * bv;
                    }
                }
            });
        }

        let mut shape = self.shape[..self.shape.len() - 2].to_vec();
        shape.extend([m, n]);
        Tensor::new(out, shape)
    }

    /// Batched product with the transpose of `other`: `self @ other^T`
    ///
    /// `self` is `[..., M, K]` and `other` is `[..., N, K]`. The result is
    /// `[..., M, N]`. This is the natural form for `x @ W^T` with weights
    /// stored `[out, in]` and for attention scores `q @ k^T`.
    pub fn matmul_t(&self, other: &Tensor) -> Tensor {
        let (batch, m, k) = self.matrix_dims();
        let (other_batch, n, k2) = other.matrix_dims();
        assert_eq!(
            batch, other_batch,
            "batch dimensions differ: {:?} vs {:?}",
            self.shape, other.shape
        );
        assert_eq!(k, k2, "inner dimensions differ: {:?} @ {:?}^T", self.shape, other.shape);

        let mut out = vec![0.0; batch * m * n];
        if n > 0 {
            out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
                let b = row / m;
                let a_row = &self.data[row * k..(row + 1) * k];
                let b_mat = &other.data[b * n * k..(b + 1) * n * k];
                for (j, o) in out_row.iter_mut().enumerate() {
                    let b_row = &b_mat[j * k..(j + 1) * k];
                    *o = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
                }
            });
        }

        let mut shape = self.shape[..self.shape.len() - 2].to_vec();
        shape.extend([m, n]);
        Tensor::new(out, shape)
    }

    // ==================== SHAPE OPERATIONS ====================

    /// Same data viewed with a different shape
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Reshape without copying, consuming `self`
    pub fn into_shape(self, new_shape: &[usize]) -> Tensor {
        Tensor::new(self.data, new_shape.to_vec())
    }

    /// Swap two dimensions, copying into a contiguous buffer
    ///
    /// Negative indices count from the end (`-1` is the last dimension).
    pub fn transpose(&self, dim1: isize, dim2: isize) -> Tensor {
        let d1 = self.resolve_dim(dim1);
        let d2 = self.resolve_dim(dim2);
        if d1 == d2 {
            return self.clone();
        }

        let mut new_shape = self.shape.clone();
        new_shape.swap(d1, d2);
        let new_strides = Self::compute_strides(&new_shape);

        // Stride of each output coordinate within the source buffer
        let mut src_strides = self.strides.clone();
        src_strides.swap(d1, d2);

        let mut out = vec![0.0; self.data.len()];
        out.par_iter_mut().enumerate().for_each(|(i, item)| {
            let mut remaining = i;
            let mut src = 0;
            for (&stride, &src_stride) in new_strides.iter().zip(&src_strides) {
                let coord = remaining / stride;
                remaining %= stride;
                src += coord * src_stride;
            }
            *item = self.data[src];
        });

        Tensor::new(out, new_shape)
    }

    /// Split the last dimension into `parts` equal chunks
    ///
    /// `[..., parts * d]` becomes `parts` tensors of shape `[..., d]`.
    pub fn split_last(&self, parts: usize) -> Vec<Tensor> {
        let cols = self.last_dim();
        assert_eq!(
            cols % parts,
            0,
            "last dimension {} not divisible into {} parts",
            cols,
            parts
        );
        let width = cols / parts;
        let mut shape = self.shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = width;
        }

        (0..parts)
            .map(|p| {
                let data = self
                    .data
                    .chunks(cols)
                    .flat_map(|row| row[p * width..(p + 1) * width].iter().copied())
                    .collect();
                Tensor::new(data, shape.clone())
            })
            .collect()
    }

    /// Concatenate tensors along the last dimension
    ///
    /// All inputs must share every dimension except the last.
    pub fn concat_last(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_last needs at least one tensor");
        let rows = parts[0].rows();
        let total: usize = parts.iter().map(|t| t.last_dim()).sum();
        for t in parts {
            assert_eq!(t.rows(), rows, "row counts differ in concat_last");
        }

        let mut data = Vec::with_capacity(rows * total);
        for r in 0..rows {
            for t in parts {
                let w = t.last_dim();
                data.extend_from_slice(&t.data[r * w..(r + 1) * w]);
            }
        }

        let mut shape = parts[0].shape.clone();
        if let Some(last) = shape.last_mut() {
            *last = total;
        }
        Tensor::new(data, shape)
    }

    // ==================== SOFTMAX ====================

    /// Softmax over the last dimension
    ///
    /// Each row subtracts its maximum before exponentiating. Entries equal to
    /// `-inf` become exactly `0.0`, so masked attention scores carry no
    /// probability mass at all.
    pub fn softmax(&self) -> Tensor {
        let cols = self.last_dim();
        let mut out = self.data.clone();
        if cols > 0 {
            out.par_chunks_mut(cols).for_each(|row| {
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for v in row.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                for v in row.iter_mut() {
                    *v /= sum;
                }
            });
        }
        Tensor::new(out, self.shape.clone())
    }

    /// Gradient of softmax given its output (`self`) and the upstream gradient
    ///
    /// Per row: `ds = p * (g - sum(g * p))`.
    pub fn softmax_backward(&self, grad: &Tensor) -> Tensor {
        assert_eq!(self.shape, grad.shape, "softmax_backward shape mismatch");
        let cols = self.last_dim();
        let mut out = vec![0.0; self.data.len()];
        if cols > 0 {
            out.par_chunks_mut(cols)
                .zip(self.data.par_chunks(cols))
                .zip(grad.data.par_chunks(cols))
                .for_each(|((o, p), g)| {
                    let dot: f32 = p.iter().zip(g).map(|(a, b)| a * b).sum();
                    for ((o, &p), &g) in o.iter_mut().zip(p).zip(g) {
                        *o = p * (g - dot);
                    }
                });
        }
        Tensor::new(out, self.shape.clone())
    }

    /// Replace entries with `value` wherever the mask holds 0.0
    ///
    /// The mask covers the last two dimensions (`[T, T]`) and is broadcast
    /// over every leading dimension.
    pub fn masked_fill(&self, mask: &Tensor, value: f32) -> Tensor {
        let n = self.shape.len();
        assert!(n >= 2, "masked_fill needs at least 2 dimensions");
        assert_eq!(
            &self.shape[n - 2..],
            &mask.shape[..],
            "mask shape {:?} doesn't cover {:?}",
            mask.shape,
            self.shape
        );
        let plane = mask.data.len();
        let mut out = self.data.clone();
        if plane > 0 {
            out.par_chunks_mut(plane).for_each(|chunk| {
                for (v, &m) in chunk.iter_mut().zip(&mask.data) {
                    if m == 0.0 {
                        *v = value;
                    }
                }
            });
        }
        Tensor::new(out, self.shape.clone())
    }

    // ==================== ELEMENTWISE ====================

    /// Elementwise sum of two tensors with identical shapes
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "add shape mismatch");
        let data = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a + b)
            .collect();
        Tensor::new(data, self.shape.clone())
    }

    /// Accumulate `other` into `self` in place
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(self.shape, other.shape, "add_assign shape mismatch");
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, b)| *a += b);
    }

    /// Add a vector along the last dimension (bias broadcast)
    pub fn add_row(&self, row: &Tensor) -> Tensor {
        let cols = self.last_dim();
        assert_eq!(row.len(), cols, "broadcast row length mismatch");
        let mut out = self.data.clone();
        if cols > 0 {
            out.par_chunks_mut(cols).for_each(|chunk| {
                for (v, b) in chunk.iter_mut().zip(&row.data) {
                    *v += b;
                }
            });
        }
        Tensor::new(out, self.shape.clone())
    }

    /// Sum over every dimension except the last, giving `[last_dim]`
    pub fn sum_rows(&self) -> Tensor {
        let cols = self.last_dim();
        let mut sums = vec![0.0; cols];
        for row in self.data.chunks(cols.max(1)) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        Tensor::new(sums, vec![cols])
    }

    /// Multiply every element by a scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data = self.data.par_iter().map(|v| v * scalar).collect();
        Tensor::new(data, self.shape.clone())
    }

    /// Scale every element in place
    pub fn scale_(&mut self, scalar: f32) {
        self.data.par_iter_mut().for_each(|v| *v *= scalar);
    }

    /// Sum of squared elements, reduced in a fixed order
    pub fn sum_squares(&self) -> f32 {
        let partials: Vec<f32> = self
            .data
            .par_chunks(REDUCE_CHUNK)
            .map(|chunk| chunk.iter().map(|v| v * v).sum::<f32>())
            .collect();
        partials.iter().sum()
    }
}
