//! Transformer Layers
//!
//! Every trainable layer follows the same pattern: `forward` returns the
//! output together with a cache of whatever the backward pass needs, and
//! `backward` takes the upstream gradient plus that cache and returns the
//! input gradient along with a gradient struct mirroring the layer's
//! parameters.
//!
//! ```rust,ignore
//! let (y, cache) = layer.forward(&x);
//! let (grad_x, grads) = layer.backward(&grad_y, &cache);
//! ```
//!
//! Both the layers and their gradient structs implement
//! [`Parameters`](crate::params::Parameters) under identical names.
//!
//! ## Layers
//!
//! - **activation**: tanh-approximated GELU
//! - **linear**: affine projection with tagged initialization
//! - **layer_norm**: layer normalization
//! - **attention**: causal multi-head self-attention
//! - **mlp**: position-wise feed-forward network
//! - **block**: pre-norm transformer block

pub mod activation;
pub mod attention;
pub mod block;
pub mod layer_norm;
pub mod linear;
pub mod mlp;

pub use activation::{gelu_backward, gelu_forward};
pub use attention::{AttentionCache, AttentionGradients, CausalSelfAttention};
pub use block::{Block, BlockCache, BlockGradients};
pub use layer_norm::{LayerNorm, LayerNormCache, LayerNormGradients};
pub use linear::{normal_init, InitScale, Linear, LinearCache, LinearGradients, INIT_STD};
pub use mlp::{Mlp, MlpCache, MlpGradients};
