//! Tensor lifetime ledger
//!
//! Every tensor the engine hands out (preprocessed images, batched training
//! inputs, prediction outputs) is wrapped in a [`Tracked`] value registered
//! with a [`TensorLedger`]. Release happens exactly once, when the wrapper is
//! dropped, so the ledger's live count is the number of tensors still owned
//! somewhere. Tests use it to prove that no code path leaks.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::tensor::{backend::Backend, Tensor};

#[derive(Debug, Default)]
struct Counts {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

/// Shared allocation counter
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    counts: Arc<Counts>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tensor; it is released when the returned wrapper drops
    pub fn track<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tracked<B, D> {
        self.counts.allocated.fetch_add(1, Ordering::SeqCst);
        Tracked {
            tensor,
            guard: ReleaseGuard {
                counts: Arc::clone(&self.counts),
            },
        }
    }

    /// Tensors registered and not yet released
    pub fn live(&self) -> usize {
        self.allocated() - self.released()
    }

    pub fn allocated(&self) -> usize {
        self.counts.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.counts.released.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard {
    counts: Arc<Counts>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A tensor owned by exactly one holder and counted by a ledger
pub struct Tracked<B: Backend, const D: usize> {
    tensor: Tensor<B, D>,
    #[allow(dead_code)]
    guard: ReleaseGuard,
}

/// Preprocessed image, `[1, H, W, 3]` or `[N, H, W, 3]`
pub type ImageTensor<B> = Tracked<B, 4>;

impl<B: Backend, const D: usize> Tracked<B, D> {
    /// Borrow the underlying tensor
    pub fn tensor(&self) -> &Tensor<B, D> {
        &self.tensor
    }

    pub fn dims(&self) -> [usize; D] {
        self.tensor.dims()
    }

    /// Copy the values out as `f32`
    pub fn to_vec(&self) -> Vec<f32> {
        self.tensor
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap_or_default()
    }
}

impl<B: Backend, const D: usize> fmt::Debug for Tracked<B, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked").field("dims", &self.dims()).finish()
    }
}
