//! Explicit worker identity and shadow-zone synchronization hooks.
//!
//! Lazy functions never synchronize anything themselves.
//! When a mesh is one partition of a larger distributed mesh,
//! the distribution layer implements [`ShadowExchange`]
//! and the caller syncs variables with
//! [`MeshVariable::sync`][crate::MeshVariable::sync]
//! before evaluating functions that read them.
//! Every worker must make the same sync calls in the same order,
//! so syncs should never be made conditional on the worker's rank.

use nalgebra as na;

/// Error in synchronizing values between workers.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The exchange returned a different number of values than it was given.
    #[error("Exchange returned {found} values for {expected} local points")]
    LengthChanged {
        /// Number of local values sent.
        expected: usize,
        /// Number of values received.
        found: usize,
    },
    /// The underlying transport failed.
    #[error("Shadow exchange failed: {0}")]
    Exchange(String),
}

/// Identity of one worker among the cooperating workers of a distributed mesh.
///
/// Passed explicitly to code that needs to behave differently per worker;
/// there is no global rank state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerContext {
    rank: usize,
    size: usize,
}

impl WorkerContext {
    /// Context for worker `rank` out of `size` workers.
    ///
    /// Returns `None` unless `rank < size`.
    pub fn new(rank: usize, size: usize) -> Option<Self> {
        (rank < size).then_some(Self { rank, size })
    }

    /// Context of a process that is the only worker.
    #[inline]
    pub fn serial() -> Self {
        Self { rank: 0, size: 1 }
    }

    /// Index of this worker.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this is the first worker,
    /// conventionally the one responsible for shared output.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Whether more than one worker is cooperating.
    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.size > 1
    }
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self::serial()
    }
}

/// How values in the shadow zone are combined during a sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Overwrite shadow values with the owning worker's values.
    #[default]
    Replace,
    /// Sum the values every worker holds for a shared point.
    /// Use with care, e.g. for assembling global reductions.
    Merge,
}

/// Transport that reconciles the values of shared points between workers.
pub trait ShadowExchange {
    /// Identity of the local worker.
    fn context(&self) -> WorkerContext;
    /// Exchange local nodal values with other workers,
    /// returning the reconciled local values.
    fn exchange(
        &self,
        values: &na::DVector<f64>,
        mode: SyncMode,
    ) -> Result<na::DVector<f64>, SyncError>;
}

/// Exchange for a single worker, where there is nothing to reconcile.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialExchange;

impl ShadowExchange for SerialExchange {
    #[inline]
    fn context(&self) -> WorkerContext {
        WorkerContext::serial()
    }

    fn exchange(
        &self,
        values: &na::DVector<f64>,
        _mode: SyncMode,
    ) -> Result<na::DVector<f64>, SyncError> {
        Ok(values.clone())
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_context_validates_rank() {
        assert!(WorkerContext::new(2, 2).is_none());
        let ctx = WorkerContext::new(1, 4).unwrap();
        assert_eq!((ctx.rank(), ctx.size()), (1, 4));
        assert!(!ctx.is_root());
        assert!(ctx.is_parallel());

        let serial = WorkerContext::default();
        assert!(serial.is_root());
        assert!(!serial.is_parallel());
    }

    #[test]
    fn serial_exchange_is_identity() {
        let values = na::DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let out = SerialExchange.exchange(&values, SyncMode::Merge).unwrap();
        assert_eq!(out, values);
        assert_eq!(SerialExchange.context(), WorkerContext::serial());
    }
}
