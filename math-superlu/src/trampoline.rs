//! Recovery from abrupt solver termination
//!
//! The solver layer stops on a fatal condition by calling
//! [`native::abort`](crate::native), which unwinds straight to the innermost
//! [`RecoveryPoint`]. Solver locals are dropped on the way, but anything the
//! solver had stored into descriptors is reachable only through the
//! [`CallFrame`] of the adapter call, which releases it in reverse order of
//! acquisition.
//!
//! ```ignore
//! let point = RecoveryPoint::establish()?;
//! let mut frame = CallFrame::new(n);
//! let outcome = point.run(|| {
//!     frame.track(Slot::PermC);
//!     frame.perm_c = Some(NativeBuf::zeroed(n));
//!     // ... solver calls ...
//! });
//! frame.release();
//! let info = outcome?;
//! ```

use crate::error::{Result, SluError};
use crate::native::equil::Equilibration;
use crate::native::stats::SolverStats;
use crate::native::{AbortKind, AbortSignal, NativeBuf, NativeMatrix};
use crate::traits::SluScalar;
use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

thread_local! {
    static RECOVERY_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Whether a recovery point is live on this thread
pub(crate) fn recovery_active() -> bool {
    RECOVERY_ACTIVE.with(Cell::get)
}

/// Scoped capture of solver aborts on the current thread.
///
/// At most one exists per thread. The token cannot leave its thread and is
/// consumed by [`RecoveryPoint::run`].
#[derive(Debug)]
pub(crate) struct RecoveryPoint {
    _thread_bound: PhantomData<*const ()>,
}

impl RecoveryPoint {
    /// Claim this thread's recovery point, refusing re-entrant calls
    pub(crate) fn establish() -> Result<Self> {
        if RECOVERY_ACTIVE.with(|active| active.replace(true)) {
            return Err(SluError::SolverFailure("re-entrant solver call".into()));
        }
        Ok(RecoveryPoint {
            _thread_bound: PhantomData,
        })
    }

    /// Run `f`, turning an abort inside it into an error.
    ///
    /// The recovery point is cleared before this returns, whichever way `f`
    /// finished.
    pub(crate) fn run<R>(self, f: impl FnOnce() -> R) -> Result<R> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        drop(self);
        outcome.map_err(abort_to_error)
    }
}

impl Drop for RecoveryPoint {
    fn drop(&mut self) {
        RECOVERY_ACTIVE.with(|active| active.set(false));
    }
}

fn abort_to_error(payload: Box<dyn Any + Send>) -> SluError {
    match payload.downcast::<AbortSignal>() {
        Ok(signal) => {
            log::warn!("recovered from solver abort ({signal})");
            match signal.kind {
                AbortKind::Allocation => SluError::MemoryError(signal.message),
                AbortKind::Internal => SluError::SolverFailure(signal.message),
            }
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            log::warn!("recovered from unexpected solver panic: {message}");
            SluError::SolverFailure(format!("solver panicked: {message}"))
        }
    }
}

/// Resources a solver call may acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    A,
    B,
    PermC,
    PermR,
    Scaling,
    L,
    U,
    Stat,
}

/// Every solver resource of one adapter call.
///
/// A slot is tracked before its resource is created, so a slot may still be
/// empty or half-filled when an abort strikes; releasing tolerates both.
pub(crate) struct CallFrame<'a, T: SluScalar> {
    pub a: NativeMatrix<'a, T>,
    pub b: NativeMatrix<'a, T>,
    pub perm_c: Option<NativeBuf<i32>>,
    pub perm_r: Option<NativeBuf<i32>>,
    pub scaling: Option<Equilibration>,
    pub l: NativeMatrix<'static, T>,
    pub u: NativeMatrix<'static, T>,
    pub stat: SolverStats,
    pub acquired: Vec<Slot>,
}

impl<'a, T: SluScalar> CallFrame<'a, T> {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            a: NativeMatrix::empty(n, n),
            b: NativeMatrix::empty(n, 0),
            perm_c: None,
            perm_r: None,
            scaling: None,
            l: NativeMatrix::empty(n, n),
            u: NativeMatrix::empty(n, n),
            stat: SolverStats::default(),
            acquired: Vec::new(),
        }
    }

    /// Record that `slot` is about to be filled
    pub(crate) fn track(&mut self, slot: Slot) {
        if !self.acquired.contains(&slot) {
            self.acquired.push(slot);
        }
    }

    /// Destroy tracked resources, most recent first. Safe to call repeatedly.
    pub(crate) fn release(&mut self) {
        while let Some(slot) = self.acquired.pop() {
            log::trace!("releasing {slot:?}");
            match slot {
                Slot::A => self.a.destroy(),
                Slot::B => self.b.destroy(),
                Slot::PermC => self.perm_c = None,
                Slot::PermR => self.perm_r = None,
                Slot::Scaling => self.scaling = None,
                Slot::L => self.l.destroy(),
                Slot::U => self.u.destroy(),
                Slot::Stat => self.stat.free(),
            }
        }
    }
}

impl<T: SluScalar> Drop for CallFrame<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{self, live_allocations};

    #[test]
    fn test_abort_becomes_error_and_frees_frame() {
        let base = live_allocations();
        let mut frame = CallFrame::<f64>::new(4);
        let point = RecoveryPoint::establish().unwrap();
        let outcome: Result<()> = point.run(|| {
            frame.track(Slot::PermC);
            frame.perm_c = Some(NativeBuf::zeroed(4));
            frame.track(Slot::Stat);
            frame.stat.init();
            native::abort(AbortKind::Allocation, "out of workspace")
        });
        assert!(live_allocations() > base);
        frame.release();

        assert_eq!(
            outcome.unwrap_err(),
            SluError::MemoryError("out of workspace".into())
        );
        assert_eq!(live_allocations(), base);
        assert!(!recovery_active());
    }

    #[test]
    fn test_reentrant_point_refused() {
        let point = RecoveryPoint::establish().unwrap();
        let inner = point.run(RecoveryPoint::establish).unwrap();
        assert_eq!(
            inner.unwrap_err(),
            SluError::SolverFailure("re-entrant solver call".into())
        );

        // the point is free again once the first one is consumed
        let again = RecoveryPoint::establish().unwrap();
        assert_eq!(again.run(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_unexpected_panic_is_solver_failure() {
        let point = RecoveryPoint::establish().unwrap();
        let outcome: Result<i32> =
            point.run(|| std::panic::resume_unwind(Box::new("index blew up")));
        let err = outcome.unwrap_err();
        assert_eq!(
            err,
            SluError::SolverFailure("solver panicked: index blew up".into())
        );
    }

    #[test]
    #[should_panic(expected = "outside a recovery point")]
    fn test_abort_without_point_panics() {
        native::abort(AbortKind::Internal, "no point");
    }

    #[test]
    fn test_release_is_idempotent() {
        let base = live_allocations();
        let mut frame = CallFrame::<f32>::new(2);
        let point = RecoveryPoint::establish().unwrap();
        point
            .run(|| {
                frame.track(Slot::PermR);
                frame.perm_r = Some(NativeBuf::zeroed(2));
                frame.track(Slot::PermR);
            })
            .unwrap();
        assert_eq!(frame.acquired, vec![Slot::PermR]);
        frame.release();
        frame.release();
        assert_eq!(live_allocations(), base);
    }
}
