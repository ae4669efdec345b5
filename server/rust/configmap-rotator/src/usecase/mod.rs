pub mod reconcile_rotator;

pub use reconcile_rotator::{
    ReconcileError, ReconcileErrorKind, ReconcileOutcome, ReconcileRotatorUseCase, RotationRecord,
};
