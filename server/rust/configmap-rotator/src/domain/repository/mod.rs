pub mod rotator_store;

pub use rotator_store::{MutateFn, RotatorStore, StoreError, UpsertOutcome};
