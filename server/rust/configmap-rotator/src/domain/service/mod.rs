pub mod rotation_domain_service;

pub use rotation_domain_service::{apply_rotation, generate_rotation_data, MutateError};
