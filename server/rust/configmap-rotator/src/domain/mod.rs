pub mod clock;
pub mod entity;
pub mod repository;
pub mod service;
pub mod value_object;
