pub mod config;
pub mod controller;
pub mod kube_store;
