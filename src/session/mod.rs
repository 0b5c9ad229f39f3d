pub mod client_registry;

pub use client_registry::{ClientRecord, ClientRegistry};
