pub mod chunk;
pub mod context;
pub mod error;
pub mod loader;
pub mod retry;
pub mod scd;
pub mod transform;
