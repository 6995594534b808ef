pub mod base;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
