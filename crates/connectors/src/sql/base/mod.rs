pub mod connection;
pub mod cursor;
pub mod error;
