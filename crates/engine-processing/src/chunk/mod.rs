pub mod manager;
pub mod processor;
