pub mod database;
pub mod value;
