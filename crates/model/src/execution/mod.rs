pub mod checkpoint;
pub mod failed_row;
pub mod job;
pub mod result;
pub mod session;
