pub mod executor;
pub mod parallel;
pub mod sequential;
