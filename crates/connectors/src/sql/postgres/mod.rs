pub mod connection;
pub mod params;
pub mod row;
pub mod tls;
