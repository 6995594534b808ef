pub mod sql;

pub use sql::base::{
    connection::{ConnectionFactory, ConnectionSpec, DbConnection, SpecConnectionFactory, connect},
    error::{ConnectorError, DbError},
};
