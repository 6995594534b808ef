use model::core::database::DatabaseKind;
use mysql_async::Error as MySqlError;
use std::error::Error as StdError;
use thiserror::Error;
use tokio_postgres::{Error as PgError, error::SqlState};

/// All errors coming from the database/query layer.
#[derive(Debug, Error)]
pub enum DbError {
    /// Low‐level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] PgError),

    #[error("MySQL error: {0}")]
    MySql(#[from] MySqlError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A value could not be converted for the target column.
    #[error("Value conversion error: {0}")]
    Conversion(String),

    /// A value does not fit the target column's precision or length.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("No cursor is open on this connection")]
    NoCursor,

    #[error("Query error: {0}")]
    Query(String),
}

/// Errors happening during connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("PostgreSQL connection failed: {0}")]
    Postgres(#[from] PgError),

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("MySQL connection failed: {0}")]
    MySql(#[from] MySqlError),

    #[error("SQLite connection failed: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("No driver available for {0} connections")]
    UnsupportedKind(DatabaseKind),
}

/// Raised while encoding a parameter that does not fit the column type.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParamOutOfRange(pub String);

impl DbError {
    /// Connection loss, timeouts, lock conflicts and similar conditions that
    /// may succeed when the work is repeated.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Io(_) | DbError::ConnectionLost(_) => true,
            DbError::Postgres(err) => pg_is_transient(err),
            DbError::MySql(err) => mysql_is_transient(err),
            DbError::Sqlite(err) => sqlite_is_transient(err),
            DbError::Conversion(_) | DbError::OutOfRange(_) | DbError::NoCursor | DbError::Query(_) => {
                false
            }
        }
    }

    /// Numeric overflow, value too long, datetime overflow: data errors that
    /// concern a single row rather than the whole statement.
    pub fn is_precision_error(&self) -> bool {
        match self {
            DbError::OutOfRange(_) => true,
            DbError::Postgres(err) => pg_is_precision(err),
            DbError::MySql(MySqlError::Server(server)) => {
                MYSQL_PRECISION_CODES.contains(&server.code)
                    || matches!(server.state.as_str(), "22001" | "22003" | "22007" | "22008")
            }
            DbError::Sqlite(sqlx::Error::Database(db)) => sqlite_primary_code(db.code().as_deref()) == Some(18),
            _ => false,
        }
    }
}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::Postgres(err) => pg_is_transient(err),
            ConnectorError::MySql(err) => mysql_is_transient(err),
            ConnectorError::Sqlite(err) => sqlite_is_transient(err),
            ConnectorError::Tls(_) => true,
            ConnectorError::InvalidUrl(_) | ConnectorError::UnsupportedKind(_) => false,
        }
    }
}

pub(crate) fn pg_is_transient(err: &PgError) -> bool {
    if err.is_closed() {
        return true;
    }
    if err.source().is_some_and(|s| s.is::<std::io::Error>()) {
        return true;
    }
    err.code().is_some_and(|code| {
        matches!(
            *code,
            SqlState::T_R_SERIALIZATION_FAILURE
                | SqlState::T_R_DEADLOCK_DETECTED
                | SqlState::LOCK_NOT_AVAILABLE
                | SqlState::TOO_MANY_CONNECTIONS
                | SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW
                | SqlState::CONNECTION_FAILURE
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::CONNECTION_EXCEPTION
                | SqlState::OPERATOR_INTERVENTION
        )
    })
}

fn pg_is_precision(err: &PgError) -> bool {
    if err.source().is_some_and(|s| s.is::<ParamOutOfRange>()) {
        return true;
    }
    err.code().is_some_and(|code| {
        matches!(
            *code,
            SqlState::NUMERIC_VALUE_OUT_OF_RANGE
                | SqlState::STRING_DATA_RIGHT_TRUNCATION
                | SqlState::DATETIME_FIELD_OVERFLOW
                | SqlState::INTERVAL_FIELD_OVERFLOW
        )
    })
}

// See: https://dev.mysql.com/doc/mysql-errors/8.0/en/server-error-reference.html
const MYSQL_TRANSIENT_CODES: [u16; 8] = [1205, 1213, 2002, 2003, 2006, 2013, 1040, 1042];
const MYSQL_PRECISION_CODES: [u16; 6] = [1264, 1292, 1366, 1406, 1441, 1690];

fn mysql_is_transient(err: &MySqlError) -> bool {
    match err {
        MySqlError::Io(_) => true,
        MySqlError::Driver(driver) => matches!(
            driver,
            mysql_async::DriverError::ConnectionClosed | mysql_async::DriverError::PoolDisconnected
        ),
        MySqlError::Server(server) => {
            MYSQL_TRANSIENT_CODES.contains(&server.code)
                || matches!(server.state.as_str(), "40001" | "HYT00" | "08S01")
        }
        _ => false,
    }
}

fn sqlite_primary_code(code: Option<&str>) -> Option<i64> {
    code.and_then(|c| c.parse::<i64>().ok()).map(|c| c & 0xff)
}

fn sqlite_is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        // SQLITE_BUSY, SQLITE_LOCKED
        sqlx::Error::Database(db) => matches!(sqlite_primary_code(db.code().as_deref()), Some(5 | 6)),
        _ => false,
    }
}
