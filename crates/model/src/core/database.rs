use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Database family a connection or job side talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    MySql,
    Oracle,
    SqlServer,
    Sqlite,
    Snowflake,
    #[default]
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown database kind: {0}")]
pub struct UnknownDatabaseKind(pub String);

impl DatabaseKind {
    /// Resolves a database tag, degrading unknown tags to `Generic`.
    ///
    /// The boolean is `true` when the tag was recognised, so callers can
    /// warn about the fallback.
    pub fn resolve(tag: &str) -> (DatabaseKind, bool) {
        match tag.parse::<DatabaseKind>() {
            Ok(kind) => (kind, true),
            Err(_) => (DatabaseKind::Generic, false),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::MySql => "mysql",
            DatabaseKind::Oracle => "oracle",
            DatabaseKind::SqlServer => "sqlserver",
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Snowflake => "snowflake",
            DatabaseKind::Generic => "generic",
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = UnknownDatabaseKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "oracle" | "oci" => Ok(DatabaseKind::Oracle),
            "sqlserver" | "mssql" | "sql_server" => Ok(DatabaseKind::SqlServer),
            "sqlite" | "sqlite3" => Ok(DatabaseKind::Sqlite),
            "snowflake" => Ok(DatabaseKind::Snowflake),
            "generic" | "ansi" => Ok(DatabaseKind::Generic),
            other => Err(UnknownDatabaseKind(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
