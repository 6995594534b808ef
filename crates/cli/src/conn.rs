use crate::error::CliError;
use async_trait::async_trait;
use connectors::{ConnectionSpec, connect};
use model::core::database::DatabaseKind;
use std::str::FromStr;
use tracing::{error, info};

/// Trait for "pinging" a database
#[async_trait]
pub trait ConnectionPinger {
    /// Attempts to ping; returns Err if unreachable
    async fn ping(&self) -> Result<(), CliError>;
}

/// Opens a session through the engine's own driver layer and runs `SELECT 1`.
pub struct DatabasePinger {
    pub spec: ConnectionSpec,
}

impl DatabasePinger {
    pub fn new(kind: &str, url: &str) -> Result<Self, CliError> {
        let kind = DatabaseKind::from_str(kind)?;
        Ok(DatabasePinger {
            spec: ConnectionSpec::new(kind, url),
        })
    }
}

#[async_trait]
impl ConnectionPinger for DatabasePinger {
    async fn ping(&self) -> Result<(), CliError> {
        let kind = self.spec.kind;
        info!(%kind, "Pinging database");

        let mut conn = connect(&self.spec).await.map_err(|e| {
            error!(%kind, error = %e, "Connection failed");
            CliError::Connector(e)
        })?;

        conn.ping().await.map_err(|e| {
            error!(%kind, error = %e, "Ping query failed");
            CliError::Db(e)
        })?;

        info!(%kind, "Ping succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_rejected() {
        assert!(matches!(
            DatabasePinger::new("ftp", "ftp://host"),
            Err(CliError::InvalidConnectionKind(_))
        ));
        assert_eq!(
            DatabasePinger::new("pg", "postgres://h/db").unwrap().spec.kind,
            DatabaseKind::Postgres
        );
    }

    #[tokio::test]
    async fn test_ping_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ping.db").display());
        DatabasePinger::new("sqlite", &url).unwrap().ping().await.unwrap();
    }
}
