use crate::{env::EnvManager, error::CliError};
use connectors::{ConnectionSpec, connect};
use engine_core::state::{
    SessionStore,
    sled_store::SledSessionStore,
    sql_store::{MetadataTables, SqlSessionStore},
};
use model::execution::{checkpoint::CheckpointConfig, job::JobConfig};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

/// Where run bookkeeping, checkpoints and stop requests live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// Local sled database; defaults to `~/.mapper/state`.
    Sled {
        #[serde(default)]
        path: Option<String>,
    },
    /// Metadata tables reachable through a database connection.
    Sql {
        connection: ConnectionSpec,
        #[serde(default)]
        tables: MetadataTables,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig::Sled { path: None }
    }
}

/// Everything `mapper run` needs for one mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobFile {
    pub job: JobConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub source: ConnectionSpec,
    pub target: ConnectionSpec,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl JobFile {
    /// Reads a job file, expanding `${VAR}` references first.
    pub async fn load(path: &str, env: &EnvManager) -> Result<Self, CliError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::parse(&raw, env)
    }

    pub fn parse(raw: &str, env: &EnvManager) -> Result<Self, CliError> {
        let file: JobFile = serde_json::from_str(&env.expand(raw)?)?;
        file.job
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(file)
    }

    pub async fn open_store(&self) -> Result<Arc<dyn SessionStore>, CliError> {
        match &self.metadata {
            MetadataConfig::Sled { path } => {
                let path = match path {
                    Some(path) => PathBuf::from(path),
                    None => default_sled_path()?,
                };
                info!(path = %path.display(), "Opening sled metadata store");
                Ok(Arc::new(SledSessionStore::open(&path)?))
            }
            MetadataConfig::Sql { connection, tables } => {
                let conn = connect(connection).await?;
                Ok(Arc::new(SqlSessionStore::new(conn, tables.clone())))
            }
        }
    }
}

fn default_sled_path() -> Result<PathBuf, CliError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(".mapper/state"))
}
