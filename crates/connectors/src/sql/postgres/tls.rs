use crate::sql::base::error::ConnectorError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio_postgres::{
    Client, Config, Connection, NoTls, Socket, config::SslMode, tls::TlsStream,
};
use tracing::{error, warn};

/// Connects honouring the `sslmode` of the URL. `prefer` tries TLS first
/// and falls back to plain TCP when the handshake fails.
pub(crate) async fn open_client(url: &str) -> Result<Client, ConnectorError> {
    let config: Config = url
        .parse()
        .map_err(|e: tokio_postgres::Error| ConnectorError::InvalidUrl(e.to_string()))?;

    match config.get_ssl_mode() {
        SslMode::Disable => plain(&config).await,
        SslMode::Prefer => match encrypted(&config).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "TLS negotiation with Postgres failed; connecting in plain text");
                plain(&config).await
            }
        },
        _ => encrypted(&config).await,
    }
}

async fn encrypted(config: &Config) -> Result<Client, ConnectorError> {
    let tls = MakeTlsConnector::new(TlsConnector::builder().build()?);
    let (client, connection) = config.connect(tls).await?;
    drive(connection);
    Ok(client)
}

async fn plain(config: &Config) -> Result<Client, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    drive(connection);
    Ok(client)
}

/// The protocol task has to be polled for the client to make progress.
fn drive<T>(connection: Connection<Socket, T>)
where
    T: TlsStream + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            error!(%error, "Postgres connection task ended with an error");
        }
    });
}
