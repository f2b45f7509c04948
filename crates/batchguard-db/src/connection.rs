use std::time::Duration;

use batchguard_core::params::ConnectionParams;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::{Error, Result};

/// Session options shared by the issuer and audit connections.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub application_name: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            application_name: "batchguard".to_string(),
        }
    }
}

/// Split `host`, `host:port` or `host,port` into its parts. Bracketed IPv6
/// literals keep their colons.
fn split_server(server: &str) -> Result<(&str, Option<u16>)> {
    let server = server.trim();
    let split = match server.rsplit_once(',') {
        Some(parts) => Some(parts),
        None if server.starts_with('[') => server.rsplit_once("]:"),
        None if server.matches(':').count() == 1 => server.rsplit_once(':'),
        None => None,
    };

    let (host, port) = match split {
        Some((host, port)) => {
            let port = port.trim().parse::<u16>().map_err(|_| {
                Error::Connection(format!("invalid port in server address '{}'", server))
            })?;
            (host.trim(), Some(port))
        }
        None => (server, None),
    };

    Ok((host.trim_start_matches('[').trim_end_matches(']'), port))
}

pub fn connect_options(
    params: &ConnectionParams,
    settings: &ConnectionSettings,
) -> Result<PgConnectOptions> {
    let (host, port) = split_server(&params.server)?;

    let mut options = PgConnectOptions::new()
        .host(host)
        .database(&params.database)
        .username(&params.user)
        .application_name(&settings.application_name);
    if let Some(port) = port {
        options = options.port(port);
    }
    // An empty password leaves authentication to pg_hba/.pgpass.
    if !params.password.is_empty() {
        options = options.password(&params.password);
    }

    Ok(options)
}

/// Open a single-connection pool. The run is sequential, so one connection per
/// store is all it ever holds.
pub async fn connect(params: &ConnectionParams, settings: &ConnectionSettings) -> Result<PgPool> {
    let options = connect_options(params, settings)?;
    tracing::debug!(server = %params.server, database = %params.database, "Opening connection");

    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(settings.connect_timeout)
        .connect_with(options)
        .await
        .map_err(|e| Error::Connection(format!("{}/{}: {}", params.server, params.database, e)))
}
