use std::net::ToSocketAddrs;

use tiberius::Client;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::MssqlOptions;
use crate::error::MssqlAdapterError;

/// The raw engine session type.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Establish a single engine session from the given options.
///
/// # Errors
///
/// Returns [`MssqlAdapterError::Connection`] when address resolution, the
/// TCP connect, or the TDS handshake fails.
pub async fn create_client(options: &MssqlOptions) -> Result<MssqlClient, MssqlAdapterError> {
    let mut config = tiberius::Config::new();

    config.host(&options.server);
    config.database(&options.database);
    config.authentication(tiberius::AuthMethod::sql_server(
        &options.user,
        &options.password,
    ));

    let port = options.port.unwrap_or(1433);
    config.port(port);

    if let Some(instance) = &options.instance_name {
        config.instance_name(instance);
    }

    config.trust_cert();

    let addr_iter = (options.server.as_str(), port).to_socket_addrs().map_err(|e| {
        MssqlAdapterError::Connection(format!("failed to resolve server address: {e}"))
    })?;

    let server_addr = addr_iter.into_iter().next().ok_or_else(|| {
        MssqlAdapterError::Connection(format!("no valid address found for {}", options.server))
    })?;

    let tcp = TcpStream::connect(server_addr)
        .await
        .map_err(|e| MssqlAdapterError::Connection(format!("TCP connection error: {e}")))?;

    let tcp = tcp.compat_write();

    Client::connect(config, tcp)
        .await
        .map_err(|e| MssqlAdapterError::Connection(format!("SQL Server connection error: {e}")))
}
