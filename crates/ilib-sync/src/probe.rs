use std::{sync::Arc, time::Duration};

use ilib_core::{credentials::CredentialsRecord, remote::RemoteConnector};
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, info, instrument};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks that a set of connection settings actually works before anything
/// is persisted. Pure: no state is written either way.
pub struct ConnectivityProbe {
    connector: Arc<dyn RemoteConnector>,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            connector,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// TCP connect first (name resolution included), then the protocol
    /// handshake. Each step is bounded by the probe timeout; any failure is
    /// `false`.
    #[instrument(skip_all, fields(host = %credentials.host, port = credentials.port))]
    pub async fn can_connect(&self, credentials: &CredentialsRecord) -> bool {
        let addr = (credentials.host.as_str(), credentials.port);
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => drop(stream),
            Ok(Err(err)) => {
                info!(error = %err, "tcp connect failed");
                return false;
            }
            Err(_) => {
                info!(timeout_ms = self.timeout.as_millis() as u64, "tcp connect timed out");
                return false;
            }
        }

        match timeout(self.timeout, self.connector.connect(credentials)).await {
            Ok(Ok(_session)) => {
                debug!(connector = self.connector.name(), "handshake succeeded");
                true
            }
            Ok(Err(err)) => {
                info!(connector = self.connector.name(), error = %err, "handshake failed");
                false
            }
            Err(_) => {
                info!(connector = self.connector.name(), "handshake timed out");
                false
            }
        }
    }
}
