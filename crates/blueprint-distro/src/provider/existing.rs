//! Provider for clusters managed outside Blueprint

use std::error::Error as StdError;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use tracing::debug;

use blueprint_common::blueprint::PROVIDER_EXISTING;
use blueprint_common::client::api_server_url;
use blueprint_common::{Blueprint, Error, Result, BLUEPRINT_NAMESPACE};

use super::{Connection, Provider};

const LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);
const LIVENESS_PATH: &str = "/livez";

/// Why an unauthenticated liveness request produced no response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LivenessFailure {
    /// Nothing is listening, or the address does not resolve
    Connect,
    /// The server did not answer in time
    Timeout,
    /// The TLS handshake was rejected
    Tls,
    /// Anything else the transport reported
    Other(String),
}

impl LivenessFailure {
    fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        Self::from_chain(err, err.is_connect())
    }

    /// Classify a transport error chain; `is_connect` marks a failure before
    /// any HTTP exchange.
    ///
    /// The TLS layer reports rejected handshakes as `InvalidData` I/O errors,
    /// which would otherwise be indistinguishable from a refused connection.
    fn from_chain(err: &(dyn StdError + 'static), is_connect: bool) -> Self {
        let mut source = Some(err);
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::InvalidData {
                    return Self::Tls;
                }
            }
            source = cause.source();
        }

        let chain = error_chain(err).to_ascii_lowercase();
        if ["certificate", "handshake", "tls", "alert"]
            .iter()
            .any(|marker| chain.contains(marker))
        {
            Self::Tls
        } else if is_connect {
            Self::Connect
        } else {
            Self::Other(chain)
        }
    }
}

/// Decide existence from the outcome of an unauthenticated liveness request.
///
/// Any HTTP response (401 and 403 included) or a TLS rejection proves a
/// server is there; connection failures and timeouts mean nothing is.
pub fn liveness_verdict(outcome: std::result::Result<u16, LivenessFailure>) -> Result<bool> {
    match outcome {
        Ok(_) | Err(LivenessFailure::Tls) => Ok(true),
        Err(LivenessFailure::Connect) | Err(LivenessFailure::Timeout) => Ok(false),
        Err(LivenessFailure::Other(msg)) => Err(Error::provider_check(PROVIDER_EXISTING, msg)),
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// A pre-provisioned cluster: lifecycle operations are no-ops
pub struct ExistingProvider {
    conn: Connection,
}

impl ExistingProvider {
    /// Provider for the current context of `kubeconfig`
    pub fn new(kubeconfig: &Path) -> Self {
        Self {
            conn: Connection::new(kubeconfig, ""),
        }
    }

    async fn check_liveness(&self, server: &str) -> Result<bool> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(LIVENESS_TIMEOUT)
            .build()
            .map_err(|e| Error::provider_check(PROVIDER_EXISTING, e.to_string()))?;

        let url = format!("{}{}", server.trim_end_matches('/'), LIVENESS_PATH);
        let outcome = match http.get(&url).send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) => Err(LivenessFailure::classify(&e)),
        };
        debug!(url = %url, outcome = ?outcome, "liveness check");
        liveness_verdict(outcome)
    }
}

#[async_trait]
impl Provider for ExistingProvider {
    async fn install(&self) -> Result<()> {
        debug!("nothing to install for an unmanaged existing cluster");
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let server = api_server_url(self.conn.kubeconfig(), None)?;
        self.check_liveness(&server).await
    }

    async fn refresh(&self) -> Result<()> {
        debug!("nothing to refresh for an unmanaged existing cluster");
        Ok(())
    }

    async fn upgrade(&self) -> Result<()> {
        Ok(())
    }

    async fn setup_client(&mut self) -> Result<()> {
        self.conn.setup().await
    }

    fn client(&self) -> Result<Client> {
        self.conn.client()
    }

    async fn wait_for_nodes(&self) -> Result<()> {
        self.conn.wait_for_nodes().await
    }

    async fn wait_for_pods(&self) -> Result<()> {
        self.conn.wait_for_pods(BLUEPRINT_NAMESPACE).await
    }

    async fn reset(&self, _force: bool) -> Result<()> {
        debug!("nothing to reset for an unmanaged existing cluster");
        Ok(())
    }

    fn provider_type(&self) -> &'static str {
        PROVIDER_EXISTING
    }

    fn kube_context(&self) -> String {
        String::new()
    }

    async fn needs_upgrade(&self, _blueprint: &Blueprint) -> Result<bool> {
        debug!("an unmanaged existing cluster is never upgraded");
        Ok(false)
    }

    async fn validate_upgrade(&self, _blueprint: &Blueprint) -> Result<()> {
        Ok(())
    }
}
