use std::time::Duration;

use parking_lot::RwLock;

use crate::config::TransportConfig;
use crate::error::ClientError;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, ClientError> {
    // No total timeout here: streams may stay open indefinitely, bounded calls
    // set a per-request timeout instead.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ClientError::Configuration(format!("Failed to build HTTP client: {err}")))
}

/// Shared, pooled HTTP client with an explicit lifecycle.
///
/// One instance is owned by the composition root and shared via `Arc` across
/// concurrent chat turns. `initialize` and `close` are idempotent; using the
/// transport while closed yields [`ClientError::NotInitialized`].
pub struct HttpTransport {
    settings: TransportConfig,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(settings: &TransportConfig) -> Self {
        Self {
            settings: settings.clone(),
            client: RwLock::new(None),
        }
    }

    /// Build the pooled client if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the client cannot be built.
    pub fn initialize(&self) -> Result<(), ClientError> {
        if self.client.read().is_some() {
            return Ok(());
        }
        let mut slot = self.client.write();
        if slot.is_none() {
            let client = build_reqwest_client(
                self.settings.pool_max_idle_per_host.max(1),
                self.settings.pool_idle_timeout(),
                self.settings.connect_timeout(),
                self.settings.use_env_proxy,
            )?;
            tracing::debug!(
                connect_timeout_secs = self.settings.connect_timeout_secs,
                pool_max_idle_per_host = self.settings.pool_max_idle_per_host,
                "http transport initialized"
            );
            *slot = Some(client);
        }
        Ok(())
    }

    /// Drop the pooled client. In-flight requests keep their own handle.
    pub fn close(&self) {
        if self.client.write().take().is_some() {
            tracing::debug!("http transport closed");
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.client.read().is_some()
    }

    #[must_use]
    pub fn settings(&self) -> &TransportConfig {
        &self.settings
    }

    /// Cheap handle to the pooled client.
    pub(crate) fn client(&self) -> Result<reqwest::Client, ClientError> {
        self.client
            .read()
            .as_ref()
            .cloned()
            .ok_or(ClientError::NotInitialized)
    }
}
