//! HTTP client configuration shared by all transports.

use std::time::Duration;

use crate::error::TransportError;

/// Settings for the `reqwest` client injected into each transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Idle connections kept per host (`None` keeps reqwest's unbounded default).
    /// Concurrent requests are never capped.
    pub pool_max_idle_per_host: Option<usize>,
    /// TCP connect timeout. Requests themselves have no deadline since a
    /// long poll or stream stays open as long as the peer wants.
    pub connect_timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: None,
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: concat!("vibe/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl HttpConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.as_str());
        if let Some(max) = self.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(builder.build()?)
    }
}
