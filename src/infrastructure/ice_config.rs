//! ICE configuration sources

use crate::application::call::media::IceConfigSource;
use crate::domain::ice::{IceServer, IceServerConfig};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Fetches `{"iceServers": [...]}` from the widget backend on every call attempt
pub struct HttpIceConfigSource {
    url: String,
    client: reqwest::Client,
}

impl HttpIceConfigSource {
    pub fn new(url: impl Into<String>) -> CallResult<Self> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CallError::ConfigFetch(format!(
                "ICE endpoint must be http(s), got: {}",
                url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CallError::ConfigFetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl IceConfigSource for HttpIceConfigSource {
    async fn fetch(&self) -> CallResult<Vec<IceServer>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!("ice.fetch_failed url={}: {}", self.url, e);
                CallError::ConfigFetch(e.to_string())
            })?;

        let body: IceServerConfig = response
            .json()
            .await
            .map_err(|e| CallError::ConfigFetch(format!("Invalid ICE configuration: {}", e)))?;

        debug!("ice.fetched url={} servers={}", self.url, body.ice_servers.len());
        Ok(body.ice_servers)
    }
}

/// Fixed server list, typically built from local configuration
#[derive(Debug, Clone, Default)]
pub struct StaticIceConfigSource {
    servers: Vec<IceServer>,
}

impl StaticIceConfigSource {
    pub fn new(servers: Vec<IceServer>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl IceConfigSource for StaticIceConfigSource {
    async fn fetch(&self) -> CallResult<Vec<IceServer>> {
        Ok(self.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_endpoint() {
        let result = HttpIceConfigSource::new("ws://localhost/ice");
        assert!(matches!(result, Err(CallError::ConfigFetch(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_config_fetch_error() {
        let source = HttpIceConfigSource::new("http://127.0.0.1:1/v1/api/ice-servers").unwrap();
        let result = source.fetch().await;
        assert!(matches!(result, Err(CallError::ConfigFetch(_))));
    }

    #[tokio::test]
    async fn test_static_source_returns_configured_servers() {
        let source = StaticIceConfigSource::new(vec![IceServer::stun("stun:stun.example.com")]);
        assert_eq!(source.fetch().await.unwrap().len(), 1);
    }
}
