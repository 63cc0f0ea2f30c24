//! ICE server descriptors

use serde::{Deserialize, Serialize};

/// `urls` may be a single string or a list, as browsers accept both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            IceUrls::One(url) => vec![url.clone()],
            IceUrls::Many(urls) => urls.clone(),
        }
    }
}

/// One STUN or TURN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: IceUrls::One(url.into()),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Body of the ICE configuration endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_body() {
        let json = r#"{"iceServers":[
            {"urls":"stun:stun.l.google.com:19302"},
            {"urls":["turn:turn.example.com:3478"],"username":"u","credential":"p"}
        ]}"#;
        let config: IceServerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(
            config.ice_servers[0].urls.to_vec(),
            vec!["stun:stun.l.google.com:19302".to_string()]
        );
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_stun_entry_omits_credentials() {
        let json = serde_json::to_value(IceServer::stun("stun:example.org")).unwrap();
        assert!(json.get("username").is_none());
        assert_eq!(json["urls"], "stun:example.org");
    }
}
