use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::mcp::{server::SessionPolicy, session::DEFAULT_HEARTBEAT_INTERVAL};

#[derive(Debug, Clone)]
pub struct Config {
    pub org_url: Option<Url>,
    pub access_token: Option<String>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub heartbeat_interval: Duration,
    pub session_policy: SessionPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AZURE_DEVOPS_ORG_URL must be an absolute http(s) URL")]
    InvalidOrgUrl,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("SSE_HEARTBEAT_SECS must be a positive integer")]
    InvalidHeartbeat,
    #[error("MCP_REQUIRE_SESSION must be true or false")]
    InvalidSessionPolicy,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    /// Missing Azure DevOps credentials are not an error: the server still
    /// starts and tool calls report the client as not initialized.
    pub fn from_env() -> Result<Self, ConfigError> {
        let org_url = non_empty_var("AZURE_DEVOPS_ORG_URL")
            .map(|value| {
                value
                    .parse::<Url>()
                    .ok()
                    .filter(|url| matches!(url.scheme(), "http" | "https"))
                    .ok_or(ConfigError::InvalidOrgUrl)
            })
            .transpose()?;
        let access_token = non_empty_var("AZURE_DEVOPS_PAT");

        let bind_addr = non_empty_var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = non_empty_var("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(3000);
        let heartbeat_interval = non_empty_var("SSE_HEARTBEAT_SECS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or(ConfigError::InvalidHeartbeat)
            })
            .transpose()?
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let session_policy = match non_empty_var("MCP_REQUIRE_SESSION")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("false") | Some("0") => SessionPolicy::Stateless,
            Some("true") | Some("1") => SessionPolicy::RequireSession,
            Some(_) => return Err(ConfigError::InvalidSessionPolicy),
        };

        let config = Self {
            org_url,
            access_token,
            bind_addr,
            bind_port,
            heartbeat_interval,
            session_policy,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn has_credentials(&self) -> bool {
        self.org_url.is_some() && self.access_token.is_some()
    }
}
