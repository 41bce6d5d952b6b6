use ssip_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use std::env;
use thiserror::Error;

/// Overrides the daemon host.
pub const HOST_ENV: &str = "SPEECHD_HOST";
/// Overrides the daemon port.
pub const PORT_ENV: &str = "SPEECHD_PORT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port in {var}: '{value}'")]
    InvalidPort { var: String, value: String },
}

/// Where the speech daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionConfig {
    /// Read the target from the environment, falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        Self::from_vars(env::var(HOST_ENV).ok(), env::var(PORT_ENV).ok())
    }

    fn from_vars(host: Option<String>, port: Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }

        if let Some(port) = port {
            config.port = port.trim().parse().map_err(|_| ConfigError::InvalidPort {
                var: PORT_ENV.to_string(),
                value: port.clone(),
            })?;
        }

        log::debug!("Speech daemon target: {}", config.address());
        Ok(config)
    }

    /// `host:port`, ready for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How this client names itself to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user: String,
    pub client: String,
    pub component: String,
}

impl ClientIdentity {
    pub fn new(client: &str) -> Self {
        Self {
            user: env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            client: client.to_string(),
            component: "main".to_string(),
        }
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = component.to_string();
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    /// The `user:client:component` form sent as `CLIENT_NAME`.
    pub fn full_name(&self) -> String {
        format!("{}:{}:{}", self.user, self.client, self.component)
    }
}
