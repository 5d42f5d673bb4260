use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub media_server_url: Option<String>,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub outbound_queue_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            media_server_url: env::var("MEDIA_SERVER_URL").ok(),
            heartbeat_interval_secs: env::var("HEARTBEAT_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            heartbeat_timeout_secs: env::var("HEARTBEAT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            outbound_queue_size: env::var("OUTBOUND_QUEUE_SIZE")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .unwrap_or(64),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            media_server_url: None,
            heartbeat_interval_secs: 20,
            heartbeat_timeout_secs: 60,
            outbound_queue_size: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port")]
    InvalidPort,
}
