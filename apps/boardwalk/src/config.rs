use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

/// Default listener address when neither the CLI nor the environment says
/// otherwise.
pub const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address '{value}': {source}")]
    Listen {
        value: String,
        source: std::net::AddrParseError,
    },
}

/// Runtime configuration for the display server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/websocket listener binds.
    pub listen: SocketAddr,
    /// Page served on `/` and `/client.html`; built-in placeholder when
    /// unset.
    pub client_html: Option<PathBuf>,
    /// Script served on `/broadway.js`; placeholder when unset.
    pub client_js: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from `BOARDWALK_*` environment variables. The
    /// binary layers its CLI flags on top of this; embedders that skip clap
    /// get the same environment behavior through here.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen = match env::var("BOARDWALK_LISTEN") {
            Ok(value) => parse_listen(&value)?,
            Err(_) => DEFAULT_LISTEN,
        };
        Ok(Self {
            listen,
            client_html: env::var("BOARDWALK_CLIENT_HTML").ok().map(PathBuf::from),
            client_js: env::var("BOARDWALK_CLIENT_JS").ok().map(PathBuf::from),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            client_html: None,
            client_js: None,
        }
    }
}

/// Parses a listen address, normalizing `localhost` to IPv4 so the listener
/// does not land on ::1 while browsers resolve 127.0.0.1.
pub fn parse_listen(value: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = match value.strip_prefix("localhost:") {
        Some(port) => format!("127.0.0.1:{port}"),
        None => value.to_owned(),
    };
    normalized.parse().map_err(|source| ConfigError::Listen {
        value: value.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests cannot run in parallel.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn default_config_listens_on_loopback() {
        let config = Config::default();
        assert_eq!(config.listen.to_string(), "127.0.0.1:8080");
        assert!(config.client_html.is_none());
        assert!(config.client_js.is_none());
    }

    #[test]
    fn localhost_normalizes_to_ipv4() {
        assert_eq!(
            parse_listen("localhost:9090").unwrap().to_string(),
            "127.0.0.1:9090"
        );
        assert!(parse_listen("not-an-address").is_err());
    }

    #[test]
    fn from_env_defaults_without_variables() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe {
            env::remove_var("BOARDWALK_LISTEN");
            env::remove_var("BOARDWALK_CLIENT_HTML");
            env::remove_var("BOARDWALK_CLIENT_JS");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert!(config.client_html.is_none());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = env::var("BOARDWALK_LISTEN").ok();
        unsafe {
            env::set_var("BOARDWALK_LISTEN", "0.0.0.0:8085");
            env::set_var("BOARDWALK_CLIENT_HTML", "/srv/www/client.html");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.listen.to_string(), "0.0.0.0:8085");
        assert_eq!(
            config.client_html.as_deref(),
            Some(std::path::Path::new("/srv/www/client.html"))
        );
        unsafe {
            match original {
                Some(value) => env::set_var("BOARDWALK_LISTEN", value),
                None => env::remove_var("BOARDWALK_LISTEN"),
            }
            env::remove_var("BOARDWALK_CLIENT_HTML");
        }
    }
}
