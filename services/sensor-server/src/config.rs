//! Runtime configuration, read once from the environment at startup.
//!
//! Every value goes through [`ServerConfig::from_lookup`], so tests can feed a
//! map instead of mutating the process environment. Blank values count as unset.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use url::Url;

const DEFAULT_MQTT_HOST: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub ca_path: PathBuf,
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Base for the per-process client id, see [`crate::session::session_client_id`].
    pub client_id: String,
    pub topic: String,
    pub credentials: Option<(String, String)>,
    pub tls: Option<TlsPaths>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub mqtt: MqttConfig,
    pub default_bin_id: Option<String>,
    pub bind_addr: SocketAddr,
    pub store_path: Option<PathBuf>,
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.optional(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("{key}={raw} is not valid; using default");
                default
            }),
            None => default,
        }
    }

    fn secs(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.parsed(key, default))
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let default_host = env.or("MQTT_HOST", DEFAULT_MQTT_HOST);
        let default_port: u16 = env.parsed("MQTT_PORT", DEFAULT_MQTT_PORT);
        let (host, port, url_tls) = match env.optional("MQTT_URL") {
            Some(raw) => match Url::parse(&raw) {
                Ok(u) => {
                    let host = u.host_str().unwrap_or(&default_host).to_string();
                    let port = u.port().unwrap_or(default_port);
                    let tls = matches!(u.scheme(), "ssl" | "mqtts" | "tls");
                    (host, port, tls)
                }
                Err(e) => {
                    tracing::warn!(
                        "MQTT_URL parse error: {e}; falling back to {}:{}",
                        default_host,
                        default_port
                    );
                    (default_host, default_port, false)
                }
            },
            None => (default_host, default_port, false),
        };

        let credentials = match (env.optional("MQTT_USERNAME"), env.optional("MQTT_PASSWORD")) {
            (Some(user), pass) => Some((user, pass.unwrap_or_default())),
            (None, _) => None,
        };

        let client_auth = match (env.optional("MQTT_CERT_PATH"), env.optional("MQTT_KEY_PATH")) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "MQTT client certificate/key not fully specified; proceeding without client auth"
                );
                None
            }
        };
        let tls = match env.optional("MQTT_CA_PATH") {
            Some(ca) => Some(TlsPaths {
                ca_path: PathBuf::from(ca),
                client_auth,
            }),
            None if url_tls => {
                anyhow::bail!("MQTT_URL uses a TLS scheme but MQTT_CA_PATH is not set")
            }
            None => None,
        };

        let mqtt = MqttConfig {
            host,
            port,
            client_id: env.or("MQTT_CLIENT_ID", "sensor-server"),
            topic: env.or("MQTT_TOPIC", "bins/sensors"),
            credentials,
            tls,
            keep_alive: env.secs("MQTT_KEEP_ALIVE_SECS", 30),
            connect_timeout: env.secs("MQTT_CONNECT_TIMEOUT_SECS", 30),
            reconnect_delay: env.secs("MQTT_RECONNECT_DELAY_SECS", 2),
        };

        let http_host = env.or("SENSOR_SERVER_HOST", "0.0.0.0");
        let http_port: u16 = env.parsed("SENSOR_SERVER_PORT", 8080);
        let bind_addr: SocketAddr = format!("{http_host}:{http_port}")
            .parse()
            .with_context(|| format!("invalid bind address {http_host}:{http_port}"))?;

        Ok(Self {
            mqtt,
            default_bin_id: env.optional("DEFAULT_BIN_ID"),
            bind_addr,
            store_path: env.optional("READINGS_STORE_PATH").map(PathBuf::from),
        })
    }
}
