use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Secret shipped as the development default. Production refuses to use it.
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// HS256 secret used to verify bearer tokens presented by clients
    #[arg(long, env, default_value = DEFAULT_JWT_SECRET, hide_env_values = true)]
    jwt_secret: String,

    /// Hostname of the upstream MQTT broker
    #[arg(long, env, default_value = "beewax-mqtt")]
    pub mqtt_broker_host: String,

    /// TCP port of the upstream MQTT broker
    #[arg(long, env, default_value_t = 1883)]
    pub mqtt_broker_port: u16,

    /// Username for the upstream broker. Leave empty to connect anonymously.
    #[arg(long, env, default_value = "")]
    mqtt_username: String,

    /// Password for the upstream broker
    #[arg(long, env, default_value = "", hide_env_values = true)]
    mqtt_password: String,

    /// Client id presented to the upstream broker
    #[arg(long, env)]
    mqtt_client_id: Option<String>,

    /// Seconds to wait before reconnecting after an upstream connection error
    #[arg(long, env, default_value_t = 5)]
    pub mqtt_reconnect_secs: u64,

    /// Topic prefix under which hives publish, e.g. `colmena/hives/{id}/sensors`
    #[arg(long, env, default_value = "colmena/hives")]
    pub mqtt_hive_topic_prefix: String,

    /// Exact topic carrying fleet-wide alerts
    #[arg(long, env, default_value = "colmena/alerts")]
    pub mqtt_alerts_topic: String,

    /// Seconds between liveness probes of WebSocket connections
    #[arg(long, env, default_value_t = 30)]
    pub liveness_interval_secs: u64,

    /// Milliseconds a single write to a client may take before the client is dropped
    #[arg(long, env, default_value_t = 5000)]
    pub push_timeout_ms: u64,

    /// Frames queued per connection before pushes to it start failing
    #[arg(long, env, default_value_t = 64)]
    pub connection_outbox_capacity: usize,

    /// Upstream messages buffered between the MQTT client and the relay loop
    #[arg(long, env, default_value_t = 256)]
    pub upstream_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_jwt_secret(mut self, jwt_secret: String) -> Self {
        self.jwt_secret = jwt_secret;
        self
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// Returns the broker credentials, or `None` for anonymous access.
    pub fn mqtt_credentials(&self) -> Option<(String, String)> {
        if self.mqtt_username.is_empty() {
            None
        } else {
            Some((self.mqtt_username.clone(), self.mqtt_password.clone()))
        }
    }

    pub fn mqtt_client_id(&self) -> String {
        self.mqtt_client_id.clone().unwrap_or_else(|| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            format!("colmena-api-{millis}")
        })
    }

    pub fn mqtt_broker(&self) -> String {
        format!("{}:{}", self.mqtt_broker_host, self.mqtt_broker_port)
    }

    pub fn mqtt_reconnect_period(&self) -> Duration {
        Duration::from_secs(self.mqtt_reconnect_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }

    /// Production deployments must supply their own token secret.
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}
