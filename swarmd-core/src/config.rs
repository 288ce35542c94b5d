// swarmd-core/src/config.rs
// Environment-backed runtime configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Service identity stamped on every exported span.
pub const SERVICE_NAME: &str = "swarmd";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime configuration, resolved from the environment.
///
/// Recognized variables:
///   COORD_DIR               coordination directory (default ./coordination)
///   OTLP_ENDPOINT           base URL of an OTLP collector (optional)
///   OPTIMIZATION_INTERVAL   optimization cycle interval in seconds (default 300)
///   AGENT_TTL               agent heartbeat TTL in seconds (default 600)
///   SPAN_QUEUE_CAPACITY     span queue bound (default 8192)
///   SAMPLING_RATIO          head sampling ratio 0.0-1.0 (default 1.0)
///   HOST_PREFIX             id prefix for multi-host deployments (optional)
#[derive(Debug, Clone)]
pub struct CoordConfig {
    pub coord_dir: PathBuf,
    pub otlp_endpoint: Option<String>,
    pub optimization_interval: Duration,
    pub agent_ttl: Duration,
    pub span_queue_capacity: usize,
    pub sampling_ratio: f64,
    pub host_prefix: Option<String>,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            coord_dir: PathBuf::from("./coordination"),
            otlp_endpoint: None,
            optimization_interval: Duration::from_secs(300),
            agent_ttl: Duration::from_secs(600),
            span_queue_capacity: 8192,
            sampling_ratio: 1.0,
            host_prefix: None,
        }
    }
}

impl CoordConfig {
    /// Load configuration from the environment. Unparsable values fall
    /// back to the default for that field with a warning; an absent
    /// variable is not a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("COORD_DIR") {
            if !dir.is_empty() {
                config.coord_dir = PathBuf::from(dir);
            }
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            if !endpoint.is_empty() {
                config.otlp_endpoint = Some(endpoint.trim_end_matches('/').to_string());
            }
        }
        if let Some(secs) = parse_var::<u64>("OPTIMIZATION_INTERVAL") {
            config.optimization_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("AGENT_TTL") {
            config.agent_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize>("SPAN_QUEUE_CAPACITY") {
            config.span_queue_capacity = capacity.max(1);
        }
        if let Some(ratio) = parse_var::<f64>("SAMPLING_RATIO") {
            config.sampling_ratio = ratio.clamp(0.0, 1.0);
        }
        if let Ok(prefix) = env::var("HOST_PREFIX") {
            if !prefix.is_empty() {
                config.host_prefix = Some(prefix);
            }
        }

        config
    }

    /// Id generator honoring the configured host prefix.
    pub fn id_generator(&self) -> crate::id::IdGenerator {
        match &self.host_prefix {
            Some(prefix) => crate::id::IdGenerator::with_host_prefix(prefix.clone()),
            None => crate::id::IdGenerator::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}
