use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Origin (protected backend) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Base URL of the origin server requests are forwarded to
    pub url: String,
    /// Timeout for forwarded requests, in seconds
    pub forward_timeout_secs: u64,
    /// Timeout for the health probe, in seconds
    pub probe_timeout_secs: u64,
}

/// Reputation ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Path of the durable offense ledger
    pub path: String,
    /// Timeout for a single ledger write, in seconds
    pub write_timeout_secs: u64,
}

/// Per-source tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum number of sources tracked before least-recently-seen eviction
    pub max_sources: usize,
}

/// Mitigation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    /// Maximum number of attack signatures retained
    pub max_signatures: usize,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Origin configuration
    pub origin: OriginConfig,
    /// Reputation ledger configuration
    pub reputation: ReputationConfig,
    /// Per-source tracker configuration
    pub tracker: TrackerConfig,
    /// Mitigation configuration
    pub mitigation: MitigationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 4000,
            },
            origin: OriginConfig {
                url: "http://127.0.0.1:5000".to_string(),
                forward_timeout_secs: 2,
                probe_timeout_secs: 1,
            },
            reputation: ReputationConfig {
                path: "ip_memory.json".to_string(),
                write_timeout_secs: 1,
            },
            tracker: TrackerConfig {
                max_sources: 10_000,
            },
            mitigation: MitigationConfig {
                max_signatures: 1_000,
            },
        }
    }
}
