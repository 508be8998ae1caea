use serde::{Deserialize, Serialize};

/// Runtime configuration for the egress adapter.
///
/// Loaded from `config.yaml` plus `APP_`-prefixed environment overrides, the
/// same two-source pattern used across this family of servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP listen address, e.g. "0.0.0.0:8080"
    pub listen_http: String,

    /// Public base URL used when templating the index page
    pub public_url: String,

    /// Maximum number of segments kept in a client's sliding window
    pub hls_segment_count: usize,

    /// Target segment duration in seconds
    pub hls_segment_duration_secs: u64,

    /// Seconds of no HTTP activity before a client is torn down
    #[serde(default = "default_close_after_inactivity")]
    pub close_after_inactivity_secs: u64,

    /// How often the idle ticker checks `last_request_time`
    #[serde(default = "default_close_check_period")]
    pub close_check_period_secs: u64,

    /// Capacity of the ingestion ring, in RTP payload records
    #[serde(default = "default_read_buffer_count")]
    pub read_buffer_count: usize,

    /// Minimum AAC access units per segment before an audio-only cut is allowed
    #[serde(default = "default_segment_min_au_count")]
    pub segment_min_au_count: usize,

    /// Exact IPs or CIDR ranges allowed to connect; empty means "allow all"
    #[serde(default)]
    pub allow_ips: Vec<String>,

    /// HTTP Basic auth credentials, if required
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub user: String,
    pub pass: String,
}

fn default_close_after_inactivity() -> u64 {
    60
}

fn default_close_check_period() -> u64 {
    1
}

fn default_read_buffer_count() -> usize {
    256
}

fn default_segment_min_au_count() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_http: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            hls_segment_count: 7,
            hls_segment_duration_secs: 1,
            close_after_inactivity_secs: default_close_after_inactivity(),
            close_check_period_secs: default_close_check_period(),
            read_buffer_count: default_read_buffer_count(),
            segment_min_au_count: default_segment_min_au_count(),
            allow_ips: vec![],
            basic_auth: None,
        }
    }
}
