use once_cell::sync::Lazy;

#[derive(Debug)]
pub struct Config {
    /// Hex-dump every outbound/inbound frame at debug level.
    pub log_s7_payloads: bool,
    /// Dump the offending payload when a receive or parse step fails.
    pub s7_dump_on_error: bool,
    /// Default per-step timeout (ms) used when the caller does not set one.
    pub s7_step_timeout_ms: u64,
}

impl Config {
    fn from_env() -> Self {
        let log_s7_payloads = std::env::var("S7_LOG_PAYLOADS")
            .map(|v| v == "1")
            .unwrap_or(false);
        let s7_dump_on_error = std::env::var("S7_DUMP_ON_ERROR")
            .map(|v| v == "1")
            .unwrap_or(false);
        let s7_step_timeout_ms = std::env::var("S7_STEP_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2000u64);
        Self {
            log_s7_payloads,
            s7_dump_on_error,
            s7_step_timeout_ms,
        }
    }
}

/// Global config loaded once from environment at first access.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Convenience accessor
pub fn config() -> &'static Config {
    &GLOBAL_CONFIG
}
