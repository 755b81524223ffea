//! Transfer settings, decided once per worker and threaded into the
//! constructors rather than read from the environment at import time.

/// Process-scoped transfer configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Offer zero-copy IPC when the transfer endpoints share a host.
    /// When false every transfer ships a host-staged copy.
    pub use_ipc: bool,
    /// Host address peers should connect to, published in transfer headers.
    pub advertise_host: String,
    /// Local address the transfer channel listens on. Kept separate from
    /// `advertise_host` so a worker behind NAT can publish a different name.
    pub bind_host: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            use_ipc: false,
            advertise_host: "127.0.0.1".to_string(),
            bind_host: "0.0.0.0".to_string(),
        }
    }
}

impl TransferConfig {
    /// Build a configuration from `CUDEX_*` environment variables, falling
    /// back to defaults for anything unset.
    ///
    /// Recognized variables:
    /// - `CUDEX_USE_IPC`: "1" or "true" enables the IPC path
    /// - `CUDEX_ADVERTISE_HOST`: host published in transfer headers
    /// - `CUDEX_BIND_HOST`: local listen address for the channel
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("CUDEX_USE_IPC") {
            config.use_ipc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CUDEX_ADVERTISE_HOST") {
            if !v.is_empty() {
                config.advertise_host = v;
            }
        }
        if let Ok(v) = std::env::var("CUDEX_BIND_HOST") {
            if !v.is_empty() {
                config.bind_host = v;
            }
        }
        config
    }
}
