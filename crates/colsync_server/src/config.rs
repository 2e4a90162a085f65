//! Server configuration.

use colsync_protocol::{Timestamp, STORAGE_VERSION};

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum records accepted in one POST.
    pub max_records_per_post: usize,
    /// Maximum payload size of a single record, in bytes.
    pub max_payload_bytes: usize,
    /// Maximum records returned by one GET.
    pub max_page_size: usize,
    /// Storage version advertised in `meta/global`.
    pub storage_version: u32,
    /// Account sync id advertised in `meta/global`.
    pub sync_id: String,
    /// Engines enabled in `meta/global`, with their versions.
    pub engines: Vec<(String, u32)>,
    /// Initial value of the server clock.
    pub start_time: Timestamp,
    /// Amount the clock advances on every write.
    pub clock_step: Timestamp,
}

impl ServerConfig {
    /// Creates a configuration with default limits and no engines.
    pub fn new() -> Self {
        Self {
            max_records_per_post: 100,
            max_payload_bytes: 256 * 1024,
            max_page_size: 1000,
            storage_version: STORAGE_VERSION,
            sync_id: "colsync".into(),
            engines: Vec::new(),
            start_time: 1_000_000,
            clock_step: 10,
        }
    }

    /// Sets the maximum records per POST.
    pub fn with_max_records_per_post(mut self, max: usize) -> Self {
        self.max_records_per_post = max;
        self
    }

    /// Sets the maximum record payload size.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Sets the maximum GET page size.
    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max.max(1);
        self
    }

    /// Sets the advertised storage version.
    pub fn with_storage_version(mut self, version: u32) -> Self {
        self.storage_version = version;
        self
    }

    /// Enables an engine.
    pub fn with_engine(mut self, collection: impl Into<String>, version: u32) -> Self {
        self.engines.push((collection.into(), version));
        self
    }

    /// Sets the clock start and step.
    pub fn with_clock(mut self, start_time: Timestamp, step: Timestamp) -> Self {
        self.start_time = start_time;
        self.clock_step = step.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
            .with_engine("history", 1)
            .with_engine("passwords", 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_records_per_post, 100);
        assert_eq!(config.storage_version, STORAGE_VERSION);
        assert_eq!(config.engines.len(), 2);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_records_per_post(10)
            .with_max_payload_bytes(64)
            .with_engine("history", 2)
            .with_clock(5, 0);

        assert_eq!(config.max_records_per_post, 10);
        assert_eq!(config.max_payload_bytes, 64);
        assert_eq!(config.engines, vec![("history".to_string(), 2)]);
        assert_eq!(config.start_time, 5);
        assert_eq!(config.clock_step, 1);
    }
}
