//! Configuration for the synchronizers.

use colsync_protocol::STORAGE_VERSION;

/// Configuration shared by every synchronizer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Global storage format version this client understands.
    pub storage_version: u32,
    /// Maximum number of records sent in one POST.
    pub max_records_per_post: usize,
    /// Number of apply failures tolerated per batch before aborting.
    pub max_failures: usize,
    /// History engine settings.
    pub history: HistoryConfig,
    /// Logins engine settings.
    pub logins: LoginsConfig,
}

impl SyncConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            storage_version: STORAGE_VERSION,
            max_records_per_post: 100,
            max_failures: 3,
            history: HistoryConfig::default(),
            logins: LoginsConfig::default(),
        }
    }

    /// Sets the maximum number of records per POST.
    pub fn with_max_records_per_post(mut self, max: usize) -> Self {
        self.max_records_per_post = max.max(1);
        self
    }

    /// Sets the number of tolerated apply failures per batch.
    pub fn with_max_failures(mut self, max: usize) -> Self {
        self.max_failures = max;
        self
    }

    /// Sets the storage version.
    pub fn with_storage_version(mut self, version: u32) -> Self {
        self.storage_version = version;
        self
    }

    /// Sets the history configuration.
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Sets the logins configuration.
    pub fn with_logins(mut self, logins: LoginsConfig) -> Self {
        self.logins = logins;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the history synchronizer.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Engine record format version.
    pub engine_version: u32,
    /// Records requested per download page.
    pub download_batch_size: usize,
    /// Modified places built into records at a time before uploading.
    pub upload_chunk_size: usize,
    /// URL schemes that are synced. Everything else is ignored on apply.
    pub synced_schemes: Vec<String>,
}

impl HistoryConfig {
    /// Sets the download page size.
    pub fn with_download_batch_size(mut self, size: usize) -> Self {
        self.download_batch_size = size.max(1);
        self
    }

    /// Sets how many modified places are built per upload chunk.
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size.max(1);
        self
    }

    /// Replaces the synced scheme list.
    pub fn with_synced_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synced_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if records for this URL should be ignored.
    ///
    /// URLs without a scheme, or with an empty host part, are ignored too.
    pub fn is_ignored_url(&self, url: &str) -> bool {
        let Some((scheme, rest)) = url.split_once(':') else {
            return true;
        };
        if scheme.is_empty() || rest.is_empty() {
            return true;
        }
        if let Some(hier) = rest.strip_prefix("//") {
            let authority = hier.split(['/', '?', '#']).next().unwrap_or_default();
            if authority.is_empty() {
                return true;
            }
        }
        !self
            .synced_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            engine_version: 1,
            download_batch_size: 1000,
            upload_chunk_size: 1000,
            synced_schemes: vec!["http".into(), "https".into()],
        }
    }
}

/// Configuration for the logins synchronizer.
#[derive(Debug, Clone)]
pub struct LoginsConfig {
    /// Engine record format version.
    pub engine_version: u32,
}

impl LoginsConfig {
    /// Sets the engine version.
    pub fn with_engine_version(mut self, version: u32) -> Self {
        self.engine_version = version;
        self
    }
}

impl Default for LoginsConfig {
    fn default() -> Self {
        Self { engine_version: 1 }
    }
}
