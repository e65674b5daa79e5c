pub mod disk;
pub mod file;
pub mod memory;

use crate::core::TierStore;
use crate::core::config::AppConfig;
use disk::StructuredTier;
use file::FileTier;
use memory::VolatileTier;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The concrete tiers built from configuration.
///
/// A backend that cannot be opened is kept in the list in its unavailable
/// form so callers still see it in stats, but it never serves a hit.
pub struct TierSet {
    pub volatile: Arc<VolatileTier>,
    pub structured: Arc<StructuredTier>,
    pub file: Arc<FileTier>,
}

impl TierSet {
    pub fn from_config(config: &AppConfig) -> Self {
        let tiers = &config.tiers;

        let volatile = if tiers.volatile.enabled {
            VolatileTier::new(
                Duration::from_secs(tiers.volatile.ttl_secs),
                Duration::from_millis(tiers.volatile.timeout_ms),
                tiers.volatile.max_entries,
            )
        } else {
            VolatileTier::disabled()
        };

        let structured_ttl = Duration::from_secs(tiers.structured.ttl_secs);
        let structured_timeout = Duration::from_millis(tiers.structured.timeout_ms);
        let structured = if !tiers.structured.enabled {
            StructuredTier::unavailable("disabled by configuration", structured_ttl, structured_timeout)
        } else {
            match config.structured_path() {
                Ok(path) => StructuredTier::open(&path, structured_ttl, structured_timeout)
                    .unwrap_or_else(|e| {
                        warn!("Structured tier at {} unavailable: {}", path.display(), e);
                        StructuredTier::unavailable(e.to_string(), structured_ttl, structured_timeout)
                    }),
                Err(e) => {
                    warn!("Structured tier has no usable path: {}", e);
                    StructuredTier::unavailable(e.to_string(), structured_ttl, structured_timeout)
                }
            }
        };

        let file = if !tiers.file.enabled {
            FileTier::disabled()
        } else {
            match config.file_dir() {
                Ok(dir) => FileTier::new(
                    &dir,
                    Duration::from_secs(tiers.file.ttl_secs),
                    Duration::from_millis(tiers.file.timeout_ms),
                ),
                Err(e) => {
                    warn!("File tier has no usable directory: {}", e);
                    FileTier::disabled()
                }
            }
        };
        debug!(
            structured_available = structured.is_available(),
            "Built cache tiers"
        );

        Self {
            volatile: Arc::new(volatile),
            structured: Arc::new(structured),
            file: Arc::new(file),
        }
    }

    /// Tiers in rank order, fastest first.
    pub fn ordered(&self) -> Vec<Arc<dyn TierStore>> {
        vec![
            Arc::clone(&self.volatile) as Arc<dyn TierStore>,
            Arc::clone(&self.structured) as Arc<dyn TierStore>,
            Arc::clone(&self.file) as Arc<dyn TierStore>,
        ]
    }
}
