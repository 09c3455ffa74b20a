//! File-backed metrics provider.
//!
//! The file is a JSON object keyed by category, re-read on every fetch so
//! an external collector can rewrite it between polls:
//!
//! ```json
//! {
//!   "performance": { "errorRate": 0.01, "p99LatencyMs": 180.0 },
//!   "system": { "memoryUsage": 0.72, "cpuUsage": 0.35 },
//!   "business": {},
//!   "model": { "driftScore": 0.02 }
//! }
//! ```
//!
//! Missing categories read as empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use beacon_alerts::{AlertError, MetricCategory, MetricsProvider, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

/// Reads metric values from a JSON file.
#[derive(Debug, Clone)]
pub struct FileMetricsProvider {
    path: PathBuf,
}

impl FileMetricsProvider {
    /// Creates a provider over `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self, category: MetricCategory) -> Result<HashMap<String, f64>> {
        let fail = |reason: String| AlertError::MetricsFetch {
            category: category.to_string(),
            reason,
        };

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| fail(format!("cannot read '{}': {e}", self.path.display())))?;
        let mut file: HashMap<MetricCategory, HashMap<String, f64>> =
            serde_json::from_str(&raw).map_err(|e| fail(format!("invalid metrics file: {e}")))?;

        let values = file.remove(&category).unwrap_or_default();
        debug!(category = %category, metrics = values.len(), "read metrics file");
        Ok(values)
    }
}

impl MetricsProvider for FileMetricsProvider {
    fn fetch(&self, category: MetricCategory) -> BoxFuture<'_, Result<HashMap<String, f64>>> {
        self.read(category).boxed()
    }
}
