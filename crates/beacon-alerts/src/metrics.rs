//! Metrics snapshots and the provider interface.
//!
//! The engine pulls four independent categories of flat numeric metrics and
//! merges them into one [`MetricsSnapshot`] so every rule in a cycle sees the
//! same instant. Providers may also push single [`MetricUpdate`]s.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{AlertError, Result};

/// The four metric categories a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    /// Latency, throughput, error rates.
    Performance,
    /// CPU, memory, disk.
    System,
    /// Signups, revenue, conversion.
    Business,
    /// Model accuracy and drift scores.
    Model,
}

impl MetricCategory {
    /// All categories in merge order. Later categories win on key collisions.
    pub const ALL: [Self; 4] = [Self::Performance, Self::System, Self::Business, Self::Model];

    /// Returns the category as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::System => "system",
            Self::Business => "business",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A flat, merged view of metric values at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsSnapshot {
    values: HashMap<String, f64>,
}

impl MetricsSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from `(name, value)` pairs.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the value of a metric.
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    /// Sets a metric value.
    pub fn insert(&mut self, metric: impl Into<String>, value: f64) {
        self.values.insert(metric.into(), value);
    }

    /// Overlays `other` onto this snapshot.
    pub fn merge(&mut self, other: HashMap<String, f64>) {
        self.values.extend(other);
    }

    /// Returns the number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the snapshot has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A single pushed metric change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    /// Metric name.
    pub metric: String,
    /// New value.
    pub value: f64,
    /// Category, if the publisher knows it.
    pub category: Option<MetricCategory>,
    /// When the value was observed.
    pub timestamp: DateTime<Utc>,
}

impl MetricUpdate {
    /// Creates an update observed now.
    #[must_use]
    pub fn new(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            category: None,
            timestamp: Utc::now(),
        }
    }
}

/// Supplies metric values to the engine.
pub trait MetricsProvider: Send + Sync {
    /// Fetches the current values for one category.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::MetricsFetch` if the category cannot be read.
    fn fetch(&self, category: MetricCategory) -> BoxFuture<'_, Result<HashMap<String, f64>>>;

    /// Subscribes to pushed metric updates, if the provider supports them.
    fn subscribe(&self) -> Option<broadcast::Receiver<MetricUpdate>> {
        None
    }
}

/// Fetches all four categories concurrently and merges them.
///
/// # Errors
///
/// Returns the first category error; no partial snapshot is produced. A
/// provider that panics counts as a failed fetch of that category.
pub async fn fetch_snapshot(provider: &dyn MetricsProvider) -> Result<MetricsSnapshot> {
    let (performance, system, business, model) = tokio::try_join!(
        fetch_isolated(provider, MetricCategory::Performance),
        fetch_isolated(provider, MetricCategory::System),
        fetch_isolated(provider, MetricCategory::Business),
        fetch_isolated(provider, MetricCategory::Model),
    )?;

    let mut snapshot = MetricsSnapshot::new();
    for values in [performance, system, business, model] {
        snapshot.merge(values);
    }
    Ok(snapshot)
}

async fn fetch_isolated(
    provider: &dyn MetricsProvider,
    category: MetricCategory,
) -> Result<HashMap<String, f64>> {
    AssertUnwindSafe(async { provider.fetch(category).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(AlertError::MetricsFetch {
                category: category.to_string(),
                reason: "provider panicked".to_string(),
            })
        })
}

/// In-memory metrics provider.
///
/// Values are set directly; categories can be told to fail, and updates can
/// be published to subscribers.
#[derive(Debug)]
pub struct StaticMetricsProvider {
    values: RwLock<HashMap<MetricCategory, HashMap<String, f64>>>,
    failing: RwLock<HashSet<MetricCategory>>,
    updates: broadcast::Sender<MetricUpdate>,
}

impl StaticMetricsProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            values: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            updates,
        }
    }

    /// Replaces all values of a category.
    pub fn set(&self, category: MetricCategory, values: HashMap<String, f64>) {
        self.values.write().insert(category, values);
    }

    /// Sets a single metric in a category.
    pub fn set_metric(&self, category: MetricCategory, metric: impl Into<String>, value: f64) {
        self.values
            .write()
            .entry(category)
            .or_default()
            .insert(metric.into(), value);
    }

    /// Makes fetches of `category` fail (or succeed again).
    pub fn set_failing(&self, category: MetricCategory, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(category);
        } else {
            set.remove(&category);
        }
    }

    /// Publishes an update to subscribers. Returns the number of receivers.
    pub fn publish(&self, update: MetricUpdate) -> usize {
        self.updates.send(update).unwrap_or(0)
    }
}

impl Default for StaticMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for StaticMetricsProvider {
    fn fetch(&self, category: MetricCategory) -> BoxFuture<'_, Result<HashMap<String, f64>>> {
        let result = if self.failing.read().contains(&category) {
            Err(AlertError::MetricsFetch {
                category: category.to_string(),
                reason: "provider unavailable".to_string(),
            })
        } else {
            Ok(self.values.read().get(&category).cloned().unwrap_or_default())
        };
        Box::pin(futures::future::ready(result))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<MetricUpdate>> {
        Some(self.updates.subscribe())
    }
}
