//! In-memory alert registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{AlertError, Result};
use crate::types::Alert;

/// Holds every alert up to a retention limit.
///
/// Alerts are never deleted explicitly. When the store grows past
/// `max_history`, the oldest resolved alerts are dropped first; active
/// alerts are always kept.
#[derive(Debug)]
pub struct AlertStore {
    alerts: RwLock<HashMap<String, Alert>>,
    max_history: usize,
}

impl AlertStore {
    /// Creates a store retaining up to `max_history` alerts.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// Stores a new alert.
    pub fn insert(&self, alert: Alert) {
        let mut alerts = self.alerts.write();
        alerts.insert(alert.id.clone(), alert);
        Self::enforce_limit(&mut alerts, self.max_history);
    }

    /// Resolves an alert.
    ///
    /// Returns the resolved alert if this call resolved it, or `None` if it
    /// was already resolved.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::AlertNotFound` if the alert is not retained.
    pub fn resolve(&self, id: &str, resolved_by: &str, at: DateTime<Utc>) -> Result<Option<Alert>> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .get_mut(id)
            .ok_or_else(|| AlertError::AlertNotFound { id: id.to_string() })?;
        Ok(alert.resolve(resolved_by, at).then(|| alert.clone()))
    }

    /// Gets an alert by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Alert> {
        self.alerts.read().get(id).cloned()
    }

    /// Returns true if the alert exists and is unresolved.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.alerts.read().get(id).is_some_and(Alert::is_active)
    }

    /// Unresolved alerts, newest first.
    #[must_use]
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect();
        sort_newest_first(&mut active);
        active
    }

    /// All alerts, newest first, at most `limit`.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let mut all: Vec<Alert> = self.alerts.read().values().cloned().collect();
        sort_newest_first(&mut all);
        all.truncate(limit);
        all
    }

    /// Number of stored alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// Returns true if no alerts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    fn enforce_limit(alerts: &mut HashMap<String, Alert>, max: usize) {
        if alerts.len() <= max {
            return;
        }

        let mut resolved: Vec<(String, Option<DateTime<Utc>>)> = alerts
            .values()
            .filter(|a| a.resolved)
            .map(|a| (a.id.clone(), a.resolved_at))
            .collect();
        resolved.sort_by_key(|(_, t)| *t);

        let excess = alerts.len() - max;
        for (id, _) in resolved.into_iter().take(excess) {
            alerts.remove(&id);
        }
        debug!(retained = alerts.len(), "pruned alert history");
    }
}

fn sort_newest_first(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::types::{AlertRule, Condition};
    use chrono::Duration;

    fn alert_at(at: DateTime<Utc>) -> Alert {
        let rule = AlertRule::builder("r", Condition::predicate(|_| Ok(true)))
            .build()
            .unwrap();
        Alert::from_rule(&rule, &MetricsSnapshot::new(), at)
    }

    #[test]
    fn resolve_is_idempotent() {
        let store = AlertStore::new(10);
        let alert = alert_at(Utc::now());
        let id = alert.id.clone();
        store.insert(alert);

        let first = store.resolve(&id, "oncall", Utc::now()).unwrap();
        assert_eq!(first.unwrap().resolved_by.as_deref(), Some("oncall"));
        assert!(store.resolve(&id, "other", Utc::now()).unwrap().is_none());
        assert!(matches!(
            store.resolve("missing", "x", Utc::now()),
            Err(AlertError::AlertNotFound { .. })
        ));
        assert_eq!(store.get(&id).unwrap().resolved_by.as_deref(), Some("oncall"));
    }

    #[test]
    fn active_excludes_resolved() {
        let store = AlertStore::new(10);
        let t0 = Utc::now();
        let a = alert_at(t0);
        let b = alert_at(t0 + Duration::minutes(1));
        let a_id = a.id.clone();
        store.insert(a);
        store.insert(b);

        store.resolve(&a_id, "x", t0).unwrap();
        let active = store.active();
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, a_id);
        assert!(!store.is_active(&a_id));
    }

    #[test]
    fn history_newest_first_and_limited() {
        let store = AlertStore::new(10);
        let t0 = Utc::now();
        for i in 0..5 {
            store.insert(alert_at(t0 + Duration::minutes(i)));
        }

        let history = store.history(3);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].created_at, t0 + Duration::minutes(4));
        assert_eq!(history[2].created_at, t0 + Duration::minutes(2));
        assert!(store.history(0).is_empty());
    }

    #[test]
    fn limit_drops_oldest_resolved_only() {
        let store = AlertStore::new(2);
        let t0 = Utc::now();
        let old = alert_at(t0);
        let old_id = old.id.clone();
        store.insert(old);
        store.resolve(&old_id, "x", t0).unwrap();

        store.insert(alert_at(t0 + Duration::minutes(1)));
        store.insert(alert_at(t0 + Duration::minutes(2)));
        assert_eq!(store.len(), 2);
        assert!(store.get(&old_id).is_none());

        // Nothing resolved left to drop: active alerts are kept over the limit.
        store.insert(alert_at(t0 + Duration::minutes(3)));
        assert_eq!(store.len(), 3);
    }
}
