//! Periodic background tasks: quote refresh and alert evaluation.
//!
//! The two loops are independent. A slow or failing refresh never blocks
//! evaluation, which keeps working against the last successfully fetched
//! snapshot; a failed cycle is logged and dropped, and the next tick starts
//! clean. Quotes are re-fetched every cycle anyway, so there is no retry
//! queue to maintain.

use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

use crate::alerts::AlertManager;
use crate::db::Database;
use crate::delivery::Notifier;
use crate::models::{FiredAlert, NotificationIntent, Quote, QuoteStatus, RateField, RateSnapshot};
use crate::rates::selector;
use crate::rates::sources::{self, RateSource};

/// Latest quote set, shared between the loops and the request path.
/// Replaced wholesale on each successful refresh, never mutated in place.
pub type SharedSnapshot = Arc<ArcSwap<RateSnapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(ArcSwap::from_pointee(RateSnapshot::default()))
}

/// One refresh sweep: fetch all sources, substitute the last recorded value
/// for providers that failed (marked degraded), swap the shared snapshot,
/// then append the live observations to history. Returns the number of
/// usable quotes in the new snapshot.
pub async fn refresh_once(
    rate_sources: &[Arc<dyn RateSource>],
    db: &Database,
    snapshot: &SharedSnapshot,
) -> Result<usize> {
    let mut quotes = sources::fetch_all_quotes(rate_sources).await;

    for quote in &mut quotes {
        if quote.status != QuoteStatus::Error {
            continue;
        }
        match db.last_recorded_rate(&quote.provider) {
            Ok(Some(last)) => {
                info!(
                    "📉 {} unavailable, substituting last recorded rate",
                    quote.provider
                );
                *quote = Quote {
                    provider: last.provider,
                    buying: last.buying,
                    selling: last.selling,
                    status: QuoteStatus::Degraded,
                    observed_at: last.recorded_at,
                };
            }
            Ok(None) => {}
            Err(e) => warn!("⚠️  History lookup for {} failed: {:#}", quote.provider, e),
        }
    }

    let usable = quotes.iter().filter(|q| q.status.is_usable()).count();

    snapshot.store(Arc::new(RateSnapshot {
        quotes: quotes.clone(),
        fetched_at: Some(Utc::now()),
    }));

    db.save_rate_history(&quotes)?;

    Ok(usable)
}

/// One evaluation cycle: pick the best buying rate from the snapshot and
/// run it against all active subscriptions, handing fired alerts to the
/// delivery collaborator. No usable rate means a no-op cycle, not an error.
pub async fn evaluate_once(
    snapshot: &SharedSnapshot,
    alerts: &AlertManager,
    notifier: &dyn Notifier,
) -> Result<Vec<FiredAlert>> {
    let (rate, provider) = {
        let snap = snapshot.load();
        let Some(best) = selector::select_best(&snap.quotes, RateField::Buying) else {
            info!("No usable rate to evaluate alerts against");
            return Ok(Vec::new());
        };
        let Some(rate) = best.buying else {
            return Ok(Vec::new());
        };
        (rate, best.provider.clone())
    };

    let fired = alerts.evaluate(rate, &provider)?;

    for alert in &fired {
        let intent = NotificationIntent::AlertFired {
            target_rate: alert.target_rate,
            current_rate: alert.current_rate,
            provider: alert.provider.clone(),
        };
        // A fired alert stays fired even when delivery fails
        if let Err(e) = notifier.notify(&alert.user_id, intent).await {
            warn!("⚠️  Failed to notify {}: {:#}", alert.user_id, e);
        }
    }

    Ok(fired)
}

/// Periodic quote refresh. The first tick fires immediately so the service
/// has data as soon as a source answers.
pub async fn refresh_loop(
    rate_sources: Vec<Arc<dyn RateSource>>,
    db: Database,
    snapshot: SharedSnapshot,
    interval_secs: u64,
) {
    info!("🔄 Starting quote refresh loop ({}s interval)", interval_secs);
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        ticker.tick().await;
        match refresh_once(&rate_sources, &db, &snapshot).await {
            Ok(usable) => info!("💱 Quote refresh done: {} usable quote(s)", usable),
            Err(e) => warn!("⚠️  Quote refresh failed: {:#}", e),
        }
    }
}

/// Periodic alert evaluation.
pub async fn evaluate_loop(
    snapshot: SharedSnapshot,
    alerts: Arc<AlertManager>,
    notifier: Arc<dyn Notifier>,
    interval_secs: u64,
) {
    info!(
        "🔄 Starting alert evaluation loop ({}s interval)",
        interval_secs
    );
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        ticker.tick().await;
        match evaluate_once(&snapshot, &alerts, notifier.as_ref()).await {
            Ok(fired) if !fired.is_empty() => {
                info!("🔔 Evaluation cycle fired {} alert(s)", fired.len())
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️  Alert evaluation failed: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCondition;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::NamedTempFile;

    struct StaticSource {
        provider: &'static str,
        rate: f64,
    }

    #[async_trait]
    impl RateSource for StaticSource {
        fn provider(&self) -> &str {
            self.provider
        }

        async fn fetch(&self) -> Result<Quote> {
            Ok(Quote {
                provider: self.provider.to_string(),
                buying: Some(self.rate),
                selling: Some(self.rate),
                status: QuoteStatus::Ok,
                observed_at: Utc::now(),
            })
        }
    }

    struct FailingSource {
        provider: &'static str,
    }

    #[async_trait]
    impl RateSource for FailingSource {
        fn provider(&self) -> &str {
            self.provider
        }

        async fn fetch(&self) -> Result<Quote> {
            Err(anyhow!("connection refused"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, user_id: &str, _intent: NotificationIntent) -> Result<()> {
            self.sent.lock().push(user_id.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _user_id: &str, _intent: NotificationIntent) -> Result<()> {
            Err(anyhow!("transport down"))
        }
    }

    fn open_test_db() -> (Database, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap()).unwrap();
        (db, temp_file)
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot_and_records_history() {
        let (db, _temp) = open_test_db();
        let snapshot = new_shared_snapshot();
        let rate_sources: Vec<Arc<dyn RateSource>> = vec![Arc::new(StaticSource {
            provider: "mid-market",
            rate: 4.52,
        })];

        let usable = refresh_once(&rate_sources, &db, &snapshot).await.unwrap();
        assert_eq!(usable, 1);

        let snap = snapshot.load();
        assert_eq!(snap.quotes.len(), 1);
        assert_eq!(snap.quotes[0].buying, Some(4.52));
        assert!(snap.fetched_at.is_some());

        let last = db.last_recorded_rate("mid-market").unwrap().unwrap();
        assert_eq!(last.buying, Some(4.52));
    }

    #[tokio::test]
    async fn test_failed_source_degrades_to_last_recorded_rate() {
        let (db, _temp) = open_test_db();
        let snapshot = new_shared_snapshot();

        // First sweep succeeds and lands in history
        let good: Vec<Arc<dyn RateSource>> = vec![Arc::new(StaticSource {
            provider: "mid-market",
            rate: 4.52,
        })];
        refresh_once(&good, &db, &snapshot).await.unwrap();

        // Second sweep fails; the last recorded value carries it, degraded
        let bad: Vec<Arc<dyn RateSource>> = vec![Arc::new(FailingSource {
            provider: "mid-market",
        })];
        let usable = refresh_once(&bad, &db, &snapshot).await.unwrap();
        assert_eq!(usable, 1);

        let snap = snapshot.load();
        assert_eq!(snap.quotes[0].status, QuoteStatus::Degraded);
        assert_eq!(snap.quotes[0].buying, Some(4.52));
    }

    #[tokio::test]
    async fn test_failed_source_without_history_stays_errored() {
        let (db, _temp) = open_test_db();
        let snapshot = new_shared_snapshot();

        let bad: Vec<Arc<dyn RateSource>> = vec![Arc::new(FailingSource {
            provider: "mid-market",
        })];
        let usable = refresh_once(&bad, &db, &snapshot).await.unwrap();
        assert_eq!(usable, 0);

        let snap = snapshot.load();
        assert_eq!(snap.quotes[0].status, QuoteStatus::Error);
    }

    #[tokio::test]
    async fn test_evaluate_fires_and_notifies() {
        let (db, _temp) = open_test_db();
        let alerts = AlertManager::new(db.clone());
        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();

        let snapshot = new_shared_snapshot();
        snapshot.store(Arc::new(RateSnapshot {
            quotes: vec![Quote {
                provider: "mid-market".to_string(),
                buying: Some(4.60),
                selling: Some(4.60),
                status: QuoteStatus::Ok,
                observed_at: Utc::now(),
            }],
            fetched_at: Some(Utc::now()),
        }));

        let notifier = RecordingNotifier::default();
        let fired = evaluate_once(&snapshot, &alerts, &notifier).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(notifier.sent.lock().as_slice(), ["U1"]);

        // Second cycle with the same snapshot delivers nothing new
        let fired = evaluate_once(&snapshot, &alerts, &notifier).await.unwrap();
        assert!(fired.is_empty());
        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_with_empty_snapshot_is_noop() {
        let (db, _temp) = open_test_db();
        let alerts = AlertManager::new(db.clone());
        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();

        let snapshot = new_shared_snapshot();
        let notifier = RecordingNotifier::default();

        let fired = evaluate_once(&snapshot, &alerts, &notifier).await.unwrap();
        assert!(fired.is_empty());

        // Subscription is still armed for the next cycle
        assert!(alerts.active_subscription("U1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_rearm_alert() {
        let (db, _temp) = open_test_db();
        let alerts = AlertManager::new(db.clone());
        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();

        let snapshot = new_shared_snapshot();
        snapshot.store(Arc::new(RateSnapshot {
            quotes: vec![Quote {
                provider: "mid-market".to_string(),
                buying: Some(4.60),
                selling: Some(4.60),
                status: QuoteStatus::Ok,
                observed_at: Utc::now(),
            }],
            fetched_at: Some(Utc::now()),
        }));

        let fired = evaluate_once(&snapshot, &alerts, &FailingNotifier)
            .await
            .unwrap();
        assert_eq!(fired.len(), 1);

        // The alert fired despite the failed delivery and stays fired
        assert!(alerts.active_subscription("U1").unwrap().is_none());
        let fired = evaluate_once(&snapshot, &alerts, &FailingNotifier)
            .await
            .unwrap();
        assert!(fired.is_empty());
    }
}
