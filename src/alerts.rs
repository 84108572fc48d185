//! One-shot price alerts.
//!
//! Each user holds at most one active subscription; subscribing again
//! replaces its parameters in place. Evaluation deactivates a firing
//! subscription in the same transaction that reports it, so an alert is
//! delivered at most once even when evaluation cycles overlap.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use crate::db::{from_micros, Database};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{AlertCondition, AlertSubscription, FiredAlert, SubscribeOutcome};

pub struct AlertManager {
    db: Database,
}

impl AlertManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a subscription, or replace the parameters of the user's
    /// active one. Either way exactly one active row remains for the user.
    pub fn subscribe(
        &self,
        user_id: &str,
        display_name: &str,
        target_rate: f64,
        condition: AlertCondition,
    ) -> ServiceResult<SubscribeOutcome> {
        if !target_rate.is_finite() || target_rate <= 0.0 {
            return Err(ServiceError::InvalidInput(
                "target rate must be a positive number".to_string(),
            ));
        }

        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now().timestamp_micros();
        let updated = tx.execute(
            "UPDATE alerts
             SET target_rate = ?2, condition = ?3, created_at = ?4
             WHERE user_id = ?1 AND active = 1",
            params![user_id, target_rate, condition.as_str(), now],
        )?;

        let created = updated == 0;
        if created {
            tx.execute(
                "INSERT INTO alerts (user_id, display_name, target_rate, condition, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![user_id, display_name, target_rate, condition.as_str(), now],
            )?;
        }

        let subscription = tx.query_row(
            "SELECT alert_id, user_id, display_name, target_rate, condition, active,
                    created_at, triggered_at
             FROM alerts WHERE user_id = ?1 AND active = 1",
            params![user_id],
            map_subscription,
        )?;
        tx.commit()?;

        info!(
            "🔔 Alert {} for {}: {} {:.4}",
            if created { "created" } else { "replaced" },
            display_name,
            condition.as_str(),
            target_rate
        );

        Ok(SubscribeOutcome {
            created,
            subscription,
        })
    }

    /// Deactivate the user's active subscription. Returns whether one
    /// existed.
    pub fn unsubscribe(&self, user_id: &str) -> ServiceResult<bool> {
        let conn = self.db.conn();
        let changes = conn.execute(
            "UPDATE alerts SET active = 0 WHERE user_id = ?1 AND active = 1",
            params![user_id],
        )?;

        Ok(changes > 0)
    }

    /// The user's active subscription, if any.
    pub fn active_subscription(&self, user_id: &str) -> ServiceResult<Option<AlertSubscription>> {
        let conn = self.db.conn();
        let subscription = conn
            .query_row(
                "SELECT alert_id, user_id, display_name, target_rate, condition, active,
                        created_at, triggered_at
                 FROM alerts WHERE user_id = ?1 AND active = 1",
                params![user_id],
                map_subscription,
            )
            .optional()?;

        Ok(subscription)
    }

    /// Compare the current best buying rate against every active
    /// subscription. A firing subscription is deactivated and stamped in
    /// the same transaction that adds it to the result, and only counts as
    /// fired if its own deactivation changed a row. Subscriptions that do
    /// not fire are left untouched for the next cycle.
    pub fn evaluate(
        &self,
        current_buying_rate: f64,
        provider: &str,
    ) -> ServiceResult<Vec<FiredAlert>> {
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let subscriptions = {
            let mut stmt = tx.prepare(
                "SELECT alert_id, user_id, display_name, target_rate, condition, active,
                        created_at, triggered_at
                 FROM alerts WHERE active = 1
                 ORDER BY alert_id ASC",
            )?;
            let rows = stmt
                .query_map([], map_subscription)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let now = Utc::now();
        let now_micros = now.timestamp_micros();
        let mut fired = Vec::new();

        for sub in subscriptions {
            if !sub.condition.is_met(current_buying_rate, sub.target_rate) {
                continue;
            }

            let changes = tx.execute(
                "UPDATE alerts SET active = 0, triggered_at = ?2
                 WHERE alert_id = ?1 AND active = 1",
                params![sub.id, now_micros],
            )?;
            if changes == 1 {
                fired.push(FiredAlert {
                    alert_id: sub.id,
                    user_id: sub.user_id,
                    display_name: sub.display_name,
                    target_rate: sub.target_rate,
                    condition: sub.condition,
                    current_rate: current_buying_rate,
                    provider: provider.to_string(),
                    triggered_at: now,
                });
            }
        }

        tx.commit()?;

        if !fired.is_empty() {
            info!(
                "🔔 {} alert(s) fired at {:.4} ({})",
                fired.len(),
                current_buying_rate,
                provider
            );
        }

        Ok(fired)
    }
}

fn map_subscription(row: &Row<'_>) -> rusqlite::Result<AlertSubscription> {
    let condition: String = row.get(4)?;
    let active: i64 = row.get(5)?;
    Ok(AlertSubscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        display_name: row.get(2)?,
        target_rate: row.get(3)?,
        condition: AlertCondition::from_str(&condition).unwrap_or(AlertCondition::Above),
        active: active != 0,
        created_at: from_micros(row.get(6)?),
        triggered_at: row.get::<_, Option<i64>>(7)?.map(from_micros),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_alerts() -> (AlertManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap()).unwrap();
        (AlertManager::new(db), temp_file)
    }

    #[test]
    fn test_subscribe_then_replace_keeps_one_active_row() {
        let (alerts, _temp) = create_test_alerts();

        let first = alerts
            .subscribe("U1", "Alice", 4.50, AlertCondition::Above)
            .unwrap();
        assert!(first.created);

        let second = alerts
            .subscribe("U1", "Alice", 4.60, AlertCondition::Below)
            .unwrap();
        assert!(!second.created);

        let active = alerts.active_subscription("U1").unwrap().unwrap();
        assert_eq!(active.id, first.subscription.id);
        assert_eq!(active.target_rate, 4.60);
        assert_eq!(active.condition, AlertCondition::Below);
    }

    #[test]
    fn test_unsubscribe() {
        let (alerts, _temp) = create_test_alerts();

        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();

        assert!(alerts.unsubscribe("U1").unwrap());
        assert!(alerts.active_subscription("U1").unwrap().is_none());

        // Nothing left to cancel
        assert!(!alerts.unsubscribe("U1").unwrap());
    }

    #[test]
    fn test_alert_fires_exactly_once() {
        let (alerts, _temp) = create_test_alerts();

        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();

        let first = alerts.evaluate(4.60, "mid-market").unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].user_id, "U1");
        assert_eq!(first[0].current_rate, 4.60);

        // The same condition holding on the next cycle must not re-fire
        let second = alerts.evaluate(4.60, "mid-market").unwrap();
        assert!(second.is_empty());

        assert!(alerts.active_subscription("U1").unwrap().is_none());
    }

    #[test]
    fn test_evaluate_conditions() {
        let (alerts, _temp) = create_test_alerts();

        alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();
        alerts
            .subscribe("U2", "Bob", 4.40, AlertCondition::Below)
            .unwrap();
        alerts
            .subscribe("U3", "Carol", 4.80, AlertCondition::Above)
            .unwrap();

        // 4.55 meets U1's threshold exactly; U2 and U3 stay armed
        let fired = alerts.evaluate(4.55, "mid-market").unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].user_id, "U1");

        assert!(alerts.active_subscription("U2").unwrap().is_some());
        assert!(alerts.active_subscription("U3").unwrap().is_some());

        // A drop to 4.40 fires the below-subscription
        let fired = alerts.evaluate(4.40, "mid-market").unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].user_id, "U2");
    }

    #[test]
    fn test_triggered_subscription_is_never_reactivated() {
        let (alerts, _temp) = create_test_alerts();

        let original = alerts
            .subscribe("U1", "Alice", 4.55, AlertCondition::Above)
            .unwrap();
        alerts.evaluate(4.60, "mid-market").unwrap();

        // Re-subscribing creates a fresh row; the fired one stays inert
        let renewed = alerts
            .subscribe("U1", "Alice", 4.70, AlertCondition::Above)
            .unwrap();
        assert!(renewed.created);
        assert_ne!(renewed.subscription.id, original.subscription.id);

        let fired = alerts.evaluate(4.75, "mid-market").unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].alert_id, renewed.subscription.id);
    }

    #[test]
    fn test_invalid_target_rejected() {
        let (alerts, _temp) = create_test_alerts();

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = alerts.subscribe("U1", "Alice", bad, AlertCondition::Above);
            assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
        }

        assert!(alerts.active_subscription("U1").unwrap().is_none());
    }
}
