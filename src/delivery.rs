//! Outbound notification boundary.
//!
//! The core produces the intent to notify; transport belongs to a
//! collaborator. A delivery failure never rolls back the state transition
//! that produced the intent.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::models::NotificationIntent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, intent: NotificationIntent) -> Result<()>;
}

/// Logs intents instead of pushing them anywhere. Stands in for the real
/// messaging transport.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, intent: NotificationIntent) -> Result<()> {
        match &intent {
            NotificationIntent::AlertFired {
                target_rate,
                current_rate,
                provider,
            } => info!(
                "📨 notify {}: alert fired, target {:.4}, current {:.4} ({})",
                user_id, target_rate, current_rate, provider
            ),
            NotificationIntent::QueueTurn => {
                info!("📨 notify {}: it is your turn", user_id)
            }
            NotificationIntent::QueueCompleted => {
                info!("📨 notify {}: your request is completed", user_id)
            }
        }
        Ok(())
    }
}
