use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a quote came from and whether it can be trusted for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Fetched live from the provider.
    Ok,
    /// Provider was unreachable; value substituted from the last recorded one.
    Degraded,
    /// Provider failed and no substitute was available.
    Error,
    /// Admin-set house rate.
    Override,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Ok => "ok",
            QuoteStatus::Degraded => "degraded",
            QuoteStatus::Error => "error",
            QuoteStatus::Override => "override",
        }
    }

    /// Usable in best-rate selection. Errored quotes only carry the provider
    /// name and a timestamp.
    pub fn is_usable(&self) -> bool {
        !matches!(self, QuoteStatus::Error)
    }
}

/// A single CNY→THB TT quote from one provider. Immutable once produced;
/// a newer quote for the same provider supersedes, never mutates, this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub provider: String,
    pub buying: Option<f64>,
    pub selling: Option<f64>,
    pub status: QuoteStatus,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn errored(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            buying: None,
            selling: None,
            status: QuoteStatus::Error,
            observed_at: Utc::now(),
        }
    }

    pub fn value(&self, field: RateField) -> Option<f64> {
        match field {
            RateField::Buying => self.buying,
            RateField::Selling => self.selling,
        }
    }
}

/// Which side of the quote a selection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateField {
    /// Rate at which the house buys CNY from the customer (pays THB out).
    Buying,
    /// Rate at which the house sells CNY to the customer.
    Selling,
}

/// The admin-set house rate, snapped to the 0.05 grid. Single row,
/// replaced wholesale on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomRate {
    pub provider: String,
    pub buying: f64,
    pub selling: f64,
    pub set_at: DateTime<Utc>,
}

impl CustomRate {
    /// View of the house rate as a quote, so it can join selection and
    /// display alongside market quotes.
    pub fn to_quote(&self) -> Quote {
        Quote {
            provider: self.provider.clone(),
            buying: Some(self.buying),
            selling: Some(self.selling),
            status: QuoteStatus::Override,
            observed_at: self.set_at,
        }
    }
}

/// Lifecycle of a queue ticket. Admin actions drive
/// waiting → processing → completed; a waiting entry may also be deleted
/// on voluntary withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Processing,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(QueueStatus::Waiting),
            "processing" => Some(QueueStatus::Processing),
            "completed" => Some(QueueStatus::Completed),
            _ => None,
        }
    }
}

/// A FIFO service ticket. Ordering key is (created_at, id); ids are
/// assigned monotonically by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub user_id: String,
    pub display_name: String,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Result of a join attempt. `already_queued` means the user had a live
/// entry and no new ticket was created.
#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub already_queued: bool,
    pub entry_id: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Above,
    Below,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "above" => Some(AlertCondition::Above),
            "below" => Some(AlertCondition::Below),
            _ => None,
        }
    }

    /// Whether `current` satisfies this condition against `target`.
    pub fn is_met(&self, current: f64, target: f64) -> bool {
        match self {
            AlertCondition::Above => current >= target,
            AlertCondition::Below => current <= target,
        }
    }
}

/// A one-shot price alert. At most one active row per user; once triggered
/// it is deactivated permanently and only a new subscription can replace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSubscription {
    pub id: i64,
    pub user_id: String,
    pub display_name: String,
    pub target_rate: f64,
    pub condition: AlertCondition,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Result of a subscribe call. `created = false` means an existing active
/// subscription had its parameters replaced in place.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeOutcome {
    pub created: bool,
    pub subscription: AlertSubscription,
}

/// An alert that fired during one evaluation cycle. Produced in the same
/// transaction that deactivated its subscription.
#[derive(Debug, Clone, Serialize)]
pub struct FiredAlert {
    pub alert_id: i64,
    pub user_id: String,
    pub display_name: String,
    pub target_rate: f64,
    pub condition: AlertCondition,
    pub current_rate: f64,
    pub provider: String,
    pub triggered_at: DateTime<Utc>,
}

/// The most recently fetched quote set, swapped wholesale on every
/// successful refresh.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    pub quotes: Vec<Quote>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Intent to notify a user. Transport is a collaborator concern; the core
/// only produces the intent and never learns whether delivery succeeded.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationIntent {
    AlertFired {
        target_rate: f64,
        current_rate: f64,
        provider: String,
    },
    QueueTurn,
    QueueCompleted,
}

/// Coarse classification of a buying rate for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOutlook {
    High,
    Normal,
    Low,
}

impl RateOutlook {
    pub fn classify(buying: f64) -> Self {
        if buying >= 4.55 {
            RateOutlook::High
        } else if buying >= 4.45 {
            RateOutlook::Normal
        } else {
            RateOutlook::Low
        }
    }
}

/// One quoted leg of a conversion summary.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionLeg {
    pub provider: String,
    pub rate: f64,
    pub amount_thb: f64,
}

/// Structured result of compute-conversion: the preferred quote (house rate
/// when set, market best otherwise), the market best for comparison, and
/// the shortfall between them when the preferred rate pays less.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    pub amount_cny: f64,
    pub preferred: ConversionLeg,
    pub market_best: Option<ConversionLeg>,
    pub shortfall_thb: Option<f64>,
    pub outlook: RateOutlook,
}
