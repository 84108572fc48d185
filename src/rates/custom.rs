//! Admin-set house rate, snapped to the 0.05 grid.
//!
//! One record, replaced wholesale on every write. Reads never fabricate a
//! default: until an admin sets a rate there simply is none.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use crate::db::{from_micros, Database};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{CustomRate, Quote, QuoteStatus};

/// Fixed rounding increment for displayed/override rates.
pub const GRID_UNIT: f64 = 0.05;

/// Snap a rate to the nearest grid multiple, expressed at two decimals.
/// 4.512 → 4.50, 4.537 → 4.55, 4.563 → 4.55.
pub fn round_to_grid(value: f64) -> f64 {
    let snapped = (value / GRID_UNIT).round() * GRID_UNIT;
    (snapped * 100.0).round() / 100.0
}

pub struct CustomRateStore {
    db: Database,
    provider: String,
    default_spread: f64,
}

impl CustomRateStore {
    pub fn new(db: Database, provider: &str, default_spread: f64) -> Self {
        Self {
            db,
            provider: provider.to_string(),
            default_spread,
        }
    }

    /// Set the house rate. `buying` is snapped to the grid; `selling`
    /// defaults to the snapped buying plus the configured spread, or is
    /// snapped independently when given.
    pub fn set_override(&self, buying: f64, selling: Option<f64>) -> ServiceResult<CustomRate> {
        if !buying.is_finite() || buying <= 0.0 {
            return Err(ServiceError::InvalidInput(
                "buying rate must be a positive number".to_string(),
            ));
        }
        if let Some(s) = selling {
            if !s.is_finite() || s <= 0.0 {
                return Err(ServiceError::InvalidInput(
                    "selling rate must be a positive number".to_string(),
                ));
            }
        }

        let buying_rounded = round_to_grid(buying);
        let selling_rounded = match selling {
            Some(s) => round_to_grid(s),
            None => ((buying_rounded + self.default_spread) * 100.0).round() / 100.0,
        };

        let record = CustomRate {
            provider: self.provider.clone(),
            buying: buying_rounded,
            selling: selling_rounded,
            set_at: Utc::now(),
        };

        let conn = self.db.conn();
        conn.execute(
            "INSERT OR REPLACE INTO custom_rate (id, provider, buying, selling, set_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                record.provider,
                record.buying,
                record.selling,
                record.set_at.timestamp_micros(),
            ],
        )?;

        info!(
            "⭐ House rate set: buying {:.2} / selling {:.2}",
            record.buying, record.selling
        );

        Ok(record)
    }

    /// Current house rate, or `None` if never set.
    pub fn get_override(&self) -> ServiceResult<Option<CustomRate>> {
        let conn = self.db.conn();
        let record = conn
            .query_row(
                "SELECT provider, buying, selling, set_at FROM custom_rate WHERE id = 1",
                [],
                |row| {
                    Ok(CustomRate {
                        provider: row.get(0)?,
                        buying: row.get(1)?,
                        selling: row.get(2)?,
                        set_at: from_micros(row.get(3)?),
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    /// Derive the house rate from a reference quote. Returns `None` when the
    /// reference is unusable (errored, overridden, or without a positive
    /// buying value); otherwise snaps its buying value to the grid and
    /// applies the default spread.
    pub fn derive_from_reference(&self, reference: &Quote) -> ServiceResult<Option<CustomRate>> {
        let usable_status = matches!(reference.status, QuoteStatus::Ok | QuoteStatus::Degraded);
        let buying = reference.buying.unwrap_or(0.0);

        if !usable_status || buying <= 0.0 {
            warn!(
                provider = %reference.provider,
                status = reference.status.as_str(),
                "Reference quote unusable for house rate derivation"
            );
            return Ok(None);
        }

        self.set_override(buying, None).map(Some)
    }
}
