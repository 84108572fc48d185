//! Best-quote selection.
//!
//! Pure and deterministic: given the same quote set and field, the same
//! winner comes back every time.

use crate::models::{Quote, QuoteStatus, RateField};

/// Pick the best usable quote for `field`.
///
/// Buying rates favor the customer when higher (the house pays more THB per
/// CNY); selling rates favor the customer when lower. Quotes with an error
/// status or no value for the field never participate. On a tie the
/// admin override wins, otherwise the first quote encountered keeps its
/// place (stable).
pub fn select_best(quotes: &[Quote], field: RateField) -> Option<&Quote> {
    let mut best: Option<(&Quote, f64)> = None;

    for quote in quotes {
        if !quote.status.is_usable() {
            continue;
        }
        let Some(value) = quote.value(field) else {
            continue;
        };

        match best {
            None => best = Some((quote, value)),
            Some((current, current_value)) => {
                let better = match field {
                    RateField::Buying => value > current_value,
                    RateField::Selling => value < current_value,
                };
                let wins_tie = value == current_value
                    && quote.status == QuoteStatus::Override
                    && current.status != QuoteStatus::Override;

                if better || wins_tie {
                    best = Some((quote, value));
                }
            }
        }
    }

    best.map(|(quote, _)| quote)
}
