//! Quote handling: selection, the admin house rate, external sources, and
//! the public display/conversion views built on top of them.

pub mod custom;
pub mod selector;
pub mod sources;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    ConversionLeg, ConversionSummary, CustomRate, Quote, RateField, RateOutlook,
};

/// The quote set surfaced to end users: the house rate first when set, then
/// allowlisted market quotes ordered by buying rate, best first. Which
/// providers are public is configuration, not logic.
pub fn public_quotes(
    quotes: &[Quote],
    allowlist: &[String],
    custom: Option<&CustomRate>,
) -> Vec<Quote> {
    let mut market: Vec<Quote> = quotes
        .iter()
        .filter(|q| q.status.is_usable() && allowlist.iter().any(|p| p == &q.provider))
        .cloned()
        .collect();

    market.sort_by(|a, b| {
        let a_buying = a.buying.unwrap_or(f64::NEG_INFINITY);
        let b_buying = b.buying.unwrap_or(f64::NEG_INFINITY);
        b_buying
            .partial_cmp(&a_buying)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut result = Vec::with_capacity(market.len() + 1);
    if let Some(custom) = custom {
        result.push(custom.to_quote());
    }
    result.extend(market);
    result
}

/// Compute the THB proceeds for `amount_cny` against the preferred quote
/// (house rate when set, market best otherwise), with the market best shown
/// for comparison when it differs.
pub fn conversion_summary(
    quotes: &[Quote],
    allowlist: &[String],
    custom: Option<&CustomRate>,
    amount_cny: f64,
) -> ServiceResult<ConversionSummary> {
    if !amount_cny.is_finite() || amount_cny <= 0.0 {
        return Err(ServiceError::InvalidInput(
            "amount must be a positive number".to_string(),
        ));
    }

    let market = public_quotes(quotes, allowlist, None);
    let market_best = selector::select_best(&market, RateField::Buying);

    let preferred_quote = match custom {
        Some(c) => c.to_quote(),
        None => market_best.cloned().ok_or(ServiceError::NoData)?,
    };
    let preferred_rate = preferred_quote.buying.ok_or(ServiceError::NoData)?;

    let preferred = ConversionLeg {
        provider: preferred_quote.provider.clone(),
        rate: preferred_rate,
        amount_thb: amount_cny * preferred_rate,
    };

    let market_leg = market_best
        .filter(|m| m.provider != preferred.provider)
        .and_then(|m| {
            let rate = m.buying?;
            Some(ConversionLeg {
                provider: m.provider.clone(),
                rate,
                amount_thb: amount_cny * rate,
            })
        });

    // Only worth surfacing when the preferred quote pays less than the market
    let shortfall_thb = market_leg
        .as_ref()
        .map(|m| preferred.amount_thb - m.amount_thb)
        .filter(|diff| *diff < 0.0);

    Ok(ConversionSummary {
        amount_cny,
        preferred,
        market_best: market_leg,
        shortfall_thb,
        outlook: RateOutlook::classify(preferred_rate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteStatus;
    use chrono::Utc;

    fn quote(provider: &str, buying: f64, status: QuoteStatus) -> Quote {
        Quote {
            provider: provider.to_string(),
            buying: Some(buying),
            selling: Some(buying),
            status,
            observed_at: Utc::now(),
        }
    }

    fn allowlist() -> Vec<String> {
        vec!["mid-market".to_string(), "bot-reference".to_string()]
    }

    fn house(buying: f64) -> CustomRate {
        CustomRate {
            provider: "house-rate".to_string(),
            buying,
            selling: buying + 0.20,
            set_at: Utc::now(),
        }
    }

    #[test]
    fn test_public_quotes_filters_and_orders() {
        let quotes = vec![
            quote("mid-market", 4.50, QuoteStatus::Ok),
            quote("bot-reference", 4.60, QuoteStatus::Ok),
            quote("back-office", 4.99, QuoteStatus::Ok),
            Quote::errored("mid-market"),
        ];

        let public = public_quotes(&quotes, &allowlist(), Some(&house(4.55)));

        let providers: Vec<&str> = public.iter().map(|q| q.provider.as_str()).collect();
        assert_eq!(providers, vec!["house-rate", "bot-reference", "mid-market"]);
    }

    #[test]
    fn test_conversion_prefers_house_rate() {
        let quotes = vec![quote("mid-market", 4.60, QuoteStatus::Ok)];

        let summary = conversion_summary(&quotes, &allowlist(), Some(&house(4.50)), 1000.0).unwrap();

        assert_eq!(summary.preferred.provider, "house-rate");
        assert!((summary.preferred.amount_thb - 4500.0).abs() < 1e-9);

        let market = summary.market_best.unwrap();
        assert_eq!(market.provider, "mid-market");
        assert!((market.amount_thb - 4600.0).abs() < 1e-9);

        // House pays 100 THB less than the market best here
        assert!((summary.shortfall_thb.unwrap() + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_conversion_without_house_rate_uses_market_best() {
        let quotes = vec![
            quote("mid-market", 4.40, QuoteStatus::Ok),
            quote("bot-reference", 4.60, QuoteStatus::Ok),
        ];

        let summary = conversion_summary(&quotes, &allowlist(), None, 500.0).unwrap();

        assert_eq!(summary.preferred.provider, "bot-reference");
        assert!(summary.market_best.is_none());
        assert!(summary.shortfall_thb.is_none());
        assert_eq!(summary.outlook, RateOutlook::High);
    }

    #[test]
    fn test_conversion_rejects_bad_amounts() {
        let quotes = vec![quote("mid-market", 4.50, QuoteStatus::Ok)];

        for amount in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let result = conversion_summary(&quotes, &allowlist(), None, amount);
            assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_conversion_with_no_data() {
        let result = conversion_summary(&[], &allowlist(), None, 100.0);
        assert!(matches!(result, Err(ServiceError::NoData)));
    }

    #[test]
    fn test_outlook_thresholds() {
        assert_eq!(RateOutlook::classify(4.55), RateOutlook::High);
        assert_eq!(RateOutlook::classify(4.50), RateOutlook::Normal);
        assert_eq!(RateOutlook::classify(4.45), RateOutlook::Normal);
        assert_eq!(RateOutlook::classify(4.44), RateOutlook::Low);
    }
}
