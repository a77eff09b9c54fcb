//! Deterministic analysis over fetched series
//!
//! No LLM here: these functions turn raw observations into the facts the
//! planner, summary and debate consume.

use crate::models::{
    Comparison, PriceComparison, PriceDirection, RateAnalysis, RateInsights, SeriesPoint,
};
use chrono::{Months, NaiveDate};

/// Weekly observations in a year
const TRAILING_WINDOW: usize = 52;
const RECENT_WINDOW: usize = 10;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Latest/prior rate, trailing 12-month average and trend signal.
pub fn analyze_rates(rates: &[SeriesPoint]) -> RateAnalysis {
    if rates.len() < 2 {
        return RateAnalysis::Unavailable {
            reason: format!("need at least 2 rate observations, have {}", rates.len()),
        };
    }

    let mut sorted = rates.to_vec();
    sorted.sort_by_key(|p| p.date);

    let latest = sorted[sorted.len() - 1].value;
    let prior = sorted[sorted.len() - 2].value;

    let window = &sorted[sorted.len().saturating_sub(TRAILING_WINDOW)..];
    let avg = window.iter().map(|p| p.value).sum::<f64>() / window.len() as f64;

    let trend_signal = if latest > avg {
        "Rates Elevated"
    } else {
        "Rates Cooling"
    };

    RateAnalysis::Computed(RateInsights {
        latest_rate: round2(latest),
        prior_rate: round2(prior),
        avg_12_month: round2(avg),
        trend_signal: trend_signal.to_string(),
    })
}

/// Join each rate observation with the most recent price index at or before
/// its date. Rows without a preceding price are dropped.
fn merge_as_of(rates: &[SeriesPoint], prices: &[SeriesPoint]) -> Vec<(NaiveDate, f64)> {
    let mut rates = rates.to_vec();
    rates.sort_by_key(|p| p.date);
    let mut prices = prices.to_vec();
    prices.sort_by_key(|p| p.date);

    let mut merged = Vec::with_capacity(rates.len());
    let mut cursor = 0;
    let mut current: Option<f64> = None;

    for rate in &rates {
        while cursor < prices.len() && prices[cursor].date <= rate.date {
            current = Some(prices[cursor].value);
            cursor += 1;
        }
        if let Some(price) = current {
            merged.push((rate.date, price));
        }
    }

    merged
}

/// Year-over-year home price movement aligned to the rate calendar.
pub fn compare_with_home_prices(rates: &[SeriesPoint], prices: &[SeriesPoint]) -> Comparison {
    let merged = merge_as_of(rates, prices);

    let Some(&(latest_date, latest_price)) = merged.last() else {
        return Comparison::Unavailable {
            reason: "no overlapping rate and price observations".to_string(),
        };
    };

    let target = latest_date
        .checked_sub_months(Months::new(12))
        .unwrap_or(latest_date);

    let mut year_ago = merged[0];
    for row in &merged {
        let distance = (row.0 - target).num_days().abs();
        if distance < (year_ago.0 - target).num_days().abs() {
            year_ago = *row;
        }
    }

    let year_ago_price = year_ago.1;
    let direction = if latest_price > year_ago_price {
        PriceDirection::Rising
    } else {
        PriceDirection::Falling
    };
    let price_yoy_change_pct = if year_ago_price != 0.0 {
        (latest_price - year_ago_price) / year_ago_price * 100.0
    } else {
        0.0
    };

    Comparison::Computed(PriceComparison {
        latest_price_index: latest_price,
        year_ago_price_index: year_ago_price,
        price_yoy_change_pct: round2(price_yoy_change_pct),
        direction,
    })
}

/// Short-horizon direction ("rising"/"falling") and volatility
/// ("stable"/"volatile") over the last ten observations.
pub fn recent_rate_trend(rates: &[SeriesPoint]) -> (&'static str, &'static str) {
    if rates.len() < 2 {
        return ("unknown", "unknown");
    }

    let mut sorted = rates.to_vec();
    sorted.sort_by_key(|p| p.date);
    let recent = &sorted[sorted.len().saturating_sub(RECENT_WINDOW)..];

    let n = recent.len() as f64;
    let mean = recent.iter().map(|p| p.value).sum::<f64>() / n;
    // sample standard deviation
    let variance = recent.iter().map(|p| (p.value - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let volatility = if variance.sqrt() < 0.1 { "stable" } else { "volatile" };

    let direction = if recent[recent.len() - 1].value > recent[0].value {
        "rising"
    } else {
        "falling"
    };

    (direction, volatility)
}
