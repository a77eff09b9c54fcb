//! Numeric series sources
//!
//! A source retrieves one remote series and normalizes it into ordered
//! `(date, value)` points. Failures are ordinary errors; the dispatcher
//! decides whether cached data can stand in.

use crate::error::ResearchError;
use crate::models::{SeriesId, SeriesPoint};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn fetch(&self, series: SeriesId) -> Result<Vec<SeriesPoint>>;
}

/// FRED `fredgraph.csv` client
#[derive(Clone)]
pub struct FredClient {
    client: Client,
    base_url: String,
}

impl FredClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SeriesSource for FredClient {
    async fn fetch(&self, series: SeriesId) -> Result<Vec<SeriesPoint>> {
        let code = series.fred_code();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("id", code)])
            .send()
            .await
            .map_err(|e| {
                ResearchError::FetchError(format!("FRED request failed for {}: {}", code, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::FetchError(format!(
                "FRED returned {} for {}",
                status, code
            )));
        }

        let body = response.text().await?;
        let points = parse_fred_csv(&body)?;

        debug!(series = %series, points = points.len(), "FRED series fetched");
        Ok(points)
    }
}

/// Parse a two-column `date,value` CSV. The header row is skipped, missing
/// observations (FRED writes `.`) are dropped, and the result is sorted.
pub fn parse_fred_csv(body: &str) -> Result<Vec<SeriesPoint>> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| ResearchError::FetchError("empty CSV response".to_string()))?;
    if header.split(',').count() < 2 {
        return Err(ResearchError::FetchError(format!(
            "unexpected CSV header: {}",
            header
        )));
    }

    let mut points = Vec::new();
    let mut skipped = 0usize;

    for line in lines {
        let mut columns = line.split(',').map(str::trim);
        let (Some(date), Some(value)) = (columns.next(), columns.next()) else {
            skipped += 1;
            continue;
        };

        match (
            NaiveDate::parse_from_str(date, "%Y-%m-%d"),
            value.parse::<f64>(),
        ) {
            (Ok(date), Ok(value)) => points.push(SeriesPoint::new(date, value)),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "Dropped unparsable CSV rows");
    }

    if points.is_empty() {
        return Err(ResearchError::FetchError(
            "CSV contained no usable observations".to_string(),
        ));
    }

    points.sort_by_key(|p| p.date);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fred_csv() {
        let body = "observation_date,MORTGAGE30US\n\
                    2024-01-11,6.66\n\
                    2024-01-04,6.62\n\
                    2024-01-18,.\n";
        let points = parse_fred_csv(body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 6.62);
        assert_eq!(points[1].date, NaiveDate::from_ymd_opt(2024, 1, 11).unwrap());
    }

    #[test]
    fn test_parse_fred_csv_rejects_empty() {
        assert!(parse_fred_csv("").is_err());
        assert!(parse_fred_csv("observation_date,CSUSHPINSA\n2024-01-01,.\n").is_err());
    }
}
