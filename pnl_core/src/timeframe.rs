use crate::{PnLError, Result};
use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use tracing::debug;

/// Parse a period such as `30s`, `15min`, `12h`, `7d`, `3m` or `1y`.
///
/// Months are 30 days and years 365 days.
pub fn parse_period(period: &str) -> Result<Duration> {
    let re = Regex::new(r"^(\d+)(s|min|h|d|m|y)$")
        .map_err(|e| PnLError::TimeframeParse(format!("Regex error: {}", e)))?;

    let captures = re
        .captures(period.trim())
        .ok_or_else(|| PnLError::TimeframeParse(format!("Invalid period format: {}", period)))?;

    let amount: i64 = captures[1]
        .parse()
        .map_err(|e| PnLError::TimeframeParse(format!("Invalid number: {}", e)))?;

    let seconds_per_unit: i64 = match &captures[2] {
        "s" => 1,
        "min" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "m" => 2_592_000,
        "y" => 31_536_000,
        unit => {
            return Err(PnLError::TimeframeParse(format!(
                "Unknown time unit: {}",
                unit
            )))
        }
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| PnLError::TimeframeParse(format!("Period out of range: {}", period)))
}

/// Start of the trailing window `period` ending at `now`
pub fn period_cutoff(period: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cutoff = now - parse_period(period)?;
    debug!("Period cutoff => {} => {}", period, cutoff);
    Ok(cutoff)
}

/// Calendar-month horizon used to stop walking history back.
pub fn retention_horizon(months: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Check if a block time is within the specified timeframe
pub fn is_within_timeframe(block_time: DateTime<Utc>, cutoff: Option<DateTime<Utc>>) -> bool {
    match cutoff {
        Some(cutoff_time) => block_time >= cutoff_time,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_period_units() {
        assert_eq!(parse_period("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_period("15min").unwrap(), Duration::minutes(15));
        assert_eq!(parse_period("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_period("1m").unwrap(), Duration::days(30));
        assert_eq!(parse_period("1y").unwrap(), Duration::days(365));
    }

    #[test]
    fn test_parse_period_rejects_garbage() {
        assert!(parse_period("7 days").is_err());
        assert!(parse_period("d7").is_err());
        assert!(parse_period("").is_err());
    }

    #[test]
    fn test_retention_horizon_uses_calendar_months() {
        let now = Utc.with_ymd_and_hms(2024, 8, 31, 12, 0, 0).unwrap();
        // Feb has no 31st; chrono clamps to the last day
        assert_eq!(
            retention_horizon(6, now),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_is_within_timeframe() {
        let now = Utc::now();
        assert!(is_within_timeframe(now, None));
        assert!(is_within_timeframe(now, Some(now - Duration::days(1))));
        assert!(!is_within_timeframe(now - Duration::days(2), Some(now - Duration::days(1))));
    }
}
