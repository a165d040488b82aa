//! Backoff computation and server retry hints.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Reset headers at or above this value are epoch seconds, not a countdown.
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

const RATE_LIMIT_HEADER_PAIRS: [(&str, &str); 2] = [
    ("x-ratelimit-remaining", "x-ratelimit-reset"),
    ("ratelimit-remaining", "ratelimit-reset"),
];

/// `min(2^attempt * min_wait, max_wait)`; overflow saturates at `max_wait`.
pub fn exponential_backoff(attempt: u32, min_wait: Duration, max_wait: Duration) -> Duration {
    let scaled = 1u128
        .checked_shl(attempt)
        .and_then(|factor| min_wait.as_nanos().checked_mul(factor));

    match scaled {
        Some(nanos) if nanos < max_wait.as_nanos() => u64::try_from(nanos)
            .map(Duration::from_nanos)
            .unwrap_or(max_wait),
        _ => max_wait,
    }
}

/// Parses a `Retry-After` value.
///
/// Accepts integer or fractional seconds (`"5"`, `"1.5"`), duration strings
/// (`"13s"`, `"1m 30s"`) and HTTP-dates. Zero, negative and unparsable values
/// yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs));
    }

    if let Ok(d) = humantime::parse_duration(value) {
        return (!d.is_zero()).then_some(d);
    }

    DateTime::parse_from_rfc2822(value)
        .ok()
        .and_then(|at| (at.with_timezone(&Utc) - Utc::now()).to_std().ok())
        .filter(|d| !d.is_zero())
}

/// `Retry-After` from response headers plus the profile padding.
pub fn retry_after(headers: &HeaderMap, padding: Duration) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
        .map(|d| d + padding)
}

/// Delay derived from rate-limit reset headers when the quota is spent.
pub fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    RATE_LIMIT_HEADER_PAIRS.iter().find_map(|(remaining, reset)| {
        let exhausted = match header(remaining) {
            Some(v) => v.parse::<u64>().map(|n| n == 0).unwrap_or(false),
            None => true,
        };
        if !exhausted {
            return None;
        }
        let reset = header(reset)?.parse::<u64>().ok()?;
        if reset >= EPOCH_THRESHOLD {
            let now = u64::try_from(Utc::now().timestamp()).ok()?;
            reset.checked_sub(now).filter(|s| *s > 0).map(Duration::from_secs)
        } else {
            (reset > 0).then(|| Duration::from_secs(reset))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use test_case::test_case;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_backoff_formula() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        for attempt in 0..=6 {
            let expected = (min * 2u32.pow(attempt)).min(max);
            assert_eq!(exponential_backoff(attempt, min, max), expected);
        }
    }

    #[test]
    fn test_backoff_saturates_monotonically() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = exponential_backoff(attempt, min, max);
            assert!(delay >= previous);
            assert!(delay <= max);
            previous = delay;
        }
        assert_eq!(exponential_backoff(u32::MAX, min, max), max);
    }

    #[test_case("5", Some(Duration::from_secs(5)); "integer seconds")]
    #[test_case("13s", Some(Duration::from_secs(13)); "duration string")]
    #[test_case("1m 30s", Some(Duration::from_secs(90)); "compound duration")]
    #[test_case("1.5", Some(Duration::from_millis(1500)); "fractional seconds")]
    #[test_case("", None; "empty")]
    #[test_case("soon", None; "garbage")]
    #[test_case("0", None; "zero")]
    #[test_case("-3", None; "negative")]
    fn test_parse_retry_after(input: &str, expected: Option<Duration>) {
        assert_eq!(parse_retry_after(input), expected);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let at = Utc::now() + chrono::Duration::seconds(120);
        let delay = parse_retry_after(&at.to_rfc2822()).unwrap();
        assert!(delay > Duration::from_secs(100) && delay <= Duration::from_secs(120));
    }

    #[test_case("Retry-After"; "canonical")]
    #[test_case("retry-after"; "lower")]
    #[test_case("RETRY-AFTER"; "upper")]
    fn test_retry_after_header_with_padding(name: &str) {
        let map = headers(&[(name, "2")]);
        assert_eq!(
            retry_after(&map, Duration::from_secs(1)),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_reset_header_used_only_when_exhausted() {
        let spent = headers(&[("X-RateLimit-Remaining", "0"), ("X-RateLimit-Reset", "7")]);
        assert_eq!(rate_limit_reset(&spent), Some(Duration::from_secs(7)));

        let left = headers(&[("X-RateLimit-Remaining", "4"), ("X-RateLimit-Reset", "7")]);
        assert_eq!(rate_limit_reset(&left), None);

        let draft = headers(&[("RateLimit-Remaining", "0"), ("RateLimit-Reset", "12")]);
        assert_eq!(rate_limit_reset(&draft), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_reset_header_as_epoch() {
        let reset = (Utc::now().timestamp() + 60).to_string();
        let map = headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &reset)]);
        let delay = rate_limit_reset(&map).unwrap();
        assert!(delay > Duration::from_secs(55) && delay <= Duration::from_secs(60));
    }
}
