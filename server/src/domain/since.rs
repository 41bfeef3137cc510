//! Replay cursor parsing

use std::time::Duration;

use crate::domain::message::{looks_like_message_id, now_unix};

/// Replay cursor for the subscribe pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinceMarker {
    /// No replay at all
    #[default]
    None,
    /// Replay everything the cache holds
    All,
    /// Replay messages with `time >= .0`
    Time(u64),
    /// Replay messages published after the message with this id
    Id(String),
}

impl SinceMarker {
    /// Parse a `since` parameter: `all`, `none`, unix seconds, a duration
    /// literal (subtracted from now), or a message id.
    pub fn parse(s: &str) -> Result<Self, SinceError> {
        match s {
            "" | "none" => Ok(Self::None),
            "all" => Ok(Self::All),
            _ => {
                if let Ok(epoch) = s.parse::<u64>() {
                    return Ok(Self::Time(epoch));
                }
                if let Some(duration) = parse_duration(s) {
                    return Ok(Self::Time(now_unix().saturating_sub(duration.as_secs())));
                }
                if looks_like_message_id(s) {
                    return Ok(Self::Id(s.to_string()));
                }
                Err(SinceError(s.to_string()))
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Invalid `since` parameter
#[derive(Debug, thiserror::Error)]
#[error("invalid since marker: {0}")]
pub struct SinceError(pub String);

/// Parse a duration literal like `30s`, `10m`, `12h` or `2d`.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        return None;
    }
    let (value, unit) = s.split_at(s.len() - 1);
    let value: u64 = value.parse().ok()?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(SinceMarker::parse("none").unwrap(), SinceMarker::None);
        assert_eq!(SinceMarker::parse("").unwrap(), SinceMarker::None);
        assert_eq!(SinceMarker::parse("all").unwrap(), SinceMarker::All);
    }

    #[test]
    fn test_parse_epoch() {
        assert_eq!(
            SinceMarker::parse("1700000000").unwrap(),
            SinceMarker::Time(1_700_000_000)
        );
    }

    #[test]
    fn test_parse_duration_literal() {
        let marker = SinceMarker::parse("12h").unwrap();
        let expected = now_unix() - 12 * 3600;
        match marker {
            SinceMarker::Time(t) => assert!(t.abs_diff(expected) <= 1),
            other => panic!("expected time marker, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_message_id() {
        assert_eq!(
            SinceMarker::parse("abcDEF1234").unwrap(),
            SinceMarker::Id("abcDEF1234".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SinceMarker::parse("yesterday-ish").is_err());
        assert!(SinceMarker::parse("-5m").is_err());
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("10x"), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("3.5h"), None);
    }
}
