//! Publish and subscribe parameter resolution
//!
//! Every field resolves with the same precedence: `X-<Name>` header, then
//! `<Name>` header, then the first matching query parameter from the field's
//! alias list.

use std::collections::HashMap;

use axum::http::HeaderMap;

use super::types::ApiError;
use crate::core::config::Config;
use crate::domain::message::now_unix;
use crate::domain::since::parse_duration;

/// Resolve one parameter. `names` is the alias list, canonical name first.
pub fn param(headers: &HeaderMap, query: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    let canonical = names[0];
    for candidate in [format!("x-{canonical}"), canonical.to_string()] {
        if let Some(value) = headers.get(&candidate).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    for name in names {
        if let Some(value) = query.get(*name) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Lenient bool: `1`, `yes`, `true` are true, everything else is false.
pub fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.as_str(), "1" | "yes" | "true"),
        None => default,
    }
}

/// Priority by number or name
pub fn parse_priority(value: &str) -> Result<u8, ApiError> {
    match value {
        "1" | "min" => Ok(1),
        "2" | "low" => Ok(2),
        "3" | "default" => Ok(3),
        "4" | "high" => Ok(4),
        "5" | "max" | "urgent" => Ok(5),
        other => Err(ApiError::invalid_priority(other)),
    }
}

/// Resolved publish parameters
#[derive(Debug, Default)]
pub struct PublishParams {
    pub message: Option<String>,
    pub title: Option<String>,
    pub click: Option<String>,
    pub priority: Option<u8>,
    pub tags: Vec<String>,
    /// Absolute delivery time (unix seconds) for scheduled messages
    pub delay: Option<u64>,
    pub actions: Option<serde_json::Value>,
    pub attach_url: Option<String>,
    pub filename: Option<String>,
    pub email: Option<String>,
    pub cache: bool,
    pub relay: bool,
    pub unifiedpush: bool,
}

impl PublishParams {
    pub fn parse(
        headers: &HeaderMap,
        query: &HashMap<String, String>,
        config: &Config,
    ) -> Result<Self, ApiError> {
        let mut params = Self {
            message: param(headers, query, &["message", "m"]),
            title: param(headers, query, &["title", "t"]),
            click: param(headers, query, &["click"]),
            filename: param(headers, query, &["filename", "file", "f"]),
            email: param(headers, query, &["email", "e", "mail"]),
            cache: parse_bool(param(headers, query, &["cache"]), true),
            relay: parse_bool(param(headers, query, &["firebase", "fb"]), true),
            unifiedpush: parse_bool(param(headers, query, &["unifiedpush", "up"]), false),
            ..Self::default()
        };

        // UnifiedPush messages bypass external push relays
        if params.unifiedpush {
            params.relay = false;
        }

        if let Some(value) = param(headers, query, &["priority", "prio", "p"]) {
            params.priority = Some(parse_priority(&value)?);
        }

        if let Some(value) = param(headers, query, &["tags", "tag", "ta"]) {
            params.tags = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = param(headers, query, &["delay", "at", "in"]) {
            params.delay = Some(parse_delay(&value, config)?);
        }

        if let Some(value) = param(headers, query, &["actions"]) {
            params.actions =
                Some(serde_json::from_str(&value).map_err(|_| ApiError::invalid_json_body())?);
        }

        if let Some(url) = param(headers, query, &["attach", "a"]) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ApiError::invalid_attach_url(&url));
            }
            params.attach_url = Some(url);
        }

        Ok(params)
    }
}

/// Parse a delay value (duration literal or unix epoch) into an absolute
/// delivery time, validated against the configured bounds.
fn parse_delay(value: &str, config: &Config) -> Result<u64, ApiError> {
    let now = now_unix();
    let target = if let Some(duration) = parse_duration(value) {
        now + duration.as_secs()
    } else if let Ok(epoch) = value.parse::<u64>() {
        epoch
    } else {
        return Err(ApiError::invalid_delay(
            "expected a duration like 10s or a unix timestamp",
        ));
    };

    if target < now + config.min_delay.as_secs() {
        return Err(ApiError::invalid_delay("too small"));
    }
    if target > now + config.max_delay.as_secs() {
        return Err(ApiError::invalid_delay("too large"));
    }
    Ok(target)
}

/// Message filters for the subscribe pipeline. Every present filter must
/// match for a message to be delivered.
#[derive(Debug, Default)]
pub struct FilterSet {
    pub message: Option<String>,
    pub title: Option<String>,
    pub priority: Vec<u8>,
    pub tags: Vec<String>,
}

impl FilterSet {
    pub fn parse(headers: &HeaderMap, query: &HashMap<String, String>) -> Result<Self, ApiError> {
        let mut filters = Self {
            message: param(headers, query, &["message", "m"]),
            title: param(headers, query, &["title", "t"]),
            ..Self::default()
        };
        if let Some(value) = param(headers, query, &["priority", "prio", "p"]) {
            for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                filters.priority.push(parse_priority(part)?);
            }
        }
        if let Some(value) = param(headers, query, &["tags", "tag", "ta"]) {
            filters.tags = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(filters)
    }

    pub fn matches(&self, message: &crate::domain::message::Message) -> bool {
        if let Some(text) = &self.message
            && message.message != *text
        {
            return false;
        }
        if let Some(title) = &self.title
            && message.title != *title
        {
            return false;
        }
        if !self.priority.is_empty() && !self.priority.contains(&message.priority) {
            return false;
        }
        self.tags.iter().all(|t| message.tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    use crate::domain::message::Message;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_param_precedence() {
        let h = headers(&[("x-title", "from-x"), ("title", "from-plain")]);
        let q = query(&[("title", "from-query")]);
        assert_eq!(param(&h, &q, &["title", "t"]), Some("from-x".to_string()));

        let h = headers(&[("title", "from-plain")]);
        assert_eq!(
            param(&h, &q, &["title", "t"]),
            Some("from-plain".to_string())
        );

        let h = HeaderMap::new();
        assert_eq!(
            param(&h, &q, &["title", "t"]),
            Some("from-query".to_string())
        );
    }

    #[test]
    fn test_param_query_alias_order() {
        let q = query(&[("t", "short")]);
        assert_eq!(
            param(&HeaderMap::new(), &q, &["title", "t"]),
            Some("short".to_string())
        );
    }

    #[test]
    fn test_parse_priority_names_and_numbers() {
        assert_eq!(parse_priority("1").unwrap(), 1);
        assert_eq!(parse_priority("urgent").unwrap(), 5);
        assert_eq!(parse_priority("default").unwrap(), 3);
        assert!(parse_priority("6").is_err());
        assert!(parse_priority("highest").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(Some("1".to_string()), false));
        assert!(parse_bool(Some("yes".to_string()), false));
        assert!(!parse_bool(Some("no".to_string()), true));
        assert!(parse_bool(None, true));
        assert!(!parse_bool(None, false));
    }

    #[test]
    fn test_publish_params_tags_split() {
        let q = query(&[("tags", "warning, skull ,")]);
        let params = PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).unwrap();
        assert_eq!(params.tags, vec!["warning", "skull"]);
    }

    #[test]
    fn test_unifiedpush_implies_no_relay() {
        let q = query(&[("up", "1")]);
        let params = PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).unwrap();
        assert!(params.unifiedpush);
        assert!(!params.relay);
    }

    #[test]
    fn test_delay_duration_literal() {
        let q = query(&[("delay", "10m")]);
        let params = PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).unwrap();
        let target = params.delay.unwrap();
        assert!(target.abs_diff(now_unix() + 600) <= 1);
    }

    #[test]
    fn test_delay_epoch() {
        let epoch = now_unix() + 120;
        let q = query(&[("at", &epoch.to_string())]);
        let params = PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).unwrap();
        assert_eq!(params.delay, Some(epoch));
    }

    #[test]
    fn test_delay_bounds() {
        let config = Config::default();
        let q = query(&[("delay", "1s")]);
        assert!(PublishParams::parse(&HeaderMap::new(), &q, &config).is_err());

        let q = query(&[("delay", "30d")]);
        assert!(PublishParams::parse(&HeaderMap::new(), &q, &config).is_err());
    }

    #[test]
    fn test_delay_natural_language_rejected() {
        let q = query(&[("delay", "tomorrow, 10am")]);
        assert!(PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).is_err());
    }

    #[test]
    fn test_attach_url_scheme_check() {
        let q = query(&[("attach", "ftp://example.com/f.bin")]);
        assert!(PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).is_err());

        let q = query(&[("a", "https://example.com/f.bin")]);
        let params = PublishParams::parse(&HeaderMap::new(), &q, &Config::default()).unwrap();
        assert_eq!(
            params.attach_url.as_deref(),
            Some("https://example.com/f.bin")
        );
    }

    #[test]
    fn test_filters_all_must_match() {
        let q = query(&[("priority", "4,5"), ("tags", "alert,backup")]);
        let filters = FilterSet::parse(&HeaderMap::new(), &q).unwrap();

        let mut m = Message::new("t");
        m.priority = 5;
        m.tags = vec!["alert".to_string(), "backup".to_string(), "x".to_string()];
        assert!(filters.matches(&m));

        m.priority = 3;
        assert!(!filters.matches(&m));

        m.priority = 5;
        m.tags = vec!["alert".to_string()];
        assert!(!filters.matches(&m));
    }

    #[test]
    fn test_filter_exact_message_and_title() {
        let q = query(&[("message", "hello")]);
        let filters = FilterSet::parse(&HeaderMap::new(), &q).unwrap();

        let mut m = Message::new("t");
        m.message = "hello".to_string();
        assert!(filters.matches(&m));
        m.message = "hello there".to_string();
        assert!(!filters.matches(&m));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filters = FilterSet::default();
        assert!(filters.matches(&Message::new("t")));
    }
}
