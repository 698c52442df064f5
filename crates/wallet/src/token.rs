use chrono::{DateTime, Duration, Utc};

/// A bearer token and when it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn new(value: String, expires_in_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: now + Duration::seconds(expires_in_secs.max(0)),
        }
    }

    /// Usable for at least `margin_secs` more.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        now + Duration::seconds(margin_secs) < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refreshes_inside_margin() {
        let now = Utc::now();
        let token = CachedToken::new("t".to_string(), 3600, now);
        assert!(token.is_fresh(now, 60));
        assert!(token.is_fresh(now + Duration::seconds(3500), 60));
        assert!(!token.is_fresh(now + Duration::seconds(3541), 60));
        assert!(!token.is_fresh(now + Duration::seconds(4000), 60));
    }
}
