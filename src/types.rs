use std::fmt::Display;

use chrono::DateTime;
use teloxide::types::UserId;

/// A `premium_until` value that means the entitlement never expires.
///
/// Any realistic unix timestamp is far below this, so the ordinary
/// `until > now` comparison stays true until end of time.
pub const FOREVER_UNTIL: i64 = 1_000_000_000_000;

/// Whether a `premium_until` timestamp grants premium at time `now`.
/// Zero means "never granted" and always compares false.
pub fn is_premium_at(until: i64, now: i64) -> bool {
    until > now
}

/// The closed set of premium durations the admin can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPolicy {
    ThreeDays,
    SevenDays,
    OneMonth,
    Forever,
}

impl DurationPolicy {
    /// Lenient keyword matching, kept compatible with what the admin is
    /// used to typing: substring checks, case-insensitive, both Russian
    /// and English keywords, checked in this exact order of precedence.
    pub fn parse(text: &str) -> Option<DurationPolicy> {
        let text = text.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| text.contains(needle));

        let day_word = has(&["д", "d"]);

        if text.contains('3') && day_word {
            Some(DurationPolicy::ThreeDays)
        } else if (text.contains('7') && day_word) || has(&["нед", "week"]) {
            Some(DurationPolicy::SevenDays)
        } else if has(&["месяц", "month"]) || (text.contains('1') && has(&["м", "m"])) {
            Some(DurationPolicy::OneMonth)
        } else if has(&["навс", "forever"]) {
            Some(DurationPolicy::Forever)
        } else {
            None
        }
    }

    /// The `premium_until` timestamp this policy yields when granted at `now`.
    pub fn until(self, now: i64) -> i64 {
        match self {
            DurationPolicy::ThreeDays => now + 3 * 86400,
            DurationPolicy::SevenDays => now + 7 * 86400,
            DurationPolicy::OneMonth => now + 30 * 86400,
            DurationPolicy::Forever => FOREVER_UNTIL,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DurationPolicy::ThreeDays => "3 days",
            DurationPolicy::SevenDays => "7 days",
            DurationPolicy::OneMonth => "1 month",
            DurationPolicy::Forever => "forever",
        }
    }
}

/// Human-facing entitlement status, derived purely from
/// `premium_until` against a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumStatus {
    Standard,
    PremiumUntil(i64),
    PremiumForever,
}

impl PremiumStatus {
    pub fn from_until(until: i64, now: i64) -> PremiumStatus {
        if until >= FOREVER_UNTIL {
            PremiumStatus::PremiumForever
        } else if until > now {
            PremiumStatus::PremiumUntil(until)
        } else {
            PremiumStatus::Standard
        }
    }
}

impl Display for PremiumStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PremiumStatus::Standard => write!(f, "Standard"),
            PremiumStatus::PremiumForever => write!(f, "⭐ Premium ⭐ (forever)"),
            PremiumStatus::PremiumUntil(until) => match DateTime::from_timestamp(*until, 0) {
                Some(datetime) => {
                    write!(f, "⭐ Premium ⭐ until {}", datetime.format("%Y-%m-%d %H:%M"))
                }
                None => write!(f, "⭐ Premium ⭐"),
            },
        }
    }
}

const AWAITING_IDENTIFIER_TOKEN: &str = "wait_username_for_premium";
const AWAITING_DURATION_PREFIX: &str = "wait_time_for_";

/// Premium grant flow state of one admin.
///
/// Persisted in the `admin_state` column of the users table as
/// `NULL`, `"wait_username_for_premium"` or `"wait_time_for_<id>"`;
/// everything outside this codec pair works with the typed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    Idle,
    AwaitingIdentifier,
    AwaitingDuration(UserId),
}

impl AdminState {
    /// Database encoding. `Idle` is stored as NULL.
    pub fn to_db(self) -> Option<String> {
        match self {
            AdminState::Idle => None,
            AdminState::AwaitingIdentifier => Some(AWAITING_IDENTIFIER_TOKEN.to_string()),
            AdminState::AwaitingDuration(target) => {
                Some(format!("{}{}", AWAITING_DURATION_PREFIX, target))
            }
        }
    }

    /// Decode a stored token. `Err` carries the token that failed to
    /// parse; callers treat that as corrupt internal state and reset.
    pub fn from_db(token: Option<&str>) -> Result<AdminState, String> {
        let Some(token) = token else {
            return Ok(AdminState::Idle);
        };
        if token == AWAITING_IDENTIFIER_TOKEN {
            return Ok(AdminState::AwaitingIdentifier);
        }
        token
            .strip_prefix(AWAITING_DURATION_PREFIX)
            .and_then(|id| id.parse().ok())
            .map(|id| AdminState::AwaitingDuration(UserId(id)))
            .ok_or_else(|| token.to_string())
    }
}

/// What the admin typed when asked who gets premium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetIdentifier {
    Username(String),
    Id(UserId),
}

impl TargetIdentifier {
    /// `@username` or a bare numeric user id. Anything else is not
    /// something we can look up.
    pub fn parse(text: &str) -> Option<TargetIdentifier> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix('@') {
            if name.is_empty() {
                None
            } else {
                Some(TargetIdentifier::Username(name.to_string()))
            }
        } else if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
            text.parse().ok().map(|id| TargetIdentifier::Id(UserId(id)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_keywords() {
        use DurationPolicy::*;
        assert_eq!(DurationPolicy::parse("3 дня"), Some(ThreeDays));
        assert_eq!(DurationPolicy::parse("3 days"), Some(ThreeDays));
        assert_eq!(DurationPolicy::parse("3d"), Some(ThreeDays));
        assert_eq!(DurationPolicy::parse("7 дней"), Some(SevenDays));
        assert_eq!(DurationPolicy::parse("неделя"), Some(SevenDays));
        assert_eq!(DurationPolicy::parse("Week"), Some(SevenDays));
        assert_eq!(DurationPolicy::parse("1 месяц"), Some(OneMonth));
        assert_eq!(DurationPolicy::parse("month"), Some(OneMonth));
        assert_eq!(DurationPolicy::parse("1m"), Some(OneMonth));
        assert_eq!(DurationPolicy::parse("навсегда"), Some(Forever));
        assert_eq!(DurationPolicy::parse("FOREVER"), Some(Forever));

        assert_eq!(DurationPolicy::parse("banana"), None);
        assert_eq!(DurationPolicy::parse("7"), None);
        assert_eq!(DurationPolicy::parse(""), None);
    }

    #[test]
    fn fresh_user_is_not_premium() {
        assert!(!is_premium_at(0, 0));
        assert!(!is_premium_at(0, 1_700_000_000));
    }

    #[test]
    fn forever_never_expires() {
        let until = DurationPolicy::Forever.until(1_700_000_000);
        assert_eq!(until, FOREVER_UNTIL);
        assert!(is_premium_at(until, 1_700_000_000));
        // Year 5138 or so. Good enough.
        assert!(is_premium_at(until, 99_999_999_999));
    }

    #[test]
    fn three_days_expire() {
        let now = 1_700_000_000;
        let until = DurationPolicy::ThreeDays.until(now);
        assert!(is_premium_at(until, now));
        assert!(is_premium_at(until, now + 3 * 86400 - 1));
        assert!(!is_premium_at(until, now + 3 * 86400));
        assert_eq!(
            PremiumStatus::from_until(until, now + 3 * 86400),
            PremiumStatus::Standard
        );
    }

    #[test]
    fn status_labels() {
        use PremiumStatus::*;
        assert_eq!(PremiumStatus::from_until(0, 100), Standard);
        assert_eq!(PremiumStatus::from_until(500, 100), PremiumUntil(500));
        assert_eq!(PremiumStatus::from_until(500, 500), Standard);
        assert_eq!(PremiumStatus::from_until(FOREVER_UNTIL, 100), PremiumForever);
    }

    #[test]
    fn admin_state_codec_round_trip() {
        use AdminState::*;
        for state in [Idle, AwaitingIdentifier, AwaitingDuration(UserId(42))] {
            let token = state.to_db();
            assert_eq!(AdminState::from_db(token.as_deref()), Ok(state));
        }
        assert_eq!(AdminState::from_db(None), Ok(Idle));
        assert_eq!(
            AdminState::from_db(Some("wait_time_for_42")),
            Ok(AwaitingDuration(UserId(42)))
        );
    }

    #[test]
    fn admin_state_rejects_garbage_tokens() {
        assert!(AdminState::from_db(Some("wait_time_for_banana")).is_err());
        assert!(AdminState::from_db(Some("wait_time_for_")).is_err());
        assert!(AdminState::from_db(Some("what")).is_err());
    }

    #[test]
    fn identifier_classification() {
        use TargetIdentifier::*;
        assert_eq!(
            TargetIdentifier::parse("@Alice"),
            Some(Username("Alice".to_string()))
        );
        assert_eq!(TargetIdentifier::parse(" 1234 "), Some(Id(UserId(1234))));
        assert_eq!(TargetIdentifier::parse("alice"), None);
        assert_eq!(TargetIdentifier::parse("@"), None);
        assert_eq!(TargetIdentifier::parse("12a4"), None);
        assert_eq!(TargetIdentifier::parse(""), None);
    }

    #[test]
    fn grant_flow_round_trip() {
        let now = 1_700_000_000;
        let alice = UserId(1234);
        let mut until = 0;

        // The admin tapped the grant button and typed "@alice".
        let mut state = AdminState::AwaitingIdentifier;
        match TargetIdentifier::parse("@alice") {
            Some(TargetIdentifier::Username(name)) => {
                assert_eq!(name, "alice");
                state = AdminState::AwaitingDuration(alice);
            }
            other => panic!("unexpected identifier: {other:?}"),
        }
        assert!(!is_premium_at(until, now));

        // Nonsense duration leaves the flow and the entitlement alone.
        assert_eq!(DurationPolicy::parse("banana"), None);
        assert_eq!(state, AdminState::AwaitingDuration(alice));
        assert!(!is_premium_at(until, now));

        let policy = DurationPolicy::parse("7 дней").unwrap();
        assert_eq!(policy, DurationPolicy::SevenDays);
        until = policy.until(now);
        state = AdminState::Idle;

        assert_eq!(state, AdminState::Idle);
        assert!(is_premium_at(until, now + 6 * 86400));
        assert!(!is_premium_at(until, now + 8 * 86400));
    }
}
