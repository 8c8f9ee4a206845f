//! Ledger policy constants and loading.

use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

const DEFAULT_SYNC_DEADLINE_HOURS: u32 = 96;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_COMPACT_EVERY: usize = 64;

const MAX_SYNC_DEADLINE_HOURS: u32 = 24 * 366;
const MAX_RETENTION_DAYS: u32 = 3_650;
const MAX_DAY_OFFSET_MINUTES: u32 = 14 * 60;

/// Policy constants loaded from `policy.json`.
///
/// Wallet limits (amounts, counts) are not here: they always come from the
/// remote wallet record. Every field is optional in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerPolicy {
    /// Hours a wallet may hold unsynced transactions before it is blocked.
    pub sync_deadline_hours: u32,
    /// Ambiguous submit failures tolerated before a transaction fails.
    pub max_retries: u32,
    /// Ambiguous failures in one pass after which a wallet's pass stops.
    pub max_consecutive_failures: u32,
    /// Upper bound on a single remote submit.
    pub submit_timeout_secs: u64,
    /// How long settled transactions are kept before purging.
    pub retention_days: u32,
    /// Offset of the calendar-day boundary from UTC, in minutes.
    pub day_offset_minutes: i32,
    /// Journal entries written between snapshots.
    pub compact_every: usize,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            sync_deadline_hours: DEFAULT_SYNC_DEADLINE_HOURS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            submit_timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            day_offset_minutes: 0,
            compact_every: DEFAULT_COMPACT_EVERY,
        }
    }
}

impl LedgerPolicy {
    /// Loads policy from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::OffpayError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let policy: Self = serde_json::from_str(&contents)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Rejects values that would make the ledger unusable.
    pub fn validate(&self) -> crate::Result<()> {
        if self.sync_deadline_hours == 0 {
            return Err(crate::OffpayError::Config(
                "sync_deadline_hours must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(crate::OffpayError::Config(
                "max_retries must be positive".to_string(),
            ));
        }
        if self.sync_deadline_hours > MAX_SYNC_DEADLINE_HOURS {
            return Err(crate::OffpayError::Config(format!(
                "sync_deadline_hours must be at most {MAX_SYNC_DEADLINE_HOURS}"
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(crate::OffpayError::Config(
                "max_consecutive_failures must be positive".to_string(),
            ));
        }
        if self.submit_timeout_secs == 0 {
            return Err(crate::OffpayError::Config(
                "submit_timeout_secs must be positive".to_string(),
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(crate::OffpayError::Config(format!(
                "retention_days must be at most {MAX_RETENTION_DAYS}"
            )));
        }
        if self.day_offset_minutes.unsigned_abs() > MAX_DAY_OFFSET_MINUTES {
            return Err(crate::OffpayError::Config(format!(
                "day_offset_minutes must be within ±{MAX_DAY_OFFSET_MINUTES}"
            )));
        }
        if self.compact_every == 0 {
            return Err(crate::OffpayError::Config(
                "compact_every must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sync_deadline(&self) -> Duration {
        Duration::hours(i64::from(self.sync_deadline_hours))
    }

    /// Deadline for a wallet whose first unsynced transaction lands at `at`.
    #[must_use]
    pub fn deadline_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.checked_add_signed(self.sync_deadline())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub fn submit_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.submit_timeout_secs)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    /// Settled transactions older than this are purged.
    #[must_use]
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Calendar date a timestamp falls on for daily counters.
    #[must_use]
    pub fn calendar_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.checked_add_signed(Duration::minutes(i64::from(self.day_offset_minutes)))
            .unwrap_or(at)
            .date_naive()
    }

    /// Returns a human-readable description of the policy.
    pub fn describe(&self) -> String {
        let mut out = String::from("Ledger policy:\n");

        let _ = writeln!(out, "  sync_deadline_hours: {}", self.sync_deadline_hours);
        let _ = writeln!(out, "  max_retries: {}", self.max_retries);
        let _ = writeln!(
            out,
            "  max_consecutive_failures: {}",
            self.max_consecutive_failures
        );
        let _ = writeln!(out, "  submit_timeout_secs: {}", self.submit_timeout_secs);
        let _ = writeln!(out, "  retention_days: {}", self.retention_days);
        let _ = writeln!(out, "  day_offset_minutes: {}", self.day_offset_minutes);
        let _ = writeln!(out, "  compact_every: {}", self.compact_every);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let policy: LedgerPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.sync_deadline_hours, 96);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.sync_deadline(), Duration::days(4));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let policy: LedgerPolicy =
            serde_json::from_str(r#"{ "max_retries": 2, "retention_days": 7 }"#).unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retention(), Duration::days(7));
        assert_eq!(policy.submit_timeout_secs, 15);
    }

    #[test]
    fn bad_json_returns_error() {
        assert!(serde_json::from_str::<LedgerPolicy>("not json").is_err());
    }

    #[test]
    fn zero_retries_rejected() {
        let policy = LedgerPolicy {
            max_retries: 0,
            ..LedgerPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn zero_consecutive_failures_rejected() {
        let policy: LedgerPolicy =
            serde_json::from_str(r#"{ "max_consecutive_failures": 0 }"#).unwrap();
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("max_consecutive_failures"));
    }

    #[test]
    fn zero_submit_timeout_rejected() {
        let policy = LedgerPolicy {
            submit_timeout_secs: 0,
            ..LedgerPolicy::default()
        };
        assert!(policy.validate().unwrap_err().to_string().contains("submit_timeout_secs"));
    }

    #[test]
    fn oversized_durations_rejected() {
        let policy: LedgerPolicy =
            serde_json::from_str(r#"{ "sync_deadline_hours": 4294967295 }"#).unwrap();
        assert!(policy.validate().unwrap_err().to_string().contains("sync_deadline_hours"));

        let policy = LedgerPolicy {
            retention_days: u32::MAX,
            ..LedgerPolicy::default()
        };
        assert!(policy.validate().unwrap_err().to_string().contains("retention_days"));

        for day_offset_minutes in [24 * 60, i32::MIN] {
            let policy = LedgerPolicy {
                day_offset_minutes,
                ..LedgerPolicy::default()
            };
            assert!(policy.validate().unwrap_err().to_string().contains("day_offset_minutes"));
        }
    }

    #[test]
    fn unvalidated_extremes_do_not_overflow() {
        let policy = LedgerPolicy {
            sync_deadline_hours: u32::MAX,
            retention_days: u32::MAX,
            ..LedgerPolicy::default()
        };
        let now = Utc::now();
        assert_eq!(policy.deadline_after(now), DateTime::<Utc>::MAX_UTC);
        assert_eq!(policy.retention_cutoff(now), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            LedgerPolicy::default().deadline_after(now),
            now + Duration::days(4)
        );
    }

    #[test]
    fn calendar_date_honours_offset() {
        let at = DateTime::parse_from_rfc3339("2026-05-10T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let utc = LedgerPolicy::default();
        assert_eq!(utc.calendar_date(at).to_string(), "2026-05-10");

        let ist = LedgerPolicy {
            day_offset_minutes: 330,
            ..LedgerPolicy::default()
        };
        assert_eq!(ist.calendar_date(at).to_string(), "2026-05-11");
    }

    #[test]
    fn describe_lists_every_field() {
        let desc = LedgerPolicy::default().describe();
        assert!(desc.contains("sync_deadline_hours: 96"));
        assert!(desc.contains("max_consecutive_failures: 3"));
        assert!(desc.contains("compact_every: 64"));
    }
}
