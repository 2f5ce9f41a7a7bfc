use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

/// Calendar day a quota row belongs to. The boundary convention is fixed:
/// UTC dates, never tenant-local time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaDay(pub String);

impl QuotaDay {
    pub fn from_timestamp(when: DateTime<Utc>) -> Self {
        Self(when.format("%Y-%m-%d").to_string())
    }
}

impl std::fmt::Display for QuotaDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuotaRecord {
    pub tenant_id: TenantId,
    pub day: QuotaDay,
    pub used: u32,
    pub limit: u32,
}

/// Outcome of a reservation. Partial allowance is deliberate product
/// behavior: a batch of `desired` against a smaller remainder admits
/// `min(desired, remaining)` units instead of refusing outright. Callers
/// that need exactly `desired` units compare `allowed` themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: u32,
    pub used_after: u32,
    pub remaining_after: u32,
    pub limit: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
}

impl QuotaSnapshot {
    pub fn new(limit: u32, used: u32) -> Self {
        Self { limit, used, remaining: limit.saturating_sub(used) }
    }
}

/// Pure admission arithmetic shared by the SQL and in-memory stores.
pub fn admit(used: u32, limit: u32, desired: u32) -> QuotaDecision {
    let remaining = limit.saturating_sub(used);
    let allowed = desired.min(remaining);
    let used_after = used + allowed;
    QuotaDecision { allowed, used_after, remaining_after: limit - used_after, limit }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::{admit, QuotaDay, QuotaSnapshot};

    #[test]
    fn day_key_is_the_utc_calendar_date() {
        let when = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).unwrap();
        assert_eq!(QuotaDay::from_timestamp(when).0, "2026-03-14");
    }

    #[test]
    fn full_grant_when_budget_covers_desired() {
        let decision = admit(0, 10, 4);
        assert_eq!(decision.allowed, 4);
        assert_eq!(decision.used_after, 4);
        assert_eq!(decision.remaining_after, 6);
    }

    #[test]
    fn partial_grant_admits_what_fits() {
        let decision = admit(7, 10, 5);
        assert_eq!(decision.allowed, 3);
        assert_eq!(decision.used_after, 10);
        assert_eq!(decision.remaining_after, 0);
    }

    #[test]
    fn exhausted_budget_grants_zero() {
        let decision = admit(10, 10, 1);
        assert_eq!(decision.allowed, 0);
        assert_eq!(decision.used_after, 10);
        assert_eq!(decision.remaining_after, 0);
    }

    #[test]
    fn used_never_exceeds_limit_across_any_sequence() {
        let mut used = 0;
        for desired in [3, 9, 2, 8, 1, 1, 1] {
            let decision = admit(used, 12, desired);
            used = decision.used_after;
            assert!(used <= 12);
        }
        assert_eq!(used, 12);
    }

    #[test]
    fn snapshot_saturates_instead_of_underflowing() {
        let snapshot = QuotaSnapshot::new(5, 9);
        assert_eq!(snapshot.remaining, 0);
    }
}
