//! Per-partition claim table and the claim/release decision logic.
//!
//! A [`ClaimTable`] holds every record of exactly one partition. Callers are
//! responsible for serializing access to a table; given exclusive access,
//! each method performs its read-check-write as one step against a single
//! `now`. The decisions themselves live in [`crate::slots`].
//!
//! # Invariants
//!
//! - At most one record per value. Expired records may linger until the next
//!   access or sweep, but are treated exactly like an absent record.
//! - `by_owner[o]` contains `v` iff `claims[v].owner == o`.

use crate::slots::{self, ClaimSlots};
use crate::{ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult, ClaimValue, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Which fields of a release request must match the stored claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMatch {
    /// The owner alone authorizes a release.
    #[default]
    Owner,
    /// Owner and the original claim id must both match.
    OwnerAndId,
}

impl ReleaseMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseMatch::Owner => "owner",
            ReleaseMatch::OwnerAndId => "owner_and_id",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "owner" => Some(ReleaseMatch::Owner),
            "owner_and_id" | "owner-and-id" => Some(ReleaseMatch::OwnerAndId),
            _ => None,
        }
    }
}

/// Behavioural switches applied by every table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRules {
    /// Drop an owner's other claims in the partition when it claims a new value.
    pub supersede: bool,
    pub release_match: ReleaseMatch,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self {
            supersede: true,
            release_match: ReleaseMatch::Owner,
        }
    }
}

impl ClaimRules {
    pub(crate) fn authorizes(&self, record: &ClaimRecord, id: &ClaimId, owner: &OwnerId) -> bool {
        record.is_held_by(owner)
            && match self.release_match {
                ReleaseMatch::Owner => true,
                ReleaseMatch::OwnerAndId => record.id == *id,
            }
    }
}

/// All claims of a single partition, held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimTable {
    claims: HashMap<ClaimValue, ClaimRecord>,
    by_owner: HashMap<OwnerId, BTreeSet<ClaimValue>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Number of records still live at `now`.
    pub fn live_count(&self, now: Timestamp) -> usize {
        self.claims.values().filter(|r| r.is_live(now)).count()
    }

    /// The live record for `value`, if any.
    pub fn get(&self, value: &ClaimValue, now: Timestamp) -> Option<ClaimRecord> {
        self.claims.get(value).filter(|r| r.is_live(now)).cloned()
    }

    /// Live records held by `owner`, ordered by value.
    pub fn held_by(&self, owner: &OwnerId, now: Timestamp) -> Vec<ClaimRecord> {
        self.by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|value| self.get(value, now))
            .collect()
    }

    /// Claim `record.key.value` for `record.owner`. See [`slots::claim`].
    pub fn claim(
        &mut self,
        record: ClaimRecord,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<ClaimOutcome> {
        slots::claim(self, record, rules, now)
    }

    /// Release the claim on `key.value`. See [`slots::release`].
    pub fn release(
        &mut self,
        key: &ClaimKey,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<bool> {
        slots::release(self, key, id, owner, rules, now)
    }

    /// Release every live claim `owner` holds in this partition.
    pub fn release_owner(
        &mut self,
        id: &ClaimId,
        owner: &OwnerId,
        rules: &ClaimRules,
        now: Timestamp,
    ) -> ClaimResult<usize> {
        slots::release_owner(self, id, owner, rules, now)
    }

    /// Remove every record that is expired at `now`.
    ///
    /// The expiry check happens at removal time under the caller's exclusive
    /// access, so a record refreshed after `now` was taken is never removed.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let expired: Vec<ClaimValue> = self
            .claims
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(value, _)| value.clone())
            .collect();

        for value in &expired {
            self.remove(value);
        }
        expired.len()
    }

    fn insert(&mut self, record: ClaimRecord) {
        let value = record.key.value.clone();
        let owner = record.owner.clone();
        if let Some(previous) = self.claims.insert(value.clone(), record) {
            if previous.owner != owner {
                self.unindex(&previous.owner, &value);
            }
        }
        self.by_owner.entry(owner).or_default().insert(value);
    }

    fn remove(&mut self, value: &ClaimValue) -> Option<ClaimRecord> {
        let record = self.claims.remove(value)?;
        self.unindex(&record.owner, value);
        Some(record)
    }

    fn unindex(&mut self, owner: &OwnerId, value: &ClaimValue) {
        if let Some(values) = self.by_owner.get_mut(owner) {
            values.remove(value);
            if values.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }
}

impl ClaimSlots for ClaimTable {
    fn record(&self, value: &ClaimValue) -> ClaimResult<Option<ClaimRecord>> {
        Ok(self.claims.get(value).cloned())
    }

    fn owned_values(&self, owner: &OwnerId) -> ClaimResult<Vec<ClaimValue>> {
        Ok(self
            .by_owner
            .get(owner)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn store(&mut self, record: ClaimRecord) -> ClaimResult<()> {
        self.insert(record);
        Ok(())
    }

    fn discard(&mut self, value: &ClaimValue) -> ClaimResult<()> {
        self.remove(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClaimError;
    use chrono::Utc;

    const TTL_SECS: i64 = 60;

    fn record(id: &str, value: &str, owner: &str, now: Timestamp) -> ClaimRecord {
        ClaimRecord {
            id: ClaimId::new(id),
            key: ClaimKey::new("posts", value),
            owner: OwnerId::new(owner),
            claimed_at: now,
            expires_at: now + chrono::Duration::seconds(TTL_SECS),
        }
    }

    fn key(value: &str) -> ClaimKey {
        ClaimKey::new("posts", value)
    }

    fn assert_index_consistent(table: &ClaimTable) {
        for (value, record) in &table.claims {
            assert!(
                table.by_owner.get(&record.owner).is_some_and(|s| s.contains(value)),
                "record {} missing from owner index",
                value
            );
        }
        for (owner, values) in &table.by_owner {
            assert!(!values.is_empty(), "empty index entry for {}", owner);
            for value in values {
                assert_eq!(&table.claims[value].owner, owner);
            }
        }
    }

    #[test]
    fn test_claim_creates() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let outcome = table
            .claim(record("c1", "slug-x", "u1", now), &ClaimRules::default(), now)
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Created);
        assert_eq!(table.live_count(now), 1);
        assert_index_consistent(&table);
    }

    #[test]
    fn test_conflict_leaves_table_untouched() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();
        let before = table.clone();

        let err = table
            .claim(record("c2", "a@x", "u2", now), &rules, now)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(table, before);
    }

    #[test]
    fn test_reclaim_by_same_owner_refreshes() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(30);
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();

        let outcome = table
            .claim(record("c2", "a@x", "u1", later), &rules, later)
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Refreshed);
        assert_eq!(table.len(), 1);
        let stored = table.get(&ClaimValue::new("a@x"), later).unwrap();
        assert_eq!(stored.expires_at, later + chrono::Duration::seconds(TTL_SECS));
        assert_eq!(stored.id, ClaimId::new("c2"));
        assert_index_consistent(&table);
    }

    #[test]
    fn test_new_value_supersedes_previous() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "slug-x", "u1", now), &rules, now).unwrap();

        let outcome = table
            .claim(record("c2", "slug-y", "u1", now), &rules, now)
            .unwrap();
        assert_eq!(
            outcome,
            ClaimOutcome::Superseded {
                previous: vec![ClaimValue::new("slug-x")]
            }
        );
        assert!(table.get(&ClaimValue::new("slug-x"), now).is_none());
        assert!(table.get(&ClaimValue::new("slug-y"), now).is_some());
        assert_index_consistent(&table);
    }

    #[test]
    fn test_supersede_disabled_accumulates() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules {
            supersede: false,
            ..ClaimRules::default()
        };
        table.claim(record("c1", "v1", "u1", now), &rules, now).unwrap();
        let outcome = table.claim(record("c2", "v2", "u1", now), &rules, now).unwrap();
        assert_eq!(outcome, ClaimOutcome::Created);
        assert_eq!(table.held_by(&OwnerId::new("u1"), now).len(), 2);
    }

    #[test]
    fn test_supersede_does_not_touch_other_owners() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "v1", "u2", now), &rules, now).unwrap();
        table.claim(record("c2", "v2", "u1", now), &rules, now).unwrap();
        table.claim(record("c3", "v3", "u1", now), &rules, now).unwrap();
        assert!(table.get(&ClaimValue::new("v1"), now).is_some());
        assert!(table.get(&ClaimValue::new("v2"), now).is_none());
    }

    #[test]
    fn test_expired_claim_can_be_taken_over() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        let mut stale = record("c1", "a@x", "u1", now);
        stale.expires_at = now - chrono::Duration::seconds(1);
        table.claim(stale, &rules, now - chrono::Duration::seconds(2)).unwrap();

        let outcome = table
            .claim(record("c2", "a@x", "u2", now), &rules, now)
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::Created);
        assert_eq!(
            table.get(&ClaimValue::new("a@x"), now).unwrap().owner,
            OwnerId::new("u2")
        );
        assert!(table.by_owner.get(&OwnerId::new("u1")).is_none());
        assert_index_consistent(&table);
    }

    #[test]
    fn test_expired_previous_claim_is_not_reported_as_superseded() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        let mut stale = record("c1", "slug-x", "u1", now);
        stale.expires_at = now - chrono::Duration::seconds(1);
        table.claim(stale, &rules, now - chrono::Duration::seconds(2)).unwrap();

        let outcome = table.claim(record("c2", "slug-y", "u1", now), &rules, now).unwrap();
        assert_eq!(outcome, ClaimOutcome::Created);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_by_owner_of_value() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();

        let released = table
            .release(&key("a@x"), &ClaimId::new("other"), &OwnerId::new("u1"), &rules, now)
            .unwrap();
        assert!(released);
        assert!(table.is_empty());
        assert_index_consistent(&table);
    }

    #[test]
    fn test_release_of_absent_is_noop() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let released = table
            .release(&key("a@x"), &ClaimId::new("c1"), &OwnerId::new("u1"), &ClaimRules::default(), now)
            .unwrap();
        assert!(!released);
    }

    #[test]
    fn test_release_by_foreign_owner_rejected() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();

        let err = table
            .release(&key("a@x"), &ClaimId::new("c1"), &OwnerId::new("u2"), &rules, now)
            .unwrap_err();
        assert!(matches!(err, ClaimError::ClaimedByAnotherOwner { .. }));
        assert!(table.get(&ClaimValue::new("a@x"), now).is_some());
    }

    #[test]
    fn test_release_expired_by_foreign_owner_is_noop() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules::default();
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();
        let after = now + chrono::Duration::seconds(TTL_SECS + 1);

        let released = table
            .release(&key("a@x"), &ClaimId::new("c9"), &OwnerId::new("u2"), &rules, after)
            .unwrap();
        assert!(!released);
        assert!(table.is_empty());
    }

    #[test]
    fn test_release_with_id_matching() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules {
            release_match: ReleaseMatch::OwnerAndId,
            ..ClaimRules::default()
        };
        table.claim(record("c1", "a@x", "u1", now), &rules, now).unwrap();

        let err = table
            .release(&key("a@x"), &ClaimId::new("c2"), &OwnerId::new("u1"), &rules, now)
            .unwrap_err();
        assert!(matches!(err, ClaimError::ClaimedByAnotherOwner { .. }));

        assert!(table
            .release(&key("a@x"), &ClaimId::new("c1"), &OwnerId::new("u1"), &rules, now)
            .unwrap());
    }

    #[test]
    fn test_release_owner_clears_all_values() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules {
            supersede: false,
            ..ClaimRules::default()
        };
        table.claim(record("c1", "v1", "u1", now), &rules, now).unwrap();
        table.claim(record("c2", "v2", "u1", now), &rules, now).unwrap();
        table.claim(record("c3", "v3", "u2", now), &rules, now).unwrap();

        let released = table.release_owner(&ClaimId::new("c9"), &OwnerId::new("u1"), &rules, now).unwrap();
        assert_eq!(released, 2);
        assert!(table.held_by(&OwnerId::new("u1"), now).is_empty());
        assert_eq!(table.live_count(now), 1);
        assert_index_consistent(&table);
    }

    #[test]
    fn test_release_owner_with_id_matching_keeps_other_ids() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules {
            supersede: false,
            release_match: ReleaseMatch::OwnerAndId,
        };
        table.claim(record("c1", "v1", "u1", now), &rules, now).unwrap();
        table.claim(record("c2", "v2", "u1", now), &rules, now).unwrap();

        let released = table.release_owner(&ClaimId::new("c1"), &OwnerId::new("u1"), &rules, now).unwrap();
        assert_eq!(released, 1);
        assert!(table.get(&ClaimValue::new("v2"), now).is_some());
    }

    #[test]
    fn test_release_owner_without_claims() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        assert_eq!(
            table
                .release_owner(&ClaimId::new("c1"), &OwnerId::new("u1"), &ClaimRules::default(), now)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_purge_expired_is_conditional() {
        let now = Utc::now();
        let mut table = ClaimTable::new();
        let rules = ClaimRules {
            supersede: false,
            ..ClaimRules::default()
        };
        table.claim(record("c1", "old", "u1", now), &rules, now).unwrap();
        let later = now + chrono::Duration::seconds(TTL_SECS / 2);
        table.claim(record("c2", "new", "u2", later), &rules, later).unwrap();

        let sweep_at = now + chrono::Duration::seconds(TTL_SECS);
        assert_eq!(table.purge_expired(sweep_at), 1);
        assert!(table.get(&ClaimValue::new("new"), sweep_at).is_some());
        assert_eq!(table.len(), 1);
        assert_index_consistent(&table);
    }

    #[test]
    fn test_release_match_parse() {
        assert_eq!(ReleaseMatch::parse("owner"), Some(ReleaseMatch::Owner));
        assert_eq!(ReleaseMatch::parse("OWNER_AND_ID"), Some(ReleaseMatch::OwnerAndId));
        assert_eq!(ReleaseMatch::parse("id"), None);
        assert_eq!(ReleaseMatch::OwnerAndId.as_str(), "owner_and_id");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Claim(u8, u8),
            Release(u8, u8),
            ReleaseOwner(u8),
            Advance(i64),
            Purge,
        }

        fn arb_step() -> impl Strategy<Value = Step> {
            prop_oneof![
                4 => (0u8..4, 0u8..3).prop_map(|(v, o)| Step::Claim(v, o)),
                2 => (0u8..4, 0u8..3).prop_map(|(v, o)| Step::Release(v, o)),
                1 => (0u8..3).prop_map(Step::ReleaseOwner),
                1 => (1i64..90).prop_map(Step::Advance),
                1 => Just(Step::Purge),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            /// The owner index always mirrors the claims map, and no value
            /// ever has a live holder other than the last granted claimant.
            #[test]
            fn prop_index_stays_consistent(
                supersede in any::<bool>(),
                steps in prop::collection::vec(arb_step(), 1..80),
            ) {
                let rules = ClaimRules {
                    supersede,
                    ..ClaimRules::default()
                };
                let mut now = Utc::now();
                let mut table = ClaimTable::new();

                for step in steps {
                    match step {
                        Step::Claim(v, o) => {
                            let value = format!("v{}", v);
                            let owner = format!("u{}", o);
                            let holder = table.get(&ClaimValue::new(value.as_str()), now).map(|r| r.owner);
                            let result = table.claim(record("c", &value, &owner, now), &rules, now);
                            match holder {
                                Some(h) if h.as_str() != owner => prop_assert!(result.is_err()),
                                _ => prop_assert!(result.is_ok()),
                            }
                        }
                        Step::Release(v, o) => {
                            let _ = table.release(
                                &key(&format!("v{}", v)),
                                &ClaimId::new("c"),
                                &OwnerId::new(format!("u{}", o)),
                                &rules,
                                now,
                            );
                        }
                        Step::ReleaseOwner(o) => {
                            table.release_owner(&ClaimId::new("c"), &OwnerId::new(format!("u{}", o)), &rules, now).unwrap();
                        }
                        Step::Advance(secs) => now += chrono::Duration::seconds(secs),
                        Step::Purge => {
                            table.purge_expired(now);
                            prop_assert_eq!(table.len(), table.live_count(now));
                        }
                    }
                    assert_index_consistent(&table);
                    if supersede {
                        for values in table.by_owner.values() {
                            let live = values
                                .iter()
                                .filter(|v| table.get(v, now).is_some())
                                .count();
                            prop_assert!(live <= 1);
                        }
                    }
                }
            }
        }
    }
}
