//! Claim and release decisions over a partition's record slots.
//!
//! The rules live here once. A backend exposes one partition's records and
//! its owner index through [`ClaimSlots`], with point access only, and the
//! functions below run the read-check-write against it. The caller provides
//! the exclusion (a shard guard, a database write transaction) and a single
//! `now` for the whole decision.
//!
//! Every decision touches the claimed value plus the owner's own records,
//! never the rest of the partition.

use crate::{ClaimError, ClaimId, ClaimKey, ClaimOutcome, ClaimRecord, ClaimResult, ClaimRules, ClaimValue, OwnerId, Timestamp};

/// Point access to the records of one partition.
///
/// Implementations keep their owner index in step with `store` and
/// `discard`. Expired records are returned like live ones; liveness is
/// decided by the caller.
pub trait ClaimSlots {
    /// The stored record for `value`, if any.
    fn record(&self, value: &ClaimValue) -> ClaimResult<Option<ClaimRecord>>;

    /// Every value `owner` has a stored record for.
    fn owned_values(&self, owner: &OwnerId) -> ClaimResult<Vec<ClaimValue>>;

    /// Store `record` under its value.
    ///
    /// Only called when the value has no record or one held by the same
    /// owner.
    fn store(&mut self, record: ClaimRecord) -> ClaimResult<()>;

    /// Remove the record for `value` along with its index entry.
    fn discard(&mut self, value: &ClaimValue) -> ClaimResult<()>;
}

/// Claim `record.key.value` for `record.owner`.
///
/// - Live claim by another owner: `Conflict`, nothing changes.
/// - Live claim by the same owner: replaced by `record` (fresh expiry).
/// - Otherwise: the owner's other claims in the partition are dropped when
///   `rules.supersede` is set, then `record` is stored.
pub fn claim<S: ClaimSlots + ?Sized>(
    slots: &mut S,
    record: ClaimRecord,
    rules: &ClaimRules,
    now: Timestamp,
) -> ClaimResult<ClaimOutcome> {
    if let Some(existing) = slots.record(&record.key.value)? {
        if existing.is_live(now) {
            if !existing.is_held_by(&record.owner) {
                return Err(ClaimError::Conflict { key: record.key });
            }
            slots.store(record)?;
            return Ok(ClaimOutcome::Refreshed);
        }
        slots.discard(&record.key.value)?;
    }

    let previous = if rules.supersede {
        let value = record.key.value.clone();
        drop_owner_claims(slots, &record.owner, now, |r| r.key.value != value)?
    } else {
        Vec::new()
    };

    slots.store(record)?;

    if previous.is_empty() {
        Ok(ClaimOutcome::Created)
    } else {
        Ok(ClaimOutcome::Superseded { previous })
    }
}

/// Release the claim on `key.value`.
///
/// Returns `Ok(true)` if a live claim was removed and `Ok(false)` if there
/// was nothing live to release. A live claim the caller is not authorized to
/// release is left in place and reported as `ClaimedByAnotherOwner`.
pub fn release<S: ClaimSlots + ?Sized>(
    slots: &mut S,
    key: &ClaimKey,
    id: &ClaimId,
    owner: &OwnerId,
    rules: &ClaimRules,
    now: Timestamp,
) -> ClaimResult<bool> {
    let Some(existing) = slots.record(&key.value)? else {
        return Ok(false);
    };

    if existing.is_expired(now) {
        slots.discard(&key.value)?;
        return Ok(false);
    }

    if !rules.authorizes(&existing, id, owner) {
        return Err(ClaimError::ClaimedByAnotherOwner { key: key.clone() });
    }

    slots.discard(&key.value)?;
    Ok(true)
}

/// Release every live claim `owner` holds in the partition.
///
/// With `ReleaseMatch::OwnerAndId` only claims made under `id` are released.
/// Returns the number of live claims removed.
pub fn release_owner<S: ClaimSlots + ?Sized>(
    slots: &mut S,
    id: &ClaimId,
    owner: &OwnerId,
    rules: &ClaimRules,
    now: Timestamp,
) -> ClaimResult<usize> {
    let dropped = drop_owner_claims(slots, owner, now, |r| rules.authorizes(r, id, owner))?;
    Ok(dropped.len())
}

/// Drop the owner's records selected by `select`, returning the values of
/// the live ones. Expired records of the owner are purged along the way.
fn drop_owner_claims<S: ClaimSlots + ?Sized>(
    slots: &mut S,
    owner: &OwnerId,
    now: Timestamp,
    select: impl Fn(&ClaimRecord) -> bool,
) -> ClaimResult<Vec<ClaimValue>> {
    let mut dropped = Vec::new();
    for value in slots.owned_values(owner)? {
        match slots.record(&value)? {
            Some(record) if record.is_expired(now) => slots.discard(&value)?,
            Some(record) if select(&record) => {
                slots.discard(&value)?;
                dropped.push(value);
            }
            _ => {}
        }
    }
    Ok(dropped)
}
