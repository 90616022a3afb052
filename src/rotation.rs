use chrono::{NaiveDate, Utc};
use thiserror::Error;

/// A slot is skipped once it fails this many times in a row.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RotationError {
    #[error("no provider credentials configured")]
    EmptyPool,
    #[error("all provider credentials have reached the daily quota")]
    QuotaExhausted,
}

#[derive(Debug)]
struct CredentialSlot {
    credential: String,
    usage_count: u32,
    last_reset: NaiveDate,
    consecutive_failures: u32,
}

/// A credential handed out for one provider call. `slot_index` is passed back
/// to [`KeyPool::mark_success`] or [`KeyPool::mark_failure`] afterwards.
#[derive(Debug, Clone)]
pub struct Lease {
    pub credential: String,
    pub slot_index: usize,
}

/// Round-robin pool of provider credentials with per-day usage tracking.
///
/// Usage counters reset lazily: every acquire compares each slot's reset date
/// against today and zeroes stale counters, so no timer is needed as long as
/// the pool is touched at all. Slots that fail three times in a row are
/// skipped; when every under-quota slot is in that state the failure counters
/// are cleared wholesale and selection runs once more, on the assumption that
/// a burst of provider errors is more likely transient than three credentials
/// going bad at once.
#[derive(Debug)]
pub struct KeyPool {
    slots: Vec<CredentialSlot>,
    cursor: usize,
    daily_quota: u32,
}

impl KeyPool {
    pub fn new(credentials: Vec<String>, daily_quota: u32) -> Result<Self, RotationError> {
        if credentials.is_empty() {
            return Err(RotationError::EmptyPool);
        }

        let today = Utc::now().date_naive();
        let slots = credentials
            .into_iter()
            .map(|credential| CredentialSlot {
                credential,
                usage_count: 0,
                last_reset: today,
                consecutive_failures: 0,
            })
            .collect();

        Ok(Self {
            slots,
            cursor: 0,
            daily_quota,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn acquire(&mut self) -> Result<Lease, RotationError> {
        self.acquire_on(Utc::now().date_naive())
    }

    /// Select the next eligible credential as of `today`.
    ///
    /// Scans round-robin from the cursor for a slot under quota with fewer
    /// than three consecutive failures, counts the use against it, and moves
    /// the cursor past it.
    pub fn acquire_on(&mut self, today: NaiveDate) -> Result<Lease, RotationError> {
        for slot in &mut self.slots {
            if slot.last_reset < today {
                slot.usage_count = 0;
                slot.last_reset = today;
            }
        }

        if let Some(lease) = self.try_select() {
            return Ok(lease);
        }

        if self
            .slots
            .iter()
            .all(|slot| slot.usage_count >= self.daily_quota)
        {
            return Err(RotationError::QuotaExhausted);
        }

        // Some slot is under quota but failure-blocked. Clear the counters
        // and give the whole pool one more chance.
        for slot in &mut self.slots {
            slot.consecutive_failures = 0;
        }
        self.try_select().ok_or(RotationError::QuotaExhausted)
    }

    fn try_select(&mut self) -> Option<Lease> {
        let len = self.slots.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let slot = &mut self.slots[index];
            if slot.consecutive_failures < MAX_CONSECUTIVE_FAILURES
                && slot.usage_count < self.daily_quota
            {
                slot.usage_count += 1;
                self.cursor = (index + 1) % len;
                return Some(Lease {
                    credential: slot.credential.clone(),
                    slot_index: index,
                });
            }
        }
        None
    }

    pub fn mark_success(&mut self, slot_index: usize) {
        if let Some(slot) = self.slots.get_mut(slot_index) {
            slot.consecutive_failures = 0;
        }
    }

    pub fn mark_failure(&mut self, slot_index: usize) {
        if let Some(slot) = self.slots.get_mut(slot_index) {
            slot.consecutive_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn pool(n: usize, quota: u32) -> KeyPool {
        let credentials = (0..n).map(|i| format!("key-{i}")).collect();
        KeyPool::new(credentials, quota).unwrap()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[test]
    fn rejects_empty_credential_list() {
        assert_eq!(
            KeyPool::new(Vec::new(), 10).unwrap_err(),
            RotationError::EmptyPool
        );
    }

    #[test]
    fn spreads_usage_round_robin() {
        let mut pool = pool(3, 10);
        let picks: Vec<usize> = (0..6)
            .map(|_| pool.acquire_on(today()).unwrap().slot_index)
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn exhausted_pool_reports_quota_error() {
        let mut pool = pool(2, 3);
        for _ in 0..6 {
            pool.acquire_on(today()).unwrap();
        }
        assert_eq!(
            pool.acquire_on(today()).unwrap_err(),
            RotationError::QuotaExhausted
        );
    }

    #[test]
    fn skips_slots_with_three_consecutive_failures() {
        let mut pool = pool(2, 10);
        for _ in 0..3 {
            pool.mark_failure(0);
        }
        // Slot 0 is blocked, so every pick lands on slot 1.
        for _ in 0..4 {
            assert_eq!(pool.acquire_on(today()).unwrap().slot_index, 1);
        }
    }

    #[test]
    fn success_clears_the_failure_streak() {
        let mut pool = pool(2, 10);
        pool.mark_failure(0);
        pool.mark_failure(0);
        pool.mark_success(0);
        assert_eq!(pool.acquire_on(today()).unwrap().slot_index, 0);
    }

    #[test]
    fn soft_reset_recovers_a_fully_failed_pool() {
        let mut pool = pool(2, 10);
        for index in 0..2 {
            for _ in 0..3 {
                pool.mark_failure(index);
            }
        }
        // Nothing is eligible, but quota headroom remains, so the failure
        // counters are cleared and selection succeeds.
        let lease = pool.acquire_on(today()).unwrap();
        assert_eq!(lease.slot_index, 0);
    }

    #[test]
    fn quota_exhaustion_wins_over_soft_reset() {
        let mut pool = pool(2, 1);
        pool.acquire_on(today()).unwrap();
        pool.acquire_on(today()).unwrap();
        for _ in 0..3 {
            pool.mark_failure(0);
        }
        assert_eq!(
            pool.acquire_on(today()).unwrap_err(),
            RotationError::QuotaExhausted
        );
    }

    #[test]
    fn usage_resets_when_the_date_advances() {
        let mut pool = pool(2, 1);
        let day_one = today();
        pool.acquire_on(day_one).unwrap();
        pool.acquire_on(day_one).unwrap();
        assert_eq!(
            pool.acquire_on(day_one).unwrap_err(),
            RotationError::QuotaExhausted
        );

        let day_two = day_one.checked_add_days(Days::new(1)).unwrap();
        let lease = pool.acquire_on(day_two).unwrap();
        assert_eq!(lease.slot_index, 0);
        assert!(pool.acquire_on(day_two).is_ok());
    }

    #[test]
    fn failure_counters_survive_the_daily_reset() {
        let mut pool = pool(2, 1);
        for _ in 0..3 {
            pool.mark_failure(0);
        }
        let day_two = today().checked_add_days(Days::new(1)).unwrap();
        // Usage resets with the date, but slot 0 is still failure-blocked.
        assert_eq!(pool.acquire_on(day_two).unwrap().slot_index, 1);
    }
}
