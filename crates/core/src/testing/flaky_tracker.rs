//! Tracker wrapper that injects storage failures and concurrent writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tracker::{AccountTracker, AttemptRecord, TrackerError};

/// Wraps a real tracker and misbehaves on request.
///
/// - `fail_puts_after(n)` lets `n` more writes through, then fails every
///   write with a database error until `heal()`
/// - `fail_team(team_id)` fails every write for one team
/// - `hold_on_put(email, holder)` makes another attempt grab the identity
///   just before the next write for it, as a concurrent worker would
///
/// Reads always go straight to the inner tracker.
pub struct FlakyTracker {
    inner: Arc<dyn AccountTracker>,
    puts: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    failing_teams: Mutex<Vec<String>>,
    holds: Mutex<HashMap<String, String>>,
}

impl FlakyTracker {
    pub fn new(inner: Arc<dyn AccountTracker>) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
            failing_teams: Mutex::new(Vec::new()),
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Allow `n` more successful writes, then fail.
    pub fn fail_puts_after(&self, n: usize) {
        let seen = self.puts.load(Ordering::SeqCst);
        *self.fail_after.lock().unwrap() = Some(seen + n);
    }

    /// Fail every write from now on.
    pub fn fail_puts(&self) {
        self.fail_puts_after(0);
    }

    /// Fail every write for `team_id`.
    pub fn fail_team(&self, team_id: &str) {
        self.failing_teams.lock().unwrap().push(team_id.to_string());
    }

    /// Stop failing writes.
    pub fn heal(&self) {
        *self.fail_after.lock().unwrap() = None;
        self.failing_teams.lock().unwrap().clear();
    }

    /// Let attempt `holder` claim `email` right before its next write.
    pub fn hold_on_put(&self, email: &str, holder: &str) {
        self.holds
            .lock()
            .unwrap()
            .insert(email.to_string(), holder.to_string());
    }

    /// Writes that reached the inner tracker.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn AccountTracker> {
        &self.inner
    }
}

impl AccountTracker for FlakyTracker {
    fn get(&self, team_id: &str, email: &str) -> Result<Option<AttemptRecord>, TrackerError> {
        self.inner.get(team_id, email)
    }

    fn put(&self, record: &AttemptRecord) -> Result<(), TrackerError> {
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if self.puts.load(Ordering::SeqCst) >= limit {
                return Err(TrackerError::Database("injected write failure".to_string()));
            }
        }

        if self
            .failing_teams
            .lock()
            .unwrap()
            .iter()
            .any(|t| *t == record.team_id)
        {
            return Err(TrackerError::Database(format!(
                "injected write failure for team {}",
                record.team_id
            )));
        }

        let holder = self.holds.lock().unwrap().remove(&record.email);
        if let Some(holder) = holder {
            let foreign = record.in_progress(record.stage, &holder, 1);
            self.inner.put(&foreign)?;
        }

        self.inner.put(record)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        self.inner.list(team_id)
    }

    fn list_incomplete(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        self.inner.list_incomplete(team_id)
    }

    fn history(&self, team_id: &str, email: &str) -> Result<Vec<AttemptRecord>, TrackerError> {
        self.inner.history(team_id, email)
    }

    fn recover_interrupted(
        &self,
        team_id: &str,
        stale_after: Duration,
    ) -> Result<Vec<AttemptRecord>, TrackerError> {
        self.inner.recover_interrupted(team_id, stale_after)
    }

    fn team_ids(&self) -> Result<Vec<String>, TrackerError> {
        self.inner.team_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{AttemptStatus, SqliteAccountTracker, Stage};

    fn flaky() -> FlakyTracker {
        FlakyTracker::new(Arc::new(SqliteAccountTracker::in_memory().unwrap()))
    }

    #[test]
    fn test_fail_after_and_heal() {
        let tracker = flaky();
        let record = AttemptRecord::new("alpha", "a@mock.test", "pw", "run-1");

        tracker.fail_puts_after(1);
        tracker.put(&record).unwrap();
        let next = record.succeeded(Stage::EmailCreated);
        assert!(matches!(tracker.put(&next), Err(TrackerError::Database(_))));
        assert_eq!(tracker.put_count(), 1);

        tracker.heal();
        tracker.put(&next).unwrap();
        let stored = tracker.get("alpha", "a@mock.test").unwrap().unwrap();
        assert_eq!(stored.status, AttemptStatus::Succeeded);
    }

    #[test]
    fn test_fail_team_only_affects_that_team() {
        let tracker = flaky();
        tracker.fail_team("alpha");

        let alpha = AttemptRecord::new("alpha", "a@mock.test", "pw", "run-1");
        let beta = AttemptRecord::new("beta", "b@mock.test", "pw", "run-1");
        assert!(tracker.put(&alpha).is_err());
        assert!(tracker.put(&beta).is_ok());
        assert_eq!(tracker.team_ids().unwrap(), vec!["beta".to_string()]);
    }

    #[test]
    fn test_hold_causes_conflict_once() {
        let tracker = flaky();
        let record = AttemptRecord::new("alpha", "a@mock.test", "pw", "run-1")
            .succeeded(Stage::EmailCreated);
        tracker.put(&record).unwrap();

        tracker.hold_on_put("a@mock.test", "other-worker");
        let claim = record.in_progress(Stage::Invited, "run-1", 1);
        match tracker.put(&claim) {
            Err(TrackerError::AttemptConflict { holder, .. }) => assert_eq!(holder, "other-worker"),
            other => panic!("expected conflict, got {:?}", other),
        }

        let current = tracker.get("alpha", "a@mock.test").unwrap().unwrap();
        assert_eq!(current.attempt_id, "other-worker");
    }
}
