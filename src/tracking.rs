use crate::error::{Result, TrackerError};
use crate::evaluator::next_streak;
use crate::types::{DoseStatus, HistoryEntry, DATE_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Streak and history for one (user, medication)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl TrackingEntry {
    /// Most recent entry recorded for `date`
    pub fn latest_for(&self, date: NaiveDate) -> Option<&HistoryEntry> {
        self.history.iter().rev().find(|e| e.date == date)
    }

    fn has_entry_for(&self, date: NaiveDate) -> bool {
        self.history.iter().any(|e| e.date == date)
    }

    fn pending_for_mut(&mut self, date: NaiveDate) -> Option<&mut HistoryEntry> {
        self.history
            .iter_mut()
            .rev()
            .find(|e| e.date == date && e.status == DoseStatus::Pending)
    }
}

/// Adherence ledger: user -> medication name -> streak and history.
///
/// This is the only owner of streaks and histories; medication records copy
/// from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingStore {
    users: BTreeMap<String, BTreeMap<String, TrackingEntry>>,
}

impl TrackingStore {
    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub fn get(&self, user: &str, medication: &str) -> Option<&TrackingEntry> {
        self.users.get(user).and_then(|meds| meds.get(medication))
    }

    fn get_mut(&mut self, user: &str, medication: &str) -> Option<&mut TrackingEntry> {
        self.users.get_mut(user).and_then(|meds| meds.get_mut(medication))
    }

    /// Create an empty entry if none exists
    pub fn ensure(&mut self, user: &str, medication: &str) -> &mut TrackingEntry {
        self.users
            .entry(user.to_string())
            .or_default()
            .entry(medication.to_string())
            .or_default()
    }

    pub fn latest_for(&self, user: &str, medication: &str, date: NaiveDate) -> Option<&HistoryEntry> {
        self.get(user, medication).and_then(|e| e.latest_for(date))
    }

    /// Add a pending entry when a reminder window opens.
    ///
    /// Returns false without changes if the day already has an entry.
    pub fn append_pending(
        &mut self,
        user: &str,
        medication: &str,
        date: NaiveDate,
        scheduled_time: NaiveTime,
    ) -> bool {
        let entry = self.ensure(user, medication);
        if entry.has_entry_for(date) {
            return false;
        }
        entry.history.push(HistoryEntry {
            date,
            time: scheduled_time,
            status: DoseStatus::Pending,
        });
        true
    }

    /// Resolve the latest pending entry for `date` in place.
    ///
    /// Returns false when there is nothing pending; callers must not assume
    /// the resolution happened.
    pub fn resolve(&mut self, user: &str, medication: &str, date: NaiveDate, status: DoseStatus) -> bool {
        let Some(entry) = self.get_mut(user, medication) else {
            return false;
        };
        let Some(pending) = entry.pending_for_mut(date) else {
            return false;
        };
        pending.status = status;
        entry.streak = next_streak(entry.streak, status);
        true
    }

    /// Log a dose the user took.
    ///
    /// A pending entry for the day is resolved in place (its time becomes the
    /// time taken); otherwise a new entry is appended. A day holds at most one
    /// taken entry.
    pub fn record_taken(
        &mut self,
        user: &str,
        medication: &str,
        date: NaiveDate,
        time: NaiveTime,
        status: DoseStatus,
    ) -> Result<HistoryEntry> {
        if !status.is_taken() {
            return Err(TrackerError::validation(
                "status",
                format!("a taken dose cannot be recorded as {}", status),
            ));
        }

        let entry = self.ensure(user, medication);
        if entry.history.iter().any(|e| e.date == date && e.status.is_taken()) {
            return Err(TrackerError::AlreadyTaken {
                name: medication.to_string(),
                date: date.format(DATE_FORMAT).to_string(),
            });
        }

        let recorded = match entry.pending_for_mut(date) {
            Some(pending) => {
                pending.time = time;
                pending.status = status;
                pending.clone()
            }
            None => {
                let new_entry = HistoryEntry { date, time, status };
                entry.history.push(new_entry.clone());
                new_entry
            }
        };
        entry.streak = next_streak(entry.streak, status);
        Ok(recorded)
    }

    /// Record a dose that was never reminded and never taken.
    ///
    /// Returns false if the day already has an entry.
    pub fn append_missed(
        &mut self,
        user: &str,
        medication: &str,
        date: NaiveDate,
        scheduled_time: NaiveTime,
    ) -> bool {
        let entry = self.ensure(user, medication);
        if entry.has_entry_for(date) {
            return false;
        }
        entry.history.push(HistoryEntry {
            date,
            time: scheduled_time,
            status: DoseStatus::Missed,
        });
        entry.streak = 0;
        true
    }

    /// Drop a medication's ledger
    pub fn remove(&mut self, user: &str, medication: &str) -> Option<TrackingEntry> {
        let meds = self.users.get_mut(user)?;
        let removed = meds.remove(medication);
        if meds.is_empty() {
            self.users.remove(user);
        }
        removed
    }

    /// Delete history older than `cutoff` for every medication of `user`.
    ///
    /// Streaks are left alone.
    pub fn prune_before(&mut self, user: &str, cutoff: NaiveDate) -> usize {
        let Some(meds) = self.users.get_mut(user) else {
            return 0;
        };
        meds.values_mut()
            .map(|entry| {
                let before = entry.history.len();
                entry.history.retain(|e| e.date >= cutoff);
                before - entry.history.len()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut store = TrackingStore::default();
        store.ensure("alice", "Aspirin").streak = 4;
        store.ensure("alice", "Aspirin");
        assert_eq!(store.get("alice", "Aspirin").unwrap().streak, 4);
    }

    #[test]
    fn test_append_pending_suppresses_duplicates() {
        let mut store = TrackingStore::default();
        assert!(store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0)));
        assert!(!store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0)));

        let history = &store.get("alice", "Aspirin").unwrap().history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, DoseStatus::Pending);

        // A new day gets its own entry
        assert!(store.append_pending("alice", "Aspirin", d("2024-03-02"), t(9, 0)));
    }

    #[test]
    fn test_append_pending_skips_resolved_day() {
        let mut store = TrackingStore::default();
        store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(8, 55), DoseStatus::OnTime)
            .unwrap();
        assert!(!store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0)));
    }

    #[test]
    fn test_missed_resets_streak() {
        let mut store = TrackingStore::default();
        store.ensure("alice", "Aspirin").streak = 3;
        store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0));

        assert!(store.resolve("alice", "Aspirin", d("2024-03-01"), DoseStatus::Missed));
        let entry = store.get("alice", "Aspirin").unwrap();
        assert_eq!(entry.streak, 0);
        assert_eq!(entry.history[0].status, DoseStatus::Missed);
    }

    #[test]
    fn test_resolve_without_pending_is_noop() {
        let mut store = TrackingStore::default();
        assert!(!store.resolve("alice", "Aspirin", d("2024-03-01"), DoseStatus::Missed));

        store.ensure("alice", "Aspirin").streak = 2;
        assert!(!store.resolve("alice", "Aspirin", d("2024-03-01"), DoseStatus::Missed));
        assert_eq!(store.get("alice", "Aspirin").unwrap().streak, 2);
    }

    #[test]
    fn test_record_taken_resolves_pending_in_place() {
        let mut store = TrackingStore::default();
        store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0));

        let e = store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(9, 4), DoseStatus::OnTime)
            .unwrap();
        assert_eq!(e.time, t(9, 4));

        let entry = store.get("alice", "Aspirin").unwrap();
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].status, DoseStatus::OnTime);
        assert_eq!(entry.streak, 1);
    }

    #[test]
    fn test_record_taken_at_most_once_per_day() {
        let mut store = TrackingStore::default();
        store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(9, 15), DoseStatus::Late)
            .unwrap();
        let err = store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(9, 20), DoseStatus::Late)
            .unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyTaken { .. }));
        assert_eq!(store.get("alice", "Aspirin").unwrap().history.len(), 1);
    }

    #[test]
    fn test_record_taken_after_missed_appends_without_streak() {
        let mut store = TrackingStore::default();
        store.ensure("alice", "Aspirin").streak = 3;
        store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0));
        store.resolve("alice", "Aspirin", d("2024-03-01"), DoseStatus::Missed);

        store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(9, 45), DoseStatus::Late)
            .unwrap();
        let entry = store.get("alice", "Aspirin").unwrap();
        assert_eq!(entry.streak, 0);
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].status, DoseStatus::Missed);
    }

    #[test]
    fn test_record_taken_rejects_non_taken_status() {
        let mut store = TrackingStore::default();
        assert!(store
            .record_taken("alice", "Aspirin", d("2024-03-01"), t(9, 0), DoseStatus::Missed)
            .is_err());
    }

    #[test]
    fn test_append_missed_backfill() {
        let mut store = TrackingStore::default();
        store.ensure("alice", "Aspirin").streak = 5;
        assert!(store.append_missed("alice", "Aspirin", d("2024-03-01"), t(9, 0)));
        assert!(!store.append_missed("alice", "Aspirin", d("2024-03-01"), t(9, 0)));
        assert_eq!(store.get("alice", "Aspirin").unwrap().streak, 0);
    }

    #[test]
    fn test_prune_before_keeps_streak() {
        let mut store = TrackingStore::default();
        for (day, status) in [("2024-01-01", DoseStatus::OnTime), ("2024-02-01", DoseStatus::OnTime)] {
            store.record_taken("alice", "Aspirin", d(day), t(9, 0), status).unwrap();
        }
        assert_eq!(store.prune_before("alice", d("2024-01-15")), 1);
        let entry = store.get("alice", "Aspirin").unwrap();
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.streak, 2);
        assert_eq!(store.prune_before("bob", d("2024-01-15")), 0);
    }

    #[test]
    fn test_remove_drops_empty_user() {
        let mut store = TrackingStore::default();
        store.ensure("alice", "Aspirin");
        assert!(store.remove("alice", "Aspirin").is_some());
        assert!(store.remove("alice", "Aspirin").is_none());
        assert_eq!(store, TrackingStore::default());
    }

    #[test]
    fn test_json_round_trip() {
        let mut store = TrackingStore::default();
        store.append_pending("alice", "Aspirin", d("2024-03-01"), t(9, 0));
        store.resolve("alice", "Aspirin", d("2024-03-01"), DoseStatus::Missed);
        store
            .record_taken("alice", "Metformin", d("2024-03-01"), t(20, 2), DoseStatus::OnTime)
            .unwrap();

        let json = serde_json::to_string(&store).unwrap();
        assert!(json.starts_with("{\"alice\":"));
        let back: TrackingStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
