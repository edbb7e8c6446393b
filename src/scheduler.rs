//! Reminder scheduler.
//!
//! Polls the tracker on a background thread. For each active medication of
//! the session user it runs a small daily state machine:
//!
//! - idle -> window open: the clock is within a minute of the scheduled
//!   time; a pending entry is logged and a reminder sent
//! - window open -> resolved: the dose was taken, or the window plus the
//!   grace period has elapsed and the entry is marked missed
//!
//! A day with no reminder at all (the app was closed) is backfilled as
//! missed once its deadline passes.

use crate::error::Result;
use crate::notify::deliver;
use crate::session::Session;
use crate::tracker::Tracker;
use crate::types::{DoseStatus, Medication};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How close to the scheduled minute a sweep must land to open a window
const MATCH_TOLERANCE_MINUTES: i64 = 1;

const REMINDER_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Resolved,
}

/// Acknowledgment period for one day's dose
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderWindow {
    pub date: NaiveDate,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub state: WindowState,
}

/// What a sweep changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderEvent {
    Opened { medication: String },
    Taken { medication: String },
    Missed { medication: String, date: NaiveDate },
    Backfilled { medication: String, date: NaiveDate },
}

pub struct ReminderScheduler {
    tracker: Arc<Tracker>,
    session: Session,
    windows: HashMap<String, ReminderWindow>,
}

impl ReminderScheduler {
    pub fn new(tracker: Arc<Tracker>, session: Session) -> Self {
        Self {
            tracker,
            session,
            windows: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn window(&self, medication: &str) -> Option<&ReminderWindow> {
        self.windows.get(medication)
    }

    fn window_length(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.tracker.config().reminder_window_minutes)
    }

    fn grace(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.tracker.config().missed_grace_minutes)
    }

    /// Run one sweep over every scheduled medication.
    ///
    /// A failure on one medication is logged and the sweep moves on.
    pub fn tick(&mut self) -> Vec<ReminderEvent> {
        let now = self.tracker.now();
        let mut events = Vec::new();

        self.close_stale_windows(now, &mut events);

        let user = self.session.username().to_string();
        let meds = match self.tracker.scheduled_medications(&user, now.date()) {
            Ok(meds) => meds,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Failed to read medications");
                return events;
            }
        };
        for med in meds {
            match self.check(&med, now) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user = %user, medication = %med.name, error = %e, "Reminder check failed")
                }
            }
        }

        events
    }

    fn check(&mut self, med: &Medication, now: NaiveDateTime) -> Result<Option<ReminderEvent>> {
        let today = now.date();
        let window = self
            .windows
            .get(&med.name)
            .filter(|w| w.date == today)
            .cloned();

        match window {
            None => self.check_idle(med, now),
            Some(w) if w.state == WindowState::Open => self.check_open(med, &w, now),
            Some(_) => Ok(None),
        }
    }

    fn check_idle(&mut self, med: &Medication, now: NaiveDateTime) -> Result<Option<ReminderEvent>> {
        let user = self.session.username().to_string();
        let user = user.as_str();
        let today = now.date();
        let scheduled_at = today.and_time(med.schedule_time);
        let window_length = self.window_length();

        if (now - scheduled_at).num_minutes().abs() <= MATCH_TOLERANCE_MINUTES {
            let appended = self.tracker.open_reminder(user, &med.name, today)?;
            let pending = self
                .tracker
                .entry_for(user, &med.name, today)?
                .is_some_and(|e| e.status == DoseStatus::Pending);

            self.set_window(
                &med.name,
                ReminderWindow {
                    date: today,
                    window_start: scheduled_at,
                    window_end: scheduled_at + window_length,
                    state: if pending {
                        WindowState::Open
                    } else {
                        WindowState::Resolved
                    },
                },
            );

            if !appended {
                return Ok(None);
            }

            tracing::info!(user, medication = %med.name, "Reminder window opened");
            deliver(
                self.tracker.notifier(),
                "Medication Reminder",
                &format!("Time to take {} - {}", med.name, med.dosage),
                REMINDER_NOTIFICATION_TIMEOUT,
            );
            return Ok(Some(ReminderEvent::Opened {
                medication: med.name.clone(),
            }));
        }

        // No window this run (restart or the app was closed); fall back to
        // the deadline implied by the schedule
        let deadline = scheduled_at + window_length + self.grace();
        if now < deadline {
            return Ok(None);
        }

        let event = match self.tracker.entry_for(user, &med.name, today)? {
            Some(e) if e.status == DoseStatus::Pending => {
                if self.tracker.mark_missed(user, &med.name, today)? {
                    tracing::info!(user, medication = %med.name, "Pending dose marked missed");
                    Some(ReminderEvent::Missed {
                        medication: med.name.clone(),
                        date: today,
                    })
                } else {
                    None
                }
            }
            None if self.tracker.config().backfill_missed && med.start_date < today => {
                if self.tracker.backfill_missed(user, &med.name, today)? {
                    tracing::info!(user, medication = %med.name, "Unreminded dose backfilled as missed");
                    Some(ReminderEvent::Backfilled {
                        medication: med.name.clone(),
                        date: today,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        self.set_window(
            &med.name,
            ReminderWindow {
                date: today,
                window_start: scheduled_at,
                window_end: scheduled_at + window_length,
                state: WindowState::Resolved,
            },
        );
        Ok(event)
    }

    fn check_open(
        &mut self,
        med: &Medication,
        window: &ReminderWindow,
        now: NaiveDateTime,
    ) -> Result<Option<ReminderEvent>> {
        let user = self.session.username().to_string();
        let user = user.as_str();
        let entry = self.tracker.entry_for(user, &med.name, window.date)?;

        match entry.map(|e| e.status) {
            Some(DoseStatus::Pending) => {
                if now < window.window_end + self.grace() {
                    return Ok(None);
                }
                let missed = self.tracker.mark_missed(user, &med.name, window.date)?;
                self.resolve_window(&med.name);
                if missed {
                    tracing::info!(user, medication = %med.name, "Dose missed");
                    return Ok(Some(ReminderEvent::Missed {
                        medication: med.name.clone(),
                        date: window.date,
                    }));
                }
                Ok(None)
            }
            Some(status) if status.is_taken() => {
                self.resolve_window(&med.name);
                Ok(Some(ReminderEvent::Taken {
                    medication: med.name.clone(),
                }))
            }
            _ => {
                self.resolve_window(&med.name);
                Ok(None)
            }
        }
    }

    /// Settle windows from earlier days (a dose scheduled just before midnight)
    fn close_stale_windows(&mut self, now: NaiveDateTime, events: &mut Vec<ReminderEvent>) {
        let today = now.date();
        let grace = self.grace();
        let stale: Vec<(String, ReminderWindow)> = self
            .windows
            .iter()
            .filter(|(_, w)| w.date < today)
            .map(|(name, w)| (name.clone(), w.clone()))
            .collect();

        for (name, window) in stale {
            if window.state == WindowState::Open {
                if now < window.window_end + grace {
                    continue;
                }
                match self
                    .tracker
                    .mark_missed(self.session.username(), &name, window.date)
                {
                    Ok(true) => events.push(ReminderEvent::Missed {
                        medication: name.clone(),
                        date: window.date,
                    }),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(medication = %name, error = %e, "Failed to close stale window");
                        continue;
                    }
                }
            }
            self.windows.remove(&name);
        }
    }

    fn set_window(&mut self, medication: &str, window: ReminderWindow) {
        self.windows.insert(medication.to_string(), window);
    }

    fn resolve_window(&mut self, medication: &str) {
        if let Some(w) = self.windows.get_mut(medication) {
            w.state = WindowState::Resolved;
        }
    }

    fn run(&mut self, stop: &Receiver<()>, interval: Duration) {
        loop {
            let events = self.tick();
            if !events.is_empty() {
                tracing::debug!(count = events.len(), "Reminder sweep applied changes");
            }

            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Err(e) = self.tracker.flush() {
            tracing::error!(error = %e, "Failed to flush ledger on shutdown");
        }
        tracing::info!(user = self.session.username(), "Reminder scheduler stopped");
    }
}

/// Handle to the background reminder thread.
///
/// `stop()` or dropping the handle signals the thread and waits for its
/// final flush.
pub struct SchedulerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Reminder thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start polling for `session`'s medications on a background thread
pub fn start(tracker: Arc<Tracker>, session: Session) -> SchedulerHandle {
    let interval = Duration::from_secs(tracker.config().poll_interval_secs.max(1));
    let (stop_tx, stop_rx) = mpsc::channel();
    let mut scheduler = ReminderScheduler::new(tracker, session);

    let thread = std::thread::spawn(move || {
        tracing::info!(
            user = scheduler.session.username(),
            interval_secs = interval.as_secs(),
            "Reminder scheduler started"
        );
        scheduler.run(&stop_rx, interval);
    });

    SchedulerHandle {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tests::{alice, fixture, form, Fixture};

    fn setup(now: &str, schedule: &str) -> (Fixture, Arc<Tracker>) {
        let f = fixture(now);
        let tracker = Arc::new(f.reopen());
        tracker
            .add_medication(&alice(), "alice", form("Aspirin", schedule))
            .unwrap();
        (f, tracker)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn status_on(tracker: &Tracker, day: &str) -> Option<DoseStatus> {
        tracker
            .entry_for("alice", "Aspirin", date(day))
            .unwrap()
            .map(|e| e.status)
    }

    #[test]
    fn test_window_opens_once() {
        let (f, tracker) = setup("2024-03-01 08:59", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());

        let events = scheduler.tick();
        assert_eq!(
            events,
            vec![ReminderEvent::Opened {
                medication: "Aspirin".into()
            }]
        );
        assert_eq!(status_on(&tracker, "2024-03-01"), Some(DoseStatus::Pending));
        assert_eq!(f.notifier.messages(), vec!["Time to take Aspirin - 10mg"]);

        f.clock.set("2024-03-01 09:00");
        assert!(scheduler.tick().is_empty());
        let history = tracker.history(&alice(), "alice", "Aspirin").unwrap().history;
        assert_eq!(history.len(), 1);
        assert_eq!(f.notifier.messages().len(), 1);

        let window = scheduler.window("Aspirin").unwrap();
        assert_eq!(window.state, WindowState::Open);
        assert_eq!(window.window_start.time().to_string(), "09:00:00");
        assert_eq!(window.window_end - window.window_start, ChronoDuration::minutes(10));
    }

    #[test]
    fn test_deadline_does_not_depend_on_poll_time() {
        // First poll lands a minute early
        let (f, tracker) = setup("2024-03-01 08:59", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();

        f.clock.set("2024-03-01 09:19");
        assert!(scheduler.tick().is_empty());
        assert_eq!(status_on(&tracker, "2024-03-01"), Some(DoseStatus::Pending));

        f.clock.set("2024-03-01 09:20");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Missed {
                medication: "Aspirin".into(),
                date: date("2024-03-01")
            }]
        );

        // A restarted scheduler reaches the same deadline
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        ReminderScheduler::new(tracker.clone(), alice()).tick();
        let mut restarted = ReminderScheduler::new(tracker.clone(), alice());
        f.clock.set("2024-03-01 09:19");
        assert!(restarted.tick().is_empty());
        f.clock.set("2024-03-01 09:20");
        assert_eq!(restarted.tick().len(), 1);
    }

    #[test]
    fn test_take_from_another_process_is_seen() {
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();

        // `medtrack take` runs as its own process with its own tracker
        f.clock.set("2024-03-01 09:05");
        let entry = f.reopen().take_medication(&alice(), "Aspirin").unwrap();
        assert_eq!(entry.status, DoseStatus::OnTime);

        f.clock.set("2024-03-01 09:21");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Taken {
                medication: "Aspirin".into()
            }]
        );

        let on_disk = f.reopen().history(&alice(), "alice", "Aspirin").unwrap();
        assert_eq!(on_disk.streak, 1);
        assert_eq!(on_disk.history.len(), 1);
        assert_eq!(on_disk.history[0].status, DoseStatus::OnTime);
    }

    #[test]
    fn test_medication_added_elsewhere_is_scheduled() {
        let (f, tracker) = setup("2024-03-01 08:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        assert!(scheduler.tick().is_empty());

        f.reopen()
            .add_medication(&alice(), "alice", form("Statin", "08:30"))
            .unwrap();

        f.clock.set("2024-03-01 08:30");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Opened {
                medication: "Statin".into()
            }]
        );
        let names: Vec<_> = f
            .reopen()
            .medications(&alice(), "alice")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Aspirin", "Statin"]);
    }

    #[test]
    fn test_no_window_outside_tolerance() {
        let (_f, tracker) = setup("2024-03-01 08:58", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        assert!(scheduler.tick().is_empty());
        assert!(scheduler.window("Aspirin").is_none());
    }

    #[test]
    fn test_window_closes_as_missed_after_grace() {
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();

        f.clock.set("2024-03-01 09:19");
        assert!(scheduler.tick().is_empty());
        assert_eq!(status_on(&tracker, "2024-03-01"), Some(DoseStatus::Pending));

        // Polls need not land on an exact minute
        f.clock.set("2024-03-01 09:47");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Missed {
                medication: "Aspirin".into(),
                date: date("2024-03-01")
            }]
        );
        assert_eq!(status_on(&tracker, "2024-03-01"), Some(DoseStatus::Missed));
        assert_eq!(scheduler.window("Aspirin").unwrap().state, WindowState::Resolved);

        f.clock.set("2024-03-01 10:30");
        assert!(scheduler.tick().is_empty());
    }

    #[test]
    fn test_take_during_window_resolves_it() {
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();

        f.clock.set("2024-03-01 09:06");
        let entry = tracker.take_medication(&alice(), "Aspirin").unwrap();
        assert_eq!(entry.status, DoseStatus::OnTime);

        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Taken {
                medication: "Aspirin".into()
            }]
        );

        f.clock.set("2024-03-01 09:30");
        assert!(scheduler.tick().is_empty());
        let med = tracker.medication(&alice(), "alice", "Aspirin").unwrap();
        assert_eq!(med.streak, 1);
        assert_eq!(med.history.len(), 1);
    }

    #[test]
    fn test_taken_early_suppresses_reminder() {
        let (f, tracker) = setup("2024-03-01 08:52", "09:00");
        tracker.take_medication(&alice(), "Aspirin").unwrap();

        f.clock.set("2024-03-01 09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        assert!(scheduler.tick().is_empty());
        assert_eq!(scheduler.window("Aspirin").unwrap().state, WindowState::Resolved);
        assert_eq!(f.notifier.titles(), vec!["Medication Taken"]);
    }

    #[test]
    fn test_pending_entry_recovered_after_restart() {
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        ReminderScheduler::new(tracker.clone(), alice()).tick();

        f.clock.set("2024-03-01 09:25");
        let mut restarted = ReminderScheduler::new(tracker.clone(), alice());
        assert_eq!(
            restarted.tick(),
            vec![ReminderEvent::Missed {
                medication: "Aspirin".into(),
                date: date("2024-03-01")
            }]
        );
        assert_eq!(tracker.medication(&alice(), "alice", "Aspirin").unwrap().streak, 0);
    }

    #[test]
    fn test_backfill_for_unseen_day() {
        let (f, tracker) = setup("2024-03-01 08:00", "09:00");
        f.clock.set("2024-03-02 12:00");

        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Backfilled {
                medication: "Aspirin".into(),
                date: date("2024-03-02")
            }]
        );
        assert_eq!(status_on(&tracker, "2024-03-02"), Some(DoseStatus::Missed));
        assert!(scheduler.tick().is_empty());
    }

    #[test]
    fn test_no_backfill_on_start_day() {
        let (_f, tracker) = setup("2024-03-01 12:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        assert!(scheduler.tick().is_empty());
        assert_eq!(status_on(&tracker, "2024-03-01"), None);
    }

    #[test]
    fn test_window_spanning_midnight() {
        let (f, tracker) = setup("2024-03-01 23:55", "23:55");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();

        f.clock.set("2024-03-02 00:05");
        assert!(scheduler.tick().is_empty());

        f.clock.set("2024-03-02 00:20");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Missed {
                medication: "Aspirin".into(),
                date: date("2024-03-01")
            }]
        );
        assert!(scheduler.window("Aspirin").is_none());
    }

    #[test]
    fn test_next_day_starts_fresh_cycle() {
        let (f, tracker) = setup("2024-03-01 09:00", "09:00");
        let mut scheduler = ReminderScheduler::new(tracker.clone(), alice());
        scheduler.tick();
        f.clock.set("2024-03-01 09:02");
        tracker.take_medication(&alice(), "Aspirin").unwrap();
        scheduler.tick();

        f.clock.set("2024-03-02 09:01");
        assert_eq!(
            scheduler.tick(),
            vec![ReminderEvent::Opened {
                medication: "Aspirin".into()
            }]
        );
        assert_eq!(status_on(&tracker, "2024-03-02"), Some(DoseStatus::Pending));
    }

    #[test]
    fn test_background_thread_stops_and_flushes() {
        let (_f, tracker) = setup("2024-03-01 09:00", "09:00");
        let handle = start(tracker.clone(), alice());
        handle.stop();

        assert_eq!(status_on(&tracker, "2024-03-01"), Some(DoseStatus::Pending));
        assert!(tracker.data_path().join("medication_tracking.json").exists());
    }
}
