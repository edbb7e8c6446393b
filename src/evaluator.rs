//! Dose classification.
//!
//! Everything here is pure: the caller supplies the schedule, the current time
//! and today's ledger entry, and gets back a verdict. Deltas are same-day minute
//! differences with no wraparound at midnight.

use crate::types::{DoseStatus, HistoryEntry};
use chrono::{NaiveTime, Timelike};

/// A dose within this many minutes of its schedule is on time.
pub const ON_TIME_TOLERANCE_MINUTES: i64 = 10;

/// Where a dose stands right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseState {
    NotYetDue,
    DueNow,
    Overdue,
    TakenOnTime,
    TakenLate,
    Missed,
}

impl DoseState {
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::NotYetDue => "pending",
            Self::DueNow => "due now",
            Self::Overdue | Self::TakenLate => "late",
            Self::TakenOnTime => "on_time",
            Self::Missed => "missed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: DoseState,
    pub is_actionable: bool,
}

impl Classification {
    pub fn status_text(&self) -> &'static str {
        self.state.status_text()
    }
}

/// Result of logging a dose at a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakenAssessment {
    pub status: DoseStatus,
    pub streak_increment: u32,
    pub delta_minutes: i64,
}

fn minutes_of_day(t: NaiveTime) -> i64 {
    (t.hour() * 60 + t.minute()) as i64
}

/// Signed minutes from the scheduled time to `now`
pub fn delta_minutes(schedule_time: NaiveTime, now: NaiveTime) -> i64 {
    minutes_of_day(now) - minutes_of_day(schedule_time)
}

/// Classify today's dose
pub fn classify(
    schedule_time: NaiveTime,
    now: NaiveTime,
    today: Option<&HistoryEntry>,
) -> Classification {
    match today.map(|e| e.status) {
        Some(DoseStatus::OnTime) => {
            return Classification {
                state: DoseState::TakenOnTime,
                is_actionable: false,
            }
        }
        Some(DoseStatus::Late) => {
            return Classification {
                state: DoseState::TakenLate,
                is_actionable: false,
            }
        }
        Some(DoseStatus::Missed) => {
            return Classification {
                state: DoseState::Missed,
                is_actionable: true,
            }
        }
        Some(DoseStatus::Pending) | None => {}
    }

    let delta = delta_minutes(schedule_time, now);
    if delta.abs() <= ON_TIME_TOLERANCE_MINUTES {
        Classification {
            state: DoseState::DueNow,
            is_actionable: true,
        }
    } else if delta > ON_TIME_TOLERANCE_MINUTES {
        Classification {
            state: DoseState::Overdue,
            is_actionable: true,
        }
    } else {
        Classification {
            state: DoseState::NotYetDue,
            is_actionable: false,
        }
    }
}

/// Status and streak effect of taking a dose at `now`.
///
/// Late doses keep the streak as it is; only a missed dose resets it.
pub fn assess_taken(schedule_time: NaiveTime, now: NaiveTime) -> TakenAssessment {
    let delta = delta_minutes(schedule_time, now);
    let status = if delta.abs() <= ON_TIME_TOLERANCE_MINUTES {
        DoseStatus::OnTime
    } else {
        DoseStatus::Late
    };

    TakenAssessment {
        status,
        streak_increment: if status == DoseStatus::OnTime { 1 } else { 0 },
        delta_minutes: delta,
    }
}

/// Streak after a resolution with the given status
pub fn next_streak(current: u32, status: DoseStatus) -> u32 {
    match status {
        DoseStatus::OnTime => current.saturating_add(1),
        DoseStatus::Missed => 0,
        DoseStatus::Late | DoseStatus::Pending => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn entry(status: DoseStatus) -> HistoryEntry {
        HistoryEntry {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            time: t(9, 0),
            status,
        }
    }

    #[test]
    fn test_due_now_within_tolerance() {
        let c = classify(t(9, 0), t(9, 5), None);
        assert_eq!(c.status_text(), "due now");
        assert!(c.is_actionable);

        let early = classify(t(9, 0), t(8, 50), None);
        assert_eq!(early.state, DoseState::DueNow);
    }

    #[test]
    fn test_tolerance_boundary() {
        assert_eq!(classify(t(9, 0), t(9, 10), None).state, DoseState::DueNow);
        assert_eq!(classify(t(9, 0), t(9, 11), None).state, DoseState::Overdue);
        assert_eq!(classify(t(9, 0), t(8, 49), None).state, DoseState::NotYetDue);

        assert_eq!(assess_taken(t(9, 0), t(9, 10)).status, DoseStatus::OnTime);
        assert_eq!(assess_taken(t(9, 0), t(9, 11)).status, DoseStatus::Late);
    }

    #[test]
    fn test_not_yet_due_is_not_actionable() {
        let c = classify(t(21, 0), t(9, 0), None);
        assert_eq!(c.status_text(), "pending");
        assert!(!c.is_actionable);
    }

    #[test]
    fn test_pending_entry_falls_through_to_timing() {
        let pending = entry(DoseStatus::Pending);
        let c = classify(t(9, 0), t(9, 15), Some(&pending));
        assert_eq!(c.state, DoseState::Overdue);
        assert!(c.is_actionable);
    }

    #[test]
    fn test_taken_entries_are_final() {
        let on_time = entry(DoseStatus::OnTime);
        let c = classify(t(9, 0), t(9, 2), Some(&on_time));
        assert_eq!(c.status_text(), "on_time");
        assert!(!c.is_actionable);

        let late = entry(DoseStatus::Late);
        let c = classify(t(9, 0), t(12, 0), Some(&late));
        assert_eq!(c.status_text(), "late");
        assert!(!c.is_actionable);
    }

    #[test]
    fn test_missed_stays_actionable() {
        let missed = entry(DoseStatus::Missed);
        let c = classify(t(9, 0), t(9, 30), Some(&missed));
        assert_eq!(c.status_text(), "missed");
        assert!(c.is_actionable);
    }

    #[test]
    fn test_late_dose_has_no_increment() {
        let a = assess_taken(t(9, 0), t(9, 15));
        assert_eq!(a.status, DoseStatus::Late);
        assert_eq!(a.streak_increment, 0);
        assert_eq!(a.delta_minutes, 15);
    }

    #[test]
    fn test_streak_rules() {
        assert_eq!(next_streak(3, DoseStatus::OnTime), 4);
        assert_eq!(next_streak(3, DoseStatus::Late), 3);
        assert_eq!(next_streak(3, DoseStatus::Missed), 0);
        assert_eq!(next_streak(0, DoseStatus::Missed), 0);
        assert_eq!(next_streak(u32::MAX, DoseStatus::OnTime), u32::MAX);
    }

    #[test]
    fn test_streak_never_negative_over_any_sequence() {
        let statuses = [
            DoseStatus::Missed,
            DoseStatus::OnTime,
            DoseStatus::Late,
            DoseStatus::Missed,
            DoseStatus::Missed,
            DoseStatus::OnTime,
        ];
        let mut streak = 0u32;
        for s in statuses {
            streak = next_streak(streak, s);
            if s == DoseStatus::Missed {
                assert_eq!(streak, 0);
            }
        }
        assert_eq!(streak, 1);
    }
}
