use crate::clock::{Clock, SystemClock};
use crate::config::{find_data_path, ConfigFile, TrackerConfig};
use crate::error::{Result, TrackerError};
use crate::evaluator::{assess_taken, classify, Classification, DoseState};
use crate::notify::{deliver, notifier_for, Notifier};
use crate::session::Session;
use crate::storage::{DataFiles, FileLock, JsonFile};
use crate::tracking::{TrackingEntry, TrackingStore};
use crate::types::{DoseStatus, HistoryEntry, Medication, MedicationForm, MedicationUpdate};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// username -> prescribed medications
pub type MedicationBook = BTreeMap<String, Vec<Medication>>;

const TAKEN_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Today's state of one active medication
#[derive(Debug, Clone)]
pub struct DoseOverview {
    pub medication: Medication,
    pub classification: Classification,
    pub today: Option<HistoryEntry>,
}

#[derive(Default)]
struct Ledger {
    medications: MedicationBook,
    tracking: TrackingStore,
}

impl Ledger {
    fn medication(&self, user: &str, name: &str) -> Result<&Medication> {
        self.medications
            .get(user)
            .and_then(|meds| meds.iter().find(|m| m.name == name))
            .ok_or_else(|| TrackerError::UnknownMedication(name.to_string()))
    }

    fn medication_mut(&mut self, user: &str, name: &str) -> Result<&mut Medication> {
        self.medications
            .get_mut(user)
            .and_then(|meds| meds.iter_mut().find(|m| m.name == name))
            .ok_or_else(|| TrackerError::UnknownMedication(name.to_string()))
    }

    /// Copy the ledger's streak and history onto the medication record
    fn refresh(&mut self, user: &str, name: &str) {
        let entry = self.tracking.get(user, name).cloned().unwrap_or_default();
        if let Ok(med) = self.medication_mut(user, name) {
            med.streak = entry.streak;
            med.history = entry.history;
        }
    }

    fn refresh_all(&mut self) {
        let Ledger {
            medications,
            tracking,
        } = self;
        for (user, meds) in medications.iter_mut() {
            for med in meds.iter_mut() {
                let entry = tracking.get(user, &med.name).cloned().unwrap_or_default();
                med.streak = entry.streak;
                med.history = entry.history;
            }
        }
    }
}

/// The ledger as last read from disk, held exclusively until dropped
struct LedgerGuard<'a> {
    _file: FileLock,
    ledger: MutexGuard<'a, Ledger>,
}

impl Deref for LedgerGuard<'_> {
    type Target = Ledger;

    fn deref(&self) -> &Ledger {
        &self.ledger
    }
}

impl DerefMut for LedgerGuard<'_> {
    fn deref_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }
}

/// Medication schedules and adherence tracking for every user in a data
/// directory.
///
/// Every operation runs under the in-process mutex and the data directory's
/// lock file, re-reads both documents, and writes any change back before
/// letting go. A `watch` process and a `take` process therefore see each
/// other's updates, as do the reminder thread and the foreground.
pub struct Tracker {
    data_path: PathBuf,
    files: DataFiles,
    medications_file: JsonFile<MedicationBook>,
    tracking_file: JsonFile<TrackingStore>,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    ledger: Mutex<Ledger>,
}

impl Tracker {
    /// Open the data directory found from the current directory
    pub fn open() -> Result<Self> {
        let data_path = find_data_path().ok_or_else(|| {
            TrackerError::Config("No .medtrack directory found. Run 'medtrack init' first.".into())
        })?;
        Self::open_at(data_path)
    }

    /// Open a data directory with its configured notifier and the system clock
    pub fn open_at(data_path: PathBuf) -> Result<Self> {
        if !data_path.exists() {
            return Err(TrackerError::Config(format!(
                "Path does not exist: {}",
                data_path.display()
            )));
        }

        let config = ConfigFile::new(data_path.clone()).config().clone();
        let notifier: Arc<dyn Notifier> = Arc::from(notifier_for(config.notifier));
        Self::with_parts(data_path, config, Arc::new(SystemClock), notifier)
    }

    /// Create `.medtrack` under `path` and open it
    pub fn init(path: &Path) -> Result<Self> {
        let data_path = path.join(crate::config::DATA_DIR_NAME);
        fs::create_dir_all(&data_path).map_err(|source| TrackerError::Io {
            path: data_path.clone(),
            source,
        })?;
        Self::open_at(data_path)
    }

    pub fn with_parts(
        data_path: PathBuf,
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let files = DataFiles::new(data_path.clone());
        let tracker = Self {
            data_path,
            medications_file: files.medications(),
            tracking_file: files.tracking(),
            files,
            config,
            clock,
            notifier,
            ledger: Mutex::new(Ledger::default()),
        };

        // Fails early on unreadable documents
        let mut ledger = tracker.lock()?;
        if let Some(days) = tracker.config.history_retention_days {
            let cutoff = tracker.now().date() - ChronoDuration::days(i64::from(days));
            let users: Vec<String> = ledger.tracking.users().map(str::to_string).collect();
            let mut pruned = 0;
            for user in users {
                pruned += ledger.tracking.prune_before(&user, cutoff);
            }
            if pruned > 0 {
                ledger.refresh_all();
                tracker.persist(&ledger)?;
                tracing::info!(pruned, "Pruned history past retention");
            }
        }
        drop(ledger);

        Ok(tracker)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Take both locks and reload the ledger from disk
    fn lock(&self) -> Result<LedgerGuard<'_>> {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.files.lock()?;

        ledger.medications = self.medications_file.load()?;
        ledger.tracking = self.tracking_file.load()?;
        ledger.refresh_all();

        Ok(LedgerGuard {
            _file: file,
            ledger,
        })
    }

    /// Write both documents; in-memory state stays as is on failure
    fn persist(&self, ledger: &Ledger) -> Result<()> {
        self.tracking_file.save(&ledger.tracking)?;
        self.medications_file.save(&ledger.medications)
    }

    /// Rewrite both documents, with the medication projection recomputed
    pub fn flush(&self) -> Result<()> {
        let ledger = self.lock()?;
        self.persist(&ledger)
    }

    // =========================================================================
    // Medication records
    // =========================================================================

    /// Prescribe a medication to `patient`
    pub fn add_medication(
        &self,
        session: &Session,
        patient: &str,
        form: MedicationForm,
    ) -> Result<Medication> {
        session.authorize(patient)?;
        let prescribed_by = session.is_physician().then(|| session.username().to_string());
        let med = form.into_medication(self.now().date(), prescribed_by)?;

        let mut ledger = self.lock()?;
        if ledger.medication(patient, &med.name).is_ok() {
            return Err(TrackerError::DuplicateMedication(med.name));
        }

        let name = med.name.clone();
        ledger
            .medications
            .entry(patient.to_string())
            .or_default()
            .push(med);
        ledger.tracking.ensure(patient, &name);
        ledger.refresh(patient, &name);
        self.persist(&ledger)?;

        tracing::info!(patient, medication = %name, "Medication added");
        ledger.medication(patient, &name).cloned()
    }

    pub fn update_medication(
        &self,
        session: &Session,
        patient: &str,
        name: &str,
        update: &MedicationUpdate,
    ) -> Result<Medication> {
        session.authorize(patient)?;
        let mut ledger = self.lock()?;
        let med = ledger.medication_mut(patient, name)?;
        update.apply(med)?;
        let updated = med.clone();
        self.persist(&ledger)?;

        tracing::info!(patient, medication = name, "Medication updated");
        Ok(updated)
    }

    /// Remove a medication along with its adherence ledger
    pub fn remove_medication(&self, session: &Session, patient: &str, name: &str) -> Result<Medication> {
        session.authorize(patient)?;
        let mut ledger = self.lock()?;
        let meds = ledger
            .medications
            .get_mut(patient)
            .ok_or_else(|| TrackerError::UnknownMedication(name.to_string()))?;
        let index = meds
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| TrackerError::UnknownMedication(name.to_string()))?;
        let removed = meds.remove(index);
        if meds.is_empty() {
            ledger.medications.remove(patient);
        }
        ledger.tracking.remove(patient, name);
        self.persist(&ledger)?;

        tracing::info!(patient, medication = name, "Medication removed");
        Ok(removed)
    }

    pub fn medications(&self, session: &Session, patient: &str) -> Result<Vec<Medication>> {
        session.authorize(patient)?;
        let ledger = self.lock()?;
        Ok(ledger.medications.get(patient).cloned().unwrap_or_default())
    }

    pub fn medication(&self, session: &Session, patient: &str, name: &str) -> Result<Medication> {
        session.authorize(patient)?;
        self.lock()?.medication(patient, name).cloned()
    }

    pub fn history(&self, session: &Session, patient: &str, name: &str) -> Result<TrackingEntry> {
        session.authorize(patient)?;
        let ledger = self.lock()?;
        ledger.medication(patient, name)?;
        Ok(ledger.tracking.get(patient, name).cloned().unwrap_or_default())
    }

    /// Delete history entries older than `days` days; streaks are kept
    pub fn prune_history(&self, session: &Session, patient: &str, days: u32) -> Result<usize> {
        session.authorize(patient)?;
        let cutoff = self.now().date() - ChronoDuration::days(i64::from(days));

        let mut ledger = self.lock()?;
        let pruned = ledger.tracking.prune_before(patient, cutoff);
        if pruned > 0 {
            ledger.refresh_all();
            self.persist(&ledger)?;
        }
        tracing::info!(patient, pruned, %cutoff, "History pruned");
        Ok(pruned)
    }

    // =========================================================================
    // Adherence
    // =========================================================================

    /// Classification of every active medication of the session user
    pub fn today(&self, session: &Session) -> Result<Vec<DoseOverview>> {
        let now = self.now();
        let user = session.username();
        let ledger = self.lock()?;

        let overview = ledger
            .medications
            .get(user)
            .map(|meds| {
                meds.iter()
                    .filter(|m| m.is_active())
                    .map(|m| {
                        let today = ledger.tracking.latest_for(user, &m.name, now.date()).cloned();
                        DoseOverview {
                            medication: m.clone(),
                            classification: classify(m.schedule_time, now.time(), today.as_ref()),
                            today,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(overview)
    }

    /// Log that the session user took a dose now.
    ///
    /// Refused when the dose is not actionable (already taken today, or not
    /// yet due). A dose taken after being marked missed is logged late and
    /// does not extend the streak.
    pub fn take_medication(&self, session: &Session, name: &str) -> Result<HistoryEntry> {
        let now = self.now();
        let date = now.date();
        let user = session.username();

        let (entry, persisted) = {
            let mut ledger = self.lock()?;
            let med = ledger.medication(user, name)?;
            if !med.is_active() {
                return Err(TrackerError::Inactive(name.to_string()));
            }
            let schedule_time = med.schedule_time;

            let classification = classify(
                schedule_time,
                now.time(),
                ledger.tracking.latest_for(user, name, date),
            );
            if !classification.is_actionable {
                return Err(TrackerError::NotActionable {
                    name: name.to_string(),
                    state: classification.status_text().to_string(),
                });
            }

            let status = if classification.state == DoseState::Missed {
                DoseStatus::Late
            } else {
                assess_taken(schedule_time, now.time()).status
            };

            let entry = ledger
                .tracking
                .record_taken(user, name, date, now.time(), status)?;
            ledger.refresh(user, name);
            (entry, self.persist(&ledger))
        };

        tracing::info!(user, medication = name, status = %entry.status, "Dose taken");
        deliver(
            self.notifier(),
            "Medication Taken",
            &format!("Medication {} marked as {}", name, entry.status),
            TAKEN_NOTIFICATION_TIMEOUT,
        );

        persisted.map(|_| entry)
    }

    // =========================================================================
    // Reminder scheduler hooks
    // =========================================================================

    /// Active medications of `user` that have started by `date`
    pub fn scheduled_medications(&self, user: &str, date: NaiveDate) -> Result<Vec<Medication>> {
        let meds = self
            .lock()?
            .medications
            .get(user)
            .map(|meds| {
                meds.iter()
                    .filter(|m| m.is_active() && m.start_date <= date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(meds)
    }

    pub fn entry_for(&self, user: &str, name: &str, date: NaiveDate) -> Result<Option<HistoryEntry>> {
        Ok(self.lock()?.tracking.latest_for(user, name, date).cloned())
    }

    /// Add today's pending entry; false if the day already has one
    pub fn open_reminder(&self, user: &str, name: &str, date: NaiveDate) -> Result<bool> {
        let mut ledger = self.lock()?;
        let schedule_time = ledger.medication(user, name)?.schedule_time;
        let appended = ledger.tracking.append_pending(user, name, date, schedule_time);
        if appended {
            ledger.refresh(user, name);
            self.persist(&ledger)?;
        }
        Ok(appended)
    }

    /// Resolve a pending entry as missed; false if nothing was pending
    pub fn mark_missed(&self, user: &str, name: &str, date: NaiveDate) -> Result<bool> {
        let mut ledger = self.lock()?;
        let resolved = ledger.tracking.resolve(user, name, date, DoseStatus::Missed);
        if resolved {
            ledger.refresh(user, name);
            self.persist(&ledger)?;
        }
        Ok(resolved)
    }

    /// Record a missed dose for a day that has no entry at all
    pub fn backfill_missed(&self, user: &str, name: &str, date: NaiveDate) -> Result<bool> {
        let mut ledger = self.lock()?;
        let schedule_time = ledger.medication(user, name)?.schedule_time;
        let appended = ledger.tracking.append_missed(user, name, date, schedule_time);
        if appended {
            ledger.refresh(user, name);
            self.persist(&ledger)?;
        }
        Ok(appended)
    }
}
