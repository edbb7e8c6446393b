//! Physician-managed patient registry stored in `patients.json`.

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::session::Session;
use crate::storage::{DataFiles, JsonFile};
use crate::types::{hhmm, parse_date, require, short_id, Medication, MedicationStatus};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// patient id -> record
pub type PatientBook = BTreeMap<String, PatientRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionRecord {
    pub medication_name: String,
    pub dose: String,
    #[serde(with = "hhmm")]
    pub schedule: NaiveTime,
    pub status: MedicationStatus,
    pub date_prescribed: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalNote {
    pub date: NaiveDateTime,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub name: String,
    pub dob: NaiveDate,
    pub contact: String,
    #[serde(default)]
    pub medications: Vec<PrescriptionRecord>,
    #[serde(default)]
    pub medical_notes: Vec<MedicalNote>,
}

/// Demographics as entered at signup or by a physician
#[derive(Debug, Clone, Default)]
pub struct PatientDetails {
    pub name: String,
    pub dob: String,
    pub contact: String,
}

impl PatientDetails {
    fn validate(&self) -> Result<(String, NaiveDate, String)> {
        Ok((
            require("name", &self.name)?,
            parse_date("dob", &self.dob)?,
            require("contact", &self.contact)?,
        ))
    }
}

pub struct PatientRegistry {
    file: JsonFile<PatientBook>,
    clock: Arc<dyn Clock>,
}

impl PatientRegistry {
    pub fn new(data_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            file: DataFiles::new(data_path).patients(),
            clock,
        }
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut PatientRecord) -> Result<T>) -> Result<T> {
        let mut book = self.file.load()?;
        let record = book
            .get_mut(id)
            .ok_or_else(|| TrackerError::UnknownPatient(id.to_string()))?;
        let out = f(record)?;
        self.file.save(&book)?;
        Ok(out)
    }

    /// Create a record and return its new id. Used by signup, which has no
    /// session yet.
    pub fn register(&self, details: &PatientDetails) -> Result<String> {
        let (name, dob, contact) = details.validate()?;
        let mut book = self.file.load()?;

        let mut id = short_id();
        while book.contains_key(&id) {
            id = short_id();
        }

        book.insert(
            id.clone(),
            PatientRecord {
                name,
                dob,
                contact,
                medications: Vec::new(),
                medical_notes: Vec::new(),
            },
        );
        self.file.save(&book)?;
        tracing::info!(patient_id = %id, "Patient registered");
        Ok(id)
    }

    pub fn add_patient(&self, session: &Session, details: &PatientDetails) -> Result<String> {
        session.require_physician()?;
        self.register(details)
    }

    /// Replace demographics; notes and prescriptions are kept
    pub fn modify_patient(&self, session: &Session, id: &str, details: &PatientDetails) -> Result<()> {
        session.require_physician()?;
        let (name, dob, contact) = details.validate()?;
        self.update(id, |record| {
            record.name = name;
            record.dob = dob;
            record.contact = contact;
            Ok(())
        })?;
        tracing::info!(patient_id = id, "Patient modified");
        Ok(())
    }

    pub fn add_medical_note(&self, session: &Session, id: &str, note: &str) -> Result<MedicalNote> {
        session.require_physician()?;
        let note = MedicalNote {
            date: self.clock.now(),
            note: require("note", note)?,
        };
        self.update(id, |record| {
            record.medical_notes.push(note.clone());
            Ok(())
        })?;
        Ok(note)
    }

    /// Insert or replace the prescription with the medication's name
    pub fn record_prescription(&self, session: &Session, id: &str, med: &Medication) -> Result<()> {
        session.require_physician()?;
        let now = self.clock.now();
        self.update(id, |record| {
            match record
                .medications
                .iter_mut()
                .find(|p| p.medication_name == med.name)
            {
                Some(existing) => {
                    existing.dose = med.dosage.clone();
                    existing.schedule = med.schedule_time;
                    existing.status = med.status;
                    existing.last_modified = Some(now);
                }
                None => record.medications.push(PrescriptionRecord {
                    medication_name: med.name.clone(),
                    dose: med.dosage.clone(),
                    schedule: med.schedule_time,
                    status: med.status,
                    date_prescribed: now,
                    last_modified: None,
                }),
            }
            Ok(())
        })?;
        tracing::info!(patient_id = id, medication = %med.name, "Prescription recorded");
        Ok(())
    }

    pub fn update_prescription_status(
        &self,
        session: &Session,
        id: &str,
        medication: &str,
        status: MedicationStatus,
    ) -> Result<()> {
        session.require_physician()?;
        let now = self.clock.now();
        self.update(id, |record| {
            let prescription = record
                .medications
                .iter_mut()
                .find(|p| p.medication_name == medication)
                .ok_or_else(|| TrackerError::UnknownMedication(medication.to_string()))?;
            prescription.status = status;
            prescription.last_modified = Some(now);
            Ok(())
        })
    }

    pub fn get(&self, session: &Session, id: &str) -> Result<PatientRecord> {
        session.require_physician()?;
        self.file
            .load()?
            .remove(id)
            .ok_or_else(|| TrackerError::UnknownPatient(id.to_string()))
    }

    /// First patient whose name matches exactly
    pub fn find_by_name(&self, session: &Session, name: &str) -> Result<Option<(String, PatientRecord)>> {
        session.require_physician()?;
        Ok(self.file.load()?.into_iter().find(|(_, p)| p.name == name))
    }

    /// Every patient, sorted by name
    pub fn list(&self, session: &Session) -> Result<Vec<(String, PatientRecord)>> {
        session.require_physician()?;
        let mut patients: Vec<_> = self.file.load()?.into_iter().collect();
        patients.sort_by(|a, b| a.1.name.cmp(&b.1.name).then_with(|| a.0.cmp(&b.0)));
        Ok(patients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::{MedicationForm, Role};

    fn registry(dir: &tempfile::TempDir) -> (Arc<FixedClock>, PatientRegistry) {
        let clock = Arc::new(FixedClock::at("2024-03-01 10:00"));
        (clock.clone(), PatientRegistry::new(dir.path().to_path_buf(), clock))
    }

    fn doctor() -> Session {
        Session::new("dr_grey", Role::Physician)
    }

    fn details(name: &str) -> PatientDetails {
        PatientDetails {
            name: name.into(),
            dob: "1980-05-17".into(),
            contact: "555-0100".into(),
        }
    }

    fn aspirin() -> Medication {
        MedicationForm {
            name: "Aspirin".into(),
            dosage: "81mg".into(),
            schedule_time: "09:00".into(),
            ..Default::default()
        }
        .into_medication(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), None)
        .unwrap()
    }

    #[test]
    fn test_register_assigns_short_id() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(&dir);
        let id = registry.register(&details("Alice Smith")).unwrap();
        assert_eq!(id.len(), 8);

        let record = registry.get(&doctor(), &id).unwrap();
        assert_eq!(record.name, "Alice Smith");
        assert_eq!(record.dob.to_string(), "1980-05-17");
    }

    #[test]
    fn test_register_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(&dir);
        let mut incomplete = details("Alice Smith");
        incomplete.contact.clear();
        assert!(matches!(
            registry.register(&incomplete),
            Err(TrackerError::Validation { field: "contact", .. })
        ));

        let mut bad_dob = details("Alice Smith");
        bad_dob.dob = "17/05/1980".into();
        assert!(registry.register(&bad_dob).is_err());
    }

    #[test]
    fn test_modify_preserves_clinical_data() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(&dir);
        let id = registry.register(&details("Alice Smith")).unwrap();
        registry.add_medical_note(&doctor(), &id, "Mild hypertension").unwrap();
        registry.record_prescription(&doctor(), &id, &aspirin()).unwrap();

        let mut changed = details("Alice Jones");
        changed.contact = "555-0199".into();
        registry.modify_patient(&doctor(), &id, &changed).unwrap();

        let record = registry.get(&doctor(), &id).unwrap();
        assert_eq!(record.name, "Alice Jones");
        assert_eq!(record.contact, "555-0199");
        assert_eq!(record.medical_notes.len(), 1);
        assert_eq!(record.medications.len(), 1);
    }

    #[test]
    fn test_prescription_upsert_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, registry) = registry(&dir);
        let id = registry.register(&details("Alice Smith")).unwrap();
        registry.record_prescription(&doctor(), &id, &aspirin()).unwrap();

        clock.set("2024-03-02 11:00");
        let mut stronger = aspirin();
        stronger.dosage = "325mg".into();
        registry.record_prescription(&doctor(), &id, &stronger).unwrap();

        let record = registry.get(&doctor(), &id).unwrap();
        assert_eq!(record.medications.len(), 1);
        let rx = &record.medications[0];
        assert_eq!(rx.dose, "325mg");
        assert_eq!(rx.date_prescribed.to_string(), "2024-03-01 10:00:00");
        assert_eq!(rx.last_modified.map(|t| t.to_string()).as_deref(), Some("2024-03-02 11:00:00"));

        registry
            .update_prescription_status(&doctor(), &id, "Aspirin", MedicationStatus::Discontinued)
            .unwrap();
        let record = registry.get(&doctor(), &id).unwrap();
        assert_eq!(record.medications[0].status, MedicationStatus::Discontinued);

        let err = registry
            .update_prescription_status(&doctor(), &id, "Statin", MedicationStatus::OnHold)
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownMedication(_)));
    }

    #[test]
    fn test_lookup_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(&dir);
        registry.register(&details("Zoe Park")).unwrap();
        let alice = registry.add_patient(&doctor(), &details("Alice Smith")).unwrap();

        let names: Vec<_> = registry
            .list(&doctor())
            .unwrap()
            .into_iter()
            .map(|(_, p)| p.name)
            .collect();
        assert_eq!(names, vec!["Alice Smith", "Zoe Park"]);

        let found = registry.find_by_name(&doctor(), "Alice Smith").unwrap();
        assert_eq!(found.map(|(id, _)| id), Some(alice));
        assert!(registry.find_by_name(&doctor(), "Nobody").unwrap().is_none());

        let err = registry.get(&doctor(), "ffffffff").unwrap_err();
        assert!(err.is_lookup_miss());
    }

    #[test]
    fn test_patients_cannot_read_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(&dir);
        let alice = Session::new("alice", Role::Patient);
        assert!(matches!(registry.list(&alice), Err(TrackerError::Forbidden { .. })));
        assert!(registry.add_patient(&alice, &details("Eve")).is_err());
    }
}
