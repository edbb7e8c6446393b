use crate::error::{Result, TrackerError};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Parse a schedule time such as `09:00`
pub fn parse_time(field: &'static str, input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), TIME_FORMAT)
        .map_err(|_| TrackerError::validation(field, format!("expected HH:MM, got '{}'", input)))
}

/// Parse a calendar date such as `2024-03-01`
pub fn parse_date(field: &'static str, input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| {
        TrackerError::validation(field, format!("expected YYYY-MM-DD, got '{}'", input))
    })
}

/// Reject blank required text fields
pub fn require(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Eight hex characters from a v4 uuid, used for patient and appointment ids
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// `HH:MM` serialization for `NaiveTime`
pub mod hhmm {
    use super::TIME_FORMAT;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Physician,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Physician => "physician",
        }
    }
}

impl FromStr for Role {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "physician" => Ok(Self::Physician),
            other => Err(TrackerError::validation(
                "role",
                format!("expected patient or physician, got '{}'", other),
            )),
        }
    }
}

/// Prescription status of a medication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicationStatus {
    Active,
    Discontinued,
    #[serde(rename = "On Hold")]
    OnHold,
}

impl MedicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Discontinued => "Discontinued",
            Self::OnHold => "On Hold",
        }
    }
}

impl fmt::Display for MedicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MedicationStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "active" => Ok(Self::Active),
            "discontinued" => Ok(Self::Discontinued),
            "on hold" | "onhold" => Ok(Self::OnHold),
            _ => Err(TrackerError::validation(
                "status",
                format!("expected active, discontinued or on-hold, got '{}'", s),
            )),
        }
    }
}

/// Outcome recorded for one scheduled dose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseStatus {
    Pending,
    OnTime,
    Late,
    Missed,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OnTime => "on_time",
            Self::Late => "late",
            Self::Missed => "missed",
        }
    }

    /// Taken either on time or late
    pub fn is_taken(&self) -> bool {
        matches!(self, Self::OnTime | Self::Late)
    }
}

impl fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a medication's adherence history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub status: DoseStatus,
}

/// A prescribed medication.
///
/// `streak` and `history` mirror the tracking ledger and are refreshed from it;
/// nothing writes them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    #[serde(with = "hhmm")]
    pub schedule_time: NaiveTime,
    #[serde(default)]
    pub instructions: Option<String>,
    pub status: MedicationStatus,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub prescribed_by: Option<String>,
    #[serde(default)]
    pub streak: u32,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Medication {
    pub fn is_active(&self) -> bool {
        self.status == MedicationStatus::Active
    }
}

/// Fields accepted when prescribing a medication
#[derive(Debug, Clone, Default)]
pub struct MedicationForm {
    pub name: String,
    pub dosage: String,
    pub schedule_time: String,
    pub instructions: Option<String>,
    pub status: Option<MedicationStatus>,
    pub start_date: Option<String>,
}

impl MedicationForm {
    /// Validate into a record; nothing is stored on failure
    pub fn into_medication(self, today: NaiveDate, prescribed_by: Option<String>) -> Result<Medication> {
        let name = require("name", &self.name)?;
        let dosage = require("dosage", &self.dosage)?;
        let schedule_time = parse_time("schedule_time", &self.schedule_time)?;
        let start_date = match self.start_date.as_deref() {
            Some(raw) => parse_date("start_date", raw)?,
            None => today,
        };

        Ok(Medication {
            name,
            dosage,
            schedule_time,
            instructions: self
                .instructions
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            status: self.status.unwrap_or(MedicationStatus::Active),
            start_date,
            prescribed_by,
            streak: 0,
            history: Vec::new(),
        })
    }
}

/// Partial edit of a medication; `None` leaves the field unchanged
#[derive(Debug, Clone, Default)]
pub struct MedicationUpdate {
    pub dosage: Option<String>,
    pub schedule_time: Option<String>,
    pub instructions: Option<String>,
    pub status: Option<MedicationStatus>,
}

impl MedicationUpdate {
    pub fn apply(&self, med: &mut Medication) -> Result<()> {
        // Validate everything before touching the record
        let dosage = self.dosage.as_deref().map(|d| require("dosage", d)).transpose()?;
        let schedule_time = self
            .schedule_time
            .as_deref()
            .map(|t| parse_time("schedule_time", t))
            .transpose()?;

        if let Some(d) = dosage {
            med.dosage = d;
        }
        if let Some(t) = schedule_time {
            med.schedule_time = t;
        }
        if let Some(i) = &self.instructions {
            let i = i.trim();
            med.instructions = if i.is_empty() { None } else { Some(i.to_string()) };
        }
        if let Some(s) = self.status {
            med.status = s;
        }
        Ok(())
    }
}
