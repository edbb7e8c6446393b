//! Per-patient appointment calendar stored in `appointments.json`.

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::session::Session;
use crate::storage::{DataFiles, JsonFile};
use crate::types::{hhmm, parse_date, parse_time, require, short_id};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physician: Option<String>,
}

/// username -> date -> appointments ordered by time
pub type AppointmentBook = BTreeMap<String, BTreeMap<NaiveDate, Vec<Appointment>>>;

#[derive(Debug, Clone, Default)]
pub struct AppointmentForm {
    pub date: String,
    pub time: String,
    pub title: String,
    pub notes: String,
}

pub struct Appointments {
    file: JsonFile<AppointmentBook>,
    clock: Arc<dyn Clock>,
}

impl Appointments {
    pub fn new(data_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            file: DataFiles::new(data_path).appointments(),
            clock,
        }
    }

    /// Book an appointment; past dates and times are refused
    pub fn schedule(&self, session: &Session, patient: &str, form: &AppointmentForm) -> Result<(NaiveDate, Appointment)> {
        session.authorize(patient)?;
        let date = parse_date("date", &form.date)?;
        let time = parse_time("time", &form.time)?;
        let title = require("title", &form.title)?;
        if date.and_time(time) < self.clock.now() {
            return Err(TrackerError::validation("date", "appointment is in the past"));
        }

        let mut book = self.file.load()?;
        let day = book
            .entry(patient.to_string())
            .or_default()
            .entry(date)
            .or_default();

        let mut id = short_id();
        while day.iter().any(|a| a.id == id) {
            id = short_id();
        }
        let appointment = Appointment {
            id,
            time,
            title,
            notes: form.notes.trim().to_string(),
            physician: session.is_physician().then(|| session.username().to_string()),
        };

        let at = day.partition_point(|a| a.time <= time);
        day.insert(at, appointment.clone());
        self.file.save(&book)?;

        tracing::info!(patient, %date, id = %appointment.id, "Appointment scheduled");
        Ok((date, appointment))
    }

    pub fn on_date(&self, session: &Session, patient: &str, date: NaiveDate) -> Result<Vec<Appointment>> {
        session.authorize(patient)?;
        Ok(self
            .file
            .load()?
            .remove(patient)
            .and_then(|mut days| days.remove(&date))
            .unwrap_or_default())
    }

    /// Appointments from now on, earliest first
    pub fn upcoming(&self, session: &Session, patient: &str) -> Result<Vec<(NaiveDate, Appointment)>> {
        session.authorize(patient)?;
        let now = self.clock.now();
        let days = self.file.load()?.remove(patient).unwrap_or_default();

        Ok(days
            .into_iter()
            .filter(|(date, _)| *date >= now.date())
            .flat_map(|(date, list)| list.into_iter().map(move |a| (date, a)))
            .filter(|(date, a)| date.and_time(a.time) >= now)
            .collect())
    }

    pub fn cancel(&self, session: &Session, patient: &str, id: &str) -> Result<(NaiveDate, Appointment)> {
        session.authorize(patient)?;
        let mut book = self.file.load()?;
        let days = book
            .get_mut(patient)
            .ok_or_else(|| TrackerError::UnknownAppointment(id.to_string()))?;

        let (date, index) = days
            .iter()
            .find_map(|(date, list)| list.iter().position(|a| a.id == id).map(|i| (*date, i)))
            .ok_or_else(|| TrackerError::UnknownAppointment(id.to_string()))?;

        let list = days
            .get_mut(&date)
            .ok_or_else(|| TrackerError::UnknownAppointment(id.to_string()))?;
        let removed = list.remove(index);
        if list.is_empty() {
            days.remove(&date);
        }
        if days.is_empty() {
            book.remove(patient);
        }
        self.file.save(&book)?;

        tracing::info!(patient, %date, id, "Appointment cancelled");
        Ok((date, removed))
    }
}
