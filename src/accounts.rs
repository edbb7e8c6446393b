//! User accounts stored in `users.json`.
//!
//! Credentials are compared as stored; the file is expected to live in a
//! directory only the account holders can read.

use crate::clock::Clock;
use crate::error::{Result, TrackerError};
use crate::patients::{PatientDetails, PatientRegistry};
use crate::session::Session;
use crate::storage::{DataFiles, JsonFile};
use crate::types::{require, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const NOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub password: String,
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// username -> account
pub type UserBook = BTreeMap<String, UserAccount>;

/// Everything needed to create an account. Patients must supply details
/// for the registry.
#[derive(Debug, Clone)]
pub struct Signup {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub details: Option<PatientDetails>,
}

pub struct Accounts {
    file: JsonFile<UserBook>,
    clock: Arc<dyn Clock>,
}

impl Accounts {
    pub fn new(data_path: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self {
            file: DataFiles::new(data_path).users(),
            clock,
        }
    }

    /// Create an account; patients are also added to the registry
    pub fn signup(&self, signup: &Signup, registry: &PatientRegistry) -> Result<UserAccount> {
        let username = require("username", &signup.username)?;
        if signup.password.is_empty() {
            return Err(TrackerError::validation("password", "must not be empty"));
        }

        let mut book = self.file.load()?;
        if book.contains_key(&username) {
            return Err(TrackerError::DuplicateUser(username));
        }

        let patient_id = match signup.role {
            Role::Patient => {
                let details = signup.details.as_ref().ok_or_else(|| {
                    TrackerError::validation("details", "patients must provide name, date of birth and contact")
                })?;
                Some(registry.register(details)?)
            }
            Role::Physician => None,
        };

        let account = UserAccount {
            password: signup.password.clone(),
            role: signup.role,
            patient_id,
            notes: String::new(),
        };
        book.insert(username.clone(), account.clone());
        self.file.save(&book)?;

        tracing::info!(user = %username, role = signup.role.as_str(), "Account created");
        Ok(account)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let book = self.file.load()?;
        match book.get(username) {
            Some(account) if account.password == password => {
                tracing::debug!(user = username, "Logged in");
                Ok(Session::new(username, account.role))
            }
            _ => Err(TrackerError::InvalidCredentials),
        }
    }

    pub fn account(&self, session: &Session, username: &str) -> Result<UserAccount> {
        session.authorize(username)?;
        self.file
            .load()?
            .remove(username)
            .ok_or_else(|| TrackerError::UnknownUser(username.to_string()))
    }

    pub fn set_password(&self, session: &Session, username: &str, password: &str) -> Result<()> {
        session.authorize(username)?;
        if password.is_empty() {
            return Err(TrackerError::validation("password", "must not be empty"));
        }
        self.update(username, |account| account.password = password.to_string())?;
        tracing::info!(user = username, by = session.username(), "Password changed");
        Ok(())
    }

    /// Append a timestamped line to the account's notes
    pub fn append_note(&self, session: &Session, username: &str, note: &str) -> Result<String> {
        session.authorize(username)?;
        let note = require("note", note)?;
        let stamp = self.clock.now().format(NOTE_TIMESTAMP_FORMAT);
        let line = format!("\n{}: {}", stamp, note);
        self.update(username, |account| account.notes.push_str(&line))?;
        Ok(line)
    }

    /// Usernames of every patient account
    pub fn patients(&self, session: &Session) -> Result<Vec<String>> {
        session.require_physician()?;
        Ok(self
            .file
            .load()?
            .into_iter()
            .filter(|(_, a)| a.role == Role::Patient)
            .map(|(name, _)| name)
            .collect())
    }

    fn update(&self, username: &str, f: impl FnOnce(&mut UserAccount)) -> Result<()> {
        let mut book = self.file.load()?;
        let account = book
            .get_mut(username)
            .ok_or_else(|| TrackerError::UnknownUser(username.to_string()))?;
        f(account);
        self.file.save(&book)
    }
}
