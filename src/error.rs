use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by tracker operations.
///
/// Lookup misses are ordinary user errors: callers print them and move on.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Unknown medication: {0}")]
    UnknownMedication(String),

    #[error("Unknown patient: {0}")]
    UnknownPatient(String),

    #[error("Unknown appointment: {0}")]
    UnknownAppointment(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Username already exists: {0}")]
    DuplicateUser(String),

    #[error("Medication already exists: {0}")]
    DuplicateMedication(String),

    #[error("{user} is not allowed to manage records for {owner}")]
    Forbidden { user: String, owner: String },

    #[error("{name} cannot be taken right now ({state})")]
    NotActionable { name: String, state: String },

    #[error("{name} was already taken on {date}")]
    AlreadyTaken { name: String, date: String },

    #[error("Medication {0} is not active")]
    Inactive(String),

    #[error("Data directory is busy: {} is held by another process", .0.display())]
    Busy(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrackerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// True for unknown user/medication/patient/appointment.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Self::UnknownUser(_)
                | Self::UnknownMedication(_)
                | Self::UnknownPatient(_)
                | Self::UnknownAppointment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_are_flagged() {
        assert!(TrackerError::UnknownMedication("aspirin".into()).is_lookup_miss());
        assert!(TrackerError::UnknownPatient("p1".into()).is_lookup_miss());
        assert!(!TrackerError::InvalidCredentials.is_lookup_miss());
        assert!(!TrackerError::validation("name", "empty").is_lookup_miss());
    }

    #[test]
    fn validation_message_names_the_field() {
        let err = TrackerError::validation("schedule_time", "expected HH:MM");
        assert_eq!(err.to_string(), "Invalid schedule_time: expected HH:MM");
    }
}
