use crate::error::{Result, TrackerError};
use crate::types::Role;

/// The logged-in user, passed into every operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    username: String,
    role: Role,
}

impl Session {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_physician(&self) -> bool {
        self.role == Role::Physician
    }

    /// Physicians manage everyone; patients only themselves
    pub fn authorize(&self, owner: &str) -> Result<()> {
        if self.is_physician() || self.username == owner {
            Ok(())
        } else {
            Err(TrackerError::Forbidden {
                user: self.username.clone(),
                owner: owner.to_string(),
            })
        }
    }

    pub fn require_physician(&self) -> Result<()> {
        if self.is_physician() {
            Ok(())
        } else {
            Err(TrackerError::Forbidden {
                user: self.username.clone(),
                owner: "the patient registry".to_string(),
            })
        }
    }
}
