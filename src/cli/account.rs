use super::{open_session, prompt, App, Credentials};
use crate::accounts::Signup;
use crate::config::{default_data_path, DATA_DIR_NAME};
use crate::error::{Result, TrackerError};
use crate::patients::PatientDetails;
use crate::tracker::Tracker;
use crate::types::Role;
use std::fs;
use std::path::Path;

/// Run the init command
pub fn run_init(path: &str, global: bool) -> Result<()> {
    let tracker = if global {
        let data_path = default_data_path();
        fs::create_dir_all(&data_path).map_err(|source| TrackerError::Io {
            path: data_path.clone(),
            source,
        })?;
        Tracker::open_at(data_path)?
    } else {
        let data_path = Path::new(path).join(DATA_DIR_NAME);
        if data_path.exists() {
            return Err(TrackerError::Config(format!(
                "{} already exists at {}",
                DATA_DIR_NAME,
                data_path.display()
            )));
        }
        Tracker::init(Path::new(path))?
    };

    tracker.flush()?;
    println!("Initialized medtrack at {}", tracker.data_path().display());
    Ok(())
}

/// Patient details given on the command line; missing fields are prompted
#[derive(Debug, Clone, Default)]
pub struct DetailArgs {
    pub name: Option<String>,
    pub dob: Option<String>,
    pub contact: Option<String>,
}

impl DetailArgs {
    fn resolve(self) -> Result<PatientDetails> {
        let ask = |given: Option<String>, label: &str| match given {
            Some(v) => Ok(v),
            None => prompt(label),
        };
        Ok(PatientDetails {
            name: ask(self.name, "Full name: ")?,
            dob: ask(self.dob, "Date of birth (YYYY-MM-DD): ")?,
            contact: ask(self.contact, "Contact number: ")?,
        })
    }
}

/// Run the signup command
pub fn run_signup(creds: &Credentials, role: &str, details: DetailArgs) -> Result<()> {
    let app = App::open()?;
    let role: Role = role.parse()?;
    let username = creds.username()?.to_string();
    let password = creds.password()?;

    let details = match role {
        Role::Patient => Some(details.resolve()?),
        Role::Physician => None,
    };

    let account = app.accounts.signup(
        &Signup {
            username: username.clone(),
            password,
            role,
            details,
        },
        &app.patients,
    )?;

    println!("Created {} account '{}'", role.as_str(), username);
    if let Some(id) = account.patient_id {
        println!("  patient id: {}", id);
    }
    Ok(())
}

/// Run the whoami command
pub fn run_whoami(creds: &Credentials) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let account = app.accounts.account(&session, session.username())?;

    println!("{} ({})", session.username(), session.role().as_str());
    if let Some(id) = account.patient_id {
        println!("  patient id: {}", id);
    }
    println!("  data: {}", app.tracker.data_path().display());

    if !account.notes.trim().is_empty() {
        println!("\nNotes:");
        for line in account.notes.lines().filter(|l| !l.trim().is_empty()) {
            println!("  {}", line);
        }
    }
    Ok(())
}

/// Run the note command
pub fn run_note(creds: &Credentials, patient: Option<&str>, text: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let target = patient.unwrap_or(session.username());

    let line = app.accounts.append_note(&session, target, text)?;
    println!("Added note for {}: {}", target, line.trim());
    Ok(())
}
