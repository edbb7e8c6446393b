pub mod account;
pub mod appointments;
pub mod config;
pub mod meds;
pub mod patients;
pub mod watch;

use crate::accounts::Accounts;
use crate::appointments::Appointments;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TrackerError};
use crate::patients::PatientRegistry;
use crate::session::Session;
use crate::tracker::Tracker;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Login flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn username(&self) -> Result<&str> {
        self.user.as_deref().ok_or_else(|| {
            TrackerError::validation("user", "pass --user or set MEDTRACK_USER")
        })
    }

    /// The given password, or one read from stdin
    pub fn password(&self) -> Result<String> {
        match &self.password {
            Some(p) => Ok(p.clone()),
            None => prompt("Password: "),
        }
    }
}

/// Read one line from stdin after printing `label`
pub fn prompt(label: &str) -> Result<String> {
    let stdin_err = |source| TrackerError::Io {
        path: "<stdin>".into(),
        source,
    };
    print!("{}", label);
    io::stdout().flush().map_err(stdin_err)?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(stdin_err)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Every store in the data directory
pub struct App {
    pub tracker: Arc<Tracker>,
    pub accounts: Accounts,
    pub patients: PatientRegistry,
    pub appointments: Appointments,
}

impl App {
    pub fn open() -> Result<Self> {
        let tracker = Arc::new(Tracker::open()?);
        let data_path = tracker.data_path().to_path_buf();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Ok(Self {
            accounts: Accounts::new(data_path.clone(), clock.clone()),
            patients: PatientRegistry::new(data_path.clone(), clock.clone()),
            appointments: Appointments::new(data_path, clock),
            tracker,
        })
    }

    pub fn login(&self, creds: &Credentials) -> Result<Session> {
        let username = creds.username()?;
        let password = creds.password()?;
        self.accounts.login(username, &password)
    }

    /// Registry id behind a patient account, if it has one
    pub fn patient_id(&self, session: &Session, username: &str) -> Option<String> {
        self.accounts
            .account(session, username)
            .ok()
            .and_then(|a| a.patient_id)
    }
}

/// Open the data directory and log in
pub fn open_session(creds: &Credentials) -> Result<(App, Session)> {
    let app = App::open()?;
    let session = app.login(creds)?;
    Ok((app, session))
}
