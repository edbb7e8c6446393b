use super::{open_session, Credentials};
use crate::error::{Result, TrackerError};
use crate::scheduler;
use std::io::{self, BufRead};

/// Run the watch command: send reminders until `q` is entered.
///
/// With stdin closed (running under a service manager) it keeps going until
/// the process is killed; every change is already on disk by then.
pub fn run_watch(creds: &Credentials) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let meds = app
        .tracker
        .scheduled_medications(session.username(), app.tracker.now().date())?;
    let config = app.tracker.config();

    println!(
        "Watching {} medication(s) for {} every {}s. Enter 'q' to stop.",
        meds.len(),
        session.username(),
        config.poll_interval_secs
    );

    let handle = scheduler::start(app.tracker.clone(), session);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdin.lock().read_line(&mut line).map_err(|source| TrackerError::Io {
            path: "<stdin>".into(),
            source,
        })?;
        if read == 0 {
            loop {
                std::thread::park();
            }
        }
        if matches!(line.trim(), "q" | "quit" | "exit") {
            break;
        }
    }

    handle.stop();
    println!("Stopped.");
    Ok(())
}
