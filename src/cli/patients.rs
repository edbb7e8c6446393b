use super::account::DetailArgs;
use super::{open_session, App, Credentials};
use crate::error::Result;
use crate::patients::{PatientDetails, PatientRecord};
use crate::session::Session;
use crate::types::{DATE_FORMAT, TIME_FORMAT};

/// Accept either an account username or a registry id
fn resolve(app: &App, session: &Session, who: &str) -> (String, Option<String>) {
    match app.patient_id(session, who) {
        Some(id) => (id, Some(who.to_string())),
        None => (who.to_string(), None),
    }
}

fn print_summary(id: &str, record: &PatientRecord, username: Option<&str>) {
    print!(
        "[{}] {}  born {}  contact {}",
        id,
        record.name,
        record.dob.format(DATE_FORMAT),
        record.contact
    );
    if let Some(u) = username {
        print!("  ({})", u);
    }
    println!();
}

fn print_prescriptions(record: &PatientRecord) {
    if record.medications.is_empty() {
        println!("  No prescriptions on record.");
        return;
    }
    for rx in &record.medications {
        println!(
            "  {} - {} at {} [{}]",
            rx.medication_name,
            rx.dose,
            rx.schedule.format(TIME_FORMAT),
            rx.status
        );
        print!("      prescribed {}", rx.date_prescribed.format("%Y-%m-%d %H:%M"));
        if let Some(modified) = rx.last_modified {
            print!(", modified {}", modified.format("%Y-%m-%d %H:%M"));
        }
        println!();
    }
}

/// Run the patient list command
pub fn run_patient_list(creds: &Credentials) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patients = app.patients.list(&session)?;
    if patients.is_empty() {
        println!("No patients registered.");
        return Ok(());
    }

    let linked: Vec<(String, String)> = app
        .accounts
        .patients(&session)?
        .into_iter()
        .filter_map(|u| app.patient_id(&session, &u).map(|id| (id, u)))
        .collect();

    for (id, record) in &patients {
        let username = linked.iter().find(|(pid, _)| pid == id).map(|(_, u)| u.as_str());
        print_summary(id, record, username);
    }
    Ok(())
}

/// Run the patient add command
pub fn run_patient_add(creds: &Credentials, details: PatientDetails) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let id = app.patients.add_patient(&session, &details)?;
    println!("Registered {} as {}", details.name.trim(), id);
    Ok(())
}

/// Run the patient show command
pub fn run_patient_show(creds: &Credentials, who: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let (id, username) = resolve(&app, &session, who);
    let record = app.patients.get(&session, &id)?;

    print_summary(&id, &record, username.as_deref());

    println!("\nPrescriptions:");
    print_prescriptions(&record);

    println!("\nMedical notes:");
    if record.medical_notes.is_empty() {
        println!("  None.");
    }
    for note in &record.medical_notes {
        println!("  {}: {}", note.date.format("%Y-%m-%d %H:%M:%S"), note.note);
    }

    if let Some(u) = username {
        let account = app.accounts.account(&session, &u)?;
        let lines: Vec<_> = account.notes.lines().filter(|l| !l.trim().is_empty()).collect();
        if !lines.is_empty() {
            println!("\nAccount notes:");
            for line in lines {
                println!("  {}", line);
            }
        }
    }
    Ok(())
}

/// Run the patient find command
pub fn run_patient_find(creds: &Credentials, name: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    match app.patients.find_by_name(&session, name)? {
        Some((id, record)) => print_summary(&id, &record, None),
        None => println!("No patient named '{}'.", name),
    }
    Ok(())
}

/// Run the patient edit command; omitted fields keep their values
pub fn run_patient_edit(
    creds: &Credentials,
    who: &str,
    details: DetailArgs,
    password: Option<&str>,
) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let (id, username) = resolve(&app, &session, who);
    let current = app.patients.get(&session, &id)?;

    let merged = PatientDetails {
        name: details.name.unwrap_or(current.name),
        dob: details
            .dob
            .unwrap_or_else(|| current.dob.format(DATE_FORMAT).to_string()),
        contact: details.contact.unwrap_or(current.contact),
    };
    app.patients.modify_patient(&session, &id, &merged)?;
    println!("Updated patient {}", id);

    if let Some(password) = password {
        let username = username.as_deref().unwrap_or(who);
        app.accounts.set_password(&session, username, password)?;
        println!("Password changed for {}", username);
    }
    Ok(())
}

/// Run the patient note command
pub fn run_patient_note(creds: &Credentials, who: &str, text: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let (id, _) = resolve(&app, &session, who);
    let note = app.patients.add_medical_note(&session, &id, text)?;
    println!("Added note to {} at {}", id, note.date.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

/// Run the patient prescriptions command
pub fn run_patient_prescriptions(creds: &Credentials, who: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let (id, username) = resolve(&app, &session, who);
    let record = app.patients.get(&session, &id)?;

    print_summary(&id, &record, username.as_deref());
    print_prescriptions(&record);
    Ok(())
}
