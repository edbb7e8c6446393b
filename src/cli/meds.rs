use super::{open_session, App, Credentials};
use crate::error::Result;
use crate::evaluator::DoseState;
use crate::session::Session;
use crate::types::{
    DoseStatus, HistoryEntry, Medication, MedicationForm, MedicationStatus, MedicationUpdate,
    DATE_FORMAT, TIME_FORMAT,
};

/// Fields for a new medication
#[derive(Debug, Clone, Default)]
pub struct MedArgs {
    pub name: String,
    pub dosage: String,
    pub time: String,
    pub instructions: Option<String>,
    pub status: Option<String>,
    pub start: Option<String>,
}

/// Fields to change on an existing medication
#[derive(Debug, Clone, Default)]
pub struct MedEditArgs {
    pub dosage: Option<String>,
    pub time: Option<String>,
    pub instructions: Option<String>,
    pub status: Option<String>,
}

fn parse_status(status: Option<&str>) -> Result<Option<MedicationStatus>> {
    status.map(str::parse).transpose()
}

/// Mirror a physician's change into the patient's registry record
fn sync_prescription(app: &App, session: &Session, patient: &str, med: &Medication) {
    if !session.is_physician() {
        return;
    }
    if let Some(id) = app.patient_id(session, patient) {
        if let Err(e) = app.patients.record_prescription(session, &id, med) {
            tracing::warn!(patient, medication = %med.name, error = %e, "Registry not updated");
        }
    }
}

fn print_medication(med: &Medication) {
    println!(
        "{} - {} at {} [{}]",
        med.name,
        med.dosage,
        med.schedule_time.format(TIME_FORMAT),
        med.status
    );
    if let Some(instructions) = &med.instructions {
        println!("    {}", instructions);
    }
    let mut details = vec![format!("since {}", med.start_date.format(DATE_FORMAT))];
    if let Some(by) = &med.prescribed_by {
        details.push(format!("prescribed by {}", by));
    }
    details.push(format!("streak {}", med.streak));
    println!("    {}", details.join(", "));
}

/// Run the med add command
pub fn run_med_add(creds: &Credentials, patient: Option<&str>, args: MedArgs) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let form = MedicationForm {
        name: args.name,
        dosage: args.dosage,
        schedule_time: args.time,
        instructions: args.instructions,
        status: parse_status(args.status.as_deref())?,
        start_date: args.start,
    };
    let med = app.tracker.add_medication(&session, &patient, form)?;
    sync_prescription(&app, &session, &patient, &med);

    println!("Added medication for {}:", patient);
    print_medication(&med);
    Ok(())
}

/// Run the med edit command
pub fn run_med_edit(
    creds: &Credentials,
    patient: Option<&str>,
    name: &str,
    args: MedEditArgs,
) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let update = MedicationUpdate {
        dosage: args.dosage,
        schedule_time: args.time,
        instructions: args.instructions,
        status: parse_status(args.status.as_deref())?,
    };
    let med = app.tracker.update_medication(&session, &patient, name, &update)?;
    sync_prescription(&app, &session, &patient, &med);

    println!("Updated medication for {}:", patient);
    print_medication(&med);
    Ok(())
}

/// Run the med remove command
pub fn run_med_remove(creds: &Credentials, patient: Option<&str>, name: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let removed = app.tracker.remove_medication(&session, &patient, name)?;
    if session.is_physician() {
        if let Some(id) = app.patient_id(&session, &patient) {
            let discontinued =
                app.patients
                    .update_prescription_status(&session, &id, name, MedicationStatus::Discontinued);
            if let Err(e) = discontinued {
                tracing::warn!(patient = %patient, medication = name, error = %e, "Registry not updated");
            }
        }
    }

    println!("Removed {} ({}) for {}", removed.name, removed.dosage, patient);
    Ok(())
}

/// Run the med list command
pub fn run_med_list(creds: &Credentials, patient: Option<&str>) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();
    let meds = app.tracker.medications(&session, &patient)?;

    if meds.is_empty() {
        println!("No medications prescribed for {}.", patient);
        return Ok(());
    }

    for med in &meds {
        print_medication(med);
    }
    Ok(())
}

fn state_marker(state: DoseState) -> &'static str {
    match state {
        DoseState::NotYetDue => " ",
        DoseState::DueNow | DoseState::Overdue => "!",
        DoseState::TakenOnTime | DoseState::TakenLate => "x",
        DoseState::Missed => "-",
    }
}

/// Run the status command
pub fn run_status(creds: &Credentials) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let overview = app.tracker.today(&session)?;

    if overview.is_empty() {
        println!("No active medications.");
        return Ok(());
    }

    println!("Today ({}):\n", app.tracker.now().format(DATE_FORMAT));
    for dose in overview {
        let c = dose.classification;
        let logged = match &dose.today {
            Some(entry) if entry.status.is_taken() => {
                format!("  taken {}", entry.time.format(TIME_FORMAT))
            }
            _ => String::new(),
        };
        println!(
            "[{}] {:20} {:10} {}  {:8} streak {}{}{}",
            state_marker(c.state),
            dose.medication.name,
            dose.medication.dosage,
            dose.medication.schedule_time.format(TIME_FORMAT),
            c.status_text(),
            dose.medication.streak,
            logged,
            if c.is_actionable { "  (take now)" } else { "" }
        );
    }
    Ok(())
}

/// Run the take command
pub fn run_take(creds: &Credentials, name: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let entry = app.tracker.take_medication(&session, name)?;
    let med = app.tracker.medication(&session, session.username(), name)?;

    println!(
        "Took {} at {} ({}), streak {}",
        name,
        entry.time.format(TIME_FORMAT),
        entry.status,
        med.streak
    );
    Ok(())
}

fn print_entry(entry: &HistoryEntry) {
    let marker = match entry.status {
        DoseStatus::OnTime => "x",
        DoseStatus::Late => "~",
        DoseStatus::Missed => "-",
        DoseStatus::Pending => "?",
    };
    println!(
        "  [{}] {} {}  {}",
        marker,
        entry.date.format(DATE_FORMAT),
        entry.time.format(TIME_FORMAT),
        entry.status
    );
}

/// Run the history command
pub fn run_history(
    creds: &Credentials,
    patient: Option<&str>,
    name: &str,
    limit: usize,
) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();
    let ledger = app.tracker.history(&session, &patient, name)?;

    println!("{} for {}: streak {}", name, patient, ledger.streak);
    if ledger.history.is_empty() {
        println!("  No doses recorded yet.");
        return Ok(());
    }

    let skip = ledger.history.len().saturating_sub(limit);
    for entry in &ledger.history[skip..] {
        print_entry(entry);
    }

    let taken = ledger.history.iter().filter(|e| e.status.is_taken()).count();
    let on_time = ledger
        .history
        .iter()
        .filter(|e| e.status == DoseStatus::OnTime)
        .count();
    let missed = ledger
        .history
        .iter()
        .filter(|e| e.status == DoseStatus::Missed)
        .count();
    println!(
        "\n{} taken ({} on time), {} missed",
        taken, on_time, missed
    );
    Ok(())
}

/// Run the prune command
pub fn run_prune(creds: &Credentials, patient: Option<&str>, days: u32) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();
    let pruned = app.tracker.prune_history(&session, &patient, days)?;
    println!("Pruned {} entries older than {} days for {}", pruned, days, patient);
    Ok(())
}
