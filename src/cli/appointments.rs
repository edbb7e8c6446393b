use super::{open_session, Credentials};
use crate::appointments::{Appointment, AppointmentForm};
use crate::error::Result;
use crate::types::{parse_date, DATE_FORMAT, TIME_FORMAT};

fn print_appointment(appt: &Appointment) {
    print!("  {} {}  [{}]", appt.time.format(TIME_FORMAT), appt.title, appt.id);
    if let Some(by) = &appt.physician {
        print!("  with {}", by);
    }
    println!();
    if !appt.notes.is_empty() {
        println!("      {}", appt.notes);
    }
}

/// Run the appt add command
pub fn run_appt_add(creds: &Credentials, patient: Option<&str>, form: AppointmentForm) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let (date, appt) = app.appointments.schedule(&session, &patient, &form)?;
    println!(
        "Scheduled '{}' for {} on {} at {} [{}]",
        appt.title,
        patient,
        date.format(DATE_FORMAT),
        appt.time.format(TIME_FORMAT),
        appt.id
    );
    Ok(())
}

/// Run the appt list command: one day's schedule, or everything upcoming
pub fn run_appt_list(creds: &Credentials, patient: Option<&str>, date: Option<&str>) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let Some(date) = date else {
        let upcoming = app.appointments.upcoming(&session, &patient)?;
        if upcoming.is_empty() {
            println!("No upcoming appointments for {}.", patient);
            return Ok(());
        }
        let mut current = None;
        for (day, appt) in &upcoming {
            if current != Some(*day) {
                println!("{}:", day.format(DATE_FORMAT));
                current = Some(*day);
            }
            print_appointment(appt);
        }
        return Ok(());
    };

    let date = parse_date("date", date)?;
    println!("Schedule for {}:\n", date.format(DATE_FORMAT));

    let appts = app.appointments.on_date(&session, &patient, date)?;
    if appts.is_empty() {
        println!("No appointments.");
    } else {
        println!("Appointments:");
        appts.iter().for_each(print_appointment);
    }

    let mut meds: Vec<_> = app
        .tracker
        .medications(&session, &patient)?
        .into_iter()
        .filter(|m| m.is_active() && m.start_date <= date)
        .collect();
    meds.sort_by_key(|m| m.schedule_time);
    if meds.is_empty() {
        println!("\nNo medications scheduled for this date.");
    } else {
        println!("\nMedications:");
        for med in meds {
            println!(
                "  {} {} - {}",
                med.schedule_time.format(TIME_FORMAT),
                med.name,
                med.dosage
            );
        }
    }
    Ok(())
}

/// Run the appt cancel command
pub fn run_appt_cancel(creds: &Credentials, patient: Option<&str>, id: &str) -> Result<()> {
    let (app, session) = open_session(creds)?;
    let patient = patient.unwrap_or(session.username()).to_string();

    let (date, appt) = app.appointments.cancel(&session, &patient, id)?;
    println!(
        "Cancelled '{}' on {} at {}",
        appt.title,
        date.format(DATE_FORMAT),
        appt.time.format(TIME_FORMAT)
    );
    Ok(())
}
