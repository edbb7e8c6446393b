use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod accounts;
mod appointments;
mod cli;
mod clock;
mod config;
mod error;
mod evaluator;
mod notify;
mod patients;
mod scheduler;
mod session;
mod storage;
mod tracker;
mod tracking;
mod types;

use cli::account::DetailArgs;
use cli::meds::{MedArgs, MedEditArgs};
use cli::Credentials;

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(version)]
#[command(about = "Medication reminders and adherence tracking")]
struct Cli {
    /// Username to act as
    #[arg(short, long, global = true, env = "MEDTRACK_USER")]
    user: Option<String>,

    /// Password (prompted when omitted)
    #[arg(short, long, global = true, env = "MEDTRACK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a .medtrack directory
    Init {
        /// Directory to initialize .medtrack in
        #[arg(long, default_value = ".")]
        path: String,

        /// Use the per-user data directory instead
        #[arg(long)]
        global: bool,
    },

    /// Create an account (username and password from --user/--password)
    Signup {
        /// patient or physician
        #[arg(short, long, default_value = "patient")]
        role: String,

        /// Full name (patients)
        #[arg(long)]
        name: Option<String>,

        /// Date of birth, YYYY-MM-DD (patients)
        #[arg(long)]
        dob: Option<String>,

        /// Contact number (patients)
        #[arg(long)]
        contact: Option<String>,
    },

    /// Show the logged-in account
    Whoami,

    /// Manage medications
    #[command(subcommand)]
    Med(MedCommands),

    /// Today's doses and what can be taken now
    Status,

    /// Log a dose as taken now
    Take {
        /// Medication name
        name: String,
    },

    /// Adherence history for a medication
    History {
        /// Medication name
        name: String,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,

        /// Maximum entries
        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
    },

    /// Delete history entries older than a number of days
    Prune {
        /// Days of history to keep
        #[arg(short, long)]
        days: u32,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// Run the reminder scheduler in the foreground
    Watch,

    /// Manage appointments
    #[command(subcommand)]
    Appt(ApptCommands),

    /// Patient registry (physicians)
    #[command(subcommand)]
    Patient(PatientCommands),

    /// Add a timestamped note to an account
    Note {
        /// Note text
        text: String,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// View or set configuration
    Config {
        /// Config key
        key: Option<String>,

        /// Config value
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum MedCommands {
    /// Prescribe a medication
    Add {
        /// Medication name
        name: String,

        /// Dosage, e.g. 81mg
        #[arg(short, long)]
        dosage: String,

        /// Daily time, HH:MM
        #[arg(short, long)]
        time: String,

        /// Instructions
        #[arg(short, long)]
        instructions: Option<String>,

        /// Active, discontinued or on-hold
        #[arg(short, long)]
        status: Option<String>,

        /// Start date, YYYY-MM-DD (default today)
        #[arg(long)]
        start: Option<String>,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// Change a medication
    Edit {
        /// Medication name
        name: String,

        /// New dosage
        #[arg(short, long)]
        dosage: Option<String>,

        /// New daily time, HH:MM
        #[arg(short, long)]
        time: Option<String>,

        /// New instructions (empty to clear)
        #[arg(short, long)]
        instructions: Option<String>,

        /// New status
        #[arg(short, long)]
        status: Option<String>,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// Remove a medication and its history
    Remove {
        /// Medication name
        name: String,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// List medications
    List {
        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },
}

#[derive(Subcommand)]
enum ApptCommands {
    /// Schedule an appointment
    Add {
        /// Date, YYYY-MM-DD
        date: String,

        /// Time, HH:MM
        time: String,

        /// What it is for
        title: String,

        /// Notes
        #[arg(long, default_value = "")]
        notes: String,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// List upcoming appointments, or one day's schedule
    List {
        /// Date, YYYY-MM-DD
        #[arg(short, long)]
        date: Option<String>,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },

    /// Cancel an appointment
    Cancel {
        /// Appointment id
        id: String,

        /// Patient username (physicians)
        #[arg(long)]
        patient: Option<String>,
    },
}

#[derive(Subcommand)]
enum PatientCommands {
    /// List registered patients
    List,

    /// Register a patient without an account
    Add {
        #[arg(long)]
        name: String,

        /// YYYY-MM-DD
        #[arg(long)]
        dob: String,

        #[arg(long)]
        contact: String,
    },

    /// Show a patient's record (username or id)
    Show { who: String },

    /// Find a patient by full name
    Find { name: String },

    /// Change a patient's details or password
    Edit {
        /// Username or id
        who: String,

        #[arg(long)]
        name: Option<String>,

        /// YYYY-MM-DD
        #[arg(long)]
        dob: Option<String>,

        #[arg(long)]
        contact: Option<String>,

        /// New account password
        #[arg(long)]
        new_password: Option<String>,
    },

    /// Add a medical note to a patient's record
    Note {
        /// Username or id
        who: String,

        /// Note text
        text: String,
    },

    /// Prescription history
    Prescriptions {
        /// Username or id
        who: String,
    },
}

fn init_tracing() {
    let configured = config::find_data_path()
        .map(|p| config::ConfigFile::new(p).config().log_filter.clone())
        .unwrap_or_else(|| config::default_log_filter().to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let creds = Credentials {
        user: cli.user,
        password: cli.password,
    };

    let result = match cli.command {
        Commands::Init { path, global } => cli::account::run_init(&path, global),
        Commands::Signup {
            role,
            name,
            dob,
            contact,
        } => cli::account::run_signup(&creds, &role, DetailArgs { name, dob, contact }),
        Commands::Whoami => cli::account::run_whoami(&creds),
        Commands::Med(cmd) => match cmd {
            MedCommands::Add {
                name,
                dosage,
                time,
                instructions,
                status,
                start,
                patient,
            } => cli::meds::run_med_add(
                &creds,
                patient.as_deref(),
                MedArgs {
                    name,
                    dosage,
                    time,
                    instructions,
                    status,
                    start,
                },
            ),
            MedCommands::Edit {
                name,
                dosage,
                time,
                instructions,
                status,
                patient,
            } => cli::meds::run_med_edit(
                &creds,
                patient.as_deref(),
                &name,
                MedEditArgs {
                    dosage,
                    time,
                    instructions,
                    status,
                },
            ),
            MedCommands::Remove { name, patient } => {
                cli::meds::run_med_remove(&creds, patient.as_deref(), &name)
            }
            MedCommands::List { patient } => cli::meds::run_med_list(&creds, patient.as_deref()),
        },
        Commands::Status => cli::meds::run_status(&creds),
        Commands::Take { name } => cli::meds::run_take(&creds, &name),
        Commands::History {
            name,
            patient,
            limit,
        } => cli::meds::run_history(&creds, patient.as_deref(), &name, limit),
        Commands::Prune { days, patient } => cli::meds::run_prune(&creds, patient.as_deref(), days),
        Commands::Watch => cli::watch::run_watch(&creds),
        Commands::Appt(cmd) => match cmd {
            ApptCommands::Add {
                date,
                time,
                title,
                notes,
                patient,
            } => cli::appointments::run_appt_add(
                &creds,
                patient.as_deref(),
                appointments::AppointmentForm {
                    date,
                    time,
                    title,
                    notes,
                },
            ),
            ApptCommands::List { date, patient } => {
                cli::appointments::run_appt_list(&creds, patient.as_deref(), date.as_deref())
            }
            ApptCommands::Cancel { id, patient } => {
                cli::appointments::run_appt_cancel(&creds, patient.as_deref(), &id)
            }
        },
        Commands::Patient(cmd) => match cmd {
            PatientCommands::List => cli::patients::run_patient_list(&creds),
            PatientCommands::Add { name, dob, contact } => cli::patients::run_patient_add(
                &creds,
                patients::PatientDetails { name, dob, contact },
            ),
            PatientCommands::Show { who } => cli::patients::run_patient_show(&creds, &who),
            PatientCommands::Find { name } => cli::patients::run_patient_find(&creds, &name),
            PatientCommands::Edit {
                who,
                name,
                dob,
                contact,
                new_password,
            } => cli::patients::run_patient_edit(
                &creds,
                &who,
                DetailArgs { name, dob, contact },
                new_password.as_deref(),
            ),
            PatientCommands::Note { who, text } => {
                cli::patients::run_patient_note(&creds, &who, &text)
            }
            PatientCommands::Prescriptions { who } => {
                cli::patients::run_patient_prescriptions(&creds, &who)
            }
        },
        Commands::Note { text, patient } => cli::account::run_note(&creds, patient.as_deref(), &text),
        Commands::Config { key, value } => cli::config::run_config(key.as_deref(), value.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        // Distinguish "no such record" from real failures for scripts
        std::process::exit(if e.is_lookup_miss() { 2 } else { 1 });
    }
}
