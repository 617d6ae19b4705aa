//! Command-line front end for the master patient index.
//!
//! Works directly on the file-backed store under `PATIENT_DATA_DIR` (or `--data-dir`).

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mpi_core::{
    config::match_config_from_env, constants::DEFAULT_PATIENT_DATA_DIR, Actor,
    DuplicateCheckResult, FileRecordStore, Gender, PatientDraft, PatientStatus, ResolutionService,
    StoredPatient, SuggestedAction,
};
use mpi_uuid::PatientId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mpi")]
#[command(about = "Master patient index CLI")]
struct Cli {
    /// Patient data directory (defaults to $PATIENT_DATA_DIR, then ./patient_data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check demographics for existing duplicates
    Check {
        #[command(flatten)]
        draft: DraftArgs,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check for duplicates, then register the patient unless an exact match blocks it
    Register {
        #[command(flatten)]
        draft: DraftArgs,
        /// Register even when the check suggests blocking
        #[arg(long)]
        force: bool,
    },
    /// Merge duplicate records into a primary record
    Merge {
        /// Primary patient id
        primary: String,
        /// Duplicate patient ids
        #[arg(required = true)]
        duplicates: Vec<String>,
        /// Who is performing the merge (defaults to "system")
        #[arg(long)]
        actor: Option<String>,
    },
    /// Show every merge involving a patient
    History {
        /// Patient id
        id: String,
    },
    /// List all patients
    List,
}

#[derive(Args)]
struct DraftArgs {
    /// First name
    #[arg(long)]
    first_name: Option<String>,
    /// Last name
    #[arg(long)]
    last_name: Option<String>,
    /// Phone number, any formatting
    #[arg(long)]
    phone: Option<String>,
    /// National ID
    #[arg(long)]
    national_id: Option<String>,
    /// Health-account ID
    #[arg(long)]
    health_account_id: Option<String>,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    dob: Option<NaiveDate>,
    /// Gender
    #[arg(long, value_enum)]
    gender: Option<GenderArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum GenderArg {
    Male,
    Female,
    Other,
    Unknown,
}

impl From<GenderArg> for Gender {
    fn from(arg: GenderArg) -> Self {
        match arg {
            GenderArg::Male => Gender::Male,
            GenderArg::Female => Gender::Female,
            GenderArg::Other => Gender::Other,
            GenderArg::Unknown => Gender::Unknown,
        }
    }
}

impl From<DraftArgs> for PatientDraft {
    fn from(args: DraftArgs) -> Self {
        PatientDraft {
            id: None,
            first_name: args.first_name.unwrap_or_default(),
            last_name: args.last_name.unwrap_or_default(),
            phone: args.phone.unwrap_or_default(),
            national_id: args.national_id,
            health_account_id: args.health_account_id,
            date_of_birth: args.dob,
            gender: args.gender.map(Gender::from),
        }
    }
}

fn print_check(result: &DuplicateCheckResult) {
    println!(
        "Suggested action: {:?} (confidence {})",
        result.suggested_action, result.confidence
    );
    if !result.has_duplicates {
        println!("No duplicates found.");
        return;
    }
    for (label, matches) in [
        ("Exact", &result.exact_matches),
        ("Potential", &result.potential_matches),
    ] {
        for m in matches {
            println!(
                "{} match: ID: {}, Name: {} {}, Score: {}, Reasons: {}",
                label,
                m.patient_id,
                m.patient.first_name,
                m.patient.last_name,
                m.match_score,
                m.match_reasons.join("; ")
            );
        }
    }
}

fn print_patient(patient: &StoredPatient) {
    let status = match patient.status() {
        PatientStatus::Merged { into } => format!("merged into {}", into),
        PatientStatus::Active => "active".to_string(),
    };
    println!(
        "ID: {}, Name: {} {}, Phone: {}, Created: {}, Status: {}",
        patient.id,
        patient.first_name,
        patient.last_name,
        patient.phone,
        patient.created_at.to_rfc3339(),
        status
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("mpi=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'mpi --help' for commands");
        return Ok(());
    };

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        std::env::var("PATIENT_DATA_DIR")
            .unwrap_or_else(|_| DEFAULT_PATIENT_DATA_DIR.into())
            .into()
    });
    let store = Arc::new(
        FileRecordStore::open(&data_dir)
            .await
            .with_context(|| format!("opening patient data at {}", data_dir.display()))?,
    );
    let recovered = store.recover_pending_merges().await?;
    if recovered > 0 {
        eprintln!("Recovered {} interrupted merge(s).", recovered);
    }

    let cfg = Arc::new(match_config_from_env()?);
    let resolver = ResolutionService::new(store.clone(), cfg);

    match command {
        Commands::Check { draft, json } => {
            let result = resolver.check_duplicates(&draft.into()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_check(&result);
            }
        }
        Commands::Register { draft, force } => {
            let draft: PatientDraft = draft.into();
            let result = resolver.check_duplicates(&draft).await?;
            print_check(&result);

            if result.suggested_action == SuggestedAction::Block && !force {
                anyhow::bail!("registration blocked by an exact match; use --force to override");
            }

            let patient = StoredPatient::from_draft(&draft, Utc::now());
            store.insert(&patient).await?;
            println!("Registered patient with ID: {}", patient.id);
        }
        Commands::Merge {
            primary,
            duplicates,
            actor,
        } => {
            let primary = PatientId::parse(&primary)?;
            let duplicates = duplicates
                .iter()
                .map(|id| PatientId::parse(id))
                .collect::<Result<Vec<_>, _>>()?;
            let actor = match actor {
                Some(name) => Actor::new(name)?,
                None => Actor::system(),
            };

            let record = resolver.merge_patients(primary, duplicates, actor).await?;
            println!(
                "Merged {} record(s) into {} (merge {})",
                record.duplicate_ids.len(),
                record.primary_id,
                record.id
            );
        }
        Commands::History { id } => {
            let id = PatientId::parse(&id)?;
            let history = resolver.merge_history(id).await?;
            if history.is_empty() {
                println!("No merges found.");
            }
            for record in history {
                let duplicates: Vec<String> =
                    record.duplicate_ids.iter().map(ToString::to_string).collect();
                println!(
                    "Merge: {}, Primary: {}, Duplicates: {}, By: {}, At: {}",
                    record.id,
                    record.primary_id,
                    duplicates.join(", "),
                    record.merged_by,
                    record.merged_at.to_rfc3339()
                );
            }
        }
        Commands::List => {
            let patients = store.list_patients().await?;
            if patients.is_empty() {
                println!("No patients found.");
            }
            for patient in &patients {
                print_patient(patient);
            }
        }
    }

    Ok(())
}
