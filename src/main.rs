use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::router;
use mpi_core::{
    config::match_config_from_env, constants::DEFAULT_PATIENT_DATA_DIR, FileRecordStore,
    PatientStore, ResolutionService,
};

/// Main entry point for the MPI service
///
/// Opens the file-backed record store, finishes any merge interrupted by a previous crash, and
/// serves the REST API.
///
/// # Environment Variables
/// - `MPI_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `PATIENT_DATA_DIR`: Directory for patient data storage (default: "patient_data")
/// - `MPI_CANDIDATE_WINDOW`: Records scanned per fuzzy rule (default: 10)
/// - `MPI_CHECK_TIMEOUT_MS`: Deadline for one duplicate check; unset or 0 disables it
/// - `MPI_FAILURE_POLICY`: `open` or `closed` (default: open)
/// - `MPI_CANDIDATE_STRATEGY`: `scan` or `blocking` (default: scan)
/// - `MPI_NATIONAL_ID_LENGTH`: Length a national ID must have to be matched exactly (default: 12)
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, store start-up or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mpi=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("MPI_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let patient_data_dir = std::env::var("PATIENT_DATA_DIR")
        .unwrap_or_else(|_| DEFAULT_PATIENT_DATA_DIR.into());

    let cfg = Arc::new(match_config_from_env()?);
    tracing::info!(
        window = cfg.candidate_window(),
        policy = ?cfg.failure_policy(),
        strategy = ?cfg.candidate_strategy(),
        "match configuration loaded"
    );

    let file_store = FileRecordStore::open(&patient_data_dir).await?;
    let recovered = file_store.recover_pending_merges().await?;
    if recovered > 0 {
        tracing::warn!("-- Recovered {} interrupted merge(s)", recovered);
    }

    let store: Arc<dyn PatientStore> = Arc::new(file_store);
    let resolver = Arc::new(ResolutionService::new(store, cfg));

    tracing::info!("++ Starting MPI REST on {}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, router(resolver)).await?;

    Ok(())
}
