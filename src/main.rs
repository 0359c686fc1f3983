use clap::Parser;
use consult_escrow::application::orchestrator::PaymentOrchestrator;
use consult_escrow::application::scheduler::AutoReleaseScheduler;
use consult_escrow::config::{EscrowConfig, GatewayMode};
use consult_escrow::domain::fee::FeePolicy;
use consult_escrow::domain::ports::PaymentLedgerBox;
use consult_escrow::infrastructure::gateway;
use consult_escrow::infrastructure::in_memory::{
    InMemoryAppointmentDirectory, InMemoryPaymentLedger, ParticipantAuthorizer,
};
#[cfg(feature = "storage-rocksdb")]
use consult_escrow::infrastructure::rocksdb::RocksDbLedger;
use consult_escrow::interfaces::csv::appointment_reader::AppointmentReader;
use consult_escrow::interfaces::json::command::CommandReader;
use consult_escrow::interfaces::json::handler;
use consult_escrow::interfaces::json::response::ResponseWriter;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON-lines file with one escrow command per line
    commands: PathBuf,

    /// Appointments CSV file (id,base_price,scheduled_at,patient_id,doctor_id)
    #[arg(long)]
    appointments: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Platform fee rate applied on top of the base price, e.g. 0.20
    #[arg(long)]
    fee_rate: Option<Decimal>,

    /// Minutes after the scheduled start before held funds auto-release
    #[arg(long)]
    confirmation_window_minutes: Option<i64>,

    /// Upper bound on a single payment gateway call
    #[arg(long)]
    gateway_timeout_ms: Option<u64>,

    /// Base URL of the live payment processor. Uses the mock gateway if unset.
    #[arg(long, requires = "api_key")]
    gateway_url: Option<String>,

    /// Bearer token for the live payment processor
    #[arg(long)]
    api_key: Option<String>,

    /// Also run the auto-release scheduler every N seconds while replaying
    #[arg(long)]
    sweep_every_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> Result<EscrowConfig> {
        let mut config = EscrowConfig::from_env().into_diagnostic()?;

        if let Some(rate) = self.fee_rate {
            config.fee_policy = FeePolicy::new(rate).into_diagnostic()?;
        }
        if let Some(minutes) = self.confirmation_window_minutes {
            config = config
                .with_confirmation_window_minutes(minutes)
                .into_diagnostic()?;
        }
        if let Some(ms) = self.gateway_timeout_ms {
            config.gateway_timeout = Duration::from_millis(ms);
        }
        if let (Some(base_url), Some(api_key)) = (&self.gateway_url, &self.api_key) {
            config.gateway = GatewayMode::Live {
                base_url: base_url.clone(),
                api_key: api_key.clone(),
            };
        }
        if let Some(secs) = self.sweep_every_secs {
            config.sweep_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<PaymentLedgerBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Box::new(RocksDbLedger::open(path).into_diagnostic()?)),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Box::new(InMemoryPaymentLedger::new()))
        }
        None => Ok(Box::new(InMemoryPaymentLedger::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    // Load the appointment boundary
    let directory = InMemoryAppointmentDirectory::new();
    let authorizer = ParticipantAuthorizer::new();
    if let Some(path) = &cli.appointments {
        let file = File::open(path).into_diagnostic()?;
        for row in AppointmentReader::new(file).appointments() {
            match row {
                Ok(row) => {
                    directory.insert(row.appointment()).await;
                    authorizer.register(row.id, row.participants()).await;
                }
                Err(e) => eprintln!("Error reading appointment: {}", e),
            }
        }
    }

    let gateway = gateway::build(&config).into_diagnostic()?;
    let sweep_every = cli.sweep_every_secs.map(|_| config.sweep_interval);
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        open_ledger(cli.db_path.clone())?,
        Box::new(directory),
        Box::new(authorizer),
        gateway,
        config,
    ));

    let scheduler = sweep_every.map(|every| {
        let (tx, rx) = watch::channel(false);
        let scheduler = AutoReleaseScheduler::new(Arc::clone(&orchestrator), every);
        (tx, tokio::spawn(scheduler.run(rx)))
    });

    // Replay commands
    let file = File::open(&cli.commands).into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ResponseWriter::new(stdout.lock());
    let mut replayed = 0usize;
    for command in CommandReader::new(BufReader::new(file)).commands() {
        match command {
            Ok(command) => {
                let response = handler::handle(&orchestrator, command).await;
                writer.write_response(&response).into_diagnostic()?;
                replayed += 1;
            }
            Err(e) => eprintln!("Error reading command: {}", e),
        }
    }
    info!(replayed, "command replay finished");

    if let Some((shutdown, handle)) = scheduler {
        // The receiver may already be gone if the task ended on its own.
        let _ = shutdown.send(true);
        handle.await.into_diagnostic()?;
    }

    Ok(())
}
