use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod auth;
mod config;
mod export;
mod models;
mod report;
mod store;
mod view;

use aggregate::{Aggregator, Dashboard, Dataset};
use auth::{IdentityProvider, SessionFile};
use config::Config;
use export::{ExportFormat, ExportScope};
use store::{DocumentStore, MemoryStore, PgDocumentStore};
use view::{CollegeFilter, EventSelection, Facet, FilterState, ParticipantFilter, SortMode};

#[derive(Parser)]
#[command(name = "regdash")]
#[command(about = "Registration dashboard for event organisers", long_about = None)]
struct Cli {
    /// Read documents from a JSON snapshot instead of Postgres
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the document schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import registrations for one event from a CSV file
    Import {
        #[arg(long)]
        collection: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record the principal reported by the identity provider
    Login {
        #[arg(long)]
        email: String,
    },
    /// Forget the signed-in principal
    Logout,
    /// Show the signed-in principal
    Whoami,
    /// Overall statistics from the counters document
    Stats,
    /// Unique participants across all events
    Participants {
        #[arg(long, value_enum, default_value_t = CollegeFilter::All)]
        college: CollegeFilter,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Registrations for one event or all events combined
    Registrations {
        /// `all`, an event id, or `event:<id>` for an event whose id is `all`
        #[arg(long, default_value = "all")]
        event: EventSelection,
        #[arg(long, value_enum, default_value_t = CollegeFilter::All)]
        college: CollegeFilter,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long, default_value = "")]
        search: String,
        /// Defaults to name order for all events and fetch order for a single event
        #[arg(long, value_enum)]
        sort: Option<SortMode>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export every registration of one event, or of all events, to a file
    Export {
        /// `all`, an event id, or `event:<id>` for an event whose id is `all`
        #[arg(long, default_value = "all")]
        event: EventSelection,
        #[arg(long, value_enum, default_value_t = ExportFormat::Xlsx)]
        format: ExportFormat,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

async fn postgres(config: &Config) -> anyhow::Result<PgDocumentStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;
    PgDocumentStore::connect(database_url, config.max_connections)
        .await
        .context("failed to connect to Postgres")
}

async fn document_store(
    config: &Config,
    snapshot: Option<&Path>,
) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match snapshot {
        Some(path) => Ok(Arc::new(MemoryStore::from_path(path)?)),
        None => Ok(Arc::new(postgres(config).await?)),
    }
}

fn resolve_event<'a>(
    config: &'a Config,
    selection: &EventSelection,
) -> anyhow::Result<Option<&'a models::EventInfo>> {
    match selection {
        EventSelection::All => Ok(None),
        EventSelection::Event(id) => match config.event(id) {
            Some(event) => Ok(Some(event)),
            None => bail!(
                "unknown event {id:?}; configured events: {}",
                config
                    .events
                    .iter()
                    .map(|e| e.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        },
    }
}

async fn load_dataset(aggregator: Aggregator, events: &[models::EventInfo]) -> Dataset {
    let mut dashboard = Dashboard::new(aggregator);
    dashboard.reload(events).await;
    let dataset = dashboard.dataset().cloned().unwrap_or_default();
    info!(
        events = dataset.events.len(),
        registrations = dataset.total(),
        "dataset ready"
    );
    dataset
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let session = SessionFile::new(&config.session_path);

    match cli.command {
        Commands::InitDb => {
            postgres(&config).await?.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store::seed(&postgres(&config).await?).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { collection, csv } => {
            if config.event(&collection).is_none() {
                info!(
                    collection = %collection,
                    "importing into a collection outside the event catalogue"
                );
            }
            let documents = postgres(&config).await?;
            let imported = store::import_csv(&documents, &collection, &csv).await?;
            println!("Imported {imported} registrations from {}.", csv.display());
        }
        Commands::Login { email } => {
            let principal = session.sign_in(&email)?;
            println!(
                "Signed in as {} (session stored in {}).",
                principal.email,
                session.path().display()
            );
        }
        Commands::Logout => {
            session.sign_out()?;
            println!("Signed out.");
        }
        Commands::Whoami => match session.current()? {
            Some(principal) => println!(
                "{} (since {})",
                principal.email,
                principal.signed_in_at.format("%Y-%m-%d %H:%M UTC")
            ),
            None => println!("Not signed in."),
        },
        Commands::Stats => {
            session.require().context("run `regdash login` first")?;
            let documents = document_store(&config, cli.snapshot.as_deref()).await?;
            let aggregator = Aggregator::new(documents);
            let summary = aggregator
                .load_summary(&config.stats_collection, &config.stats_document)
                .await;
            print!(
                "{}",
                report::build_dashboard(
                    summary.stats.as_ref(),
                    &config.events,
                    summary.failure.as_ref()
                )
            );
        }
        Commands::Participants { college, search } => {
            session.require().context("run `regdash login` first")?;
            let documents = document_store(&config, cli.snapshot.as_deref()).await?;
            let aggregator = Aggregator::new(documents);
            let participants = aggregator
                .load_participants(&config.participants_collection)
                .await;
            let filtered = view::filter_participants(
                &participants.records,
                &ParticipantFilter { college, search },
            );
            let summary = view::summarize_participants(&participants.records, &filtered);
            print!(
                "{}",
                report::build_participants(&summary, &filtered, participants.failure.as_ref())
            );
        }
        Commands::Registrations {
            event,
            college,
            branch,
            year,
            search,
            sort,
            out,
        } => {
            session.require().context("run `regdash login` first")?;
            let selected = resolve_event(&config, &event)?;
            let events = match selected {
                Some(event) => vec![event.clone()],
                None => config.events.clone(),
            };
            let documents = document_store(&config, cli.snapshot.as_deref()).await?;
            let dataset = load_dataset(Aggregator::new(documents), &events).await;

            let filters = FilterState {
                event,
                college,
                branch: Facet::from_option(branch),
                year: Facet::from_option(year),
                search,
                sort,
            };
            let displayed = view::compute_view(&dataset, &filters);
            let summary = view::summarize(&dataset, &filters, &displayed);
            let title = selected.map(|e| e.name.as_str()).unwrap_or("All Events");
            let rendered = report::build_registrations(
                title,
                &summary,
                &displayed,
                selected.is_none(),
                &dataset.failures,
            );

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
            if !dataset.branches.is_empty() || !dataset.years.is_empty() {
                info!(branches = ?dataset.branches, years = ?dataset.years, "available facets");
            }
        }
        Commands::Export {
            event,
            format,
            out_dir,
        } => {
            session.require().context("run `regdash login` first")?;
            let selected = resolve_event(&config, &event)?;
            let events = match selected {
                Some(event) => vec![event.clone()],
                None => config.events.clone(),
            };
            let documents = document_store(&config, cli.snapshot.as_deref()).await?;
            let dataset = load_dataset(Aggregator::new(documents), &events).await;
            for failure in &dataset.failures {
                eprintln!(
                    "Warning: could not load {} ({})",
                    failure.source, failure.message
                );
            }

            let (records, scope) = match selected {
                Some(event) => (
                    dataset.event_records(&event.id).to_vec(),
                    ExportScope::Event(event),
                ),
                None => (dataset.combined(), ExportScope::Combined),
            };
            if records.is_empty() && dataset.failures.len() == events.len() {
                bail!("no registrations could be loaded");
            }

            let bytes = export::export(&records, scope, format)?;
            let path = out_dir.join(scope.file_name(format));
            std::fs::write(&path, bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported {} registrations to {}.", records.len(), path.display());
        }
    }

    Ok(())
}
