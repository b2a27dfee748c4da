mod banner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strata_config::{AppConfig, ConfigLoader, LogConfig};
use strata_db::{Database, MigrationStatus, UnitOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata", version, about = "Startup schema migrations for the bot database")]
struct Cli {
    /// Config file (defaults to ~/.strata/config.yml)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Startup gate: migrate (or verify) the schema, then report it ready
    Start,

    /// Apply every pending migration
    Migrate,

    /// Show applied and pending migrations
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Show the ledger, most recent first
    History {
        #[arg(long)]
        json: bool,
    },

    /// Scaffold a new migration unit
    New {
        /// Migration name, e.g. add_user_phone
        name: String,

        /// Human-readable description
        description: Option<String>,

        /// Output directory (defaults to migrations.dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load(cli.config.as_deref()).context("failed to load config")?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Start => cmd_start(&config),
        Commands::Migrate => cmd_migrate(&config),
        Commands::Status { json } => cmd_status(&config, json),
        Commands::History { json } => cmd_history(&config, json),
        Commands::New {
            name,
            description,
            dir,
        } => cmd_new(&config, &name, description.as_deref(), dir.as_deref()),
    }
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn open_database(config: &AppConfig) -> Result<(Database, PathBuf)> {
    let path = config.database.resolved_path();
    let db = Database::open(
        &path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )
    .with_context(|| format!("failed to open database at {}", path.display()))?;
    Ok((db, path))
}

fn cmd_start(config: &AppConfig) -> Result<()> {
    let (db, path) = open_database(config)?;

    if config.migrations.run_on_startup {
        db.run_migrations()
            .context("database migrations failed, refusing to start")?;
    } else {
        info!("migrations.run_on_startup is off, only verifying the schema");
    }

    let status = db.migration_status().context("failed to read migration status")?;
    if !config.migrations.run_on_startup && !status.pending.is_empty() {
        bail!(
            "{} migration(s) pending and run_on_startup is off; run `strata migrate` first",
            status.pending.len()
        );
    }
    for pending in &status.pending {
        warn!(
            "migration {}_{} is still pending (precheck declined it)",
            pending.version, pending.name
        );
    }

    banner::print_banner(&path, &status);
    Ok(())
}

fn cmd_migrate(config: &AppConfig) -> Result<()> {
    let (db, _) = open_database(config)?;
    let report = db.run_migrations().context("database migrations failed")?;

    if report.is_noop() {
        println!("Schema is up to date.");
        return Ok(());
    }

    for outcome in &report.outcomes {
        match outcome {
            UnitOutcome::Applied {
                version,
                name,
                elapsed_secs,
            } => println!("  applied  {version}_{name} ({elapsed_secs:.2}s)"),
            UnitOutcome::Skipped { version, name } => {
                println!("  skipped  {version}_{name} (precheck declined)")
            }
            UnitOutcome::Failed(e) => println!("  failed   {e}"),
        }
    }
    println!(
        "{} applied, {} skipped",
        report.applied_count(),
        report.skipped_count()
    );
    Ok(())
}

fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let (db, _) = open_database(config)?;
    let status = db.migration_status().context("failed to read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    print_status(&status);
    Ok(())
}

fn print_status(status: &MigrationStatus) {
    if status.applied.is_empty() {
        println!("Applied: none");
    } else {
        println!("Applied ({}):", status.applied.len());
        for entry in &status.applied {
            println!(
                "  {}_{}  {}",
                entry.version,
                entry.name,
                entry.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if status.pending.is_empty() {
        println!("Pending: none");
    } else {
        println!("Pending ({}):", status.pending.len());
        for unit in &status.pending {
            println!("  {}_{}  {}", unit.version, unit.name, unit.description);
        }
    }
}

fn cmd_history(config: &AppConfig, json: bool) -> Result<()> {
    let (db, _) = open_database(config)?;
    let history = db
        .migration_history()
        .context("failed to read migration history")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    if history.is_empty() {
        println!("No migrations applied yet.");
        return Ok(());
    }
    for entry in &history {
        let took = entry
            .execution_time
            .map(|t| format!("{t:.2}s"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "{}  {}_{}  {}  {}",
            entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            entry.version,
            entry.name,
            took,
            entry.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_new(
    config: &AppConfig,
    name: &str,
    description: Option<&str>,
    dir: Option<&Path>,
) -> Result<()> {
    let dir = dir.unwrap_or(config.migrations.dir.as_path());
    let now = chrono::Local::now().naive_local();
    let created = strata_db::create_migration(dir, name, description, now)
        .context("failed to create migration")?;

    println!("Created migration: {}", created.path.display());
    println!("Next steps:");
    println!("  - implement precheck() and upgrade() (downgrade() is optional)");
    println!(
        "  - declare `mod {}` in versions/mod.rs",
        created
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    );
    println!(
        "  - add `.register({})` to versions::registry()",
        created.struct_name
    );
    Ok(())
}
