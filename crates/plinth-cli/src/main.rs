mod config;
mod render;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use plinth::{MssqlPool, PlinthService, Settings, service};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Declarative schema management for SQL Server.
#[derive(Parser, Debug)]
#[command(name = "plinth", version)]
struct Cli {
    /// ADO-style connection string
    #[arg(long, global = true, env = "PLINTH_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Schema root directory (overrides the config file)
    #[arg(long, global = true)]
    schema_dir: Option<Utf8PathBuf>,

    /// Log engine activity and every executed statement
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create missing tables, or alter existing ones
    Migrate {
        /// Show what would be executed without running it
        #[arg(long)]
        dry_run: bool,

        /// Bring existing tables in line with the schema instead of creating new ones
        #[arg(long)]
        update_existing: bool,
    },
    /// Compare the schema against the database
    Status,
    /// Dump the resolved schema
    Schema,
    /// Show one resolved table and its CREATE statements
    ShowTable {
        /// Table name (case-insensitive)
        table: String,
    },
    /// Show the column differences for one table
    DiffTable {
        /// Table name (case-insensitive)
        table: String,
    },
    /// Drop tables that are not in the schema
    DropExtraTables {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Drop every table in the database
    CleanDatabase {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Insert seed rows into empty tables
    Seed,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "plinth=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let settings = load_settings(&cli)?;
    let json = cli.json;

    // These two only read schema files.
    match &cli.command {
        Commands::Schema => {
            let dump = service::dump_schema(&settings)?;
            emit(json, &dump, render::schema)?;
            return Ok(exit_code(&dump.validation_errors));
        }
        Commands::ShowTable { table } => {
            let view = service::show_table(&settings, table)?;
            emit(json, &view, render::table_view)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let url = settings
        .database
        .url
        .clone()
        .ok_or("no database URL: pass --database-url or set PLINTH_DATABASE_URL")?;
    tracing::info!(database = %mask_password(&url), "connecting");

    let pool = MssqlPool::new(&url, settings.database.max_connections)?;
    let svc = PlinthService::new(pool, settings);

    match cli.command {
        Commands::Migrate {
            dry_run,
            update_existing,
        } => {
            let outcome = svc.migrate(dry_run, update_existing).await?;
            emit(json, &outcome, render::migrate)?;
            Ok(exit_code(outcome.errors()))
        }
        Commands::Status => {
            let status = svc.status().await?;
            emit(json, &status, render::status)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::DiffTable { table } => {
            let view = svc.diff_table(&table).await?;
            emit(json, &view, render::diff)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::DropExtraTables { force } => {
            let mut report = svc.drop_extra_tables(force).await?;
            if !force && !json && !report.candidates.is_empty() {
                render::drop_candidates(&report);
                if confirm("Drop these tables?")? {
                    report = svc.drop_extra_tables(true).await?;
                }
            }
            emit(json, &report, render::dropped)?;
            Ok(exit_code(&report.errors))
        }
        Commands::CleanDatabase { force } => {
            let mut report = svc.clean_database(force).await?;
            if !force && !json && !report.candidates.is_empty() {
                render::drop_candidates(&report);
                if confirm("Drop EVERY table listed above?")? {
                    report = svc.clean_database(true).await?;
                }
            }
            emit(json, &report, render::dropped)?;
            Ok(exit_code(&report.errors))
        }
        Commands::Seed => {
            let report = svc.seed_initial_data().await?;
            emit(json, &report, render::seed)?;
            Ok(exit_code(&report.errors))
        }
        Commands::Schema | Commands::ShowTable { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Config file, then command-line overrides.
fn load_settings(cli: &Cli) -> CliResult<Settings> {
    let mut settings = match config::load() {
        Ok((settings, path)) => {
            tracing::debug!(%path, "loaded config");
            settings
        }
        Err(config::ConfigError::NotFound) => {
            let cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?)
                .map_err(|p| format!("non UTF-8 working directory: {}", p.display()))?;
            Settings::default().relative_to(&cwd)
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(url) = &cli.database_url {
        settings.database.url = Some(url.clone());
    }
    if let Some(dir) = &cli.schema_dir {
        settings.schema.root = dir.clone();
    }
    Ok(settings)
}

fn emit<T: Serialize>(json: bool, value: &T, human: fn(&T)) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn exit_code(errors: &[String]) -> ExitCode {
    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn confirm(question: &str) -> CliResult<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Mask the password in an ADO-style connection string for display.
fn mask_password(url: &str) -> String {
    url.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, _)) if is_password_key(key) => format!("{key}=***"),
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn is_password_key(key: &str) -> bool {
    let key = key.trim();
    key.eq_ignore_ascii_case("password") || key.eq_ignore_ascii_case("pwd")
}
