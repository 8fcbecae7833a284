mod config;
mod core;
mod db;
mod error;
mod export;
mod import;
mod profile;

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::Phase;
use crate::db::SharedDatabase;
use crate::error::LedgerError;
use crate::import::ImportDocument;
use crate::profile::{EntryContext, ProfileDraft, ProfileService};

#[derive(Parser)]
#[command(
    name = "textile-ledger",
    version,
    about = "Textile supply-chain impact ledger"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", value_name = "PATH")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save a profile from a JSON draft (`-` reads stdin)
    Save {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        actor_label: Option<String>,
        #[arg(long)]
        phase: Phase,
        #[arg(long, value_name = "PATH")]
        draft: PathBuf,
    },
    /// Print a stored profile with its components and verification
    Show { profile_id: String },
    /// Recompute a profile against current upstream values
    Recalc { profile_id: String },
    /// Import a decoded workbook (JSON) for one actor
    Import {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        actor_label: Option<String>,
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },
    /// Export an actor's profiles for one phase as JSON
    Export {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        phase: Phase,
        /// Output file; stdout when omitted
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Record a verification mark
    Verify {
        profile_id: String,
        #[arg(long)]
        org: Option<String>,
        /// Mark as unverified instead of verified
        #[arg(long)]
        unverified: bool,
    },
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries JSON results
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("textile_ledger=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);
    tracing::debug!("Config: {:?}", config);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<(), LedgerError> {
    let service = open_service(config)?;
    let pretty = config.export.pretty;

    match command {
        Command::Save {
            actor,
            actor_label,
            phase,
            draft,
        } => {
            let draft: ProfileDraft = read_json(&draft)?;
            let ctx = EntryContext {
                actor_id: actor,
                actor_label,
                phase,
            };
            print_json(&service.save(&ctx, &draft)?, pretty)
        }
        Command::Show { profile_id } => print_json(&service.load_for_edit(&profile_id)?, pretty),
        Command::Recalc { profile_id } => print_json(&service.recalculate(&profile_id)?, pretty),
        Command::Import {
            actor,
            actor_label,
            file,
        } => {
            let document = ImportDocument::from_value(read_json(&file)?)?;
            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(import::run_import(
                service,
                &actor,
                actor_label.as_deref(),
                document,
                config.import.concurrency,
            ))?;
            print_json(&outcome, pretty)
        }
        Command::Export { actor, phase, out } => {
            let document = export::export_profiles(service.database(), &actor, phase)?;
            match out {
                Some(path) => {
                    let mut writer = BufWriter::new(File::create(&path)?);
                    export::write_export(&document, &mut writer, pretty)?;
                    writer.flush()?;
                    tracing::info!(
                        "Exported {} profiles to {}",
                        document.profiles.len(),
                        path.display()
                    );
                    Ok(())
                }
                None => export::write_export(&document, &mut io::stdout().lock(), pretty),
            }
        }
        Command::Verify {
            profile_id,
            org,
            unverified,
        } => print_json(
            &service.mark_verification(&profile_id, !unverified, org.as_deref())?,
            pretty,
        ),
    }
}

fn open_service(config: &Config) -> Result<ProfileService, LedgerError> {
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = SharedDatabase::open(db_path)?;
    tracing::debug!("Database opened at {}", config.database.path);
    Ok(ProfileService::new(
        db,
        config.ledger.aggregation_rules(),
        config.ledger.max_reference_depth,
    ))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LedgerError> {
    let mut text = String::new();
    if path == Path::new("-") {
        io::stdin().read_to_string(&mut text)?;
    } else {
        File::open(path)?.read_to_string(&mut text)?;
    }
    Ok(serde_json::from_str(&text)?)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), LedgerError> {
    let mut out = io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    writeln!(out)?;
    Ok(())
}
