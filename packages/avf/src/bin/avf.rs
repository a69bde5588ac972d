/*
 * avf CLI
 *
 * Thin command-line surface over the orchestrator. Results are printed as
 * JSON on stdout; logs go to stderr (AVF_LOG overrides the configured level).
 *
 * Usage:
 *   avf create assets/chars/hero.fbx --creator jane --tool-version maya_2024.2 --tag rigged
 *   avf get local <version_id> ./hero.fbx
 *   avf history chars/hero.fbx --storage-data
 *   avf find --tag rigged --creator jane
 *   avf refs vcs --type commit --pattern .fbx
 *   avf mv chars/hero.fbx chars/heroes/hero.fbx
 */

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use avf::storage::{
    AssetMetadata, AssetPath, CustomData, ReferenceType, StorageReference, StorageType,
    VersionQuery, VersionRecord, VersionStore,
};
use avf::{AssetVersion, AssetVersionError, AvfConfig, HistoryOptions, VersionOutcome};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

/// Exit code when some backends succeeded and others did not
const EXIT_PARTIAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "avf", author, version, about = "Asset version framework", long_about = None)]
struct Cli {
    /// Configuration file (default: $AVF_CONFIG, else ./avf.yaml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Version a file on the configured backends
    Create {
        file: PathBuf,
        #[command(flatten)]
        metadata: MetadataArgs,
        /// Target backend (repeatable; default: all)
        #[arg(long = "backend", short)]
        backends: Vec<String>,
        /// Explicit asset path instead of one derived from the file
        #[arg(long)]
        asset_path: Option<String>,
    },
    /// Bind a version to content already present in a backend
    Adopt {
        backend: String,
        storage_id: String,
        path: String,
        #[arg(long = "type", value_parser = parse_reference_type)]
        reference_type: ReferenceType,
        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Materialize a version's bytes
    Get {
        backend: String,
        version_id: String,
        target: PathBuf,
    },
    /// Chronological history of an asset
    History {
        asset_path: String,
        /// Include the storage references each backend holds
        #[arg(long)]
        storage_data: bool,
    },
    /// Search versions (all predicates must match)
    Find {
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        creator: Option<String>,
        /// RFC 3339, inclusive
        #[arg(long)]
        after: Option<DateTime<Utc>>,
        /// RFC 3339, inclusive
        #[arg(long)]
        before: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_storage_type)]
        storage_type: Option<StorageType>,
        #[arg(long)]
        asset_path: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List backend-native references
    Refs {
        backend: String,
        #[arg(long = "type", value_parser = parse_reference_type)]
        reference_type: Option<ReferenceType>,
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Record a rename
    Mv {
        old_path: String,
        new_path: String,
        #[arg(long = "backend", short)]
        backends: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct MetadataArgs {
    #[arg(long)]
    creator: String,
    #[arg(long)]
    tool_version: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// JSON object of free-form fields
    #[arg(long)]
    custom_data: Option<String>,
}

impl MetadataArgs {
    fn into_metadata(self) -> anyhow::Result<AssetMetadata> {
        let mut metadata =
            AssetMetadata::new(self.creator, self.tool_version).with_tags(self.tags);
        if let Some(description) = self.description {
            metadata = metadata.with_description(description);
        }
        if let Some(raw) = self.custom_data {
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("--custom-data is not valid JSON")?;
            metadata = metadata.with_custom_data(CustomData::from_value(value)?);
        }
        Ok(metadata)
    }
}

fn parse_reference_type(s: &str) -> Result<ReferenceType, String> {
    s.parse().map_err(|e: avf::storage::StorageError| e.message)
}

fn parse_storage_type(s: &str) -> Result<StorageType, String> {
    s.parse().map_err(|e: avf::storage::StorageError| e.message)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.unwrap_or_else(AvfConfig::locate);
    let config = AvfConfig::from_yaml_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    avf::init_tracing(&config.logging);

    let avf = AssetVersion::from_config(&config)?;

    match cli.command {
        Command::Create {
            file,
            metadata,
            backends,
            asset_path,
        } => {
            let metadata = metadata.into_metadata()?;
            let names: Vec<&str> = backends.iter().map(String::as_str).collect();
            let result = match asset_path {
                Some(path) => {
                    let content = std::fs::read(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    avf.create_version_at(&content, &AssetPath::new(path)?, metadata, &names)
                }
                None => avf.create_version(&file, metadata, &names),
            };
            report_records(result)
        }
        Command::Adopt {
            backend,
            storage_id,
            path,
            reference_type,
            metadata,
        } => {
            let storage_type = avf.backend(&backend)?.storage_type();
            let reference = StorageReference::new(storage_type, storage_id, path, reference_type);
            match avf.create_version_from_reference(&backend, &reference, metadata.into_metadata()?) {
                Ok(record) => print_json(&record).map(|_| ExitCode::SUCCESS),
                Err(err) => report_error(err),
            }
        }
        Command::Get {
            backend,
            version_id,
            target,
        } => {
            let written = avf.get_version(&backend, &version_id, &target)?;
            print_json(&json!({ "version_id": version_id, "path": written }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::History {
            asset_path,
            storage_data,
        } => {
            let options = HistoryOptions {
                include_storage_data: storage_data,
                ..HistoryOptions::default()
            };
            let history = avf.dump_asset_history(&AssetPath::new(asset_path)?, &options)?;
            print_json(&history)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Find {
            tags,
            creator,
            after,
            before,
            storage_type,
            asset_path,
            limit,
        } => {
            let query = VersionQuery {
                tags,
                creator,
                after,
                before,
                storage_type,
                asset_path: asset_path.map(AssetPath::new).transpose()?,
                limit,
            };
            print_json(&avf.find_versions(&query)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Refs {
            backend,
            reference_type,
            pattern,
        } => {
            let references = avf
                .list_references(&backend, reference_type, pattern.as_deref())?
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&references)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Mv {
            old_path,
            new_path,
            backends,
        } => {
            let names: Vec<&str> = backends.iter().map(String::as_str).collect();
            report_records(avf.move_asset(
                &AssetPath::new(old_path)?,
                &AssetPath::new(new_path)?,
                &names,
            ))
        }
    }
}

fn report_records(
    result: avf::Result<BTreeMap<String, VersionRecord>>,
) -> anyhow::Result<ExitCode> {
    match result {
        Ok(records) => {
            print_json(&records)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => report_error(err),
    }
}

/// Partial results are still printed before exiting non-zero
fn report_error(err: AssetVersionError) -> anyhow::Result<ExitCode> {
    match err.outcome() {
        Some(outcome) => {
            print_json(&outcome_json(outcome))?;
            eprintln!("error: {}", err);
            Ok(ExitCode::from(EXIT_PARTIAL))
        }
        None => Err(err.into()),
    }
}

fn outcome_json(outcome: &VersionOutcome) -> serde_json::Value {
    let failures: serde_json::Map<String, serde_json::Value> = outcome
        .failures
        .iter()
        .map(|(name, err)| {
            (
                name.clone(),
                json!({ "kind": err.kind.as_str(), "message": err.to_string() }),
            )
        })
        .collect();

    json!({
        "asset_path": outcome.asset_path,
        "records": outcome.records,
        "failures": failures,
        "persist_error": outcome.persist_error.as_ref().map(|e| e.to_string()),
    })
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
