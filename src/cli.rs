//! CLI Tooling
//!
//! Command-line interface over the deployment operations. Every command
//! supports text and JSON output; text goes through the table formatters,
//! JSON is the same structures the library returns.

use crate::error::{Result, SideloadError};
use crate::facts;
use crate::format;
use crate::ops::{self, SideloadRequest};
use crate::package::{self, HandlerRegistry};
use crate::state::STATE_FILE_NAME;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sideload - manifest-driven incremental deployment of Splunk apps
#[derive(Parser)]
#[command(name = "sideload")]
#[command(about = "Manifest-driven incremental deployment of Splunk apps")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Log format (json, text)
    #[arg(long, default_value = "text")]
    pub log_format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install or upgrade an app from an archive
    Deploy {
        /// Source archive (.tar, .tar.gz, .tgz, .spl)
        src: PathBuf,
        /// Directory apps are installed under (e.g. etc/apps)
        dest: PathBuf,
        /// State file name relative to the app directory
        #[arg(long, default_value = STATE_FILE_NAME)]
        state_file: String,
        /// Plan only; report what would change without writing
        #[arg(long)]
        check: bool,
        /// Do not rebuild the manifest from the filesystem when the state
        /// file is missing or unusable
        #[arg(long)]
        no_rebuild: bool,
        /// Include the file list in the result
        #[arg(long)]
        list_files: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the deploy sequence an archive would apply
    Plan {
        /// Source archive
        src: PathBuf,
        /// Directory apps are installed under
        dest: PathBuf,
        /// State file name relative to the app directory
        #[arg(long, default_value = STATE_FILE_NAME)]
        state_file: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Inspect or rebuild an installed app's manifest record
    Manifest {
        /// Installed app directory
        app_dir: PathBuf,
        /// State file name relative to the app directory
        #[arg(long, default_value = STATE_FILE_NAME)]
        state_file: String,
        /// Rebuild the manifest from the filesystem if the record is
        /// missing or unusable
        #[arg(long)]
        rebuild: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Build a deployable .tar.gz archive from an app source directory
    Package {
        /// App source directory; its name becomes the app name
        source: PathBuf,
        /// Output archive path
        output: PathBuf,
        /// App-relative path prefixes to leave out of the package
        #[arg(long)]
        exclude: Vec<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Report facts about an archive or an installed app directory
    Facts {
        /// Archive file or installed app directory
        path: PathBuf,
        /// State file name relative to the app directory
        #[arg(long, default_value = STATE_FILE_NAME)]
        state_file: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn check_format(format: &str) -> Result<()> {
    match format {
        "text" | "json" => Ok(()),
        other => Err(SideloadError::usage(format!(
            "unknown output format {other:?} (expected \"text\" or \"json\")"
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SideloadError::usage(format!("failed to encode result: {e}")))
}

/// Execute a command, returning the text to print on stdout.
pub fn execute(command: &Commands) -> Result<String> {
    match command {
        Commands::Deploy {
            src,
            dest,
            state_file,
            check,
            no_rebuild,
            list_files,
            format,
        } => {
            check_format(format)?;
            let request = SideloadRequest {
                src: src.clone(),
                dest: dest.clone(),
                state_file: Some(state_file.clone()),
                rebuild_manifest: !no_rebuild,
                dry_run: *check,
                list_files: *list_files,
            };
            let result = ops::sideload(&request)?;
            if format.as_str() == "json" {
                to_json(&result)
            } else {
                Ok(format::format_result_text(&result))
            }
        }
        Commands::Plan {
            src,
            dest,
            state_file,
            format,
        } => {
            check_format(format)?;
            let request = SideloadRequest {
                src: src.clone(),
                dest: dest.clone(),
                state_file: Some(state_file.clone()),
                rebuild_manifest: true,
                dry_run: true,
                list_files: false,
            };
            let (manifest, sequence) = ops::plan_only(&request)?;
            if format.as_str() == "json" {
                to_json(&serde_json::json!({
                    "app": manifest.name,
                    "hash": manifest.hash,
                    "actions": sequence.actions,
                }))
            } else {
                Ok(format::format_plan_text(&manifest.name, &sequence))
            }
        }
        Commands::Manifest {
            app_dir,
            state_file,
            rebuild,
            format,
        } => {
            check_format(format)?;
            let report = ops::manifest_status(app_dir, Some(state_file.as_str()), *rebuild)?;
            if format.as_str() == "json" {
                to_json(&report)
            } else {
                Ok(format::format_manifest_report_text(&report))
            }
        }
        Commands::Package {
            source,
            output,
            exclude,
            format,
        } => {
            check_format(format)?;
            let registry = HandlerRegistry::with_defaults();
            let patterns = exclude.clone();
            let exclude_fn = move |path: &str| {
                patterns
                    .iter()
                    .any(|p| path == p || path.starts_with(&format!("{p}/")))
            };
            let (archive_path, manifest) =
                package::build_archive(source, output, &registry, Some(&exclude_fn))?;
            if format.as_str() == "json" {
                to_json(&serde_json::json!({
                    "archive": archive_path,
                    "app": manifest.name,
                    "hash": manifest.hash,
                    "files": manifest.file_count(),
                }))
            } else {
                let mut out = format::format_manifest_text(&manifest);
                out.push_str(&format!("  Archive: {}\n", archive_path.display()));
                Ok(out)
            }
        }
        Commands::Facts {
            path,
            state_file,
            format,
        } => {
            check_format(format)?;
            if path.is_dir() {
                let facts = facts::installed_facts(path, Some(state_file.as_str()));
                if format.as_str() == "json" {
                    to_json(&facts)
                } else {
                    Ok(format::format_installed_facts_text(&facts))
                }
            } else {
                let facts = facts::archive_facts(path)?;
                if format.as_str() == "json" {
                    to_json(&facts)
                } else {
                    Ok(format::format_archive_facts_text(&facts))
                }
            }
        }
    }
}
