use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use modelget_core::core::events::EventEmitter;

use crate::commands::{dependencies, downloads, settings};
use crate::core::manager::DownloadManager;
use crate::core::notify::{JsonLinesEmitter, LogEmitter};
use crate::core::verify;
use crate::models::manifest::build_file_url;

/// Resumable downloader for model repositories.
#[derive(Parser)]
#[command(name = "modelget")]
#[command(version)]
#[command(about = "Fetch model files with resume, retries and an optional helper-tool fallback.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Print lifecycle events and results as JSON lines on stdout
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download files from a repository
    ///
    /// Examples:
    ///   modelget download org/model config.json model.safetensors
    ///   modelget download org/model --manifest files.json --dest ./models
    ///   modelget download org/model --all --include '*.json' --include 'onnx/'
    Download {
        /// Repository reference, e.g. `org/model`
        repository: String,
        /// File paths inside the repository
        files: Vec<String>,
        /// JSON array of manifest entries, fetched before `files`
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Also fetch every file the hub lists for the repository
        #[arg(long)]
        all: bool,
        /// Only fetch paths matching this glob (repeatable)
        #[arg(long = "include", value_name = "GLOB")]
        include: Vec<String>,
        /// Skip paths matching this glob (repeatable)
        #[arg(long = "exclude", value_name = "GLOB")]
        exclude: Vec<String>,
        /// Destination directory for every file
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Branch, tag or commit
        #[arg(short, long)]
        revision: Option<String>,
        /// Prefer the external helper tool when it is available
        #[arg(long)]
        helper: bool,
        /// Access token for gated repositories
        #[arg(long)]
        token: Option<String>,
    },

    /// Print the download URL of a file without fetching it
    Url {
        /// Repository reference, e.g. `org/model`
        repository: String,
        /// File path inside the repository
        file: String,
        /// Branch, tag or commit
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Report which download strategies this machine supports
    Deps,

    /// List repositories already under the models directory
    List {
        /// Directory to scan instead of the configured models directory
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Check that files exist and are not empty
    Verify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print effective settings
    Show,
    /// Print the settings file location
    Path,
    /// Merge a JSON patch into the stored settings
    ///
    /// Example:
    ///   modelget config set '{"download": {"max_attempts": 5}}'
    Set { patch: String },
    /// Restore defaults
    Reset,
}

async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Download {
            repository,
            files,
            manifest,
            all,
            include,
            exclude,
            dest,
            revision,
            helper,
            token,
        } => {
            let mut app_settings = settings::get_settings();
            if helper {
                app_settings.download.prefer_external_helper = true;
            }
            if token.is_some() {
                app_settings.download.auth_token = token;
            }
            let emitter: Arc<dyn EventEmitter> = if cli.json {
                Arc::new(JsonLinesEmitter)
            } else {
                Arc::new(LogEmitter)
            };
            let manager = DownloadManager::new(&app_settings, emitter)?;
            let mut request =
                downloads::build_request(&repository, &files, manifest.as_deref(), dest, revision)?;
            request.whole_repo = all;
            request.allow_patterns = include;
            request.ignore_patterns = exclude;

            let view = downloads::ProgressView::detect(cli.json);
            let outcome = downloads::download_model(&manager, request, view, interrupted()).await?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!("{}", downloads::render_outcome(&outcome));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Url {
            repository,
            file,
            revision,
        } => {
            let app_settings = settings::get_settings();
            let revision = revision.unwrap_or(app_settings.download.revision);
            let url =
                build_file_url(&app_settings.download.endpoint, &repository, &revision, &file);
            if cli.json {
                print_json(&serde_json::json!({ "url": url }))?;
            } else {
                println!("{}", url);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Deps => {
            let app_settings = settings::get_settings();
            let manager = DownloadManager::new(&app_settings, Arc::new(LogEmitter))?;
            let report = dependencies::check_dependencies(&manager).await;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("{}", dependencies::render_report(&report));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List { root } => {
            let root = root.unwrap_or_else(|| settings::get_settings().download.models_dir);
            let assets = downloads::list_installed(&root).await?;
            if cli.json {
                print_json(&assets)?;
            } else if assets.is_empty() {
                println!("nothing installed under {}", root.display());
            } else {
                for asset in &assets {
                    let partial = if asset.partial_files > 0 {
                        format!(" ({} partial)", asset.partial_files)
                    } else {
                        String::new()
                    };
                    println!(
                        "{:<40} {:>4} files {:>12}{}",
                        asset.repository,
                        asset.file_count,
                        crate::core::progress::format_size(asset.size),
                        partial
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { paths } => {
            let checks = downloads::verify_files(&paths).await;
            if cli.json {
                print_json(&checks)?;
            } else {
                for check in &checks {
                    let state = match (check.exists, check.ok) {
                        (_, true) => "ok",
                        (true, false) => "empty",
                        (false, _) => "missing",
                    };
                    println!("{:<8} {}", state, check.path.display());
                }
            }
            Ok(if verify::all_ok(&checks) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { action } => {
            match action.unwrap_or(ConfigCommand::Show) {
                ConfigCommand::Show => {
                    println!("{}", serde_json::to_string_pretty(&settings::get_settings())?)
                }
                ConfigCommand::Path => println!("{}", settings::settings_location().display()),
                ConfigCommand::Set { patch } => {
                    let updated = settings::update_settings(&patch)?;
                    println!("{}", serde_json::to_string_pretty(&updated)?);
                }
                ConfigCommand::Reset => {
                    let defaults = settings::reset_settings()?;
                    println!("{}", serde_json::to_string_pretty(&defaults)?);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_shape_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_download_args() {
        let cli = Cli::try_parse_from([
            "modelget", "download", "org/model", "a.bin", "b.bin", "--dest", "/tmp/m", "--helper",
        ])
        .unwrap();
        match cli.command {
            Command::Download {
                repository,
                files,
                dest,
                helper,
                ..
            } => {
                assert_eq!(repository, "org/model");
                assert_eq!(files, ["a.bin", "b.bin"]);
                assert_eq!(dest, Some(PathBuf::from("/tmp/m")));
                assert!(helper);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn parses_pattern_filters() {
        let cli = Cli::try_parse_from([
            "modelget", "download", "org/model", "--all", "--include", "*.json", "--include",
            "onnx/", "--exclude", "*q4*",
        ])
        .unwrap();
        match cli.command {
            Command::Download {
                files,
                all,
                include,
                exclude,
                ..
            } => {
                assert!(files.is_empty());
                assert!(all);
                assert_eq!(include, ["*.json", "onnx/"]);
                assert_eq!(exclude, ["*q4*"]);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn parses_url_args() {
        let cli =
            Cli::try_parse_from(["modelget", "url", "org/model", "onnx/model.onnx", "-r", "v2"])
                .unwrap();
        match cli.command {
            Command::Url {
                repository,
                file,
                revision,
            } => {
                assert_eq!(repository, "org/model");
                assert_eq!(file, "onnx/model.onnx");
                assert_eq!(revision.as_deref(), Some("v2"));
            }
            _ => panic!("expected url"),
        }
    }

    #[test]
    fn verify_needs_paths() {
        assert!(Cli::try_parse_from(["modelget", "verify"]).is_err());
    }
}
