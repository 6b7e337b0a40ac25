use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use moodlens_core::classifier::BackendInfo;
use moodlens_pipeline::{CaptureRequest, Config, Pipeline, PipelineError, Upload};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "moodlens", about = "Facial emotion analysis and annotation")]
struct Cli {
    /// TOML config file (MOODLENS_* environment variables still apply)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an image file, as if uploaded
    Analyze {
        /// Image to analyze
        file: PathBuf,
        /// Requester name
        #[arg(short, long)]
        name: Option<String>,
        /// Declared content type (e.g., "image/jpeg")
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Analyze a capture request: {"name": ..., "imageBase64": ...}
    Capture {
        /// JSON request file (reads stdin when omitted)
        file: Option<PathBuf>,
    },
    /// List recorded sessions, newest first
    History,
    /// Show one session with its scores
    Show {
        /// Session id
        id: i64,
    },
    /// Describe the configured classifier backend
    ModelInfo {
        /// Where to write the description
        #[arg(short, long, default_value = "models/model_info.json")]
        out: PathBuf,
    },
}

/// `model_info.json` contents.
#[derive(Debug, Serialize)]
struct ModelInfo {
    model_name: String,
    location: Option<String>,
    loaded_at: String,
    notes: String,
}

impl ModelInfo {
    fn new(info: BackendInfo) -> Self {
        Self {
            model_name: info.name,
            location: info.location,
            loaded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            notes: info.notes,
        }
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    let pipeline = Pipeline::from_config(&config).context("failed to start pipeline")?;

    match cli.command {
        Commands::Analyze {
            file,
            name,
            content_type,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let outcome = pipeline.analyze_upload(Upload {
                name,
                bytes,
                content_type,
            });
            return print_outcome(outcome).map(ExitCode::from);
        }
        Commands::Capture { file } => {
            let text = read_request(file.as_deref())?;
            let outcome = CaptureRequest::from_json(&text)
                .map_err(PipelineError::from)
                .and_then(|capture| pipeline.analyze_capture(capture));
            return print_outcome(outcome).map(ExitCode::from);
        }
        Commands::History => {
            let sessions = pipeline.history()?;
            if sessions.is_empty() {
                println!("No sessions recorded");
            }
            for s in sessions {
                println!(
                    "{:>5}  {}  {:<10} {}  {}",
                    s.id, s.created_at, s.dominant_emotion, s.name, s.image_path
                );
            }
        }
        Commands::Show { id } => match pipeline.session(id)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => anyhow::bail!("no session with id {id}"),
        },
        Commands::ModelInfo { out } => {
            let info = ModelInfo::new(pipeline.backend_info());
            write_model_info(&out, &info)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            tracing::info!(path = %out.display(), "model info written");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Process exit code for a failed request: 4 for input errors (400), 5 for
/// everything else (500).
fn exit_code_for(status: u16) -> u8 {
    match status {
        400..=499 => 4,
        _ => 5,
    }
}

/// Print the success body, or the failure body; returns the process exit code.
fn print_outcome<T: Serialize>(outcome: Result<T, PipelineError>) -> Result<u8> {
    match outcome {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(0)
        }
        Err(err) => {
            let status = err.status_code();
            println!("{}", serde_json::to_string_pretty(&err.to_response())?);
            eprintln!("request failed with status {status}");
            Ok(exit_code_for(status))
        }
    }
}

fn read_request(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read request from stdin")?;
            Ok(text)
        }
    }
}

fn write_model_info(path: &Path, info: &ModelInfo) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(info)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["moodlens", "history", "--config", "moodlens.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("moodlens.toml")));
        assert!(matches!(cli.command, Commands::History));
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::try_parse_from(["moodlens", "analyze", "face.jpg", "--name", "Ada"]).unwrap();
        match cli.command {
            Commands::Analyze { file, name, content_type } => {
                assert_eq!(file, PathBuf::from("face.jpg"));
                assert_eq!(name.as_deref(), Some("Ada"));
                assert!(content_type.is_none());
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn test_model_info_written() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("models").join("model_info.json");
        let info = ModelInfo::new(BackendInfo {
            name: "ferplus".into(),
            location: Some("models/emotion-ferplus-8.onnx".into()),
            notes: "pretrained".into(),
        });
        write_model_info(&out, &info).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(json["model_name"], "ferplus");
        assert_eq!(json["location"], "models/emotion-ferplus-8.onnx");
        assert!(json["loaded_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_exit_codes_follow_status() {
        assert_eq!(exit_code_for(400), 4);
        assert_eq!(exit_code_for(500), 5);
    }

    #[test]
    fn test_failure_exits_with_status_class() {
        let input: Result<(), PipelineError> =
            Err(moodlens_pipeline::InputError::MissingImage.into());
        assert_eq!(print_outcome(input).unwrap(), 4);

        let classify: Result<(), PipelineError> = Err(
            moodlens_core::ClassificationError::Backend("model error".into()).into(),
        );
        assert_eq!(print_outcome(classify).unwrap(), 5);

        assert_eq!(print_outcome(Ok(())).unwrap(), 0);
    }
}
