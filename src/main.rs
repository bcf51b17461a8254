use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use quill_rs::quill::workflow::config::{ConfigLoader, EngineConfig};
use quill_rs::quill::workflow::engine::StatusReport;
use quill_rs::quill::workflow::phase::PhaseManager;
use quill_rs::quill::workflow::state::WorkflowState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show phase and progress of a saved story
    Status {
        /// Path to the saved state file
        #[arg(short, long)]
        state: String,

        /// Engine config used to evaluate the phase
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Append human feedback to a saved story
    Feedback {
        /// Path to the saved state file
        #[arg(short, long)]
        state: String,

        /// The feedback text
        #[arg(short, long)]
        message: String,

        /// Chapter the feedback refers to (defaults to the latest)
        #[arg(long)]
        chapter: Option<u32>,
    },
    /// Load and validate an engine config
    CheckConfig {
        /// Path to the YAML config
        #[arg(short, long)]
        config: String,
    },
}

fn load_config(path: Option<&str>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => ConfigLoader::new()
            .load_config(path)
            .with_context(|| format!("loading config {}", path)),
        None => {
            let mut config = EngineConfig::default();
            config.apply_env()?;
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Status { state, config } => {
            let config = load_config(config.as_deref())?;
            let story = WorkflowState::load(&state)
                .with_context(|| format!("loading state {}", state))?;
            let phases = PhaseManager::new(config.phase);
            let story = phases.update_phase_progress(&story);

            let report = StatusReport::of(&story, false);
            let completion = phases.evaluate_phase_completion(&story);
            let output = serde_json::json!({
                "status": report,
                "phase_completion": completion,
                "should_continue": story.should_continue(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Feedback {
            state,
            message,
            chapter,
        } => {
            let story = WorkflowState::load(&state)
                .with_context(|| format!("loading state {}", state))?;
            let story = story.with_human_feedback(&message, chapter);
            story.save(&state)?;
            log::info!(
                "Recorded feedback for '{}' ({} entries)",
                story.title,
                story.human_feedback.len()
            );
            println!("{}", story.human_feedback.len());
        }
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
