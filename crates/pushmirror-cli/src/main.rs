//! pushmirror - repository push mirroring
//!
//! Usage:
//!   pushmirror encrypt <value>              # Encrypt a secret for the settings file
//!   pushmirror configure <repo> key=value   # Update, validate and store settings
//!   pushmirror mirror <repo>                # Dispatch pushes to every mirror and wait
//!   pushmirror push <repo> [--target N]     # Push right away, printing git output
//!   pushmirror delete-remote <repo>         # Delete remote mirror repositories

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pushmirror_core::config::{ConfigStore, MirrorConfig};
use pushmirror_core::context::MirrorContext;
use pushmirror_core::hook::{ActionOutput, HookError, HookTrigger};
use pushmirror_core::lifecycle::{LifecycleAction, LifecycleReport};
use pushmirror_core::settings::{
    FlagDefaults, SettingValue, SettingsBuilder, SettingsStore, mirror_targets,
};
use pushmirror_core::types::Repository;

#[derive(Parser)]
#[command(name = "pushmirror")]
#[command(about = "Mirror repository pushes to remote repositories", long_about = None)]
struct Cli {
    /// Path to pushmirror.toml (defaults to ~/.config/pushmirror/pushmirror.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a secret with the deployment key
    Encrypt {
        /// Plaintext value
        value: String,
    },

    /// Merge values into a repository's mirror settings, validate and store them
    ///
    /// Values are given as key=value pairs using the settings names, e.g.
    /// mirrorRepoUrl0=https://host/repo.git username0=bot password0=secret.
    /// Secrets are encrypted before they are stored.
    Configure {
        /// Repository id or PROJECT/slug
        repo: String,
        /// Settings to set
        values: Vec<String>,
    },

    /// Validate the stored settings and re-store them with secrets encrypted
    Validate {
        /// Repository id or PROJECT/slug
        repo: String,
    },

    /// Show the stored settings with URL templates resolved
    Show {
        /// Repository id or PROJECT/slug
        repo: String,
    },

    /// Push to mirrors right away
    Push {
        /// Repository id or PROJECT/slug
        repo: String,
        /// Only push to the mirror with this suffix
        #[arg(long, short)]
        target: Option<String>,
    },

    /// Dispatch pushes to every mirror through the scheduler and wait for them
    Mirror {
        /// Repository id or PROJECT/slug
        repo: String,
    },

    /// Resume pushes left unfinished by a previous run
    Recover,

    /// Delete remote mirror repositories through their REST API
    DeleteRemote {
        /// Repository id or PROJECT/slug
        repo: String,
        /// Only delete the mirror with this suffix
        #[arg(long, short)]
        target: Option<String>,
    },

    /// Move mirrors after a repository was renamed or moved
    Rename {
        /// Repository id or PROJECT/slug, as registered before the rename
        repo: String,
        /// New repository name
        name: String,
        /// New project key
        #[arg(long)]
        project: Option<String>,
    },

    /// Delete the remote mirrors of a deleted repository
    Deleted {
        /// Repository id or PROJECT/slug
        repo: String,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable text
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pushmirror=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    let context = MirrorContext::open(config)?;

    run(&context, cli.command, cli.format).await
}

fn load_config(path: Option<PathBuf>) -> Result<MirrorConfig> {
    let store = match path {
        Some(path) => ConfigStore::from_path(path),
        None => ConfigStore::from_default_location()?,
    };
    tracing::debug!("Loading configuration from {}", store.config_path().display());
    store.load_with_env()
}

async fn run(context: &MirrorContext, command: Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Encrypt { value } => {
            println!("{}", context.vault().encrypt(&value)?);
        }
        Commands::Configure { repo, values } => {
            let repository = context.repository(&repo)?;
            let mut builder =
                SettingsBuilder::from_map(context.settings().load(repository.id)?);
            for pair in &values {
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("Expected key=value, got {:?}", pair))?;
                builder = builder.set(key, parse_value(value));
            }
            apply(context, &repository, &builder.build()).await?;
        }
        Commands::Validate { repo } => {
            let repository = context.repository(&repo)?;
            let stored = context.settings().load(repository.id)?;
            apply(context, &repository, &stored).await?;
        }
        Commands::Show { repo } => {
            let repository = context.repository(&repo)?;
            let preview = context.hook().preview(&repository)?;
            let mut settings = preview.settings;
            for (key, value) in settings.iter_mut() {
                if (key.starts_with("password") || key.starts_with("privateToken"))
                    && matches!(value, SettingValue::Text(text) if !text.is_empty())
                {
                    *value = SettingValue::Text("<redacted>".to_string());
                }
            }
            match format {
                OutputFormat::Table => {
                    for (key, value) in &settings {
                        println!("{:<20} {}", key, render_value(value));
                    }
                    for (key, error) in &preview.errors {
                        eprintln!("{}: {}", key, error);
                    }
                }
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "settings": settings,
                        "errors": preview.errors,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }
        Commands::Push { repo, target } => {
            let repository = context.repository(&repo)?;
            let mut results = Vec::new();
            for suffix in suffixes(context, &repository, target)? {
                results.push(context.hook().trigger_push(&repository, &suffix).await?);
            }
            print_actions(&results, format)?;
        }
        Commands::Mirror { repo } => {
            let repository = context.repository(&repo)?;
            let scheduled = context
                .hook()
                .post_update(&repository, HookTrigger::Manual)?;
            if scheduled == 0 {
                println!("Mirroring is not configured for {}", repository);
                return Ok(());
            }
            context.dispatcher().wait_idle().await;
            println!("Dispatched {} mirror push(es) for {}", scheduled, repository);
        }
        Commands::Recover => {
            let recovered = context.dispatcher().recover()?;
            context.dispatcher().wait_idle().await;
            println!("Recovered {} mirror request(s)", recovered);
        }
        Commands::DeleteRemote { repo, target } => {
            let repository = context.repository(&repo)?;
            let mut results = Vec::new();
            for suffix in suffixes(context, &repository, target)? {
                results.push(context.hook().delete_remote(&repository, &suffix).await?);
            }
            print_actions(&results, format)?;
        }
        Commands::Rename {
            repo,
            name,
            project,
        } => {
            let old = context.repository(&repo)?;
            let mut new = old.clone();
            new.slug = name.to_lowercase().replace(' ', "-");
            new.name = name;
            if let Some(key) = project {
                new.project.key = key;
            }
            let report = context.lifecycle().handle_rename(&old, &new).await?;
            print_report(&report, format)?;
        }
        Commands::Deleted { repo } => {
            let repository = context.repository(&repo)?;
            let report = context.lifecycle().handle_delete(&repository).await?;
            print_report(&report, format)?;
        }
    }

    Ok(())
}

async fn apply(
    context: &MirrorContext,
    repository: &Repository,
    settings: &pushmirror_core::settings::SettingsMap,
) -> Result<()> {
    match context.hook().apply_settings(repository, settings) {
        Ok(stored) => {
            let count = mirror_targets(&stored, FlagDefaults::DISPATCH).len();
            println!("Stored settings for {} mirror(s) of {}", count, repository);
            context.dispatcher().wait_idle().await;
            Ok(())
        }
        Err(HookError::Validation(errors)) => {
            for (field, messages) in errors.field_errors() {
                for message in messages {
                    eprintln!("{}: {}", field, message);
                }
            }
            for message in errors.form_errors() {
                eprintln!("{}", message);
            }
            anyhow::bail!("Settings for {} are invalid", repository)
        }
        Err(e) => Err(e.into()),
    }
}

fn suffixes(
    context: &MirrorContext,
    repository: &Repository,
    target: Option<String>,
) -> Result<Vec<String>> {
    if let Some(target) = target {
        return Ok(vec![target]);
    }
    let settings = context.settings().load(repository.id)?;
    let suffixes: Vec<String> = mirror_targets(&settings, FlagDefaults::DISPATCH)
        .iter()
        .map(|target| target.suffix().to_string())
        .collect();
    if suffixes.is_empty() {
        anyhow::bail!("Mirroring is not configured for {}", repository);
    }
    Ok(suffixes)
}

fn parse_value(raw: &str) -> SettingValue {
    match raw {
        "true" => SettingValue::Bool(true),
        "false" => SettingValue::Bool(false),
        other => SettingValue::Text(other.to_string()),
    }
}

fn render_value(value: &SettingValue) -> String {
    match value {
        SettingValue::Bool(flag) => flag.to_string(),
        SettingValue::Text(text) => text.clone(),
    }
}

fn print_actions(results: &[ActionOutput], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            for result in results {
                let status = if result.succeeded { "ok" } else { "failed" };
                println!("[{}] {}", result.suffix, status);
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = results
                .iter()
                .map(|result| {
                    let stream = if result.succeeded { "stdout" } else { "stderr" };
                    serde_json::json!({
                        "suffix": result.suffix,
                        "succeeded": result.succeeded,
                        stream: result.output,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if results.iter().any(|result| !result.succeeded) {
        anyhow::bail!("One or more mirror actions failed");
    }
    Ok(())
}

fn print_report(report: &LifecycleReport, format: OutputFormat) -> Result<()> {
    let label = |action: LifecycleAction| match action {
        LifecycleAction::DeleteRemote => "delete",
        LifecycleAction::Provision => "push",
    };
    match format {
        OutputFormat::Table => {
            if report.targets.is_empty() {
                println!("Nothing to do");
            }
            for target in &report.targets {
                let status = match &target.error {
                    None => "ok".to_string(),
                    Some(error) => format!("failed: {}", error),
                };
                println!("[{}] {} {}", target.suffix, label(target.action), status);
                if !target.output.is_empty() {
                    println!("{}", target.output);
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = report
                .targets
                .iter()
                .map(|target| {
                    serde_json::json!({
                        "suffix": target.suffix,
                        "action": label(target.action),
                        "error": target.error,
                        "output": target.output,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
