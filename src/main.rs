use anyhow::Result;
use clap::{CommandFactory, Parser};
use echovox::app::{self, PolicyFlags, RunOverrides};
use echovox::cli::{Cli, Commands, ModelsAction};
use echovox::config::Config;
use echovox::diagnostics::run_checks;
use echovox::models::{DspModelLoader, write_default_bundles};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let flags = PolicyFlags {
        low_mem: cli.low_mem,
        reload_models: cli.reload_models,
        seed: cli.seed,
    };

    match cli.command {
        Commands::Run {
            reference,
            keywords,
            interval,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            app::apply_policy_flags(&mut config, flags);
            app::apply_run_overrides(
                &mut config,
                RunOverrides {
                    reference,
                    keywords,
                    interval,
                },
            );
            let summary = app::run_service_command(config).await?;
            tracing::info!(
                iterations = summary.iterations,
                failed = summary.failed_iterations,
                "Reply service stopped"
            );
        }
        Commands::Synthesize {
            reference,
            text,
            output,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            app::apply_policy_flags(&mut config, flags);
            app::run_synthesize_command(&config, &reference, &text, &output)?;
            println!("{}", output.display());
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            if !run_checks(&config, &DspModelLoader) {
                std::process::exit(1);
            }
        }
        Commands::Models {
            action: ModelsAction::Init { dir },
        } => {
            let config = load_config(cli.config.as_deref())?;
            let dir = dir.unwrap_or_else(|| {
                config
                    .models
                    .encoder
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_default()
            });
            let paths = write_default_bundles(&dir)?;
            println!("Wrote model bundles:");
            println!("  encoder:     {}", paths.encoder.display());
            println!("  synthesizer: {}", paths.synthesizer.display());
            println!("  vocoder:     {}", paths.vocoder.display());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "echovox", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the -q/-v flags.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path();
        Config::load_or_default(&default_path)?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}
