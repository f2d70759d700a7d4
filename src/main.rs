use anyhow::Result;
use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ytblog::cli::{Cli, Commands, OutputFormat};
use ytblog::config::{Config, LlmProvider, TranscriptStrategy};
use ytblog::output;
use ytblog::pipeline::{BlogPipeline, PipelineObserver, PipelineOutcome, PipelineWarning, Stage};
use ytblog::utils;

/// Prints stage changes and warnings to stderr
struct ConsoleObserver {
    quiet: bool,
}

impl PipelineObserver for ConsoleObserver {
    fn on_stage(&self, url: &str, stage: Stage) {
        if self.quiet || matches!(stage, Stage::Idle | Stage::Done | Stage::Failed) {
            return;
        }
        eprintln!("{} {} {}", style("→").cyan(), style(url).dim(), stage);
    }

    fn on_warning(&self, url: &str, warning: &PipelineWarning) {
        eprintln!("{} {} {}", style("⚠️").yellow(), style(url).dim(), warning);
    }
}

fn init_tracing(verbose: bool, json_logs: bool) {
    let default_filter = if verbose { "ytblog=debug" } else { "ytblog=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let mut config = Config::load().await?;
    if cli.quiet {
        config.app.show_progress = false;
    }

    match cli.command {
        Commands::Generate {
            urls,
            output_dir,
            format,
            strategy,
            llm,
            transcription_key,
            llm_key,
            save,
        } => {
            if let Some(strategy) = strategy {
                config.transcription.strategy = strategy;
            }
            if let Some(llm) = llm {
                config.llm.provider = llm;
            }

            config.load_credentials();
            if transcription_key.is_some() {
                config.credentials.transcription_key = transcription_key;
            }
            if llm_key.is_some() {
                config.credentials.llm_key = llm_key;
            }

            let format = match format {
                Some(format) => format,
                None => OutputFormat::from_name(&config.app.default_output_format)
                    .unwrap_or(OutputFormat::Markdown),
            };
            let output_dir = output_dir.or_else(|| config.app.output_dir.clone());

            // Check for required external dependencies (non-fatal)
            let missing_deps = utils::check_dependencies(config.transcription.strategy.needs_yt_dlp()).await;
            if !missing_deps.is_empty() {
                eprintln!("{} Dependency check warnings:", style("⚠️").yellow());
                for dep in missing_deps {
                    eprintln!("   • {}", dep);
                }
                eprintln!("   (Continuing anyway - tools may be available)");
            }

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("{} Cancelling...", style("⏹").red());
                    trigger.cancel();
                }
            });

            let pipeline = BlogPipeline::from_config(&config);
            tracing::info!(
                strategy = pipeline.provider_name(),
                backend = pipeline.backend_name(),
                videos = urls.len(),
                "Starting"
            );

            let observer = ConsoleObserver { quiet: cli.quiet };
            let results = pipeline
                .run_many(&urls, config.app.max_concurrent_jobs, &observer, &cancel)
                .await;

            let mut failures = 0;
            for (url, outcome) in &results {
                if let PipelineOutcome::Failed { stage, error } = outcome {
                    failures += 1;
                    eprintln!(
                        "{} {} (while {}): {}",
                        style("✗").red().bold(),
                        url,
                        stage,
                        error.user_message()
                    );
                }
            }

            for (url, delivered) in output::deliver_all(&results, output_dir.as_deref(), &format, save) {
                match delivered {
                    Ok(delivery) => {
                        if let Some(path) = delivery.saved {
                            println!("Article saved to: {}", path.display());
                        }
                        if let Some((markdown, text)) = delivery.downloads {
                            println!("Downloads: {} and {}", markdown.display(), text.display());
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::error!(error = ?e, "Could not write article");
                        eprintln!("{} {} (while saving): {:#}", style("✗").red().bold(), url, e);
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} of {} videos failed", failures, results.len());
            }
        }
        Commands::Config { show } => {
            config.load_credentials();
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Edit it to change strategies, models and limits. API keys are read from the environment:");
                if let Some(env) = config.transcription.api_key_env() {
                    println!("  • {} (transcription)", env);
                }
                println!("  • {} (language model)", config.llm.endpoint().api_key_env);
            }
        }
        Commands::Strategies => {
            println!("Transcript strategies:");
            for strategy in [TranscriptStrategy::Remote, TranscriptStrategy::Captions, TranscriptStrategy::Local] {
                let mut settings = config.transcription.clone();
                settings.strategy = strategy;
                let (about, key) = match strategy {
                    TranscriptStrategy::Remote => ("AssemblyAI upload and poll, needs yt-dlp", settings.api_key_env()),
                    TranscriptStrategy::Captions => ("published YouTube captions", None),
                    TranscriptStrategy::Local => ("Whisper endpoint, needs yt-dlp", settings.api_key_env()),
                };
                println!("  • {:<9} {} (key: {})", strategy.to_string(), about, key.unwrap_or("none"));
            }

            println!("Language model backends:");
            for provider in [LlmProvider::Gemini, LlmProvider::Openai] {
                let endpoint = match provider {
                    LlmProvider::Gemini => &config.llm.gemini,
                    LlmProvider::Openai => &config.llm.openai,
                };
                println!("  • {:<9} {} (key: {})", provider.to_string(), endpoint.model, endpoint.api_key_env);
            }
        }
    }

    Ok(())
}
