use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{LlmProvider, TranscriptStrategy};

#[derive(Parser)]
#[command(
    name = "ytblog",
    about = "Turn a YouTube video into a blog article",
    version,
    long_about = "Fetches a transcript for a YouTube video (hosted speech-to-text, published captions or a Whisper endpoint), wraps it in a blog-writing prompt and asks a hosted language model to write the article."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a blog article for one or more YouTube videos
    Generate {
        /// YouTube video URLs
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        /// Directory to write articles to (prints to console if not specified)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Output format (defaults to app.default_output_format)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// How to obtain the transcript
        #[arg(short, long, value_enum)]
        strategy: Option<TranscriptStrategy>,

        /// Language model backend
        #[arg(long, value_enum)]
        llm: Option<LlmProvider>,

        /// Transcription API key (overrides the environment)
        #[arg(long, value_name = "KEY")]
        transcription_key: Option<String>,

        /// Language model API key (overrides the environment)
        #[arg(long, value_name = "KEY")]
        llm_key: Option<String>,

        /// Also write <title>.md and <title>.txt for download
        #[arg(long)]
        save: bool,
    },

    /// Show or initialise the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List transcript strategies and language model backends
    Strategies,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// Markdown as written by the model
    Markdown,
    /// Plain text with markdown syntax removed
    Text,
    /// JSON with the article and its provenance
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
        }
    }

    /// Parse a format name from the config file
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
