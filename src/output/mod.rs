use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::pipeline::PipelineOutcome;

pub mod formatters;

pub use formatters::*;

const MAX_STEM_CHARS: usize = 80;

/// A finished article with the details worth keeping next to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlogPost {
    pub url: String,
    pub video_id: String,
    pub title: Option<String>,
    pub markdown: String,
    pub warnings: Vec<String>,
    pub attempts: u32,
    pub backend: String,
}

impl BlogPost {
    /// `None` for failed runs
    pub fn from_outcome(outcome: &PipelineOutcome) -> Option<Self> {
        let PipelineOutcome::Done {
            video,
            title,
            article,
            warnings,
        } = outcome
        else {
            return None;
        };

        Some(Self {
            url: video.raw_url().to_string(),
            video_id: video.video_id()?.to_string(),
            title: title.clone(),
            markdown: article.markdown.clone(),
            warnings: warnings.iter().map(ToString::to_string).collect(),
            attempts: article.attempts,
            backend: article.backend.clone(),
        })
    }

    /// File name stem: the sanitized title, or `youtube_blog_<id>`
    pub fn file_stem(&self) -> String {
        self.title
            .as_deref()
            .map(|title| crate::utils::sanitize_filename(title, MAX_STEM_CHARS))
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| format!("youtube_blog_{}", self.video_id))
    }
}

fn render(post: &BlogPost, format: &OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Markdown => format_as_markdown(post),
        OutputFormat::Text => format_as_text(post),
        OutputFormat::Json => format_as_json(post)?,
    })
}

/// Save the post to `path` in the given format
pub fn save_to_file(post: &BlogPost, path: &Path, format: &OutputFormat) -> Result<()> {
    let content = render(post, format)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(path, content).context("Failed to write article")?;
    Ok(())
}

/// Save the post into `dir` under its stem, never overwriting an existing file
pub fn save_in_dir(post: &BlogPost, dir: &Path, format: &OutputFormat) -> Result<PathBuf> {
    let path = free_path(dir, &post.file_stem(), format.extension());
    save_to_file(post, &path, format)?;
    Ok(path)
}

/// Write the markdown and plain-text renditions side by side. Both files
/// move to a fresh stem when either name is taken.
pub fn save_downloads(post: &BlogPost, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let mut stem = post.file_stem();
    if dir.join(format!("{}.md", stem)).exists() || dir.join(format!("{}.txt", stem)).exists() {
        stem = crate::utils::generate_unique_stem(&stem);
    }
    let markdown_path = dir.join(format!("{}.md", stem));
    let text_path = dir.join(format!("{}.txt", stem));

    save_to_file(post, &markdown_path, &OutputFormat::Markdown)?;
    save_to_file(post, &text_path, &OutputFormat::Text)?;
    Ok((markdown_path, text_path))
}

/// Print the post to stdout
pub fn print_to_console(post: &BlogPost, format: &OutputFormat) -> Result<()> {
    let content = render(post, format)?;
    println!("{}", content);
    Ok(())
}

/// Files written for one article
#[derive(Debug, Default)]
pub struct Delivery {
    /// Set when the article went to a directory instead of stdout
    pub saved: Option<PathBuf>,
    /// Markdown and text pair written for `--save`
    pub downloads: Option<(PathBuf, PathBuf)>,
}

/// Save or print one article, plus the download pair when `save` is set
pub fn deliver(post: &BlogPost, output_dir: Option<&Path>, format: &OutputFormat, save: bool) -> Result<Delivery> {
    let mut delivery = Delivery::default();

    match output_dir {
        Some(dir) => delivery.saved = Some(save_in_dir(post, dir, format)?),
        None => print_to_console(post, format)?,
    }

    if save {
        let dir = output_dir.unwrap_or_else(|| Path::new("."));
        delivery.downloads = Some(save_downloads(post, dir)?);
    }

    Ok(delivery)
}

/// Deliver every finished article in order. A write failure is reported
/// for its own URL and does not stop the rest.
pub fn deliver_all<'a>(
    results: &'a [(String, PipelineOutcome)],
    output_dir: Option<&Path>,
    format: &OutputFormat,
    save: bool,
) -> Vec<(&'a str, Result<Delivery>)> {
    results
        .iter()
        .filter_map(|(url, outcome)| BlogPost::from_outcome(outcome).map(|post| (url.as_str(), post)))
        .map(|(url, post)| {
            let delivered = deliver(&post, output_dir, format, save)
                .with_context(|| format!("Failed to write the article for {}", url));
            (url, delivered)
        })
        .collect()
}

fn free_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let path = dir.join(format!("{}.{}", stem, extension));
    if path.exists() {
        dir.join(crate::utils::generate_unique_filename(stem, extension))
    } else {
        path
    }
}
