//! # squirrel-dl CLI
//!
//! Command-line interface for the squirrel-dl library.
//! Downloads resume automatically across invocations: interrupt with
//! Ctrl-C, run the same command again, and transfers pick up where they
//! stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::error;
use squirrel_dl::{Downloader, Result};

mod cli;

/// Command-line interface for squirrel-dl
#[derive(Parser)]
#[command(name = "squirrel-dl")]
#[command(about = "Resumable HTTP download manager")]
#[command(long_about = "Downloads files with persistent pause/resume:
  squirrel-dl get https://example.com/video.mp4       # Download to current directory
  squirrel-dl get <url> <url> -d media                # Concurrent downloads into ./media
  squirrel-dl list -d media                           # Show all known downloads
  squirrel-dl remove video -d media                   # Delete a download and its file

Interrupting 'get' with Ctrl-C pauses every transfer; running the same
command again resumes from the saved state rather than starting over.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Download one or more URLs, resuming any saved state
    Get {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,

        /// Directory for completed files and download state
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,
    },

    /// Show every known download and its status
    List {
        /// Directory holding the download state
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,
    },

    /// Remove a download: cancel it, drop saved state, delete its file
    Remove {
        /// Identifier shown by `list`
        identifier: String,

        /// Directory holding the download state
        #[arg(short, long, default_value = ".")]
        directory: PathBuf,
    },
}

/// Derives a stable identifier from a URL, unique within this invocation.
fn identifier_for(url: &str, taken: &[String]) -> String {
    let base = reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(|segment| segment.split('.').next().unwrap_or(segment).to_string())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "download".to_string());

    if !taken.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    match cli.command {
        Command::Get { urls, directory } => get(urls, directory, cli.verbose).await,
        Command::List { directory } => list(directory).await,
        Command::Remove {
            identifier,
            directory,
        } => remove(&identifier, directory).await,
    }
}

async fn get(urls: Vec<String>, directory: PathBuf, verbose: bool) -> Result<()> {
    let progress = Arc::new(cli::ProgressManager::new());
    let downloader = Downloader::builder()
        .directory(&directory)
        .observer(progress.clone())
        .build()?;

    let mut identifiers: Vec<String> = Vec::new();
    for url in &urls {
        let identifier = identifier_for(url, &identifiers);
        if verbose {
            eprintln!("starting '{identifier}' from {url}");
        }
        progress.track(&identifier);
        downloader.resume_download(&identifier, url).await?;
        identifiers.push(identifier);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                for identifier in &identifiers {
                    if !progress.finished(identifier) {
                        let _ = downloader.pause_download(identifier).await;
                    }
                }
                eprintln!("paused; run the same command again to resume");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if identifiers.iter().all(|identifier| progress.finished(identifier)) {
                    break;
                }
            }
        }
    }

    let failures = progress.failures();
    if !failures.is_empty() {
        return Err(squirrel_dl::Error::TransferFailed(format!(
            "{} download(s) failed: {}",
            failures.len(),
            failures.join(", ")
        )));
    }
    Ok(())
}

async fn list(directory: PathBuf) -> Result<()> {
    let downloader = Downloader::builder().directory(&directory).build()?;

    let Some(mut models) = downloader.list_all().await else {
        println!("no downloads");
        return Ok(());
    };
    models.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    for model in models {
        let location = model
            .local_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| model.remote_path.clone());
        println!(
            "{:<16} {:<12} {:>6.1}%  {}",
            model.identifier,
            format!("{:?}", model.status),
            model.progress,
            location
        );
    }
    Ok(())
}

async fn remove(identifier: &str, directory: PathBuf) -> Result<()> {
    let downloader = Downloader::builder().directory(&directory).build()?;
    downloader.remove_download(identifier).await?;
    println!("removed '{identifier}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_url() {
        assert_eq!(
            identifier_for("https://x.example/media/video.mp4", &[]),
            "video"
        );
        assert_eq!(identifier_for("https://x.example/archive.tar.gz", &[]), "archive");
        assert_eq!(identifier_for("https://x.example/", &[]), "download");
    }

    #[test]
    fn test_identifier_collisions_get_suffixed() {
        let taken = vec!["video".to_string(), "video-2".to_string()];
        assert_eq!(
            identifier_for("https://y.example/video.mp4", &taken),
            "video-3"
        );
    }
}
