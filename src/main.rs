//! book-translator - Chinese web novel to Vietnamese EPUB pipeline
//!
//! Entry point: parses the command line, sets up logging and dispatches to the
//! `Workflow` stages.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use book_translator::chapter::ChapterRange;
use book_translator::cli::{Args, Commands, HistoryAction};
use book_translator::config::Config;
use book_translator::error::BookError;
use book_translator::workflow::{PipelineOutcome, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    setup_logging(args.verbose, &config.output.data_dir)?;
    info!("Starting book-translator");

    match args.command {
        Commands::Process {
            url,
            range,
            model,
            prompt_style,
            output_dir,
        } => {
            apply_model(&mut config, model);
            let style = prompt_style.unwrap_or(config.translate.prompt_style);
            let workflow = Workflow::new(config)?;
            let outcome = workflow
                .process_url(&url, range.range(), style, output_dir.as_deref())
                .await?;
            report_outcome(&outcome);
        }
        Commands::File {
            input,
            range,
            model,
            prompt_style,
            output_dir,
            title,
            author,
        } => {
            apply_model(&mut config, model);
            let style = prompt_style.unwrap_or(config.translate.prompt_style);
            let workflow = Workflow::new(config)?;
            let outcome = workflow
                .process_file(
                    &input,
                    range.range(),
                    style,
                    output_dir.as_deref(),
                    title.as_deref(),
                    author.as_deref(),
                )
                .await?;
            report_outcome(&outcome);
        }
        Commands::Download { url, range, output_dir } => {
            let workflow = Workflow::new(config)?;
            let book_dir = workflow.download(&url, range.range(), output_dir.as_deref()).await?;
            println!("Chapters saved to {}", book_dir.display());
        }
        Commands::Translate {
            book_dir,
            range,
            model,
            prompt_style,
        } => {
            apply_model(&mut config, model);
            let style = prompt_style.unwrap_or(config.translate.prompt_style);
            let workflow = Workflow::new(config)?;
            let summary = workflow.translate_book(&book_dir, range.range(), style).await?;
            if summary.cancelled {
                println!("Translation cancelled; run the same command again to resume.");
            } else if summary.complete {
                println!("Translation complete after {} rounds.", summary.rounds);
            } else {
                println!("Translation stopped after {} rounds with shards remaining.", summary.rounds);
            }
        }
        Commands::Epub { book_dir } => {
            let workflow = Workflow::new(config)?;
            match workflow.build_epub(&book_dir)? {
                Some(path) => println!("EPUB created: {}", path.display()),
                None => println!("No translated chapters found in {}", book_dir.display()),
            }
        }
        Commands::Status { book_dir, range } => {
            let workflow = Workflow::new(config)?;
            print_status(&workflow, &book_dir, range.range())?;
        }
        Commands::Names { book_dir } => {
            let workflow = Workflow::new(config)?;
            let names = workflow.extract_names(&book_dir)?;
            if names.is_empty() {
                println!("No names found.");
            }
            for (name, count) in names {
                println!("{:<40} {}", name, count);
            }
        }
        Commands::Text {
            input,
            output,
            prompt_style,
        } => {
            let style = prompt_style.unwrap_or(config.translate.prompt_style);
            let workflow = Workflow::new(config)?;
            match workflow.translate_text_file(&input, output.as_deref(), style).await {
                Ok(path) => println!("Translation saved to {}", path.display()),
                Err(BookError::Cancelled) => println!("Cancelled; no output was written."),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Sources => {
            let workflow = Workflow::new(config)?;
            println!("\nSupported Sources:");
            println!("{:<12} {:<30} {:<12} {:<12}", "Name", "Domains", "Mode", "Chapters/s");
            println!("{}", "-".repeat(70));
            for source in workflow.sources() {
                let mode = if source.bulk_download {
                    format!("bulk x{}", source.concurrent_downloads)
                } else {
                    "sequential".to_string()
                };
                println!(
                    "{:<12} {:<30} {:<12} {:<12.2}",
                    source.name,
                    source.domains.join(", "),
                    mode,
                    source.download_speed
                );
            }
        }
        Commands::History { action } => {
            let workflow = Workflow::new(config)?;
            match action {
                HistoryAction::List => {
                    let entries = workflow.history().load();
                    if entries.is_empty() {
                        println!("No tasks recorded.");
                    } else {
                        println!("{:<38} {:<6} {:<10} {:<20} {:<30}", "Id", "Type", "Status", "Updated", "Title");
                        println!("{}", "-".repeat(106));
                        for entry in entries {
                            println!(
                                "{:<38} {:<6} {:<10} {:<20} {:<30}",
                                entry.id,
                                entry.task_type,
                                entry.status,
                                entry.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                                entry.title
                            );
                        }
                    }
                }
                HistoryAction::Remove { id } => {
                    if workflow.history().remove_task(&id)? {
                        println!("Removed task {}", id);
                    } else {
                        println!("No task with id {}", id);
                    }
                }
            }
        }
    }

    info!("book-translator finished");
    Ok(())
}

fn apply_model(config: &mut Config, model: Option<String>) {
    if let Some(model) = model {
        config.translate.model = model;
    }
}

fn report_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::Completed(Some(path)) => println!("EPUB created: {}", path.display()),
        PipelineOutcome::Completed(None) => println!("Finished, but no translated chapters were packaged."),
        PipelineOutcome::Cancelled => println!("Cancelled; run the same command again to resume."),
    }
}

fn print_status(workflow: &Workflow, book_dir: &Path, range: ChapterRange) -> Result<()> {
    let statuses = workflow.status(book_dir, range)?;
    if statuses.is_empty() {
        println!("No prompt files found in {}", book_dir.display());
        return Ok(());
    }

    println!("{:<16} {:>8} {:>12} {:>8} {:>10}  {}", "Chapter", "Shards", "Translated", "Failed", "Progress", "Status");
    println!("{}", "-".repeat(72));
    for (chapter, status) in statuses {
        println!(
            "{:<16} {:>8} {:>12} {:>8} {:>9.1}%  {}",
            chapter, status.total_shards, status.translated_shards, status.failed_shards, status.progress, status.status
        );
    }
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool, data_dir: &Path) -> Result<()> {
    let log_dir = data_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "book-translator.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("book-translator.log").display()
    );
    Ok(())
}
