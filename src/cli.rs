use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::chapter::ChapterRange;
use crate::prompts::PromptStyle;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Chapter window shared by most commands
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct RangeArgs {
    /// First chapter to process (1-based, inclusive)
    #[arg(long)]
    pub start: Option<u32>,

    /// Last chapter to process (inclusive)
    #[arg(long)]
    pub end: Option<u32>,
}

impl RangeArgs {
    pub fn range(&self) -> ChapterRange {
        ChapterRange::new(self.start, self.end)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, translate and package a book from a supported site
    Process {
        /// URL of the book's main page
        #[arg(short, long)]
        url: String,

        #[command(flatten)]
        range: RangeArgs,

        /// Gemini model for first-pass translation
        #[arg(short, long)]
        model: Option<String>,

        /// Prompt style: modern, china-fantasy, book-info, incomplete-handle
        #[arg(short, long)]
        prompt_style: Option<PromptStyle>,

        /// Directory to save books to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Split, translate and package a local text file
    File {
        /// Input text file (chapters separated by blank lines)
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        /// Gemini model for first-pass translation
        #[arg(short, long)]
        model: Option<String>,

        /// Prompt style: modern, china-fantasy, book-info, incomplete-handle
        #[arg(short, long)]
        prompt_style: Option<PromptStyle>,

        /// Directory to save books to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Book title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Book author
        #[arg(long)]
        author: Option<String>,
    },

    /// Download chapters only
    Download {
        /// URL of the book's main page
        #[arg(short, long)]
        url: String,

        #[command(flatten)]
        range: RangeArgs,

        /// Directory to save books to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Create prompts and translate an existing book directory
    Translate {
        /// Book directory
        #[arg(short, long)]
        book_dir: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        /// Gemini model for first-pass translation
        #[arg(short, long)]
        model: Option<String>,

        /// Prompt style: modern, china-fantasy, book-info, incomplete-handle
        #[arg(short, long)]
        prompt_style: Option<PromptStyle>,
    },

    /// Build the EPUB from translated chapters
    Epub {
        /// Book directory
        #[arg(short, long)]
        book_dir: PathBuf,
    },

    /// Show per-chapter translation status
    Status {
        /// Book directory
        #[arg(short, long)]
        book_dir: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Extract proper names from translations into names.json
    Names {
        /// Book directory
        #[arg(short, long)]
        book_dir: PathBuf,
    },

    /// Translate a standalone text file
    Text {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (defaults to <input>_translated.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prompt style: modern, china-fantasy, book-info, incomplete-handle
        #[arg(short, long)]
        prompt_style: Option<PromptStyle>,
    },

    /// List supported sources
    Sources,

    /// Manage the task history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List recorded tasks
    List,

    /// Remove a task by id
    Remove {
        /// Task id
        #[arg(long)]
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_command() {
        let args = Args::try_parse_from([
            "book-translator",
            "-v",
            "process",
            "--url",
            "https://quanben.io/n/daoguiyixian/",
            "--start",
            "3",
            "--prompt-style",
            "china-fantasy",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Commands::Process {
                url,
                range,
                prompt_style,
                model,
                ..
            } => {
                assert_eq!(url, "https://quanben.io/n/daoguiyixian/");
                assert_eq!(range.range(), ChapterRange::new(Some(3), None));
                assert_eq!(prompt_style, Some(PromptStyle::ChinaFantasy));
                assert!(model.is_none());
            }
            _ => panic!("expected process command"),
        }
    }

    #[test]
    fn test_parse_history_remove() {
        let args = Args::try_parse_from(["book-translator", "history", "remove", "--id", "abc"]).unwrap();
        assert!(matches!(
            args.command,
            Commands::History {
                action: HistoryAction::Remove { ref id }
            } if id == "abc"
        ));
    }

    #[test]
    fn test_invalid_prompt_style_is_rejected() {
        let result = Args::try_parse_from(["book-translator", "text", "--input", "a.txt", "-p", "poetry"]);
        assert!(result.is_err());
    }
}
