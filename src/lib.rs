//! book-translator - download Chinese web novels, translate them with Gemini
//! and package the result as EPUB.

pub mod chapter;
pub mod cli;
pub mod config;
pub mod download;
pub mod epub;
pub mod error;
pub mod history;
pub mod progress;
pub mod prompts;
pub mod text;
pub mod translate;
pub mod workflow;
pub mod workspace;
