//! drivelens - batch document analysis from Google Drive through Gemini.
//!
//! Documents are resolved from a Drive folder, a list of links or a
//! spreadsheet, uploaded once to the Gemini file store, analyzed with a
//! prompt and collected into `responses.json`, optionally rendered to PDF.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gemini;
pub mod google;
pub mod identity;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod sources;
pub mod store;
pub mod upload;
