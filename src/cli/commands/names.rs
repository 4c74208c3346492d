//! `names` command: student names from document file names.

use anyhow::Context;

use super::helpers::{drive_client, sheets_client, source_spec};
use super::SourceArgs;
use crate::cli::icons::{dim_arrow, success, warn};
use crate::config::Config;
use crate::google::SpreadsheetBackend;
use crate::identity::extract_identity;
use crate::models::SourceDocument;
use crate::sources::{SourceResolver, SourceSpec};

/// `first, last, file` rows for every document whose name parses.
pub fn identity_rows(documents: &[SourceDocument]) -> Vec<Vec<String>> {
    documents
        .iter()
        .filter_map(|doc| match extract_identity(&doc.display_name) {
            Ok(identity) => Some(vec![
                identity.first_name,
                identity.last_name,
                doc.display_name.clone(),
            ]),
            Err(e) => {
                println!("{} {}", warn(), e);
                None
            }
        })
        .collect()
}

pub async fn cmd_names(
    config: &Config,
    source: &SourceArgs,
    write_range: Option<&str>,
    write_sheet: Option<&str>,
) -> anyhow::Result<()> {
    let spec = source_spec(config, source)?;
    let storage = drive_client(config)?;
    let sheets = sheets_client(config)?;

    let documents = SourceResolver::new(&storage, config.source.mime_type.clone())
        .with_page_size(config.google.page_size)
        .with_sheets(&sheets)
        .resolve(&spec)
        .await?;

    let rows = identity_rows(&documents);
    for row in &rows {
        println!("{} {} {} {} {}", success(), row[0], row[1], dim_arrow(), row[2]);
    }

    let Some(range) = write_range else {
        return Ok(());
    };
    let spreadsheet_id = match (write_sheet, &spec) {
        (Some(id), _) => id.to_string(),
        (None, SourceSpec::Sheet { spreadsheet_id, .. }) => spreadsheet_id.clone(),
        (None, _) => config
            .source
            .spreadsheet_id
            .clone()
            .context("--write-sheet is required when the source is not a spreadsheet")?,
    };

    sheets.clear_range(&spreadsheet_id, range).await?;
    let count = rows.len();
    sheets.write_range(&spreadsheet_id, range, rows).await?;
    println!(
        "{} Wrote {} names to {} {}",
        success(),
        count,
        spreadsheet_id,
        range
    );
    Ok(())
}
