//! Turning a source description into an ordered list of documents.
//!
//! Three modes:
//! - a Drive folder, paged through and filtered by MIME type
//! - a list of Drive share links
//! - a spreadsheet range whose cells hold (or hyperlink to) share links

pub mod links;
pub mod sheet;

pub use links::{extract_origin_id, normalize_folder_id, parse_link_list};

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::FailureKind;
use crate::google::{DriveError, SheetsError, SpreadsheetBackend, StorageBackend};
use crate::models::SourceDocument;

/// Default page size for folder listings.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to list documents: {0}")]
    Storage(#[from] DriveError),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(#[from] SheetsError),
    #[error("spreadsheet source requested but no spreadsheet backend is configured")]
    NoSpreadsheetBackend,
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SourceError::Storage(e) => e.kind(),
            SourceError::Spreadsheet(e) => e.kind(),
            SourceError::NoSpreadsheetBackend => FailureKind::Rejected,
        }
    }
}

/// Where documents come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Folder { folder_id: String },
    Links { links: Vec<String> },
    Sheet { spreadsheet_id: String, range: String },
}

impl SourceSpec {
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Folder { folder_id } => format!("folder {}", folder_id),
            SourceSpec::Links { links } => format!("{} links", links.len()),
            SourceSpec::Sheet {
                spreadsheet_id,
                range,
            } => format!("sheet {} ({})", spreadsheet_id, range),
        }
    }
}

/// Resolves a [`SourceSpec`] against the storage and spreadsheet backends.
pub struct SourceResolver<'a> {
    storage: &'a dyn StorageBackend,
    sheets: Option<&'a dyn SpreadsheetBackend>,
    mime_type: String,
    page_size: u32,
}

impl<'a> SourceResolver<'a> {
    pub fn new(storage: &'a dyn StorageBackend, mime_type: impl Into<String>) -> Self {
        Self {
            storage,
            sheets: None,
            mime_type: mime_type.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_sheets(mut self, sheets: &'a dyn SpreadsheetBackend) -> Self {
        self.sheets = Some(sheets);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Resolve the source into documents, in source order, without duplicates.
    ///
    /// Only a failure of the listing itself is an error. Individual links that
    /// cannot be parsed or looked up are logged and skipped.
    pub async fn resolve(&self, spec: &SourceSpec) -> Result<Vec<SourceDocument>, SourceError> {
        let documents = match spec {
            SourceSpec::Folder { folder_id } => self.resolve_folder(folder_id).await?,
            SourceSpec::Links { links } => self.resolve_links(links).await,
            SourceSpec::Sheet {
                spreadsheet_id,
                range,
            } => {
                let sheets = self.sheets.ok_or(SourceError::NoSpreadsheetBackend)?;
                let rows = sheets.read_range(spreadsheet_id, range).await?;
                let links = sheet::links_from_cells(&rows);
                debug!("Read {} links from {} {}", links.len(), spreadsheet_id, range);
                self.resolve_links(&links).await
            }
        };

        let documents = dedup_by_origin(documents);
        info!("Resolved {} documents from {}", documents.len(), spec.describe());
        Ok(documents)
    }

    async fn resolve_folder(&self, folder_id: &str) -> Result<Vec<SourceDocument>, SourceError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .storage
                .list_folder_page(
                    folder_id,
                    &self.mime_type,
                    self.page_size,
                    page_token.as_deref(),
                )
                .await?;
            debug!("Folder {}: page with {} files", folder_id, page.files.len());

            documents.extend(
                page.files
                    .into_iter()
                    .map(|file| SourceDocument::new(file.id, file.name, folder_id)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn resolve_links(&self, links: &[String]) -> Vec<SourceDocument> {
        let mut documents = Vec::new();
        for link in links {
            let Some(file_id) = extract_origin_id(link) else {
                warn!("Skipping unrecognized link: {}", link);
                continue;
            };
            match self.storage.get_metadata(&file_id).await {
                Ok(file) => documents.push(SourceDocument::new(file.id, file.name, link.as_str())),
                Err(e) => warn!("Skipping {}: metadata lookup failed: {}", link, e),
            }
        }
        documents
    }
}

/// Keep the first document for each origin ID.
fn dedup_by_origin(documents: Vec<SourceDocument>) -> Vec<SourceDocument> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|doc| {
            let first = seen.insert(doc.origin_id.clone());
            if !first {
                warn!("Dropping duplicate source {}", doc);
            }
            first
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_origin_keeps_first() {
        let docs = vec![
            SourceDocument::new("a", "first.pdf", "link-1"),
            SourceDocument::new("b", "other.pdf", "link-2"),
            SourceDocument::new("a", "again.pdf", "link-3"),
        ];
        let kept = dedup_by_origin(docs);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].display_name, "first.pdf");
        assert_eq!(kept[1].origin_id, "b");
    }

    #[test]
    fn test_describe() {
        let spec = SourceSpec::Sheet {
            spreadsheet_id: "s1".to_string(),
            range: "A2:A".to_string(),
        };
        assert_eq!(spec.describe(), "sheet s1 (A2:A)");
    }
}
