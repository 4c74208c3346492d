//! Google Sheets v4 backend, used for link lists and identity reports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::parse_api_error;
use crate::error::FailureKind;

/// Default Sheets API endpoint.
pub const DEFAULT_SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4";

#[derive(Error, Debug)]
pub enum SheetsError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl SheetsError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SheetsError::Http { status, .. } => FailureKind::from_status(*status),
            SheetsError::Transport(e) => FailureKind::from_reqwest(e),
            SheetsError::Url(_) | SheetsError::Parse(_) => FailureKind::Malformed,
        }
    }
}

/// A single cell: its displayed text and any hyperlink annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetCell {
    pub value: Option<String>,
    pub hyperlink: Option<String>,
}

impl SheetCell {
    pub fn text(value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
            hyperlink: None,
        }
    }

    /// The reference this cell points at: hyperlink first, then non-empty text.
    pub fn reference(&self) -> Option<&str> {
        self.hyperlink
            .as_deref()
            .or(self.value.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Spreadsheet operations used by the pipeline.
#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    /// Read a range as rows of cells, including hyperlinks.
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<SheetCell>>, SheetsError>;

    /// Overwrite a range with raw string values.
    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<(), SheetsError>;

    /// Clear the values in a range.
    async fn clear_range(&self, spreadsheet_id: &str, range: &str) -> Result<(), SheetsError>;
}

/// Sheets REST client authenticated with an OAuth access token.
#[derive(Clone)]
pub struct SheetsClient {
    client: Client,
    endpoint: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetGrid {
    #[serde(default)]
    sheets: Vec<GridSheet>,
}

#[derive(Debug, Deserialize)]
struct GridSheet {
    #[serde(default)]
    data: Vec<GridData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridData {
    #[serde(default)]
    row_data: Vec<RowData>,
}

#[derive(Debug, Deserialize)]
struct RowData {
    #[serde(default)]
    values: Vec<CellData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellData {
    #[serde(default)]
    formatted_value: Option<String>,
    #[serde(default)]
    hyperlink: Option<String>,
}

impl SheetsClient {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SheetsError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Build `{endpoint}/spreadsheets/{id}/{segments...}` with each segment escaped.
    fn url(&self, spreadsheet_id: &str, segments: &[&str]) -> Result<Url, SheetsError> {
        let mut url = Url::parse(&format!("{}/spreadsheets", self.endpoint))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SheetsError::Parse("endpoint cannot be a base URL".to_string()))?;
            path.push(spreadsheet_id);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SheetsError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (message, _) = parse_api_error(&body);
        Err(SheetsError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SpreadsheetBackend for SheetsClient {
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<SheetCell>>, SheetsError> {
        let url = self.url(spreadsheet_id, &[])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("ranges", range),
                ("includeGridData", "true"),
                (
                    "fields",
                    "sheets(data(rowData(values(formattedValue,hyperlink))))",
                ),
            ])
            .send()
            .await?;
        let response = Self::check(response).await?;

        let grid: SpreadsheetGrid = response
            .json()
            .await
            .map_err(|e| SheetsError::Parse(e.to_string()))?;

        Ok(grid_to_rows(grid))
    }

    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<(), SheetsError> {
        let url = self.url(spreadsheet_id, &["values", range])?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn clear_range(&self, spreadsheet_id: &str, range: &str) -> Result<(), SheetsError> {
        let target = format!("{}:clear", range);
        let url = self.url(spreadsheet_id, &["values", target.as_str()])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

fn grid_to_rows(grid: SpreadsheetGrid) -> Vec<Vec<SheetCell>> {
    grid.sheets
        .into_iter()
        .flat_map(|sheet| sheet.data)
        .flat_map(|data| data.row_data)
        .map(|row| {
            row.values
                .into_iter()
                .map(|cell| SheetCell {
                    value: cell.formatted_value,
                    hyperlink: cell.hyperlink,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_to_rows() {
        let json = r#"{"sheets": [{"data": [{"rowData": [
            {"values": [{"formattedValue": "Jane's form", "hyperlink": "https://drive.google.com/file/d/abc/view"}]},
            {},
            {"values": [{"formattedValue": "https://drive.google.com/open?id=xyz"}]}
        ]}]}]}"#;
        let grid: SpreadsheetGrid = serde_json::from_str(json).unwrap();
        let rows = grid_to_rows(grid);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0][0].reference(),
            Some("https://drive.google.com/file/d/abc/view")
        );
        assert!(rows[1].is_empty());
        assert_eq!(
            rows[2][0].reference(),
            Some("https://drive.google.com/open?id=xyz")
        );
    }

    #[test]
    fn test_blank_cell_has_no_reference() {
        assert_eq!(SheetCell::text("   ").reference(), None);
        assert_eq!(SheetCell::default().reference(), None);
    }

    #[test]
    fn test_url_escapes_range() {
        let client = SheetsClient::new(DEFAULT_SHEETS_ENDPOINT, "t", Duration::from_secs(5)).unwrap();
        let url = client
            .url("sheet123", &["values", "Roster 1!A2:A"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet123/values/Roster%201!A2:A"
        );
    }
}
