//! Per-document analysis outcomes.

use serde::{Deserialize, Serialize};

use super::{SourceDocument, StudentIdentity};

/// Outcome of analyzing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisStatus {
    Ok,
    Failed(String),
}

impl AnalysisStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, AnalysisStatus::Ok)
    }
}

/// One entry of `responses.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordRow", try_from = "RecordRow")]
pub struct AnalysisRecord {
    pub source_name: String,
    pub source_id: String,
    pub analysis_text: String,
    pub status: AnalysisStatus,
    pub student: Option<StudentIdentity>,
}

impl AnalysisRecord {
    pub fn ok(doc: &SourceDocument, analysis_text: impl Into<String>) -> Self {
        Self {
            source_name: doc.display_name.clone(),
            source_id: doc.origin_id.clone(),
            analysis_text: analysis_text.into(),
            status: AnalysisStatus::Ok,
            student: None,
        }
    }

    pub fn failed(doc: &SourceDocument, reason: impl Into<String>) -> Self {
        Self {
            source_name: doc.display_name.clone(),
            source_id: doc.origin_id.clone(),
            analysis_text: String::new(),
            status: AnalysisStatus::Failed(reason.into()),
            student: None,
        }
    }

    /// Attach the student identity derived from the filename.
    pub fn with_student(mut self, student: Option<StudentIdentity>) -> Self {
        self.student = student;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            AnalysisStatus::Ok => None,
            AnalysisStatus::Failed(reason) => Some(reason),
        }
    }
}

/// On-disk shape: `{file_name, file_id, analysis, status, error?, student?}`.
#[derive(Debug, Serialize, Deserialize)]
struct RecordRow {
    file_name: String,
    file_id: String,
    #[serde(default)]
    analysis: String,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    student: Option<StudentIdentity>,
}

fn default_status() -> String {
    "ok".to_string()
}

impl From<AnalysisRecord> for RecordRow {
    fn from(record: AnalysisRecord) -> Self {
        let (status, error) = match record.status {
            AnalysisStatus::Ok => ("ok".to_string(), None),
            AnalysisStatus::Failed(reason) => ("failed".to_string(), Some(reason)),
        };
        Self {
            file_name: record.source_name,
            file_id: record.source_id,
            analysis: record.analysis_text,
            status,
            error,
            student: record.student,
        }
    }
}

impl TryFrom<RecordRow> for AnalysisRecord {
    type Error = String;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "ok" => AnalysisStatus::Ok,
            "failed" => AnalysisStatus::Failed(row.error.unwrap_or_default()),
            other => return Err(format!("unknown record status: {}", other)),
        };
        Ok(Self {
            source_name: row.file_name,
            source_id: row.file_id,
            analysis_text: row.analysis,
            status,
            student: row.student,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> SourceDocument {
        SourceDocument::new("id1", "Form (X) Ann_Lee.pdf", "folder")
    }

    #[test]
    fn test_ok_record_serializes_legacy_fields() {
        let record = AnalysisRecord::ok(&doc(), "Looks good.");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["file_name"], "Form (X) Ann_Lee.pdf");
        assert_eq!(value["file_id"], "id1");
        assert_eq!(value["analysis"], "Looks good.");
        assert_eq!(value["status"], "ok");
        assert!(value.get("error").is_none());
        assert!(value.get("student").is_none());
    }

    #[test]
    fn test_failed_record_carries_reason() {
        let record = AnalysisRecord::failed(&doc(), "quota exhausted");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "quota exhausted");

        let back: AnalysisRecord = serde_json::from_value(value).unwrap();
        assert_eq!(
            back.status,
            AnalysisStatus::Failed("quota exhausted".to_string())
        );
    }

    #[test]
    fn test_reads_rows_without_status() {
        // Files written before status tracking only had three fields.
        let json = r#"{"file_name": "a.pdf", "file_id": "x", "analysis": "text"}"#;
        let record: AnalysisRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_ok());
        assert_eq!(record.analysis_text, "text");
    }

    #[test]
    fn test_rejects_unknown_status() {
        let json = r#"{"file_name": "a.pdf", "file_id": "x", "status": "maybe"}"#;
        assert!(serde_json::from_str::<AnalysisRecord>(json).is_err());
    }
}
