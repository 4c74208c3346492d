//! JSON shapes exchanged with the Gemini API.

use serde::{Deserialize, Serialize};

use crate::models::RemoteFile;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    FileData { file_data: FileData },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileData {
    pub file_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl GenerateRequest {
    /// A single user turn: the prompt text followed by a file reference.
    pub fn prompt_with_file(prompt: &str, file_uri: &str, mime_type: Option<&str>) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::Text {
                        text: prompt.to_string(),
                    },
                    Part::FileData {
                        file_data: FileData {
                            file_uri: file_uri.to_string(),
                            mime_type: mime_type.map(str::to_string),
                        },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenate the text parts of the first candidate.
    ///
    /// Errors describe why no text came back (blocked prompt, empty candidate).
    pub fn into_text(self) -> Result<String, String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(format!("prompt blocked: {}", reason));
        }
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| "no candidates returned".to_string())?;
        let finish_reason = candidate.finish_reason;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(format!(
                "empty response (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            ));
        }
        Ok(text)
    }
}

/// File resource as returned by the Files API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl From<FileResource> for RemoteFile {
    fn from(file: FileResource) -> Self {
        RemoteFile {
            display_name: file.display_name.unwrap_or_else(|| file.name.clone()),
            name: file.name,
            uri: file.uri,
            mime_type: file.mime_type,
            state: file.state,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub file: FileResource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    #[serde(default)]
    pub files: Vec<FileResource>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One line of a batch results file.
#[derive(Debug, Deserialize)]
pub struct BatchResultLine {
    pub key: String,
    #[serde(default)]
    pub response: Option<GenerateResponse>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}
