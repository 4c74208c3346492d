//! Rendering analysis records into formatted PDF files.

pub mod markup;
pub mod pdf;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::identity::strip_extension;
use crate::models::{AnalysisRecord, OutputArtifact};

/// Longest output file stem, before `.pdf`.
const MAX_STEM_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("character {0:?} cannot be rendered with the built-in fonts")]
    Encoding(char),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to serialize PDF: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turn a source file name into a safe output file name ending in `.pdf`.
///
/// The original extension is dropped, characters that are illegal in file
/// names are removed, whitespace runs collapse to one space and the stem is
/// capped in length. An empty result becomes `document.pdf`.
pub fn sanitize_for_output(source_name: &str) -> String {
    let stem = strip_extension(source_name);

    let cleaned: String = stem
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let capped: String = collapsed.chars().take(MAX_STEM_LEN).collect();
    let capped = capped.trim_end().trim_matches('.');
    if capped.is_empty() {
        "document.pdf".to_string()
    } else {
        format!("{}.pdf", capped)
    }
}

/// Writes one PDF per successful record into an output directory.
pub struct Renderer {
    output_dir: PathBuf,
}

impl Renderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Title shown at the top of a rendered record.
    fn title(record: &AnalysisRecord) -> String {
        match &record.student {
            Some(student) => format!("{} ({})", student, record.source_name),
            None => record.source_name.clone(),
        }
    }

    /// Render a single record to `file_name` inside the output directory.
    pub fn render_record(
        &self,
        record: &AnalysisRecord,
        file_name: &str,
    ) -> Result<OutputArtifact, RenderError> {
        let blocks = markup::parse(&record.analysis_text);
        let bytes = pdf::render_pdf(&Self::title(record), &blocks)?;

        let path = self.output_dir.join(file_name);
        let io_err = |source: std::io::Error| RenderError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.output_dir).map_err(io_err)?;
        std::fs::write(&path, bytes).map_err(io_err)?;

        Ok(OutputArtifact {
            source_name: record.source_name.clone(),
            path,
        })
    }

    /// Render every Ok record. Failures are logged and skipped.
    ///
    /// Records whose names sanitize to the same file get a numeric suffix.
    pub fn render_all(&self, records: &[AnalysisRecord]) -> Vec<OutputArtifact> {
        let mut used: HashSet<String> = HashSet::new();
        let mut artifacts = Vec::new();

        for record in records.iter().filter(|r| r.is_ok()) {
            let file_name = unique_name(&sanitize_for_output(&record.source_name), &mut used);
            match self.render_record(record, &file_name) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("Could not render {}: {}", record.source_name, e),
            }
        }

        info!(
            "Rendered {} of {} records to {}",
            artifacts.len(),
            records.len(),
            self.output_dir.display()
        );
        artifacts
    }
}

/// `name.pdf`, then `name (2).pdf`, `name (3).pdf`, ... for repeats.
fn unique_name(file_name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(file_name.to_string()) {
        return file_name.to_string();
    }
    let stem = file_name.trim_end_matches(".pdf");
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}).pdf", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceDocument, StudentIdentity};

    #[test]
    fn test_sanitize_for_output() {
        assert_eq!(sanitize_for_output("Jane: Doe?.pdf"), "Jane Doe.pdf");
        assert_eq!(sanitize_for_output("report"), "report.pdf");
        assert_eq!(sanitize_for_output("essays/draft 2.pdf"), "essaysdraft 2.pdf");
        assert_eq!(sanitize_for_output("a  <b>\t c.docx"), "a b c.pdf");
        assert_eq!(sanitize_for_output("???.pdf"), "document.pdf");
        assert_eq!(sanitize_for_output(""), "document.pdf");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = format!("{}.pdf", "é".repeat(150));
        let name = sanitize_for_output(&long);
        assert_eq!(name.chars().count(), 104);
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_serialize_failure_maps_to_write() {
        let err = RenderError::from(std::io::Error::new(std::io::ErrorKind::WriteZero, "full"));
        assert!(matches!(err, RenderError::Write(_)));
        assert_eq!(err.to_string(), "failed to serialize PDF: full");
    }

    #[test]
    fn test_unique_name() {
        let mut used = HashSet::new();
        assert_eq!(unique_name("a.pdf", &mut used), "a.pdf");
        assert_eq!(unique_name("a.pdf", &mut used), "a (2).pdf");
        assert_eq!(unique_name("a.pdf", &mut used), "a (3).pdf");
    }

    #[test]
    fn test_render_all_skips_failed_and_unrenderable() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(dir.path().join("pdfs"));

        let ok = AnalysisRecord::ok(
            &SourceDocument::new("1", "Jane: Doe?.pdf", "f"),
            "# Feedback\n- Clear argument\n",
        )
        .with_student(Some(StudentIdentity {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
        }));
        let failed = AnalysisRecord::failed(&SourceDocument::new("2", "b.pdf", "f"), "quota");
        let unrenderable = AnalysisRecord::ok(&SourceDocument::new("3", "c.pdf", "f"), "emoji 🎉");

        let artifacts = renderer.render_all(&[ok, failed, unrenderable]);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, dir.path().join("pdfs").join("Jane Doe.pdf"));
        let bytes = std::fs::read(&artifacts[0].path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!dir.path().join("pdfs").join("c.pdf").exists());
    }
}
