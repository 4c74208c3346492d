//! Student name extraction from submission filenames.
//!
//! Submissions are exported with names like
//! `Response Form (Course 101) John_Smith_AB12.pdf`: a parenthetical prefix,
//! the student's name, then an ID code. This is a heuristic; filenames that
//! break the convention produce wrong names rather than errors.

use std::path::Path;

use thiserror::Error;

use crate::error::FailureKind;
use crate::models::StudentIdentity;

const SEPARATOR: char = '_';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameParseError {
    #[error("no closing parenthesis in filename: {0}")]
    MissingParenthesis(String),
    #[error("no name left after parsing filename: {0}")]
    Empty(String),
}

impl NameParseError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Malformed
    }
}

/// Derive a student's first and last name from a raw filename.
pub fn extract_identity(filename: &str) -> Result<StudentIdentity, NameParseError> {
    let stem = strip_extension(filename);
    let normalized = stem.replace(' ', &SEPARATOR.to_string());

    let close = normalized
        .rfind(')')
        .ok_or_else(|| NameParseError::MissingParenthesis(filename.to_string()))?;
    let remainder = &normalized[close + 1..];

    // Everything from the first ID-like token (letters and digits) onwards is dropped.
    let name_tokens: Vec<&str> = remainder
        .split(SEPARATOR)
        .take_while(|token| !is_id_code(token))
        .collect();
    let joined = name_tokens.join(&SEPARATOR.to_string());

    let trimmed = joined.trim_matches(SEPARATOR);
    let trimmed = trimmed.strip_prefix('-').unwrap_or(trimmed);

    let mut parts = trimmed
        .split(SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty());

    let first_name = parts
        .next()
        .ok_or_else(|| NameParseError::Empty(filename.to_string()))?
        .to_string();
    let last_name = parts.collect::<Vec<_>>().join(" ");

    Ok(StudentIdentity {
        first_name,
        last_name,
    })
}

/// Alphanumeric but not purely alphabetic, e.g. `AB12` or `2024`.
fn is_id_code(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(char::is_alphanumeric)
        && !token.chars().all(char::is_alphabetic)
}

pub(crate) fn strip_extension(filename: &str) -> &str {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        // Only strip short, extension-looking suffixes so "J. Smith" survives.
        Some(ext) if ext.len() <= 5 && ext.chars().all(char::is_alphanumeric) => {
            &filename[..filename.len() - ext.len() - 1]
        }
        _ => filename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(first: &str, last: &str) -> StudentIdentity {
        StudentIdentity {
            first_name: first.to_string(),
            last_name: last.to_string(),
        }
    }

    #[test]
    fn test_course_prefix_with_id_code() {
        assert_eq!(
            extract_identity("Response Form (Course 101) John_Smith_AB12.pdf").unwrap(),
            identity("John", "Smith")
        );
    }

    #[test]
    fn test_missing_parenthesis_fails() {
        assert_eq!(
            extract_identity("no_parens_here.pdf"),
            Err(NameParseError::MissingParenthesis(
                "no_parens_here.pdf".to_string()
            ))
        );
    }

    #[test]
    fn test_uses_last_parenthesis() {
        assert_eq!(
            extract_identity("Quiz (Unit 3) (Section B) Maria_Lopez_Garcia_X7Y.pdf").unwrap(),
            identity("Maria", "Lopez Garcia")
        );
    }

    #[test]
    fn test_dash_after_prefix() {
        assert_eq!(
            extract_identity("Essay (ENG 200) - Ada Lovelace 20231.pdf").unwrap(),
            identity("Ada", "Lovelace")
        );
    }

    #[test]
    fn test_no_id_code_keeps_all_tokens() {
        assert_eq!(
            extract_identity("Lab (CHEM) Grace Brewster Hopper.pdf").unwrap(),
            identity("Grace", "Brewster Hopper")
        );
    }

    #[test]
    fn test_single_name() {
        assert_eq!(
            extract_identity("Lab (CHEM) Plato_99.pdf").unwrap(),
            identity("Plato", "")
        );
    }

    #[test]
    fn test_nothing_after_parenthesis_fails() {
        assert!(matches!(
            extract_identity("Response Form (Course 101).pdf"),
            Err(NameParseError::Empty(_))
        ));
        assert!(matches!(
            extract_identity("Response Form (Course 101) AB12.pdf"),
            Err(NameParseError::Empty(_))
        ));
    }

    #[test]
    fn test_is_id_code() {
        assert!(is_id_code("AB12"));
        assert!(is_id_code("2024"));
        assert!(!is_id_code("Smith"));
        assert!(!is_id_code(""));
        assert!(!is_id_code("O'Neil"));
    }
}
