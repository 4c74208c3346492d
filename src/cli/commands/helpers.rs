//! Shared helpers for CLI commands.

use std::time::Duration;

use anyhow::Context;

use super::SourceArgs;
use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::google::{DriveClient, SheetsClient};
use crate::sources::{normalize_folder_id, parse_link_list, SourceSpec};

pub fn drive_client(config: &Config) -> anyhow::Result<DriveClient> {
    Ok(DriveClient::new(
        &config.google.drive_endpoint,
        config.access_token()?,
        Duration::from_secs(config.google.timeout_secs),
    )?)
}

pub fn sheets_client(config: &Config) -> anyhow::Result<SheetsClient> {
    Ok(SheetsClient::new(
        &config.google.sheets_endpoint,
        config.access_token()?,
        Duration::from_secs(config.google.timeout_secs),
    )?)
}

pub fn gemini_client(config: &Config) -> anyhow::Result<GeminiClient> {
    Ok(GeminiClient::new(
        &config.gemini.endpoint,
        config.api_key()?,
        Duration::from_secs(config.gemini.timeout_secs),
    )?)
}

/// Pick the source: command-line flags first, then the config file.
pub fn source_spec(config: &Config, args: &SourceArgs) -> anyhow::Result<SourceSpec> {
    if let Some(folder) = &args.folder {
        return Ok(SourceSpec::Folder {
            folder_id: normalize_folder_id(folder),
        });
    }
    if let Some(path) = &args.links {
        return links_spec(&path.to_string_lossy(), config);
    }
    if let Some(sheet) = &args.sheet {
        let range = args
            .range
            .clone()
            .or_else(|| config.source.range.clone())
            .context("--range is required with --sheet")?;
        return Ok(SourceSpec::Sheet {
            spreadsheet_id: sheet.clone(),
            range,
        });
    }

    let source = &config.source;
    if let Some(folder) = &source.folder_id {
        return Ok(SourceSpec::Folder {
            folder_id: normalize_folder_id(folder),
        });
    }
    if let Some(file) = &source.links_file {
        return links_spec(file, config);
    }
    if let Some(sheet) = &source.spreadsheet_id {
        let range = source
            .range
            .clone()
            .context("source.range is required with source.spreadsheet_id")?;
        return Ok(SourceSpec::Sheet {
            spreadsheet_id: sheet.clone(),
            range,
        });
    }

    anyhow::bail!("No source given. Use --folder, --links or --sheet, or set one under [source] in the config.")
}

fn links_spec(file: &str, config: &Config) -> anyhow::Result<SourceSpec> {
    let path = config.resolve_path(file);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read link list {}", path.display()))?;
    Ok(SourceSpec::Links {
        links: parse_link_list(&contents),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        config.source.spreadsheet_id = Some("S".to_string());
        config.source.range = Some("A2:A".to_string());

        let args = SourceArgs {
            folder: Some("https://drive.google.com/drive/folders/F123?usp=sharing".to_string()),
            ..SourceArgs::default()
        };
        assert_eq!(
            source_spec(&config, &args).unwrap(),
            SourceSpec::Folder {
                folder_id: "F123".to_string()
            }
        );

        assert_eq!(
            source_spec(&config, &SourceArgs::default()).unwrap(),
            SourceSpec::Sheet {
                spreadsheet_id: "S".to_string(),
                range: "A2:A".to_string()
            }
        );
    }

    #[test]
    fn test_sheet_flag_borrows_config_range() {
        let mut config = Config::default();
        config.source.range = Some("B2:B".to_string());
        let args = SourceArgs {
            sheet: Some("S2".to_string()),
            ..SourceArgs::default()
        };
        assert_eq!(
            source_spec(&config, &args).unwrap(),
            SourceSpec::Sheet {
                spreadsheet_id: "S2".to_string(),
                range: "B2:B".to_string()
            }
        );

        config.source.range = None;
        assert!(source_spec(&config, &args).is_err());
    }

    #[test]
    fn test_links_file_resolves_against_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("links.txt"),
            "# roster\nhttps://drive.google.com/file/d/ABC/view\n\n",
        )
        .unwrap();
        let mut config = Config {
            source_path: Some(dir.path().join("drivelens.toml")),
            ..Config::default()
        };
        config.source.links_file = Some("links.txt".to_string());

        assert_eq!(
            source_spec(&config, &SourceArgs::default()).unwrap(),
            SourceSpec::Links {
                links: vec!["https://drive.google.com/file/d/ABC/view".to_string()]
            }
        );
    }

    #[test]
    fn test_no_source_is_an_error() {
        assert!(source_spec(&Config::default(), &SourceArgs::default()).is_err());
    }
}
