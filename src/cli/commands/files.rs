//! `files` commands: inspect and clean up files on the analysis service.

use console::style;

use super::helpers::gemini_client;
use crate::cli::icons::{dim_arrow, error, success};
use crate::config::Config;
use crate::models::RemoteFile;
use crate::upload::{RemoteRegistry, Uploader};

pub async fn cmd_files_list(config: &Config) -> anyhow::Result<()> {
    let service = gemini_client(config)?;
    let registry = RemoteRegistry::load(&service).await?;

    if registry.is_empty() {
        println!("No files uploaded.");
        return Ok(());
    }
    for file in registry.files() {
        println!(
            "{:<24} {} {}",
            file.name,
            file.display_name,
            style(file.state.as_deref().unwrap_or("")).dim()
        );
    }
    println!("{} {} files", dim_arrow(), registry.len());
    Ok(())
}

/// Find a file by remote name or display name.
fn find<'r>(registry: &'r RemoteRegistry, name: &str) -> Option<&'r RemoteFile> {
    registry
        .get(name)
        .or_else(|| registry.files().into_iter().find(|f| f.name == name))
}

pub async fn cmd_files_delete(config: &Config, name: &str) -> anyhow::Result<()> {
    let service = gemini_client(config)?;
    let registry = RemoteRegistry::load(&service).await?;

    let Some(file) = find(&registry, name).cloned() else {
        anyhow::bail!("No uploaded file named {}", name);
    };
    let mut uploader = Uploader::new(&service, registry, config.source.mime_type.clone());
    uploader.delete(&file).await?;
    println!("{} Deleted {} ({})", success(), file.display_name, file.name);
    Ok(())
}

pub async fn cmd_files_purge(config: &Config, yes: bool) -> anyhow::Result<()> {
    let service = gemini_client(config)?;
    let registry = RemoteRegistry::load(&service).await?;
    let files: Vec<RemoteFile> = registry.files().into_iter().cloned().collect();

    if files.is_empty() {
        println!("No files uploaded.");
        return Ok(());
    }
    if !yes {
        println!(
            "{} This deletes {} files. Re-run with --yes to confirm.",
            style("!").yellow(),
            files.len()
        );
        return Ok(());
    }

    let mut uploader = Uploader::new(&service, registry, config.source.mime_type.clone());
    let mut failed = 0;
    for file in &files {
        if let Err(e) = uploader.delete(file).await {
            println!("{} {}: {}", error(), file.name, e);
            failed += 1;
        }
    }
    println!(
        "{} Deleted {} of {} files",
        success(),
        files.len() - failed,
        files.len()
    );
    if failed > 0 {
        anyhow::bail!("{} files could not be deleted", failed);
    }
    Ok(())
}
