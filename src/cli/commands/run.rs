//! `run` and `batch` commands.

use console::style;

use super::helpers::{drive_client, gemini_client, sheets_client, source_spec};
use super::SourceArgs;
use crate::cli::icons::{dim_arrow, error, success, warn};
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineOptions, RunSummary};
use crate::render::Renderer;
use crate::store::ResultStore;

/// Analyze documents one request at a time.
pub async fn cmd_run(config: &Config, source: &SourceArgs) -> anyhow::Result<()> {
    execute(config, source, false).await
}

/// Analyze documents as one batch job.
pub async fn cmd_batch(config: &Config, source: &SourceArgs) -> anyhow::Result<()> {
    execute(config, source, true).await
}

async fn execute(config: &Config, source: &SourceArgs, batch: bool) -> anyhow::Result<()> {
    let spec = source_spec(config, source)?;
    let storage = drive_client(config)?;
    let sheets = sheets_client(config)?;
    let service = gemini_client(config)?;
    let options = PipelineOptions::from_config(config)?;

    let pipeline = Pipeline::new(&storage, &service, options).with_sheets(&sheets);
    let mut store = ResultStore::create(config.results_path())?;

    println!(
        "{} Analyzing {} with {}",
        style("→").cyan(),
        spec.describe(),
        config.gemini.model
    );
    let summary = if batch {
        pipeline.run_batch(&spec, &mut store).await?
    } else {
        pipeline.run(&spec, &mut store).await?
    };
    print_summary(&summary, &store);

    if config.output.render {
        let renderer = Renderer::new(config.pdf_dir());
        let artifacts = renderer.render_all(store.records());
        println!(
            "{} Rendered {} PDFs to {}",
            success(),
            artifacts.len(),
            renderer.output_dir().display()
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, store: &ResultStore) {
    let icon = if summary.failed == 0 && summary.skipped == 0 {
        success()
    } else {
        warn()
    };
    println!(
        "{} {} ok, {} failed, {} skipped of {} documents",
        icon, summary.ok, summary.failed, summary.skipped, summary.resolved
    );
    println!(
        "  {} {} uploaded, {} already on the service",
        dim_arrow(),
        summary.uploaded,
        summary.reused
    );
    if store.is_saved() {
        println!("  {} Results: {}", dim_arrow(), store.path().display());
    } else {
        println!(
            "{} Could not write results to {}",
            error(),
            store.path().display()
        );
    }
}
