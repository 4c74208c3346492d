//! `render` command.

use std::path::Path;

use crate::cli::icons::{dim_arrow, error, success};
use crate::config::Config;
use crate::render::Renderer;
use crate::store::ResultStore;

pub fn cmd_render(config: &Config, input: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let input = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.results_path());
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.pdf_dir());

    let store = ResultStore::load(&input)?;
    let ok = store.records().iter().filter(|r| r.is_ok()).count();
    let renderer = Renderer::new(output);
    let artifacts = renderer.render_all(store.records());

    let icon = if artifacts.len() == ok { success() } else { error() };
    println!(
        "{} Rendered {} of {} successful analyses",
        icon,
        artifacts.len(),
        ok
    );
    println!("  {} {}", dim_arrow(), renderer.output_dir().display());
    Ok(())
}
