//! `docent base …`: document base management commands.

use anyhow::Result;

use docent_core::store::Store;

use crate::bases::{DocumentBase, DocumentBaseManager};
use crate::config::Config;

fn manager(config: &Config) -> DocumentBaseManager {
    DocumentBaseManager::new(&config.bases.root)
}

pub fn run_create(config: &Config, name: &str, description: &str) -> Result<()> {
    let base = manager(config).create(name, description)?;
    println!("created base '{}' at {}", base.name(), base.dir.display());
    println!("ok");
    Ok(())
}

pub fn run_list(config: &Config) -> Result<()> {
    let bases = manager(config).list()?;
    if bases.is_empty() {
        println!("No document bases.");
        return Ok(());
    }
    for base in &bases {
        println!("{}", summary_line(base));
    }
    Ok(())
}

fn summary_line(base: &DocumentBase) -> String {
    let mut line = format!(
        "{}  {} documents, {} chunks, updated {}",
        base.name(),
        base.meta.num_documents(),
        base.meta.num_chunks,
        base.meta.updated_at.format("%Y-%m-%d %H:%M")
    );
    if !base.meta.description.is_empty() {
        line.push_str(&format!("\n    {}", base.meta.description));
    }
    line
}

/// Print a base's metadata next to what its index actually holds.
pub async fn run_show(config: &Config, name: &str) -> Result<()> {
    let base = manager(config).load(name)?;
    let meta = &base.meta;
    println!("name: {}", meta.name);
    if !meta.description.is_empty() {
        println!("description: {}", meta.description);
    }
    println!("directory: {}", base.dir.display());
    println!("created: {}", meta.created_at.to_rfc3339());
    println!("updated: {}", meta.updated_at.to_rfc3339());
    println!("documents: {}", meta.num_documents());
    println!("chunks: {}", meta.num_chunks);

    if base.index_path().exists() {
        let store = base.open_store().await?;
        let indexed = store.count().await;
        let bound = store.bound_model().await;
        store.close().await;
        println!("indexed chunks: {}", indexed?);
        if let Some((model, dims)) = bound? {
            println!("embedding model: {} ({} dims)", model, dims);
        }
    }

    for doc in &meta.documents {
        println!(
            "  {}  {} chunks  added {}  {}",
            doc.source,
            doc.chunks,
            doc.added_at.format("%Y-%m-%d %H:%M"),
            &doc.document_id[..doc.document_id.len().min(12)]
        );
    }
    Ok(())
}

pub async fn run_clear(config: &Config, name: &str) -> Result<()> {
    let mut base = manager(config).load(name)?;
    let store = base.open_store().await?;
    let result = base.clear_documents(&store).await;
    store.close().await;
    result?;
    println!("cleared base '{}'", base.name());
    println!("ok");
    Ok(())
}

pub fn run_delete(config: &Config, name: &str) -> Result<()> {
    manager(config).delete(name)?;
    println!("deleted base '{}'", name);
    println!("ok");
    Ok(())
}

pub fn run_rename(config: &Config, old: &str, new: &str) -> Result<()> {
    manager(config).rename(old, new)?;
    println!("renamed base '{}' to '{}'", old, new);
    println!("ok");
    Ok(())
}

/// Report metadata/index inconsistencies; with `repair`, fix them.
pub async fn run_check(config: &Config, repair: bool) -> Result<()> {
    let manager = manager(config);
    let issues = manager.check().await?;
    for issue in &issues {
        println!("  {}", issue);
    }

    if issues.is_empty() {
        println!("all bases consistent");
    } else if repair {
        let fixed = manager.repair(&issues).await?;
        println!("repaired {} issue(s)", fixed);
    } else {
        anyhow::bail!(
            "{} issue(s) found; run `docent base check --repair` to rebuild metadata from the index",
            issues.len()
        );
    }
    println!("ok");
    Ok(())
}
