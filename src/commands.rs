//! CLI entry points.
//!
//! Each `run_*` function opens the registry, performs one operation, and
//! prints the result to stdout. The structured variants live on
//! [`SchemaRegistry`]; these only format.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::models::{SchemaKey, SchemaMetadata, SchemaVersion};
use crate::registry::{SchemaRegistry, UploadRequest, UploadedFile, DEFAULT_ORPHAN_MIN_AGE};

pub async fn run_upload(
    config: &Config,
    path: &Path,
    application: &str,
    service: Option<&str>,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let registry = SchemaRegistry::open(config).await?;
    let result = registry
        .upload(UploadRequest {
            application: application.to_string(),
            service: service.map(str::to_string),
            file: Some(UploadedFile { file_name, bytes }),
        })
        .await;
    registry.close().await;
    let outcome = result?;

    let key = SchemaKey::new(&outcome.application, outcome.service.as_deref());
    if outcome.is_new_version {
        println!("stored {} version {}", key, outcome.version);
    } else {
        println!("unchanged: {} stays at version {}", key, outcome.version);
    }
    print_metadata(&outcome.metadata);
    Ok(())
}

pub async fn run_latest(config: &Config, application: &str, service: Option<&str>) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.latest(&SchemaKey::new(application, service)).await;
    registry.close().await;
    print_version(&result?)
}

pub async fn run_show(
    config: &Config,
    application: &str,
    version: i64,
    service: Option<&str>,
) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry
        .version(&SchemaKey::new(application, service), version)
        .await;
    registry.close().await;
    print_version(&result?)
}

pub async fn run_versions(config: &Config, application: &str, service: Option<&str>) -> Result<()> {
    let key = SchemaKey::new(application, service);
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.versions(&key).await;
    registry.close().await;
    let listing = result?;

    if listing.versions.is_empty() {
        println!("No versions stored for {}.", key);
        return Ok(());
    }

    println!("{} ({} versions)", key, listing.total_versions);
    println!(
        "  {:>7}  {:<6} {:<6} {:<28} {:<20}  {}",
        "VERSION", "LATEST", "TYPE", "TITLE", "UPLOADED", "FILE"
    );
    println!("  {}", "-".repeat(96));
    for v in &listing.versions {
        println!(
            "  {:>7}  {:<6} {:<6} {:<28} {:<20}  {}",
            v.version,
            if v.is_latest { "*" } else { "" },
            v.schema_type.as_str(),
            truncate(&v.metadata.title, 28),
            v.uploaded_at,
            v.original_file_name
        );
    }
    Ok(())
}

pub async fn run_apps(config: &Config) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.applications().await;
    registry.close().await;
    let apps = result?;

    if apps.is_empty() {
        println!("No applications registered.");
    }
    for app in &apps {
        println!("{:<32} created {}", app.name, app.created_at);
    }
    Ok(())
}

pub async fn run_services(config: &Config, application: &str) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.services(application).await;
    registry.close().await;
    let listing = result?;

    if listing.services.is_empty() {
        println!("No services registered under {}.", application);
    }
    for svc in &listing.services {
        println!("{:<32} created {}", svc.name, svc.created_at);
    }
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.stats().await;
    registry.close().await;
    let stats = result?;

    println!("apivault — Registry Stats");
    println!("=========================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Applications:    {}", stats.database.applications);
    println!("  Services:        {}", stats.database.services);
    println!("  Schema versions: {}", stats.database.schema_versions);
    println!();
    println!("  Storage:         {}", config.storage.root.display());
    println!("  Applications:    {}", stats.file_system.total_applications);
    println!("  Services:        {}", stats.file_system.total_services);
    println!("  Artifacts:       {}", stats.file_system.total_schemas);
    if let Some(err) = &stats.file_system.error {
        println!("  Error:           {}", err);
    }
    Ok(())
}

pub async fn run_check(config: &Config, application: &str, service: Option<&str>) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry
        .check_latest(&SchemaKey::new(application, service))
        .await;
    registry.close().await;
    let report = result?;

    println!(
        "check {} version {} ({})",
        SchemaKey::new(&report.application, report.service.as_deref()),
        report.schema_version,
        report.file_name
    );
    for d in &report.summary.details {
        println!("  [{}] {} — {}", d.status, d.name, d.info);
    }
    println!(
        "  passed: {}  failed: {}",
        report.summary.passed, report.summary.failed
    );
    if report.summary.failed > 0 {
        anyhow::bail!("stored schema failed validation");
    }
    Ok(())
}

pub async fn run_reconcile(config: &Config, dry_run: bool) -> Result<()> {
    let registry = SchemaRegistry::open(config).await?;
    let result = registry.reconcile(dry_run, DEFAULT_ORPHAN_MIN_AGE).await;
    registry.close().await;
    let report = result?;

    let verb = if dry_run { "would remove" } else { "removed" };
    println!("reconcile{}", if dry_run { " (dry-run)" } else { "" });
    for p in &report.orphaned_artifacts {
        println!("  {} orphaned artifact: {}", verb, p);
    }
    for p in &report.stale_temp_files {
        println!("  {} temp file: {}", verb, p);
    }
    for p in &report.missing_artifacts {
        println!(
            "  {} missing artifact: {}",
            if dry_run { "would restore" } else { "restored" },
            p
        );
    }
    println!(
        "  orphaned: {}  temp: {}  missing: {}",
        report.orphaned_artifacts.len(),
        report.stale_temp_files.len(),
        report.missing_artifacts.len()
    );
    println!("ok");
    Ok(())
}

fn print_version(v: &SchemaVersion) -> Result<()> {
    println!("--- Schema ---");
    println!(
        "key:           {}",
        SchemaKey::new(&v.application, v.service.as_deref())
    );
    println!("version:       {}", v.version);
    println!("schema_type:   {}", v.schema_type.as_str());
    println!("file:          {}", v.original_file_name);
    println!("uploaded_at:   {}", v.uploaded_at);
    print_metadata(&v.metadata);
    println!();
    println!("--- Document ---");
    println!("{}", serde_json::to_string_pretty(&v.schema)?);
    Ok(())
}

fn print_metadata(m: &SchemaMetadata) {
    println!("  title:       {}", m.title);
    println!("  api version: {}", m.version);
    println!("  dialect:     {}", m.open_api_version);
    println!("  paths:       {}", m.paths_count);
    println!("  components:  {}", m.components_count);
    if !m.servers.is_empty() {
        println!("  servers:     {}", m.servers.join(", "));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
