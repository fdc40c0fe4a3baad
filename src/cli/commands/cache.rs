//! Cache command - inspect and manage cached dependency archives

use crate::cache::{CacheKey, CacheManager, CacheSettings, LockfileDigest, SaveOutcome};
use crate::cli::args::{CacheAction, CacheArgs, HashSource, OutputFormat};
use crate::cli::commands::project_dir;
use crate::config::Config;
use crate::error::{DepcacheError, DepcacheResult};
use crate::provision::Ecosystem;
use crate::ui::{self, format_bytes, TaskSpinner, UiContext};
use console::style;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> DepcacheResult<()> {
    match args.action {
        CacheAction::Hash { lockfile, full } => print_hash(&lockfile, full).await,
        CacheAction::Key { cache_type, source } => print_key(config, &cache_type, source).await,
        CacheAction::Status { project, format } => show_status(config, project, format).await,
        CacheAction::Restore {
            cache_type,
            lockfile,
            target,
        } => restore(config, &cache_type, &lockfile, &target).await,
        CacheAction::Save {
            cache_type,
            lockfile,
            source,
        } => save(config, &cache_type, &lockfile, &source).await,
        CacheAction::Prune {
            cache_type,
            days,
            yes,
        } => prune(config, &cache_type, days, yes).await,
    }
}

async fn manager(config: &Config) -> DepcacheResult<CacheManager> {
    CacheManager::from_settings(CacheSettings::from_config(&config.cache)).await
}

/// Like [`manager`], but refusing to continue without a store
async fn enabled_manager(config: &Config) -> DepcacheResult<CacheManager> {
    let cache = manager(config).await?;
    if !cache.is_enabled() {
        return Err(DepcacheError::CacheDisabled);
    }
    Ok(cache)
}

async fn print_hash(lockfile: &Path, full: bool) -> DepcacheResult<()> {
    let digest = LockfileDigest::compute(lockfile).await?;
    if full {
        println!("{}", digest.full());
    } else {
        println!("{}", digest.short());
    }
    Ok(())
}

async fn print_key(config: &Config, cache_type: &str, source: HashSource) -> DepcacheResult<()> {
    let settings = CacheSettings::from_config(&config.cache);
    let hash = match (source.hash, source.lockfile) {
        (Some(hash), _) => validate_hash(&hash)?,
        (None, Some(lockfile)) => LockfileDigest::compute(&lockfile).await?.short().to_string(),
        (None, None) => {
            return Err(DepcacheError::User(
                "Either --hash or --lockfile is required".to_string(),
            ))
        }
    };

    let key = CacheKey::derive(&settings, cache_type, &hash)?;
    println!("{}", key);
    Ok(())
}

fn validate_hash(hash: &str) -> DepcacheResult<String> {
    let hash = hash.trim().to_ascii_lowercase();
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DepcacheError::User(format!(
            "Invalid lockfile hash '{}': expected hex characters",
            hash
        )));
    }
    Ok(hash)
}

/// Cache state of one ecosystem in a project
#[derive(Debug, Serialize)]
struct EcosystemStatus {
    ecosystem: String,
    cache_type: String,
    lockfile: PathBuf,
    hash: Option<String>,
    installed: bool,
    key: Option<String>,
    cached: Option<bool>,
}

async fn show_status(
    config: &Config,
    project: Option<PathBuf>,
    format: OutputFormat,
) -> DepcacheResult<()> {
    let project = project_dir(project)?;
    let cache = manager(config).await?;
    let ecosystems = Ecosystem::detect_all(&config.ecosystems, &project).await;

    let mut statuses = Vec::with_capacity(ecosystems.len());
    for eco in &ecosystems {
        statuses.push(ecosystem_status(&cache, eco).await);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Plain => {
            for s in &statuses {
                println!(
                    "{}\t{}\t{}",
                    s.ecosystem,
                    s.hash.as_deref().unwrap_or("-"),
                    state_label(s)
                );
            }
        }
        OutputFormat::Table => print_status_table(&cache, &project, &statuses),
    }

    Ok(())
}

async fn ecosystem_status(cache: &CacheManager, eco: &Ecosystem) -> EcosystemStatus {
    let lockfile = eco.lockfile_path();
    let digest = LockfileDigest::compute(&lockfile).await.ok();
    let installed = match &digest {
        Some(d) => eco.marker().matches(d.full()).await,
        None => false,
    };

    let key = digest
        .as_ref()
        .and_then(|d| cache.key(eco.cache_type(), d.short()).ok());
    let cached = match (&key, cache.is_enabled()) {
        (Some(key), true) => match cache.exists(key).await {
            Ok(found) => Some(found),
            Err(e) => {
                debug!("Could not check {}: {}", key, e);
                None
            }
        },
        _ => None,
    };

    EcosystemStatus {
        ecosystem: eco.name().to_string(),
        cache_type: eco.cache_type().to_string(),
        lockfile,
        hash: digest.map(|d| d.short().to_string()),
        installed,
        key: key.map(|k| k.to_string()),
        cached,
    }
}

fn state_label(status: &EcosystemStatus) -> &'static str {
    match (status.installed, status.cached) {
        (true, _) => "installed",
        (false, Some(true)) => "cached",
        (false, Some(false)) => "miss",
        (false, None) if status.hash.is_none() => "no-lockfile",
        (false, None) => "not-installed",
    }
}

fn print_status_table(cache: &CacheManager, project: &Path, statuses: &[EcosystemStatus]) {
    println!("Project: {}", project.display());
    match cache.backend_name() {
        Some(backend) => println!("Cache:   {} ({})", backend, cache.settings().prefix),
        None => println!("Cache:   {}", style("disabled").yellow()),
    }
    println!();

    if statuses.is_empty() {
        println!("No supported ecosystems detected.");
        return;
    }

    println!(
        "{:<12} {:<18} {:<14} {:<8}",
        "ECOSYSTEM", "HASH", "STATE", "REMOTE"
    );
    println!("{}", "-".repeat(56));

    for s in statuses {
        let state = match state_label(s) {
            "installed" => style("installed").green().to_string(),
            "cached" => style("cached").cyan().to_string(),
            other => style(other).yellow().to_string(),
        };
        let remote = match s.cached {
            Some(true) => "hit",
            Some(false) => "miss",
            None => "-",
        };
        println!(
            "{:<12} {:<18} {:<14} {:<8}",
            s.ecosystem,
            s.hash.as_deref().unwrap_or("-"),
            state,
            remote
        );
    }
}

async fn restore(
    config: &Config,
    cache_type: &str,
    lockfile: &Path,
    target: &Path,
) -> DepcacheResult<()> {
    let ctx = UiContext::detect();
    let cache = enabled_manager(config).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Restoring {} cache...", cache_type));
    match cache.restore(cache_type, lockfile, target).await {
        Ok(hit) => {
            spinner.stop(&format!(
                "Restored {} entries ({}) into {}",
                hit.entries,
                format_bytes(hit.bytes),
                target.display()
            ));
            Ok(())
        }
        Err(e) => {
            spinner.stop_warn(&format!("Restore of {} failed", cache_type));
            Err(e)
        }
    }
}

async fn save(
    config: &Config,
    cache_type: &str,
    lockfile: &Path,
    source: &Path,
) -> DepcacheResult<()> {
    let ctx = UiContext::detect();
    let cache = enabled_manager(config).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Saving {} cache...", cache_type));
    match cache.save(cache_type, lockfile, source).await {
        Ok(SaveOutcome::Uploaded { key, bytes }) => {
            spinner.stop(&format!("Uploaded {} ({})", key, format_bytes(bytes)));
            Ok(())
        }
        Ok(SaveOutcome::AlreadyCached { key }) => {
            spinner.stop(&format!("Already cached: {}", key));
            Ok(())
        }
        Err(e) => {
            spinner.stop_warn(&format!("Save of {} failed", cache_type));
            Err(e)
        }
    }
}

async fn prune(
    config: &Config,
    cache_type: &str,
    days_override: Option<u32>,
    yes: bool,
) -> DepcacheResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let days = days_override.unwrap_or(config.cache.prune_days);
    let cache = enabled_manager(config).await?;

    let question = format!(
        "Delete {} archives older than {} days from {}?",
        cache_type,
        days,
        cache.settings().bucket.as_deref().unwrap_or_default()
    );
    if !ui::confirm(&ctx, &question, false).await? {
        ui::step_info(&ctx, "Prune cancelled");
        return Ok(());
    }

    let report = cache.prune(cache_type, days).await?;
    if report.deleted == 0 && report.failed == 0 {
        ui::step_ok(
            &ctx,
            &format!(
                "No {} archives older than {} days ({} examined)",
                cache_type, days, report.examined
            ),
        );
        return Ok(());
    }

    ui::step_ok_detail(
        &ctx,
        &format!("Deleted {} of {} archives", report.deleted, report.examined),
        &format!("{} freed", format_bytes(report.bytes_freed)),
    );
    if report.failed > 0 {
        ui::step_warn(
            &ctx,
            &format!("{} archives could not be deleted", report.failed),
        );
    }
    Ok(())
}
