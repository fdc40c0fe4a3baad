//! Install command - restore or install dependencies for a project

use crate::cache::{CacheManager, CacheSettings};
use crate::cli::args::InstallArgs;
use crate::cli::commands::project_dir;
use crate::config::{Config, EcosystemConfig};
use crate::error::{DepcacheError, DepcacheResult};
use crate::provision::{Ecosystem, ProvisionOutcome, Provisioner};
use crate::ui::{self, InstallProgress, TaskSpinner, UiContext};
use tracing::debug;

/// Execute the install command
pub async fn execute(args: InstallArgs, config: &Config) -> DepcacheResult<()> {
    let ctx = UiContext::detect();
    let project = project_dir(args.project)?;

    let configs = select_ecosystems(&config.ecosystems, &args.only)?;
    let ecosystems = Ecosystem::detect_all(&configs, &project).await;
    if ecosystems.is_empty() {
        ui::step_warn_hint(
            &ctx,
            &format!("No supported ecosystems detected in {}", project.display()),
            "Add [[ecosystems]] entries to the config to support more package managers",
        );
        return Ok(());
    }

    let mut settings = CacheSettings::from_config(&config.cache);
    if args.no_cache {
        debug!("Cache disabled by --no-cache");
        settings.enabled = false;
    }
    let upload_timeout = settings.timeout;
    let cache = CacheManager::from_settings(settings).await?;

    ui::intro(&ctx, "depcache install");
    match cache.backend_name() {
        Some(backend) => ui::step_info(
            &ctx,
            &format!(
                "Cache: {} ({}/{})",
                backend,
                cache.settings().bucket.as_deref().unwrap_or_default(),
                cache.settings().prefix
            ),
        ),
        None if args.no_cache || !config.cache.enabled => {
            ui::step_info(&ctx, "Cache: disabled for this run")
        }
        None => ui::step_warn_hint(
            &ctx,
            "Cache: not configured, installing from scratch",
            DepcacheError::CacheDisabled.hint().unwrap_or_default(),
        ),
    }

    let names: Vec<&str> = ecosystems.iter().map(Ecosystem::name).collect();
    let provisioner = Provisioner::new(cache);
    let progress = InstallProgress::new(&ctx, &names.join(", "));
    let results = provisioner
        .provision_all(&ecosystems, &|line| progress.on_line(line))
        .await;
    progress.finish();

    let mut first_error = None;
    for (name, result) in results {
        match result {
            Ok(outcome) => report_outcome(&ctx, &name, &outcome),
            Err(e) => {
                ui::step_error_detail(&ctx, &format!("{} failed", name), &e.to_string());
                first_error.get_or_insert(e);
            }
        }
    }

    let pending = provisioner.pending_uploads();
    if pending > 0 {
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start(&format!("Uploading {} cache archive(s)...", pending));
        if provisioner.wait_for_uploads(upload_timeout).await {
            spinner.stop("Cache uploads finished");
        } else {
            spinner.stop_warn("Cache uploads did not finish in time");
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            ui::outro_success(&ctx, "Dependencies ready");
            Ok(())
        }
    }
}

/// Restrict the configured ecosystems to `--only` names, preserving config order
fn select_ecosystems(
    configured: &[EcosystemConfig],
    only: &[String],
) -> DepcacheResult<Vec<EcosystemConfig>> {
    if let Some(unknown) = only
        .iter()
        .find(|name| !configured.iter().any(|c| &c.name == *name))
    {
        return Err(DepcacheError::EcosystemNotFound(unknown.clone()));
    }

    Ok(configured
        .iter()
        .filter(|c| only.is_empty() || only.contains(&c.name))
        .cloned()
        .collect())
}

fn report_outcome(ctx: &UiContext, name: &str, outcome: &ProvisionOutcome) {
    match outcome {
        ProvisionOutcome::Restored { key } => {
            ui::step_ok_detail(ctx, &format!("{} {}", name, outcome.describe()), &key.to_string())
        }
        ProvisionOutcome::Installed {
            save_dispatched: true,
        } => ui::step_ok_detail(ctx, &format!("{} {}", name, outcome.describe()), "caching"),
        _ => ui::step_ok(ctx, &format!("{} {}", name, outcome.describe())),
    }
}
