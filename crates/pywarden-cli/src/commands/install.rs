use std::path::PathBuf;

use anyhow::{Context, Result};

use pywarden_core::{ConsumerId, RecordStore};

use crate::context::CliContext;

pub struct InstallInputs {
    pub consumer: Option<String>,
    pub requirements: Option<PathBuf>,
    pub force: bool,
    pub venv: bool,
    pub packages: Vec<String>,
}

pub async fn execute(ctx: &CliContext, inputs: InstallInputs) -> Result<()> {
    let progress = ctx.progress();
    let Some(ref consumer) = inputs.consumer else {
        if inputs.packages.is_empty() {
            println!("Nothing to install.");
            return Ok(());
        }
        ctx.manager.install_shared(&inputs.packages, &progress).await?;
        println!("Installed {} package(s) into the shared environment.", inputs.packages.len());
        return Ok(());
    };

    let consumer: ConsumerId = consumer.parse()?;
    if inputs.venv {
        return install_tool_env(ctx, &consumer, &inputs).await;
    }
    let records_path = ctx.records_path();
    let mut store = RecordStore::load(&records_path)?;

    if let Some(manifest) = &inputs.requirements {
        if !manifest.is_file() {
            anyhow::bail!("requirements file {} does not exist", manifest.display());
        }
        if !inputs.force && !ctx.manager.needs_isolated_install(store.get(&consumer), manifest) {
            println!("{consumer}: requirements unchanged, skipping install.");
        } else {
            let record = ctx
                .manager
                .install_isolated_from_manifest(&consumer, manifest, &progress)
                .await
                .with_context(|| format!("install {} for {consumer}", manifest.display()))?;
            store.upsert(record);
            store.save(&records_path)?;
            println!("{consumer}: installed from {}.", manifest.display());
        }
    }

    if !inputs.packages.is_empty() || inputs.requirements.is_none() {
        let mut record = ctx
            .manager
            .install_isolated(&consumer, &inputs.packages, &progress)
            .await?;
        // Keep the manifest digest so unchanged manifests still skip next time.
        if let Some(previous) = store.get(&consumer) {
            if record.requirements_digest.is_none() {
                record.requirements_digest = previous.requirements_digest.clone();
            }
        }
        store.upsert(record);
        store.save(&records_path)?;
        println!("{consumer}: installed {} package(s).", inputs.packages.len());
    }
    Ok(())
}

/// Installs into the consumer's own virtual environment, whose metadata lives
/// next to it rather than in the records file.
async fn install_tool_env(
    ctx: &CliContext,
    consumer: &ConsumerId,
    inputs: &InstallInputs,
) -> Result<()> {
    let progress = ctx.progress();
    if let Some(manifest) = &inputs.requirements {
        if !inputs.force && !ctx.manager.needs_tool_env_setup(consumer, manifest) {
            println!("{consumer}: requirements unchanged, skipping install.");
        } else {
            if inputs.force {
                ctx.manager.remove_tool_env(consumer)?;
            }
            ctx.manager
                .install_tool_env_requirements(consumer, manifest, &progress)
                .await
                .with_context(|| format!("install {} for {consumer}", manifest.display()))?;
            println!("{consumer}: environment synced to {}.", manifest.display());
        }
    }
    if !inputs.packages.is_empty() || inputs.requirements.is_none() {
        ctx.manager
            .install_tool_env_packages(consumer, &inputs.packages, &progress)
            .await?;
        println!(
            "{consumer}: installed {} package(s) into its environment.",
            inputs.packages.len()
        );
    }
    Ok(())
}
