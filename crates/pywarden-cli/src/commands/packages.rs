use anyhow::Result;
use time::format_description::well_known::Rfc3339;

use progress::redact::redact_path;
use pywarden_core::{ConsumerId, RecordStore, ToolEnvironmentRecord};

use crate::context::CliContext;

pub async fn list(ctx: &CliContext, consumer: Option<String>, venv: bool) -> Result<()> {
    let packages = match consumer {
        Some(consumer) => {
            let consumer: ConsumerId = consumer.parse()?;
            if venv {
                ctx.manager.list_tool_env_packages(&consumer).await?
            } else {
                ctx.manager.list_isolated(&consumer)?
            }
        }
        None => ctx.manager.list_shared().await?,
    };
    for name in packages {
        println!("{name}");
    }
    Ok(())
}

pub fn consumers(ctx: &CliContext, venv: bool) -> Result<()> {
    if venv {
        return tool_envs(ctx);
    }
    let store = RecordStore::load(&ctx.records_path())?;
    let consumers = ctx.manager.list_consumers();
    if consumers.is_empty() {
        println!("No isolated consumers.");
        return Ok(());
    }
    for consumer in consumers {
        let dir = redact_path(&ctx.manager.layout().isolated_dir(&consumer));
        match store.get(&consumer) {
            Some(record) => {
                let updated = format_updated(record);
                println!(
                    "{consumer}\t{dir}\tpython {}\tupdated {updated}",
                    record.interpreter_version
                );
            }
            None => println!("{consumer}\t{dir}"),
        }
    }
    Ok(())
}

fn tool_envs(ctx: &CliContext) -> Result<()> {
    let consumers = ctx.manager.list_tool_envs();
    if consumers.is_empty() {
        println!("No consumer environments.");
        return Ok(());
    }
    for consumer in consumers {
        let dir = redact_path(&ctx.manager.layout().tool_env_dir(&consumer));
        match ctx.manager.tool_env_record(&consumer) {
            Some(record) => println!(
                "{consumer}\t{dir}\tpython {}\tupdated {}",
                record.interpreter_version,
                format_updated(&record)
            ),
            None => println!("{consumer}\t{dir}"),
        }
    }
    Ok(())
}

fn format_updated(record: &ToolEnvironmentRecord) -> String {
    record
        .updated_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn remove(ctx: &CliContext, consumer: &str) -> Result<()> {
    let consumer: ConsumerId = consumer.parse()?;
    let removed_dir = ctx.manager.remove_isolated(&consumer)?;
    let removed_env = ctx.manager.remove_tool_env(&consumer)?;
    let removed = removed_dir || removed_env;

    let records_path = ctx.records_path();
    let mut store = RecordStore::load(&records_path)?;
    if store.remove(&consumer).is_some() {
        store.save(&records_path)?;
    }

    if removed {
        println!("Removed isolated packages for {consumer}.");
    } else {
        println!("{consumer} has no isolated packages or environment.");
    }
    Ok(())
}
