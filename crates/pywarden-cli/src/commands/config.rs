use anyhow::Result;

use crate::context::CliContext;

/// Prints the configuration after environment overrides were applied.
pub fn print_effective(ctx: &CliContext) -> Result<()> {
    println!("# {}", ctx.config_path.display());
    println!("{}", ctx.config.to_toml_string()?);
    Ok(())
}
