use super::read_descriptor;
use anyhow::Result;
use clap::Args;
use dockyard::domain::validate;
use std::path::PathBuf;

#[derive(Args)]
pub struct ValidateArgs {
    /// Application descriptor (JSON, or YAML by extension)
    pub file: PathBuf,
}

pub fn run(args: ValidateArgs) -> Result<()> {
    let config = read_descriptor(&args.file)?;
    validate(&config)?;

    println!(
        "✅ {} is valid: {} goal(s), main goal {}",
        args.file.display(),
        config.goals.len(),
        config.main_goal
    );
    Ok(())
}
