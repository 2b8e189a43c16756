use anyhow::{Context, Result, bail};
use clap::Args;
use shellmig::Driver;

use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Reset",
    commands: &["shellmig --url \"$SHELLMIG_URL\" drop --yes   # Destroy every table in the target"],
}];

#[derive(Args, Debug)]
pub struct DropArgs {
    /// Confirm destroying every table (or key) in the target
    #[arg(long)]
    pub yes: bool,
}

pub async fn handle_drop(url: &str, args: DropArgs, output: &OutputManager) -> Result<()> {
    if !args.yes {
        output.warning("drop destroys every table in the target, including the version table");
        bail!("refusing to drop without --yes");
    }

    let mut driver = super::connect(url, output).await?;
    let outcome = match super::lock(&mut driver, output).await {
        Ok(()) => driver.drop_all().await.context("failed to drop target"),
        Err(err) => Err(err),
    };
    super::finish(driver, outcome, output).await?;

    output.success("dropped every table in the target");
    Ok(())
}
