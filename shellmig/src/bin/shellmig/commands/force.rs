use anyhow::{Context, Result};
use clap::Args;
use shellmig::{Driver, NIL_VERSION};

use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Recovery",
    commands: &[
        "shellmig --url \"$SHELLMIG_URL\" force 12    # Mark version 12 as cleanly applied",
        "shellmig --url \"$SHELLMIG_URL\" force -1    # Forget every recorded version",
    ],
}];

#[derive(Args, Debug)]
pub struct ForceArgs {
    /// Version to record; -1 clears the record
    #[arg(allow_negative_numbers = true)]
    pub version: i64,
}

pub async fn handle_force(url: &str, args: ForceArgs, output: &OutputManager) -> Result<()> {
    let mut driver = super::connect(url, output).await?;
    let outcome = match super::lock(&mut driver, output).await {
        Ok(()) => driver
            .set_version(args.version, false)
            .await
            .with_context(|| format!("failed to record version {}", args.version)),
        Err(err) => Err(err),
    };
    super::finish(driver, outcome, output).await?;

    if args.version == NIL_VERSION {
        output.success("cleared the recorded version");
    } else {
        output.success(&format!("forced version {}", args.version));
    }
    Ok(())
}
