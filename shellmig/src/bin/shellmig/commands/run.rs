use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use shellmig::{AnyDriver, Driver};

use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Apply",
    commands: &[
        "shellmig --url \"$SHELLMIG_URL\" run migrations/0003_backfill.sh --version 3",
        "SHELLMIG_URL='shell://localhost/app?x-postgres-dsn=...&x-run-timeout=60000' shellmig run ./m4 --version 4",
    ],
}];

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Executable migration to run
    pub file: PathBuf,

    /// Version recorded once the migration succeeds
    #[arg(long)]
    pub version: i64,
}

pub async fn handle_run(url: &str, args: RunArgs, output: &OutputManager) -> Result<()> {
    if args.version < 0 {
        bail!("migration version must be non-negative, got {}", args.version);
    }
    let migration = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("failed to open migration {}", args.file.display()))?;

    let mut driver = super::connect(url, output).await?;
    let outcome = match super::lock(&mut driver, output).await {
        Ok(()) => apply(&mut driver, migration, &args, output).await,
        Err(err) => Err(err),
    };
    super::finish(driver, outcome, output).await?;

    output.success(&format!("applied version {}", args.version));
    Ok(())
}

/// Marks the version dirty, runs the migration and confirms it.
///
/// A failed run leaves the dirty record in place.
async fn apply(
    driver: &mut AnyDriver,
    migration: tokio::fs::File,
    args: &RunArgs,
    output: &OutputManager,
) -> Result<()> {
    let current = driver.version().await.context("failed to read current version")?;
    if current.dirty {
        bail!(
            "target is dirty at version {}; fix it manually and then run `shellmig force`",
            current.version
        );
    }

    driver
        .set_version(args.version, true)
        .await
        .context("failed to mark version dirty")?;
    output.info(&format!("running {} as version {}", args.file.display(), args.version));
    driver
        .run(migration)
        .await
        .with_context(|| format!("migration {} failed", args.file.display()))?;
    driver
        .set_version(args.version, false)
        .await
        .context("failed to confirm version")?;
    Ok(())
}
