pub mod drop;
pub mod force;
pub mod run;
pub mod version;

use anyhow::{Context, Result};
use shellmig::{AnyDriver, Driver};

use crate::output::{ARROW, LOCKED, OutputManager, UNLOCKED};

/// Opens the driver named by `url`.
pub async fn connect(url: &str, output: &OutputManager) -> Result<AnyDriver> {
    output.progress("Connecting");
    let driver = shellmig::open(url).await;
    output.clear_line();

    let driver = driver.context("failed to open migration driver")?;
    let config = driver.config();
    output.step(
        ARROW,
        &format!(
            "{} target {}/{}",
            driver.kind().name(),
            config.database_name,
            config.schema_name
        ),
    );
    Ok(driver)
}

/// Takes the target lock, reporting the wait.
pub async fn lock(driver: &mut AnyDriver, output: &OutputManager) -> Result<()> {
    output.progress("Waiting for lock");
    let locked = driver.lock().await;
    output.clear_line();

    locked.context("failed to acquire migration lock")?;
    output.step(LOCKED, "lock acquired");
    Ok(())
}

/// Unlocks and closes `driver` whatever `outcome` was.
///
/// The outcome's own error wins over any unlock or close failure.
pub async fn finish<T>(mut driver: AnyDriver, outcome: Result<T>, output: &OutputManager) -> Result<T> {
    let was_locked = driver.is_locked();
    let unlocked = driver.unlock().await;
    if was_locked && unlocked.is_ok() {
        output.step(UNLOCKED, "lock released");
    }
    let closed = driver.close().await;

    let value = outcome?;
    unlocked.context("failed to release migration lock")?;
    closed.context("failed to close migration driver")?;
    Ok(value)
}
