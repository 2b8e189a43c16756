//! Executable migration runner.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::{config::DriverConfig, errors::RunError};

/// Prefix of the private staging directory created per run.
const STAGING_PREFIX: &str = "migration_shell";
/// File name of the staged executable inside the staging directory.
const EXECUTABLE_NAME: &str = "migration";

/// Orders staging against launching across the process.
///
/// A child forked while another run still holds its staging file open for
/// writing inherits that descriptor until it execs, and the other run's
/// launch then fails with `ETXTBSY`. Staging holds the write side while its
/// file is open; launching holds the read side until the child has exec'd.
static LAUNCH_GATE: RwLock<()> = RwLock::new(());

/// Stages an opaque payload as an executable and runs it as a child process.
#[derive(Debug, Clone)]
pub struct ExecutableRunner {
    timeout: Option<Duration>,
    verbose: bool,
}

impl Default for ExecutableRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            verbose: true,
        }
    }
}

impl ExecutableRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new()
            .with_timeout(config.run_timeout)
            .with_verbose(config.verbose)
    }

    /// Bounds the child's wall-clock time. `None` or zero waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Connects child stdout/stderr to ours when enabled; discards them otherwise.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Reads the whole payload and runs it.
    pub async fn run<R>(&self, mut migration: R) -> Result<(), RunError>
    where
        R: AsyncRead + Unpin,
    {
        let mut payload = Vec::new();
        migration.read_to_end(&mut payload).await.map_err(RunError::Stage)?;
        self.run_bytes(&payload).await
    }

    pub async fn run_bytes(&self, payload: &[u8]) -> Result<(), RunError> {
        // Removed on drop, which covers early returns and panics.
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()
            .map_err(RunError::Stage)?;
        let executable = stage_executable(staging.path(), payload).map_err(RunError::Stage)?;
        debug!("staged {} byte migration at {}", payload.len(), executable.display());

        let result = self.execute(&executable).await;

        if let Err(err) = staging.close() {
            warn!("failed to remove migration staging directory: {err}");
        }
        result
    }

    async fn execute(&self, executable: &Path) -> Result<(), RunError> {
        let started = Instant::now();
        let mut child = self.spawn(executable).map_err(|source| RunError::Launch {
            path: executable.to_path_buf(),
            source,
        })?;

        let status = match self.timeout {
            None => child.wait().await.map_err(RunError::Wait)?,
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status.map_err(RunError::Wait)?,
                Err(_) => {
                    // kill() also reaps the child, so nothing is left behind.
                    child.kill().await.map_err(RunError::Wait)?;
                    warn!("migration killed after exceeding run timeout of {limit:?}");
                    return Err(RunError::Timeout { limit });
                }
            },
        };

        if !status.success() {
            return Err(RunError::Exit {
                code: status.code(),
                status,
            });
        }

        info!("migration finished in {}ms", started.elapsed().as_millis());
        Ok(())
    }

    /// Starts the child; returns once it has exec'd the staged file.
    fn spawn(&self, executable: &Path) -> std::io::Result<Child> {
        let _launching = LAUNCH_GATE.read().unwrap_or_else(PoisonError::into_inner);
        Command::new(executable)
            .stdin(Stdio::null())
            .stdout(self.output_stream())
            .stderr(self.output_stream())
            .kill_on_drop(true)
            .spawn()
    }

    fn output_stream(&self) -> Stdio {
        if self.verbose { Stdio::inherit() } else { Stdio::null() }
    }
}

/// Writes the payload with owner-only execute permission.
///
/// The handle is closed before returning; executing a file that is still open
/// for writing fails with `ETXTBSY`.
fn stage_executable(dir: &Path, payload: &[u8]) -> std::io::Result<PathBuf> {
    let path = dir.join(EXECUTABLE_NAME);
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o700);
    }

    let _staging = LAUNCH_GATE.write().unwrap_or_else(PoisonError::into_inner);
    let mut file = options.open(&path)?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    Ok(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;

    fn quiet_runner() -> ExecutableRunner {
        ExecutableRunner::new().with_verbose(false)
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let runner = ExecutableRunner::new().with_timeout(Some(Duration::ZERO));
        assert_eq!(runner.timeout(), None);
        assert!(runner.is_verbose());
    }

    #[test]
    fn from_config_copies_run_options() {
        let config = DriverConfig::default()
            .with_run_timeout(Some(Duration::from_secs(3)))
            .with_verbose(false);
        let runner = ExecutableRunner::from_config(&config);
        assert_eq!(runner.timeout(), Some(Duration::from_secs(3)));
        assert!(!runner.is_verbose());
    }

    #[test]
    fn staged_file_is_owner_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = stage_executable(dir.path(), b"#!/bin/sh\nexit 0\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o700, 0o700);
        assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\nexit 0\n");
    }

    #[tokio::test]
    #[serial]
    async fn successful_payload_returns_ok() {
        quiet_runner().run(&b"#!/bin/sh\nexit 0\n"[..]).await.expect("run succeeds");
    }

    #[tokio::test]
    #[serial]
    async fn non_zero_exit_is_reported_with_code() {
        let err = quiet_runner()
            .run_bytes(b"#!/bin/sh\nexit 7\n")
            .await
            .expect_err("exit 7 must fail");
        assert_eq!(err.exit_code(), Some(7));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    #[serial]
    async fn missing_executable_fails_to_launch() {
        let err = quiet_runner()
            .execute(Path::new("/nonexistent/shellmig/migration"))
            .await
            .expect_err("launch must fail");
        assert!(matches!(err, RunError::Launch { .. }), "unexpected error: {err:?}");
    }

    #[tokio::test]
    #[serial]
    async fn timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display());

        let err = quiet_runner()
            .with_timeout(Some(Duration::from_millis(500)))
            .run_bytes(script.as_bytes())
            .await
            .expect_err("sleeping payload must time out");
        assert!(err.is_timeout());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_entry = PathBuf::from(format!("/proc/{}", pid.trim()));
        if PathBuf::from("/proc/self").exists() {
            assert!(!proc_entry.exists(), "child {} still present", pid.trim());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_runs_never_see_busy_executables() {
        const CONCURRENT: usize = 16;
        const ROUNDS: usize = 20;

        for _ in 0..ROUNDS {
            let mut runs = tokio::task::JoinSet::new();
            for _ in 0..CONCURRENT {
                runs.spawn(async { quiet_runner().run_bytes(b"#!/bin/sh\nexit 0\n").await });
            }
            while let Some(joined) = runs.join_next().await {
                joined.expect("run task panicked").expect("concurrent run succeeds");
            }
        }
    }

    #[tokio::test]
    #[serial]
    async fn staging_directory_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("location");
        let script = format!("#!/bin/sh\ndirname \"$0\" > {}\n", marker.display());

        quiet_runner().run_bytes(script.as_bytes()).await.expect("run succeeds");

        let staged_dir = std::fs::read_to_string(&marker).unwrap();
        assert!(staged_dir.contains(STAGING_PREFIX));
        assert!(!PathBuf::from(staged_dir.trim()).exists());
    }
}
