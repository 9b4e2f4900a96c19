//! Bridge backed by the `adb` command-line utility.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::{Bridge, Companion};

/// Interval between exit checks while waiting on the companion process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs `adb` subcommands, optionally pinned to one device serial.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    executable: String,
    serial: Option<String>,
}

impl AdbBridge {
    pub fn new(executable: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            executable: executable.into(),
            serial,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.executable);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.executable, args.join(" "))
    }

    /// Run a subcommand to completion and map its exit status.
    fn run(&self, args: &[&str]) -> Result<(), BridgeError> {
        let command = self.describe(args);
        debug!(%command, "running bridge command");
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| BridgeError::Spawn {
                command: command.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BridgeError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Bridge for AdbBridge {
    fn reverse(&self, socket_name: &str, port: u16) -> Result<(), BridgeError> {
        let remote = format!("localabstract:{socket_name}");
        let local = format!("tcp:{port}");
        self.run(&["reverse", &remote, &local])
    }

    fn remove_reverse(&self, socket_name: &str) -> Result<(), BridgeError> {
        let remote = format!("localabstract:{socket_name}");
        self.run(&["reverse", "--remove", &remote])
    }

    fn forward(&self, port: u16, socket_name: &str) -> Result<(), BridgeError> {
        let local = format!("tcp:{port}");
        let remote = format!("localabstract:{socket_name}");
        self.run(&["forward", &local, &remote])
    }

    fn remove_forward(&self, port: u16) -> Result<(), BridgeError> {
        let local = format!("tcp:{port}");
        self.run(&["forward", "--remove", &local])
    }

    fn start_companion(&self, args: &[String]) -> Result<Box<dyn Companion>, BridgeError> {
        let mut full: Vec<&str> = vec!["shell"];
        full.extend(args.iter().map(String::as_str));
        let command = self.describe(&full);
        debug!(%command, "starting companion");
        let child = self
            .command(&full)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| BridgeError::Spawn { command, source })?;
        Ok(Box::new(ChildCompanion {
            child: Mutex::new(child),
        }))
    }
}

/// A companion reached through a local child process.
///
/// The child is polled rather than blocked on so that `kill` never waits
/// behind a concurrent `wait`.
struct ChildCompanion {
    child: Mutex<Child>,
}

impl ChildCompanion {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Child>, BridgeError> {
        self.child
            .lock()
            .map_err(|_| BridgeError::Companion("process handle poisoned".into()))
    }
}

impl Companion for ChildCompanion {
    fn is_running(&self) -> bool {
        match self.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }

    fn wait(&self) -> Result<(), BridgeError> {
        loop {
            {
                let mut child = self.lock()?;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(%status, "companion exited");
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(e) => return Err(BridgeError::Other(anyhow!(e))),
                }
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    fn kill(&self) -> Result<(), BridgeError> {
        let mut child = self.lock()?;
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        child.kill().map_err(|e| {
            warn!(error = %e, "could not kill companion");
            BridgeError::Other(anyhow!(e))
        })?;
        // reap
        let _ = child.wait();
        Ok(())
    }
}
