//! Command records and the process launcher.
//!
//! Every host mutation is a [`Command`]: an argv plus a priority bucket and
//! the identity of the section that produced it. Reconciliation collects
//! commands from all affected sections, stable-sorts them by priority, and
//! executes them in order; reverts carry negated priorities so teardown runs
//! in reverse dependency order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::section::SectionKey;
use crate::{Error, Result};

/// Priority buckets, low to high: creation precedes configuration precedes
/// linking precedes daemon start.
pub mod priority {
    pub const CREATE_IFACE: i32 = 20;
    pub const CONFIG_IFACE: i32 = 40;
    pub const CREATE_QDISC: i32 = 50;
    pub const CREATE_VLAN: i32 = 60;
    pub const ADD_LINK: i32 = 80;
    pub const START_DAEMON: i32 = 100;
}

/// Commands that do not finish within this deadline are treated as failed.
const COMMAND_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub enum CommandKind {
    /// Spawn a process and wait for it; non-zero exit is an error.
    Exec { argv: Vec<String> },
    /// Signal the process whose PID was recorded in a file. A missing file
    /// degrades to a warning, not an error.
    Kill {
        pid_file: PathBuf,
        pid: Option<i32>,
    },
}

#[derive(Debug, Clone)]
pub struct Command {
    pub priority: i32,
    pub section: SectionKey,
    pub kind: CommandKind,
}

impl Command {
    pub fn exec<I, S>(priority: i32, section: &SectionKey, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            priority,
            section: section.clone(),
            kind: CommandKind::Exec {
                argv: argv.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Reads the PID file now so the plan records the concrete PID it will
    /// signal.
    pub fn kill(priority: i32, section: &SectionKey, pid_file: impl Into<PathBuf>) -> Self {
        let pid_file = pid_file.into();
        let pid = read_pid(&pid_file);

        if pid.is_none() {
            tracing::warn!(pid_file = %pid_file.display(), "PID file not found; daemon may not be running");
        }

        Command {
            priority,
            section: section.clone(),
            kind: CommandKind::Kill { pid_file, pid },
        }
    }

    pub async fn run(&self) -> Result<()> {
        match &self.kind {
            CommandKind::Exec { argv } => self.run_exec(argv).await,
            CommandKind::Kill { pid_file, pid } => {
                let pid = pid.or_else(|| read_pid(pid_file));
                let Some(pid) = pid else {
                    tracing::warn!(pid_file = %pid_file.display(), "Nothing to kill; PID file missing");
                    return Ok(());
                };

                match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    Ok(()) => Ok(()),
                    Err(nix::errno::Errno::ESRCH) => {
                        tracing::warn!(pid, "Process already gone");
                        Ok(())
                    }
                    Err(errno) => Err(Error::Command {
                        command: self.to_string(),
                        reason: errno.to_string(),
                    }),
                }
            }
        }
    }

    async fn run_exec(&self, argv: &[String]) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::Command {
                command: String::new(),
                reason: "empty argv".to_owned(),
            });
        };

        tracing::debug!(command = %self, "Executing");

        let output = tokio::time::timeout(
            COMMAND_DEADLINE,
            tokio::process::Command::new(program).args(args).output(),
        )
        .await;

        let output = match output {
            Err(_elapsed) => {
                return Err(Error::Command {
                    command: self.to_string(),
                    reason: format!("did not finish within {COMMAND_DEADLINE:?}"),
                });
            }
            Ok(Err(e)) => {
                return Err(Error::Command {
                    command: self.to_string(),
                    reason: format!("failed to spawn: {e}"),
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(Error::Command {
                command: self.to_string(),
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Exec { argv } => f.write_str(&argv.join(" ")),
            CommandKind::Kill { pid: Some(pid), .. } => write!(f, "kill {pid}"),
            CommandKind::Kill { pid_file, pid: None } => {
                write!(f, "kill {}", pid_file.display())
            }
        }
    }
}

fn read_pid(pid_file: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_file)
        .ok()?
        .trim()
        .parse()
        .ok()
}
