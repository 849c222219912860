// ABOUTME: Local process fallback - an interactive shell on a PTY, used when container isolation is unavailable
//
// PTY reads and writes are blocking, so each shell gets a reader thread, a
// writer thread and a wait thread bridged to async code through channels.

pub mod pty;

pub use pty::PtyWrapper;

use crate::config::LocalShellConfig;
use anyhow::Result;
use bytes::Bytes;
use portable_pty::{ChildKiller, CommandBuilder};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Environment every local shell starts with, on top of the inherited one
const SHELL_ENV: &[(&str, &str)] = &[
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
];

/// Exit code reported when the wait on the child itself fails
pub const UNKNOWN_EXIT_CODE: i64 = -1;

/// Receiving side of a local shell
#[derive(Debug)]
pub struct LocalShellIo {
    /// Raw PTY output; closes when the PTY reports EOF
    pub output: mpsc::Receiver<Bytes>,
    /// Resolves with the exit code once the process is gone
    pub exit: oneshot::Receiver<i64>,
}

pub struct LocalShell {
    pty: PtyWrapper,
    input: mpsc::UnboundedSender<Bytes>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    workdir: PathBuf,
    pid: Option<u32>,
}

impl std::fmt::Debug for LocalShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalShell")
            .field("workdir", &self.workdir)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl LocalShell {
    /// Spawn the configured shell rooted at `workdir`
    pub fn spawn(config: &LocalShellConfig, workdir: &Path) -> Result<(Self, LocalShellIo)> {
        let program = config.shell_program();
        let mut cmd = CommandBuilder::new(&program);
        cmd.cwd(workdir);
        for (key, value) in SHELL_ENV {
            cmd.env(key, value);
        }

        let (pty, mut child) = PtyWrapper::spawn(cmd, config.cols, config.rows)?;
        let pid = child.process_id();
        let killer = child.clone_killer();

        let (output_tx, output_rx) = mpsc::channel::<Bytes>(64);
        let mut reader = pty.reader()?;
        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Bytes>();
        let mut writer = pty.writer()?;
        std::thread::spawn(move || {
            while let Some(data) = input_rx.blocking_recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        std::thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => i64::from(status.exit_code()),
                Err(e) => {
                    warn!("Failed to wait for local shell: {}", e);
                    UNKNOWN_EXIT_CODE
                }
            };
            let _ = exit_tx.send(code);
        });

        info!(shell = %program, workdir = %workdir.display(), ?pid, "Spawned local shell");

        Ok((
            Self {
                pty,
                input: input_tx,
                killer: StdMutex::new(killer),
                workdir: workdir.to_path_buf(),
                pid,
            },
            LocalShellIo {
                output: output_rx,
                exit: exit_rx,
            },
        ))
    }

    /// Queue raw bytes for the shell's input. Returns false once the
    /// writer is gone.
    pub fn write(&self, data: impl Into<Bytes>) -> bool {
        self.input.send(data.into()).is_ok()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.pty.resize(cols, rows)
    }

    /// Kill the process. Errors are logged; a process that already exited
    /// is not an error worth surfacing.
    pub fn kill(&self) {
        let mut killer = match self.killer.lock() {
            Ok(killer) => killer,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = killer.kill() {
            debug!(pid = ?self.pid, "Kill on local shell failed: {}", e);
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}
