// ABOUTME: PTY (Pseudo-Terminal) wrapper for local shell processes
//
// Thin layer over portable-pty: opens a PTY pair, spawns the command on the
// slave side and keeps the master for I/O and resizing.

use anyhow::Result;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex as StdMutex};

/// Wrapper around a PTY master whose child is a local shell
pub struct PtyWrapper {
    master: Arc<StdMutex<Box<dyn MasterPty + Send>>>,
}

impl PtyWrapper {
    /// Spawn `cmd` on a fresh PTY of the given size
    ///
    /// # Returns
    /// * The wrapper plus the spawned child, which the caller waits on
    pub fn spawn(cmd: CommandBuilder, cols: u16, rows: u16) -> Result<(Self, Box<dyn Child + Send + Sync>)> {
        let pty_system = portable_pty::native_pty_system();

        let pair = pty_system.openpty(Self::size(cols, rows))?;
        let child = pair.slave.spawn_command(cmd)?;

        // The master only reports EOF once every slave handle is closed
        drop(pair.slave);

        Ok((
            Self {
                master: Arc::new(StdMutex::new(pair.master)),
            },
            child,
        ))
    }

    /// Resize the PTY
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        master.resize(Self::size(cols, rows))?;
        Ok(())
    }

    /// Independent reader over the master's output
    pub fn reader(&self) -> Result<Box<dyn Read + Send>> {
        let master = self.master.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        master.try_clone_reader()
    }

    /// Writer into the child's input; can only be taken once
    pub fn writer(&self) -> Result<Box<dyn Write + Send>> {
        let master = self.master.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        master.take_writer()
    }

    fn size(cols: u16, rows: u16) -> PtySize {
        PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}
