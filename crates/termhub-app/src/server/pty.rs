use std::io::{Read, Write};

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};

use termhub_types::Geometry;

/// A shell running on a pseudo terminal
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    reader: Option<Box<dyn Read + Send>>,
}

impl PtyProcess {
    pub fn spawn(shell: &str, geometry: Geometry) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(geometry))
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        if let Ok(home) = std::env::var("HOME") {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {} in PTY", shell))?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair.master.take_writer().context("Failed to take PTY writer")?;

        Ok(Self {
            master: pair.master,
            child,
            writer,
            reader: Some(reader),
        })
    }

    /// The blocking output stream; can be taken once
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .context("Failed to write to PTY")?;
        self.writer.flush().context("Failed to flush PTY writer")
    }

    pub fn resize(&mut self, geometry: Geometry) -> Result<()> {
        self.master
            .resize(pty_size(geometry))
            .context("Failed to resize PTY")
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Exit code if the shell has already exited
    pub fn try_wait(&mut self) -> Option<u32> {
        self.child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.exit_code())
    }

    /// Ask the shell to hang up, then kill it if it is still around
    pub fn terminate(&mut self) -> Result<()> {
        if self.try_wait().is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        if let Some(pid) = self.child.process_id() {
            // SAFETY: plain signal delivery to our own child
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
            if self.try_wait().is_some() {
                return Ok(());
            }
        }
        self.child.kill().context("Failed to kill child process")
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            log::debug!("{:#}", e);
        }
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_shell_echoes_and_terminates() {
        let mut pty = PtyProcess::spawn("/bin/sh", Geometry::new(24, 80)).unwrap();
        let mut reader = pty.take_reader().unwrap();
        assert!(pty.take_reader().is_none());

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });

        pty.resize(Geometry::new(30, 100)).unwrap();
        pty.write(b"stty size\r").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut output = String::new();
        while Instant::now() < deadline && !output.contains("30 100") {
            if let Ok(chunk) = rx.recv_timeout(Duration::from_millis(100)) {
                output.push_str(&String::from_utf8_lossy(&chunk));
            }
        }
        assert!(output.contains("30 100"), "output was {:?}", output);

        pty.terminate().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pty.try_wait().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(pty.try_wait().is_some());
    }
}
