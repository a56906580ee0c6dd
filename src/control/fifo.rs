// SPDX-License-Identifier: GPL-3.0-only

//! Named-pipe command channel
//!
//! The FIFO is polled without blocking. Bytes are accumulated until a newline
//! so a line split across two writes is still delivered whole.

use crate::constants::{FIFO_MAX_LINE, FIFO_READ_CHUNK};
use std::collections::VecDeque;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Anything that yields control lines
pub trait CommandSource {
    /// Next complete line, if one is available right now
    fn poll_line(&mut self) -> Option<String>;
}

/// Non-blocking reader over a named pipe
pub struct FifoChannel {
    path: PathBuf,
    file: Option<File>,
    pending: Vec<u8>,
    /// Dropping bytes up to the next newline after an overlong line
    discarding: bool,
    lines: VecDeque<String>,
    created: bool,
}

impl FifoChannel {
    /// Open `path`, creating the FIFO first if nothing exists there
    pub fn open(path: &Path) -> io::Result<Self> {
        let created = match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => false,
            Ok(_) => {
                warn!(path = %path.display(), "Control path exists but is not a FIFO; reading it anyway");
                false
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                make_fifo(path)?;
                info!(path = %path.display(), "Created control FIFO");
                true
            }
            Err(e) => return Err(e),
        };

        let mut channel = Self {
            path: path.to_path_buf(),
            file: None,
            pending: Vec::new(),
            discarding: false,
            lines: VecDeque::new(),
            created,
        };
        channel.reopen()?;
        Ok(channel)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        self.file = Some(file);
        Ok(())
    }

    /// True when the descriptor has data or a hangup pending
    fn readable(file: &File) -> bool {
        let mut pfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the duration of the call
        let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
        ready > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0
    }

    fn fill(&mut self) {
        let Some(file) = self.file.as_mut() else {
            if let Err(e) = self.reopen() {
                debug!(path = %self.path.display(), error = %e, "FIFO reopen failed");
            }
            return;
        };
        if !Self::readable(file) {
            return;
        }

        let mut buf = [0u8; FIFO_READ_CHUNK];
        match file.read(&mut buf) {
            // Writer hung up; reopen so the next poll does not spin on POLLHUP
            Ok(0) => {
                self.file = None;
                if let Err(e) = self.reopen() {
                    debug!(path = %self.path.display(), error = %e, "FIFO reopen failed");
                }
            }
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=pos).collect();
                    if std::mem::take(&mut self.discarding) {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    if !line.is_empty() {
                        self.lines.push_back(line);
                    }
                }
                if self.pending.len() > FIFO_MAX_LINE {
                    warn!(
                        path = %self.path.display(),
                        bytes = self.pending.len(),
                        "Control line too long, discarding it"
                    );
                    self.pending.clear();
                    self.discarding = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "FIFO read failed"),
        }
    }
}

impl CommandSource for FifoChannel {
    fn poll_line(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            self.fill();
        }
        self.lines.pop_front()
    }
}

impl Drop for FifoChannel {
    fn drop(&mut self) {
        self.file = None;
        if self.created
            && let Err(e) = std::fs::remove_file(&self.path)
        {
            debug!(path = %self.path.display(), error = %e, "Could not remove control FIFO");
        }
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // mkfifo honours the umask; writers are usually the web server user
    if let Err(e) = std::fs::set_permissions(
        path,
        std::os::unix::fs::PermissionsExt::from_mode(0o666),
    ) {
        debug!(path = %path.display(), error = %e, "Could not relax FIFO permissions");
    }
    Ok(())
}

/// Pre-loaded lines, used when no FIFO is configured and by tests
#[derive(Debug, Default)]
pub struct ScriptedSource {
    lines: VecDeque<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }
}

impl CommandSource for ScriptedSource {
    fn poll_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}
