// SPDX-License-Identifier: GPL-3.0-only

//! Signal and keyboard input
//!
//! The OS handler only stores the signal number. The dispatcher drains it once
//! per iteration and turns it, together with any stdin line, into a [`KeyEvent`].

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info};

static PENDING: AtomicI32 = AtomicI32::new(0);

/// Signals routed into the dispatcher
pub const HANDLED_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGUSR1, libc::SIGUSR2, libc::SIGPIPE];

/// Only async-signal-safe work here
extern "C" fn record_signal(sig: libc::c_int) {
    PENDING.store(sig, Ordering::SeqCst);
}

/// Install the recording handler for [`HANDLED_SIGNALS`]
pub fn install() -> io::Result<()> {
    for sig in HANDLED_SIGNALS {
        // SAFETY: the action is fully initialised before use and the handler
        // only performs an atomic store
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(sig, &action, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    debug!("Signal handlers installed");
    Ok(())
}

/// The process-wide pending signal slot
pub struct PendingSignal;

impl PendingSignal {
    /// Value of the last received signal without clearing it
    pub fn peek() -> Option<libc::c_int> {
        match PENDING.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    /// Take and clear the last received signal
    pub fn take() -> Option<libc::c_int> {
        match PENDING.swap(0, Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEvent {
    #[default]
    None,
    /// `x`, SIGINT, SIGUSR2 or SIGPIPE
    Shutdown,
    /// Enter or SIGUSR1
    PauseToggle,
}

impl KeyEvent {
    fn from_key(key: char) -> Self {
        match key {
            'x' | 'X' => Self::Shutdown,
            '\n' => Self::PauseToggle,
            _ => Self::None,
        }
    }
}

/// Combines pending signals with optional stdin keypresses
pub struct KeySource {
    keypress: bool,
    signals: bool,
}

impl KeySource {
    pub fn new(keypress: bool, signals: bool) -> Self {
        Self { keypress, signals }
    }

    /// Non-blocking read of the current key or signal
    pub fn poll(&mut self) -> KeyEvent {
        // SIGINT always shuts down, whether or not signal control is enabled
        if PendingSignal::peek() == Some(libc::SIGINT) {
            PendingSignal::take();
            info!("SIGINT received");
            return KeyEvent::Shutdown;
        }

        let mut event = KeyEvent::None;
        if self.keypress
            && let Some(key) = read_stdin_key()
        {
            event = KeyEvent::from_key(key);
        }

        if self.signals {
            match PendingSignal::take() {
                Some(libc::SIGUSR1) => event = KeyEvent::PauseToggle,
                Some(sig @ (libc::SIGUSR2 | libc::SIGPIPE)) => {
                    info!(signal = sig, "Shutdown signal received");
                    event = KeyEvent::Shutdown;
                }
                _ => {}
            }
        }
        event
    }
}

/// First character of a pending stdin line, if one is ready
fn read_stdin_key() -> Option<char> {
    let mut pfd = libc::pollfd {
        fd: libc::STDIN_FILENO,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is valid for the duration of the call
    let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
    if ready <= 0 || pfd.revents & libc::POLLIN == 0 {
        return None;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => line.chars().next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(KeyEvent::from_key('x'), KeyEvent::Shutdown);
        assert_eq!(KeyEvent::from_key('X'), KeyEvent::Shutdown);
        assert_eq!(KeyEvent::from_key('\n'), KeyEvent::PauseToggle);
        assert_eq!(KeyEvent::from_key('q'), KeyEvent::None);
    }

    // One test touches the process-wide slot so parallel tests cannot race on it
    #[test]
    fn test_signal_source_mapping() {
        install().unwrap();
        let mut keys = KeySource::new(false, true);

        // SAFETY: raising a signal with an installed handler
        unsafe { libc::raise(libc::SIGUSR1) };
        assert_eq!(keys.poll(), KeyEvent::PauseToggle);
        assert_eq!(keys.poll(), KeyEvent::None);

        unsafe { libc::raise(libc::SIGUSR2) };
        assert_eq!(keys.poll(), KeyEvent::Shutdown);

        let mut quiet = KeySource::new(false, false);
        unsafe { libc::raise(libc::SIGPIPE) };
        assert_eq!(quiet.poll(), KeyEvent::None);
        assert_eq!(PendingSignal::take(), Some(libc::SIGPIPE));

        unsafe { libc::raise(libc::SIGINT) };
        assert_eq!(quiet.poll(), KeyEvent::Shutdown);
        assert_eq!(PendingSignal::peek(), None);
    }
}
