// SPDX-License-Identifier: GPL-3.0-only

//! External control: named-pipe commands, signals and persisted settings

pub mod command;
pub mod fifo;
pub mod settings;
pub mod signals;

pub use command::{FifoCommand, parse};
pub use fifo::{CommandSource, FifoChannel, ScriptedSource};
pub use settings::{PersistedSettings, Setting};
pub use signals::{KeyEvent, KeySource};
