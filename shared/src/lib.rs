// lib.rs - VetEmergency client core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod emergency;
pub mod error;
pub mod event;
pub mod inbox;
pub mod model;
pub mod runtime;
pub mod session;
pub mod subscriber;
pub mod transcript;

pub use app::{App, AppState, ViewModel};
pub use capabilities::Capabilities;
pub use config::{ClientConfig, RealtimeConfig};
pub use context::ClientContext;
pub use error::{AppError, AppResult, ErrorKind, ErrorSeverity};
pub use event::{Event, RealtimeEvent};

/// Chat stays writable for 24 hours after the case is accepted.
pub const CHAT_WINDOW_SECS: i64 = 24 * 60 * 60;
pub const MAX_SEEN_NOTIFICATIONS: usize = 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const TOAST_DURATION_MS: u64 = 5000;
