use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::{debug, warn};
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::ErrorKind;
use x11rb::x11_utils::X11Error;

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("can't open display: {0}")]
    Connect(#[from] ConnectError),

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X request failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    #[error("no {0} extension")]
    MissingExtension(&'static str),

    #[error("another composite manager is already running ({owner})")]
    AlreadyRunning { owner: String },

    #[error("another composite manager is already running (redirect refused)")]
    RedirectRefused,

    #[error("no render format for {0}")]
    MissingFormat(&'static str),

    #[error("window {0:#x} is gone")]
    WindowGone(u32),

    #[error("invalid configuration file {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;

impl CompositorError {
    /// Report a window destroyed before its reply arrived as `WindowGone`.
    pub fn from_window_reply(window: u32, error: ReplyError) -> Self {
        let gone = matches!(
            &error,
            ReplyError::X11Error(e) if matches!(e.error_kind, ErrorKind::Window | ErrorKind::Drawable)
        );
        if gone {
            Self::WindowGone(window)
        } else {
            Self::Reply(error)
        }
    }
}

/// Broad origin of an unexpected protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Core,
    Render,
    Damage,
    Other,
}

impl ErrorCategory {
    pub fn of(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::RenderGlyph
            | ErrorKind::RenderGlyphSet
            | ErrorKind::RenderPictFormat
            | ErrorKind::RenderPictOp
            | ErrorKind::RenderPicture => ErrorCategory::Render,
            ErrorKind::DamageBadDamage | ErrorKind::XfixesBadRegion => ErrorCategory::Damage,
            ErrorKind::Unknown(_) => ErrorCategory::Other,
            _ => ErrorCategory::Core,
        }
    }
}

/// Counts protocol errors nobody asked to ignore.
pub struct ErrorTracker {
    core_errors: AtomicU64,
    render_errors: AtomicU64,
    damage_errors: AtomicU64,
    other_errors: AtomicU64,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self {
            core_errors: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            damage_errors: AtomicU64::new(0),
            other_errors: AtomicU64::new(0),
        }
    }

    /// Log an unexpected protocol error by its symbolic name and count it.
    pub fn record(&self, error: &X11Error, serial: u64) {
        let counter = match ErrorCategory::of(error.error_kind) {
            ErrorCategory::Core => &self.core_errors,
            ErrorCategory::Render => &self.render_errors,
            ErrorCategory::Damage => &self.damage_errors,
            ErrorCategory::Other => &self.other_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        warn!(
            "error {:?} request {} ({}:{}) serial {}",
            error.error_kind,
            error.request_name.unwrap_or("unknown"),
            error.major_opcode,
            error.minor_opcode,
            serial
        );
    }

    pub fn health_check(&self) -> HealthStatus {
        let core = self.core_errors.load(Ordering::Relaxed);
        let render = self.render_errors.load(Ordering::Relaxed);
        let damage = self.damage_errors.load(Ordering::Relaxed);
        let other = self.other_errors.load(Ordering::Relaxed);

        HealthStatus {
            core_errors: core,
            render_errors: render,
            damage_errors: damage,
            other_errors: other,
            is_healthy: core < 10 && render < 5 && damage < 10 && other < 10,
        }
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub core_errors: u64,
    pub render_errors: u64,
    pub damage_errors: u64,
    pub other_errors: u64,
    pub is_healthy: bool,
}

/// Log and ignore errors from cleanup requests.
pub fn log_and_ignore<T, E: std::fmt::Display>(result: Result<T, E>, operation: &str) {
    if let Err(e) = result {
        debug!("Ignoring error in {}: {}", operation, e);
    }
}
