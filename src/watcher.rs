//! Debounced, reference-counted filesystem watch sessions.
//!
//! One session per root-set signature owns the native `notify` handles for
//! the root, its language directories, and a bounded set of individual
//! resource files. Event bursts collapse into a single callback per
//! trailing-edge debounce window; structural events additionally trigger
//! re-subscription because the watched path set may have changed.

mod session;

pub use session::{
    ChangeBatch, ChangeCallback, WatchManager, WatchOptions, DEFAULT_DEBOUNCE_MS,
    ERROR_LOG_WINDOW_MS, WATCH_RESTART_DELAY_MS,
};
