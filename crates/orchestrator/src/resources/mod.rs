//! RAII guards for background work.
//!
//! - [`DriveGuard`] - Settles a request (or a format's sync) whose drive ended without finishing

mod drive_guard;

pub use drive_guard::DriveGuard;
