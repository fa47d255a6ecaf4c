mod health;
pub mod issue_tracker;
pub mod requests;
pub mod sse;
pub mod uploads;

pub use health::*;
