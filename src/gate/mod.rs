//! Pre-dispatch gates: access, rate limiting, content and command policy.
//!
//! The rule-based gates live in an immutable [`policy::PolicySnapshot`] that
//! [`hot_reload::PolicyReloader`] swaps when the config file changes. The
//! rate limiter keeps its counters across reloads.

pub mod access;
pub mod command_guard;
pub mod content_filter;
pub mod hot_reload;
pub mod policy;
pub mod rate_limiter;

pub use access::AccessPolicy;
pub use command_guard::{CommandDecision, CommandGuard};
pub use content_filter::{ContentFilter, ScanResult};
pub use hot_reload::{reload_policy, PolicyReloader};
pub use policy::{PolicySnapshot, PolicyStore};
pub use rate_limiter::{RateDecision, RateLimiter};
