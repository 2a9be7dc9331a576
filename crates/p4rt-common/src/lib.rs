//! Shared building blocks for the P4Runtime datapath registry.
//!
//! - [`SyncMap`]: ordered map that never creates entries implicitly
//! - [`LogRateLimiter`]: token bucket that throttles repetitive log lines
//!
//! # Example
//!
//! ```
//! use p4rt_common::{LogRateLimiter, RateLimitConfig, SyncMap};
//!
//! let limiter = LogRateLimiter::new(RateLimitConfig::default());
//! assert!(limiter.check());
//!
//! let mut ports: SyncMap<u16, &str> = SyncMap::new();
//! assert!(ports.get(&1).is_none());
//! ports.try_insert(1, "eth0").unwrap();
//! assert_eq!(ports.find(|name| *name == "eth0"), Some((&1, &"eth0")));
//! ```

mod rate_limit;
mod sync_map;

pub use rate_limit::{LogRateLimiter, RateLimitConfig};
pub use sync_map::{SyncMap, SyncMapError};
