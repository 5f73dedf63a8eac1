//! Thin wrapper around the wall clock, isolated to one module so every
//! other engine takes `now: i64` as a parameter instead of calling
//! `chrono::Utc::now()` directly -- keeps the two-phase expirer and the
//! allocation engine trivially testable with fixed timestamps.

use chrono::Utc;

pub fn now() -> i64 {
    Utc::now().timestamp()
}
