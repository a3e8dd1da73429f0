//! rps/src/state.rs
//! Global state management.

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::atomic::AtomicU64;
use tokio::task::JoinHandle;

// Global metrics counters
pub static TOTAL_CONN: AtomicU64 = AtomicU64::new(0);
pub static ACTIVE_CONN: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_BYTES_SENT: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_BYTES_RECV: AtomicU64 = AtomicU64::new(0);

pub static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    // Live session registry, keyed by session id. Entries remove themselves
    // when the session task finishes; the shutdown path aborts what is left.
    pub static ref SESSIONS: DashMap<u64, JoinHandle<()>> = DashMap::new();
}
