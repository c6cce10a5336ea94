#![forbid(unsafe_code)]

//! Shared types and pure algorithms for the spin orchestrator: ids, the
//! data model (project/ticket/run/proposal/formula/goal/trajectory),
//! scope & credential safety, title/file similarity, and the wave
//! conflict/partition scheduler. Nothing here touches the filesystem,
//! a database, or a subprocess — those seams live in `spin_storage`,
//! `spin_agent`, and `spin_engine`.

pub mod ids;
pub mod model;
pub mod scope;
pub mod similarity;
pub mod wave;

/// Epoch milliseconds, clamped the same way the teacher's `now_ms()` does
/// (`bm_runner::main::now_ms`) so a `SystemTime` error before the epoch
/// never panics a scheduler loop.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::from_secs(0))
        .as_millis()
        .min(i64::MAX as u128) as i64
}
