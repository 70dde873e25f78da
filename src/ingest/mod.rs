//! HTTP ingest front door (SPEC_FULL.md §2 C3, §4.1).

mod auth;
mod publish;
mod rate_limit;
mod server;

pub use rate_limit::{run_rate_limiter_eviction_loop, RateLimiter};
pub use server::{build_router, IngestState};
