//! The fixed-cadence fetch service.
//!
//! Drives one cycle per cadence interval while the market is open:
//! fetch every universe symbol concurrently, aggregate, normalize,
//! publish. Per-symbol failures never abort a cycle; fatal credential
//! conditions terminate the loop loudly with the last good snapshot
//! left in place.

pub mod cycle;
pub mod service;
pub mod source;

pub use cycle::{fetch_cycle, FetchCycleResult};
pub use service::FetchService;
pub use source::ChainSource;
