//! Exposure mathematics: aggregation of raw contracts into per-strike
//! GEX/VEX cells, statistical normalization into color classes, and the
//! atomically-swapped latest-snapshot store.

pub mod aggregate;
pub mod normalize;
pub mod snapshot;

pub use aggregate::{aggregate, AggregatedChain, CellKey, Exposure};
pub use normalize::{normalize, ColorClass, NormalizedCell, SignStats, BELOW_AVERAGE_Z, OUTLIER_Z};
pub use snapshot::{ExtremeMarkers, InstrumentSummary, Snapshot, SnapshotStore, StarLevels};
