//! Communication between the capture and control threads
//!
//! Frames travel through a single overwrite-on-publish [`LatestSlot`]: the
//! control thread only ever wants the newest frame, never a backlog.
//! Telemetry uses a bounded crossbeam channel owned by the balancer.

mod latest;

pub use latest::{LatestSlot, Stamped};
