//! Transmit path.
//!
//! `queue` owns the ring; `map` turns a packet into device segments with
//! one coalesce retry; `offload` decides context descriptors.

pub mod map;
pub mod offload;
pub mod queue;

pub use offload::{parse_headers, plan_offload, HeaderLayout, L3Kind, OffloadPlan};
pub use queue::TxQueue;
