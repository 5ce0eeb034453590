//! Wire types for the capwatch worker protocol.
//!
//! This crate contains the serde-serializable types exchanged across the
//! worker process boundary: the usage snapshot produced by a successful
//! poll, the error record produced by a failed one, and the per-command
//! success payloads. These types represent the "protocol layer" - the
//! shapes of data as they appear on stdout/stderr.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and
//!   invariant-preserving constructors
//! * Stable: Changes only when the wire protocol changes
//!
//! The extraction and scheduling logic lives in `capwatch-core`; the
//! consumer-side subprocess driver lives in `capwatch-runtime`.

pub mod codec;
pub mod error_record;
pub mod record;
pub mod snapshot;

pub use codec::*;
pub use error_record::*;
pub use record::*;
pub use snapshot::*;
