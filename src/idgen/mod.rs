//! Distributed ID generation subsystem.
//!
//! # Layout
//! ```text
//!  63-bit id, high to low:
//!  | elapsed time units (bits_time) | sequence (bits_sequence) | machine (bits_machine_id) |
//! ```
//!
//! # Design Decisions
//! - One mutex serialises every `id()` call on a generator
//! - Exhausting a time unit's sequence space blocks the caller until the next unit
//! - The machine id is resolved once at construction and never changes
//! - `compose`/`decompose` allow deterministic reconstruction without waiting on real time

pub mod flake;
pub mod machine;
pub mod settings;

use thiserror::Error;

pub use flake::{Decomposed, Flake};
pub use settings::Settings;

/// Errors raised by construction and generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlakeError {
    #[error("bit length for time must be 32 or more")]
    InvalidBitsTime,

    #[error("invalid bit length for sequence number")]
    InvalidBitsSequence,

    #[error("invalid bit length for machine id")]
    InvalidBitsMachineId,

    #[error("invalid time unit")]
    InvalidTimeUnit,

    #[error("start time is ahead")]
    StartTimeAhead,

    #[error("no private ip address")]
    NoPrivateAddress,

    #[error("invalid machine id")]
    InvalidMachineId,

    #[error("invalid sequence number")]
    InvalidSequence,

    #[error("over the time limit")]
    OverTimeLimit,
}
