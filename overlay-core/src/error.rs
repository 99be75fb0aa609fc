//! The crate's `Result`-returning error boundaries.
//!
//! Per the error handling design, these are the *only* error types that
//! propagate to a caller. Everything else (memory access failures once
//! inside a per-frame tick, protocol desync, timeouts) is handled locally
//! by the owning component and turned into a logged no-op — see
//! [`crate::memory::MemoryBusExt`] for the "swallow and default" pattern
//! used at those call sites.

use crate::memory::Domain;
use thiserror::Error;

/// Raised while validating a deserialized [`crate::config::AddressMap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("address map is missing required field `{0}`")]
    MissingAddress(&'static str),

    #[error("pointer chain for `{0}` has no offsets")]
    EmptyPointerChain(&'static str),

    #[error("duplicate patch name `{0}`")]
    DuplicatePatchName(String),
}

/// Raised by [`crate::memory::MemoryBus`] implementations.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum MemoryError {
    #[error("address {addr:#010x} + {len} bytes is out of range for {domain:?}")]
    OutOfRange {
        domain: Domain,
        addr: u32,
        len: usize,
    },

    #[error("address {addr:#010x} is not mapped in {domain:?}")]
    Unmapped { domain: Domain, addr: u32 },
}

/// Raised by [`crate::warp`]'s trampoline placement.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum WarpError {
    #[error("no free scratch region found for the warp trampoline")]
    NoScratchRegion,

    #[error("trampoline verification failed at {addr:#010x}")]
    VerificationFailed { addr: u32 },
}
