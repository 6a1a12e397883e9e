//! `despatch-sscc`: SSCC identifiers for boxes and pallets.
//!
//! Identifiers are computed from an allocating-party id, a year prefix and a
//! per-class sequence counter. Counters live in a small durable state file
//! that is read, incremented and atomically replaced on every allocation.

pub mod allocator;
pub mod counter;
pub mod error;
pub mod identifier;

pub use allocator::{SsccAllocator, StoreAllocator};
pub use counter::{
    default_state_path, CounterState, CounterStore, FileLock, JsonFileBackend, MemoryBackend, MemoryLock,
    StateBackend,
    UnitClass,
};
pub use error::{AllocationError, StoreError, ValidationError};
pub use identifier::{check_digit, make_sscc, sequence_block, validate_arp_id, Sscc};
