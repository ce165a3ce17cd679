//! Retry and substitution core for batch course registration
//!
//! Takes the per-CRN result codes returned by the course API and decides what
//! to send on the next attempt. Nothing here performs I/O; the dispatch loop
//! owns the network and the clock.
//!
//! Item lifecycle:
//! 1. CRN starts in the add or drop working list (from configuration)
//! 2. Success code → removed permanently
//! 3. Transient code → stays, resubmitted next attempt
//! 4. Capacity-full code with a declared backup → swapped for the backup
//! 5. Permanent or unknown code on an active backup → swapped back to its primary
//! 6. Permanent or unknown code otherwise → backup if one is left, else removed

pub mod classify;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod wire;
pub mod worklist;

pub use classify::{ResultClass, classify, describe};
pub use engine::RetryEngine;
pub use error::{Error, Result};
pub use ledger::SubstitutionLedger;
pub use wire::{CourseRequest, CourseResponse, ResultEntry, parse_response};
pub use worklist::{Role, WorkingList, WorkingLists};
