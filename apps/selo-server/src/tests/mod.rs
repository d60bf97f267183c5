//! Server integration tests.
//!
//! Organized by surface:
//! - `common` - shared harness (in-memory store, temp blob root, recording
//!   notifier, manual clock) and fixtures
//! - `documents` - upload, status transitions, audit trail, sweep
//! - `signing` - the signer state machine end to end
//! - `validate` - the public provenance check

pub mod common;

mod signing;
mod validate;
