//! Tessera Core -- identifiers, fatal error type and the entity table.
//!
//! This crate holds the types shared by every other Tessera crate:
//!
//! - [`id`]: 128-bit [`HashId`](id::HashId) identifiers, the
//!   [`GroupId`](id::GroupId) `(owner, type)` pair that routes assets and
//!   components to the module owning them, and [`NamePair`](id::NamePair).
//! - [`world`]: [`WorldState`](world::WorldState), the registered entities.
//! - [`Crash`]: the fatal failure a module callback can return. A crash
//!   propagates straight up through the pipeline tick and is never retried.
//!
//! # Example
//!
//! ```
//! use tessera_core::prelude::*;
//!
//! fn checked(len: usize) -> CallbackResult {
//!     if len == 0 {
//!         return Err(Crash::new("empty payload"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(checked(4).is_ok());
//! let crash = checked(0).unwrap_err();
//! assert_eq!(crash.message(), "empty payload");
//! ```

#![deny(unsafe_code)]

pub mod id;
pub mod world;

use std::fmt;
use std::panic::Location;

// ---------------------------------------------------------------------------
// Crash
// ---------------------------------------------------------------------------

/// A fatal failure raised by a module callback or by the pipeline itself.
///
/// Records the source location of the code that raised it, so the crash
/// report points at the failing module rather than at the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at {file}:{line})")]
pub struct Crash {
    message: String,
    file: &'static str,
    line: u32,
}

impl Crash {
    /// Create a crash report at the caller's location.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            message: message.into(),
            file: location.file(),
            line: location.line(),
        }
    }

    /// Create a crash report from any displayable error, at the caller's
    /// location.
    #[track_caller]
    pub fn from_error(context: &str, error: impl fmt::Display) -> Self {
        Self::new(format!("{context}: {error}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

/// Result of every module callback: `Ok(())` or a fatal [`Crash`].
pub type CallbackResult = Result<(), Crash>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::id::{GroupId, HashId, NamePair};
    pub use crate::world::{Entity, EntityId, WorldError, WorldState};
    pub use crate::{CallbackResult, Crash};
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
