//! Error taxonomy for the engine crate.

use std::io;
use thiserror::Error;

use crate::driver::ResourceBound;

/// Top-level error returned by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A resource bound configured on the driver was exceeded while
    /// executing a method (§5).
    #[error("resource bound exceeded: {0}")]
    ResourceBoundExceeded(#[from] ResourceBound),

    /// A method threw an exception type with no matching handler and no
    /// enclosing caller to propagate to.
    #[error("unhandled virtual exception in {class}->{method}: {detail}")]
    UnhandledVirtualException {
        class: String,
        method: String,
        detail: String,
    },

    /// The class manager or DEX builder collaborator returned data the
    /// engine cannot make sense of.
    #[error("malformed instruction at offset {offset:#06x} (opcode {opcode:#04x}): {reason}")]
    MalformedInstruction {
        offset: u32,
        opcode: u8,
        reason: String,
    },

    /// A referenced class or method could not be resolved by the class
    /// manager.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
