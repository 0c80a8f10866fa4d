//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`GpuError`] covers all failure modes including:
//! - Instance and device initialization failures
//! - Allocation failures (memory exhaustion, unsupported memory classes)
//! - Address translation failures
//! - Synchronization timeouts
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for `std::result::Result<T, GpuError>`.
//!
//! ```rust,ignore
//! use vanta::errors::{GpuError, Result};
//!
//! fn upload() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```
//!
//! Errors are surfaced synchronously to the immediate caller; the crate
//! never retries internally and keeps no global error state.

use ash::vk;
use thiserror::Error;

use crate::types::MemoryClass;

/// The main error type for the GPU interface.
///
/// Each variant provides specific context about what went wrong.
#[derive(Error, Debug)]
pub enum GpuError {
    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// The Vulkan loader or instance could not be initialized.
    #[error("Failed to initialize Vulkan: {0}")]
    InitFailed(String),

    /// No physical device satisfies the required feature set
    /// (timeline semaphores, buffer device address, descriptor buffers).
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    // ========================================================================
    // Allocation Errors
    // ========================================================================
    /// The backend could not satisfy the allocation request.
    ///
    /// Recoverable: the caller may retry with a smaller size or a
    /// different memory class.
    #[error("Out of GPU memory (requested {requested} bytes)")]
    OutOfMemory {
        /// Size of the failed request in bytes
        requested: u64,
    },

    /// No native memory type satisfies the property combination the
    /// requested memory class maps to.
    #[error("No memory type supports memory class {0:?}")]
    UnsupportedMemoryClass(MemoryClass),

    // ========================================================================
    // Address Translation Errors
    // ========================================================================
    /// The pointer is not contained in any live allocation.
    ///
    /// Caller error; never retried internally.
    #[error("Pointer {0:#x} does not resolve to a live allocation")]
    UnresolvedPointer(u64),

    // ========================================================================
    // Synchronization Errors
    // ========================================================================
    /// The deadline elapsed before the GPU reached the target timeline value.
    ///
    /// The caller decides whether to retry waiting; tracked batches stay
    /// tracked. A wait on a value that was never submitted surfaces as
    /// this error, since the counter will never reach it.
    #[error("Timed out waiting for timeline value {value}")]
    Timeout {
        /// The timeline value that was not reached in time
        value: u64,
    },

    // ========================================================================
    // Handle Errors
    // ========================================================================
    /// A handle refers to a resource slot that has been destroyed.
    #[error("Stale {kind} handle")]
    StaleHandle {
        /// Resource category of the offending handle
        kind: &'static str,
    },

    /// A draw or dispatch was recorded with no pipeline bound.
    #[error("No pipeline bound to command buffer")]
    NoBoundPipeline,

    /// The supplied shader blob is not valid SPIR-V (wrong length or magic).
    #[error("Invalid shader IR: {0}")]
    InvalidShader(&'static str),

    // ========================================================================
    // Native API Errors
    // ========================================================================
    /// Any other failure reported by the native API.
    #[error("Vulkan call failed: {0}")]
    Native(#[from] vk::Result),
}

/// Alias for `Result<T, GpuError>`.
pub type Result<T> = std::result::Result<T, GpuError>;
