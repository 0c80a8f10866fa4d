//! Submission Synchronization
//!
//! Timeline-counter bookkeeping for deferred reclamation of per-submission
//! resources. The semaphores themselves are created, waited on, and
//! destroyed by the device layer; this module owns only the batch tracking.

mod reclaim;

pub(crate) use reclaim::{CommandBufferBatch, ReclaimQueue};
