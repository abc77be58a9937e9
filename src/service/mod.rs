//! Host/worker compositing service: message protocol, task correlation and lifecycle.

/// Public service object and its options.
pub mod host;
/// Correlation table and task handles.
pub mod pending;
/// Request and response messages.
pub mod protocol;
/// Worker and router threads.
pub mod worker;
