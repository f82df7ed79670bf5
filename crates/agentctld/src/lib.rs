//! agentctld - AI agent workflow control plane daemon.
//!
//! Library components for the daemon process: provisioning, validation,
//! ingestion, state monitoring, streaming, driving sub-processes, the
//! workflow engine tying them together, and the HTTP edge in front of it.

pub mod driver;
pub mod engine;
pub mod git;
pub mod hub;
pub mod ingestor;
pub mod monitor;
pub mod server;
pub mod streamer;
pub mod validator;

use std::time::Duration;

/// Grace period for an in-flight run to notice cancellation and unwind
/// before the daemon force-terminates the HTTP server during shutdown.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Type alias for application-level errors with context and backtraces.
pub type AppResult<T> = eyre::Result<T>;
