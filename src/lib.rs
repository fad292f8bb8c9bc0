//! µRPC: a minimal listener lifecycle for a future RPC server.
//!
//! The crate opens a TCP listener bound to an `http://host:port/` prefix,
//! accepts connections on a background task, and answers every request with
//! `501 Not Implemented`. Method dispatch, argument marshaling, and a real
//! wire protocol land on top of this later; what exists today is the
//! start/stop lifecycle, the accept loop, and a log-event channel for
//! observability.

pub mod logging;
pub mod rpc;

pub use rpc::{LogChannel, LogEvent, LogSeverity, RpcServer, ServerError, ServerState};
