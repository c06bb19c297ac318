//! Optional observability helpers for session operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (on by default) to emit structured spans named `oauth1a_session.op` with
//!   the `op` and `stage` fields, plus `warn`/`debug` events for swallowed tickle failures and
//!   poll retries.
//! - Enable `metrics` to increment the `oauth1a_session_op_total` counter for every
//!   attempt/success/failure/retry, labeled by `op` + `outcome`.
//!
//! Secret material never reaches either sink; only masked identifiers and error messages do.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Session operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Live session token negotiation.
	Negotiate,
	/// Keep-alive call.
	Tickle,
	/// Snapshot polling loop.
	Poll,
	/// Brokerage session initialization.
	BrokerageInit,
	/// Session logout.
	Logout,
	/// Generic signed API call.
	Request,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Negotiate => "negotiate",
			OpKind::Tickle => "tickle",
			OpKind::Poll => "poll",
			OpKind::BrokerageInit => "brokerage_init",
			OpKind::Logout => "logout",
			OpKind::Request => "request",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// A retryable failure that will be attempted again.
	Retry,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Retry => "retry",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
