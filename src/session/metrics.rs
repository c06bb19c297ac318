// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for negotiation and keep-alive activity.
#[derive(Debug, Default)]
pub struct SessionMetrics {
	negotiation_attempts: AtomicU64,
	negotiation_successes: AtomicU64,
	negotiation_failures: AtomicU64,
	tickles: AtomicU64,
	tickle_failures: AtomicU64,
}
impl SessionMetrics {
	/// Returns the total number of negotiation attempts.
	pub fn negotiation_attempts(&self) -> u64 {
		self.negotiation_attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of negotiations that produced a verified token.
	pub fn negotiation_successes(&self) -> u64 {
		self.negotiation_successes.load(Ordering::Relaxed)
	}

	/// Returns the number of failed negotiations.
	pub fn negotiation_failures(&self) -> u64 {
		self.negotiation_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of tickle calls issued.
	pub fn tickles(&self) -> u64 {
		self.tickles.load(Ordering::Relaxed)
	}

	/// Returns the number of failed tickle calls.
	pub fn tickle_failures(&self) -> u64 {
		self.tickle_failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_negotiation_attempt(&self) {
		self.negotiation_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_negotiation_success(&self) {
		self.negotiation_successes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_negotiation_failure(&self) {
		self.negotiation_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_tickle(&self) {
		self.tickles.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_tickle_failure(&self) {
		self.tickle_failures.fetch_add(1, Ordering::Relaxed);
	}
}
