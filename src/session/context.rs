// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{_prelude::*, auth::LiveSessionToken};

/// Holder of the current live session token.
///
/// Readers snapshot the `Arc`, so a signature in flight always uses one token even if a
/// re-negotiation swaps it concurrently. Writers serialize on the negotiation guard, which
/// turns concurrent re-negotiation requests into a single exchange.
#[derive(Debug, Default)]
pub struct SessionContext {
	lst: RwLock<Option<Arc<LiveSessionToken>>>,
	generation: AtomicU64,
	negotiation_guard: AsyncMutex<()>,
}
impl SessionContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Snapshot of the current token, if any.
	pub fn current(&self) -> Option<Arc<LiveSessionToken>> {
		self.lst.read().clone()
	}

	/// Current token unless it expires within `margin` of `now`.
	pub fn usable(&self, margin: Duration, now: OffsetDateTime) -> Option<Arc<LiveSessionToken>> {
		self.current().filter(|lst| !lst.expires_within(margin, now))
	}

	/// Installs a freshly negotiated token and returns the shared handle.
	pub fn store(&self, lst: LiveSessionToken) -> Arc<LiveSessionToken> {
		let lst = Arc::new(lst);

		*self.lst.write() = Some(lst.clone());
		self.generation.fetch_add(1, Ordering::AcqRel);

		lst
	}

	/// Drops the current token.
	pub fn clear(&self) {
		*self.lst.write() = None;
		self.generation.fetch_add(1, Ordering::AcqRel);
	}

	/// Counter bumped on every store or clear.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	pub(crate) fn negotiation_guard(&self) -> &AsyncMutex<()> {
		&self.negotiation_guard
	}
}
