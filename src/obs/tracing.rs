// self
use crate::{_prelude::*, obs::OpKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by session operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation kind + stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("oauth1a_session.op", op = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> OpSpanGuard {
		#[cfg(feature = "tracing")]
		{
			OpSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			OpSpanGuard {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// RAII guard returned by [`OpSpan::entered`].
pub struct OpSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for OpSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OpSpanGuard(..)")
	}
}

pub(crate) fn log_negotiated(consumer_key: &str, expires_at: OffsetDateTime) {
	#[cfg(feature = "tracing")]
	tracing::info!(consumer_key, %expires_at, "Live session token negotiated.");
	#[cfg(not(feature = "tracing"))]
	let _ = (consumer_key, expires_at);
}

pub(crate) fn log_tickle_failure(error: &Error, consecutive_failures: u32) {
	#[cfg(feature = "tracing")]
	tracing::warn!(%error, consecutive_failures, "Tickle failed; keeping the task alive.");
	#[cfg(not(feature = "tracing"))]
	let _ = (error, consecutive_failures);
}

pub(crate) fn log_health_change(from: &'static str, to: &'static str) {
	#[cfg(feature = "tracing")]
	tracing::info!(from, to, "Session health changed.");
	#[cfg(not(feature = "tracing"))]
	let _ = (from, to);
}

pub(crate) fn log_retry(kind: OpKind, attempt: u32, delay: StdDuration, reason: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::debug!(
		op = kind.as_str(),
		attempt,
		delay_ms = delay.as_millis() as u64,
		%reason,
		"Retrying after backoff."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (kind, attempt, delay, reason);
}
