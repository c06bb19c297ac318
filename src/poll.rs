//! Polling loops for endpoints whose first response is often incomplete.
//!
//! Snapshot-style endpoints answer immediately with whatever fields they already have and fill
//! in the rest on later calls. [`SnapshotPoller`] repeats a request until a readiness predicate
//! passes, the attempt budget runs out, or the caller cancels. Exhaustion is a typed outcome
//! carrying the last payload, so "not yet available" is never confused with a transport failure.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	error::ErrorClass,
	obs::{self, OpKind, OpOutcome},
};

/// Delay schedule between poll attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
	/// Same delay after every attempt.
	Fixed(StdDuration),
	/// `initial * multiplier^(n-1)`, capped at `max`.
	Exponential {
		/// Delay after the first attempt.
		initial: StdDuration,
		/// Growth factor per attempt.
		multiplier: f64,
		/// Upper bound for a single delay.
		max: StdDuration,
	},
}
impl Backoff {
	/// Delay to wait after the 1-based `attempt` failed to produce a ready payload.
	pub fn delay(&self, attempt: u32) -> StdDuration {
		match self {
			Self::Fixed(delay) => *delay,
			Self::Exponential { initial, multiplier, max } => {
				let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
				let factor = if multiplier.is_finite() && *multiplier >= 1.0 {
					multiplier.powi(exponent)
				} else {
					1.0
				};
				let secs = initial.as_secs_f64() * factor;

				if !secs.is_finite() || secs >= max.as_secs_f64() {
					*max
				} else {
					StdDuration::from_secs_f64(secs)
				}
			},
		}
	}
}

/// Attempt budget and delay schedule for a polling loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Delay schedule between attempts.
	pub backoff: Backoff,
}
impl PollPolicy {
	/// Creates a policy (attempts clamped to at least one).
	pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
		Self { max_attempts: max_attempts.max(1), backoff }
	}

	/// Overrides the attempt budget (clamped to at least one).
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts.max(1);

		self
	}

	/// Overrides the delay schedule.
	pub fn with_backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;

		self
	}

	fn attempts(&self) -> u32 {
		self.max_attempts.max(1)
	}
}
impl Default for PollPolicy {
	fn default() -> Self {
		Self { max_attempts: 10, backoff: Backoff::Fixed(StdDuration::from_secs(1)) }
	}
}

/// Progress snapshot of a polling loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PollAttempt<T> {
	/// 1-based attempt number.
	pub attempt_number: u32,
	/// Time since the loop started.
	pub elapsed: StdDuration,
	/// Most recent payload that failed the readiness check.
	pub last_payload: Option<T>,
}

/// Why a polling loop ended without a ready payload.
#[derive(Debug, ThisError)]
pub enum PollError<T> {
	/// Every attempt ran without the payload becoming ready.
	#[error("Data not ready after {attempts} attempts ({elapsed:?}).")]
	Exhausted {
		/// Attempts made.
		attempts: u32,
		/// Total time spent.
		elapsed: StdDuration,
		/// Last payload seen, if any request succeeded.
		last_payload: Option<T>,
	},
	/// The caller cancelled the loop.
	#[error("Polling was cancelled.")]
	Cancelled,
	/// A non-retryable request failure ended the loop.
	#[error(transparent)]
	Request(#[from] Error),
}
impl<T> PollError<T> {
	/// Buckets the failure the same way [`Error::class`] does.
	pub fn class(&self) -> ErrorClass {
		match self {
			Self::Exhausted { .. } => ErrorClass::NotYetAvailable,
			Self::Cancelled => ErrorClass::Fatal,
			Self::Request(e) => e.class(),
		}
	}

	/// Last payload carried by [`PollError::Exhausted`].
	pub fn last_payload(&self) -> Option<&T> {
		match self {
			Self::Exhausted { last_payload, .. } => last_payload.as_ref(),
			_ => None,
		}
	}
}

/// Readiness of one item in a batched poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemStatus {
	/// The item passed the readiness check.
	Ready,
	/// The item never passed the readiness check.
	Pending,
	/// A non-retryable request failure ended the loop before the item was ready.
	Failed,
}

/// Per-item result of [`SnapshotPoller::poll_batch`].
#[derive(Debug)]
pub struct BatchOutcome<K, T> {
	/// Status of every requested id.
	pub statuses: BTreeMap<K, ItemStatus>,
	/// Payloads of ready items.
	pub ready: BTreeMap<K, T>,
	/// Last payload seen for items that never became ready.
	pub partial: BTreeMap<K, T>,
	/// Attempts made.
	pub attempts: u32,
	/// Total time spent.
	pub elapsed: StdDuration,
	/// `true` when the caller cancelled the loop.
	pub cancelled: bool,
	/// Failure that marked the remaining items [`ItemStatus::Failed`].
	pub error: Option<Error>,
}
impl<K, T> BatchOutcome<K, T>
where
	K: Ord,
{
	/// Returns `true` when every id is ready.
	pub fn is_complete(&self) -> bool {
		self.statuses.values().all(|status| *status == ItemStatus::Ready)
	}

	/// Status of a single id.
	pub fn status(&self, id: &K) -> Option<ItemStatus> {
		self.statuses.get(id).copied()
	}

	/// Ids that are not ready.
	pub fn pending_ids(&self) -> impl Iterator<Item = &K> {
		self.statuses.iter().filter(|(_, s)| **s != ItemStatus::Ready).map(|(k, _)| k)
	}
}

/// Repeats a request until its payload is ready.
#[derive(Clone, Debug, Default)]
pub struct SnapshotPoller {
	policy: PollPolicy,
}
impl SnapshotPoller {
	/// Creates a poller with the given policy.
	pub fn new(policy: PollPolicy) -> Self {
		Self { policy }
	}

	/// Active policy.
	pub fn policy(&self) -> &PollPolicy {
		&self.policy
	}

	/// Calls `request` until `is_ready` accepts its payload.
	///
	/// Retryable request errors count as attempts; any other error ends the loop with
	/// [`PollError::Request`]. `cancel` is honored during requests and backoff sleeps.
	pub async fn poll<T, F, Fut, R>(
		&self,
		mut request: F,
		mut is_ready: R,
		cancel: &CancellationToken,
	) -> Result<T, PollError<T>>
	where
		F: FnMut(PollAttempt<&T>) -> Fut,
		Fut: Future<Output = Result<T>>,
		R: FnMut(&T) -> bool,
	{
		let started = Instant::now();
		let max_attempts = self.policy.attempts();
		let mut last_payload = None::<T>;

		for attempt in 1..=max_attempts {
			if cancel.is_cancelled() {
				return Err(PollError::Cancelled);
			}

			let progress = PollAttempt {
				attempt_number: attempt,
				elapsed: started.elapsed(),
				last_payload: last_payload.as_ref(),
			};
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(PollError::Cancelled),
				outcome = request(progress) => outcome,
			};

			match outcome {
				Ok(payload) if is_ready(&payload) => {
					obs::record_op_outcome(OpKind::Poll, OpOutcome::Success);

					return Ok(payload);
				},
				Ok(payload) => last_payload = Some(payload),
				Err(e) if e.is_retryable() => obs::record_op_outcome(OpKind::Poll, OpOutcome::Retry),
				Err(e) => {
					obs::record_op_outcome(OpKind::Poll, OpOutcome::Failure);

					return Err(PollError::Request(e));
				},
			}

			if attempt == max_attempts {
				break;
			}

			let delay = self.policy.backoff.delay(attempt);

			obs::log_retry(OpKind::Poll, attempt, delay, &"payload not ready");

			if !sleep_or_cancel(delay, cancel).await {
				return Err(PollError::Cancelled);
			}
		}

		obs::record_op_outcome(OpKind::Poll, OpOutcome::Failure);

		Err(PollError::Exhausted { attempts: max_attempts, elapsed: started.elapsed(), last_payload })
	}

	/// Polls several ids at once, re-requesting only the ids that are still pending.
	///
	/// `request` receives the pending ids and returns `(id, payload)` pairs; ids the caller did
	/// not ask for are ignored. The loop never fails as a whole: exhaustion leaves items
	/// [`ItemStatus::Pending`], a non-retryable error marks them [`ItemStatus::Failed`], and
	/// cancellation sets [`BatchOutcome::cancelled`].
	pub async fn poll_batch<K, T, F, Fut, R>(
		&self,
		ids: impl IntoIterator<Item = K>,
		mut request: F,
		mut is_ready: R,
		cancel: &CancellationToken,
	) -> BatchOutcome<K, T>
	where
		K: Clone + Ord,
		F: FnMut(Vec<K>) -> Fut,
		Fut: Future<Output = Result<Vec<(K, T)>>>,
		R: FnMut(&K, &T) -> bool,
	{
		let started = Instant::now();
		let max_attempts = self.policy.attempts();
		let mut outcome = BatchOutcome {
			statuses: ids.into_iter().map(|id| (id, ItemStatus::Pending)).collect(),
			ready: BTreeMap::new(),
			partial: BTreeMap::new(),
			attempts: 0,
			elapsed: StdDuration::ZERO,
			cancelled: false,
			error: None,
		};

		while outcome.attempts < max_attempts && !outcome.is_complete() {
			if cancel.is_cancelled() {
				outcome.cancelled = true;

				break;
			}

			let pending = outcome.pending_ids().cloned().collect::<Vec<_>>();

			outcome.attempts += 1;

			let response = tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					outcome.cancelled = true;

					break;
				},
				response = request(pending) => response,
			};

			match response {
				Ok(items) =>
					for (id, payload) in items {
						let Some(status) = outcome.statuses.get_mut(&id) else {
							continue;
						};

						if *status == ItemStatus::Ready {
							continue;
						}
						if is_ready(&id, &payload) {
							*status = ItemStatus::Ready;

							outcome.partial.remove(&id);
							outcome.ready.insert(id, payload);
						} else {
							outcome.partial.insert(id, payload);
						}
					},
				Err(e) if e.is_retryable() => obs::record_op_outcome(OpKind::Poll, OpOutcome::Retry),
				Err(e) => {
					for status in outcome.statuses.values_mut() {
						if *status == ItemStatus::Pending {
							*status = ItemStatus::Failed;
						}
					}

					outcome.error = Some(e);

					break;
				},
			}

			if outcome.is_complete() || outcome.attempts == max_attempts {
				break;
			}

			let delay = self.policy.backoff.delay(outcome.attempts);

			obs::log_retry(OpKind::Poll, outcome.attempts, delay, &"batch items pending");

			if !sleep_or_cancel(delay, cancel).await {
				outcome.cancelled = true;

				break;
			}
		}

		obs::record_op_outcome(
			OpKind::Poll,
			if outcome.is_complete() { OpOutcome::Success } else { OpOutcome::Failure },
		);

		outcome.elapsed = started.elapsed();

		outcome
	}
}

async fn sleep_or_cancel(delay: StdDuration, cancel: &CancellationToken) -> bool {
	tokio::select! {
		biased;
		_ = cancel.cancelled() => false,
		_ = tokio::time::sleep(delay) => true,
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;
	use crate::error::TransientError;

	fn fast(max_attempts: u32) -> SnapshotPoller {
		SnapshotPoller::new(PollPolicy::new(max_attempts, Backoff::Fixed(StdDuration::from_millis(1))))
	}

	#[test]
	fn exponential_backoff_caps() {
		let backoff = Backoff::Exponential {
			initial: StdDuration::from_millis(100),
			multiplier: 2.0,
			max: StdDuration::from_millis(350),
		};

		assert_eq!(backoff.delay(1), StdDuration::from_millis(100));
		assert_eq!(backoff.delay(2), StdDuration::from_millis(200));
		assert_eq!(backoff.delay(3), StdDuration::from_millis(350));
		assert_eq!(backoff.delay(40), StdDuration::from_millis(350));
	}

	#[tokio::test]
	async fn ready_on_attempt_n_plus_one() {
		let calls = AtomicU32::new(0);
		let payload = fast(5)
			.poll(
				|_| {
					let n = calls.fetch_add(1, Ordering::SeqCst) + 1;

					async move { Ok(n) }
				},
				|n| *n == 3,
				&CancellationToken::new(),
			)
			.await
			.expect("Third attempt should be ready.");

		assert_eq!(payload, 3);
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn budget_of_n_misses_payload_ready_on_attempt_n_plus_one() {
		let calls = AtomicU32::new(0);
		let err = fast(3)
			.poll(
				|_| {
					let n = calls.fetch_add(1, Ordering::SeqCst) + 1;

					async move { Ok(n) }
				},
				|n| *n == 4,
				&CancellationToken::new(),
			)
			.await
			.expect_err("Fourth attempt is outside a budget of three.");

		assert!(matches!(err, PollError::Exhausted { attempts: 3, last_payload: Some(3), .. }));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn exhaustion_keeps_last_payload() {
		let err = fast(3)
			.poll(|p| {
				let next = p.attempt_number * 10;

				async move { Ok(next) }
			}, |_| false, &CancellationToken::new())
			.await
			.expect_err("Never-ready payloads must exhaust.");

		assert_eq!(err.class(), ErrorClass::NotYetAvailable);
		assert!(matches!(err, PollError::Exhausted { attempts: 3, last_payload: Some(30), .. }));
	}

	#[tokio::test]
	async fn retryable_errors_count_as_attempts_and_fatal_errors_stop() {
		let calls = AtomicU32::new(0);
		let err = fast(4)
			.poll(
				|_| {
					calls.fetch_add(1, Ordering::SeqCst);

					async {
						Err::<u32, _>(
							TransientError::Timeout { after: StdDuration::from_millis(1) }.into(),
						)
					}
				},
				|_| true,
				&CancellationToken::new(),
			)
			.await
			.unwrap_err();

		assert!(matches!(err, PollError::Exhausted { attempts: 4, last_payload: None, .. }));
		assert_eq!(calls.load(Ordering::SeqCst), 4);

		let err = fast(4)
			.poll(
				|_| async { Err::<u32, _>(Error::Api { status: 400, message: "bad conid".into() }) },
				|_| true,
				&CancellationToken::new(),
			)
			.await
			.unwrap_err();

		assert!(matches!(err, PollError::Request(Error::Api { status: 400, .. })));
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_interrupts_backoff() {
		let cancel = CancellationToken::new();
		let poller =
			SnapshotPoller::new(PollPolicy::new(10, Backoff::Fixed(StdDuration::from_secs(3600))));
		let canceller = cancel.clone();

		tokio::spawn(async move {
			tokio::time::sleep(StdDuration::from_secs(5)).await;
			canceller.cancel();
		});

		let err = poller.poll(|_| async { Ok(0_u8) }, |_| false, &cancel).await.unwrap_err();

		assert!(matches!(err, PollError::Cancelled));
	}

	#[tokio::test]
	async fn batch_requests_only_pending_ids() {
		let seen = Mutex::new(Vec::new());
		let outcome = fast(5)
			.poll_batch(
				[1_u64, 2, 3],
				|pending| {
					let round = {
						let mut seen = seen.lock();

						seen.push(pending.clone());

						seen.len()
					};

					async move {
						Ok(pending
							.into_iter()
							.map(|id| (id, round as u64 >= id))
							.chain([(99, true)])
							.collect())
					}
				},
				|_, ready| *ready,
				&CancellationToken::new(),
			)
			.await;

		assert!(outcome.is_complete());
		assert_eq!(outcome.attempts, 3);
		assert_eq!(*seen.lock(), vec![vec![1, 2, 3], vec![2, 3], vec![3]]);
		assert!(!outcome.statuses.contains_key(&99));
	}

	#[tokio::test]
	async fn batch_exhaustion_and_failure_are_per_item() {
		let outcome = fast(2)
			.poll_batch(
				["a", "b"],
				|pending| async move { Ok(pending.into_iter().map(|id| (id, id == "a")).collect()) },
				|_, ready| *ready,
				&CancellationToken::new(),
			)
			.await;

		assert_eq!(outcome.status(&"a"), Some(ItemStatus::Ready));
		assert_eq!(outcome.status(&"b"), Some(ItemStatus::Pending));
		assert_eq!(outcome.partial.get("b"), Some(&false));
		assert_eq!(outcome.attempts, 2);

		let outcome = fast(2)
			.poll_batch(
				["a"],
				|_| async { Err::<Vec<(&str, bool)>, _>(Error::Authentication { reason: "401".into() }) },
				|_, _| true,
				&CancellationToken::new(),
			)
			.await;

		assert_eq!(outcome.status(&"a"), Some(ItemStatus::Failed));
		assert!(matches!(outcome.error, Some(Error::Authentication { .. })));
	}
}
