// self
use crate::_prelude::*;

/// Bounded exponential backoff for transient request failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	pub initial_backoff: StdDuration,
	/// Factor applied to the delay after every retry.
	pub multiplier: f64,
	/// Upper bound for a single delay.
	pub max_backoff: StdDuration,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub fn none() -> Self {
		Self { max_attempts: 1, ..Self::default() }
	}

	/// Overrides the attempt budget (clamped to at least one).
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts.max(1);

		self
	}

	/// Overrides the first delay.
	pub fn with_initial_backoff(mut self, initial_backoff: StdDuration) -> Self {
		self.initial_backoff = initial_backoff;

		self
	}

	/// Overrides the growth factor.
	pub fn with_multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_backoff(mut self, max_backoff: StdDuration) -> Self {
		self.max_backoff = max_backoff;

		self
	}

	/// Starts a fresh backoff sequence.
	pub fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			attempt: 0,
			max_attempts: self.max_attempts.max(1),
			current: self.initial_backoff,
			max: self.max_backoff,
			multiplier: if self.multiplier.is_finite() && self.multiplier >= 1.0 {
				self.multiplier
			} else {
				1.0
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			initial_backoff: StdDuration::from_millis(500),
			multiplier: 2.0,
			max_backoff: StdDuration::from_secs(10),
		}
	}
}

/// Iterator-like backoff calculator produced by [`RetryPolicy::backoff`].
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
	attempt: u32,
	max_attempts: u32,
	current: StdDuration,
	max: StdDuration,
	multiplier: f64,
}
impl ExponentialBackoff {
	/// Number of failed attempts recorded so far.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	/// Records a failed attempt and returns the delay before the next one, or `None` once the
	/// budget is spent. A server-provided `retry_after` hint replaces the computed delay but is
	/// still capped at the policy's maximum.
	pub fn next_backoff(&mut self, retry_after: Option<StdDuration>) -> Option<StdDuration> {
		self.attempt += 1;

		if self.attempt >= self.max_attempts {
			return None;
		}

		let computed = self.current.min(self.max);

		let next = self.current.as_secs_f64() * self.multiplier;

		self.current =
			if next >= self.max.as_secs_f64() { self.max } else { StdDuration::from_secs_f64(next) };

		Some(retry_after.unwrap_or(computed).min(self.max))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn backoff_grows_until_capped() {
		let policy = RetryPolicy::default()
			.with_max_attempts(5)
			.with_initial_backoff(StdDuration::from_millis(100))
			.with_max_backoff(StdDuration::from_millis(300));
		let mut backoff = policy.backoff();

		assert_eq!(backoff.next_backoff(None), Some(StdDuration::from_millis(100)));
		assert_eq!(backoff.next_backoff(None), Some(StdDuration::from_millis(200)));
		assert_eq!(backoff.next_backoff(None), Some(StdDuration::from_millis(300)));
		assert_eq!(backoff.next_backoff(None), Some(StdDuration::from_millis(300)));
		assert_eq!(backoff.next_backoff(None), None);
		assert_eq!(backoff.attempt(), 5);
	}

	#[test]
	fn retry_after_overrides_computed_delay() {
		let mut backoff = RetryPolicy::default().backoff();

		assert_eq!(
			backoff.next_backoff(Some(StdDuration::from_secs(7))),
			Some(StdDuration::from_secs(7))
		);
	}

	#[test]
	fn retry_after_is_capped_at_max_backoff() {
		let mut backoff = RetryPolicy::default().backoff();

		assert_eq!(
			backoff.next_backoff(Some(StdDuration::from_secs(86_400))),
			Some(StdDuration::from_secs(10))
		);
	}

	#[test]
	fn none_policy_never_retries() {
		assert_eq!(RetryPolicy::none().backoff().next_backoff(None), None);
		assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
	}
}
