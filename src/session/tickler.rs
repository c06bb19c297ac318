//! Background keep-alive task that tickles the brokerage session.

// crates.io
use tokio::{sync::watch, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	error::ErrorClass,
	obs::{self, OpKind, OpOutcome, OpSpan},
	session::Session,
};

/// Health of the signed session as observed by the tickler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionHealth {
	/// Last tickle succeeded.
	Healthy,
	/// Consecutive transient failures reached the configured threshold.
	Degraded,
	/// The provider rejected the credentials even after re-negotiation; the task stopped.
	AuthenticationLost,
}
impl SessionHealth {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			SessionHealth::Healthy => "healthy",
			SessionHealth::Degraded => "degraded",
			SessionHealth::AuthenticationLost => "authentication_lost",
		}
	}
}

/// Tickler tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicklerConfig {
	/// Delay between tickles.
	pub interval: StdDuration,
	/// Consecutive failures that flip health to [`SessionHealth::Degraded`].
	pub failure_threshold: u32,
}
impl TicklerConfig {
	/// Overrides the tickle interval.
	pub fn with_interval(mut self, interval: StdDuration) -> Self {
		self.interval = interval;

		self
	}

	/// Overrides the degradation threshold (clamped to at least one).
	pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
		self.failure_threshold = failure_threshold.max(1);

		self
	}
}
impl Default for TicklerConfig {
	fn default() -> Self {
		Self { interval: StdDuration::from_secs(60), failure_threshold: 3 }
	}
}

/// How [`SessionTickler::stop`] ended the task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
	/// The task observed cancellation and exited on its own.
	Graceful,
	/// The task did not exit within the timeout and was aborted.
	Aborted,
	/// No task was running.
	NotRunning,
}

/// Lifecycle of one running keep-alive task.
#[derive(Debug)]
pub struct TicklerHandle {
	interval: StdDuration,
	cancel: CancellationToken,
	join: JoinHandle<()>,
}
impl TicklerHandle {
	/// Delay between tickles.
	pub fn interval(&self) -> StdDuration {
		self.interval
	}

	/// Returns `true` until the task exits.
	pub fn is_running(&self) -> bool {
		!self.join.is_finished()
	}
}

/// Keeps the brokerage session warm by calling the tickle endpoint on a fixed interval.
///
/// Transient failures are logged and swallowed; only authentication loss ends the task. Health
/// transitions are published on a watch channel so supervisors can react without polling.
#[derive(Debug)]
pub struct SessionTickler {
	session: Session,
	config: TicklerConfig,
	handle: Mutex<Option<TicklerHandle>>,
	health: watch::Sender<SessionHealth>,
}
impl SessionTickler {
	/// Creates a stopped tickler for `session`.
	pub fn new(session: Session, config: TicklerConfig) -> Self {
		let (health, _) = watch::channel(SessionHealth::Healthy);

		Self { session, config, handle: Mutex::new(None), health }
	}

	/// Subscribes to health transitions.
	pub fn health(&self) -> watch::Receiver<SessionHealth> {
		self.health.subscribe()
	}

	/// Returns `true` while the background task is alive.
	pub fn is_running(&self) -> bool {
		self.handle.lock().as_ref().is_some_and(TicklerHandle::is_running)
	}

	/// Spawns the task on the current tokio runtime.
	///
	/// Idempotent while running: returns `false` and leaves the existing task alone.
	pub fn start(&self) -> bool {
		let mut slot = self.handle.lock();

		if slot.as_ref().is_some_and(TicklerHandle::is_running) {
			return false;
		}

		let cancel = CancellationToken::new();
		let task = TickleTask {
			session: self.session.clone(),
			config: self.config.clone(),
			cancel: cancel.clone(),
			health: self.health.clone(),
		};

		publish(&self.health, SessionHealth::Healthy);

		*slot = Some(TicklerHandle {
			interval: self.config.interval,
			cancel,
			join: tokio::spawn(task.run()),
		});

		true
	}

	/// Cancels the task and waits at most `timeout` for it to exit, aborting it otherwise.
	pub async fn stop(&self, timeout: StdDuration) -> StopOutcome {
		let Some(handle) = self.handle.lock().take() else {
			return StopOutcome::NotRunning;
		};

		handle.cancel.cancel();

		let mut join = handle.join;

		match tokio::time::timeout(timeout, &mut join).await {
			Ok(_) => StopOutcome::Graceful,
			Err(_) => {
				join.abort();

				StopOutcome::Aborted
			},
		}
	}
}
impl Drop for SessionTickler {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.get_mut().take() {
			handle.cancel.cancel();
			handle.join.abort();
		}
	}
}

struct TickleTask {
	session: Session,
	config: TicklerConfig,
	cancel: CancellationToken,
	health: watch::Sender<SessionHealth>,
}
impl TickleTask {
	async fn run(self) {
		let span = OpSpan::new(OpKind::Tickle, "tickler");

		span.instrument(self.run_inner()).await
	}

	async fn run_inner(self) {
		let mut consecutive_failures = 0_u32;

		loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return,
				_ = tokio::time::sleep(self.config.interval) => {},
			}

			let result = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return,
				result = self.session.tickle() => result,
			};

			match result {
				Ok(_) => {
					consecutive_failures = 0;

					publish(&self.health, SessionHealth::Healthy);
				},
				Err(e) if is_authentication_loss(&e) => {
					obs::record_op_outcome(OpKind::Tickle, OpOutcome::Failure);
					obs::log_tickle_failure(&e, consecutive_failures + 1);
					publish(&self.health, SessionHealth::AuthenticationLost);

					return;
				},
				Err(e) => {
					consecutive_failures = consecutive_failures.saturating_add(1);

					obs::record_op_outcome(OpKind::Tickle, OpOutcome::Retry);
					obs::log_tickle_failure(&e, consecutive_failures);

					if consecutive_failures >= self.config.failure_threshold {
						publish(&self.health, SessionHealth::Degraded);
					}
				},
			}
		}
	}
}

fn is_authentication_loss(error: &Error) -> bool {
	error.class() == ErrorClass::FixCredentials
}

fn publish(health: &watch::Sender<SessionHealth>, next: SessionHealth) {
	health.send_if_modified(|current| {
		if *current == next {
			return false;
		}

		obs::log_health_change(current.as_str(), next.as_str());

		*current = next;

		true
	});
}
