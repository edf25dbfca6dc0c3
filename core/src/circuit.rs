//! Circuit breaker implementation using state machines
//!
//! The legal transitions live in one `state_machine!` declaration. Everything
//! a transition implies (timestamps, open wait, trial permits, events) is
//! applied by [`CircuitBreaker`] right after the machine accepts the event.
//!
//! Outcome recording serialises on a per-breaker mutex. Events produced while
//! the mutex is held are buffered and published once it is released, after
//! the new state is already visible through [`CircuitBreaker::state`].

use crate::{
    bus::EventBus,
    classifier::{Disposition, FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    config::CircuitBreakerConfig,
    errors::{CallNotPermitted, CircuitError, TransitionError},
    events::{CircuitBreakerEvent, EventKind},
    permits::TrialPermits,
    state::CircuitState,
    window::{Outcome, SlidingWindow, WindowSnapshot},
};
use parking_lot::{Mutex, MutexGuard};
use state_machines::state_machine;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Context provided to fallback closures when a call is not permitted
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Circuit name
    pub circuit_name: String,
    /// State that rejected the call
    pub state: CircuitState,
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext) -> Result<T, E> + Send>;

/// Options for circuit breaker calls
pub struct CallOptions<T, E> {
    /// Optional fallback function called when the call is not permitted
    pub fallback: Option<FallbackFn<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self { fallback: None }
    }
}

impl<T, E> CallOptions<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext) -> Result<T, E> + Send + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }
}

/// Type alias for callable function
pub type CallableFn<T, E> = Box<dyn FnOnce() -> Result<T, E>>;

/// Trait for converting into CallOptions - allows flexible call() API
pub trait IntoCallOptions<T, E> {
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>);
}

impl<T, E, F> IntoCallOptions<T, E> for F
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self), CallOptions::default())
    }
}

impl<T, E, F> IntoCallOptions<T, E> for (F, CallOptions<T, E>)
where
    F: FnOnce() -> Result<T, E> + 'static,
{
    fn into_call_options(self) -> (CallableFn<T, E>, CallOptions<T, E>) {
        (Box::new(self.0), self.1)
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: CircuitBreakerConfig,
    pub clock: Arc<dyn Clock>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: CircuitBreakerConfig::default(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
    /// Wait before a trial is allowed, backoff and jitter applied
    pub wait_secs: f64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub entered_at: f64,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
        Disabled,
        ForcedOpen,
        MetricsOnly,
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen, ForcedOpen, Disabled, MetricsOnly], to: Open }
        }
        attempt_reset {
            guards: [wait_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        begin_trial {
            transition: { from: [Open, ForcedOpen, Disabled, MetricsOnly], to: HalfOpen }
        }
        close {
            transition: { from: [HalfOpen, ForcedOpen, Disabled, MetricsOnly], to: Closed }
        }
        expire_trial {
            guards: [max_wait_elapsed],
            transition: { from: HalfOpen, to: Open }
        }
        force_open {
            transition: { from: [Closed, Open, HalfOpen, Disabled, MetricsOnly], to: ForcedOpen }
        }
        disable {
            transition: { from: [Closed, Open, HalfOpen, ForcedOpen, MetricsOnly], to: Disabled }
        }
        observe_only {
            transition: { from: [Closed, Open, HalfOpen, Disabled, ForcedOpen], to: MetricsOnly }
        }
    }
}

impl Circuit<Open> {
    /// Check if the open wait has elapsed for Open -> HalfOpen
    fn wait_elapsed(&self, ctx: &CircuitContext) -> bool {
        let data = self.state_data_open().expect("Open state must have data");
        ctx.clock.monotonic_time() - data.opened_at >= data.wait_secs
    }
}

impl Circuit<HalfOpen> {
    /// Check if the trial period ran out before all trial calls completed
    fn max_wait_elapsed(&self, ctx: &CircuitContext) -> bool {
        let max_wait = ctx.config.max_wait_duration_in_half_open_state;
        if max_wait.is_zero() {
            return false;
        }
        let data = self
            .state_data_half_open()
            .expect("HalfOpen state must have data");
        ctx.clock.monotonic_time() - data.entered_at >= max_wait.as_secs_f64()
    }
}

/// Point-in-time metrics of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Failure rate in percent over the active window
    pub failure_rate: f32,
    /// Slow call rate in percent over the active window
    pub slow_call_rate: f32,
    pub number_of_buffered_calls: usize,
    pub number_of_failed_calls: usize,
    pub number_of_slow_calls: usize,
    pub number_of_successful_calls: usize,
    pub number_of_not_permitted_calls: u64,
}

struct Inner {
    machine: DynamicCircuit,
    window: SlidingWindow,
    /// Outcomes of the current HalfOpen trial period
    trial: SlidingWindow,
    /// Opens since the circuit was last Closed
    consecutive_opens: u32,
    /// MetricsOnly: a rate crossing was already reported
    rate_reported: bool,
    half_open_timer: Option<tokio::task::JoinHandle<()>>,
}

impl Inner {
    fn current_state(&self) -> CircuitState {
        CircuitState::from_machine(self.machine.current_state())
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.half_open_timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    context: CircuitContext,
    classifier: Option<Arc<dyn FailureClassifier>>,
    bus: Arc<EventBus>,
    state: AtomicU8,
    permits: TrialPermits,
    /// Bumped on every entry into HalfOpen
    trial_epoch: AtomicU64,
    not_permitted: AtomicU64,
    inner: Mutex<Inner>,
    /// Held while this breaker's events are handed to the bus; taken after `inner`
    emit: Mutex<()>,
}

/// A granted permission and the trial period it was drawn from, if any
#[derive(Debug, Clone, Copy)]
struct Permit {
    trial_epoch: Option<u64>,
}

impl Permit {
    const UNLIMITED: Permit = Permit { trial_epoch: None };
}

/// Circuit breaker public API
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name())
            .field("state", &self.state())
            .field(
                "failure_classifier",
                &self
                    .shared
                    .classifier
                    .as_ref()
                    .map(|_| "<dyn FailureClassifier>"),
            )
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker publishing to `bus` (use builder() for more options)
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        bus: Arc<EventBus>,
    ) -> Self {
        let context = CircuitContext {
            name: name.into(),
            config,
            clock: Arc::new(MonotonicClock::new()),
        };
        Self::with_context(context, None, bus)
    }

    pub(crate) fn with_context(
        context: CircuitContext,
        classifier: Option<Arc<dyn FailureClassifier>>,
        bus: Arc<EventBus>,
    ) -> Self {
        let inner = Inner {
            machine: DynamicCircuit::new(context.clone()),
            window: SlidingWindow::from_config(&context.config),
            trial: SlidingWindow::count_based(
                context.config.permitted_number_of_calls_in_half_open_state,
            ),
            consecutive_opens: 0,
            rate_reported: false,
            half_open_timer: None,
        };

        debug!(circuit = %context.name, "Circuit breaker created");

        Self {
            shared: Arc::new(Shared {
                permits: TrialPermits::new(
                    context.config.permitted_number_of_calls_in_half_open_state,
                ),
                context,
                classifier,
                bus,
                state: AtomicU8::new(CircuitState::Closed.as_u8()),
                trial_epoch: AtomicU64::new(0),
                not_permitted: AtomicU64::new(0),
                inner: Mutex::new(inner),
                emit: Mutex::new(()),
            }),
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.context.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.context.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// Current state (lock-free)
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Check if circuit is open (including forced open)
    pub fn is_open(&self) -> bool {
        matches!(self.state(), CircuitState::Open | CircuitState::ForcedOpen)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    fn now(&self) -> f64 {
        self.shared.context.clock.monotonic_time()
    }

    fn elapsed_since(&self, start: f64) -> Duration {
        Duration::from_secs_f64((self.now() - start).max(0.0))
    }

    /// Ask for permission to execute a call
    ///
    /// Rejections are counted and published as NOT_PERMITTED. A permitted
    /// call must be followed by exactly one of [`on_success`](Self::on_success),
    /// [`on_error`](Self::on_error) or [`release_permission`](Self::release_permission).
    pub fn acquire_permission(&self) -> Result<(), CallNotPermitted> {
        self.acquire().map(|_| ())
    }

    fn acquire(&self) -> Result<Permit, CallNotPermitted> {
        let config = &self.shared.context.config;

        let result = match self.state() {
            state if state.permits_all_calls() => return Ok(Permit::UNLIMITED),
            CircuitState::ForcedOpen => Err(CircuitState::ForcedOpen),
            CircuitState::HalfOpen if config.max_wait_duration_in_half_open_state.is_zero() => {
                let trial_epoch = self.shared.trial_epoch.load(Ordering::Acquire);
                if self.shared.permits.try_acquire() {
                    return Ok(Permit {
                        trial_epoch: Some(trial_epoch),
                    });
                }
                Err(CircuitState::HalfOpen)
            }
            _ => self.acquire_locked(),
        };

        result.map_err(|state| self.reject(state))
    }

    fn acquire_locked(&self) -> Result<Permit, CircuitState> {
        let mut events = Vec::new();
        let mut inner = self.shared.inner.lock();

        if inner.current_state() == CircuitState::Open {
            self.fire(&mut inner, CircuitEvent::AttemptReset, &mut events);
        }
        if inner.current_state() == CircuitState::HalfOpen {
            self.fire(&mut inner, CircuitEvent::ExpireTrial, &mut events);
        }

        let result = match inner.current_state() {
            state if state.permits_all_calls() => Ok(Permit::UNLIMITED),
            CircuitState::HalfOpen if self.shared.permits.try_acquire() => Ok(Permit {
                trial_epoch: Some(self.shared.trial_epoch.load(Ordering::Acquire)),
            }),
            state => Err(state),
        };

        self.publish_after(inner, events);
        result
    }

    fn reject(&self, state: CircuitState) -> CallNotPermitted {
        self.shared.not_permitted.fetch_add(1, Ordering::Relaxed);
        self.publish(vec![CircuitBreakerEvent::new(
            self.name(),
            EventKind::NotPermitted,
        )]);
        CallNotPermitted {
            circuit: self.name().to_string(),
            state,
        }
    }

    /// Give back a permission that was acquired but not used
    ///
    /// Assumes the permission was granted in the current state.
    pub fn release_permission(&self) {
        if self.state() == CircuitState::HalfOpen {
            self.shared.permits.release();
        }
    }

    /// Give back `permit` if it is a trial permit of the current HalfOpen period
    fn release(&self, permit: Permit) {
        if let Some(epoch) = permit.trial_epoch
            && self.state() == CircuitState::HalfOpen
            && self.shared.trial_epoch.load(Ordering::Acquire) == epoch
        {
            self.shared.permits.release();
        }
    }

    /// Record a successful call
    pub fn on_success(&self, elapsed: Duration) {
        let events = vec![CircuitBreakerEvent::new(
            self.name(),
            EventKind::Success { elapsed },
        )];
        self.record(Outcome::classify(false, self.is_slow(elapsed)), events);
    }

    /// Record a failed call
    ///
    /// The failure classifier decides whether it counts toward the failure
    /// rate or is reported as ignored.
    pub fn on_error<E>(&self, elapsed: Duration, error: &E) -> Disposition
    where
        E: Display + 'static,
    {
        self.record_error(elapsed, error, None)
    }

    /// `permit` is the permission the call ran under, when known
    fn record_error<E>(&self, elapsed: Duration, error: &E, permit: Option<Permit>) -> Disposition
    where
        E: Display + 'static,
    {
        let disposition = match &self.shared.classifier {
            Some(classifier) => classifier.classify(&FailureContext {
                circuit_name: self.name(),
                error: error as &dyn Any,
                duration: elapsed,
            }),
            None => Disposition::Record,
        };

        let message = error.to_string();
        match disposition {
            Disposition::Ignore => {
                match permit {
                    Some(permit) => self.release(permit),
                    None => self.release_permission(),
                }
                self.publish(vec![CircuitBreakerEvent::new(
                    self.name(),
                    EventKind::IgnoredError { elapsed, message },
                )]);
            }
            Disposition::Record => {
                let events = vec![CircuitBreakerEvent::new(
                    self.name(),
                    EventKind::Error { elapsed, message },
                )];
                self.record(Outcome::classify(true, self.is_slow(elapsed)), events);
            }
        }

        disposition
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed >= self.shared.context.config.slow_call_duration_threshold
    }

    /// Apply an outcome and publish `events` followed by whatever it caused
    fn record(&self, outcome: Outcome, mut events: Vec<CircuitBreakerEvent>) {
        let config = &self.shared.context.config;
        let now = self.now();
        let mut inner = self.shared.inner.lock();

        match inner.current_state() {
            CircuitState::Closed => {
                let snapshot = inner.window.record(outcome, now);
                if let Some(exceeded) = self.exceeded(&snapshot, config.effective_minimum_calls()) {
                    events.push(CircuitBreakerEvent::new(self.name(), exceeded));
                    self.fire(&mut inner, CircuitEvent::Trip, &mut events);
                }
            }
            CircuitState::HalfOpen => {
                let snapshot = inner.trial.record(outcome, now);
                if snapshot.total_calls >= config.permitted_number_of_calls_in_half_open_state {
                    if let Some(exceeded) = self.exceeded(&snapshot, 1) {
                        events.push(CircuitBreakerEvent::new(self.name(), exceeded));
                        self.fire(&mut inner, CircuitEvent::Trip, &mut events);
                    } else {
                        self.fire(&mut inner, CircuitEvent::Close, &mut events);
                    }
                }
            }
            CircuitState::MetricsOnly => {
                let snapshot = inner.window.record(outcome, now);
                match self.exceeded(&snapshot, config.effective_minimum_calls()) {
                    Some(exceeded) if !inner.rate_reported => {
                        inner.rate_reported = true;
                        events.push(CircuitBreakerEvent::new(self.name(), exceeded));
                    }
                    Some(_) => {}
                    None => inner.rate_reported = false,
                }
            }
            CircuitState::Open | CircuitState::ForcedOpen | CircuitState::Disabled => {}
        }

        self.publish_after(inner, events);
    }

    /// Rate crossing for a snapshot, failure rate checked first
    fn exceeded(&self, snapshot: &WindowSnapshot, minimum_calls: usize) -> Option<EventKind> {
        let config = &self.shared.context.config;
        if snapshot.total_calls < minimum_calls {
            return None;
        }

        let failure_rate = snapshot.failure_rate();
        if failure_rate > config.failure_rate_threshold {
            return Some(EventKind::FailureRateExceeded { failure_rate });
        }
        let slow_call_rate = snapshot.slow_call_rate();
        if slow_call_rate > config.slow_call_rate_threshold {
            return Some(EventKind::SlowCallRateExceeded { slow_call_rate });
        }
        None
    }

    /// Feed an event to the machine and apply the entered state's bookkeeping
    fn fire(
        &self,
        inner: &mut Inner,
        event: CircuitEvent,
        events: &mut Vec<CircuitBreakerEvent>,
    ) -> bool {
        let from = inner.current_state();
        if inner.machine.handle(event).is_err() {
            return false;
        }
        let to = inner.current_state();

        self.enter(inner, from, to);
        events.push(CircuitBreakerEvent::new(
            self.name(),
            EventKind::StateTransition { from, to },
        ));
        true
    }

    fn enter(&self, inner: &mut Inner, from: CircuitState, to: CircuitState) {
        let config = &self.shared.context.config;
        let now = self.now();
        inner.cancel_timer();

        match to {
            CircuitState::Open => {
                inner.consecutive_opens = if from == CircuitState::HalfOpen {
                    inner.consecutive_opens.saturating_add(1)
                } else {
                    1
                };
                let wait_secs = open_wait_secs(config, inner.consecutive_opens);
                if let Some(data) = inner.machine.open_data_mut() {
                    data.opened_at = now;
                    data.wait_secs = wait_secs;
                }
                if config.automatic_transition_from_open_to_half_open_enabled {
                    inner.half_open_timer = self.schedule_half_open(wait_secs);
                }
            }
            CircuitState::HalfOpen => {
                self.shared.trial_epoch.fetch_add(1, Ordering::AcqRel);
                self.shared
                    .permits
                    .reset(config.permitted_number_of_calls_in_half_open_state);
                inner.trial.reset();
                if let Some(data) = inner.machine.half_open_data_mut() {
                    data.entered_at = now;
                }
            }
            CircuitState::Closed => {
                inner.window.reset();
                inner.consecutive_opens = 0;
            }
            CircuitState::MetricsOnly => {
                inner.window.reset();
                inner.rate_reported = false;
            }
            CircuitState::Disabled | CircuitState::ForcedOpen => {}
        }

        self.shared.state.store(to.as_u8(), Ordering::Release);
        info!(circuit = %self.name(), from = %from, to = %to, "Circuit breaker state transition");
    }

    /// Spawn the automatic Open -> HalfOpen timer on the current runtime
    ///
    /// Without a runtime the transition happens on the next permission
    /// request instead.
    fn schedule_half_open(&self, wait_secs: f64) -> Option<tokio::task::JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(circuit = %self.name(), "No runtime, automatic half-open deferred to next call");
            return None;
        };

        let breaker: Weak<Shared> = Arc::downgrade(&self.shared);
        let wait = Duration::from_secs_f64(wait_secs);
        Some(runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = breaker.upgrade() {
                CircuitBreaker { shared }.half_open_on_timer();
            }
        }))
    }

    fn half_open_on_timer(&self) {
        let mut events = Vec::new();
        let mut inner = self.shared.inner.lock();
        if inner.current_state() == CircuitState::Open {
            // The timer is aborted whenever Open is left, so it is still this Open period
            inner.half_open_timer = None;
            self.fire(&mut inner, CircuitEvent::BeginTrial, &mut events);
        }
        self.publish_after(inner, events);
    }

    /// Administrative transition
    ///
    /// Moving to the current state is a no-op. Open -> Closed is not allowed;
    /// use [`reset`](Self::reset) instead.
    pub fn transition_to(&self, target: CircuitState) -> Result<(), TransitionError> {
        let event = match target {
            CircuitState::Closed => CircuitEvent::Close,
            CircuitState::Open => CircuitEvent::Trip,
            CircuitState::HalfOpen => CircuitEvent::BeginTrial,
            CircuitState::Disabled => CircuitEvent::Disable,
            CircuitState::ForcedOpen => CircuitEvent::ForceOpen,
            CircuitState::MetricsOnly => CircuitEvent::ObserveOnly,
        };

        let mut events = Vec::new();
        let mut inner = self.shared.inner.lock();
        let from = inner.current_state();
        let result = if from == target || self.fire(&mut inner, event, &mut events) {
            Ok(())
        } else {
            Err(TransitionError {
                circuit: self.name().to_string(),
                from,
                to: target,
            })
        };
        self.publish_after(inner, events);

        if let Err(e) = &result {
            warn!(circuit = %self.name(), from = %e.from, to = %e.to, "Rejected state transition");
        }
        result
    }

    /// Return to Closed from any state and clear all recorded outcomes
    pub fn reset(&self) {
        let mut events = Vec::new();
        let mut inner = self.shared.inner.lock();
        let from = inner.current_state();

        inner.cancel_timer();
        inner.machine = DynamicCircuit::new(self.shared.context.clone());
        inner.window.reset();
        inner.trial.reset();
        inner.consecutive_opens = 0;
        inner.rate_reported = false;
        self.shared
            .state
            .store(CircuitState::Closed.as_u8(), Ordering::Release);

        if from != CircuitState::Closed {
            events.push(CircuitBreakerEvent::new(
                self.name(),
                EventKind::StateTransition {
                    from,
                    to: CircuitState::Closed,
                },
            ));
        }
        events.push(CircuitBreakerEvent::new(self.name(), EventKind::Reset));
        info!(circuit = %self.name(), from = %from, "Circuit breaker reset");

        self.publish_after(inner, events);
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let now = self.now();
        let inner = self.shared.inner.lock();
        let state = inner.current_state();
        let snapshot = match state {
            CircuitState::HalfOpen => inner.trial.snapshot(now),
            _ => inner.window.snapshot(now),
        };

        CircuitMetrics {
            state,
            failure_rate: snapshot.failure_rate(),
            slow_call_rate: snapshot.slow_call_rate(),
            number_of_buffered_calls: snapshot.total_calls,
            number_of_failed_calls: snapshot.failed_calls,
            number_of_slow_calls: snapshot.slow_calls,
            number_of_successful_calls: snapshot.successful_calls(),
            number_of_not_permitted_calls: self.shared.not_permitted.load(Ordering::Relaxed),
        }
    }

    /// Publish events produced without holding `inner`
    fn publish(&self, events: Vec<CircuitBreakerEvent>) {
        let _emit = self.shared.emit.lock();
        self.deliver(events);
    }

    /// Publish events produced under `inner`
    ///
    /// The emit lock is taken before `inner` is released, so this breaker's
    /// events reach the bus in the order their transitions happened.
    fn publish_after(&self, inner: MutexGuard<'_, Inner>, events: Vec<CircuitBreakerEvent>) {
        if events.is_empty() {
            return;
        }
        let _emit = self.shared.emit.lock();
        drop(inner);
        self.deliver(events);
    }

    fn deliver(&self, events: Vec<CircuitBreakerEvent>) {
        for event in events {
            self.shared.bus.publish(event);
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Accepts either:
    /// - A plain closure: `circuit.call(|| api_request())`
    /// - A closure with options: `circuit.call((|| api_request(), CallOptions::new().with_fallback(...)))`
    pub fn call<I, T, E>(&self, input: I) -> Result<T, CircuitError<E>>
    where
        I: IntoCallOptions<T, E>,
        E: Display + 'static,
    {
        let (f, options) = input.into_call_options();

        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(rejected) => {
                if let Some(fallback) = options.fallback {
                    let ctx = FallbackContext {
                        circuit_name: rejected.circuit,
                        state: rejected.state,
                    };
                    return fallback(&ctx).map_err(CircuitError::Execution);
                }
                return Err(rejected.into());
            }
        };

        let start = self.now();
        match f() {
            Ok(value) => {
                self.on_success(self.elapsed_since(start));
                Ok(value)
            }
            Err(e) => {
                self.record_error(self.elapsed_since(start), &e, Some(permit));
                Err(CircuitError::Execution(e))
            }
        }
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// If the returned future is dropped before the operation completes, the
    /// permission is released without recording an outcome.
    pub async fn call_async<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + 'static,
    {
        let permit = self.acquire()?;
        let mut guard = PermitGuard {
            breaker: self,
            permit,
            armed: true,
        };

        let start = self.now();
        let result = f().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success(self.elapsed_since(start));
                Ok(value)
            }
            Err(e) => {
                self.record_error(self.elapsed_since(start), &e, Some(permit));
                Err(CircuitError::Execution(e))
            }
        }
    }
}

/// Releases an unused permission when a call is cancelled
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    armed: bool,
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release(self.permit);
        }
    }
}

/// Open wait for the n-th consecutive open, in seconds
fn open_wait_secs(config: &CircuitBreakerConfig, consecutive_opens: u32) -> f64 {
    let base_ms = config.wait_duration_in_open_state.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = config
        .max_wait_duration_in_open_state
        .map(|max| max.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(u64::MAX);

    let policy = chrono_machines::Policy {
        max_attempts: u8::MAX.into(),
        base_delay_ms: base_ms,
        multiplier: config.wait_interval_multiplier,
        max_delay_ms: max_ms,
    };
    let attempt = consecutive_opens.clamp(1, u8::MAX as u32) as u8;
    let wait_ms = policy.calculate_delay(attempt.into(), config.jitter_factor);

    (wait_ms as f64).min(max_ms as f64) / 1000.0
}
