//! Call admission for the upstream service.
//!
//! ```text
//! Closed   --(failures > failure_threshold)-----> Open
//! Open     --(failure call, cooldown elapsed)---> HalfOpen
//! HalfOpen --(successes > success_threshold)---> Closed
//! HalfOpen --(any failure)----------------------> Open   (cooldown re-armed)
//! ```
//!
//! Transitions are only evaluated when a success or failure is recorded; there are
//! no timers. Thresholds are "exceeds", so with the default of 5 the sixth
//! consecutive failure opens the circuit.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::elapsed::minutes_since;
use crate::error::ConfigError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 1;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 85;
pub const DEFAULT_OPEN_FACTOR: u32 = 10;
pub const DEFAULT_HALF_OPEN_FACTOR: u32 = 2;

/// Diagnostic key/value record attached to failure events. Only ever logged.
pub type EventContext = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Minimum time spent Open before a failure call may move the circuit to HalfOpen.
    pub cooldown: chrono::Duration,
    /// Upstream budget; the base pause between calls is `60 / rate_limit_per_minute` seconds.
    pub rate_limit_per_minute: u32,
    pub open_factor: u32,
    pub half_open_factor: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            cooldown: chrono::Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            open_factor: DEFAULT_OPEN_FACTOR,
            half_open_factor: DEFAULT_HALF_OPEN_FACTOR,
        }
    }
}

impl BreakerConfig {
    /// Cooldown may be zero but not negative; the rate limit must be at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cooldown < chrono::Duration::zero() {
            return Err(ConfigError::OutOfRange {
                name: "cooldown-minutes",
                value: self.cooldown_minutes(),
            });
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ConfigError::OutOfRange {
                name: "rate-limit",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Pause after every upstream request while the circuit is closed.
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.rate_limit_per_minute.max(1)))
    }

    fn cooldown_minutes(&self) -> f64 {
        self.cooldown.num_milliseconds() as f64 / 60_000.0
    }
}

#[derive(Debug)]
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: BreakerConfig,
    clock: C,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreaker::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(config: BreakerConfig, clock: C) -> Self {
        CircuitBreaker {
            config,
            clock,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Half-open admits trial calls so recovery can be observed.
    pub fn is_call_permitted(&self) -> bool {
        self.state != CircuitState::Open
    }

    pub fn record_failure(&mut self, context: &EventContext) {
        warn!("Encountered a failure at {}", render(context));
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures > self.config.failure_threshold {
                    info!(
                        "Exceeded failure threshold of {} failures. Opening the circuit.",
                        self.config.failure_threshold
                    );
                    self.open();
                }
            }
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    info!("Cooldown elapsed. Changing the circuit from open to half-open.");
                    self.state = CircuitState::HalfOpen;
                }
            }
            CircuitState::HalfOpen => {
                info!("Failure encountered in half-open state. Opening the circuit.");
                self.open();
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        if self.state == CircuitState::HalfOpen
            && self.consecutive_successes > self.config.success_threshold
        {
            info!(
                "Encountered {} successes in a row. Closing the circuit.",
                self.consecutive_successes
            );
            self.state = CircuitState::Closed;
            self.consecutive_successes = 0;
            self.consecutive_failures = 0;
            self.opened_at = None;
        }
    }

    /// Extra pause after a day while the circuit is open or probing, on top of the
    /// per-request pacing done by the fetch client.
    pub fn backoff(&self) -> Duration {
        let base = self.config.request_delay();
        match self.state {
            CircuitState::Closed => Duration::ZERO,
            CircuitState::Open => base * self.config.open_factor,
            CircuitState::HalfOpen => base * self.config.half_open_factor,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(self.clock.now());
    }

    fn cooldown_elapsed(&self) -> bool {
        let Some(opened_at) = self.opened_at else {
            return true;
        };
        match minutes_since(opened_at, &self.clock) {
            Ok(minutes) => minutes >= self.config.cooldown_minutes(),
            Err(e) => {
                warn!("Cannot evaluate cooldown: {}", e);
                false
            }
        }
    }
}

fn render(context: &EventContext) -> String {
    serde_json::to_string(context).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::rc::Rc;

    fn breaker() -> (CircuitBreaker<Rc<ManualClock>>, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 21, 19, 0, 0).unwrap(),
        ));
        let breaker = CircuitBreaker::with_clock(BreakerConfig::default(), Rc::clone(&clock));
        (breaker, clock)
    }

    fn ctx(day: u32) -> EventContext {
        let mut context = EventContext::new();
        context.insert("day".to_string(), Value::from(day));
        context
    }

    fn fail(breaker: &mut CircuitBreaker<Rc<ManualClock>>, times: u32) {
        for i in 0..times {
            breaker.record_failure(&ctx(i));
        }
    }

    fn assert_counters_exclusive(breaker: &CircuitBreaker<Rc<ManualClock>>) {
        assert!(breaker.consecutive_failures() == 0 || breaker.consecutive_successes() == 0);
    }

    #[test]
    fn starts_closed_and_permits_calls() {
        let (breaker, _) = breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn tolerates_exactly_the_threshold() {
        let (mut breaker, _) = breaker();
        fail(&mut breaker, 5);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_call_permitted());

        breaker.record_failure(&ctx(6));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
        assert!(breaker.opened_at().is_some());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let (mut breaker, _) = breaker();
        fail(&mut breaker, 5);
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_counters_exclusive(&breaker);

        fail(&mut breaker, 5);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure(&ctx(99));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn stays_open_until_the_cooldown_elapses() {
        let (mut breaker, clock) = breaker();
        fail(&mut breaker, 6);

        clock.advance(chrono::Duration::seconds(59));
        breaker.record_failure(&ctx(7));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(chrono::Duration::seconds(1));
        breaker.record_failure(&ctx(8));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn success_while_open_does_not_close() {
        let (mut breaker, clock) = breaker();
        fail(&mut breaker, 6);
        clock.advance(chrono::Duration::minutes(10));
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn half_open_failure_reopens_and_rearms_cooldown() {
        let (mut breaker, clock) = breaker();
        fail(&mut breaker, 6);
        clock.advance(chrono::Duration::minutes(2));
        breaker.record_failure(&ctx(7));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        clock.advance(chrono::Duration::seconds(5));
        breaker.record_failure(&ctx(8));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.opened_at(), Some(clock.now()));

        // The fresh cooldown has not run yet.
        clock.advance(chrono::Duration::seconds(30));
        breaker.record_failure(&ctx(9));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn full_cycle_with_default_thresholds() {
        let (mut breaker, clock) = breaker();
        fail(&mut breaker, 6);
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(chrono::Duration::minutes(1));
        breaker.record_failure(&ctx(7));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Five successes only reach the threshold; the sixth exceeds it.
        for _ in 0..5 {
            breaker.record_success();
            assert_counters_exclusive(&breaker);
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.consecutive_successes(), 5);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_successes(), 0);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn config_validation() {
        assert!(BreakerConfig::default().validate().is_ok());

        let zero_cooldown = BreakerConfig {
            cooldown: chrono::Duration::zero(),
            ..BreakerConfig::default()
        };
        assert!(zero_cooldown.validate().is_ok());

        let negative = BreakerConfig {
            cooldown: chrono::Duration::seconds(-30),
            ..BreakerConfig::default()
        };
        assert_eq!(
            negative.validate(),
            Err(ConfigError::OutOfRange {
                name: "cooldown-minutes",
                value: -0.5
            })
        );

        let no_rate = BreakerConfig {
            rate_limit_per_minute: 0,
            ..BreakerConfig::default()
        };
        let err = no_rate.validate().unwrap_err();
        assert_eq!(err.to_string(), "rate-limit is out of range: 0");
    }

    #[test]
    fn custom_thresholds_apply() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 21, 0, 0, 0).unwrap());
        let config = BreakerConfig {
            failure_threshold: 1,
            success_threshold: 0,
            cooldown: chrono::Duration::zero(),
            ..BreakerConfig::default()
        };
        let mut breaker = CircuitBreaker::with_clock(config, &clock);
        breaker.record_failure(&EventContext::new());
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure(&EventContext::new());
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.record_failure(&EventContext::new());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn clock_running_backwards_keeps_the_circuit_open() {
        let (mut breaker, clock) = breaker();
        fail(&mut breaker, 6);
        clock.advance(chrono::Duration::minutes(-5));
        breaker.record_failure(&ctx(7));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn backoff_grows_with_state() {
        let (mut breaker, clock) = breaker();
        let base = breaker.config().request_delay();
        assert_eq!(base, Duration::from_secs_f64(60.0 / 85.0));
        assert_eq!(breaker.backoff(), Duration::ZERO);

        fail(&mut breaker, 6);
        assert_eq!(breaker.backoff(), base * 10);

        clock.advance(chrono::Duration::minutes(1));
        breaker.record_failure(&ctx(7));
        assert_eq!(breaker.backoff(), base * 2);
    }
}
