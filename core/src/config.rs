//! Circuit breaker and registry configuration
//!
//! Both types deserialize with defaults for every missing field, so a config
//! file only needs to name what it overrides. Durations are expressed in
//! milliseconds in serialized form.
//!
//! Instance entries of a [`RegistryConfig`] are layered over its `defaults`,
//! and may be given either as a map keyed by name or as a list of tables
//! with a `name` field. Loaders that fold map keys to lowercase should use
//! the list form.

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// How recent outcomes are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlidingWindowType {
    /// The last `sliding_window_size` calls
    #[default]
    #[serde(alias = "count_based")]
    CountBased,
    /// Calls from the last `sliding_window_size` seconds
    #[serde(alias = "time_based")]
    TimeBased,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure rate in percent above which the circuit opens
    pub failure_rate_threshold: f32,

    /// Slow call rate in percent above which the circuit opens
    pub slow_call_rate_threshold: f32,

    /// Calls taking at least this long count as slow
    #[serde(with = "millis")]
    pub slow_call_duration_threshold: Duration,

    pub sliding_window_type: SlidingWindowType,

    /// Number of calls (count-based) or seconds (time-based) in the window
    pub sliding_window_size: usize,

    /// Minimum number of calls recorded before rates are evaluated
    pub minimum_number_of_calls: usize,

    /// Base time spent in Open before a trial is allowed
    #[serde(with = "millis")]
    pub wait_duration_in_open_state: Duration,

    /// Growth factor applied to the open wait for each consecutive re-open
    pub wait_interval_multiplier: f64,

    /// Upper bound for the open wait after backoff (None = unbounded)
    #[serde(with = "opt_millis")]
    pub max_wait_duration_in_open_state: Option<Duration>,

    /// Jitter factor for the open wait (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Trial calls allowed through while HalfOpen
    pub permitted_number_of_calls_in_half_open_state: usize,

    /// Maximum time spent in HalfOpen before falling back to Open
    /// (zero waits for all trial calls indefinitely)
    #[serde(with = "millis")]
    pub max_wait_duration_in_half_open_state: Duration,

    /// Move Open -> HalfOpen on a timer instead of on the next call
    pub automatic_transition_from_open_to_half_open_enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            sliding_window_type: SlidingWindowType::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_state: Duration::from_secs(60),
            wait_interval_multiplier: 1.0,
            max_wait_duration_in_open_state: None,
            jitter_factor: 0.0,
            permitted_number_of_calls_in_half_open_state: 10,
            max_wait_duration_in_half_open_state: Duration::ZERO,
            automatic_transition_from_open_to_half_open_enabled: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Minimum number of calls actually required before evaluation
    ///
    /// A count-based window can never hold more than its size, so the
    /// minimum is clamped to it.
    pub fn effective_minimum_calls(&self) -> usize {
        match self.sliding_window_type {
            SlidingWindowType::CountBased => {
                self.minimum_number_of_calls.min(self.sliding_window_size)
            }
            SlidingWindowType::TimeBased => self.minimum_number_of_calls,
        }
        .max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate_ok = |rate: f32| rate > 0.0 && rate <= 100.0;

        if !rate_ok(self.failure_rate_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "failure_rate_threshold",
                reason: "must be within (0, 100]",
            });
        }
        if !rate_ok(self.slow_call_rate_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "slow_call_rate_threshold",
                reason: "must be within (0, 100]",
            });
        }
        if self.sliding_window_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "sliding_window_size",
                reason: "must be at least 1",
            });
        }
        if self.minimum_number_of_calls == 0 {
            return Err(ConfigError::OutOfRange {
                field: "minimum_number_of_calls",
                reason: "must be at least 1",
            });
        }
        if self.permitted_number_of_calls_in_half_open_state == 0 {
            return Err(ConfigError::OutOfRange {
                field: "permitted_number_of_calls_in_half_open_state",
                reason: "must be at least 1",
            });
        }
        if self.wait_duration_in_open_state < Duration::from_millis(1) {
            return Err(ConfigError::OutOfRange {
                field: "wait_duration_in_open_state",
                reason: "must be at least 1ms",
            });
        }
        if self.wait_interval_multiplier < 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "wait_interval_multiplier",
                reason: "must be at least 1.0",
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::OutOfRange {
                field: "jitter_factor",
                reason: "must be within [0, 1]",
            });
        }
        if let Some(max) = self.max_wait_duration_in_open_state
            && max < self.wait_duration_in_open_state
        {
            return Err(ConfigError::OutOfRange {
                field: "max_wait_duration_in_open_state",
                reason: "must not be shorter than wait_duration_in_open_state",
            });
        }

        Ok(())
    }
}

/// Configuration for a registry of circuit breakers and its event plumbing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryConfig {
    /// Configuration for breakers without an instance entry
    pub defaults: CircuitBreakerConfig,

    /// Per-name configuration
    pub instances: HashMap<String, CircuitBreakerConfig>,

    /// Events retained per circuit breaker name
    pub event_buffer_size: usize,

    /// Events returned by an unfiltered history query
    pub global_event_buffer_size: usize,

    /// Undelivered events buffered per subscriber before dropping
    pub subscriber_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            defaults: CircuitBreakerConfig::default(),
            instances: HashMap::new(),
            event_buffer_size: 100,
            global_event_buffer_size: 1000,
            subscriber_buffer_size: 256,
        }
    }
}

impl RegistryConfig {
    /// Configuration used for a breaker of the given name
    ///
    /// An exact instance match wins; otherwise names are compared ignoring
    /// ASCII case before falling back to `defaults`.
    pub fn config_for(&self, name: &str) -> &CircuitBreakerConfig {
        self.instances
            .get(name)
            .or_else(|| {
                self.instances
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, config)| config)
            })
            .unwrap_or(&self.defaults)
    }

    pub fn with_instance(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.instances.insert(name.into(), config);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate()?;
        for (name, config) in &self.instances {
            config.validate().map_err(|e| ConfigError::Instance {
                name: name.clone(),
                source: Box::new(e),
            })?;
        }
        for (field, value) in [
            ("event_buffer_size", self.event_buffer_size),
            ("global_event_buffer_size", self.global_event_buffer_size),
            ("subscriber_buffer_size", self.subscriber_buffer_size),
        ] {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: "must be at least 1",
                });
            }
        }
        Ok(())
    }
}

/// Instance entries as written in a config source
#[derive(Deserialize)]
#[serde(untagged)]
enum InstanceEntries {
    List(Vec<NamedInstance>),
    Map(HashMap<String, Map<String, Value>>),
}

#[derive(Deserialize)]
struct NamedInstance {
    name: String,
    #[serde(flatten)]
    overrides: Map<String, Value>,
}

impl InstanceEntries {
    fn into_pairs(self) -> Vec<(String, Map<String, Value>)> {
        match self {
            InstanceEntries::List(list) => list.into_iter().map(|i| (i.name, i.overrides)).collect(),
            InstanceEntries::Map(map) => map.into_iter().collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct RawRegistryConfig {
    defaults: Map<String, Value>,
    instances: InstanceEntries,
    event_buffer_size: usize,
    global_event_buffer_size: usize,
    subscriber_buffer_size: usize,
}

impl Default for RawRegistryConfig {
    fn default() -> Self {
        let defaults = RegistryConfig::default();
        Self {
            defaults: Map::new(),
            instances: InstanceEntries::Map(HashMap::new()),
            event_buffer_size: defaults.event_buffer_size,
            global_event_buffer_size: defaults.global_event_buffer_size,
            subscriber_buffer_size: defaults.subscriber_buffer_size,
        }
    }
}

impl<'de> Deserialize<'de> for RegistryConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRegistryConfig::deserialize(deserializer)?;

        let defaults: CircuitBreakerConfig =
            serde_json::from_value(Value::Object(raw.defaults.clone())).map_err(D::Error::custom)?;

        let mut instances = HashMap::new();
        for (name, overrides) in raw.instances.into_pairs() {
            let mut layered = raw.defaults.clone();
            layered.extend(overrides);
            let config = serde_json::from_value(Value::Object(layered)).map_err(|e| {
                D::Error::custom(format!("circuit breaker '{}': {}", name, e))
            })?;
            instances.insert(name, config);
        }

        Ok(Self {
            defaults,
            instances,
            event_buffer_size: raw.event_buffer_size,
            global_event_buffer_size: raw.global_event_buffer_size,
            subscriber_buffer_size: raw.subscriber_buffer_size,
        })
    }
}

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: &'static str,
    },
    #[error("invalid configuration for circuit breaker '{name}': {source}")]
    Instance {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
