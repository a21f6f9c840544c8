//! Scenario configuration.
//!
//! A scenario is validated at load time and frozen behind an `Arc` once a
//! run starts. Only `protocol`, `endpoint`, `duration_seconds` and
//! `connections` are required; everything else has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::BackoffConfig;
use crate::error::{CoreError, Result};
use crate::metrics::SloThresholds;
use crate::types::Protocol;

/// Upper bound on sessions per run.
pub const MAX_CONNECTIONS: u32 = 100_000;

/// Upper bound on run length (30 days).
pub const MAX_DURATION_SECONDS: f64 = 30.0 * 24.0 * 3600.0;

/// Lowest accepted per-session rate (one message per ~16 minutes).
pub const MIN_MESSAGES_PER_SECOND: f64 = 0.001;

/// Highest accepted per-session rate.
pub const MAX_MESSAGES_PER_SECOND: f64 = 1_000_000.0;

/// Declarative description of a load test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Protocol to exercise.
    pub protocol: Protocol,

    /// Target endpoint, `host:port` with an optional `tcp://` prefix.
    pub endpoint: String,

    /// Run length in seconds.
    pub duration_seconds: f64,

    /// Number of concurrent virtual sessions.
    #[serde(alias = "connection_count")]
    pub connections: u32,

    /// Pub/sub topic (defaults to the scenario name).
    #[serde(default)]
    pub topic: Option<String>,

    /// Emission rate profile.
    #[serde(default)]
    pub rate: RateProfile,

    /// Weighted payload mix.
    #[serde(default = "default_payload_mix")]
    pub payload_mix: Vec<PayloadWeight>,

    /// Failure injection profile.
    #[serde(default)]
    pub failure_injection: FailureInjection,

    /// Response validation rules.
    #[serde(default)]
    pub validation: ValidationRules,

    /// Per-session policy.
    #[serde(default)]
    pub session: SessionPolicy,

    /// SLO targets checked after aggregation.
    #[serde(default)]
    pub slo: SloThresholds,

    /// Seed for reproducible payload draws and failure injection.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_payload_mix() -> Vec<PayloadWeight> {
    vec![PayloadWeight::new("text", 1, 64)]
}

impl Scenario {
    /// Creates a scenario with required fields and defaults.
    #[must_use]
    pub fn new(
        protocol: Protocol,
        endpoint: impl Into<String>,
        duration_seconds: f64,
        connections: u32,
    ) -> Self {
        Self {
            name: default_name(),
            protocol,
            endpoint: endpoint.into(),
            duration_seconds,
            connections,
            topic: None,
            rate: RateProfile::default(),
            payload_mix: default_payload_mix(),
            failure_injection: FailureInjection::default(),
            validation: ValidationRules::default(),
            session: SessionPolicy::default(),
            slo: SloThresholds::default(),
            seed: None,
        }
    }

    /// Sets the scenario name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the rate profile.
    #[must_use]
    pub fn with_rate(mut self, rate: RateProfile) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns the run length.
    ///
    /// # Errors
    /// Returns a scenario error if `duration_seconds` is not representable.
    pub fn duration(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.duration_seconds).map_err(|e| {
            CoreError::scenario(format!(
                "duration_seconds {} is out of range: {e}",
                self.duration_seconds
            ))
        })
    }

    /// Returns the endpoint without its scheme.
    #[must_use]
    pub fn address(&self) -> &str {
        self.endpoint
            .strip_prefix("tcp://")
            .unwrap_or(&self.endpoint)
    }

    /// Returns the pub/sub topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(&self.name)
    }

    /// Validates the scenario.
    ///
    /// # Errors
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::scenario("name cannot be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(CoreError::scenario("endpoint cannot be empty"));
        }
        match self.address().rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(CoreError::scenario(format!(
                    "endpoint must be host:port, got {:?}",
                    self.endpoint
                )));
            }
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CoreError::scenario("duration_seconds must be positive"));
        }
        if self.duration_seconds > MAX_DURATION_SECONDS {
            return Err(CoreError::scenario(format!(
                "duration_seconds must not exceed {MAX_DURATION_SECONDS}"
            )));
        }
        self.duration()?;
        if self.connections == 0 {
            return Err(CoreError::scenario("connections must be greater than 0"));
        }
        if self.connections > MAX_CONNECTIONS {
            return Err(CoreError::scenario(format!(
                "connections must not exceed {MAX_CONNECTIONS}"
            )));
        }
        if self.protocol == Protocol::PubSub && self.topic().contains(char::is_whitespace) {
            return Err(CoreError::scenario("topic cannot contain whitespace"));
        }

        self.rate.validate(self.duration_seconds)?;

        if self.payload_mix.is_empty() {
            return Err(CoreError::scenario("payload_mix cannot be empty"));
        }
        if self.payload_mix.iter().all(|p| p.weight == 0) {
            return Err(CoreError::scenario(
                "payload_mix needs at least one positive weight",
            ));
        }

        self.failure_injection.validate()?;
        self.session.validate()?;
        Ok(())
    }

    /// Parses a scenario from TOML and validates it.
    ///
    /// # Errors
    /// Returns an error if parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(content)
            .map_err(|e| CoreError::scenario(format!("failed to parse scenario: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parses a scenario from JSON and validates it.
    ///
    /// # Errors
    /// Returns an error if parsing or validation fails.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(content)
            .map_err(|e| CoreError::scenario(format!("failed to parse scenario: {e}")))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Loads a scenario file; `.json` is parsed as JSON, anything else as TOML.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::scenario(format!("failed to read scenario: {e}")))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }
}

/// Emission rate profile of each session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateProfile {
    /// Steady-state messages per second, per session.
    #[serde(default = "default_mps")]
    pub messages_per_second: f64,

    /// Rate multiplier during bursts (1.0 disables bursts).
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f64,

    /// Seconds between burst starts during the steady phase.
    #[serde(default = "default_burst_every")]
    pub burst_every_seconds: f64,

    /// Length of one burst in seconds.
    #[serde(default = "default_burst_length")]
    pub burst_length_seconds: f64,

    /// Linear ramp-up length.
    #[serde(default)]
    pub ramp_up_seconds: f64,

    /// Linear ramp-down length.
    #[serde(default)]
    pub ramp_down_seconds: f64,
}

fn default_mps() -> f64 {
    1.0
}

fn default_burst_multiplier() -> f64 {
    1.0
}

fn default_burst_every() -> f64 {
    10.0
}

fn default_burst_length() -> f64 {
    1.0
}

impl Default for RateProfile {
    fn default() -> Self {
        Self {
            messages_per_second: default_mps(),
            burst_multiplier: default_burst_multiplier(),
            burst_every_seconds: default_burst_every(),
            burst_length_seconds: default_burst_length(),
            ramp_up_seconds: 0.0,
            ramp_down_seconds: 0.0,
        }
    }
}

impl RateProfile {
    /// Creates a steady profile at the given per-session rate.
    #[must_use]
    pub fn steady(messages_per_second: f64) -> Self {
        Self {
            messages_per_second,
            ..Default::default()
        }
    }

    /// Sets ramp-up and ramp-down lengths.
    #[must_use]
    pub const fn with_ramp(mut self, up_seconds: f64, down_seconds: f64) -> Self {
        self.ramp_up_seconds = up_seconds;
        self.ramp_down_seconds = down_seconds;
        self
    }

    /// Sets the burst shape.
    #[must_use]
    pub const fn with_bursts(mut self, multiplier: f64, every_seconds: f64, length_seconds: f64) -> Self {
        self.burst_multiplier = multiplier;
        self.burst_every_seconds = every_seconds;
        self.burst_length_seconds = length_seconds;
        self
    }

    /// Returns true if bursts are configured.
    #[must_use]
    pub fn has_bursts(&self) -> bool {
        self.burst_multiplier > 1.0 && self.burst_length_seconds > 0.0
    }

    fn validate(&self, duration_seconds: f64) -> Result<()> {
        if !self.messages_per_second.is_finite() || self.messages_per_second <= 0.0 {
            return Err(CoreError::scenario("messages_per_second must be positive"));
        }
        if !(MIN_MESSAGES_PER_SECOND..=MAX_MESSAGES_PER_SECOND)
            .contains(&self.messages_per_second)
        {
            return Err(CoreError::scenario(format!(
                "messages_per_second must be within [{MIN_MESSAGES_PER_SECOND}, {MAX_MESSAGES_PER_SECOND}]"
            )));
        }
        if self.messages_per_second * self.burst_multiplier > MAX_MESSAGES_PER_SECOND {
            return Err(CoreError::scenario(format!(
                "burst rate must not exceed {MAX_MESSAGES_PER_SECOND} messages per second"
            )));
        }
        if !self.burst_multiplier.is_finite() || self.burst_multiplier < 1.0 {
            return Err(CoreError::scenario("burst_multiplier must be at least 1.0"));
        }
        if self.has_bursts() && self.burst_length_seconds >= self.burst_every_seconds {
            return Err(CoreError::scenario(
                "burst_length_seconds must be shorter than burst_every_seconds",
            ));
        }
        if self.ramp_up_seconds < 0.0 || self.ramp_down_seconds < 0.0 {
            return Err(CoreError::scenario("ramp lengths cannot be negative"));
        }
        if self.ramp_up_seconds + self.ramp_down_seconds > duration_seconds {
            return Err(CoreError::scenario(
                "ramp_up_seconds + ramp_down_seconds exceeds duration_seconds",
            ));
        }
        Ok(())
    }
}

/// One entry of the weighted payload mix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadWeight {
    /// Payload kind label recorded on events.
    pub kind: String,
    /// Relative weight.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Body size in bytes.
    #[serde(default = "default_size")]
    pub size_bytes: usize,
}

fn default_weight() -> u32 {
    1
}

fn default_size() -> usize {
    64
}

impl PayloadWeight {
    /// Creates a payload mix entry.
    #[must_use]
    pub fn new(kind: impl Into<String>, weight: u32, size_bytes: usize) -> Self {
        Self {
            kind: kind.into(),
            weight,
            size_bytes,
        }
    }
}

/// Failure injection profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FailureInjection {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Probability of delaying an emission.
    #[serde(default)]
    pub delay_probability: f64,
    /// Lower bound of the injected delay.
    #[serde(default)]
    pub delay_min_ms: u64,
    /// Upper bound of the injected delay.
    #[serde(default)]
    pub delay_max_ms: u64,
    /// Probability of re-sending the previous message.
    #[serde(default)]
    pub duplicate_probability: f64,
}

impl FailureInjection {
    fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("delay_probability", self.delay_probability),
            ("duplicate_probability", self.duplicate_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(CoreError::scenario(format!("{name} must be within [0, 1]")));
            }
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(CoreError::scenario("delay_min_ms exceeds delay_max_ms"));
        }
        Ok(())
    }
}

/// Response validation rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Whether replies are validated.
    #[serde(default)]
    pub validate_responses: bool,
    /// Latency budget; slower replies fail validation and are high-latency
    /// anomalies.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Fields every reply object must contain.
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Whether the reply must echo the sent sequence number.
    #[serde(default = "default_true")]
    pub expect_echo: bool,
}

fn default_max_latency_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            validate_responses: false,
            max_latency_ms: default_max_latency_ms(),
            required_fields: Vec::new(),
            expect_echo: default_true(),
        }
    }
}

/// Per-session failure handling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Timeout applied to every connect, send and receive.
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Reconnect backoff; `max_retries` bounds reconnects per session.
    #[serde(default)]
    pub retry: BackoffConfig,

    /// Fraction of permanently failed sessions above which the run fails.
    #[serde(default = "default_failed_fraction")]
    pub max_failed_session_fraction: f64,

    /// Open a fresh connection for every emission.
    #[serde(default)]
    pub reconnect_per_message: bool,
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failed_fraction() -> f64 {
    0.5
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            operation_timeout: default_operation_timeout(),
            retry: BackoffConfig::default(),
            max_failed_session_fraction: default_failed_fraction(),
            reconnect_per_message: false,
        }
    }
}

impl SessionPolicy {
    fn validate(&self) -> Result<()> {
        if self.operation_timeout.is_zero() {
            return Err(CoreError::scenario("operation_timeout must be positive"));
        }
        if !(0.0..=1.0).contains(&self.max_failed_session_fraction) {
            return Err(CoreError::scenario(
                "max_failed_session_fraction must be within [0, 1]",
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CoreError::scenario("retry multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

/// Serde helper for humantime durations.
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Scenario {
        Scenario::new(Protocol::SocketStream, "127.0.0.1:9000", 30.0, 5)
    }

    #[test]
    fn test_new_defaults() {
        let scenario = valid();
        assert_eq!(scenario.name, "unnamed");
        assert!((scenario.rate.messages_per_second - 1.0).abs() < f64::EPSILON);
        assert!((scenario.rate.burst_multiplier - 1.0).abs() < f64::EPSILON);
        assert!(!scenario.failure_injection.enabled);
        assert!(!scenario.validation.validate_responses);
        assert_eq!(scenario.payload_mix.len(), 1);
        assert_eq!(scenario.session.operation_timeout, Duration::from_secs(5));
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_address_strips_scheme() {
        let scenario = Scenario::new(Protocol::SocketStream, "tcp://localhost:7000", 1.0, 1);
        assert_eq!(scenario.address(), "localhost:7000");
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_validate_endpoint() {
        let mut scenario = valid();
        scenario.endpoint = String::new();
        assert!(scenario.validate().is_err());

        scenario.endpoint = "localhost".into();
        assert!(scenario.validate().is_err());

        scenario.endpoint = "localhost:notaport".into();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_validate_connections() {
        let mut scenario = valid();
        scenario.connections = 0;
        assert!(scenario.validate().is_err());

        scenario.connections = MAX_CONNECTIONS + 1;
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_validate_duration() {
        let mut scenario = valid();
        scenario.duration_seconds = 0.0;
        assert!(scenario.validate().is_err());
        scenario.duration_seconds = f64::NAN;
        assert!(scenario.validate().is_err());
        scenario.duration_seconds = 1e20;
        assert!(scenario.validate().is_err());
        assert!(scenario.duration().is_err());
        scenario.duration_seconds = MAX_DURATION_SECONDS;
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_validate_rate() {
        let scenario = valid().with_rate(RateProfile::steady(0.0));
        assert!(scenario.validate().is_err());

        let scenario = valid().with_rate(RateProfile::steady(1e-20));
        assert!(scenario.validate().is_err());

        let scenario = valid().with_rate(RateProfile::steady(MIN_MESSAGES_PER_SECOND));
        assert!(scenario.validate().is_ok());

        let scenario = valid().with_rate(RateProfile::steady(1e7));
        assert!(scenario.validate().is_err());

        let scenario = valid().with_rate(RateProfile::steady(1.0).with_bursts(0.5, 10.0, 1.0));
        assert!(scenario.validate().is_err());

        let scenario = valid().with_rate(RateProfile::steady(1.0).with_bursts(3.0, 2.0, 2.0));
        assert!(scenario.validate().is_err());

        let scenario = valid().with_rate(RateProfile::steady(1.0).with_ramp(20.0, 20.0));
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_validate_payload_mix() {
        let mut scenario = valid();
        scenario.payload_mix.clear();
        assert!(scenario.validate().is_err());

        scenario.payload_mix = vec![PayloadWeight::new("a", 0, 8)];
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_validate_injection() {
        let mut scenario = valid();
        scenario.failure_injection.delay_probability = 1.5;
        assert!(scenario.validate().is_err());

        let mut scenario = valid();
        scenario.failure_injection.delay_min_ms = 100;
        scenario.failure_injection.delay_max_ms = 10;
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_validate_pubsub_topic() {
        let mut scenario = Scenario::new(Protocol::PubSub, "127.0.0.1:4222", 1.0, 1);
        assert_eq!(scenario.topic(), "unnamed");
        scenario.topic = Some("bad topic".into());
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_from_toml_minimal() {
        let scenario = Scenario::from_toml_str(
            r#"
            protocol = "SOCKET_STREAM"
            endpoint = "127.0.0.1:9000"
            duration_seconds = 30
            connections = 5
            "#,
        )
        .unwrap();
        assert_eq!(scenario.connections, 5);
        assert!((scenario.rate.messages_per_second - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_toml_full() {
        let scenario = Scenario::from_toml_str(
            r#"
            name = "burst-check"
            protocol = "PUBSUB"
            endpoint = "tcp://broker:4222"
            duration_seconds = 60
            connection_count = 20
            topic = "ticks"
            seed = 42

            [rate]
            messages_per_second = 2.0
            burst_multiplier = 3.0
            ramp_up_seconds = 10
            ramp_down_seconds = 5

            [[payload_mix]]
            kind = "small"
            weight = 3
            size_bytes = 32

            [[payload_mix]]
            kind = "large"
            weight = 1
            size_bytes = 4096

            [failure_injection]
            enabled = true
            delay_probability = 0.1
            delay_min_ms = 50
            delay_max_ms = 200
            duplicate_probability = 0.05

            [validation]
            validate_responses = true
            max_latency_ms = 250
            required_fields = ["seq"]

            [session]
            operation_timeout = "2s"
            max_failed_session_fraction = 0.25

            [session.retry]
            initial_delay = "50ms"
            max_retries = 5

            [slo]
            max_p95_latency_ms = 250.0
            max_error_rate = 0.01
            "#,
        )
        .unwrap();
        assert_eq!(scenario.protocol, Protocol::PubSub);
        assert_eq!(scenario.connections, 20);
        assert_eq!(scenario.topic(), "ticks");
        assert_eq!(scenario.payload_mix.len(), 2);
        assert_eq!(scenario.session.operation_timeout, Duration::from_secs(2));
        assert_eq!(scenario.session.retry.max_retries, 5);
        assert_eq!(scenario.slo.max_error_rate, Some(0.01));
        assert_eq!(scenario.seed, Some(42));
    }

    #[test]
    fn test_from_json() {
        let scenario = Scenario::from_json_str(
            r#"{"protocol":"SOCKET_STREAM","endpoint":"127.0.0.1:1","duration_seconds":1.5,"connections":2}"#,
        )
        .unwrap();
        assert_eq!(scenario.duration().unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_from_toml_missing_required() {
        let result = Scenario::from_toml_str("protocol = \"SOCKET_STREAM\"\nconnections = 1");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let scenario = valid().with_name("roundtrip").with_seed(7);
        let text = toml::to_string(&scenario).unwrap();
        let back = Scenario::from_toml_str(&text).unwrap();
        assert_eq!(back.name, "roundtrip");
        assert_eq!(back.seed, Some(7));
        assert_eq!(back.session, scenario.session);
    }
}
