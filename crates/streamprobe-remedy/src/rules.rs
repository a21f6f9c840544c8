//! Remediation rule table.
//!
//! Rules are keyed by anomaly type and may narrow on protocol and error
//! category. Each optional field a rule pins down makes it more specific.

use serde::{Deserialize, Serialize};
use streamprobe_core::{ErrorCategory, Protocol};
use streamprobe_detect::{AnomalyType, Signature};

/// Kind of change a suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// Configuration change (timeouts, limits, retry policy).
    Config,
    /// Application code change.
    Code,
    /// Infrastructure change (capacity, topology).
    Infra,
}

impl FixType {
    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Code => "code",
            Self::Infra => "infra",
        }
    }
}

impl std::fmt::Display for FixType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remediation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable rule identifier.
    pub id: String,
    /// Anomaly type the rule applies to.
    pub anomaly_type: AnomalyType,
    /// Restrict to one protocol.
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// Restrict to one error category.
    #[serde(default)]
    pub category: Option<ErrorCategory>,
    /// Kind of fix.
    pub fix_type: FixType,
    /// Suggestion title.
    pub title: String,
    /// Ordered implementation steps.
    pub steps: Vec<String>,
    /// Confidence before any acceptance history, in `[0, 1]`.
    pub baseline_confidence: f64,
}

impl Rule {
    /// Creates a rule matching every signature of `anomaly_type`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        anomaly_type: AnomalyType,
        fix_type: FixType,
        title: impl Into<String>,
        baseline_confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            anomaly_type,
            protocol: None,
            category: None,
            fix_type,
            title: title.into(),
            steps: Vec::new(),
            baseline_confidence: baseline_confidence.clamp(0.0, 1.0),
        }
    }

    /// Restricts the rule to a protocol.
    #[must_use]
    pub const fn for_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Restricts the rule to an error category.
    #[must_use]
    pub const fn for_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Sets the implementation steps.
    #[must_use]
    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the number of optional fields the rule pins down.
    #[must_use]
    pub fn specificity(&self) -> usize {
        usize::from(self.protocol.is_some()) + usize::from(self.category.is_some())
    }

    /// Returns true if the rule applies to a signature.
    #[must_use]
    pub fn matches(&self, signature: &Signature) -> bool {
        self.anomaly_type == signature.anomaly_type
            && self.protocol.is_none_or(|p| p == signature.protocol)
            && self.category.is_none_or(|c| Some(c) == signature.category)
    }
}

/// Ordered set of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Returns the rules.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the rules that apply to a signature, in table order.
    pub fn matching<'a>(&'a self, signature: &'a Signature) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(|rule| rule.matches(signature))
    }

    /// Built-in rules covering every anomaly type.
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with_rule(
                Rule::new(
                    "connection-capacity",
                    AnomalyType::ConnectionError,
                    FixType::Infra,
                    "Increase endpoint connection capacity",
                    0.7,
                )
                .for_category(ErrorCategory::Connection)
                .with_steps([
                    "Raise the listen backlog and the per-process file descriptor limit",
                    "Raise the server's maximum concurrent connection setting",
                    "Add endpoint instances behind the load balancer",
                ]),
            )
            .with_rule(
                Rule::new(
                    "connection-broker-limits",
                    AnomalyType::ConnectionError,
                    FixType::Infra,
                    "Raise broker connection and subscriber limits",
                    0.7,
                )
                .for_protocol(Protocol::PubSub)
                .for_category(ErrorCategory::Connection)
                .with_steps([
                    "Check the broker's max-connections and max-subscriptions settings",
                    "Spread subscribers across broker nodes",
                ]),
            )
            .with_rule(
                Rule::new(
                    "connection-client-backoff",
                    AnomalyType::ConnectionError,
                    FixType::Config,
                    "Add jittered reconnect backoff to clients",
                    0.5,
                )
                .with_steps([
                    "Use exponential reconnect delays with random jitter",
                    "Cap reconnect attempts per client",
                ]),
            )
            .with_rule(
                Rule::new(
                    "timeout-budget",
                    AnomalyType::Timeout,
                    FixType::Config,
                    "Revisit operation timeouts and server-side deadlines",
                    0.55,
                )
                .with_steps([
                    "Compare the client operation timeout with observed p99 latency",
                    "Set server-side deadlines below the client timeout",
                ]),
            )
            .with_rule(
                Rule::new(
                    "timeout-capacity",
                    AnomalyType::Timeout,
                    FixType::Infra,
                    "Add worker capacity for stalled handlers",
                    0.5,
                )
                .with_steps([
                    "Check worker pool saturation during the run window",
                    "Scale handler workers or shed load earlier",
                ]),
            )
            .with_rule(
                Rule::new(
                    "latency-hot-path",
                    AnomalyType::HighLatency,
                    FixType::Code,
                    "Profile and shorten the message handling path",
                    0.6,
                )
                .with_steps([
                    "Profile the handler under the scenario's rate profile",
                    "Move blocking work off the reply path",
                ]),
            )
            .with_rule(
                Rule::new(
                    "latency-scale-out",
                    AnomalyType::HighLatency,
                    FixType::Infra,
                    "Scale out endpoint workers",
                    0.45,
                )
                .with_steps(["Add endpoint replicas", "Check CPU and network saturation"]),
            )
            .with_rule(
                Rule::new(
                    "protocol-framing",
                    AnomalyType::ProtocolError,
                    FixType::Code,
                    "Fix reply framing and serialization",
                    0.7,
                )
                .for_category(ErrorCategory::Protocol)
                .with_steps([
                    "Ensure every reply is one complete, newline-terminated frame",
                    "Validate serialized replies against the wire format in tests",
                ]),
            )
            .with_rule(
                Rule::new(
                    "validation-schema",
                    AnomalyType::ValidationFailure,
                    FixType::Code,
                    "Align reply schema with the validation rules",
                    0.6,
                )
                .for_category(ErrorCategory::Validation)
                .with_steps([
                    "Compare replies with the required fields and echo expectation",
                    "Add a contract test for the reply schema",
                ]),
            )
            .with_rule(
                Rule::new(
                    "validation-budget",
                    AnomalyType::ValidationFailure,
                    FixType::Config,
                    "Review the scenario's latency budget and required fields",
                    0.4,
                )
                .with_steps(["Check max_latency_ms against the endpoint's SLO"]),
            )
            .with_rule(
                Rule::new(
                    "duplicate-idempotency",
                    AnomalyType::DuplicateDetected,
                    FixType::Code,
                    "Deduplicate deliveries by sequence number",
                    0.65,
                )
                .with_steps([
                    "Track the highest delivered sequence per session",
                    "Drop or acknowledge redeliveries idempotently",
                ]),
            )
            .with_rule(
                Rule::new(
                    "duplicate-broker-delivery",
                    AnomalyType::DuplicateDetected,
                    FixType::Config,
                    "Tighten broker delivery guarantees",
                    0.55,
                )
                .for_protocol(Protocol::PubSub)
                .with_steps([
                    "Enable broker-side deduplication",
                    "Check redelivery and acknowledgement timeouts",
                ]),
            )
    }
}
