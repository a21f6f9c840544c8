//! Suggestion engine: matches rules to signatures, scores and upserts.
//!
//! ```text
//! confidence = clamp((baseline·w + accepted) / (w + decided) + bonus·specificity)
//! priority   = severity_weight × ln(1 + occurrence_count) × confidence
//! ```
//!
//! With no history the smoothed term is the rule's baseline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use streamprobe_core::{SignatureId, SuggestionId};
use streamprobe_detect::{Severity, Signature};

use crate::error::Result;
use crate::rules::{FixType, Rule, RuleTable};
use crate::store::{Acceptance, FixSuggestion, SuggestionDraft, SuggestionStatus, SuggestionStore};

/// Engine parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Weight of the rule baseline, in pseudo-decisions.
    pub prior_weight: f64,
    /// Confidence bonus per optional field a rule matches.
    pub specificity_bonus: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prior_weight: 5.0,
            specificity_bonus: 0.1,
        }
    }
}

/// Returns the priority weight of a severity.
#[must_use]
pub const fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 2.0,
        Severity::High => 4.0,
        Severity::Critical => 8.0,
    }
}

/// Computes a priority score.
#[must_use]
pub fn priority_score(severity: Severity, occurrence_count: u64, confidence: f64) -> f64 {
    severity_weight(severity) * (occurrence_count as f64).ln_1p() * confidence
}

/// Blends a baseline with acceptance history.
#[must_use]
pub fn smoothed_confidence(baseline: f64, history: Acceptance, prior_weight: f64) -> f64 {
    let denominator = prior_weight + history.decided() as f64;
    if denominator <= 0.0 {
        return baseline;
    }
    baseline.mul_add(prior_weight, history.accepted as f64) / denominator
}

/// Result of suggesting fixes for many signatures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionReport {
    /// Suggestions created or updated.
    pub suggestions: Vec<FixSuggestion>,
    /// Signatures whose suggestion step failed, with the error message.
    pub failures: Vec<(SignatureId, String)>,
}

impl SuggestionReport {
    /// Returns the ids of the produced suggestions.
    pub fn ids(&self) -> impl Iterator<Item = SuggestionId> + '_ {
        self.suggestions.iter().map(|s| s.id)
    }
}

/// Rule-based fix suggestion engine.
pub struct SuggestionEngine {
    rules: RuleTable,
    store: Arc<dyn SuggestionStore>,
    config: EngineConfig,
}

impl SuggestionEngine {
    /// Creates an engine with the built-in rules.
    #[must_use]
    pub fn new(store: Arc<dyn SuggestionStore>) -> Self {
        Self {
            rules: RuleTable::builtin(),
            store,
            config: EngineConfig::default(),
        }
    }

    /// Replaces the rule table.
    #[must_use]
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    /// Replaces the scoring parameters.
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SuggestionStore> {
        &self.store
    }

    async fn confidence(&self, signature: &Signature, rule: &Rule) -> Result<f64> {
        let history = self.store.history(signature.anomaly_type, rule.fix_type).await?;
        let smoothed =
            smoothed_confidence(rule.baseline_confidence, history, self.config.prior_weight);
        let bonus = self.config.specificity_bonus * rule.specificity() as f64;
        Ok((smoothed + bonus).clamp(0.0, 1.0))
    }

    /// Creates or refreshes one suggestion per fix type for a signature.
    ///
    /// When several rules share a fix type the most confident wins; ties go
    /// to the more specific rule, then to table order.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn suggest(&self, signature: &Signature) -> Result<Vec<FixSuggestion>> {
        let mut best: BTreeMap<FixType, (f64, &Rule)> = BTreeMap::new();
        for rule in self.rules.matching(signature) {
            let confidence = self.confidence(signature, rule).await?;
            let replace = best.get(&rule.fix_type).is_none_or(|(current, held)| {
                confidence > *current
                    || (confidence == *current && rule.specificity() > held.specificity())
            });
            if replace {
                best.insert(rule.fix_type, (confidence, rule));
            }
        }

        let mut suggestions = Vec::with_capacity(best.len());
        for (fix_type, (confidence, rule)) in best {
            let draft = SuggestionDraft {
                signature_id: signature.id,
                anomaly_type: signature.anomaly_type,
                title: rule.title.clone(),
                fix_type,
                confidence,
                priority_score: priority_score(
                    signature.severity,
                    signature.occurrence_count,
                    confidence,
                ),
                implementation_steps: rule.steps.clone(),
                rule_id: rule.id.clone(),
            };
            suggestions.push(self.store.upsert(draft).await?);
        }
        tracing::debug!(
            signature = %signature.id,
            anomaly = %signature.anomaly_type,
            suggestions = suggestions.len(),
            "suggestions refreshed"
        );
        Ok(suggestions)
    }

    /// Suggests fixes for every signature. A failing signature is logged and
    /// reported without affecting the others.
    pub async fn suggest_all(&self, signatures: &[Signature]) -> SuggestionReport {
        let mut report = SuggestionReport::default();
        for signature in signatures {
            match self.suggest(signature).await {
                Ok(suggestions) => report.suggestions.extend(suggestions),
                Err(e) => {
                    tracing::warn!(
                        signature = %signature.id,
                        error = %e,
                        "fix suggestion failed"
                    );
                    report.failures.push((signature.id, e.to_string()));
                }
            }
        }
        report
    }

    /// Records an operator decision on a suggestion.
    ///
    /// # Errors
    /// Returns an error if the suggestion is unknown or already decided.
    pub async fn set_status(
        &self,
        id: SuggestionId,
        status: SuggestionStatus,
    ) -> Result<FixSuggestion> {
        let suggestion = self.store.set_status(id, status).await?;
        tracing::info!(
            suggestion = %id,
            signature = %suggestion.signature_id,
            fix_type = %suggestion.fix_type,
            status = suggestion.status.as_str(),
            "suggestion status changed"
        );
        Ok(suggestion)
    }
}
