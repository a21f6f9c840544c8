//! Suggestion storage and acceptance history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use streamprobe_core::{SignatureId, SuggestionId};
use streamprobe_detect::AnomalyType;

use crate::error::{RemedyError, Result};
use crate::rules::FixType;

/// Suggestion status. Suggestions are never applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Proposed, awaiting a decision.
    Suggested,
    /// Accepted and applied by an operator.
    Applied,
    /// Rejected by an operator.
    Rejected,
}

impl SuggestionStatus {
    /// Returns true if the transition is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Suggested, Self::Applied | Self::Rejected))
    }

    /// Returns the snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Suggested => "suggested",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }
}

/// A proposed fix for a signature. Unique per (signature, fix type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// Suggestion identifier.
    pub id: SuggestionId,
    /// Signature the fix addresses.
    pub signature_id: SignatureId,
    /// Anomaly type of the signature.
    pub anomaly_type: AnomalyType,
    /// Title.
    pub title: String,
    /// Kind of fix.
    pub fix_type: FixType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Ranking score.
    pub priority_score: f64,
    /// Ordered implementation steps.
    pub implementation_steps: Vec<String>,
    /// Rule that produced the suggestion.
    pub rule_id: String,
    /// Status.
    pub status: SuggestionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Fields the engine computes for an upsert.
#[derive(Debug, Clone)]
pub struct SuggestionDraft {
    /// Signature the fix addresses.
    pub signature_id: SignatureId,
    /// Anomaly type of the signature.
    pub anomaly_type: AnomalyType,
    /// Title.
    pub title: String,
    /// Kind of fix.
    pub fix_type: FixType,
    /// Confidence.
    pub confidence: f64,
    /// Ranking score.
    pub priority_score: f64,
    /// Implementation steps.
    pub implementation_steps: Vec<String>,
    /// Producing rule.
    pub rule_id: String,
}

/// Accepted and rejected decisions for one (anomaly type, fix type) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acceptance {
    /// Suggestions applied.
    pub accepted: u64,
    /// Suggestions rejected.
    pub rejected: u64,
}

impl Acceptance {
    /// Returns the number of decisions.
    #[must_use]
    pub const fn decided(&self) -> u64 {
        self.accepted + self.rejected
    }
}

/// Keyed upsert store for suggestions.
#[async_trait]
pub trait SuggestionStore: Send + Sync + 'static {
    /// Inserts the draft, or updates the existing suggestion for the same
    /// (signature, fix type) while keeping its id, status and creation time.
    async fn upsert(&self, draft: SuggestionDraft) -> Result<FixSuggestion>;

    /// Returns a suggestion by id.
    async fn get(&self, id: SuggestionId) -> Result<FixSuggestion>;

    /// Returns a signature's suggestions, highest priority first.
    async fn for_signature(&self, signature_id: SignatureId) -> Result<Vec<FixSuggestion>>;

    /// Returns all suggestions, highest priority first.
    async fn all(&self) -> Result<Vec<FixSuggestion>>;

    /// Changes a suggestion's status and records the decision in the
    /// acceptance history.
    async fn set_status(
        &self,
        id: SuggestionId,
        status: SuggestionStatus,
    ) -> Result<FixSuggestion>;

    /// Returns the acceptance history of a pair.
    async fn history(&self, anomaly_type: AnomalyType, fix_type: FixType) -> Result<Acceptance>;
}

/// In-memory suggestion store.
#[derive(Default)]
pub struct InMemorySuggestionStore {
    suggestions: DashMap<(SignatureId, FixType), FixSuggestion>,
    by_id: DashMap<SuggestionId, (SignatureId, FixType)>,
    history: DashMap<(AnomalyType, FixType), Acceptance>,
}

impl InMemorySuggestionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of suggestions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    /// Returns true if the store holds no suggestions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    fn key_of(&self, id: SuggestionId) -> Result<(SignatureId, FixType)> {
        self.by_id
            .get(&id)
            .map(|key| *key.value())
            .ok_or_else(|| RemedyError::SuggestionNotFound(id.to_string()))
    }
}

fn by_priority(mut suggestions: Vec<FixSuggestion>) -> Vec<FixSuggestion> {
    suggestions.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    suggestions
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    async fn upsert(&self, draft: SuggestionDraft) -> Result<FixSuggestion> {
        let now = Utc::now();
        let key = (draft.signature_id, draft.fix_type);
        let mut entry = self.suggestions.entry(key).or_insert_with(|| FixSuggestion {
            id: SuggestionId::new(),
            signature_id: draft.signature_id,
            anomaly_type: draft.anomaly_type,
            title: String::new(),
            fix_type: draft.fix_type,
            confidence: 0.0,
            priority_score: 0.0,
            implementation_steps: Vec::new(),
            rule_id: String::new(),
            status: SuggestionStatus::Suggested,
            created_at: now,
            updated_at: now,
        });
        let suggestion = entry.value_mut();
        suggestion.title = draft.title;
        suggestion.confidence = draft.confidence;
        suggestion.priority_score = draft.priority_score;
        suggestion.implementation_steps = draft.implementation_steps;
        suggestion.rule_id = draft.rule_id;
        suggestion.updated_at = now;
        self.by_id.insert(suggestion.id, key);
        Ok(suggestion.clone())
    }

    async fn get(&self, id: SuggestionId) -> Result<FixSuggestion> {
        let key = self.key_of(id)?;
        self.suggestions
            .get(&key)
            .map(|s| s.value().clone())
            .ok_or_else(|| RemedyError::SuggestionNotFound(id.to_string()))
    }

    async fn for_signature(&self, signature_id: SignatureId) -> Result<Vec<FixSuggestion>> {
        Ok(by_priority(
            self.suggestions
                .iter()
                .filter(|s| s.signature_id == signature_id)
                .map(|s| s.value().clone())
                .collect(),
        ))
    }

    async fn all(&self) -> Result<Vec<FixSuggestion>> {
        Ok(by_priority(
            self.suggestions.iter().map(|s| s.value().clone()).collect(),
        ))
    }

    async fn set_status(
        &self,
        id: SuggestionId,
        status: SuggestionStatus,
    ) -> Result<FixSuggestion> {
        let key = self.key_of(id)?;
        let mut suggestion = self
            .suggestions
            .get_mut(&key)
            .ok_or_else(|| RemedyError::SuggestionNotFound(id.to_string()))?;
        if !suggestion.status.can_transition_to(status) {
            return Err(RemedyError::Transition {
                from: suggestion.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        suggestion.status = status;
        suggestion.updated_at = Utc::now();

        let mut acceptance = self
            .history
            .entry((suggestion.anomaly_type, suggestion.fix_type))
            .or_default();
        match status {
            SuggestionStatus::Applied => acceptance.accepted += 1,
            SuggestionStatus::Rejected => acceptance.rejected += 1,
            SuggestionStatus::Suggested => {}
        }
        Ok(suggestion.clone())
    }

    async fn history(&self, anomaly_type: AnomalyType, fix_type: FixType) -> Result<Acceptance> {
        Ok(self
            .history
            .get(&(anomaly_type, fix_type))
            .map(|h| *h.value())
            .unwrap_or_default())
    }
}
