// RESERVATION POLICY
// Pure rules layered over the registry. Nothing in this module touches storage.
//
// INVARIANTS:
// 1. normalize() is total and idempotent; its output always matches ^[a-z0-9-]{0,20}$
// 2. An empty normalized name is never offered for reservation
// 3. Hold duration is min(base * 2^lapses, max) and never decreases as lapses grow
// 4. Founding names are fixed at compile time and never enter the mutable keyspace

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Names reserved for the founding team, permanently taken
pub const FOUNDING_NAMES: [&str; 6] = ["ben", "attila", "will", "stuart", "clara", "leon"];

pub const MAX_NAME_LEN: usize = 20;
pub const PIN_LEN: usize = 4;
pub const MAX_QUESTION_LEN: usize = 200;
pub const MAX_ANSWER_LEN: usize = 100;

/// Default first hold: 30 minutes
pub const DEFAULT_HOLD_BASE_SECS: u64 = 1800;
/// Default ceiling: 24 hours
pub const DEFAULT_HOLD_MAX_SECS: u64 = 86_400;

/// Lowercases, drops everything outside `[a-z0-9-]` and truncates to 20 characters.
pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        .take(MAX_NAME_LEN)
        .collect()
}

pub fn is_founding(normalized: &str) -> bool {
    FOUNDING_NAMES.contains(&normalized)
}

/// A normalized, non-empty name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(ValidationError::InvalidName);
        }
        Ok(Name(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_founding(&self) -> bool {
        is_founding(&self.0)
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exactly four ASCII digits
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.len() != PIN_LEN || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidPin);
        }
        Ok(Pin(raw.to_string()))
    }

    pub(crate) fn digits(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Capped exponential hold escalation, keyed per name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldPolicy {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        HoldPolicy {
            base_secs: DEFAULT_HOLD_BASE_SECS,
            max_secs: DEFAULT_HOLD_MAX_SECS,
        }
    }
}

impl HoldPolicy {
    /// Hold length in seconds for a name that has lapsed `lapses` times
    pub fn hold_duration(&self, lapses: u64) -> u64 {
        u32::try_from(lapses)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift))
            .and_then(|factor| self.base_secs.checked_mul(factor))
            .map_or(self.max_secs, |secs| secs.min(self.max_secs))
    }
}

/// Inviter to credit for `invitee`'s reservation, if any.
///
/// Blank or self-referencing inviters yield `None`.
pub fn referral_target(invitee: &Name, raw_inviter: Option<&str>) -> Option<Name> {
    let inviter = Name::parse(raw_inviter?).ok()?;
    (inviter != *invitee).then_some(inviter)
}

/// Checks a recovery question/answer pair and returns them trimmed
pub fn validate_recovery<'a>(
    question: &'a str,
    answer: &'a str,
) -> Result<(&'a str, &'a str), ValidationError> {
    let question = question.trim();
    let answer = answer.trim();
    if question.is_empty() {
        return Err(ValidationError::MissingField("question"));
    }
    if answer.is_empty() {
        return Err(ValidationError::MissingField("answer"));
    }
    if question.chars().count() > MAX_QUESTION_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "question",
            max: MAX_QUESTION_LEN,
        });
    }
    if answer.chars().count() > MAX_ANSWER_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "answer",
            max: MAX_ANSWER_LEN,
        });
    }
    Ok((question, answer))
}
