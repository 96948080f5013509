//! Lead tiering: an AI completion with a deterministic rule-based fallback.
//!
//! [`LeadClassifier::classify`] always returns a [`Classification`]. Transport
//! failures, timeouts and unusable replies are recorded as the
//! `fallback_reason` of a heuristic verdict instead of being surfaced.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub mod completion;
pub mod heuristic;

pub use completion::{CompletionClient, HttpCompletionClient};

use crate::leads::LeadStatus;

const DEFAULT_AI_CONFIDENCE: f64 = 0.75;

const SYSTEM_PROMPT: &str = "You triage inbound leads for a small web development studio. \
Assign exactly one tier: SOFTBALL (small, clear website work), MEDIUM (a typical custom \
project), HARD (complex systems, integrations, or unclear large scope that needs a human), \
DISQUALIFY (spam, sales pitches, or requests the studio does not serve). Reply with a single \
JSON object and nothing else: {\"tier\": \"...\", \"confidence\": 0.0-1.0, \"rationale\": \"one sentence\"}.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Softball,
    Medium,
    Hard,
    Disqualify,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Softball, Tier::Medium, Tier::Hard, Tier::Disqualify];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Softball => "SOFTBALL",
            Tier::Medium => "MEDIUM",
            Tier::Hard => "HARD",
            Tier::Disqualify => "DISQUALIFY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        Tier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
    }

    /// Static tier → lead status table.
    pub fn lead_status(self) -> LeadStatus {
        match self {
            Tier::Softball | Tier::Medium => LeadStatus::Qualified,
            Tier::Hard => LeadStatus::Incoming,
            Tier::Disqualify => LeadStatus::Disqualified,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Ai,
    Heuristic,
}

impl ClassificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassificationSource::Ai => "ai",
            ClassificationSource::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub tier: Tier,
    pub confidence: f64,
    pub rationale: String,
    pub source: ClassificationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl Classification {
    /// Payload stored in `leads.ai_assessment`.
    pub fn assessment(&self, classified_at: &str) -> Value {
        json!({
            "tier": self.tier,
            "confidence": self.confidence,
            "rationale": self.rationale,
            "source": self.source,
            "model": self.model,
            "fallback_reason": self.fallback_reason,
            "classified_at": classified_at,
        })
    }
}

/// The lead fields the classifier reads.
#[derive(Debug, Clone, Copy)]
pub struct LeadText<'a> {
    pub name: &'a str,
    pub company: Option<&'a str>,
    pub message: Option<&'a str>,
    pub source: &'a str,
}

impl LeadText<'_> {
    /// Free text used for rule matching. The contact name is excluded.
    pub fn combined_text(&self) -> String {
        [self.company, self.message]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prompt(&self) -> String {
        format!(
            "Contact name: {}\nCompany: {}\nSource: {}\nMessage:\n{}",
            self.name,
            self.company.unwrap_or("(not provided)"),
            self.source,
            self.message.unwrap_or("(empty)")
        )
    }
}

#[derive(Clone)]
pub struct LeadClassifier {
    client: Option<Arc<dyn CompletionClient>>,
    timeout: Duration,
}

impl LeadClassifier {
    pub fn new(client: Option<Arc<dyn CompletionClient>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn heuristic_only() -> Self {
        Self::new(None, Duration::from_secs(10))
    }

    pub fn ai_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn classify(&self, lead: &LeadText<'_>) -> Classification {
        let Some(client) = &self.client else {
            return with_fallback_reason(
                heuristic::classify(lead),
                "completion service not configured",
            );
        };

        let prompt = lead.prompt();
        let reply =
            tokio::time::timeout(self.timeout, client.complete(SYSTEM_PROMPT, &prompt)).await;
        let reason = match reply {
            Ok(Ok(text)) => match parse_reply(&text) {
                Ok(mut classification) => {
                    classification.model = Some(client.model().to_string());
                    debug!(tier = %classification.tier, "lead classified by completion service");
                    return classification;
                }
                Err(reason) => reason,
            },
            Ok(Err(err)) => format!("completion request failed: {err}"),
            Err(_) => format!(
                "completion timed out after {}ms",
                self.timeout.as_millis()
            ),
        };

        warn!(%reason, "falling back to heuristic lead classification");
        with_fallback_reason(heuristic::classify(lead), &reason)
    }
}

fn with_fallback_reason(mut classification: Classification, reason: &str) -> Classification {
    classification.fallback_reason = Some(reason.to_string());
    classification
}

#[derive(Deserialize)]
struct AiVerdict {
    tier: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Extracts the first JSON object from a completion reply.
pub fn parse_reply(reply: &str) -> Result<Classification, String> {
    let start = reply
        .find('{')
        .ok_or_else(|| "completion reply contained no JSON object".to_string())?;
    let verdict: AiVerdict = serde_json::Deserializer::from_str(&reply[start..])
        .into_iter::<AiVerdict>()
        .next()
        .ok_or_else(|| "completion reply contained no JSON object".to_string())?
        .map_err(|err| format!("completion reply was malformed: {err}"))?;

    let tier = Tier::parse(&verdict.tier)
        .ok_or_else(|| format!("completion reply had unknown tier {:?}", verdict.tier))?;
    let confidence = match verdict.confidence {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        Some(_) => return Err("completion reply had a non-numeric confidence".to_string()),
        None => DEFAULT_AI_CONFIDENCE,
    };
    let rationale = verdict
        .rationale
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "no rationale provided".to_string());

    Ok(Classification {
        tier,
        confidence,
        rationale,
        source: ClassificationSource::Ai,
        model: None,
        fallback_reason: None,
    })
}
