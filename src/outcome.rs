//! Aggregates the side effects of a multi-step request into one success rule.
//!
//! A request succeeds when every `Required` step succeeded and, if any
//! `Redundant` steps were recorded, at least one of them succeeded.
//! `Optional` steps never affect the result.

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Redundant,
    Optional,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: &'static str,
    pub requirement: Requirement,
    pub ok: bool,
    /// Logged, never echoed to callers.
    #[serde(skip)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct Outcome {
    steps: Vec<StepOutcome>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T, E: std::fmt::Display>(
        &mut self,
        name: &'static str,
        requirement: Requirement,
        result: &Result<T, E>,
    ) {
        let error = result.as_ref().err().map(|err| err.to_string());
        if let Some(error) = &error {
            warn!(step = name, ?requirement, %error, "request step failed");
        }
        self.steps.push(StepOutcome {
            name,
            requirement,
            ok: error.is_none(),
            error,
        });
    }

    pub fn step_ok(&self, name: &str) -> bool {
        self.steps.iter().any(|step| step.name == name && step.ok)
    }

    pub fn succeeded(&self) -> bool {
        let required_ok = self
            .steps
            .iter()
            .filter(|step| step.requirement == Requirement::Required)
            .all(|step| step.ok);

        let mut redundant = self
            .steps
            .iter()
            .filter(|step| step.requirement == Requirement::Redundant)
            .peekable();
        let redundant_ok = redundant.peek().is_none() || redundant.any(|step| step.ok);

        required_ok && redundant_ok
    }

    pub fn failure_summary(&self) -> String {
        let failed: Vec<String> = self
            .steps
            .iter()
            .filter(|step| !step.ok)
            .map(|step| match &step.error {
                Some(error) => format!("{}: {error}", step.name),
                None => step.name.to_string(),
            })
            .collect();
        failed.join("; ")
    }
}
