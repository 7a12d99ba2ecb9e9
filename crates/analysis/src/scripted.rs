//! Deterministic vision client for tests/dev.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use inspecta_core::{Condition, Issue, PhotoId};

use crate::vision::{PhotoAssessment, SpaceClassification, VisionClient, VisionError};

/// Pre-scripted result for one photo.
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub space: String,
    pub condition: Condition,
    pub issues: Vec<Issue>,
    /// When set, any call for this photo fails with this message.
    pub fail_with: Option<String>,
}

impl ScriptedOutcome {
    pub fn space(space: impl Into<String>, condition: Condition) -> Self {
        Self {
            space: space.into(),
            condition,
            issues: Vec::new(),
            fail_with: None,
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            space: String::new(),
            condition: Condition::Unrated,
            issues: Vec::new(),
            fail_with: Some(message.into()),
        }
    }
}

/// Vision client that replays scripted outcomes, recording call order.
///
/// Photos without a script resolve to an unremarkable `Good` living room so
/// dev flows work without setup.
#[derive(Debug, Default)]
pub struct ScriptedVisionClient {
    outcomes: HashMap<PhotoId, ScriptedOutcome>,
    calls: Mutex<Vec<PhotoId>>,
}

impl ScriptedVisionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, photo: PhotoId, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(photo, outcome);
        self
    }

    /// Photos assessed so far, in call order.
    pub fn assessed(&self) -> Vec<PhotoId> {
        self.calls.lock().unwrap().clone()
    }

    fn outcome_for(&self, photo: PhotoId) -> Result<ScriptedOutcome, VisionError> {
        let outcome = self
            .outcomes
            .get(&photo)
            .cloned()
            .unwrap_or_else(|| ScriptedOutcome::space("Living Room", Condition::Good));
        if let Some(message) = outcome.fail_with {
            return Err(VisionError::Rejected(photo, message));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl VisionClient for ScriptedVisionClient {
    async fn classify_space(&self, photo: PhotoId) -> Result<SpaceClassification, VisionError> {
        let outcome = self.outcome_for(photo)?;
        Ok(SpaceClassification {
            space: outcome.space,
            confidence: 0.92,
        })
    }

    async fn assess_photo(
        &self,
        photo: PhotoId,
        _space: &str,
    ) -> Result<PhotoAssessment, VisionError> {
        let outcome = self.outcome_for(photo)?;
        self.calls.lock().unwrap().push(photo);
        Ok(PhotoAssessment {
            condition: outcome.condition,
            issues: outcome.issues,
        })
    }
}
