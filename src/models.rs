//! Domain records shared by the engine, the aggregator and persistence

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who speaks a step of the script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    User,
    #[default]
    Agent,
    System,
}

/// Customer the collected answers are delivered to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub email: String,
}

/// One turn of the script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub text: String,
    /// Pre-recorded prompt; when set it is played instead of speaking `text`
    #[serde(default, alias = "audioFile", skip_serializing_if = "Option::is_none")]
    pub audio_prompt: Option<String>,
    pub purpose: String,
    #[serde(default)]
    pub user_type: UserType,
}

#[allow(dead_code)] // Used in tests
impl Step {
    pub fn new(text: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio_prompt: None,
            purpose: purpose.into(),
            user_type: UserType::Agent,
        }
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_prompt = Some(url.into());
        self
    }
}

/// Ordered script driving one type of call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Deterministic script; otherwise responses come from the advanced responder
    #[serde(default)]
    pub simple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    pub steps: Vec<Step>,
}

impl Ruleset {
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Check the structural requirements for an uploaded ruleset
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("ruleset id must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return Err("ruleset must contain at least one step".to_string());
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.purpose.trim().is_empty() {
                return Err(format!("step {index} has no purpose"));
            }
            if step.text.trim().is_empty() && step.audio_prompt.is_none() {
                return Err(format!("step {index} has neither text nor an audio prompt"));
            }
        }
        Ok(())
    }
}

/// A saved call recording attributed to the question it answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub url: String,
    pub purpose: String,
}

/// Persisted progress of one call; `id` is the platform's call control id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub ruleset_id: String,
    pub responses: HashMap<String, String>,
    pub recordings: Vec<Recording>,
    pub done: bool,
}

impl Conversation {
    #[allow(dead_code)] // Used in tests
    pub fn new(id: impl Into<String>, ruleset_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ruleset_id: ruleset_id.into(),
            responses: HashMap::new(),
            recordings: Vec::new(),
            done: false,
        }
    }
}
