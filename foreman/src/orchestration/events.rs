//! Inbound agent events reported by the supervisor

#![allow(missing_docs)]

use super::*;
use crate::coordination::MAX_SASS_LEVEL;

/// Something that happened to, or was done by, an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    TaskAssigned {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
        #[serde(alias = "duration")]
        duration_secs: f64,
    },
    TaskFailed {
        task_id: String,
        #[serde(alias = "duration")]
        duration_secs: f64,
    },
    Error {
        #[serde(alias = "error")]
        error_type: String,
    },
    /// The agent is blocking someone
    Blocker,
    SassDelivered {
        level: u8,
    },
    Commendation {
        reason: String,
    },
    Strike {
        reason: String,
    },
    Downtime {
        secs: f64,
    },
    Collaboration {
        delta: f64,
    },
    Innovation {
        delta: f64,
    },
}

impl AgentEvent {
    /// Parse an event from its kind and a JSON object of fields.
    ///
    /// ```
    /// use foreman::orchestration::AgentEvent;
    /// use serde_json::json;
    ///
    /// let event = AgentEvent::from_kind("task_completed", &json!({"task_id": "T-7", "duration": 4.5})).unwrap();
    /// assert_eq!(event, AgentEvent::TaskCompleted { task_id: "T-7".into(), duration_secs: 4.5 });
    /// ```
    pub fn from_kind(kind: &str, data: &serde_json::Value) -> Result<Self> {
        let mut object = match data {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(OrchestrationError::InvalidEvent(format!(
                    "event data for '{}' must be an object, got {}",
                    kind, other
                )));
            }
        };
        object.insert("kind".to_string(), serde_json::Value::String(kind.to_string()));

        let event: Self = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| OrchestrationError::InvalidEvent(format!("{}: {}", kind, e)))?;
        event.validate()?;
        Ok(event)
    }

    /// snake_case event kind, as accepted by [`AgentEvent::from_kind`]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::Error { .. } => "error",
            Self::Blocker => "blocker",
            Self::SassDelivered { .. } => "sass_delivered",
            Self::Commendation { .. } => "commendation",
            Self::Strike { .. } => "strike",
            Self::Downtime { .. } => "downtime",
            Self::Collaboration { .. } => "collaboration",
            Self::Innovation { .. } => "innovation",
        }
    }

    /// Reject values the recorders cannot take.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(OrchestrationError::InvalidEvent(msg)) };
        match self {
            Self::TaskAssigned { task_id }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
                if task_id.trim().is_empty() =>
            {
                invalid(format!("{}: task_id must not be empty", self.kind()))
            }
            Self::TaskCompleted { duration_secs, .. } | Self::TaskFailed { duration_secs, .. }
                if !duration_secs.is_finite() || *duration_secs < 0.0 =>
            {
                invalid(format!("{}: bad duration {}", self.kind(), duration_secs))
            }
            Self::SassDelivered { level } if *level > MAX_SASS_LEVEL => {
                invalid(format!("sass level {} exceeds {}", level, MAX_SASS_LEVEL))
            }
            Self::Downtime { secs } if !secs.is_finite() || *secs < 0.0 => {
                invalid(format!("downtime: bad duration {}", secs))
            }
            Self::Collaboration { delta } | Self::Innovation { delta } if !delta.is_finite() => {
                invalid(format!("{}: delta must be finite", self.kind()))
            }
            _ => Ok(()),
        }
    }
}
