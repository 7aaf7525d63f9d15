use serde::{Deserialize, Serialize};

use crate::domain::{ElementId, GuidanceSnapshot, RegisteredElement};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GuidanceEvent {
    ElementRegistered {
        element: RegisteredElement,
    },
    StateChanged {
        snapshot: GuidanceSnapshot,
    },
    UtteranceStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element_id: Option<ElementId>,
        text: String,
    },
    UtteranceFinished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element_id: Option<ElementId>,
    },
    SpeechFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element_id: Option<ElementId>,
        reason: String,
    },
    Finished,
}

impl GuidanceEvent {
    pub fn snapshot(&self) -> Option<&GuidanceSnapshot> {
        match self {
            GuidanceEvent::StateChanged { snapshot } => Some(snapshot),
            _ => None,
        }
    }
}
