use crate::types::assistant::AssistantConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.start")]
    SessionStart(SessionStartEvent),
    #[serde(rename = "session.end")]
    SessionEnd,
}

/// Starts a conversation from either an inline assistant or a stored workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SessionStartEvent {
    pub fn with_assistant(assistant: AssistantConfig) -> Self {
        Self {
            metadata: assistant.metadata.clone(),
            assistant: Some(assistant),
            workflow_id: None,
        }
    }

    pub fn with_workflow(workflow_id: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            assistant: None,
            workflow_id: Some(workflow_id.into()),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthesized locally when the socket closes.
    #[serde(rename = "close")]
    Close { reason: Option<String> },
    #[serde(rename = "call-start")]
    CallStart,
    #[serde(rename = "call-end", rename_all = "camelCase")]
    CallEnd {
        #[serde(default)]
        ended_reason: Option<String>,
    },
    #[serde(rename = "status-update", rename_all = "camelCase")]
    StatusUpdate {
        status: String,
        #[serde(default)]
        ended_reason: Option<String>,
    },
    #[serde(rename = "tool-calls", rename_all = "camelCase")]
    ToolCalls {
        #[serde(default)]
        tool_call_list: Vec<ToolCall>,
    },
    #[serde(rename = "message")]
    Message {
        role: String,
        #[serde(default)]
        content: Option<String>,
    },
    #[serde(rename = "transcript", rename_all = "camelCase")]
    Transcript {
        role: String,
        transcript: String,
        #[serde(default)]
        transcript_type: Option<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Either a JSON object or a string containing one.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl FunctionCall {
    /// Arguments as an object, decoding string-encoded JSON.
    pub fn arguments_object(&self) -> serde_json::Value {
        match &self.arguments {
            serde_json::Value::String(raw) => {
                serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
            }
            other => other.clone(),
        }
    }
}
