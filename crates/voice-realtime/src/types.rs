//! Wire format of the voice-conversation service.

pub mod assistant;
pub mod events;

pub use assistant::{
    AssistantConfig, ModelConfig, ModelMessage, ToolConfig, ToolFunction, TranscriberConfig,
    VoiceConfig,
};
pub use events::{ClientEvent, FunctionCall, ServerEvent, SessionStartEvent, ToolCall};
