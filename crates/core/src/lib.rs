pub mod error;
pub mod feedback;
pub mod generic_types;
pub mod interview;
pub mod parsing;
pub mod persistence;
pub mod prompts;
pub mod realtime_api;
pub mod reviewer;
pub mod session_state;
pub mod store;

pub use error::{PersistenceError, PipelineError, ScoringError, SessionError, StoreError};
pub use generic_types::{EndReason, SessionDescriptor, SessionEvent, VoiceProfile};
pub use interview::{Interview, InterviewStatus, Question, Response, SessionOrigin};
pub use realtime_api::{VoiceConnector, VoiceSession};
pub use reviewer::Scorer;
pub use store::{InterviewStore, SqliteInterviewStore};
