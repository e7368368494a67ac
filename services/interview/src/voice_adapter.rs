use crate::config::VoiceSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::generic_types::{
    EndReason, NEXT_QUESTION_TOOL, SAVE_RESPONSE_TOOL, SessionDescriptor, SessionEvent,
};
use interview_core::realtime_api::{VoiceConnector, VoiceSession};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use voice_realtime::types::{
    AssistantConfig, ModelConfig, ModelMessage, ServerEvent, SessionStartEvent, ToolConfig,
    TranscriberConfig, VoiceConfig,
};
use voice_realtime::{Client, ServerRx};

/// How long to wait for the provider to confirm a local hangup.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// An adapter that implements the generic `VoiceConnector` trait over the
/// `voice_realtime` websocket client.
pub struct RealtimeVoiceConnector {
    base_url: Option<String>,
    api_key: SecretString,
    capacity: usize,
    stop_grace: Duration,
}

impl RealtimeVoiceConnector {
    pub fn new(settings: &VoiceSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            api_key: SecretString::from(settings.api_key.expose_secret()),
            capacity: 256,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    async fn open(&self, descriptor: &SessionDescriptor) -> Result<(Client, ServerRx)> {
        let mut builder = voice_realtime::Config::builder()
            .with_api_key(SecretString::from(self.api_key.expose_secret()));
        if let Some(url) = &self.base_url {
            builder = builder.with_base_url(url);
        }

        let mut client = voice_realtime::connect_with_config(self.capacity, builder.build())
            .await
            .context("Failed to connect to voice service")?;
        // Subscribe before starting so `call-start` cannot be missed.
        let server_rx = client.server_events()?;
        client
            .start_session(session_start(descriptor))
            .await
            .context("Failed to send session start")?;
        Ok((client, server_rx))
    }
}

#[async_trait]
impl VoiceConnector for RealtimeVoiceConnector {
    async fn connect(&self, descriptor: SessionDescriptor) -> VoiceSession {
        match self.open(&descriptor).await {
            Ok((client, server_rx)) => {
                let (tx, rx) = mpsc::channel(128);
                let (hangup_tx, hangup_rx) = oneshot::channel();
                tokio::spawn(pump(client, server_rx, tx, hangup_rx, self.stop_grace));
                VoiceSession::new(rx, hangup_tx)
            }
            Err(e) => {
                tracing::error!(
                    interview_id = descriptor.interview_id().unwrap_or(""),
                    "Voice session could not be opened: {:#}",
                    e
                );
                VoiceSession::failed(format!("{e:#}"))
            }
        }
    }
}

/// Maps the descriptor onto a `session.start`. A workflow reference replaces
/// the inline assistant entirely.
pub fn session_start(descriptor: &SessionDescriptor) -> SessionStartEvent {
    if let Some(workflow_id) = &descriptor.workflow_ref {
        return SessionStartEvent::with_workflow(workflow_id, descriptor.metadata.clone());
    }

    let profile = &descriptor.profile;
    SessionStartEvent::with_assistant(AssistantConfig {
        name: descriptor.name.clone(),
        first_message: descriptor.opening_utterance.clone(),
        transcriber: TranscriberConfig {
            provider: profile.transcriber_provider.clone(),
            model: profile.transcriber_model.clone(),
            language: Some(profile.language.clone()),
        },
        voice: VoiceConfig {
            provider: profile.voice_provider.clone(),
            voice_id: profile.voice_id.clone(),
        },
        model: ModelConfig {
            provider: profile.llm_provider.clone(),
            model: profile.llm_model.clone(),
            messages: vec![ModelMessage::system(&descriptor.instructions)],
            tools: descriptor
                .tools
                .iter()
                .map(|t| ToolConfig::function(&t.name, &t.description, t.parameters.clone()))
                .collect(),
        },
        metadata: descriptor.metadata.clone(),
        silence_timeout_seconds: Some(profile.silence_timeout_secs),
        max_duration_seconds: Some(profile.max_duration_secs),
    })
}

/// Forwards translated provider events until the session ends.
///
/// Exactly one `SessionEnded` is emitted. After a local hangup the provider
/// gets `stop_grace` to confirm before `UserStopped` is reported anyway.
async fn pump(
    mut client: Client,
    mut server_rx: ServerRx,
    tx: mpsc::Sender<SessionEvent>,
    mut hangup_rx: oneshot::Receiver<()>,
    stop_grace: Duration,
) {
    let mut local_end = false;
    let mut deadline: Option<Instant> = None;

    'pump: loop {
        tokio::select! {
            _ = &mut hangup_rx, if !local_end => {
                local_end = true;
                deadline = Some(Instant::now() + stop_grace);
                if let Err(e) = client.end_session().await {
                    tracing::warn!("Failed to send session end: {}", e);
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                tracing::debug!("Provider did not confirm hangup in time");
                let _ = tx.send(SessionEvent::ended(EndReason::UserStopped)).await;
                break 'pump;
            }
            received = server_rx.recv() => match received {
                Ok(event) => {
                    for translated in translate(&event, local_end) {
                        let terminal = matches!(translated, SessionEvent::SessionEnded { .. });
                        if tx.send(translated).await.is_err() {
                            tracing::debug!("Voice session receiver dropped, stopping pump");
                            break 'pump;
                        }
                        if terminal {
                            break 'pump;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Voice event pump lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => {
                    let event = if local_end {
                        SessionEvent::ended(EndReason::UserStopped)
                    } else {
                        SessionEvent::transport_error("voice connection closed")
                    };
                    let _ = tx.send(event).await;
                    break 'pump;
                }
            }
        }
    }

    client.disconnect();
}

/// Translates one provider event. Transcripts and assistant chatter carry no
/// orchestration meaning and are dropped.
pub fn translate(event: &ServerEvent, local_end: bool) -> Vec<SessionEvent> {
    match event {
        ServerEvent::CallStart => vec![SessionEvent::started()],
        ServerEvent::CallEnd { ended_reason } => {
            vec![ended(ended_reason.as_deref(), local_end)]
        }
        ServerEvent::StatusUpdate {
            status,
            ended_reason,
        } if status == "ended" => vec![ended(ended_reason.as_deref(), local_end)],
        ServerEvent::StatusUpdate { .. } => vec![],
        ServerEvent::ToolCalls { tool_call_list } => tool_call_list
            .iter()
            .filter_map(|call| tool_event(&call.function.name, &call.function.arguments_object()))
            .collect(),
        ServerEvent::Message { role, content } if role == "function" => content
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|payload| {
                let action = payload.get("action")?.as_str()?.to_string();
                tool_event(&action, &payload)
            })
            .into_iter()
            .collect(),
        ServerEvent::Message { .. } | ServerEvent::Transcript { .. } => vec![],
        ServerEvent::Error { message } => vec![SessionEvent::transport_error(message.clone())],
        ServerEvent::Close { reason } => {
            if local_end {
                vec![SessionEvent::ended(EndReason::UserStopped)]
            } else {
                vec![SessionEvent::transport_error(
                    reason
                        .clone()
                        .unwrap_or_else(|| "voice connection closed".to_string()),
                )]
            }
        }
    }
}

fn ended(reason: Option<&str>, local_end: bool) -> SessionEvent {
    if local_end {
        return SessionEvent::ended(EndReason::UserStopped);
    }
    match reason {
        Some(r) if r.contains("error") || r.contains("failed") => SessionEvent::transport_error(r),
        // Silence and max-duration limits end the call normally.
        _ => SessionEvent::SessionEnded {
            reason: EndReason::Completed,
            detail: reason.map(str::to_string),
        },
    }
}

/// Maps a tool invocation onto a session event. Malformed calls are dropped.
pub fn tool_event(name: &str, args: &Value) -> Option<SessionEvent> {
    match name {
        NEXT_QUESTION_TOOL => Some(SessionEvent::AdvanceQuestion),
        SAVE_RESPONSE_TOOL => {
            let Some(index) = args.get("questionIndex").and_then(question_index) else {
                tracing::warn!("saveResponse without a usable questionIndex: {}", args);
                return None;
            };
            let Some(answer) = args.get("response").and_then(Value::as_str) else {
                tracing::warn!("saveResponse without a response for question {}", index);
                return None;
            };
            Some(SessionEvent::capture(index, answer))
        }
        other => {
            tracing::debug!("Ignoring unknown tool call '{}'", other);
            None
        }
    }
}

/// Accepts `2`, `2.0` and `"2"`.
fn question_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(i) => usize::try_from(i).ok(),
            None => n
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as usize),
        },
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
