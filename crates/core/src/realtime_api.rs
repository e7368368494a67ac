use crate::generic_types::{SessionDescriptor, SessionEvent};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// A trait abstracting a real-time voice-conversation provider.
///
/// `connect` never fails outright: a connection that cannot be established is
/// reported as `SessionEnded(TransportError)` on the returned session's event
/// stream, so the orchestrator handles every transport failure the same way.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, descriptor: SessionDescriptor) -> VoiceSession;
}

/// A live connection: an ordered event stream plus a way to hang up.
pub struct VoiceSession {
    events: mpsc::Receiver<SessionEvent>,
    hangup: Option<oneshot::Sender<()>>,
}

impl VoiceSession {
    pub fn new(events: mpsc::Receiver<SessionEvent>, hangup: oneshot::Sender<()>) -> Self {
        Self {
            events,
            hangup: Some(hangup),
        }
    }

    /// A session that reports a transport error and nothing else.
    pub fn failed(detail: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity is 1 and the channel is fresh, so this cannot fail.
        let _ = tx.try_send(SessionEvent::transport_error(detail));
        Self {
            events: rx,
            hangup: None,
        }
    }

    /// Next event in emission order, or `None` once the provider is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Requests teardown. The provider answers with `SessionEnded(UserStopped)`.
    pub fn end(&mut self) {
        if let Some(hangup) = self.hangup.take() {
            if hangup.send(()).is_err() {
                tracing::debug!("Voice session already torn down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic_types::EndReason;

    #[tokio::test]
    async fn failed_session_reports_transport_error_then_closes() {
        let mut session = VoiceSession::failed("dns lookup failed");
        match session.next_event().await {
            Some(SessionEvent::SessionEnded { reason, detail }) => {
                assert_eq!(reason, EndReason::TransportError);
                assert_eq!(detail.as_deref(), Some("dns lookup failed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn end_signals_hangup_once() {
        let (_tx, rx) = mpsc::channel(1);
        let (hangup_tx, hangup_rx) = oneshot::channel();
        let mut session = VoiceSession::new(rx, hangup_tx);
        session.end();
        session.end();
        assert!(hangup_rx.await.is_ok());
    }
}
