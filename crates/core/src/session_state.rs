use crate::error::{PersistenceError, SessionError};
use crate::generic_types::{EndReason, SessionDescriptor, SessionEvent};
use crate::interview::{Interview, Response};
use crate::persistence::{ResponseGateway, RetryPolicy};
use crate::realtime_api::{VoiceConnector, VoiceSession};
use crate::store::InterviewStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Completed,
    Failed,
}

/// Read-only snapshot published on every state, cursor or buffer change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub state: SessionState,
    pub cursor: usize,
    pub total: usize,
    pub captured: usize,
}

impl Progress {
    /// `cursor / total`, or 1.0 once the session completed.
    pub fn fraction(&self) -> f64 {
        if self.state == SessionState::Completed {
            1.0
        } else if self.total == 0 {
            0.0
        } else {
            self.cursor as f64 / self.total as f64
        }
    }
}

/// What a finished session captured and whether it reached the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub end_reason: EndReason,
    /// Question indices with a buffered answer.
    pub captured: Vec<usize>,
    /// Captured indices whose latest answer never reached the store.
    pub unpersisted: Vec<usize>,
}

/// Cooperative cancellation for a running session.
#[derive(Debug, Clone)]
pub struct StopHandle(mpsc::Sender<()>);

impl StopHandle {
    pub fn stop(&self) {
        // A full channel already holds a pending stop request.
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.0.try_send(()) {
            debug!("Stop requested after the session was dropped");
        }
    }
}

struct BufferedAnswer {
    response: Response,
    generation: u64,
    persisted: bool,
}

type WriteResult = (usize, u64, Result<(), PersistenceError>);

/// Drives one interview through a live voice session.
pub struct InterviewSession {
    interview: Interview,
    descriptor: SessionDescriptor,
    connector: Arc<dyn VoiceConnector>,
    store: Arc<dyn InterviewStore>,
    gateway: ResponseGateway,
    state: SessionState,
    cursor: usize,
    buffer: BTreeMap<usize, BufferedAnswer>,
    generation: u64,
    writes: JoinSet<WriteResult>,
    voice: Option<VoiceSession>,
    stop_tx: mpsc::Sender<()>,
    stop_rx: mpsc::Receiver<()>,
    progress_tx: watch::Sender<Progress>,
}

impl InterviewSession {
    pub fn new(
        interview: Interview,
        descriptor: SessionDescriptor,
        connector: Arc<dyn VoiceConnector>,
        store: Arc<dyn InterviewStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (progress_tx, _) = watch::channel(Progress {
            state: SessionState::Idle,
            cursor: 0,
            total: interview.question_count(),
            captured: 0,
        });
        let gateway = ResponseGateway::new(store.clone(), policy);

        Self {
            interview,
            descriptor,
            connector,
            store,
            gateway,
            state: SessionState::Idle,
            cursor: 0,
            buffer: BTreeMap::new(),
            generation: 0,
            writes: JoinSet::new(),
            voice: None,
            stop_tx,
            stop_rx,
            progress_tx,
        }
    }

    pub fn interview_id(&self) -> &str {
        &self.interview.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_tx.clone())
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress_tx.subscribe()
    }

    /// The answer currently buffered for `index`.
    pub fn buffered(&self, index: usize) -> Option<&Response> {
        self.buffer.get(&index).map(|b| &b.response)
    }

    /// Opens a voice session and waits until it is live.
    ///
    /// Allowed from `Idle`, and from `Failed` to retry with a fresh connection.
    /// Answers buffered by an earlier attempt are kept.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Failed) {
            return Err(SessionError::InvalidState {
                op: "start",
                state: self.state,
            });
        }

        // Drop stop requests aimed at an earlier attempt.
        while self.stop_rx.try_recv().is_ok() {}

        self.set_state(SessionState::Connecting);
        info!(interview_id = %self.interview.id, "Connecting voice session");
        let mut voice = self.connector.connect(self.descriptor.clone()).await;

        loop {
            tokio::select! {
                event = voice.next_event() => match event {
                    Some(SessionEvent::SessionStarted { at }) => {
                        self.cursor = 0;
                        self.set_state(SessionState::Active);
                        info!(interview_id = %self.interview.id, started_at = %at, "Voice session started");
                        if let Err(e) = self.store.mark_in_progress(&self.interview.id).await {
                            warn!(interview_id = %self.interview.id, error = %e, "Failed to mark interview in progress");
                        }
                        self.voice = Some(voice);
                        return Ok(());
                    }
                    Some(SessionEvent::SessionEnded { reason, detail }) => {
                        let detail = detail.unwrap_or_else(|| "connection ended".to_string());
                        return Err(self.fail_connect(reason, detail));
                    }
                    None => {
                        return Err(self.fail_connect(
                            EndReason::TransportError,
                            "voice event stream closed".to_string(),
                        ));
                    }
                    Some(other) => {
                        warn!(interview_id = %self.interview.id, "Ignoring {:?} before session start", other);
                    }
                },
                Some(()) = self.stop_rx.recv() => {
                    info!(interview_id = %self.interview.id, "Stop requested while connecting");
                    voice.end();
                    self.set_state(SessionState::Failed);
                    return Err(SessionError::Cancelled);
                }
            }
        }
    }

    /// Processes events until the voice session ends, then flushes the buffer.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let mut voice = match (self.state, self.voice.take()) {
            (SessionState::Active, Some(voice)) => voice,
            (state, voice) => {
                self.voice = voice;
                return Err(SessionError::InvalidState { op: "run", state });
            }
        };

        let mut stopping = false;
        let (reason, detail) = loop {
            tokio::select! {
                biased;
                event = voice.next_event() => match event {
                    Some(SessionEvent::AdvanceQuestion) => self.advance(),
                    Some(SessionEvent::CaptureAnswer { question_index, answer_text }) => {
                        self.capture(question_index, answer_text)
                    }
                    Some(SessionEvent::SessionEnded { reason, detail }) => break (reason, detail),
                    Some(SessionEvent::SessionStarted { .. }) => {
                        debug!(interview_id = %self.interview.id, "Duplicate session start ignored");
                    }
                    None => break (EndReason::TransportError, Some("voice event stream closed".to_string())),
                },
                Some(()) = self.stop_rx.recv(), if !stopping => {
                    info!(interview_id = %self.interview.id, "Stop requested, ending voice session");
                    stopping = true;
                    voice.end();
                }
                Some(joined) = self.writes.join_next(), if !self.writes.is_empty() => {
                    self.settle(joined);
                }
            }
        };

        match reason {
            EndReason::TransportError => warn!(
                interview_id = %self.interview.id,
                detail = detail.as_deref().unwrap_or(""),
                "Voice session lost"
            ),
            _ => info!(interview_id = %self.interview.id, ?reason, "Voice session ended"),
        }

        self.flush().await;
        if let Err(e) = self.store.mark_ended(&self.interview.id, Utc::now()).await {
            warn!(interview_id = %self.interview.id, error = %e, "Failed to record end time");
        }
        self.set_state(SessionState::Completed);

        let outcome = SessionOutcome {
            state: self.state,
            end_reason: reason,
            captured: self.buffer.keys().copied().collect(),
            unpersisted: self
                .buffer
                .iter()
                .filter(|(_, b)| !b.persisted)
                .map(|(i, _)| *i)
                .collect(),
        };
        if !outcome.unpersisted.is_empty() {
            warn!(
                interview_id = %self.interview.id,
                unpersisted = ?outcome.unpersisted,
                "Session finished with answers missing from the store"
            );
        }
        Ok(outcome)
    }

    /// `start` followed by `run`.
    pub async fn conduct(&mut self) -> Result<SessionOutcome, SessionError> {
        self.start().await?;
        self.run().await
    }

    fn fail_connect(&mut self, reason: EndReason, detail: String) -> SessionError {
        warn!(interview_id = %self.interview.id, ?reason, %detail, "Voice session failed to start");
        self.set_state(SessionState::Failed);
        SessionError::Transport { reason, detail }
    }

    fn advance(&mut self) {
        let last = self.interview.question_count().saturating_sub(1);
        if self.cursor < last {
            self.cursor += 1;
            debug!(interview_id = %self.interview.id, cursor = self.cursor, "Advanced question");
        } else {
            debug!(interview_id = %self.interview.id, cursor = self.cursor, "Already on the last question");
        }
        self.publish();
    }

    fn capture(&mut self, index: usize, answer: String) {
        let Some(response) = self.interview.response_for(index, answer) else {
            warn!(
                interview_id = %self.interview.id,
                question_index = index,
                total = self.interview.question_count(),
                "Dropping answer for out-of-range question"
            );
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        self.buffer.insert(
            index,
            BufferedAnswer {
                response: response.clone(),
                generation,
                persisted: false,
            },
        );
        self.publish();

        let gateway = self.gateway.clone();
        let interview_id = self.interview.id.clone();
        self.writes.spawn(async move {
            let result = gateway.write(&interview_id, &response).await;
            (index, generation, result)
        });
    }

    fn settle(&mut self, joined: Result<WriteResult, JoinError>) {
        match joined {
            Ok((index, generation, Ok(()))) => {
                if let Some(entry) = self.buffer.get_mut(&index) {
                    if entry.generation == generation {
                        entry.persisted = true;
                    }
                }
            }
            Ok((index, _, Err(e))) => {
                warn!(
                    interview_id = %self.interview.id,
                    question_index = index,
                    error = %e,
                    "Answer kept in memory only"
                );
            }
            Err(e) => error!(interview_id = %self.interview.id, "Response write task failed: {}", e),
        }
    }

    /// Waits for in-flight writes, then retries anything not yet stored once more.
    async fn flush(&mut self) {
        while let Some(joined) = self.writes.join_next().await {
            self.settle(joined);
        }

        let pending: Vec<Response> = self
            .buffer
            .values()
            .filter(|b| !b.persisted)
            .map(|b| b.response.clone())
            .collect();

        for response in pending {
            let index = response.question_index;
            match self.gateway.write(&self.interview.id, &response).await {
                Ok(()) => {
                    if let Some(entry) = self.buffer.get_mut(&index) {
                        entry.persisted = true;
                    }
                }
                Err(e) => warn!(
                    interview_id = %self.interview.id,
                    question_index = index,
                    error = %e,
                    "Flush could not persist answer"
                ),
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.progress_tx.send_replace(Progress {
            state: self.state,
            cursor: self.cursor,
            total: self.interview.question_count(),
            captured: self.buffer.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::generic_types::VoiceProfile;
    use crate::interview::{InterviewStatus, NewInterview, SessionOrigin, template_defaults};
    use crate::prompts::PromptBook;
    use crate::store::{MockInterviewStore, SqliteInterviewStore};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Replays one scripted event list per `connect`, then waits for hangup and
    /// reports `UserStopped`.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Vec<SessionEvent>>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Vec<SessionEvent>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
            })
        }
    }

    #[async_trait]
    impl VoiceConnector for ScriptedConnector {
        async fn connect(&self, _descriptor: SessionDescriptor) -> VoiceSession {
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(32);
            let (hangup_tx, hangup_rx) = oneshot::channel();
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if hangup_rx.await.is_ok() {
                    let _ = tx.send(SessionEvent::ended(EndReason::UserStopped)).await;
                }
            });
            VoiceSession::new(rx, hangup_tx)
        }
    }

    fn new_interview() -> Interview {
        Interview::new(NewInterview {
            user_id: "user-1".to_string(),
            role: "Platform Engineer".to_string(),
            interview_type: "mixed".to_string(),
            experience: "mid".to_string(),
            technologies: "Kubernetes".to_string(),
            origin: SessionOrigin::Form,
            questions: template_defaults(),
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn session_for(
        interview: &Interview,
        connector: Arc<dyn VoiceConnector>,
        store: Arc<dyn InterviewStore>,
    ) -> InterviewSession {
        let descriptor = SessionDescriptor::for_interview(
            interview,
            &VoiceProfile::default(),
            &PromptBook::default(),
            None,
        );
        InterviewSession::new(interview.clone(), descriptor, connector, store, fast_policy())
    }

    async fn seeded_store() -> (Arc<SqliteInterviewStore>, Interview) {
        let store = Arc::new(SqliteInterviewStore::in_memory().await.unwrap());
        let interview = new_interview();
        store.insert(&interview).await.unwrap();
        (store, interview)
    }

    #[tokio::test]
    async fn out_of_order_captures_are_keyed_by_index() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::capture(1, "answer one"),
            SessionEvent::capture(0, "answer zero"),
            SessionEvent::capture(2, "answer two"),
            SessionEvent::ended(EndReason::Completed),
        ]]);

        let mut session = session_for(&interview, connector, store.clone());
        let outcome = session.conduct().await.unwrap();

        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.end_reason, EndReason::Completed);
        assert_eq!(outcome.captured, vec![0, 1, 2]);
        assert!(outcome.unpersisted.is_empty());

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.responses.len(), 3);
        for (index, text) in [(0, "answer zero"), (1, "answer one"), (2, "answer two")] {
            let response = stored.response(index).unwrap();
            assert_eq!(response.answer_text, text);
            assert_eq!(response.question_text, interview.questions[index].text);
        }
        assert_eq!(stored.status, InterviewStatus::InProgress);
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn advance_is_clamped_to_the_last_question() {
        let (store, interview) = seeded_store().await;
        let mut script = vec![SessionEvent::started()];
        script.extend(std::iter::repeat_n(SessionEvent::AdvanceQuestion, 5));
        script.push(SessionEvent::ended(EndReason::Completed));
        let connector = ScriptedConnector::new(vec![script]);

        let mut session = session_for(&interview, connector, store);
        let progress = session.progress();
        session.conduct().await.unwrap();

        assert_eq!(session.cursor(), 2);
        assert_eq!(progress.borrow().cursor, 2);
        assert_eq!(progress.borrow().fraction(), 1.0);
    }

    #[tokio::test]
    async fn duplicate_capture_keeps_the_latest_answer() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::capture(0, "first take"),
            SessionEvent::capture(0, "second take"),
            SessionEvent::ended(EndReason::Completed),
        ]]);

        let mut session = session_for(&interview, connector, store.clone());
        session.conduct().await.unwrap();

        assert_eq!(session.buffered(0).unwrap().answer_text, "second take");
        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.responses.len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_capture_is_dropped() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::capture(7, "nowhere"),
            SessionEvent::ended(EndReason::Completed),
        ]]);

        let mut session = session_for(&interview, connector, store.clone());
        let outcome = session.conduct().await.unwrap();
        assert!(outcome.captured.is_empty());
        assert!(store.get(&interview.id).await.unwrap().unwrap().responses.is_empty());
    }

    #[tokio::test]
    async fn stop_mid_session_completes_with_partial_answers() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::capture(0, "zero"),
            SessionEvent::capture(1, "one"),
        ]]);

        let mut session = session_for(&interview, connector, store.clone());
        session.start().await.unwrap();

        let stop = session.stop_handle();
        let mut progress = session.progress();
        tokio::spawn(async move {
            let _ = progress.wait_for(|p| p.captured == 2).await;
            stop.stop();
        });

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.end_reason, EndReason::UserStopped);

        let stored = store.get(&interview.id).await.unwrap().unwrap();
        assert_eq!(stored.responses.len(), 2);
        assert!(stored.feedback_details.is_none());
        assert_eq!(stored.overall_score, None);
        assert_eq!(stored.status, InterviewStatus::InProgress);
    }

    #[tokio::test]
    async fn transport_error_while_connecting_allows_restart() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![
            vec![SessionEvent::transport_error("socket reset")],
            vec![
                SessionEvent::started(),
                SessionEvent::capture(0, "retry worked"),
                SessionEvent::ended(EndReason::Completed),
            ],
        ]);

        let mut session = session_for(&interview, connector, store.clone());
        let err = session.start().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.state(), SessionState::Failed);

        let outcome = session.conduct().await.unwrap();
        assert_eq!(outcome.captured, vec![0]);
        assert_eq!(store.get(&interview.id).await.unwrap().unwrap().responses.len(), 1);
    }

    #[tokio::test]
    async fn stop_while_connecting_cancels() {
        let (store, interview) = seeded_store().await;
        // The provider never reports a start.
        let connector = ScriptedConnector::new(vec![vec![]]);

        let mut session = session_for(&interview, connector, store);
        let stop = session.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.stop();
        });

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn run_and_start_guard_their_states() {
        let (store, interview) = seeded_store().await;
        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::ended(EndReason::Completed),
        ]]);
        let mut session = session_for(&interview, connector, store);

        assert!(matches!(
            session.run().await,
            Err(SessionError::InvalidState { op: "run", state: SessionState::Idle })
        ));
        session.conduct().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(SessionError::InvalidState { op: "start", state: SessionState::Completed })
        ));
    }

    #[tokio::test]
    async fn persistence_failure_does_not_abort_the_session() {
        let interview = new_interview();
        let mut store = MockInterviewStore::new();
        store.expect_mark_in_progress().returning(|_| Ok(()));
        store.expect_mark_ended().returning(|_, _| Ok(()));
        store
            .expect_upsert_response()
            .returning(|_, _| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let connector = ScriptedConnector::new(vec![vec![
            SessionEvent::started(),
            SessionEvent::capture(0, "lost"),
            SessionEvent::capture(1, "also lost"),
            SessionEvent::ended(EndReason::Completed),
        ]]);

        let mut session = session_for(&interview, connector, Arc::new(store));
        let outcome = session.conduct().await.unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.captured, vec![0, 1]);
        assert_eq!(outcome.unpersisted, vec![0, 1]);
        assert_eq!(session.buffered(1).unwrap().answer_text, "also lost");
    }
}
