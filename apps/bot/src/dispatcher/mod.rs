//! Routes inbound events through the state machine and performs
//! the resulting effects.
//!
//! # Ordering
//! Each user gets a lane: an unbounded channel drained by one task, so that
//! user's events are handled strictly in arrival order while other users run
//! concurrently. Lanes are created on first use and retire after sitting idle.
//!
//! # Long-running work
//! Rewrite + render never run on a lane. `BeginRewrite` spawns a task; its
//! outcome re-enters the user's lane as `LaneEvent::RewriteFinished`, so the
//! machine sees it like any other input.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::session::step_of;
use crate::conversation::{transition, ButtonAction, Effect, Input, RewriteJob, Session};
use crate::errors::BotError;
use crate::extract::{extract_upload, DocumentFormat, ExtractError, ExtractOptions, ExtractedDocument};
use crate::render::{render_artifact, Artifact};
use crate::rewrite::rewrite_resume;
use crate::state::AppState;
use crate::transport::{
    Attachment, ChatId, ChatTransport, Command, InboundEvent, InboundKind, MessageRef, UserId,
};

const LANE_IDLE: Duration = Duration::from_secs(300);

const DELIVERY_FAILED: &str =
    "⚠️ Your resume is ready but I couldn't send the file. Tap below to send your resume again.";

#[derive(Debug)]
pub enum LaneEvent {
    Inbound(InboundEvent),
    RewriteFinished {
        user_id: UserId,
        chat_id: ChatId,
        run_id: Uuid,
        outcome: Result<Artifact, BotError>,
    },
}

impl LaneEvent {
    fn user_id(&self) -> UserId {
        match self {
            LaneEvent::Inbound(event) => event.user_id,
            LaneEvent::RewriteFinished { user_id, .. } => *user_id,
        }
    }

    fn chat_id(&self) -> ChatId {
        match self {
            LaneEvent::Inbound(event) => event.chat_id,
            LaneEvent::RewriteFinished { chat_id, .. } => *chat_id,
        }
    }
}

struct Lane {
    id: Uuid,
    tx: mpsc::UnboundedSender<LaneEvent>,
}

struct Inner {
    state: AppState,
    lanes: DashMap<UserId, Lane>,
    lane_idle: Duration,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(state: AppState) -> Self {
        Self::with_lane_idle(state, LANE_IDLE)
    }

    pub fn with_lane_idle(state: AppState, lane_idle: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                lanes: DashMap::new(),
                lane_idle,
            }),
        }
    }

    fn state(&self) -> &AppState {
        &self.inner.state
    }

    fn transport(&self) -> &dyn ChatTransport {
        self.inner.state.transport.as_ref()
    }

    /// Queues an inbound event on its user's lane. Never blocks.
    pub fn dispatch(&self, event: InboundEvent) {
        self.enqueue(LaneEvent::Inbound(event));
    }

    fn enqueue(&self, event: LaneEvent) {
        let user_id = event.user_id();
        // The entry guard holds the shard lock across the send, which is what
        // makes lane retirement in `run_lane` race-free.
        let mut lane = self
            .inner
            .lanes
            .entry(user_id)
            .or_insert_with(|| self.spawn_lane(user_id));

        if let Err(mpsc::error::SendError(event)) = lane.tx.send(event) {
            warn!("Lane for user {user_id} was closed; starting a new one");
            *lane = self.spawn_lane(user_id);
            if lane.tx.send(event).is_err() {
                warn!("Dropping event for user {user_id}: lane closed immediately");
            }
        }
    }

    fn spawn_lane(&self, user_id: UserId) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        debug!("Opening lane {id} for user {user_id}");
        tokio::spawn(self.clone().run_lane(user_id, id, rx));
        Lane { id, tx }
    }

    async fn run_lane(self, user_id: UserId, lane_id: Uuid, mut rx: mpsc::UnboundedReceiver<LaneEvent>) {
        loop {
            match tokio::time::timeout(self.inner.lane_idle, rx.recv()).await {
                Ok(Some(event)) => self.handle(event).await,
                Ok(None) => break,
                Err(_) => {
                    let retired = self
                        .inner
                        .lanes
                        .remove_if(&user_id, |_, lane| lane.id == lane_id && rx.is_empty())
                        .is_some();
                    if retired {
                        debug!("Lane {lane_id} for user {user_id} retired after idling");
                        break;
                    }
                }
            }
        }
    }

    /// Handles one event and converts any failure into a user-facing reply.
    /// Errors stop here; they never reach the lane or the polling loop.
    pub async fn handle(&self, event: LaneEvent) {
        let user_id = event.user_id();
        let chat_id = event.chat_id();

        if let Err(err) = self.process(event).await {
            warn!("Event for user {user_id} failed: {err}");
            if let Err(send_err) = self
                .transport()
                .send_text(chat_id, &err.user_message(), &[])
                .await
            {
                warn!("Could not report failure to user {user_id}: {send_err}");
            }
        }
    }

    pub async fn process(&self, event: LaneEvent) -> Result<(), BotError> {
        match event {
            LaneEvent::Inbound(InboundEvent {
                user_id,
                chat_id,
                kind,
            }) => {
                let (input, origin) = match kind {
                    InboundKind::Command(Command::Start) => (Input::Start, None),
                    InboundKind::Callback {
                        callback_id,
                        token,
                        origin,
                    } => {
                        if let Err(e) = self.transport().acknowledge(&callback_id).await {
                            warn!("Failed to acknowledge button press: {e}");
                        }
                        match ButtonAction::from_token(&token) {
                            Some(action) => (Input::Button(action), origin),
                            None => {
                                warn!("Ignoring unknown button token {token:?} from user {user_id}");
                                return Ok(());
                            }
                        }
                    }
                    InboundKind::Message { text, attachment } => {
                        let current = self.state().store.get(user_id).await?;
                        let input = if current.as_ref().is_some_and(Session::accepts_submission) {
                            Input::Submission(self.extract_submission(text, attachment).await)
                        } else {
                            Input::Message
                        };
                        (input, None)
                    }
                };
                self.apply(user_id, chat_id, origin, input).await
            }
            LaneEvent::RewriteFinished {
                user_id,
                chat_id,
                run_id,
                outcome,
            } => {
                self.apply(user_id, chat_id, None, Input::RewriteFinished { run_id, outcome })
                    .await
            }
        }
    }

    /// Turns a message into text: an attached file wins over message text.
    async fn extract_submission(
        &self,
        text: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<ExtractedDocument, BotError> {
        let config = &self.state().config;

        let Some(attachment) = attachment else {
            // Photos, stickers and the like carry neither.
            return text.map(ExtractedDocument::from_message).ok_or_else(|| {
                BotError::InvalidInput("Please send text or a PDF, DOCX, MD, or TXT file.".to_string())
            });
        };

        // Reject by name and declared size before spending a download on it.
        DocumentFormat::from_file_name(&attachment.file_name)?;
        let limit = config.max_upload_bytes;
        if let Some(size) = attachment.size.filter(|&size| size > limit) {
            return Err(ExtractError::TooLarge { size, limit }.into());
        }

        let bytes = self.transport().fetch_attachment(&attachment).await?;
        let size = bytes.len() as u64;
        if size > limit {
            return Err(ExtractError::TooLarge { size, limit }.into());
        }

        let options = ExtractOptions {
            markdown_mode: config.markdown_mode,
        };
        let document =
            extract_upload(attachment.file_name, bytes, options, config.extraction_timeout).await?;
        debug!(
            "Extracted {} chars from {:?}",
            document.text.chars().count(),
            document.source
        );
        Ok(document)
    }

    async fn apply(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        origin: Option<MessageRef>,
        input: Input,
    ) -> Result<(), BotError> {
        let now = Utc::now();
        let mut effects = Vec::new();

        let stored = self
            .state()
            .store
            .update(
                user_id,
                Box::new(|current| {
                    let outcome = transition(user_id, current, input, now);
                    effects = outcome.effects;
                    outcome.session
                }),
            )
            .await?;

        info!(
            user_id = %user_id,
            step = %step_of(stored.as_ref()),
            effects = effects.len(),
            "Session transition"
        );
        self.perform(user_id, chat_id, origin, effects).await;
        Ok(())
    }

    /// Runs every effect even if an earlier one fails, so a lost message can
    /// never strand a session in `Optimizing` without its rewrite task.
    async fn perform(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        origin: Option<MessageRef>,
        effects: Vec<Effect>,
    ) {
        for effect in effects {
            match effect {
                Effect::Reply(reply) => {
                    if let Err(e) = self
                        .transport()
                        .send_text(chat_id, &reply.text, &reply.buttons)
                        .await
                    {
                        warn!("Failed to send reply to user {user_id}: {e}");
                    }
                }
                Effect::EditOrigin(reply) => {
                    let edited = match origin {
                        Some(message) => self
                            .transport()
                            .edit_text(message, &reply.text, &reply.buttons)
                            .await
                            .map_err(|e| warn!("Edit failed for user {user_id}, sending instead: {e}"))
                            .is_ok(),
                        None => false,
                    };
                    if !edited {
                        if let Err(e) = self
                            .transport()
                            .send_text(chat_id, &reply.text, &reply.buttons)
                            .await
                        {
                            warn!("Failed to send reply to user {user_id}: {e}");
                        }
                    }
                }
                Effect::BeginRewrite(job) => self.spawn_rewrite(user_id, chat_id, job),
                Effect::DeliverArtifact(artifact) => {
                    match self.transport().send_document(chat_id, &artifact).await {
                        Ok(()) => info!(
                            "Delivered {} ({} bytes) to user {user_id}",
                            artifact.file_name,
                            artifact.bytes.len()
                        ),
                        Err(e) => {
                            warn!("Failed to deliver document to user {user_id}: {e}");
                            let retry = [ButtonAction::Resume.button()];
                            if let Err(e) = self
                                .transport()
                                .send_text(chat_id, DELIVERY_FAILED, &retry)
                                .await
                            {
                                warn!("Failed to report delivery failure to user {user_id}: {e}");
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn_rewrite(&self, user_id: UserId, chat_id: ChatId, job: RewriteJob) {
        let dispatcher = self.clone();
        info!("Starting rewrite {} for user {user_id}", job.run_id);

        tokio::spawn(async move {
            let outcome = dispatcher.run_rewrite(&job).await;
            if let Err(e) = &outcome {
                warn!("Rewrite {} for user {user_id} failed: {e}", job.run_id);
            }
            dispatcher.enqueue(LaneEvent::RewriteFinished {
                user_id,
                chat_id,
                run_id: job.run_id,
                outcome,
            });
        });
    }

    async fn run_rewrite(&self, job: &RewriteJob) -> Result<Artifact, BotError> {
        let state = self.state();
        let text = rewrite_resume(
            state.generator.as_ref(),
            &job.job_description,
            &job.resume,
            state.config.generator_timeout,
        )
        .await?;

        // PDF assembly is CPU-bound.
        let page_config = state.page_config.clone();
        let artifact = tokio::task::spawn_blocking(move || render_artifact(&text, &page_config))
            .await
            .map_err(|e| BotError::Internal(anyhow::anyhow!("render task failed: {e}")))??;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::config::Config;
    use crate::conversation::session::Step;
    use crate::conversation::{messages, InMemorySessionStore, SessionStore};
    use crate::llm_client::{GeneratorError, TextGenerator};
    use crate::render::{PageConfig, ARTIFACT_FILE_NAME};
    use crate::transport::{Button, TransportError};

    const USER: UserId = UserId(7);
    const CHAT: ChatId = ChatId(7);

    const JOB: &str = "Senior backend engineer: Rust, Postgres, Kubernetes, 5+ years.";
    const RESUME: &str = "Jane Doe\nBackend engineer, 6 years of Rust and Go. Built payment APIs.";
    const REWRITTEN: &str =
        "JANE DOE\nSenior Backend Engineer\nRust, Postgres, Kubernetes\nBuilt payment APIs.";

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text {
            chat_id: ChatId,
            text: String,
            tokens: Vec<String>,
        },
        Edit {
            message_id: i64,
            text: String,
        },
        Document {
            file_name: String,
            len: usize,
        },
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<Sent>>,
        acks: Mutex<Vec<String>>,
        files: HashMap<String, Bytes>,
        fetches: AtomicUsize,
        fail_edits: bool,
        fail_documents: bool,
    }

    impl FakeTransport {
        fn with_file(mut self, file_id: &str, bytes: &'static [u8]) -> Self {
            self.files.insert(file_id.to_string(), Bytes::from_static(bytes));
            self
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Text { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }

        fn last(&self) -> Sent {
            self.sent().last().cloned().expect("something was sent")
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn send_text(
            &self,
            chat_id: ChatId,
            text: &str,
            buttons: &[Button],
        ) -> Result<MessageRef, TransportError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent::Text {
                chat_id,
                text: text.to_string(),
                tokens: buttons.iter().map(|b| b.token.clone()).collect(),
            });
            Ok(MessageRef {
                chat_id,
                message_id: sent.len() as i64,
            })
        }

        async fn edit_text(
            &self,
            message: MessageRef,
            text: &str,
            _buttons: &[Button],
        ) -> Result<(), TransportError> {
            if self.fail_edits {
                return Err(TransportError::Api {
                    code: Some(400),
                    description: "Bad Request: message can't be edited".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Edit {
                message_id: message.message_id,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn send_document(
            &self,
            _chat_id: ChatId,
            artifact: &Artifact,
        ) -> Result<(), TransportError> {
            if self.fail_documents {
                return Err(TransportError::Api {
                    code: Some(413),
                    description: "Request Entity Too Large".to_string(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Document {
                file_name: artifact.file_name.clone(),
                len: artifact.bytes.len(),
            });
            Ok(())
        }

        async fn acknowledge(&self, callback_id: &str) -> Result<(), TransportError> {
            self.acks.lock().unwrap().push(callback_id.to_string());
            Ok(())
        }

        async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(&attachment.file_id)
                .cloned()
                .ok_or_else(|| TransportError::FileUnavailable(attachment.file_id.clone()))
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            Ok(REWRITTEN.to_string())
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl TextGenerator for StalledGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            std::future::pending().await
        }
    }

    /// Hangs on the first call, answers on every later one.
    #[derive(Default)]
    struct FlakyGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for FlakyGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(REWRITTEN.to_string())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        transport: Arc<FakeTransport>,
        store: Arc<InMemorySessionStore>,
    }

    fn app_state(
        transport: FakeTransport,
        generator: impl TextGenerator + 'static,
        generator_timeout: Duration,
    ) -> (AppState, Arc<FakeTransport>, Arc<InMemorySessionStore>) {
        let mut config = Config::from_lookup(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("test-token".to_string()),
            "GEMINI_API_KEY" => Some("test-key".to_string()),
            _ => None,
        })
        .unwrap();
        config.generator_timeout = generator_timeout;

        let transport = Arc::new(transport);
        let store = Arc::new(InMemorySessionStore::new());
        let state = AppState {
            config,
            store: store.clone(),
            generator: Arc::new(generator),
            transport: transport.clone(),
            page_config: PageConfig::default(),
        };
        (state, transport, store)
    }

    impl Harness {
        fn new(transport: FakeTransport, generator: impl TextGenerator + 'static) -> Self {
            Self::with_timeout(transport, generator, Duration::from_secs(10))
        }

        fn with_timeout(
            transport: FakeTransport,
            generator: impl TextGenerator + 'static,
            generator_timeout: Duration,
        ) -> Self {
            let (state, transport, store) = app_state(transport, generator, generator_timeout);
            Self {
                dispatcher: Dispatcher::new(state),
                transport,
                store,
            }
        }

        async fn send(&self, event: InboundEvent) {
            self.dispatcher
                .process(LaneEvent::Inbound(event))
                .await
                .unwrap();
        }

        async fn step(&self) -> Step {
            step_of(self.store.get(USER).await.unwrap().as_ref())
        }

        async fn wait_until(&self, what: &str, done: impl Fn(&[Sent]) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if done(&self.transport.sent()) {
                    return;
                }
                assert!(Instant::now() < deadline, "timed out waiting for {what}");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        async fn wait_for_document(&self) {
            self.wait_until("document", |sent| {
                sent.iter().any(|s| matches!(s, Sent::Document { .. }))
            })
            .await;
        }

        /// Walks a fresh user up to `waiting_resume`.
        async fn reach_waiting_resume(&self) {
            self.send(start()).await;
            self.send(press("job_desc")).await;
            self.send(text(JOB)).await;
            self.send(press("resume")).await;
            assert_eq!(self.step().await, Step::WaitingResume);
        }
    }

    fn event(user: i64, kind: InboundKind) -> InboundEvent {
        InboundEvent {
            user_id: UserId(user),
            chat_id: ChatId(user),
            kind,
        }
    }

    fn start() -> InboundEvent {
        event(USER.0, InboundKind::Command(Command::Start))
    }

    fn press(token: &str) -> InboundEvent {
        event(
            USER.0,
            InboundKind::Callback {
                callback_id: format!("cb-{token}"),
                token: token.to_string(),
                origin: Some(MessageRef {
                    chat_id: CHAT,
                    message_id: 1,
                }),
            },
        )
    }

    fn text(body: &str) -> InboundEvent {
        event(
            USER.0,
            InboundKind::Message {
                text: Some(body.to_string()),
                attachment: None,
            },
        )
    }

    fn upload(file_id: &str, file_name: &str, size: Option<u64>) -> InboundEvent {
        event(
            USER.0,
            InboundKind::Message {
                text: None,
                attachment: Some(Attachment {
                    file_id: file_id.to_string(),
                    file_name: file_name.to_string(),
                    size,
                }),
            },
        )
    }

    fn has_text(sent: &[Sent], needle: &str) -> bool {
        sent.iter()
            .any(|s| matches!(s, Sent::Text { text, .. } if text.contains(needle)))
    }

    #[tokio::test]
    async fn test_pasted_texts_produce_optimized_pdf() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);

        h.send(start()).await;
        assert_eq!(
            h.transport.last(),
            Sent::Text {
                chat_id: CHAT,
                text: messages::WELCOME.to_string(),
                tokens: vec!["job_desc".to_string()],
            }
        );
        assert_eq!(h.step().await, Step::Idle);

        h.send(press("job_desc")).await;
        assert_eq!(
            h.transport.last(),
            Sent::Edit {
                message_id: 1,
                text: messages::ASK_JOB_DESCRIPTION.to_string(),
            }
        );
        assert_eq!(h.step().await, Step::WaitingJobDesc);

        h.send(text(JOB)).await;
        assert_eq!(
            h.transport.last(),
            Sent::Text {
                chat_id: CHAT,
                text: messages::JOB_DESCRIPTION_RECEIVED.to_string(),
                tokens: vec!["resume".to_string()],
            }
        );
        assert_eq!(h.step().await, Step::WaitingResume);

        h.send(press("resume")).await;
        h.send(text(RESUME)).await;
        assert!(has_text(&h.transport.sent(), messages::OPTIMIZING));

        h.wait_for_document().await;
        match h.transport.last() {
            Sent::Document { file_name, len } => {
                assert_eq!(file_name, ARTIFACT_FILE_NAME);
                assert!(len > 0);
            }
            other => panic!("expected a document, got {other:?}"),
        }
        assert_eq!(h.step().await, Step::Done);
        assert_eq!(
            *h.transport.acks.lock().unwrap(),
            vec!["cb-job_desc".to_string(), "cb-resume".to_string()]
        );
    }

    #[tokio::test]
    async fn test_txt_upload_is_accepted_as_resume() {
        let transport = FakeTransport::default().with_file(
            "file-1",
            b"Jane Doe\nBackend engineer, 6 years of Rust and Go. Built payment APIs.\n",
        );
        let h = Harness::new(transport, FixedGenerator);
        h.reach_waiting_resume().await;

        h.send(upload("file-1", "resume.txt", Some(72))).await;
        h.wait_for_document().await;

        assert_eq!(h.transport.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.step().await, Step::Done);
        let session = h.store.get(USER).await.unwrap().unwrap();
        assert!(session.resume().unwrap().contains("payment APIs"));
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_rejected_before_download() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);
        h.reach_waiting_resume().await;

        h.send(upload("file-2", "report.xlsx", Some(2048))).await;

        let reply = h.transport.texts().pop().unwrap();
        assert!(reply.starts_with(messages::INVALID_RESUME));
        assert!(reply.contains(".xlsx"));
        assert_eq!(h.transport.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.step().await, Step::WaitingResume);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_before_download() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);
        h.send(start()).await;
        h.send(press("job_desc")).await;

        h.send(upload("file-3", "jd.pdf", Some(11 * 1024 * 1024))).await;

        let reply = h.transport.texts().pop().unwrap();
        assert!(reply.starts_with(messages::INVALID_JOB_DESCRIPTION));
        assert!(reply.contains("too large"));
        assert_eq!(h.transport.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.step().await, Step::WaitingJobDesc);
    }

    #[tokio::test]
    async fn test_message_without_text_or_file_is_rejected() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);
        h.send(start()).await;
        h.send(press("job_desc")).await;

        h.send(event(
            USER.0,
            InboundKind::Message {
                text: None,
                attachment: None,
            },
        ))
        .await;

        let reply = h.transport.texts().pop().unwrap();
        assert!(reply.starts_with(messages::INVALID_JOB_DESCRIPTION));
        assert!(reply.contains("PDF, DOCX, MD, or TXT"));
        assert_eq!(h.step().await, Step::WaitingJobDesc);
    }

    #[tokio::test]
    async fn test_generator_timeout_reverts_and_retry_recovers() {
        let h = Harness::with_timeout(
            FakeTransport::default(),
            FlakyGenerator::default(),
            Duration::from_millis(50),
        );
        h.reach_waiting_resume().await;
        h.send(text(RESUME)).await;

        h.wait_until("failure notice", |sent| has_text(sent, messages::RETRY_HINT))
            .await;
        match h.transport.last() {
            Sent::Text { text, tokens, .. } => {
                assert!(text.contains("took too long"));
                assert_eq!(tokens, vec!["retry".to_string()]);
            }
            other => panic!("expected a failure notice, got {other:?}"),
        }
        assert_eq!(h.step().await, Step::WaitingResume);
        assert!(!h
            .transport
            .sent()
            .iter()
            .any(|s| matches!(s, Sent::Document { .. })));

        h.send(press("retry")).await;
        h.wait_for_document().await;
        assert_eq!(h.step().await, Step::Done);
    }

    #[tokio::test]
    async fn test_messages_while_optimizing_get_busy_reply() {
        let h = Harness::new(FakeTransport::default(), StalledGenerator);
        h.reach_waiting_resume().await;
        h.send(text(RESUME)).await;
        assert_eq!(h.step().await, Step::Optimizing);

        h.send(text("hello?")).await;
        assert_eq!(h.transport.texts().pop().unwrap(), messages::STILL_OPTIMIZING);

        h.send(press("job_desc")).await;
        assert_eq!(h.transport.texts().pop().unwrap(), messages::STILL_OPTIMIZING);
        assert_eq!(h.step().await, Step::Optimizing);
    }

    #[tokio::test]
    async fn test_failed_edit_falls_back_to_new_message() {
        let transport = FakeTransport {
            fail_edits: true,
            ..FakeTransport::default()
        };
        let h = Harness::new(transport, FixedGenerator);

        h.send(start()).await;
        h.send(press("job_desc")).await;

        assert_eq!(
            h.transport.last(),
            Sent::Text {
                chat_id: CHAT,
                text: messages::ASK_JOB_DESCRIPTION.to_string(),
                tokens: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_tells_the_user() {
        let transport = FakeTransport {
            fail_documents: true,
            ..FakeTransport::default()
        };
        let h = Harness::new(transport, FixedGenerator);
        h.reach_waiting_resume().await;
        h.send(text(RESUME)).await;

        h.wait_until("delivery notice", |sent| has_text(sent, DELIVERY_FAILED))
            .await;
        match h.transport.last() {
            Sent::Text { tokens, .. } => assert_eq!(tokens, vec!["resume".to_string()]),
            other => panic!("expected a notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_button_is_acknowledged_and_ignored() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);

        h.send(press("bogus")).await;

        assert!(h.transport.sent().is_empty());
        assert_eq!(*h.transport.acks.lock().unwrap(), vec!["cb-bogus".to_string()]);
        assert_eq!(h.step().await, Step::Idle);
    }

    #[tokio::test]
    async fn test_dispatch_preserves_per_user_order() {
        let h = Harness::new(FakeTransport::default(), FixedGenerator);

        for event in [start(), press("job_desc"), text(JOB), press("resume"), text(RESUME)] {
            h.dispatcher.dispatch(event);
        }
        h.wait_for_document().await;

        let texts = h.transport.texts();
        assert_eq!(
            texts,
            vec![
                messages::WELCOME.to_string(),
                messages::JOB_DESCRIPTION_RECEIVED.to_string(),
                messages::OPTIMIZING.to_string(),
            ]
        );
        assert_eq!(h.step().await, Step::Done);
    }

    #[tokio::test]
    async fn test_running_rewrite_does_not_block_other_users() {
        let h = Harness::new(FakeTransport::default(), StalledGenerator);
        h.reach_waiting_resume().await;
        h.dispatcher.dispatch(text(RESUME));
        h.wait_until("optimizing reply", |sent| has_text(sent, messages::OPTIMIZING))
            .await;

        h.dispatcher
            .dispatch(event(8, InboundKind::Command(Command::Start)));
        h.wait_until("other user's welcome", |sent| {
            sent.iter().any(|s| {
                matches!(s, Sent::Text { chat_id, text, .. }
                    if *chat_id == ChatId(8) && text == messages::WELCOME)
            })
        })
        .await;
        assert_eq!(h.step().await, Step::Optimizing);
    }

    #[tokio::test]
    async fn test_idle_lanes_retire_and_reopen() {
        let (state, transport, _store) =
            app_state(FakeTransport::default(), FixedGenerator, Duration::from_secs(10));
        let dispatcher = Dispatcher::with_lane_idle(state, Duration::from_millis(20));

        dispatcher.dispatch(start());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(dispatcher.inner.lanes.is_empty());
        assert_eq!(transport.texts().len(), 1);

        dispatcher.dispatch(start());
        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.texts().len() < 2 {
            assert!(Instant::now() < deadline, "second welcome never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
