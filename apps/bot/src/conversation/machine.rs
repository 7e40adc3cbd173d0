//! Conversation state machine.
//!
//! `transition` is pure: it takes the current session (if any) and one input,
//! and returns the next session plus the effects the dispatcher must perform.
//! Every (stage, input) pair is matched explicitly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::conversation::messages;
use crate::conversation::session::{
    meaningful_len, JobDescription, Resume, Session, Stage, MIN_JOB_DESCRIPTION_CHARS,
    MIN_RESUME_CHARS,
};
use crate::errors::BotError;
use crate::extract::ExtractedDocument;
use crate::render::Artifact;
use crate::transport::{Button, UserId};

/// Inline buttons the flow emits. Tokens are what the transport round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    JobDescription,
    Resume,
    Retry,
}

impl ButtonAction {
    pub fn token(self) -> &'static str {
        match self {
            ButtonAction::JobDescription => "job_desc",
            ButtonAction::Resume => "resume",
            ButtonAction::Retry => "retry",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "job_desc" => Some(ButtonAction::JobDescription),
            "resume" => Some(ButtonAction::Resume),
            "retry" => Some(ButtonAction::Retry),
            _ => None,
        }
    }

    pub fn button(self) -> Button {
        let label = match self {
            ButtonAction::JobDescription => messages::BUTTON_JOB_DESCRIPTION,
            ButtonAction::Resume => messages::BUTTON_RESUME,
            ButtonAction::Retry => messages::BUTTON_RETRY,
        };
        Button::new(label, self.token())
    }
}

#[derive(Debug)]
pub enum Input {
    /// The `/start` command.
    Start,
    Button(ButtonAction),
    /// A message received while collecting, already run through the extractor.
    Submission(Result<ExtractedDocument, BotError>),
    /// A message received while not collecting; its content is irrelevant.
    Message,
    RewriteFinished {
        run_id: Uuid,
        outcome: Result<Artifact, BotError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_button(text: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            text: text.into(),
            buttons: vec![action.button()],
        }
    }
}

/// Work handed to the dispatcher when a session enters `Optimizing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteJob {
    pub run_id: Uuid,
    pub job_description: String,
    pub resume: String,
}

#[derive(Debug)]
pub enum Effect {
    Reply(Reply),
    /// Replace the message whose button was pressed; falls back to a new message.
    EditOrigin(Reply),
    BeginRewrite(RewriteJob),
    DeliverArtifact(Artifact),
}

#[derive(Debug)]
pub struct Transition {
    pub session: Option<Session>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(session: Option<Session>, effects: Vec<Effect>) -> Self {
        Self { session, effects }
    }
}

pub fn transition(
    user_id: UserId,
    session: Option<Session>,
    input: Input,
    now: DateTime<Utc>,
) -> Transition {
    match input {
        Input::Start => Transition::stay(
            session,
            vec![Effect::Reply(Reply::with_button(
                messages::WELCOME,
                ButtonAction::JobDescription,
            ))],
        ),
        Input::Button(action) => on_button(user_id, session, action, now),
        Input::Submission(result) => on_submission(session, result, now),
        Input::Message => on_message(session),
        Input::RewriteFinished { run_id, outcome } => {
            on_rewrite_finished(session, run_id, outcome, now)
        }
    }
}

fn on_button(
    user_id: UserId,
    session: Option<Session>,
    action: ButtonAction,
    now: DateTime<Utc>,
) -> Transition {
    if session.as_ref().is_some_and(Session::is_optimizing) {
        return Transition::stay(
            session,
            vec![Effect::Reply(Reply::text(messages::STILL_OPTIMIZING))],
        );
    }

    match action {
        ButtonAction::JobDescription => Transition::stay(
            Some(Session::new(user_id, now)),
            vec![Effect::EditOrigin(Reply::text(messages::ASK_JOB_DESCRIPTION))],
        ),
        ButtonAction::Resume => {
            let Some(mut current) = session else {
                return Transition::stay(None, vec![Effect::Reply(Reply::text(messages::USE_START))]);
            };
            let stage = std::mem::replace(&mut current.stage, Stage::WaitingJobDesc);
            let (stage, reply) = match stage {
                Stage::WaitingJobDesc => (
                    Stage::WaitingJobDesc,
                    Effect::Reply(Reply::text(messages::JOB_DESCRIPTION_FIRST)),
                ),
                Stage::WaitingResume {
                    job_description,
                    previous_resume,
                } => (
                    Stage::WaitingResume {
                        job_description,
                        previous_resume,
                    },
                    Effect::EditOrigin(Reply::text(messages::ASK_RESUME)),
                ),
                Stage::Done {
                    job_description,
                    resume,
                } => (
                    Stage::WaitingResume {
                        job_description,
                        previous_resume: Some(resume),
                    },
                    Effect::EditOrigin(Reply::text(messages::ASK_RESUME)),
                ),
                running @ Stage::Optimizing { .. } => (
                    running,
                    Effect::Reply(Reply::text(messages::STILL_OPTIMIZING)),
                ),
            };
            current.stage = stage;
            current.updated_at = now;
            Transition::stay(Some(current), vec![reply])
        }
        ButtonAction::Retry => {
            let Some(mut current) = session else {
                return Transition::stay(None, vec![Effect::Reply(Reply::text(messages::USE_START))]);
            };
            match std::mem::replace(&mut current.stage, Stage::WaitingJobDesc) {
                Stage::WaitingResume {
                    job_description,
                    previous_resume: Some(resume),
                } => {
                    let (stage, job) = begin_optimizing(job_description, resume);
                    current.stage = stage;
                    current.updated_at = now;
                    Transition::stay(
                        Some(current),
                        vec![
                            Effect::EditOrigin(Reply::text(messages::OPTIMIZING)),
                            Effect::BeginRewrite(job),
                        ],
                    )
                }
                other => {
                    current.stage = other;
                    Transition::stay(
                        Some(current),
                        vec![Effect::Reply(Reply::text(messages::NOTHING_TO_RETRY))],
                    )
                }
            }
        }
    }
}

fn on_submission(
    session: Option<Session>,
    result: Result<ExtractedDocument, BotError>,
    now: DateTime<Utc>,
) -> Transition {
    let Some(mut current) = session else {
        return Transition::stay(None, vec![Effect::Reply(Reply::text(messages::USE_START))]);
    };

    match std::mem::replace(&mut current.stage, Stage::WaitingJobDesc) {
        Stage::WaitingJobDesc => {
            match accept(result, MIN_JOB_DESCRIPTION_CHARS, JobDescription::parse) {
                Ok(job_description) => {
                    current.stage = Stage::WaitingResume {
                        job_description,
                        previous_resume: None,
                    };
                    current.updated_at = now;
                    Transition::stay(
                        Some(current),
                        vec![Effect::Reply(Reply::with_button(
                            messages::JOB_DESCRIPTION_RECEIVED,
                            ButtonAction::Resume,
                        ))],
                    )
                }
                Err(reason) => {
                    current.stage = Stage::WaitingJobDesc;
                    Transition::stay(
                        Some(current),
                        vec![Effect::Reply(Reply::text(messages::invalid_submission(
                            messages::INVALID_JOB_DESCRIPTION,
                            &reason,
                        )))],
                    )
                }
            }
        }
        Stage::WaitingResume {
            job_description,
            previous_resume,
        } => match accept(result, MIN_RESUME_CHARS, Resume::parse) {
            Ok(resume) => {
                let (stage, job) = begin_optimizing(job_description, resume);
                current.stage = stage;
                current.updated_at = now;
                Transition::stay(
                    Some(current),
                    vec![
                        Effect::Reply(Reply::text(messages::OPTIMIZING)),
                        Effect::BeginRewrite(job),
                    ],
                )
            }
            Err(reason) => {
                current.stage = Stage::WaitingResume {
                    job_description,
                    previous_resume,
                };
                Transition::stay(
                    Some(current),
                    vec![Effect::Reply(Reply::text(messages::invalid_submission(
                        messages::INVALID_RESUME,
                        &reason,
                    )))],
                )
            }
        },
        other => {
            current.stage = other;
            on_message(Some(current))
        }
    }
}

fn on_message(session: Option<Session>) -> Transition {
    let text = if session.as_ref().is_some_and(Session::is_optimizing) {
        messages::STILL_OPTIMIZING
    } else {
        messages::USE_START
    };
    Transition::stay(session, vec![Effect::Reply(Reply::text(text))])
}

fn on_rewrite_finished(
    session: Option<Session>,
    run_id: Uuid,
    outcome: Result<Artifact, BotError>,
    now: DateTime<Utc>,
) -> Transition {
    let Some(mut current) = session else {
        return Transition::stay(None, Vec::new());
    };

    match std::mem::replace(&mut current.stage, Stage::WaitingJobDesc) {
        Stage::Optimizing {
            job_description,
            resume,
            run_id: expected,
        } if expected == run_id => {
            current.updated_at = now;
            match outcome {
                Ok(artifact) => {
                    current.stage = Stage::Done {
                        job_description,
                        resume,
                    };
                    Transition::stay(Some(current), vec![Effect::DeliverArtifact(artifact)])
                }
                Err(err) => {
                    current.stage = Stage::WaitingResume {
                        job_description,
                        previous_resume: Some(resume),
                    };
                    let text = format!("{}\n\n{}", err.user_message(), messages::RETRY_HINT);
                    Transition::stay(
                        Some(current),
                        vec![Effect::Reply(Reply::with_button(text, ButtonAction::Retry))],
                    )
                }
            }
        }
        // Stale or unexpected completion: leave the session untouched.
        other => {
            current.stage = other;
            Transition::stay(Some(current), Vec::new())
        }
    }
}

fn begin_optimizing(job_description: JobDescription, resume: Resume) -> (Stage, RewriteJob) {
    let run_id = Uuid::new_v4();
    let job = RewriteJob {
        run_id,
        job_description: job_description.as_str().to_string(),
        resume: resume.as_str().to_string(),
    };
    (
        Stage::Optimizing {
            job_description,
            resume,
            run_id,
        },
        job,
    )
}

/// Unwraps an extraction result into a validated value, returning the
/// user-facing reason on rejection.
fn accept<T>(
    result: Result<ExtractedDocument, BotError>,
    min_chars: usize,
    parse: fn(String) -> Option<T>,
) -> Result<T, String> {
    let document = result.map_err(|e| e.user_message())?;
    let actual = meaningful_len(&document.text);
    parse(document.text).ok_or_else(|| messages::too_short(min_chars, actual))
}
