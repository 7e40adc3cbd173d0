//! Per-user session data.
//!
//! `Stage` carries the collected texts inside its variants, so a session in
//! `Optimizing` or `Done` cannot exist without a validated job description
//! and resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::UserId;

pub const MIN_JOB_DESCRIPTION_CHARS: usize = 20;
pub const MIN_RESUME_CHARS: usize = 30;

/// Length used for validation: Unicode scalar values after trimming.
pub fn meaningful_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// A job description that passed the length check. Stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription(String);

impl JobDescription {
    pub fn parse(text: String) -> Option<Self> {
        (meaningful_len(&text) >= MIN_JOB_DESCRIPTION_CHARS).then_some(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A resume that passed the length check. Stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume(String);

impl Resume {
    pub fn parse(text: String) -> Option<Self> {
        (meaningful_len(&text) >= MIN_RESUME_CHARS).then_some(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Stage {
    WaitingJobDesc,
    WaitingResume {
        job_description: JobDescription,
        /// Set after a failed rewrite so the user can retry without re-uploading.
        previous_resume: Option<Resume>,
    },
    Optimizing {
        job_description: JobDescription,
        resume: Resume,
        run_id: Uuid,
    },
    Done {
        job_description: JobDescription,
        resume: Resume,
    },
}

/// Flat view of `Stage`, plus `Idle` for users without a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    WaitingJobDesc,
    WaitingResume,
    Optimizing,
    Done,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Step::Idle => "idle",
            Step::WaitingJobDesc => "waiting_job_desc",
            Step::WaitingResume => "waiting_resume",
            Step::Optimizing => "optimizing",
            Step::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            stage: Stage::WaitingJobDesc,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self) -> Step {
        match self.stage {
            Stage::WaitingJobDesc => Step::WaitingJobDesc,
            Stage::WaitingResume { .. } => Step::WaitingResume,
            Stage::Optimizing { .. } => Step::Optimizing,
            Stage::Done { .. } => Step::Done,
        }
    }

    /// True when an incoming message should be run through the extractor.
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self.stage,
            Stage::WaitingJobDesc | Stage::WaitingResume { .. }
        )
    }

    pub fn is_optimizing(&self) -> bool {
        matches!(self.stage, Stage::Optimizing { .. })
    }
}

/// Stage payload accessors for assertions.
#[cfg(test)]
impl Session {
    pub fn job_description(&self) -> Option<&str> {
        match &self.stage {
            Stage::WaitingJobDesc => None,
            Stage::WaitingResume {
                job_description, ..
            }
            | Stage::Optimizing {
                job_description, ..
            }
            | Stage::Done {
                job_description, ..
            } => Some(job_description.as_str()),
        }
    }

    pub fn resume(&self) -> Option<&str> {
        match &self.stage {
            Stage::Optimizing { resume, .. } | Stage::Done { resume, .. } => Some(resume.as_str()),
            Stage::WaitingResume {
                previous_resume, ..
            } => previous_resume.as_ref().map(Resume::as_str),
            Stage::WaitingJobDesc => None,
        }
    }
}

/// Step of an optional session; `None` is `Idle`.
pub fn step_of(session: Option<&Session>) -> Step {
    session.map_or(Step::Idle, Session::step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_description_minimum_length() {
        assert!(JobDescription::parse("x".repeat(19)).is_none());
        assert!(JobDescription::parse("x".repeat(20)).is_some());
        // Surrounding whitespace does not count toward the minimum.
        assert!(JobDescription::parse(format!("  {}  \n", "x".repeat(19))).is_none());
    }

    #[test]
    fn test_resume_minimum_length_counts_characters_not_bytes() {
        assert!(Resume::parse("é".repeat(29)).is_none());
        assert!(Resume::parse("é".repeat(30)).is_some());
    }

    #[test]
    fn test_text_is_stored_verbatim() {
        let raw = "  We need a backend engineer with 5 years Go experience...\n".to_string();
        assert_eq!(JobDescription::parse(raw.clone()).unwrap().as_str(), raw);
    }

    #[test]
    fn test_step_names_match_flow_vocabulary() {
        assert_eq!(Step::WaitingJobDesc.to_string(), "waiting_job_desc");
        assert_eq!(Step::Idle.to_string(), "idle");
        assert_eq!(step_of(None), Step::Idle);
    }

    #[test]
    fn test_accessors_follow_stage() {
        let now = Utc::now();
        let mut session = Session::new(UserId(7), now);
        assert_eq!(session.step(), Step::WaitingJobDesc);
        assert!(session.job_description().is_none());
        assert!(session.accepts_submission());

        session.stage = Stage::Done {
            job_description: JobDescription::parse("a".repeat(25)).unwrap(),
            resume: Resume::parse("b".repeat(35)).unwrap(),
        };
        assert_eq!(session.step(), Step::Done);
        assert_eq!(session.resume(), Some("b".repeat(35).as_str()));
        assert!(!session.accepts_submission());
    }
}
