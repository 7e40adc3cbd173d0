//! Rewrite invoker: builds the tailoring prompt and asks the generator for a
//! rewritten resume.
//!
//! Each request is independent: no retries, no caching. The whole call is
//! bounded by a timeout so a stalled backend surfaces as a retryable failure.

pub mod prompts;

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::llm_client::{GeneratorError, TextGenerator};
use crate::rewrite::prompts::REWRITE_PROMPT_TEMPLATE;

const JOB_DESCRIPTION_SLOT: &str = "{job_description}";
const RESUME_SLOT: &str = "{resume}";

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("generator did not answer within {0:?}")]
    Timeout(Duration),
}

/// Embeds both texts verbatim in the rewrite prompt.
///
/// Substitution is single-pass, so placeholder-looking text inside either
/// input is never expanded a second time.
pub fn build_prompt(job_description: &str, resume: &str) -> String {
    let (head, rest) = REWRITE_PROMPT_TEMPLATE
        .split_once(JOB_DESCRIPTION_SLOT)
        .unwrap_or((REWRITE_PROMPT_TEMPLATE, ""));
    let (middle, tail) = rest.split_once(RESUME_SLOT).unwrap_or((rest, ""));

    let mut prompt = String::with_capacity(
        REWRITE_PROMPT_TEMPLATE.len() + job_description.len() + resume.len(),
    );
    prompt.push_str(head);
    prompt.push_str(job_description);
    prompt.push_str(middle);
    prompt.push_str(resume);
    prompt.push_str(tail);
    prompt
}

/// Requests a tailored rewrite of `resume` for `job_description`.
pub async fn rewrite_resume(
    generator: &dyn TextGenerator,
    job_description: &str,
    resume: &str,
    timeout: Duration,
) -> Result<String, RewriteError> {
    let prompt = build_prompt(job_description, resume);
    let started = Instant::now();

    let raw = match tokio::time::timeout(timeout, generator.generate(&prompt)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("Generator timed out after {:?}", timeout);
            return Err(RewriteError::Timeout(timeout));
        }
    };

    let text = strip_code_fences(&raw).to_string();
    if text.is_empty() {
        return Err(GeneratorError::EmptyContent.into());
    }

    info!(
        "Rewrite finished in {}ms ({} chars)",
        started.elapsed().as_millis(),
        text.chars().count()
    );
    Ok(text)
}

/// Strips a ```lang ... ``` wrapper if the model added one despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(stripped) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let body = match stripped.split_once('\n') {
        Some((tag, body)) if !tag.trim().contains(' ') => body,
        _ => stripped,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
