// User-facing copy for the conversation flow.

pub const WELCOME: &str =
    "👋 Welcome to Resume AI!\n\nStep 1: Attach or send your target job description.";

pub const ASK_JOB_DESCRIPTION: &str =
    "📄 Please send or upload your job description (text, PDF, DOCX, MD, or TXT).";

pub const JOB_DESCRIPTION_RECEIVED: &str = "✅ Job description received!\n\nStep 2: Now send or upload your resume (PDF, DOCX, TXT, MD, or paste the text).";

pub const ASK_RESUME: &str =
    "📄 Now send your resume file (PDF, DOCX, TXT, or MD) or paste your text.";

pub const INVALID_JOB_DESCRIPTION: &str =
    "Please send a valid job description (text or supported file).";

pub const INVALID_RESUME: &str = "Send a valid resume in a supported format or as text.";

pub const OPTIMIZING: &str = "🚀 Optimizing your resume for this job…";

pub const STILL_OPTIMIZING: &str =
    "⏳ Still working on your resume. I'll send it as soon as it's ready.";

pub const JOB_DESCRIPTION_FIRST: &str =
    "I need the job description first. Please send or upload it.";

pub const NOTHING_TO_RETRY: &str =
    "There's nothing to retry right now. Send your resume to continue, or use /start to begin again.";

pub const USE_START: &str = "Use /start to begin.";

pub const RETRY_HINT: &str = "Tap Retry to try again, or send a different resume.";

pub const BUTTON_JOB_DESCRIPTION: &str = "1️⃣ Send job description";
pub const BUTTON_RESUME: &str = "📄 Upload/resume";
pub const BUTTON_RETRY: &str = "🔁 Retry";

/// Reply for a rejected submission: the step's prompt plus the reason.
pub fn invalid_submission(prompt: &str, reason: &str) -> String {
    format!("{prompt}\n\n{reason}")
}

pub fn too_short(min_chars: usize, actual: usize) -> String {
    format!("That's only {actual} characters; I need at least {min_chars}.")
}
