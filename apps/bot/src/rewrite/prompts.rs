// Prompt constants for the resume rewrite.

/// Rewrite prompt template. Replace `{job_description}` and `{resume}` before sending.
pub const REWRITE_PROMPT_TEMPLATE: &str = "\
You are a top resume optimization expert.

Here is the target job description:
{job_description}

Here is the existing resume:
{resume}

Rewrite the resume so it is ATS-friendly, compelling, and tailored specifically to this job. \
Add or rewrite sections using metrics, strong action verbs, and professional formatting. \
Maintain strict factual accuracy: never invent employers, titles, dates, degrees, or numbers \
that the existing resume does not support.

Output plain text only. Do NOT use markdown, code blocks, tables, or emoji.
";
