//! Prompt templates for the AI engine.

use crate::analysis::models::CombinedInput;

pub const DOCUMENTATION_SYSTEM: &str = "You are a senior software engineer who writes clear, \
accurate technical documentation for code changes. Answer in Markdown.";

pub const CODE_REVIEW_SYSTEM: &str = "You are a meticulous senior code reviewer. You point out \
bugs, security problems, performance issues and maintainability concerns, and you suggest \
concrete fixes. Answer in Markdown.";

const DOCUMENTATION_TASK: &str = r#"Write technical documentation for the pull request described by the data below.

The data contains:
- `pr_commits.json`: the commits of the pull request
- `pr_files_content.json`: the lines added to each changed file
- `issue_data.json` (optional): the ticket the change implements

Structure the document as:
1. **Summary** - what the change does and why
2. **Changes** - the files and components touched, grouped by purpose
3. **Technical details** - new functions, data structures, configuration or behaviour
4. **Impact** - affected areas, migrations, and anything deployers must know

Only describe what the data supports. Do not invent behaviour."#;

const CODE_REVIEW_TASK: &str = r#"Review the pull request described by the data below.

The data contains:
- `pr_commits.json`: the commits of the pull request
- `pr_files_content.json`: the lines added to each changed file
- `issue_data.json` (optional): the ticket the change implements

Structure the review as:
1. **Overview** - overall assessment in two or three sentences
2. **Issues** - each finding with file, severity (critical/major/minor) and a suggested fix
3. **Good practices** - what the change does well
4. **Verdict** - approve, approve with comments, or request changes

If the ticket is present, check that the change actually addresses it."#;

/// Render the combined input as pretty JSON, cut to `max_chars`.
pub fn render_input(input: &CombinedInput, max_chars: usize) -> String {
    let json = serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string());
    truncate(&json, max_chars)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn documentation_prompt(input: &CombinedInput, max_chars: usize) -> String {
    format!(
        "{}\n\n```json\n{}\n```",
        DOCUMENTATION_TASK,
        render_input(input, max_chars)
    )
}

pub fn code_review_prompt(input: &CombinedInput, max_chars: usize) -> String {
    format!(
        "{}\n\n```json\n{}\n```",
        CODE_REVIEW_TASK,
        render_input(input, max_chars)
    )
}
