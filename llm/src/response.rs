//! Extracts a patch from a model reply and checks it is well-formed enough
//! to hand to the validator.
//!
//! Three recognition strategies are tried in order, from most to least
//! structured, because models often wrap the patch in a fenced code block
//! but occasionally just emit it inline or as the entire reply.

use crate::error::LlmError;

const PATCH_MARKERS: [&str; 2] = ["From ", "diff --git"];

fn starts_with_marker(line: &str) -> bool {
    PATCH_MARKERS.iter().any(|m| line.starts_with(m))
}

fn contains_marker(text: &str) -> bool {
    PATCH_MARKERS.iter().any(|m| text.contains(m))
}

/// Pull the patch text out of a raw model reply, trying fenced blocks
/// first, then a free-form line run, then the whole response.
pub fn extract_patch(reply: &str) -> Option<String> {
    if let Some(patch) = extract_from_fenced_block(reply) {
        return Some(patch);
    }
    if let Some(patch) = extract_from_marker_run(reply) {
        return Some(patch);
    }
    if contains_marker(reply) {
        return Some(reply.trim().to_string());
    }
    None
}

fn extract_from_fenced_block(reply: &str) -> Option<String> {
    let mut in_fence = false;
    let mut block = String::new();
    for line in reply.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            if in_fence {
                // closing fence
                let candidate = block.trim();
                if contains_marker(candidate) && starts_with_first_marker(candidate) {
                    return Some(candidate.to_string());
                }
                block.clear();
                in_fence = false;
            } else {
                in_fence = true;
            }
            continue;
        }
        if in_fence {
            block.push_str(line);
            block.push('\n');
        }
    }
    None
}

fn starts_with_first_marker(text: &str) -> bool {
    text.lines().next().is_some_and(starts_with_marker)
}

fn extract_from_marker_run(reply: &str) -> Option<String> {
    let lines: Vec<&str> = reply.lines().collect();
    let start = lines.iter().position(|line| starts_with_marker(line))?;
    Some(lines[start..].join("\n"))
}

/// Hard format requirements: at least one `@@` hunk header and both
/// `---`/`+++` file markers. Missing metadata (author/date/subject) is a
/// warning logged by the caller, not a hard rejection here.
pub fn validate_patch_format(patch: &str) -> Result<(), LlmError> {
    let has_hunk_header = patch.lines().any(|l| l.trim_start().starts_with("@@"));
    let has_old_marker = patch.lines().any(|l| l.starts_with("--- "));
    let has_new_marker = patch.lines().any(|l| l.starts_with("+++ "));
    if !has_hunk_header {
        return Err(LlmError::FormatInvalid(
            "no `@@` hunk header found".to_string(),
        ));
    }
    if !has_old_marker || !has_new_marker {
        return Err(LlmError::FormatInvalid(
            "missing `---`/`+++` file markers".to_string(),
        ));
    }
    Ok(())
}

/// Fields from the original patch's metadata envelope; used to log
/// (not reject) a repair whose reply dropped one of them.
pub struct MetadataPresence {
    pub has_author: bool,
    pub has_date: bool,
    pub has_subject: bool,
}

pub fn check_metadata_presence(patch: &str, author: &str, date: &str, subject: &str) -> MetadataPresence {
    MetadataPresence {
        has_author: !author.is_empty() && patch.contains(author),
        has_date: !date.is_empty() && patch.contains(date),
        has_subject: !subject.is_empty() && patch.contains(subject),
    }
}
