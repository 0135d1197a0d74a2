//! Stack trace shortening for report output. Two independent budgets: a
//! maximum number of `at ...` frames and a maximum character count.

const ELLIPSIS: &str = "...";

/// Shorten a failure detail to at most `max_frames` stack frames and
/// `max_chars` characters. Message lines before the first frame are always
/// kept. Returns `None` for empty input.
pub fn shorten(detail: Option<&str>, max_chars: usize, max_frames: usize) -> Option<String> {
    let detail = detail?.trim_end();
    if detail.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    let mut frames = 0;
    let mut truncated = false;
    for line in detail.lines() {
        if line.trim_start().starts_with("at ") {
            if frames >= max_frames {
                truncated = true;
                continue;
            }
            frames += 1;
        }
        lines.push(line);
    }
    let mut result = lines.join("\n");
    if truncated {
        result.push('\n');
        result.push_str(ELLIPSIS);
    }
    Some(truncate_chars(&result, max_chars))
}

/// Shorten to a character budget only, keeping all frames.
pub fn abbreviate(detail: Option<&str>, max_chars: usize) -> Option<String> {
    let detail = detail?.trim_end();
    if detail.is_empty() {
        return None;
    }
    Some(truncate_chars(detail, max_chars))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(ELLIPSIS.len())).collect();
    format!("{kept}{ELLIPSIS}")
}
