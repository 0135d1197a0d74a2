//! Size-bounded rendering. GitHub rejects comment and check run bodies past a
//! hard length limit, so rendering degrades through progressively terser
//! variants until one fits.

use anyhow::Result;

/// Hard limit applied to rendered output, slightly under GitHub's 65535.
pub const GITHUB_FIELD_LENGTH_HARD_LIMIT: usize = 65_000;

/// Knobs the formatters honor to shrink their output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailLevel {
    pub include_stack_traces: bool,
    pub include_failure_links: bool,
}

impl Default for DetailLevel {
    fn default() -> Self {
        Self { include_stack_traces: true, include_failure_links: true }
    }
}

impl DetailLevel {
    /// The degradation ladder, most detailed first. The last variant is used
    /// unconditionally if nothing else fits.
    pub const LADDER: [DetailLevel; 3] = [
        DetailLevel { include_stack_traces: true, include_failure_links: true },
        DetailLevel { include_stack_traces: false, include_failure_links: true },
        DetailLevel { include_stack_traces: false, include_failure_links: false },
    ];
}

/// Render with the most detailed variant that fits within `limit` bytes.
/// Later ladder rungs are only attempted when an earlier one is too large,
/// and the tersest rung is returned even when it still exceeds the limit.
pub fn render_within<F>(limit: usize, mut render: F) -> Result<String>
where
    F: FnMut(DetailLevel) -> Result<String>,
{
    let mut output = None;
    for (i, level) in DetailLevel::LADDER.iter().enumerate() {
        let rendered = render(*level)?;
        if rendered.len() <= limit {
            return Ok(rendered);
        }
        tracing::warn!(
            "Rendered output too large ({} > {}), degrading detail level",
            rendered.len(),
            limit
        );
        if i == DetailLevel::LADDER.len() - 1 {
            output = Some(rendered);
        }
    }
    // unreachable in practice, the loop always stores the last rung
    Ok(output.unwrap_or_default())
}
