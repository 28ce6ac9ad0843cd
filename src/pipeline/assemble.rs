//! Result assembler: per-unit results → one ordered document string.

use crate::error::PipelineError;
use crate::pipeline::dispatch::ExtractionResult;

/// Order `results` by index and join their contents.
///
/// The index set must be exactly `0..results.len()`; a gap or a duplicate
/// means a unit was lost or processed twice and is reported as
/// [`PipelineError::Internal`].
pub fn assemble(mut results: Vec<ExtractionResult>) -> Result<String, PipelineError> {
    results.sort_by_key(|r| r.index);

    for (expected, r) in results.iter().enumerate() {
        if r.index != expected {
            return Err(PipelineError::Internal(format!(
                "result set is incomplete: expected unit {} at position {}, found unit {} ({} results)",
                expected,
                expected,
                r.index,
                results.len()
            )));
        }
    }

    let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
    Ok(join_contents(&contents))
}

/// Join `parts` with a blank line between them, then normalise.
///
/// Line endings become `\n`. A blank line is dropped when it opens the
/// document or follows another blank line, so separators never stack.
pub fn join_contents<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref().replace("\r\n", "\n").replace('\r', "\n"))
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut lines: Vec<&str> = Vec::new();
    for line in joined.split('\n') {
        let blank = line.trim().is_empty();
        let prev_blank = lines.last().map_or(true, |l| l.trim().is_empty());
        if blank && prev_blank {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(index: usize, content: &str) -> ExtractionResult {
        ExtractionResult {
            index,
            page_number: index + 1,
            content: content.to_string(),
            cached: false,
        }
    }

    #[test]
    fn blank_runs_collapse() {
        let parts = ["Line 1", "", "Line 2", "", "", "Line 3"];
        assert_eq!(join_contents(&parts), "Line 1\n\nLine 2\n\nLine 3");
    }

    #[test]
    fn leading_blanks_and_crlf() {
        let parts = ["\r\n\r\n# Title\r\nbody", "next"];
        assert_eq!(join_contents(&parts), "# Title\nbody\n\nnext");
    }

    #[test]
    fn empty_input_is_empty_output() {
        let parts: [&str; 0] = [];
        assert_eq!(join_contents(&parts), "");
    }

    #[test]
    fn assemble_restores_index_order() {
        let results = vec![result(2, "c"), result(0, "a"), result(1, "b")];
        assert_eq!(assemble(results).unwrap(), "a\n\nb\n\nc");
    }

    #[test]
    fn gap_is_rejected() {
        let err = assemble(vec![result(0, "a"), result(2, "c")]).unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }

    #[test]
    fn duplicate_is_rejected() {
        let err = assemble(vec![result(0, "a"), result(0, "a"), result(1, "b")]).unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
