//! Extraction prompts sent to the vision model.
//!
//! Bundled templates live here as constants so the prompt a cache entry was
//! produced with can always be reconstructed from its name. Callers pick one
//! via [`crate::config::PromptSource`]; anything other than the default prompt
//! contributes a fingerprint to the cache key (see [`ResolvedPrompt`]).

use crate::config::{OutputFormat, PromptSource};
use crate::error::PipelineError;
use sha2::{Digest, Sha256};

/// Default prompt for Markdown output.
pub const MARKDOWN_PROMPT: &str = r#"You are an expert document transcriber. Convert the page image(s) to clean, well-structured Markdown.

1. TEXT
   - Preserve ALL text content completely and accurately
   - Maintain the reading order as a human would read the page

2. STRUCTURE
   - Use #, ##, ### for headings matching the visual hierarchy
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Convert tables to GFM pipe format

3. WHAT TO IGNORE
   - Page numbers, repeated headers and footers, decorative lines

4. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap in ```markdown fences
   - Do NOT add commentary or explanations"#;

/// Default prompt for JSON output.
pub const JSON_PROMPT: &str = r#"You are an expert document transcriber. Convert the page image(s) into a single JSON object with this shape:

{"blocks": [{"type": "heading" | "paragraph" | "list" | "table", "text": "...", "level": 1}]}

- Preserve ALL text content in reading order
- Tables: use "rows": [["cell", ...], ...] instead of "text"
- Output ONLY the JSON object, no fences, no commentary"#;

/// Prompt focused on tabular data.
pub const TABLES_PROMPT: &str = r#"Extract every table on the page image(s) as GFM pipe tables, in reading order.
Precede each table with its caption (if any) in bold. Ignore all non-tabular text.
Output ONLY the Markdown tables."#;

/// Prompt for unformatted text, e.g. for embedding pipelines.
pub const PLAIN_PROMPT: &str = r#"Transcribe all text on the page image(s) as plain text in reading order.
Do not use Markdown or any other markup. Output ONLY the text."#;

/// Names accepted by [`PromptSource::Template`].
pub const TEMPLATE_NAMES: &[&str] = &["markdown", "json", "tables", "plain"];

/// Look up a bundled template by name.
pub fn template(name: &str) -> Option<&'static str> {
    match name {
        "markdown" => Some(MARKDOWN_PROMPT),
        "json" => Some(JSON_PROMPT),
        "tables" => Some(TABLES_PROMPT),
        "plain" => Some(PLAIN_PROMPT),
        _ => None,
    }
}

/// The prompt text a pipeline run will send, plus how it identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    /// Full prompt text.
    pub text: String,
    /// Short human-facing label: the template name, or `"custom"`.
    pub label: String,
    /// Cache-key qualifier; `None` for the format's default prompt.
    pub fingerprint: Option<String>,
}

/// Resolve a [`PromptSource`] for the given output format.
pub fn resolve(source: &PromptSource, format: OutputFormat) -> Result<ResolvedPrompt, PipelineError> {
    match source {
        PromptSource::Default => {
            let text = match format {
                OutputFormat::Markdown => MARKDOWN_PROMPT,
                OutputFormat::Json => JSON_PROMPT,
            };
            Ok(ResolvedPrompt {
                text: text.to_string(),
                label: format.as_str().to_string(),
                fingerprint: None,
            })
        }
        PromptSource::Template(name) => {
            let text = template(name).ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "unknown prompt template '{name}' (available: {})",
                    TEMPLATE_NAMES.join(", ")
                ))
            })?;
            Ok(ResolvedPrompt {
                text: text.to_string(),
                label: name.clone(),
                fingerprint: Some(fingerprint(text)),
            })
        }
        PromptSource::Custom(text) => {
            if text.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "custom prompt must not be empty".into(),
                ));
            }
            Ok(ResolvedPrompt {
                text: text.clone(),
                label: "custom".to_string(),
                fingerprint: Some(fingerprint(text)),
            })
        }
    }
}

/// First 12 hex characters of the SHA-256 of `text`.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(12);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_depends_on_format() {
        let md = resolve(&PromptSource::Default, OutputFormat::Markdown).unwrap();
        let json = resolve(&PromptSource::Default, OutputFormat::Json).unwrap();
        assert_eq!(md.text, MARKDOWN_PROMPT);
        assert_eq!(json.text, JSON_PROMPT);
        assert!(md.fingerprint.is_none() && json.fingerprint.is_none());
        assert_eq!(json.label, "json");
    }

    #[test]
    fn every_template_name_resolves() {
        for name in TEMPLATE_NAMES {
            assert!(template(name).is_some(), "missing template {name}");
        }
    }

    #[test]
    fn custom_prompt_gets_stable_fingerprint() {
        let a = resolve(&PromptSource::Custom("Only footnotes".into()), OutputFormat::Markdown)
            .unwrap();
        let b = resolve(&PromptSource::Custom("Only footnotes".into()), OutputFormat::Markdown)
            .unwrap();
        let c = resolve(&PromptSource::Custom("Only captions".into()), OutputFormat::Markdown)
            .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.as_deref().map(str::len), Some(12));
        assert_eq!(a.label, "custom");
    }

    #[test]
    fn blank_custom_prompt_is_rejected() {
        assert!(resolve(&PromptSource::Custom("  ".into()), OutputFormat::Markdown).is_err());
    }

    #[test]
    fn markdown_prompt_forbids_fences() {
        assert!(MARKDOWN_PROMPT.contains("Do NOT wrap in ```markdown fences"));
    }
}
