//! Rendering retrieved documents into an LLM context block

use crate::retrieval::RetrievedDocument;
use crate::text::truncate_chars;

/// Context rendering options
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Per-passage display limit in characters
    pub max_preview_chars: usize,

    /// Append `(score: x.xx)` to each header
    pub include_scores: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_preview_chars: 500,
            include_scores: true,
        }
    }
}

/// Numbered `[n] title (score: x.xx)` blocks followed by each passage
///
/// Documents without a title fall back to their ID, then to `Document n`.
pub fn render_context(documents: &[RetrievedDocument], options: &ContextOptions) -> String {
    let mut out = String::new();

    for (i, doc) in documents.iter().enumerate() {
        let n = i + 1;
        let title = match doc.title() {
            Some(title) if !title.trim().is_empty() => title.trim().to_string(),
            _ if !doc.id.is_empty() => doc.id.clone(),
            _ => format!("Document {}", n),
        };

        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{}] {}", n, title));
        if options.include_scores {
            out.push_str(&format!(" (score: {:.2})", doc.score));
        }
        out.push('\n');

        let (preview, truncated) = truncate_chars(doc.content.trim(), options.max_preview_chars);
        out.push_str(preview);
        if truncated {
            out.push_str("...");
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_numbered_blocks() {
        let docs = vec![
            RetrievedDocument::new("d1", "Refunds are issued within 14 days.", 0.876)
                .with_metadata("title", "Refund policy"),
            RetrievedDocument::new("d2", "Annual plans renew automatically.", 0.5),
        ];

        let rendered = render_context(&docs, &ContextOptions::default());

        assert_eq!(
            rendered,
            "[1] Refund policy (score: 0.88)\nRefunds are issued within 14 days.\n\n\
             [2] d2 (score: 0.50)\nAnnual plans renew automatically.\n"
        );
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let docs = vec![RetrievedDocument::new("", "héllo wörld", 1.0)];
        let options = ContextOptions { max_preview_chars: 7, include_scores: false };

        let rendered = render_context(&docs, &options);

        assert_eq!(rendered, "[1] Document 1\nhéllo w...\n");
    }

    #[test]
    fn test_empty_input() {
        assert!(render_context(&[], &ContextOptions::default()).is_empty());
    }
}
