//! Model-backed query rewriting and expansion
//!
//! Every model failure (error, timeout, unusable output) falls back to the
//! unmodified query; nothing here ever fails the request.

use super::QueryBundle;
use crate::text::normalize;
use ragfuse_common::errors::AppError;
use ragfuse_common::llm::{ChatMessage, LanguageModel};
use ragfuse_common::metrics;
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Query processor configuration
#[derive(Debug, Clone)]
pub struct QueryProcessorConfig {
    /// Paraphrases requested from the model
    pub num_variants: usize,

    /// Upper bound on a single model call
    pub model_timeout: Duration,

    /// Keep the original query at the front of optimized bundles
    pub include_original: bool,
}

impl Default for QueryProcessorConfig {
    fn default() -> Self {
        Self {
            num_variants: 3,
            model_timeout: Duration::from_secs(10),
            include_original: true,
        }
    }
}

/// Query rewriter/expander
pub struct QueryProcessor {
    model: Arc<dyn LanguageModel>,
    config: QueryProcessorConfig,
}

const REWRITE_PROMPT: &str = "You rewrite search queries for a document retrieval system. \
Restate the user's query so it is clear, complete, and self-contained. \
Keep the original intent and language. Respond with the rewritten query only.";

const EXPAND_PROMPT: &str = "You generate alternative phrasings of search queries for a \
document retrieval system. Each phrasing should capture the same intent with different wording \
or emphasis. Respond with one phrasing per line and nothing else.";

impl QueryProcessor {
    /// Create a new query processor
    pub fn new(model: Arc<dyn LanguageModel>, config: QueryProcessorConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &QueryProcessorConfig {
        &self.config
    }

    /// Call the model; `None` on error or timeout
    async fn call(&self, operation: &str, messages: &[ChatMessage]) -> Option<String> {
        match tokio::time::timeout(self.config.model_timeout, self.model.generate(messages)).await {
            Ok(Ok(content)) => Some(content),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "Model call failed, using original query");
                metrics::record_model_fallback(operation);
                None
            }
            Err(_) => {
                let err = AppError::ModelTimeout {
                    timeout_ms: self.config.model_timeout.as_millis() as u64,
                };
                warn!(operation, error = %err, "Model call timed out, using original query");
                metrics::record_model_fallback(operation);
                None
            }
        }
    }

    /// Restate `query` more clearly; returns `query` unchanged on any failure
    pub async fn rewrite(&self, query: &str) -> String {
        let messages = [
            ChatMessage::system(REWRITE_PROMPT),
            ChatMessage::user(query),
        ];

        let Some(reply) = self.call("rewrite", &messages).await else {
            return query.to_string();
        };

        let rewritten = reply
            .lines()
            .map(clean_line)
            .find(|line| !line.is_empty());

        match rewritten {
            Some(line) => {
                debug!(original = query, rewritten = %line, "Query rewritten");
                line
            }
            None => {
                warn!("Model returned an empty rewrite, using original query");
                metrics::record_model_fallback("rewrite");
                query.to_string()
            }
        }
    }

    /// `query` followed by up to `num_variants` model paraphrases
    ///
    /// Returns `[query]` when the call fails or yields no usable lines.
    pub async fn expand(&self, query: &str, num_variants: usize) -> Vec<String> {
        if num_variants == 0 {
            return vec![query.to_string()];
        }

        let messages = [
            ChatMessage::system(EXPAND_PROMPT),
            ChatMessage::user(format!(
                "Generate {} alternative phrasings of this query:\n{}",
                num_variants, query
            )),
        ];

        let Some(reply) = self.call("expand", &messages).await else {
            return vec![query.to_string()];
        };

        let paraphrases = parse_variant_lines(&reply, query, num_variants);
        if paraphrases.is_empty() {
            warn!("Model returned no usable paraphrases, using original query");
            metrics::record_model_fallback("expand");
        } else {
            debug!(count = paraphrases.len(), "Query expanded");
        }

        std::iter::once(query.to_string()).chain(paraphrases).collect()
    }

    /// Rewrite, then expand the rewritten query
    ///
    /// Always yields at least one usable query, even under total model failure.
    pub async fn optimize(&self, query: &str) -> QueryBundle {
        let rewritten = self.rewrite(query).await;
        let variants = self.expand(&rewritten, self.config.num_variants).await;
        QueryBundle::new(query, variants, self.config.include_original)
    }
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^(?:\d+\s*[.)、]|[-—•*])\s*").expect("list marker pattern is valid")
    })
}

/// Trim a model output line and strip list numbering, bullets, and quotes
fn clean_line(line: &str) -> String {
    let line = line.trim();
    let line = list_marker().replace(line, "");
    line.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}

/// Parse a line-per-variant model reply
///
/// Blank lines, repeats, and lines equal to `original` are skipped; at most
/// `max` variants are returned.
pub fn parse_variant_lines(text: &str, original: &str, max: usize) -> Vec<String> {
    let original_key = normalize(original);
    let mut seen = Vec::new();
    let mut variants = Vec::new();

    for line in text.lines().map(clean_line) {
        if variants.len() >= max {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let key = normalize(&line);
        if key == original_key || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        variants.push(line);
    }

    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragfuse_common::llm::MockLanguageModel;

    fn processor(model: MockLanguageModel) -> QueryProcessor {
        QueryProcessor::new(Arc::new(model), QueryProcessorConfig::default())
    }

    #[test]
    fn test_parse_strips_numbering_and_bullets() {
        let reply = "1. refund rules for yearly plans\n2) money back policy\n3、退款政策\n- return window\n— cancellation terms\n• billing refunds";
        let variants = parse_variant_lines(reply, "refund policy", 10);
        assert_eq!(
            variants,
            vec![
                "refund rules for yearly plans",
                "money back policy",
                "退款政策",
                "return window",
                "cancellation terms",
                "billing refunds",
            ]
        );
    }

    #[test]
    fn test_parse_skips_blank_duplicate_and_original() {
        let reply = "\n\nRefund Policy\n1. money back\n2. Money  back\n\n3. returns";
        let variants = parse_variant_lines(reply, "refund policy", 5);
        assert_eq!(variants, vec!["money back", "returns"]);
    }

    #[test]
    fn test_parse_respects_max() {
        let variants = parse_variant_lines("a1\nb2\nc3\nd4", "q", 2);
        assert_eq!(variants, vec!["a1", "b2"]);
    }

    #[tokio::test]
    async fn test_rewrite_success() {
        let p = processor(MockLanguageModel::replying("\"What is the refund policy for annual plans?\"\n"));
        assert_eq!(p.rewrite("refund annual").await, "What is the refund policy for annual plans?");
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_failure() {
        let p = processor(MockLanguageModel::failing("upstream 500"));
        assert_eq!(p.rewrite("refund annual").await, "refund annual");
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_empty_reply() {
        let p = processor(MockLanguageModel::replying("   \n  "));
        assert_eq!(p.rewrite("refund annual").await, "refund annual");
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_on_timeout() {
        let model = MockLanguageModel::replying("slow answer").with_delay(Duration::from_millis(200));
        let p = QueryProcessor::new(
            Arc::new(model),
            QueryProcessorConfig {
                model_timeout: Duration::from_millis(20),
                ..QueryProcessorConfig::default()
            },
        );
        assert_eq!(p.rewrite("refund annual").await, "refund annual");
    }

    #[tokio::test]
    async fn test_expand_success_and_failure() {
        let p = processor(MockLanguageModel::replying("1. money back\n2. returns\n3. refunds\n4. extra"));
        assert_eq!(
            p.expand("refund policy", 3).await,
            vec!["refund policy", "money back", "returns", "refunds"]
        );

        let p = processor(MockLanguageModel::failing("boom"));
        assert_eq!(p.expand("refund policy", 3).await, vec!["refund policy"]);

        let p = processor(MockLanguageModel::replying("\n\n"));
        assert_eq!(p.expand("refund policy", 3).await, vec!["refund policy"]);
    }

    #[tokio::test]
    async fn test_optimize_composes_rewrite_then_expand() {
        let model = MockLanguageModel::scripted(vec![
            Ok("refund policy for annual plans".into()),
            Ok("1. annual plan refunds\n2. yearly subscription money back".into()),
        ]);
        let p = processor(model);

        let bundle = p.optimize("refund annual").await;

        assert_eq!(bundle.original, "refund annual");
        assert_eq!(
            bundle.variants,
            vec![
                "refund annual",
                "refund policy for annual plans",
                "annual plan refunds",
                "yearly subscription money back",
            ]
        );
    }

    #[tokio::test]
    async fn test_optimize_total_failure_keeps_original() {
        let p = processor(MockLanguageModel::failing("down"));
        let bundle = p.optimize("refund annual").await;
        assert_eq!(bundle.variants, vec!["refund annual"]);
    }
}
