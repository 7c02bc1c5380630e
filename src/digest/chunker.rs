//! Token-budget chunking of ordered message streams.
//!
//! Messages are estimated with a word-count heuristic, packed greedily into
//! contiguous runs that fit the budget, and rendered one line per message for
//! prompting. Chunks borrow from the input slice, so flattening them in order
//! yields the input exactly.
//!
//! The partition is single-pass and never rebalances: a later message that
//! would fit into the slack of an earlier chunk is not moved there. Chunk
//! count is therefore not always minimal, but ordering and contiguity are
//! preserved, which downstream prompts rely on.

use crate::digest::record::ChatMessage;
use crate::error::DigestError;
use serde::Serialize;

/// Content budget per chunk. Leaves headroom in a ~32k context window for the
/// prompt template and the model's output.
pub const DEFAULT_MAX_TOKENS: usize = 8_000;

/// One word is roughly 1.3 subword tokens once punctuation and technical
/// identifiers are split.
pub const DEFAULT_TOKENS_PER_WORD: f64 = 1.3;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    tokens_per_word: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            tokens_per_word: DEFAULT_TOKENS_PER_WORD,
        }
    }
}

impl TokenEstimator {
    pub fn new(tokens_per_word: f64) -> Result<Self, DigestError> {
        if !(tokens_per_word.is_finite() && tokens_per_word > 0.0) {
            return Err(DigestError::InvalidTokensPerWord(tokens_per_word));
        }
        Ok(Self { tokens_per_word })
    }

    pub fn tokens_per_word(&self) -> f64 {
        self.tokens_per_word
    }

    /// Estimate the token count of `text`. Blank text costs nothing; any
    /// non-blank text costs at least one token.
    pub fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        if words == 0 {
            return 0;
        }
        let estimated = (words as f64 * self.tokens_per_word).round() as usize;
        estimated.max(1)
    }
}

/// Estimate with the default calibration.
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator::default().estimate(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_messages: usize,
    pub total_tokens: usize,
    pub estimated_chunks: usize,
    pub avg_tokens_per_message: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunker {
    estimator: TokenEstimator,
    max_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            estimator: TokenEstimator::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl Chunker {
    pub fn new(max_tokens: usize, tokens_per_word: f64) -> Result<Self, DigestError> {
        if max_tokens == 0 {
            return Err(DigestError::InvalidChunkBudget(max_tokens));
        }
        Ok(Self {
            estimator: TokenEstimator::new(tokens_per_word)?,
            max_tokens,
        })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Split `messages` into contiguous chunks whose estimated size stays
    /// within `max_tokens`. A message that alone exceeds the budget gets a
    /// chunk of its own instead of being dropped or cut.
    pub fn chunk_messages<'a, M: ChatMessage>(&self, messages: &'a [M]) -> Vec<&'a [M]> {
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut running = 0usize;

        for (idx, message) in messages.iter().enumerate() {
            let tokens = self.estimator.estimate(message.content());
            if idx > start && running.saturating_add(tokens) > self.max_tokens {
                chunks.push(&messages[start..idx]);
                start = idx;
                running = tokens;
            } else {
                running = running.saturating_add(tokens);
            }
        }

        if start < messages.len() {
            chunks.push(&messages[start..]);
        }
        chunks
    }

    /// Chunk, then render each chunk as one prompt-ready block.
    pub fn chunk_and_format<M: ChatMessage>(
        &self,
        messages: &[M],
        include_timestamps: bool,
    ) -> Vec<String> {
        self.chunk_messages(messages)
            .into_iter()
            .map(|chunk| format_for_llm(chunk, include_timestamps))
            .collect()
    }

    pub fn total_tokens<M: ChatMessage>(&self, messages: &[M]) -> usize {
        messages
            .iter()
            .map(|m| self.estimator.estimate(m.content()))
            .sum()
    }

    /// Quick size report without partitioning.
    ///
    /// `estimated_chunks` is computed against [`DEFAULT_MAX_TOKENS`], not this
    /// chunker's budget. Use [`Chunker::stats_with_budget`] to cross-check a
    /// custom budget. Input whose messages are all blank estimates zero
    /// chunks.
    pub fn stats<M: ChatMessage>(&self, messages: &[M]) -> ChunkStats {
        self.stats_with_budget(messages, DEFAULT_MAX_TOKENS)
    }

    pub fn stats_with_budget<M: ChatMessage>(&self, messages: &[M], budget: usize) -> ChunkStats {
        if messages.is_empty() {
            return ChunkStats {
                total_messages: 0,
                total_tokens: 0,
                estimated_chunks: 0,
                avg_tokens_per_message: 0.0,
            };
        }

        let total_tokens = self.total_tokens(messages);
        let estimated_chunks = total_tokens.div_ceil(budget.max(1));
        let avg = total_tokens as f64 / messages.len() as f64;
        ChunkStats {
            total_messages: messages.len(),
            total_tokens,
            estimated_chunks,
            avg_tokens_per_message: (avg * 10.0).round() / 10.0,
        }
    }
}

/// Render messages as `[YYYY-MM-DD HH:MM] author: content` lines.
///
/// Blank messages (attachment-only posts) are skipped. A message without a
/// timestamp falls back to `author: content` even when timestamps are on.
pub fn format_for_llm<M: ChatMessage>(messages: &[M], include_timestamps: bool) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let content = message.content().trim();
        if content.is_empty() {
            continue;
        }
        let author = message.author();
        match message.created_at() {
            Some(ts) if include_timestamps => {
                lines.push(format!(
                    "[{}] {author}: {content}",
                    ts.format(TIMESTAMP_FORMAT)
                ));
            }
            _ => lines.push(format!("{author}: {content}")),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::record::MessageRecord;
    use chrono::NaiveDate;

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    // 3077 words * 1.3 = 4000.1 -> 4000 tokens
    fn record_of_4000_tokens(author: &str) -> MessageRecord {
        MessageRecord::new(author, words(3077))
    }

    fn varied_records(count: usize, seed: u64) -> Vec<MessageRecord> {
        let mut state = seed;
        (0..count)
            .map(|i| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let n = ((state >> 33) % 120) as usize;
                MessageRecord::new(format!("user{}", i % 7), words(n))
            })
            .collect()
    }

    #[test]
    fn estimate_tokens_matches_calibration() {
        assert_eq!(estimate_tokens("hello world"), 3);
        assert_eq!(estimate_tokens("one"), 1);
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("  \n\t "), 0);
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
    }

    #[test]
    fn custom_calibration_is_respected() {
        let estimator = TokenEstimator::new(2.0).expect("valid calibration");
        assert_eq!(estimator.estimate("hello world"), 4);
        let tiny = TokenEstimator::new(0.1).expect("valid calibration");
        assert_eq!(tiny.estimate("hello"), 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(
            Chunker::new(0, 1.3),
            Err(DigestError::InvalidChunkBudget(0))
        ));
        assert!(matches!(
            TokenEstimator::new(0.0),
            Err(DigestError::InvalidTokensPerWord(_))
        ));
        assert!(TokenEstimator::new(f64::NAN).is_err());
        assert!(TokenEstimator::new(-1.0).is_err());
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        let records: Vec<MessageRecord> = Vec::new();
        assert!(chunker.chunk_messages(&records).is_empty());
        assert!(chunker.chunk_and_format(&records, true).is_empty());
        assert_eq!(format_for_llm(&records, true), "");
    }

    #[test]
    fn third_record_starts_new_chunk_when_budget_is_full() {
        let records = vec![
            record_of_4000_tokens("r1"),
            record_of_4000_tokens("r2"),
            record_of_4000_tokens("r3"),
        ];
        let chunker = Chunker::new(8_000, DEFAULT_TOKENS_PER_WORD).expect("chunker");
        let chunks = chunker.chunk_messages(&records);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], &records[0..2]);
        assert_eq!(chunks[1], &records[2..3]);
    }

    #[test]
    fn oversized_record_occupies_its_own_chunk() {
        // 6924 words * 1.3 = 9001.2 -> 9001 tokens
        let big = MessageRecord::new("big", words(6924));
        let records = vec![
            MessageRecord::new("a", "short one"),
            big.clone(),
            MessageRecord::new("b", "short two"),
        ];
        let chunker = Chunker::default();
        let chunks = chunker.chunk_messages(&records);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], std::slice::from_ref(&big));

        let alone = vec![big];
        let chunks = chunker.chunk_messages(&alone);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1);
    }

    #[test]
    fn greedy_partition_does_not_backfill_slack() {
        // budget 10: [7] [7, 3]; the 3 would also have fit after the first 7
        let records = vec![
            MessageRecord::new("a", words(5)),
            MessageRecord::new("b", words(5)),
            MessageRecord::new("c", words(2)),
        ];
        let chunker = Chunker::new(10, DEFAULT_TOKENS_PER_WORD).expect("chunker");
        let chunks = chunker.chunk_messages(&records);
        assert_eq!(chunks, vec![&records[0..1], &records[1..3]]);
    }

    #[test]
    fn chunking_preserves_order_budget_and_atomicity() {
        for seed in 1..20u64 {
            let records = varied_records(200, seed);
            for budget in [1usize, 10, 57, 150, 1_000, 8_000] {
                let chunker = Chunker::new(budget, DEFAULT_TOKENS_PER_WORD).expect("chunker");
                let chunks = chunker.chunk_messages(&records);

                let flattened: Vec<MessageRecord> =
                    chunks.iter().flat_map(|c| c.iter().cloned()).collect();
                assert_eq!(flattened, records, "seed={seed} budget={budget}");

                for chunk in &chunks {
                    assert!(!chunk.is_empty());
                    let total = chunker.total_tokens(chunk);
                    if chunk.len() > 1 {
                        assert!(total <= budget, "seed={seed} budget={budget}");
                    }
                }

                for record in &records {
                    if estimate_tokens(record.content()) > budget {
                        let holder = chunks
                            .iter()
                            .find(|c| c.iter().any(|r| std::ptr::eq(r, record)))
                            .expect("record is in some chunk");
                        assert_eq!(holder.len(), 1);
                    }
                }
            }
        }
    }

    #[test]
    fn format_skips_blank_content() {
        let records = vec![
            MessageRecord::new("alice", "a"),
            MessageRecord::new("bob", ""),
            MessageRecord {
                author: Some("carol".to_string()),
                content: None,
                ..MessageRecord::default()
            },
        ];
        assert_eq!(format_for_llm(&records, false), "alice: a");
    }

    #[test]
    fn format_prefixes_timestamp_only_when_present() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(14, 32, 59))
            .expect("valid timestamp");
        let records = vec![
            MessageRecord::new("alice", "  Hello, how do I use malloc?  ").at(ts),
            MessageRecord::new("bob", "malloc(size) allocates size bytes."),
        ];
        assert_eq!(
            format_for_llm(&records, true),
            "[2024-01-15 14:32] alice: Hello, how do I use malloc?\nbob: malloc(size) allocates size bytes."
        );
        assert_eq!(
            format_for_llm(&records, false),
            "alice: Hello, how do I use malloc?\nbob: malloc(size) allocates size bytes."
        );
    }

    #[test]
    fn format_resolves_author_fallbacks() {
        let records = vec![
            MessageRecord {
                username: Some("raw_name".to_string()),
                content: Some("from username".to_string()),
                ..MessageRecord::default()
            },
            MessageRecord {
                content: Some("from nobody".to_string()),
                ..MessageRecord::default()
            },
        ];
        assert_eq!(
            format_for_llm(&records, true),
            "raw_name: from username\nunknown: from nobody"
        );
    }

    #[test]
    fn format_is_deterministic() {
        let records = varied_records(50, 7);
        assert_eq!(format_for_llm(&records, true), format_for_llm(&records, true));
    }

    #[test]
    fn chunk_and_format_yields_one_block_per_chunk() {
        let records = vec![
            MessageRecord::new("a", words(4)),
            MessageRecord::new("b", words(4)),
            MessageRecord::new("c", words(4)),
        ];
        let chunker = Chunker::new(12, DEFAULT_TOKENS_PER_WORD).expect("chunker");
        let blocks = chunker.chunk_and_format(&records, false);
        assert_eq!(blocks, vec!["a: w w w w\nb: w w w w", "c: w w w w"]);
    }

    #[test]
    fn stats_on_empty_input_is_all_zero() {
        let records: Vec<MessageRecord> = Vec::new();
        let stats = Chunker::default().stats(&records);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.estimated_chunks, 0);
        assert_eq!(stats.avg_tokens_per_message, 0.0);
    }

    #[test]
    fn stats_on_blank_messages_estimates_no_chunks() {
        let records = vec![MessageRecord::new("a", " "), MessageRecord::new("b", "")];
        let stats = Chunker::default().stats(&records);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.estimated_chunks, 0);
        assert_eq!(stats.avg_tokens_per_message, 0.0);

        let one_word = vec![MessageRecord::new("a", "hi")];
        assert_eq!(Chunker::default().stats(&one_word).estimated_chunks, 1);
    }

    #[test]
    fn stats_uses_default_budget_for_chunk_estimate() {
        let records: Vec<MessageRecord> = (0..4).map(|i| record_of_4000_tokens(&i.to_string())).collect();
        let small = Chunker::new(1_000, DEFAULT_TOKENS_PER_WORD).expect("chunker");
        let stats = small.stats(&records);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.total_tokens, 16_000);
        assert_eq!(stats.estimated_chunks, 2);
        assert_eq!(stats.avg_tokens_per_message, 4000.0);

        let cross_check = small.stats_with_budget(&records, small.max_tokens());
        assert_eq!(cross_check.estimated_chunks, 16);
    }

    #[test]
    fn stats_rounds_average_to_one_decimal() {
        let records = vec![
            MessageRecord::new("a", "one"),
            MessageRecord::new("b", "one two"),
            MessageRecord::new("c", "one two three"),
        ];
        // 1 + 3 + 4 = 8 tokens over 3 messages
        let stats = Chunker::default().stats(&records);
        assert_eq!(stats.total_tokens, 8);
        assert_eq!(stats.estimated_chunks, 1);
        assert_eq!(stats.avg_tokens_per_message, 2.7);
    }
}
