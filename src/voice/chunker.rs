//! Sentence chunking for streamed model output
//!
//! Model text arrives a few tokens at a time. Synthesis sounds best one
//! sentence at a time, so deltas are buffered until a complete sentence of
//! at least `min_chars` is available. Sentences longer than `max_chars` are
//! split at clause punctuation, then at word boundaries.

use crate::config::ChunkerConfig;

/// Incremental sentence chunker
#[derive(Debug, Clone)]
pub struct TextChunker {
    buffer: String,
    min_chars: usize,
    max_chars: usize,
}

impl TextChunker {
    #[must_use]
    pub const fn new(config: ChunkerConfig) -> Self {
        Self {
            buffer: String::new(),
            min_chars: config.min_chars,
            max_chars: config.max_chars,
        }
    }

    /// Append a delta and return every chunk that is now complete
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut chunks = Vec::new();
        while let Some(end) = self.next_boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            chunks.extend(self.split_long(&sentence));
        }
        chunks
    }

    /// Drain whatever remains at end of stream
    pub fn flush(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.split_long(&rest)
    }

    /// Drop buffered text without emitting it
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte offset just past the first sentence end whose span is long enough
    ///
    /// A `.`, `!` or `?` only ends a sentence once whitespace follows it, so
    /// decimals ("1.5") and a trailing period still being streamed are held.
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            let end = match c {
                '\n' => idx + 1,
                '.' | '!' | '?' => match chars.peek() {
                    Some((_, next)) if next.is_whitespace() => idx + c.len_utf8(),
                    _ => continue,
                },
                _ => continue,
            };
            if char_len(self.buffer[..end].trim()) >= self.min_chars {
                return Some(end);
            }
        }
        None
    }

    /// Split a sentence into pieces no longer than `max_chars`
    fn split_long(&self, sentence: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut rest = sentence.trim();

        while char_len(rest) > self.max_chars {
            let Some(cut) = self.clause_cut(rest).or_else(|| self.word_cut(rest)) else {
                break;
            };
            let (head, tail) = rest.split_at(cut);
            pieces.push(head.trim_end().to_string());
            rest = tail.trim_start();
        }

        if !rest.is_empty() {
            pieces.push(rest.to_string());
        }
        pieces
    }

    /// Last `,` or `;` that keeps both sides at least `min_chars` long
    fn clause_cut(&self, text: &str) -> Option<usize> {
        let mut best = None;
        for (count, (idx, c)) in text.char_indices().enumerate() {
            let head_len = count + 1;
            if head_len > self.max_chars {
                break;
            }
            if matches!(c, ',' | ';') && head_len >= self.min_chars {
                let cut = idx + c.len_utf8();
                if char_len(text[cut..].trim_start()) >= self.min_chars {
                    best = Some(cut);
                }
            }
        }
        best
    }

    /// Last whitespace before `max_chars`, never inside a word
    ///
    /// Prefers a cut that leaves both sides at least `min_chars` long. A
    /// single word longer than `max_chars` is kept whole.
    fn word_cut(&self, text: &str) -> Option<usize> {
        let mut best = None;
        let mut fallback = None;
        for (count, (idx, c)) in text.char_indices().enumerate() {
            if !c.is_whitespace() || count == 0 {
                continue;
            }
            if count > self.max_chars {
                if best.is_none() && fallback.is_none() {
                    return Some(idx);
                }
                break;
            }
            fallback = Some(idx);
            if count >= self.min_chars && char_len(text[idx..].trim_start()) >= self.min_chars {
                best = Some(idx);
            }
        }
        best.or(fallback)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(min_chars: usize, max_chars: usize) -> TextChunker {
        TextChunker::new(ChunkerConfig {
            min_chars,
            max_chars,
        })
    }

    fn normalized(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn emits_complete_sentences() {
        let mut c = chunker(10, 200);
        let out = c.push("Box this lap for fuel. Tyres look ");
        assert_eq!(out, vec!["Box this lap for fuel."]);
        assert_eq!(c.pending(), " Tyres look ");

        let out = c.push("fine for now! ");
        assert_eq!(out, vec!["Tyres look fine for now!"]);
    }

    #[test]
    fn holds_trailing_period_until_whitespace() {
        let mut c = chunker(5, 200);
        assert!(c.push("Gap is 1.").is_empty());
        assert!(c.push("5 seconds.").is_empty());
        assert_eq!(c.push(" "), vec!["Gap is 1.5 seconds."]);
    }

    #[test]
    fn short_sentences_are_held_back() {
        let mut c = chunker(20, 200);
        assert!(c.push("Copy. ").is_empty());
        let out = c.push("Push now, gap is closing. ");
        assert_eq!(out, vec!["Copy. Push now, gap is closing."]);
    }

    #[test]
    fn newline_ends_a_sentence() {
        let mut c = chunker(5, 200);
        let out = c.push("Yellow in sector two\nStay off");
        assert_eq!(out, vec!["Yellow in sector two"]);
    }

    #[test]
    fn long_sentence_splits_at_clauses() {
        let mut c = chunker(10, 40);
        let out = c.push(
            "Fuel is fine for now, tyres are holding up well, and the gap behind is stable. ",
        );
        assert_eq!(
            out,
            vec![
                "Fuel is fine for now,",
                "tyres are holding up well,",
                "and the gap behind is stable.",
            ]
        );
        for chunk in &out {
            assert!(chunk.chars().count() <= 40, "too long: {chunk}");
            assert!(chunk.chars().count() >= 10, "too short: {chunk}");
        }
    }

    #[test]
    fn hard_cut_never_splits_words() {
        let mut c = chunker(5, 20);
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india";
        let out = c.flush_with(text);
        for chunk in &out {
            assert!(chunk.chars().count() <= 20, "too long: {chunk}");
            for word in chunk.split_whitespace() {
                assert!(text.split_whitespace().any(|w| w == word), "split word: {word}");
            }
        }
        assert_eq!(normalized(&out.join(" ")), normalized(text));
    }

    #[test]
    fn flush_drains_remainder() {
        let mut c = chunker(20, 200);
        assert!(c.push("Copy that").is_empty());
        assert_eq!(c.flush(), vec!["Copy that"]);
        assert!(c.flush().is_empty());
    }

    #[test]
    fn streamed_chunks_round_trip_within_bounds() {
        let text = "Okay. You are P4, two tenths up on the car ahead. \
            Fuel looks good for another twelve laps, maybe thirteen if you lift and coast into turn one, \
            turn four, and the hairpin at the end of the back straight which is where you are losing the most time. \
            Yellow flag in sector two!\nStay focused. Box box.";
        let mut c = chunker(15, 80);
        let chars: Vec<char> = text.chars().collect();
        let mut emitted = Vec::new();
        for piece in chars.chunks(7) {
            let delta: String = piece.iter().collect();
            emitted.extend(c.push(&delta));
        }
        let flushed = c.flush();

        for chunk in &emitted {
            let len = chunk.chars().count();
            assert!((15..=80).contains(&len), "out of bounds ({len}): {chunk}");
        }

        let all: Vec<String> = emitted.into_iter().chain(flushed).collect();
        assert_eq!(normalized(&all.join(" ")), normalized(text));
    }

    #[test]
    fn clear_discards_buffer() {
        let mut c = chunker(5, 200);
        c.push("Half a sent");
        c.clear();
        assert!(c.flush().is_empty());
    }

    impl TextChunker {
        fn flush_with(&mut self, text: &str) -> Vec<String> {
            self.buffer.push_str(text);
            self.flush()
        }
    }
}
