//! Splitting long text into sub-utterances for the generative backend
//!
//! Sentences are packed greedily up to the character limit. An oversized
//! sentence falls back to word packing, and an oversized word is hard-split.

/// Sentence-ending punctuation
const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '…'];

/// Full-width endings that need no following whitespace
const CJK_SENTENCE_ENDINGS: &[char] = &['。', '！', '？'];

/// Split into trimmed, non-empty sentences, keeping their punctuation
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = if CJK_SENTENCE_ENDINGS.contains(&c) {
            true
        } else if SENTENCE_ENDINGS.contains(&c) {
            chars.peek().map_or(true, |(_, next)| next.is_whitespace())
        } else {
            false
        };

        if at_boundary {
            let end = i + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);

    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Chunks of at most `max_chars` characters, in input order
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut packer = Packer::new(max_chars);

    for sentence in split_sentences(text) {
        if sentence.chars().count() <= max_chars {
            packer.push(sentence);
            continue;
        }

        for word in sentence.split_whitespace() {
            if word.chars().count() <= max_chars {
                packer.push(word);
            } else {
                for piece in hard_split(word, max_chars) {
                    packer.push(&piece);
                }
            }
        }
    }

    packer.finish()
}

fn hard_split(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

/// Greedy space-joined packing
struct Packer {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, piece: &str) {
        let len = piece.chars().count();
        if self.current_len > 0 && self.current_len + 1 + len > self.max_chars {
            self.flush();
        }

        if self.current_len > 0 {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if self.current_len > 0 {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_split_keeps_punctuation() {
        let sentences = split_sentences("Hello there. How are you?! Fine...  Bye");
        assert_eq!(sentences, vec!["Hello there.", "How are you?!", "Fine...", "Bye"]);
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        assert_eq!(split_sentences("Pi is 3.14 roughly."), vec!["Pi is 3.14 roughly."]);
    }

    #[test]
    fn test_short_text_single_chunk() {
        assert_eq!(chunk_text("Hi. Bye.", 150), vec!["Hi. Bye.".to_string()]);
    }

    #[test]
    fn test_long_word_hard_split() {
        let word = "a".repeat(25);
        let chunks = chunk_text(&word, 10);
        assert_eq!(chunks, vec!["a".repeat(10), "a".repeat(10), "a".repeat(5)]);
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("   ", 150).is_empty());
    }
}
