//! Sentence tokenization.
//!
//! The chunker only needs sentence boundaries, so tokenization sits behind a
//! trait and can be swapped for a language-aware implementation.

/// Splits text into sentences.
pub trait SentenceSplitter: Send + Sync {
    /// Returns the sentences of `text` in order, trimmed and non-empty.
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Abbreviations that end in a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "vs", "etc", "e.g", "i.e", "fig",
    "gen", "col", "capt", "lt", "sgt", "rev", "hon",
];

/// Rule-based splitter on terminal punctuation.
///
/// A sentence ends at a run of `.`, `!` or `?` (plus any closing quotes or
/// brackets) followed by whitespace or end of input. A period after a known
/// abbreviation or a single capital letter (initials) does not end a sentence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PunctuationSplitter;

impl PunctuationSplitter {
    pub fn new() -> Self {
        Self
    }

    fn is_closer(ch: char) -> bool {
        matches!(ch, '"' | '\'' | ')' | ']' | '}' | '\u{201D}' | '\u{2019}' | '\u{00BB}')
    }

    fn is_terminal(ch: char) -> bool {
        matches!(ch, '.' | '!' | '?' | '\u{2026}')
    }

    /// Whether the word ending right before `dot_pos` suppresses a break.
    fn is_abbreviation(text: &str, dot_pos: usize) -> bool {
        let word = text[..dot_pos]
            .rsplit(|c: char| c.is_whitespace() || c == '(' || c == '"')
            .next()
            .unwrap_or("");
        if word.is_empty() {
            return false;
        }
        let mut chars = word.chars();
        if let (Some(first), None) = (chars.next(), chars.next())
            && first.is_uppercase()
        {
            return true;
        }
        let lower = word.to_lowercase();
        ABBREVIATIONS.contains(&lower.as_str())
    }
}

impl SentenceSplitter for PunctuationSplitter {
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            if !Self::is_terminal(ch) {
                continue;
            }

            let single_period = ch == '.'
                && !matches!(chars.peek(), Some((_, next)) if Self::is_terminal(*next));

            // Consume the rest of the terminal run and any closers.
            let mut end = pos + ch.len_utf8();
            while let Some(&(next_pos, next)) = chars.peek() {
                if Self::is_terminal(next) || Self::is_closer(next) {
                    end = next_pos + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            let at_boundary = match chars.peek() {
                None => true,
                Some((_, next)) => next.is_whitespace(),
            };
            if !at_boundary {
                continue;
            }
            if single_period && Self::is_abbreviation(text, pos) {
                continue;
            }

            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }

        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }

        sentences
    }
}
