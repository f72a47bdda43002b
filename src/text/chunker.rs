//! Groups sentences into size-bounded synthesis units.

use crate::text::sentence::{PunctuationSplitter, SentenceSplitter};
use serde::Serialize;
use std::vec::IntoIter;

/// One bounded slice of source text, submitted to the engine in a single call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnit {
    /// Dense 0-based position among the retained units of a job.
    pub index: usize,
    pub text: String,
}

/// Splits text into units of at most `max_len` characters on sentence boundaries.
///
/// A sentence longer than `max_len` becomes a unit on its own rather than
/// being cut. Sentences and units without any alphanumeric character are
/// dropped.
pub struct Chunker<S: SentenceSplitter = PunctuationSplitter> {
    max_len: usize,
    splitter: S,
}

impl Chunker<PunctuationSplitter> {
    /// Creates a chunker using the default punctuation splitter.
    pub fn new(max_len: usize) -> Self {
        Self::with_splitter(max_len, PunctuationSplitter)
    }
}

impl<S: SentenceSplitter> Chunker<S> {
    /// Creates a chunker with a custom sentence splitter.
    pub fn with_splitter(max_len: usize, splitter: S) -> Self {
        Self {
            max_len: max_len.max(1),
            splitter,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns the lazy unit sequence for `text`.
    pub fn chunk<'a>(&self, text: &'a str) -> Units<'a> {
        let sentences: Vec<&'a str> = self
            .splitter
            .split(text)
            .into_iter()
            .filter(|s| has_alphanumeric(s))
            .collect();

        Units {
            sentences: sentences.into_iter(),
            pending: None,
            max_len: self.max_len,
            next_index: 0,
        }
    }
}

/// Iterator over the units of one text, produced by [`Chunker::chunk`].
pub struct Units<'a> {
    sentences: IntoIter<&'a str>,
    /// Carry-over sentence that did not fit into the previous unit.
    pending: Option<&'a str>,
    max_len: usize,
    next_index: usize,
}

impl Units<'_> {
    fn next_text(&mut self) -> Option<String> {
        let first = self.pending.take().or_else(|| self.sentences.next())?;
        let mut current = String::from(first);
        let mut current_len = first.chars().count();

        for sentence in self.sentences.by_ref() {
            let sentence_len = sentence.chars().count();
            if current_len + 1 + sentence_len > self.max_len {
                self.pending = Some(sentence);
                break;
            }
            current.push(' ');
            current.push_str(sentence);
            current_len += 1 + sentence_len;
        }

        Some(current)
    }
}

impl Iterator for Units<'_> {
    type Item = TextUnit;

    fn next(&mut self) -> Option<TextUnit> {
        loop {
            let text = self.next_text()?;
            let text = text.trim();
            if !has_alphanumeric(text) {
                continue;
            }
            let unit = TextUnit {
                index: self.next_index,
                text: text.to_string(),
            };
            self.next_index += 1;
            return Some(unit);
        }
    }
}

fn has_alphanumeric(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunker: &Chunker, text: &str) -> Vec<String> {
        chunker.chunk(text).map(|u| u.text).collect()
    }

    #[test]
    fn groups_sentences_up_to_limit() {
        let chunker = Chunker::new(30);
        let units = texts(&chunker, "One two. Three four. Five six seven. Eight.");

        assert_eq!(units, vec!["One two. Three four.", "Five six seven. Eight."]);
        assert!(units.iter().all(|u| u.chars().count() <= 30));
    }

    #[test]
    fn exact_fit_is_kept_together() {
        // "Aaaa. Bbbb." is 11 characters.
        let chunker = Chunker::new(11);
        assert_eq!(texts(&chunker, "Aaaa. Bbbb."), vec!["Aaaa. Bbbb."]);

        let chunker = Chunker::new(10);
        assert_eq!(texts(&chunker, "Aaaa. Bbbb."), vec!["Aaaa.", "Bbbb."]);
    }

    #[test]
    fn oversized_sentence_becomes_own_unit() {
        let chunker = Chunker::new(10);
        let units = texts(&chunker, "Hi. This sentence is far too long to fit. Ok.");

        assert_eq!(
            units,
            vec!["Hi.", "This sentence is far too long to fit.", "Ok."]
        );
    }

    #[test]
    fn oversized_first_sentence_is_not_dropped() {
        let chunker = Chunker::new(5);
        let units: Vec<TextUnit> = chunker.chunk("Extraordinarily long.").collect();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[0].text, "Extraordinarily long.");
    }

    #[test]
    fn punctuation_only_sentences_are_discarded_and_indices_stay_dense() {
        let chunker = Chunker::new(8);
        let units: Vec<TextUnit> = chunker
            .chunk("Alpha one. ... !!! Beta two. -- Gamma.")
            .collect();

        let indices: Vec<usize> = units.iter().map(|u| u.index).collect();
        assert_eq!(indices, (0..units.len()).collect::<Vec<_>>());
        assert!(units.iter().all(|u| has_alphanumeric(&u.text)));
        assert_eq!(units[0].text, "Alpha one.");
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "The owl arrived at dawn. It carried a letter! Nobody knew who sent it. \
                    The seal was green? Perhaps. Mr. Filch grumbled about the mess.";
        for max_len in [1, 10, 25, 60, 480] {
            let chunker = Chunker::new(max_len);
            let first: Vec<TextUnit> = chunker.chunk(text).collect();
            let second: Vec<TextUnit> = chunker.chunk(text).collect();
            assert_eq!(first, second, "max_len {}", max_len);
        }
    }

    #[test]
    fn units_respect_limit_unless_single_sentence() {
        let text = "Short. A rather longer sentence appears here. Tiny. \
                    Another moderately sized sentence follows it. End.";
        let splitter = PunctuationSplitter;
        let sentences = splitter.split(text);

        for max_len in [5, 12, 20, 40, 80] {
            let chunker = Chunker::new(max_len);
            for unit in chunker.chunk(text) {
                let len = unit.text.chars().count();
                assert!(
                    len <= max_len || sentences.contains(&unit.text.as_str()),
                    "unit {:?} exceeds {} and is not a single sentence",
                    unit.text,
                    max_len
                );
            }
        }
    }

    #[test]
    fn no_text_is_lost() {
        let text = "One. Two three. Four five six. Seven.";
        let chunker = Chunker::new(12);
        let joined = texts(&chunker, text).join(" ");
        assert_eq!(joined, text);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // Each sentence is 6 characters but more bytes.
        let chunker = Chunker::new(13);
        let units = texts(&chunker, "Éléve. Ça va.");
        assert_eq!(units, vec!["Éléve. Ça va."]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let chunker = Chunker::new(100);
        assert_eq!(chunker.chunk("").count(), 0);
        assert_eq!(chunker.chunk("... --- !!!").count(), 0);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let chunker = Chunker::new(0);
        assert_eq!(chunker.max_len(), 1);
        assert_eq!(texts(&chunker, "Ab. Cd."), vec!["Ab.", "Cd."]);
    }
}
