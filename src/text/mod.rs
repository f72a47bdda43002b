//! Text preparation for synthesis: sentence tokenization and chunking.

pub mod chunker;
pub mod sentence;

pub use chunker::{Chunker, TextUnit, Units};
pub use sentence::{PunctuationSplitter, SentenceSplitter};
