//! Speech synthesis engines.

pub mod command;
pub mod synthesizer;

pub use command::CommandEngine;
pub use synthesizer::{MockEngine, SynthesisEngine};
