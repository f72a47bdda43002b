//! Job pipeline: chunk, synthesize, assemble, produce, tag, archive.
//!
//! A [`JobRunner`] drives one job through the stages in order; a
//! [`JobQueue`] feeds it jobs one at a time from a single consumer thread.

pub mod archive;
pub mod assembler;
pub mod clock;
pub mod error;
pub mod post_processor;
pub mod queue;
pub mod runner;
pub mod tagger;
pub mod worker;

pub use archive::{ArchiveMover, ArchiveReport, ArchiveStatus};
pub use assembler::{Assembler, AssemblyReport, SilencePolicy, collapse_silence};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StageError};
pub use post_processor::{PostProcessor, ProductionReport, ProductionTiming};
pub use queue::JobQueue;
pub use runner::JobRunner;
pub use tagger::{Tagger, TrackTags};
pub use worker::{RetryPolicy, SynthesisReport, SynthesisWorker};
