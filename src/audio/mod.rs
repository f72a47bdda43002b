//! Audio formats, buffers and file I/O.

pub mod buffer;
pub mod decode;
pub mod format;
pub mod wav;

pub use buffer::{AudioBuffer, db_to_gain, gain_to_db};
pub use decode::decode_file;
pub use format::{Fragment, PcmFormat, SampleKind};
pub use wav::RawPcm;
