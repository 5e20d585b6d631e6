//! Frame I/O Adapter: bidirectional conversion between a video file and a set of
//! per-frame PNGs plus sidecar audio/subtitle files, and store-only archiving of
//! batch payloads for transport.

pub mod archive;
pub mod assemble;
pub mod command;
pub mod error;
pub mod extract;
pub mod probe;
pub mod progress;

pub use archive::{pack, unpack};
pub use assemble::assemble;
pub use error::{MediaError, MediaResult};
pub use extract::{extract, ExtractResult};
pub use probe::{probe, ProbeResult, StreamDescriptor};
