//! Non-blocking read facility used by the pipeline.
//!
//! The pipeline submits [`ReadRequest`]s and, once per tick, drains whatever
//! [`IoCompletion`]s are ready. Neither call blocks. Completions may arrive in
//! any order; each echoes the [`IoTag`] of its request.
//!
//! Two backends are provided:
//!
//! - [`ThreadedFileIo`]: reads from the filesystem on a small pool of worker
//!   threads, standing in for the operating system's asynchronous file API.
//! - [`MemoryIo`]: serves reads from an in-memory file table on the next
//!   poll, with per-path hold/release and forced failures. Deterministic;
//!   used by tests, benchmarks and tools.

mod memory;
mod threaded;

use std::io;
use std::path::PathBuf;

use crate::event::IoTag;

pub use memory::MemoryIo;
pub use threaded::ThreadedFileIo;

// ---------------------------------------------------------------------------
// Requests / completions
// ---------------------------------------------------------------------------

/// One read to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: PathBuf,
    /// Bytes to read from the start of the file; `None` reads to EOF.
    pub len: Option<usize>,
    pub tag: IoTag,
}

/// Outcome of one [`ReadRequest`].
#[derive(Debug)]
pub struct IoCompletion {
    pub tag: IoTag,
    pub result: io::Result<Vec<u8>>,
}

/// The backend refused a request outright.
#[derive(Debug, thiserror::Error)]
pub enum IoSubmitError {
    /// The backend has shut down and accepts no more requests.
    #[error("async I/O backend is shut down")]
    ShutDown,
}

// ---------------------------------------------------------------------------
// AsyncIo
// ---------------------------------------------------------------------------

/// A non-blocking read backend.
pub trait AsyncIo {
    /// Queue a read. Must not block.
    fn submit(&mut self, request: ReadRequest) -> Result<(), IoSubmitError>;

    /// Append every completion that is ready now to `out`. Must not block.
    fn poll(&mut self, out: &mut Vec<IoCompletion>);

    /// Number of submitted reads whose completion has not been polled yet.
    fn in_flight(&self) -> usize;
}

/// Read `len` bytes (or everything, for `None`) from the start of `path`.
///
/// A file shorter than `len` is an `UnexpectedEof` error.
pub(crate) fn read_prefix(path: &std::path::Path, len: Option<usize>) -> io::Result<Vec<u8>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    match len {
        Some(len) => {
            let mut bytes = vec![0u8; len];
            file.read_exact(&mut bytes)?;
            Ok(bytes)
        }
        None => {
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(bytes)
        }
    }
}

/// Truncate `bytes` to `len`, or fail if it is shorter.
pub(crate) fn take_prefix(mut bytes: Vec<u8>, len: Option<usize>) -> io::Result<Vec<u8>> {
    match len {
        Some(len) if bytes.len() < len => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("requested {len} bytes, file holds {}", bytes.len()),
        )),
        Some(len) => {
            bytes.truncate(len);
            Ok(bytes)
        }
        None => Ok(bytes),
    }
}
