//! Deterministic in-memory backend.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::{take_prefix, AsyncIo, IoCompletion, IoSubmitError, ReadRequest};

#[derive(Debug, Default)]
struct MemoryIoState {
    files: HashMap<PathBuf, Vec<u8>>,
    /// Submitted and not yet completed, in submission order.
    pending: Vec<ReadRequest>,
    held: HashSet<PathBuf>,
    failing: HashSet<PathBuf>,
    submitted: Vec<PathBuf>,
    shut_down: bool,
}

/// In-memory read backend.
///
/// Every read whose path is not held completes on the next
/// [`poll`](AsyncIo::poll), in submission order. Clones share state, so a
/// test can keep one handle while the asset manager owns another:
///
/// ```
/// use tessera_assets::io::{AsyncIo, MemoryIo, ReadRequest};
/// use tessera_assets::event::IoTag;
///
/// let handle = MemoryIo::new();
/// handle.insert_file("a.bin", b"abc".to_vec());
/// handle.hold("a.bin");
///
/// let mut backend = handle.clone();
/// backend.submit(ReadRequest { path: "a.bin".into(), len: None, tag: IoTag::Asset { batch: 0, slot: 0 } }).unwrap();
///
/// let mut done = Vec::new();
/// backend.poll(&mut done);
/// assert!(done.is_empty());
///
/// handle.release("a.bin");
/// backend.poll(&mut done);
/// assert_eq!(done[0].result.as_ref().unwrap(), b"abc");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryIo {
    state: Rc<RefCell<MemoryIoState>>,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert_file(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.state.borrow_mut().files.insert(path.into(), bytes);
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.state.borrow_mut().files.remove(path.as_ref());
    }

    /// Withhold completions for `path` until [`release`](Self::release).
    pub fn hold(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().held.insert(path.into());
    }

    pub fn release(&self, path: impl AsRef<Path>) {
        self.state.borrow_mut().held.remove(path.as_ref());
    }

    /// Complete every read of `path` with an I/O error.
    pub fn fail(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().failing.insert(path.into());
    }

    /// Refuse all further submissions.
    pub fn shut_down(&self) {
        self.state.borrow_mut().shut_down = true;
    }

    /// Every path submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<PathBuf> {
        self.state.borrow().submitted.clone()
    }

    /// Number of submissions for `path`.
    pub fn submission_count(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        self.state
            .borrow()
            .submitted
            .iter()
            .filter(|p| p.as_path() == path)
            .count()
    }
}

impl AsyncIo for MemoryIo {
    fn submit(&mut self, request: ReadRequest) -> Result<(), IoSubmitError> {
        let mut state = self.state.borrow_mut();
        if state.shut_down {
            return Err(IoSubmitError::ShutDown);
        }
        state.submitted.push(request.path.clone());
        state.pending.push(request);
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<IoCompletion>) {
        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(&mut state.pending);
        for request in pending {
            if state.held.contains(&request.path) {
                state.pending.push(request);
                continue;
            }

            let result = if state.failing.contains(&request.path) {
                Err(io::Error::new(io::ErrorKind::Other, "forced read failure"))
            } else {
                match state.files.get(&request.path) {
                    Some(bytes) => take_prefix(bytes.clone(), request.len),
                    None => Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} not found", request.path.display()),
                    )),
                }
            };

            out.push(IoCompletion {
                tag: request.tag,
                result,
            });
        }
    }

    fn in_flight(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::IoTag;

    fn request(path: &str, len: Option<usize>, slot: usize) -> ReadRequest {
        ReadRequest {
            path: path.into(),
            len,
            tag: IoTag::Asset { batch: 1, slot },
        }
    }

    #[test]
    fn completes_in_submission_order() {
        let mut io = MemoryIo::new();
        io.insert_file("a", b"aaaa".to_vec());
        io.insert_file("b", b"bb".to_vec());
        io.submit(request("b", Some(2), 0)).unwrap();
        io.submit(request("a", Some(3), 1)).unwrap();

        let mut out = Vec::new();
        io.poll(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, IoTag::Asset { batch: 1, slot: 0 });
        assert_eq!(out[1].result.as_ref().unwrap(), b"aaa");
        assert_eq!(io.in_flight(), 0);
    }

    #[test]
    fn missing_short_and_failing_reads_error() {
        let mut io = MemoryIo::new();
        io.insert_file("short", b"x".to_vec());
        io.insert_file("bad", b"xyz".to_vec());
        io.fail("bad");
        io.submit(request("missing", None, 0)).unwrap();
        io.submit(request("short", Some(4), 1)).unwrap();
        io.submit(request("bad", None, 2)).unwrap();

        let mut out = Vec::new();
        io.poll(&mut out);
        let kinds: Vec<_> = out
            .iter()
            .map(|c| c.result.as_ref().unwrap_err().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                io::ErrorKind::NotFound,
                io::ErrorKind::UnexpectedEof,
                io::ErrorKind::Other
            ]
        );
    }

    #[test]
    fn held_reads_wait_for_release() {
        let handle = MemoryIo::new();
        handle.insert_file("slow", b"s".to_vec());
        handle.insert_file("fast", b"f".to_vec());
        handle.hold("slow");

        let mut io = handle.clone();
        io.submit(request("slow", None, 0)).unwrap();
        io.submit(request("fast", None, 1)).unwrap();

        let mut out = Vec::new();
        io.poll(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag, IoTag::Asset { batch: 1, slot: 1 });
        assert_eq!(io.in_flight(), 1);

        handle.release("slow");
        io.poll(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(handle.submission_count("slow"), 1);
    }

    #[test]
    fn shut_down_refuses_submissions() {
        let mut io = MemoryIo::new();
        io.shut_down();
        assert!(matches!(
            io.submit(request("a", None, 0)),
            Err(IoSubmitError::ShutDown)
        ));
        assert!(io.submitted().is_empty());
    }
}
