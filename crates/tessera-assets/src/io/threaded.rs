//! Filesystem backend running reads on worker threads.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::{read_prefix, AsyncIo, IoCompletion, IoSubmitError, ReadRequest};

/// Reads files on a fixed pool of worker threads.
///
/// Requests go to the workers over one channel and completions come back
/// over another; [`poll`](AsyncIo::poll) only drains the completion channel
/// with `try_recv`. Dropping the backend closes the request channel and joins
/// every worker.
pub struct ThreadedFileIo {
    request_tx: Option<Sender<ReadRequest>>,
    completion_rx: Receiver<IoCompletion>,
    workers: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl ThreadedFileIo {
    /// Spawn `workers` reader threads (at least one).
    pub fn new(workers: usize) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<ReadRequest>();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded::<IoCompletion>();

        let workers = (0..workers.max(1))
            .map(|index| {
                let request_rx = request_rx.clone();
                let completion_tx = completion_tx.clone();
                std::thread::Builder::new()
                    .name(format!("tessera-io-{index}"))
                    .spawn(move || worker_loop(request_rx, completion_tx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::error!(error = %err, "failed to spawn I/O worker");
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(workers = workers.len(), "threaded file I/O started");

        Self {
            request_tx: Some(request_tx),
            completion_rx,
            workers,
            in_flight: 0,
        }
    }
}

fn worker_loop(requests: Receiver<ReadRequest>, completions: Sender<IoCompletion>) {
    for request in requests {
        let result = read_prefix(&request.path, request.len);
        if completions
            .send(IoCompletion {
                tag: request.tag,
                result,
            })
            .is_err()
        {
            // Receiver gone: the backend is being dropped.
            break;
        }
    }
}

impl AsyncIo for ThreadedFileIo {
    fn submit(&mut self, request: ReadRequest) -> Result<(), IoSubmitError> {
        if self.workers.is_empty() {
            return Err(IoSubmitError::ShutDown);
        }
        let tx = self.request_tx.as_ref().ok_or(IoSubmitError::ShutDown)?;
        tx.send(request).map_err(|_| IoSubmitError::ShutDown)?;
        self.in_flight += 1;
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<IoCompletion>) {
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            out.push(completion);
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for ThreadedFileIo {
    fn drop(&mut self) {
        self.request_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("I/O worker panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::IoTag;
    use std::time::{Duration, Instant};
    use tessera_core::id::HashId;

    fn drain_until(io: &mut ThreadedFileIo, expected: usize) -> Vec<IoCompletion> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut out = Vec::new();
        while out.len() < expected && Instant::now() < deadline {
            io.poll(&mut out);
            std::thread::sleep(Duration::from_millis(1));
        }
        out
    }

    #[test]
    fn reads_prefix_and_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut io = ThreadedFileIo::new(2);
        io.submit(ReadRequest {
            path: path.clone(),
            len: Some(4),
            tag: IoTag::Asset { batch: 0, slot: 0 },
        })
        .unwrap();
        io.submit(ReadRequest {
            path,
            len: None,
            tag: IoTag::Entity {
                entity_id: HashId::ZERO,
            },
        })
        .unwrap();
        assert_eq!(io.in_flight(), 2);

        let mut done = drain_until(&mut io, 2);
        assert_eq!(done.len(), 2);
        assert_eq!(io.in_flight(), 0);
        done.sort_by_key(|c| matches!(c.tag, IoTag::Entity { .. }));
        assert_eq!(done[0].result.as_ref().unwrap(), b"0123");
        assert_eq!(done[1].result.as_ref().unwrap(), b"0123456789");
    }

    #[test]
    fn missing_and_short_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.bin");
        std::fs::write(&short, b"ab").unwrap();

        let mut io = ThreadedFileIo::new(1);
        io.submit(ReadRequest {
            path: dir.path().join("missing.bin"),
            len: Some(1),
            tag: IoTag::Asset { batch: 0, slot: 0 },
        })
        .unwrap();
        io.submit(ReadRequest {
            path: short,
            len: Some(8),
            tag: IoTag::Asset { batch: 0, slot: 1 },
        })
        .unwrap();

        let done = drain_until(&mut io, 2);
        assert_eq!(done.len(), 2);
        assert!(done.iter().all(|c| c.result.is_err()));
    }

    #[test]
    fn poll_without_requests_returns_immediately() {
        let mut io = ThreadedFileIo::new(1);
        let mut out = Vec::new();
        io.poll(&mut out);
        assert!(out.is_empty());
    }
}
