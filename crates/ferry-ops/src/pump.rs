//! Data transfer loops between two open files.

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use ferry_core::{CancellationToken, VfsError, VfsErrorKind, VfsFile};

/// Why a transfer did not reach the end of the source.
#[derive(Debug)]
pub(crate) enum PumpError {
    Read(VfsError),
    Write(VfsError),
    Cancelled,
}

/// Where transferred chunks are reported.
pub(crate) struct PumpSink<'a> {
    pub hasher: Option<&'a mut blake3::Hasher>,
    pub on_chunk: &'a dyn Fn(u64),
}

impl PumpSink<'_> {
    fn feed(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.hasher.as_deref_mut() {
            hasher.update(chunk);
        }
        (self.on_chunk)(chunk.len() as u64);
    }
}

/// Job-owned pair of transfer buffers.
#[derive(Debug)]
pub(crate) struct BufferPool {
    size: usize,
    buffers: Vec<Vec<u8>>,
}

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            buffers: Vec::with_capacity(2),
        }
    }

    fn take(&mut self) -> Vec<u8> {
        self.buffers.pop().unwrap_or_else(|| vec![0; self.size])
    }

    fn give_back(&mut self, buffer: Vec<u8>) {
        if self.buffers.len() < 2 && buffer.len() == self.size {
            self.buffers.push(buffer);
        }
    }
}

/// Double-buffered copy: the calling thread reads chunk n+1 while a scoped
/// writer thread drains chunk n. At most two chunks are ever in flight.
pub(crate) fn pump_double_buffered(
    reader: &mut dyn VfsFile,
    writer: &mut dyn VfsFile,
    pool: &mut BufferPool,
    sink: &mut PumpSink<'_>,
    cancel: &CancellationToken,
) -> Result<u64, PumpError> {
    let (filled_tx, filled_rx) = sync_channel::<(Vec<u8>, usize)>(1);
    let (empty_tx, empty_rx) = sync_channel::<Vec<u8>>(2);
    // Capacity 2 holds both buffers, so these sends never block.
    for _ in 0..2 {
        let _ = empty_tx.send(pool.take());
    }

    let mut total = 0u64;
    let (read_result, write_result) = thread::scope(|scope| {
        let writer_thread = scope.spawn(move || drain(writer, filled_rx, empty_tx));

        let read_result = loop {
            if cancel.is_cancelled() {
                break Err(PumpError::Cancelled);
            }
            let Ok(mut buffer) = empty_rx.recv() else {
                // Writer stopped early; its error is reported below.
                break Ok(());
            };
            let n = match reader.read_full(&mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    pool.give_back(buffer);
                    break Err(PumpError::Read(e));
                }
            };
            if n == 0 {
                pool.give_back(buffer);
                break Ok(());
            }
            sink.feed(&buffer[..n]);
            total += n as u64;
            if filled_tx.send((buffer, n)).is_err() {
                break Ok(());
            }
        };
        drop(filled_tx);

        let write_result = writer_thread
            .join()
            .unwrap_or_else(|_| Err(VfsError::new(VfsErrorKind::Io, "writer")));
        (read_result, write_result)
    });

    while let Ok(buffer) = empty_rx.try_recv() {
        pool.give_back(buffer);
    }

    write_result.map_err(PumpError::Write)?;
    read_result?;
    Ok(total)
}

fn drain(
    writer: &mut dyn VfsFile,
    filled: Receiver<(Vec<u8>, usize)>,
    empty: SyncSender<Vec<u8>>,
) -> Result<(), VfsError> {
    for (buffer, len) in filled {
        writer.write_all(&buffer[..len])?;
        if empty.send(buffer).is_err() {
            break;
        }
    }
    Ok(())
}

/// Single-buffer copy on the calling thread, for hosts without a local fd.
pub(crate) fn pump_generic(
    reader: &mut dyn VfsFile,
    writer: &mut dyn VfsFile,
    pool: &mut BufferPool,
    sink: &mut PumpSink<'_>,
    cancel: &CancellationToken,
) -> Result<u64, PumpError> {
    let mut buffer = pool.take();
    let mut total = 0u64;
    let result = loop {
        if cancel.is_cancelled() {
            break Err(PumpError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) => break Err(PumpError::Read(e)),
        };
        if let Err(e) = writer.write_all(&buffer[..n]) {
            break Err(PumpError::Write(e));
        }
        sink.feed(&buffer[..n]);
        total += n as u64;
    };
    pool.give_back(buffer);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{OpenFlags, VfsResult};

    /// In-memory file with an optional write limit.
    #[derive(Debug, Default)]
    struct VecFile {
        data: Vec<u8>,
        pos: usize,
        write_limit: Option<usize>,
    }

    impl VfsFile for VecFile {
        fn path(&self) -> &str {
            "/vec"
        }

        fn open(&mut self, _: OpenFlags, _: &CancellationToken) -> VfsResult<()> {
            Ok(())
        }

        fn is_opened(&self) -> bool {
            true
        }

        fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
            if let Some(limit) = self.write_limit {
                if self.data.len() + buf.len() > limit {
                    return Err(VfsError::new(VfsErrorKind::NoSpace, "/vec"));
                }
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn seek(&mut self, offset: u64) -> VfsResult<u64> {
            self.pos = offset as usize;
            Ok(offset)
        }

        fn size(&self) -> VfsResult<u64> {
            Ok(self.data.len() as u64)
        }

        fn close(&mut self) -> VfsResult<()> {
            Ok(())
        }
    }

    fn source(len: usize) -> VecFile {
        VecFile {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_double_buffered_copies_everything() {
        let mut src = source(10_000);
        let mut dst = VecFile::default();
        let mut pool = BufferPool::new(4096);
        let mut hasher = blake3::Hasher::new();
        let counted = std::sync::atomic::AtomicU64::new(0);
        let on_chunk = |n: u64| {
            counted.fetch_add(n, std::sync::atomic::Ordering::Relaxed);
        };
        let mut sink = PumpSink {
            hasher: Some(&mut hasher),
            on_chunk: &on_chunk,
        };

        let total =
            pump_double_buffered(&mut src, &mut dst, &mut pool, &mut sink, &CancellationToken::new())
                .unwrap();

        assert_eq!(total, 10_000);
        assert_eq!(dst.data, src.data);
        assert_eq!(counted.into_inner(), 10_000);
        assert_eq!(hasher.finalize(), blake3::hash(&src.data));
    }

    #[test]
    fn test_double_buffered_reports_write_failure() {
        let mut src = source(20_000);
        let mut dst = VecFile {
            write_limit: Some(5000),
            ..Default::default()
        };
        let mut pool = BufferPool::new(4096);
        let mut sink = PumpSink {
            hasher: None,
            on_chunk: &|_: u64| {},
        };

        let err =
            pump_double_buffered(&mut src, &mut dst, &mut pool, &mut sink, &CancellationToken::new())
                .unwrap_err();
        assert!(matches!(err, PumpError::Write(e) if e.kind() == VfsErrorKind::NoSpace));
    }

    #[test]
    fn test_generic_honors_cancellation() {
        let mut src = source(100);
        let mut dst = VecFile::default();
        let mut pool = BufferPool::new(4096);
        let mut sink = PumpSink {
            hasher: None,
            on_chunk: &|_: u64| {},
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pump_generic(&mut src, &mut dst, &mut pool, &mut sink, &cancel).unwrap_err();
        assert!(matches!(err, PumpError::Cancelled));
        assert!(dst.data.is_empty());
    }
}
