//! Post-copy checksum verification.

use ferry_core::{
    CancellationToken, ErrorCategory, ErrorResolver, HostRef, IO_CHOICES, OpenFlags, Prompt,
    Resolution, VfsError, VfsErrorKind, VfsResult,
};
use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::Runner;
use crate::progress::{SkippedItem, Stage};

const VERIFY_CHUNK: usize = 256 * 1024;

/// What a written file must hash to.
#[derive(Debug, Clone)]
pub(crate) struct ChecksumExpectation {
    pub destination: String,
    pub source_index: usize,
    pub digest: blake3::Hash,
    pub size: u64,
}

/// Hash the whole file at `path`, returning its digest and length.
pub(crate) fn digest_file(
    host: &HostRef,
    path: &str,
    cancel: &CancellationToken,
) -> VfsResult<(blake3::Hash, u64)> {
    let mut file = host.create_file(path, cancel)?;
    file.open(OpenFlags::READ, cancel)?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; VERIFY_CHUNK];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            let _ = file.close();
            return Err(VfsError::cancelled(path));
        }
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    file.close()?;
    Ok((hasher.finalize(), total))
}

impl Runner<'_> {
    pub(crate) fn verify_all(&mut self) -> Result<(), JobError> {
        if self.expectations.is_empty() {
            return Ok(());
        }
        self.notifier.stage(Stage::Verify);

        let expectations = std::mem::take(&mut self.expectations);
        for expected in &expectations {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            self.verify_one(expected)?;
        }
        Ok(())
    }

    fn verify_one(&mut self, expected: &ChecksumExpectation) -> Result<(), JobError> {
        loop {
            let failure = match digest_file(&self.dest_host, &expected.destination, &self.cancel) {
                Ok((digest, size)) if digest == expected.digest && size == expected.size => {
                    debug!(path = %expected.destination, "Checksum verified");
                    return Ok(());
                }
                Ok(_) => VfsError::new(VfsErrorKind::Io, expected.destination.as_str()),
                Err(e) if e.kind() == VfsErrorKind::Cancelled => return Err(JobError::Cancelled),
                Err(e) => e,
            };

            let prompt = Prompt::new(ErrorCategory::ChecksumMismatch, &expected.destination, IO_CHOICES)
                .with_error(&failure);
            match self.resolver.resolve(&prompt) {
                Resolution::Retry => continue,
                Resolution::Skip | Resolution::SkipAll => {
                    warn!(path = %expected.destination, "Checksum mismatch accepted");
                    self.mismatched.insert(expected.source_index);
                    self.report
                        .checksum_mismatches
                        .push(expected.destination.clone());
                    self.report.skipped.push(SkippedItem {
                        path: expected.destination.clone(),
                        category: ErrorCategory::ChecksumMismatch,
                        message: "Written data does not match the source".to_string(),
                    });
                    return Ok(());
                }
                _ => return Err(JobError::Stopped),
            }
        }
    }
}
