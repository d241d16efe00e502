//! Per-item transfer strategies.

use std::cell::Cell;

use ferry_core::{
    CancellationToken, Choice, ErrorCategory, ErrorResolver, ExistBehavior,
    FILE_COLLISION_CHOICES, HostExt, HostRef, ITEM_COLLISION_CHOICES, OpenFlags, Prompt,
    Resolution, Stat, StatFlags, VfsErrorKind, VfsFile, path,
};
use ferry_scan::SourceItem;
use tracing::{debug, warn};

use crate::conflict::{AVOID_CHOICES, Collision, auto_rename_path};
use crate::job::{ErrorAction, Runner, WORKING_DIRECTORY_MODE};
use crate::progress::StepResult;
use crate::pump::{PumpError, PumpSink, pump_double_buffered, pump_generic};
use crate::rename::validate_filename;
use crate::verify::ChecksumExpectation;

/// How the destination file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Create a new file; fails if one appears in the meantime.
    Create,
    /// Truncate the existing file.
    Overwrite,
    /// Keep the existing bytes and write after them.
    Append,
}

impl WriteMode {
    fn flags(self) -> OpenFlags {
        match self {
            Self::Create => OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::NO_EXIST,
            Self::Overwrite => OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            Self::Append => OpenFlags::WRITE,
        }
    }
}

fn is_older(destination: &Stat, source: &Stat) -> bool {
    match (destination.mtime, source.mtime) {
        (Some(dst), Some(src)) => dst < src,
        _ => false,
    }
}

impl Runner<'_> {
    /// Decide what to do about an existing destination.
    pub(crate) fn resolve_collision(
        &mut self,
        source: &str,
        source_stat: &Stat,
        destination: &str,
        destination_stat: &Stat,
        choices: &[Choice],
    ) -> Collision {
        let offers = |choice: Choice| choices.contains(&choice);
        match self.collision_policy() {
            ExistBehavior::SkipAll => return Collision::Skip,
            ExistBehavior::OverwriteAll if offers(Choice::Overwrite) => return Collision::Overwrite,
            ExistBehavior::OverwriteOlder if offers(Choice::Overwrite) => {
                return if is_older(destination_stat, source_stat) {
                    Collision::Overwrite
                } else {
                    debug!(source, destination, "Destination is not older");
                    Collision::Skip
                };
            }
            ExistBehavior::AppendAll if offers(Choice::Append) => return Collision::Append,
            ExistBehavior::KeepBoth => {
                return Collision::Divert(auto_rename_path(
                    self.dest_host.as_ref(),
                    destination,
                    &self.cancel,
                ));
            }
            _ => {}
        }

        let mut destination = destination.to_string();
        let mut destination_stat = *destination_stat;
        loop {
            let prompt = Prompt::new(ErrorCategory::Collision, source, choices).with_collision(
                &destination,
                source_stat,
                &destination_stat,
            );
            return match self.resolver.resolve(&prompt) {
                Resolution::Overwrite => Collision::Overwrite,
                Resolution::OverwriteAll => {
                    self.set_collision_policy(ExistBehavior::OverwriteAll);
                    Collision::Overwrite
                }
                Resolution::Append => Collision::Append,
                Resolution::AppendAll => {
                    self.set_collision_policy(ExistBehavior::AppendAll);
                    Collision::Append
                }
                Resolution::Skip => Collision::Skip,
                Resolution::SkipAll => {
                    self.set_collision_policy(ExistBehavior::SkipAll);
                    Collision::Skip
                }
                Resolution::AutoRename => Collision::Divert(auto_rename_path(
                    self.dest_host.as_ref(),
                    &destination,
                    &self.cancel,
                )),
                Resolution::Rename(name) => {
                    if let Err(reason) = validate_filename(&name) {
                        warn!(name = %name, reason = %reason, "Rejected new name");
                        return Collision::Skip;
                    }
                    let dir = path::parent(&destination).unwrap_or("/");
                    let candidate = path::join(dir, &name);
                    if candidate == destination {
                        return Collision::Skip;
                    }
                    match self.dest_host.stat(&candidate, StatFlags::NO_FOLLOW, &self.cancel) {
                        Ok(taken) => {
                            destination = candidate;
                            destination_stat = taken;
                            continue;
                        }
                        Err(_) => Collision::Divert(candidate),
                    }
                }
                _ => Collision::Stop,
            };
        }
    }

    /// Move an item with a single rename on its own volume.
    pub(crate) fn rename_in_place(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
    ) -> StepResult {
        let host = self.dest_host.clone();
        let cancel = self.cancel.clone();
        let source_stat = item.stat();
        let mut destination = destination.to_string();

        if let Ok(existing) = host.stat(&destination, StatFlags::NO_FOLLOW, &cancel) {
            let same_object = self.plan.case_renaming || source_stat.same_object(&existing);
            if !same_object {
                if item.is_dir() && existing.is_dir() {
                    if !self.options.merge_directories {
                        match self.resolve_collision(
                            source,
                            &source_stat,
                            &destination,
                            &existing,
                            ITEM_COLLISION_CHOICES,
                        ) {
                            Collision::Divert(other) => destination = other,
                            Collision::Skip => {
                                return self.skipped(source, ErrorCategory::Collision, "Destination exists");
                            }
                            Collision::Stop => return StepResult::Stop,
                            Collision::Overwrite | Collision::Append => {
                                return self.dock_directory(index, item, source, &destination);
                            }
                        }
                    } else {
                        return self.dock_directory(index, item, source, &destination);
                    }
                } else {
                    let choices = if existing.is_dir() {
                        AVOID_CHOICES
                    } else if item.is_reg() {
                        FILE_COLLISION_CHOICES
                    } else {
                        ITEM_COLLISION_CHOICES
                    };
                    match self.resolve_collision(source, &source_stat, &destination, &existing, choices)
                    {
                        Collision::Divert(other) => destination = other,
                        Collision::Skip => {
                            return self.skipped(source, ErrorCategory::Collision, "Destination exists");
                        }
                        Collision::Stop => return StepResult::Stop,
                        Collision::Append => {
                            return self.copy_file(
                                index,
                                item,
                                source,
                                &destination,
                                Some(Collision::Append),
                            );
                        }
                        Collision::Overwrite => {
                            // rename(2) replaces files but not a file with a directory.
                            if item.is_dir() {
                                if let Err(step) = self.attempt(
                                    ErrorCategory::DestinationCreate,
                                    &destination,
                                    || host.unlink(&destination, &cancel),
                                ) {
                                    return step;
                                }
                            }
                        }
                    }
                }
            }
        }

        loop {
            match host.rename(source, &destination, &cancel) {
                Ok(()) => {
                    debug!(source, destination = %destination, "Renamed in place");
                    if item.is_reg() {
                        self.notifier.progress.add_bytes(item.size);
                    }
                    if item.is_dir() {
                        self.record_directory_destination(index, &destination);
                    }
                    return StepResult::Ok;
                }
                Err(e) if e.is_cross_device() => {
                    debug!(source, "Crossing volumes, falling back to copy");
                    return self.copy_instead_of_rename(index, item, source, &destination);
                }
                Err(e) => match self.on_error(ErrorCategory::Rename, source, &e) {
                    ErrorAction::Retry => continue,
                    ErrorAction::Skip => return self.skipped(source, ErrorCategory::Rename, &e),
                    ErrorAction::Stop => return StepResult::Stop,
                },
            }
        }
    }

    /// Expand a directory that cannot be renamed whole and merge it item by item.
    fn dock_directory(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
    ) -> StepResult {
        if let Err(step) = self.expand(index, source) {
            return step;
        }
        self.copy_directory(index, item, source, destination)
    }

    fn copy_instead_of_rename(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
    ) -> StepResult {
        if item.is_dir() {
            self.dock_directory(index, item, source, destination)
        } else if item.is_symlink() {
            self.copy_symlink(index, item, source, destination)
        } else {
            self.copy_file(index, item, source, destination, None)
        }
    }

    /// Create (or dock into) the destination directory of a source directory.
    pub(crate) fn copy_directory(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
    ) -> StepResult {
        let host = self.dest_host.clone();
        let cancel = self.cancel.clone();
        let source_stat = item.stat();
        let mut destination = destination.to_string();

        let must_create = match host.stat(&destination, StatFlags::empty(), &cancel) {
            Ok(existing) if existing.is_dir() => {
                let merge = self.options.merge_directories
                    || (self.plan.case_renaming && item.is_top_level());
                if merge {
                    false
                } else {
                    match self.resolve_collision(
                        source,
                        &source_stat,
                        &destination,
                        &existing,
                        ITEM_COLLISION_CHOICES,
                    ) {
                        Collision::Overwrite | Collision::Append => false,
                        Collision::Divert(other) => {
                            destination = other;
                            true
                        }
                        Collision::Skip => {
                            return self.skipped(source, ErrorCategory::Collision, "Directory exists");
                        }
                        Collision::Stop => return StepResult::Stop,
                    }
                }
            }
            Ok(existing) => {
                match self.resolve_collision(
                    source,
                    &source_stat,
                    &destination,
                    &existing,
                    ITEM_COLLISION_CHOICES,
                ) {
                    Collision::Overwrite | Collision::Append => {
                        if !self.options.allow_destination_unlink {
                            return self.skipped(
                                source,
                                ErrorCategory::Collision,
                                "Replacing the destination is not allowed",
                            );
                        }
                        if let Err(step) = self.attempt(
                            ErrorCategory::DestinationCreate,
                            &destination,
                            || host.unlink(&destination, &cancel),
                        ) {
                            return step;
                        }
                    }
                    Collision::Divert(other) => destination = other,
                    Collision::Skip => {
                        return self.skipped(source, ErrorCategory::Collision, "Destination exists");
                    }
                    Collision::Stop => return StepResult::Stop,
                }
                true
            }
            Err(_) => true,
        };

        if must_create {
            let mode = source_stat.permissions() | WORKING_DIRECTORY_MODE;
            let created = self.attempt(ErrorCategory::DestinationCreate, &destination, || {
                match host.create_directory(&destination, mode, &cancel) {
                    Err(e) if e.kind() == VfsErrorKind::AlreadyExists
                        && host.is_directory(&destination, &cancel) =>
                    {
                        Ok(())
                    }
                    other => other,
                }
            });
            if let Err(step) = created {
                return step;
            }
            self.defer_directory_attributes(&destination, item);
        }

        self.record_directory_destination(index, &destination);
        if self.options.is_move() {
            self.to_delete.push(index);
        }
        StepResult::Ok
    }

    /// Recreate a symlink with the same target string.
    pub(crate) fn copy_symlink(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
    ) -> StepResult {
        let src_host = self.items.host(index).clone();
        let host = self.dest_host.clone();
        let cancel = self.cancel.clone();
        let mut destination = destination.to_string();

        let target = match &item.symlink_target {
            Some(target) => target.clone(),
            None => match self.attempt(ErrorCategory::Symlink, source, || {
                src_host.read_symlink(source, &cancel)
            }) {
                Ok(target) => target,
                Err(step) => return step,
            },
        };

        if let Ok(existing) = host.stat(&destination, StatFlags::NO_FOLLOW, &cancel) {
            let choices = if existing.is_dir() {
                AVOID_CHOICES
            } else {
                ITEM_COLLISION_CHOICES
            };
            match self.resolve_collision(source, &item.stat(), &destination, &existing, choices) {
                Collision::Overwrite | Collision::Append => {
                    if let Err(step) = self.attempt(
                        ErrorCategory::DestinationCreate,
                        &destination,
                        || host.unlink(&destination, &cancel),
                    ) {
                        return step;
                    }
                }
                Collision::Divert(other) => destination = other,
                Collision::Skip => {
                    return self.skipped(source, ErrorCategory::Collision, "Destination exists");
                }
                Collision::Stop => return StepResult::Stop,
            }
        }

        if let Err(step) = self.attempt(ErrorCategory::Symlink, &destination, || {
            host.create_symlink(&destination, &target, &cancel)
        }) {
            return step;
        }
        debug!(destination = %destination, target = %target, "Created symlink");

        if self.options.is_move() {
            self.to_delete.push(index);
        }
        StepResult::Ok
    }

    /// Copy the contents of a regular file.
    ///
    /// `decided` carries a collision answer obtained by the caller.
    pub(crate) fn copy_file(
        &mut self,
        index: usize,
        item: &SourceItem,
        source: &str,
        destination: &str,
        decided: Option<Collision>,
    ) -> StepResult {
        let src_host = self.items.host(index).clone();
        let host = self.dest_host.clone();
        let cancel = self.cancel.clone();
        let source_stat = item.stat();
        let mut destination = destination.to_string();

        let collision = match decided {
            Some(decision) => Some(decision),
            None => match host.stat(&destination, StatFlags::NO_FOLLOW, &cancel) {
                Ok(existing) => {
                    let same_file =
                        src_host.is_same_host(&host) && source_stat.same_object(&existing);
                    let choices = if same_file || existing.is_dir() {
                        AVOID_CHOICES
                    } else {
                        FILE_COLLISION_CHOICES
                    };
                    Some(self.resolve_collision(source, &source_stat, &destination, &existing, choices))
                }
                Err(_) => None,
            },
        };

        let mut mode = WriteMode::Create;
        match collision {
            None => {}
            Some(Collision::Overwrite) => {
                mode = WriteMode::Overwrite;
                if self.options.allow_destination_unlink {
                    let unlinked = self.attempt(ErrorCategory::DestinationCreate, &destination, || {
                        match host.unlink(&destination, &cancel) {
                            Err(e) if e.is_not_found() => Ok(()),
                            other => other,
                        }
                    });
                    if let Err(step) = unlinked {
                        return step;
                    }
                    mode = WriteMode::Create;
                }
            }
            Some(Collision::Append) => mode = WriteMode::Append,
            Some(Collision::Divert(other)) => destination = other,
            Some(Collision::Skip) => {
                return self.skipped(source, ErrorCategory::Collision, "Destination exists");
            }
            Some(Collision::Stop) => return StepResult::Stop,
        }

        let verify = self.options.should_verify() && mode != WriteMode::Append;
        let native = src_host.is_native() && host.is_native();
        let mut created = false;
        let mut append_from = None;

        loop {
            let mut reader = match self.attempt(ErrorCategory::SourceAccess, source, || {
                let mut file = src_host.create_file(source, &cancel)?;
                file.open(OpenFlags::READ, &cancel)?;
                Ok(file)
            }) {
                Ok(file) => file,
                Err(step) => return step,
            };

            let flags = mode.flags();
            let mut writer = match self.attempt(ErrorCategory::DestinationCreate, &destination, || {
                let mut file = host.create_file(&destination, &cancel)?;
                file.open(flags, &cancel)?;
                Ok(file)
            }) {
                Ok(file) => file,
                Err(step) => return step,
            };
            if mode == WriteMode::Create {
                created = true;
                // A retry rewrites the file this attempt just created.
                mode = WriteMode::Overwrite;
            }

            let attempt = self.transfer(
                &mut *reader,
                &mut *writer,
                &mut append_from,
                mode == WriteMode::Append,
                verify,
                native,
                &cancel,
            );
            let _ = reader.close();
            let attempt = match attempt {
                Ok(done) => writer.close().map(|()| done).map_err(PumpError::Write),
                Err(e) => {
                    let _ = writer.close();
                    Err(e)
                }
            };

            let (category, error) = match attempt {
                Ok((bytes, digest)) => {
                    self.finish_file(item, &destination);
                    if let Some(digest) = digest {
                        self.expectations.push(ChecksumExpectation {
                            destination: destination.clone(),
                            source_index: index,
                            digest,
                            size: bytes,
                        });
                    }
                    if self.options.is_move() {
                        self.to_delete.push(index);
                    }
                    return StepResult::Ok;
                }
                Err(PumpError::Cancelled) => {
                    self.drop_partial(&host, &destination, created);
                    return StepResult::Stop;
                }
                Err(PumpError::Read(e)) => (ErrorCategory::ReadFailure, e),
                Err(PumpError::Write(e)) => (ErrorCategory::WriteFailure, e),
            };

            let reported = if category == ErrorCategory::ReadFailure {
                source.to_string()
            } else {
                destination.clone()
            };
            match self.on_error(category, &reported, &error) {
                ErrorAction::Retry => continue,
                ErrorAction::Skip => {
                    self.drop_partial(&host, &destination, created);
                    return self.skipped(&reported, category, &error);
                }
                ErrorAction::Stop => {
                    self.drop_partial(&host, &destination, created);
                    return StepResult::Stop;
                }
            }
        }
    }

    /// Move the bytes of one opened pair of files.
    ///
    /// Returns the number of bytes written and, when verifying, the source digest.
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &mut self,
        reader: &mut dyn VfsFile,
        writer: &mut dyn VfsFile,
        append_from: &mut Option<u64>,
        append: bool,
        verify: bool,
        native: bool,
        cancel: &CancellationToken,
    ) -> Result<(u64, Option<blake3::Hash>), PumpError> {
        if append {
            let offset = match append_from {
                Some(offset) => *offset,
                None => {
                    let size = writer.size().map_err(PumpError::Write)?;
                    *append_from = Some(size);
                    size
                }
            };
            writer.seek(offset).map_err(PumpError::Write)?;
        }

        let progress = self.notifier.progress.clone();
        let moved = Cell::new(0u64);
        let on_chunk = |n: u64| {
            progress.add_bytes(n);
            moved.set(moved.get() + n);
        };
        let mut hasher = verify.then(blake3::Hasher::new);
        let mut sink = PumpSink {
            hasher: hasher.as_mut(),
            on_chunk: &on_chunk,
        };

        let pumped = if native {
            pump_double_buffered(reader, writer, &mut self.pool, &mut sink, cancel)
        } else {
            pump_generic(reader, writer, &mut self.pool, &mut sink, cancel)
        };
        let bytes = match pumped {
            Ok(bytes) => bytes,
            Err(e) => {
                progress.remove_bytes(moved.get());
                return Err(e);
            }
        };

        if self.options.copy_xattrs {
            copy_xattrs(reader, writer);
        }
        Ok((bytes, hasher.map(|h| h.finalize())))
    }

    /// Apply permissions and times to a completed file.
    fn finish_file(&mut self, item: &SourceItem, destination: &str) {
        if self.options.copy_unix_permissions {
            if let Err(e) = self
                .dest_host
                .set_permissions(destination, item.stat().permissions(), &self.cancel)
            {
                debug!(path = destination, error = %e, "Cannot set permissions");
            }
        }
        if self.options.copy_file_times {
            if let Some(mtime) = item.mtime {
                if let Err(e) = self
                    .dest_host
                    .set_modification_time(destination, mtime, &self.cancel)
                {
                    debug!(path = destination, error = %e, "Cannot set modification time");
                }
            }
        }
    }

    /// Remove a partially written file this job created.
    fn drop_partial(&self, host: &HostRef, destination: &str, created: bool) {
        if !created || !self.options.allow_destination_unlink {
            return;
        }
        match host.unlink(destination, &CancellationToken::new()) {
            Ok(()) => debug!(path = destination, "Removed partial file"),
            Err(e) => debug!(path = destination, error = %e, "Cannot remove partial file"),
        }
    }
}

fn copy_xattrs(reader: &mut dyn VfsFile, writer: &mut dyn VfsFile) {
    let attrs = match reader.xattrs() {
        Ok(attrs) => attrs,
        Err(e) => {
            debug!(path = reader.path(), error = %e, "Cannot read extended attributes");
            return;
        }
    };
    for (name, value) in attrs {
        if let Err(e) = writer.set_xattr(&name, &value) {
            debug!(path = writer.path(), name = %name, error = %e, "Cannot set extended attribute");
        }
    }
}
