use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::path_model;
use crate::services::local;
use crate::services::remote::RemoteSession;
use crate::services::EntryType;
use crate::status::FileStatus;

/// A recorded reference captured at copy time. At most one set is
/// outstanding; a new copy replaces the previous set wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyIntent {
    pub name: String,
    /// Absolute directory the source lives in
    pub dir: String,
    pub from_remote: bool,
}

impl CopyIntent {
    pub fn source_path(&self) -> String {
        path_model::join(&self.dir, &self.name)
    }
}

/// Outcome of a delete call: either the confirmation prompt to show
/// (nothing touched yet) or the result of the finalized removal.
#[derive(Debug)]
pub enum DeleteOutcome {
    Prompt(String),
    Done(FileStatus),
}

/// Orchestrates copy/paste and delete across any combination of local
/// and remote endpoints. The cancellation flag it owns is the only
/// value shared between threads without moving ownership; it is raised
/// by the interactive thread and only observed by the worker.
#[derive(Clone)]
pub struct TransferEngine {
    cancel: Arc<AtomicBool>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cooperative cancellation of the running job. The worker
    /// observes the flag between entries; it never clears it.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Clear the flag before dispatching the next job. Interactive
    /// thread only.
    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Paste every intent into `target_dir`, stopping at the first
    /// non-success outcome. A conflict is reported before anything of
    /// that intent is copied, so the caller can confirm and retry the
    /// whole set with `overwrite`.
    pub fn paste(
        &self,
        mut session: Option<&mut RemoteSession>,
        sources: &[CopyIntent],
        target_dir: &str,
        target_remote: bool,
        overwrite: bool,
    ) -> FileStatus {
        for intent in sources {
            if self.cancel.load(Ordering::Relaxed) {
                return FileStatus::StopRequested;
            }
            debug!("pasting {} into {}", intent.source_path(), target_dir);

            let status = match (intent.from_remote, target_remote) {
                (false, false) => local::copy_files(
                    Path::new(&intent.dir),
                    &intent.name,
                    Path::new(target_dir),
                    overwrite,
                    &self.cancel,
                ),
                // Both endpoints live on the connected host: copy
                // server-side instead of round-tripping the bytes.
                (true, true) => match session.as_deref_mut() {
                    Some(session) => session.copy_same_host(
                        &intent.source_path(),
                        target_dir,
                        &intent.name,
                        false,
                        overwrite,
                    ),
                    None => FileStatus::CopyFailed,
                },
                (true, false) => match session.as_deref_mut() {
                    Some(session) => self.copy_down(
                        session,
                        &intent.dir,
                        &intent.name,
                        Path::new(target_dir),
                        overwrite,
                    ),
                    None => FileStatus::CopyFailed,
                },
                (false, true) => match session.as_deref_mut() {
                    Some(session) => self.copy_up(
                        session,
                        Path::new(&intent.dir),
                        &intent.name,
                        target_dir,
                        overwrite,
                    ),
                    None => FileStatus::CopyFailed,
                },
            };

            if status != FileStatus::WrittenSuccessfully {
                return status;
            }
        }
        FileStatus::WrittenSuccessfully
    }

    /// Copy a remote file or tree down to the local filesystem. File
    /// contents cross the client in one buffer per file.
    fn copy_down(
        &self,
        session: &mut RemoteSession,
        src_dir: &str,
        name: &str,
        dst_dir: &Path,
        overwrite: bool,
    ) -> FileStatus {
        let src = path_model::join(src_dir, name);
        let kind = match session.entry_kind(&src) {
            Ok(kind) => kind,
            Err(status) => return status,
        };

        if kind != EntryType::Directory {
            let data = match session.read_file(&src) {
                Ok(data) => data,
                Err(status) => return status,
            };
            return local::write_file(dst_dir, name, &data, overwrite);
        }

        let dst = dst_dir.join(name);
        match fs::symlink_metadata(&dst) {
            Ok(metadata) if !overwrite => {
                return if metadata.is_dir() {
                    FileStatus::DirAlreadyExists
                } else {
                    FileStatus::AlreadyExists
                };
            }
            Ok(_) => {}
            Err(_) => {
                if fs::create_dir(&dst).is_err() {
                    return FileStatus::MkdirFailed;
                }
            }
        }

        let children = match session.list(&src) {
            Ok(children) => children,
            Err(status) => return status,
        };
        for child in children {
            if self.cancel.load(Ordering::Relaxed) {
                return FileStatus::StopRequested;
            }
            let status = self.copy_down(session, &src, &child.name, &dst, overwrite);
            if status != FileStatus::WrittenSuccessfully {
                return status;
            }
        }
        FileStatus::WrittenSuccessfully
    }

    /// Copy a local file or tree up to the remote host.
    fn copy_up(
        &self,
        session: &mut RemoteSession,
        src_dir: &Path,
        name: &str,
        dst_dir: &str,
        overwrite: bool,
    ) -> FileStatus {
        let src = src_dir.join(name);
        let metadata = match fs::symlink_metadata(&src) {
            Ok(metadata) => metadata,
            Err(_) => return FileStatus::ReadFailed,
        };

        if !metadata.is_dir() {
            let data = match local::read_file(&src) {
                Ok(data) => data,
                Err(status) => return status,
            };
            return session.write_file(dst_dir, name, &data, overwrite);
        }

        let dst = path_model::join(dst_dir, name);
        match session.entry_kind(&dst) {
            Ok(EntryType::Directory) if !overwrite => return FileStatus::DirAlreadyExists,
            Ok(_) if !overwrite => return FileStatus::AlreadyExists,
            Ok(_) => {}
            Err(_) => {
                let status = session.mkdir(&dst);
                if status != FileStatus::WrittenSuccessfully
                    && status != FileStatus::DirAlreadyExists
                {
                    return status;
                }
            }
        }

        let entries = match fs::read_dir(&src) {
            Ok(entries) => entries,
            Err(_) => return FileStatus::ReadFailed,
        };
        for entry in entries.flatten() {
            if self.cancel.load(Ordering::Relaxed) {
                return FileStatus::StopRequested;
            }
            let child_name = entry.file_name().to_string_lossy().to_string();
            let status = self.copy_up(session, &src, &child_name, &dst, overwrite);
            if status != FileStatus::WrittenSuccessfully {
                return status;
            }
        }
        FileStatus::WrittenSuccessfully
    }

    /// Two-phase delete. With `finalize` unset only the confirmation
    /// prompt is produced; nothing is touched. With it set, the target
    /// is removed through the matching backend.
    pub fn delete(
        &self,
        mut session: Option<&mut RemoteSession>,
        path: &str,
        remote: bool,
        finalize: bool,
    ) -> DeleteOutcome {
        if !finalize {
            return DeleteOutcome::Prompt(format!(
                "Delete '{}'? Directories are removed with their whole contents.",
                path
            ));
        }

        let status = if remote {
            match session.as_deref_mut() {
                Some(session) => match session.entry_kind(path) {
                    Ok(EntryType::Directory) => session.remove_recursive(path, &self.cancel),
                    Ok(_) => session.remove_file(path),
                    Err(_) => FileStatus::RemoveFailed,
                },
                None => FileStatus::RemoveFailed,
            }
        } else {
            let target = Path::new(path);
            match fs::symlink_metadata(target) {
                Ok(metadata) if metadata.is_dir() => {
                    local::remove_recursive(target, &self.cancel)
                }
                Ok(_) => local::remove_file(target),
                Err(_) => FileStatus::RemoveFailed,
            }
        };

        info!("delete of {} finished: {}", path, status);
        DeleteOutcome::Done(status)
    }
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}
