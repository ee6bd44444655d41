use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Local, TimeZone};
use tracing::debug;

use crate::services::{DirEntry, EntryType};
use crate::status::FileStatus;

/// Buffer size for file copy (64KB)
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// List a directory, sorted by name. `.` and `..` are never included.
pub fn list(dir: &Path) -> Result<Vec<DirEntry>, FileStatus> {
    let read_dir = fs::read_dir(dir).map_err(|_| FileStatus::ReadFailed)?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|_| FileStatus::ReadFailed)?;
        let metadata = fs::symlink_metadata(entry.path()).map_err(|_| FileStatus::ReadFailed)?;

        let file_type = metadata.file_type();
        let entry_type = if file_type.is_symlink() {
            EntryType::Symlink
        } else if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::Regular
        } else {
            EntryType::Other
        };

        let (uid, gid, permissions, mtime) = owner_bits(&metadata);
        let modified = Local
            .timestamp_opt(mtime, 0)
            .single()
            .unwrap_or_else(Local::now);

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            entry_type,
            size: metadata.len(),
            uid,
            gid,
            owner: user_name(uid).unwrap_or_else(|| uid.to_string()),
            group: group_name(gid).unwrap_or_else(|| gid.to_string()),
            permissions,
            modified,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(unix)]
fn owner_bits(metadata: &fs::Metadata) -> (u32, u32, u32, i64) {
    use std::os::unix::fs::MetadataExt;
    (
        metadata.uid(),
        metadata.gid(),
        metadata.mode() & 0o7777,
        metadata.mtime(),
    )
}

#[cfg(not(unix))]
fn owner_bits(metadata: &fs::Metadata) -> (u32, u32, u32, i64) {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (0, 0, 0, mtime)
}

/// Resolve a uid to a user name via the passwd database
#[cfg(unix)]
fn user_name(uid: u32) -> Option<String> {
    let mut buf = vec![0u8; 1024];
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut passwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(passwd.pw_name) };
    name.to_str().ok().map(|s| s.to_string())
}

#[cfg(unix)]
fn group_name(gid: u32) -> Option<String> {
    let mut buf = vec![0u8; 1024];
    let mut group: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();

    let rc = unsafe {
        libc::getgrgid_r(
            gid,
            &mut group,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(group.gr_name) };
    name.to_str().ok().map(|s| s.to_string())
}

#[cfg(not(unix))]
fn user_name(_uid: u32) -> Option<String> {
    None
}

#[cfg(not(unix))]
fn group_name(_gid: u32) -> Option<String> {
    None
}

pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Create a directory. The existence probe keeps `DirAlreadyExists`
/// distinguishable from a genuine creation failure.
pub fn mkdir(path: &Path) -> FileStatus {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => FileStatus::DirAlreadyExists,
        Ok(_) => FileStatus::AlreadyExists,
        Err(_) => match fs::create_dir(path) {
            Ok(_) => FileStatus::WrittenSuccessfully,
            Err(_) => FileStatus::MkdirFailed,
        },
    }
}

/// Rename never overwrites an existing target.
pub fn rename(old: &Path, new: &Path) -> FileStatus {
    if exists(new) {
        return FileStatus::AlreadyExists;
    }
    match fs::rename(old, new) {
        Ok(_) => FileStatus::WrittenSuccessfully,
        Err(_) => FileStatus::WriteFailed,
    }
}

pub fn remove_file(path: &Path) -> FileStatus {
    match fs::remove_file(path) {
        Ok(_) => FileStatus::WrittenSuccessfully,
        Err(_) => FileStatus::RemoveFailed,
    }
}

/// Remove a directory tree depth-first, children before their parent.
/// The cancellation flag is checked before each entry; a raised flag
/// aborts with `StopRequested` and leaves the partially-deleted tree
/// as it stands.
pub fn remove_recursive(path: &Path, cancel: &AtomicBool) -> FileStatus {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return FileStatus::RemoveFailed,
    };

    for entry in entries.flatten() {
        if cancel.load(Ordering::Relaxed) {
            debug!("remove of {} stopped on request", path.display());
            return FileStatus::StopRequested;
        }

        let child = entry.path();
        let metadata = match fs::symlink_metadata(&child) {
            Ok(metadata) => metadata,
            Err(_) => return FileStatus::RemoveFailed,
        };

        if metadata.is_dir() {
            let status = remove_recursive(&child, cancel);
            if status != FileStatus::WrittenSuccessfully {
                return status;
            }
        } else if fs::remove_file(&child).is_err() {
            return FileStatus::RemoveFailed;
        }
    }

    match fs::remove_dir(path) {
        Ok(_) => FileStatus::WrittenSuccessfully,
        Err(_) => FileStatus::RemoveFailed,
    }
}

/// Copy one file into `dst_dir` under the same name. With `overwrite`
/// the destination is truncated, including the degenerate case where
/// source and destination coincide. Without it, the create-exclusive
/// open itself reports the conflict.
pub fn copy_file(src_dir: &Path, name: &str, dst_dir: &Path, overwrite: bool) -> FileStatus {
    let src = src_dir.join(name);
    let dst = dst_dir.join(name);

    let mut src_file = match File::open(&src) {
        Ok(file) => file,
        Err(_) => return FileStatus::ReadFailed,
    };

    let mut dst_file = if overwrite {
        match File::create(&dst) {
            Ok(file) => file,
            Err(_) => return FileStatus::WriteFailed,
        }
    } else {
        match OpenOptions::new().write(true).create_new(true).open(&dst) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return FileStatus::AlreadyExists
            }
            Err(_) => return FileStatus::WriteFailed,
        }
    };

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let bytes_read = match src_file.read(&mut buffer) {
            Ok(n) => n,
            Err(_) => return FileStatus::ReadFailed,
        };
        if bytes_read == 0 {
            break;
        }
        if dst_file.write_all(&buffer[..bytes_read]).is_err() {
            return FileStatus::WriteFailed;
        }
    }

    FileStatus::WrittenSuccessfully
}

/// Copy a directory into `dst_dir` under the same name. The destination
/// is created if absent; with `recursive` each child is copied per its
/// type, checking the cancellation flag between children.
pub fn copy_dir(
    src_dir: &Path,
    name: &str,
    dst_dir: &Path,
    recursive: bool,
    overwrite: bool,
    cancel: &AtomicBool,
) -> FileStatus {
    let src = src_dir.join(name);
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

    if !recursive {
        return FileStatus::WrittenSuccessfully;
    }

    let entries = match fs::read_dir(&src) {
        Ok(entries) => entries,
        Err(_) => return FileStatus::CopyFailed,
    };

    for entry in entries.flatten() {
        if cancel.load(Ordering::Relaxed) {
            debug!("copy of {} stopped on request", src.display());
            return FileStatus::StopRequested;
        }

        let child_name = entry.file_name().to_string_lossy().to_string();
        let metadata = match fs::symlink_metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(_) => return FileStatus::CopyFailed,
        };

        let status = if metadata.is_dir() {
            copy_dir(&src, &child_name, &dst, true, overwrite, cancel)
        } else {
            copy_file(&src, &child_name, &dst, overwrite)
        };
        if status != FileStatus::WrittenSuccessfully {
            return status;
        }
    }

    FileStatus::WrittenSuccessfully
}

/// Copy a file or a directory tree, dispatching on the source's type.
pub fn copy_files(
    src_dir: &Path,
    name: &str,
    dst_dir: &Path,
    overwrite: bool,
    cancel: &AtomicBool,
) -> FileStatus {
    let src = src_dir.join(name);
    match fs::symlink_metadata(&src) {
        Ok(metadata) if metadata.is_dir() => {
            copy_dir(src_dir, name, dst_dir, true, overwrite, cancel)
        }
        Ok(_) => copy_file(src_dir, name, dst_dir, overwrite),
        Err(_) => FileStatus::ReadFailed,
    }
}

/// Read a whole file into memory, for transfers that cross backends.
pub fn read_file(path: &Path) -> Result<Vec<u8>, FileStatus> {
    fs::read(path).map_err(|_| FileStatus::ReadFailed)
}

/// Write a buffer into `dst_dir` under `name`, honoring the overwrite policy.
pub fn write_file(dst_dir: &Path, name: &str, data: &[u8], overwrite: bool) -> FileStatus {
    let dst = dst_dir.join(name);

    let mut dst_file = if overwrite {
        match File::create(&dst) {
            Ok(file) => file,
            Err(_) => return FileStatus::WriteFailed,
        }
    } else {
        match OpenOptions::new().write(true).create_new(true).open(&dst) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return FileStatus::AlreadyExists
            }
            Err(_) => return FileStatus::WriteFailed,
        }
    };

    match dst_file.write_all(data) {
        Ok(_) => FileStatus::WrittenSuccessfully,
        Err(_) => FileStatus::WriteFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_mkdir_twice_reports_dir_already_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new");

        assert_eq!(mkdir(&path), FileStatus::WrittenSuccessfully);
        assert_eq!(mkdir(&path), FileStatus::DirAlreadyExists);
    }

    #[test]
    fn test_copy_file_refuses_second_copy_without_overwrite() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        let dst_dir = dir.path().join("dst");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dst_dir).unwrap();
        fs::write(src_dir.join("a.txt"), b"first").unwrap();

        assert_eq!(
            copy_file(&src_dir, "a.txt", &dst_dir, false),
            FileStatus::WrittenSuccessfully
        );

        // Change the source; the refused second copy must not touch the copy
        fs::write(src_dir.join("a.txt"), b"second").unwrap();
        assert_eq!(
            copy_file(&src_dir, "a.txt", &dst_dir, false),
            FileStatus::AlreadyExists
        );
        assert_eq!(fs::read(dst_dir.join("a.txt")).unwrap(), b"first");
    }

    #[test]
    fn test_copy_file_overwrite_truncates_to_source_bytes() {
        let dir = tempdir().unwrap();
        let src_dir = dir.path().join("src");
        let dst_dir = dir.path().join("dst");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dst_dir).unwrap();
        fs::write(src_dir.join("a.bin"), b"short").unwrap();
        fs::write(dst_dir.join("a.bin"), b"something much longer").unwrap();

        assert_eq!(
            copy_file(&src_dir, "a.bin", &dst_dir, true),
            FileStatus::WrittenSuccessfully
        );
        assert_eq!(fs::read(dst_dir.join("a.bin")).unwrap(), b"short");
    }

    #[test]
    fn test_copy_file_missing_source() {
        let dir = tempdir().unwrap();
        assert_eq!(
            copy_file(dir.path(), "absent", dir.path(), false),
            FileStatus::ReadFailed
        );
    }

    #[test]
    fn test_remove_recursive_deletes_nested_tree() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.txt"), b"x").unwrap();
        fs::write(root.join("a/mid.txt"), b"y").unwrap();
        fs::write(root.join("a/b/leaf.txt"), b"z").unwrap();

        assert_eq!(
            remove_recursive(&root, &no_cancel()),
            FileStatus::WrittenSuccessfully
        );
        assert!(!root.exists());
    }

    #[test]
    fn test_remove_recursive_honors_pre_raised_cancel() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("file.txt"), b"x").unwrap();

        let cancel = AtomicBool::new(true);
        assert_eq!(remove_recursive(&root, &cancel), FileStatus::StopRequested);
        assert!(root.exists());
    }

    #[test]
    fn test_copy_dir_recursive_then_conflict() {
        let dir = tempdir().unwrap();
        let work = dir.path();
        let target = work.join("B");
        fs::create_dir_all(work.join("A/nested")).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(work.join("A/f.txt"), b"data").unwrap();
        fs::write(work.join("A/nested/g.txt"), b"more").unwrap();

        assert_eq!(
            copy_dir(work, "A", &target, true, false, &no_cancel()),
            FileStatus::WrittenSuccessfully
        );
        assert_eq!(fs::read(target.join("A/f.txt")).unwrap(), b"data");
        assert_eq!(fs::read(target.join("A/nested/g.txt")).unwrap(), b"more");

        // Identical call again: conflict, nothing changed
        assert_eq!(
            copy_dir(work, "A", &target, true, false, &no_cancel()),
            FileStatus::DirAlreadyExists
        );
        assert_eq!(fs::read(target.join("A/f.txt")).unwrap(), b"data");
    }

    #[test]
    fn test_copy_dir_stops_between_children_on_cancel() {
        let dir = tempdir().unwrap();
        let work = dir.path();
        let target = work.join("out");
        fs::create_dir_all(work.join("big")).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(work.join("big/one.txt"), b"1").unwrap();
        fs::write(work.join("big/two.txt"), b"2").unwrap();

        let cancel = AtomicBool::new(true);
        assert_eq!(
            copy_dir(work, "big", &target, true, false, &cancel),
            FileStatus::StopRequested
        );
        // The destination directory itself was created before the first check
        assert!(target.join("big").exists());
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        fs::write(&old, b"a").unwrap();
        fs::write(&new, b"b").unwrap();

        assert_eq!(rename(&old, &new), FileStatus::AlreadyExists);
        assert_eq!(fs::read(&new).unwrap(), b"b");

        fs::remove_file(&new).unwrap();
        assert_eq!(rename(&old, &new), FileStatus::WrittenSuccessfully);
        assert!(!old.exists());
    }

    #[test]
    fn test_list_is_sorted_and_typed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("zeta.txt"), b"z").unwrap();
        fs::write(dir.path().join("alpha.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("middle")).unwrap();

        let entries = list(dir.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "middle", "zeta.txt"]);
        assert_eq!(entries[1].entry_type, EntryType::Directory);
        assert_eq!(entries[0].entry_type, EntryType::Regular);
        assert_eq!(entries[0].size, 1);
    }

    #[test]
    fn test_list_missing_dir_is_read_failed() {
        let dir = tempdir().unwrap();
        assert_eq!(
            list(&dir.path().join("absent")).unwrap_err(),
            FileStatus::ReadFailed
        );
    }

    #[test]
    fn test_write_file_respects_overwrite_policy() {
        let dir = tempdir().unwrap();
        assert_eq!(
            write_file(dir.path(), "f.bin", b"one", false),
            FileStatus::WrittenSuccessfully
        );
        assert_eq!(
            write_file(dir.path(), "f.bin", b"two", false),
            FileStatus::AlreadyExists
        );
        assert_eq!(fs::read(dir.path().join("f.bin")).unwrap(), b"one");
        assert_eq!(
            write_file(dir.path(), "f.bin", b"two", true),
            FileStatus::WrittenSuccessfully
        );
        assert_eq!(fs::read(dir.path().join("f.bin")).unwrap(), b"two");
    }
}
