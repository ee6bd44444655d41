pub mod known_hosts;
pub mod local;
pub mod remote;
pub mod transfer;
pub mod worker;

use chrono::{DateTime, Local};

/// Filesystem object kind, as reported by either backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// One listed object. Produced fresh on every listing, never cached.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Resolved user name, numeric uid as fallback
    pub owner: String,
    /// Resolved group name, numeric gid as fallback
    pub group: String,
    /// Permission bits (mode & 0o7777)
    pub permissions: u32,
    pub modified: DateTime<Local>,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

/// Format permission bits as an rwxrwxrwx string
pub fn format_permissions(mode: u32) -> String {
    let mut perms = String::with_capacity(9);
    let flags = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    for (bit, ch) in &flags {
        perms.push(if mode & bit != 0 { *ch } else { '-' });
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_permissions() {
        assert_eq!(format_permissions(0o755), "rwxr-xr-x");
        assert_eq!(format_permissions(0o644), "rw-r--r--");
        assert_eq!(format_permissions(0o000), "---------");
    }
}
