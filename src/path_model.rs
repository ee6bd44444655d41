/// Path separator used for both the local and the remote side; the remote
/// end of an SFTP session is always POSIX.
pub const SEPARATOR: char = '/';

/// Join a directory and an entry name, normalizing the separator between
/// them. `join(p, name)` equals `join(p + "/", name)` for every `p`.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}{}{}", dir.trim_end_matches(SEPARATOR), SEPARATOR, name)
}

/// Parent directory of a path, with `/` as fixed point.
pub fn parent(path: &str) -> String {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        return SEPARATOR.to_string();
    }
    match trimmed.rfind(SEPARATOR) {
        Some(0) => SEPARATOR.to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => SEPARATOR.to_string(),
    }
}

/// Working-directory tracking for one pane. Pure string bookkeeping,
/// no filesystem access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathModel {
    pwd: String,
}

impl PathModel {
    pub fn new(start: &str) -> Self {
        let pwd = if start.is_empty() {
            SEPARATOR.to_string()
        } else {
            start.to_string()
        };
        Self { pwd }
    }

    pub fn pwd(&self) -> &str {
        &self.pwd
    }

    /// Enter a subdirectory of the current directory.
    pub fn enter(&mut self, name: &str) {
        self.pwd = join(&self.pwd, name);
    }

    /// Go to the parent directory. At the root this is a no-op.
    pub fn back(&mut self) {
        self.pwd = parent(&self.pwd);
    }

    /// Absolute path of an entry in the current directory.
    pub fn path_of(&self, name: &str) -> String {
        join(&self.pwd, name)
    }
}

impl Default for PathModel {
    fn default() -> Self {
        Self::new("/")
    }
}
