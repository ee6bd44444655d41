use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Local, TimeZone};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use russh::*;
use russh::keys::*;
use russh_sftp::client::SftpSession;

use crate::error::SessionError;
use crate::path_model;
use crate::services::known_hosts::{self, KeyVerdict, TrustStore};
use crate::services::{DirEntry, EntryType};
use crate::status::{self, AuthResult, FileStatus, TrustChoice};

/// Remote reads are buffered in chunks of this size
const READ_CHUNK_SIZE: usize = 64 * 1024;
/// Remote writes are issued in frames no larger than this, never as one call
const WRITE_CHUNK_SIZE: usize = 32 * 1024;

/// Session lifecycle. Every error or declined trust decision tears the
/// session back down to `Disconnected`; no path skips trust verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Authenticated,
    Ready,
}

/// Client handler that accepts the transport-level key exchange and
/// records the server key; trust against the store is decided above the
/// transport, in `authenticate_init`.
pub(crate) struct HostKeyCapture {
    key: Arc<Mutex<Option<key::PublicKey>>>,
}

#[async_trait::async_trait]
impl client::Handler for HostKeyCapture {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if let Ok(mut slot) = self.key.lock() {
            *slot = Some(server_public_key.clone());
        }
        Ok(true)
    }
}

/// One connected remote host: transport, authentication handshake and
/// the SFTP subsystem the remote backend operates through.
pub struct RemoteSession {
    runtime: Runtime,
    handle: Option<client::Handle<HostKeyCapture>>,
    sftp: Option<SftpSession>,
    trust_store: TrustStore,
    server_key: Arc<Mutex<Option<key::PublicKey>>>,
    /// Raw fingerprint digest, held only while a trust decision is pending
    pending_fingerprint: Option<Vec<u8>>,
    /// Resolved at most once, after authentication
    home_dir: Option<String>,
    /// Most recent diagnostic; overwritten on every event, never accumulated
    last_message: String,
    user: String,
    host: String,
    port: u16,
    authenticated: bool,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish()
    }
}

impl RemoteSession {
    /// Connect the transport. Nothing is trusted or authenticated yet;
    /// a failed handshake tears down everything built so far.
    pub fn connect(
        user: &str,
        host: &str,
        port: u16,
        trust_store: TrustStore,
    ) -> Result<Self, SessionError> {
        let runtime = Runtime::new().map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;
        let server_key = Arc::new(Mutex::new(None));

        let config = client::Config {
            inactivity_timeout: Some(std::time::Duration::from_secs(300)),
            keepalive_interval: Some(std::time::Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        let capture = HostKeyCapture {
            key: Arc::clone(&server_key),
        };

        let handle = runtime
            .block_on(client::connect(Arc::new(config), (host, port), capture))
            .map_err(|e| {
                SessionError::ConnectionFailed(format!("{}: {}", status::MSG_CONNECT_FAILED, e))
            })?;

        info!("connected to {}@{}:{}", user, host, port);
        Ok(Self {
            runtime,
            handle: Some(handle),
            sftp: None,
            trust_store,
            server_key,
            pending_fingerprint: None,
            home_dir: None,
            last_message: String::new(),
            user: user.to_string(),
            host: host.to_string(),
            port,
            authenticated: false,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.handle.is_none() {
            SessionState::Disconnected
        } else if self.sftp.is_some() {
            SessionState::Ready
        } else if self.authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Connected
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Most recent diagnostic message
    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    /// Raw fingerprint bytes of the offered key, present only while a
    /// trust decision is pending
    pub fn pending_fingerprint(&self) -> Option<&[u8]> {
        self.pending_fingerprint.as_deref()
    }

    fn set_message(&mut self, message: impl Into<String>) {
        self.last_message = message.into();
    }

    fn captured_server_key(&self) -> Option<key::PublicKey> {
        self.server_key.lock().ok().and_then(|slot| slot.clone())
    }

    /// First authentication step: verify the server key against the
    /// trust store, then attempt key-based auth when the host is trusted.
    pub fn authenticate_init(&mut self) -> AuthResult {
        let Some(server_key) = self.captured_server_key() else {
            self.set_message(status::MSG_NO_SERVER_KEY);
            return AuthResult::Error;
        };

        let key_blob = server_key.public_key_bytes();
        match self
            .trust_store
            .verify(&self.host, self.port, server_key.name(), &key_blob)
        {
            KeyVerdict::Trusted => self.try_key_auth(),
            KeyVerdict::Changed => {
                warn!("server key changed for {}:{}", self.host, self.port);
                self.set_message(status::MSG_KEY_CHANGED);
                AuthResult::Error
            }
            KeyVerdict::KeyKindMismatch => {
                self.set_message(status::MSG_NO_APPROPRIATE_KEY);
                AuthResult::Error
            }
            verdict @ (KeyVerdict::UnknownHost | KeyVerdict::StoreMissing) => {
                let digest = known_hosts::fingerprint(&key_blob);
                let prompt = if verdict == KeyVerdict::StoreMissing {
                    status::MSG_STORE_MISSING
                } else {
                    status::MSG_SERVER_UNKNOWN
                };
                self.set_message(format!("{}{}", prompt, status::fingerprint_hex(&digest)));
                self.pending_fingerprint = Some(digest);
                AuthResult::AskTrust
            }
        }
    }

    /// Resolution of an `AskTrust` prompt. Accept persists the offered
    /// key and retries key auth; Decline abandons the attempt.
    pub fn authenticate_key(&mut self, choice: TrustChoice) -> AuthResult {
        match choice {
            TrustChoice::Decline => {
                self.pending_fingerprint = None;
                self.set_message(status::MSG_TRUST_DECLINED);
                AuthResult::Cancel
            }
            TrustChoice::Accept => {
                let Some(server_key) = self.captured_server_key() else {
                    self.set_message(status::MSG_NO_SERVER_KEY);
                    return AuthResult::Error;
                };
                let key_blob = server_key.public_key_bytes();
                if let Err(e) =
                    self.trust_store
                        .trust(&self.host, self.port, server_key.name(), &key_blob)
                {
                    self.set_message(format!("cannot record trusted key: {}", e));
                    return AuthResult::Error;
                }
                self.pending_fingerprint = None;
                self.try_key_auth()
            }
        }
    }

    /// Key auth against the default identity files. Refusal is not an
    /// error; it falls through to the password prompt.
    fn try_key_auth(&mut self) -> AuthResult {
        if self.handle.is_none() {
            return AuthResult::Error;
        }
        let Some(ssh_dir) = dirs::home_dir().map(|home| home.join(".ssh")) else {
            return AuthResult::PasswordNeeded;
        };

        for identity in ["id_ed25519", "id_rsa"] {
            let path = ssh_dir.join(identity);
            if !path.exists() {
                continue;
            }
            let key_pair = match russh_keys::load_secret_key(&path, None) {
                Ok(key_pair) => key_pair,
                Err(e) => {
                    debug!("skipping identity {}: {}", path.display(), e);
                    continue;
                }
            };

            let attempt = {
                let Some(handle) = self.handle.as_mut() else {
                    return AuthResult::Error;
                };
                self.runtime
                    .block_on(handle.authenticate_publickey(&self.user, Arc::new(key_pair)))
            };
            match attempt {
                Ok(true) => {
                    info!("public key auth succeeded for {}@{}", self.user, self.host);
                    self.authenticated = true;
                    return AuthResult::Ok;
                }
                Ok(false) => debug!("server refused identity {}", path.display()),
                Err(e) => debug!("public key attempt failed: {}", e),
            }
        }

        AuthResult::PasswordNeeded
    }

    /// Exactly one attempt; the caller decides whether to prompt again.
    pub fn authenticate_password(&mut self, password: &str) -> AuthResult {
        let attempt = {
            let Some(handle) = self.handle.as_mut() else {
                return AuthResult::Error;
            };
            self.runtime
                .block_on(handle.authenticate_password(&self.user, password))
        };
        match attempt {
            Ok(true) => {
                info!("password auth succeeded for {}@{}", self.user, self.host);
                self.authenticated = true;
                AuthResult::Ok
            }
            Ok(false) | Err(_) => {
                self.set_message(status::MSG_PASSWORD_AUTH_FAILED);
                AuthResult::Error
            }
        }
    }

    /// Resolve and cache the remote home directory. Runs exactly one
    /// remote command, after authentication.
    pub fn home_dir(&mut self) -> Result<String, SessionError> {
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        if let Some(home) = &self.home_dir {
            return Ok(home.clone());
        }

        let output = self.exec_capture("echo $HOME")?;
        let home = output.trim();
        let home = if home.is_empty() {
            "/".to_string()
        } else {
            home.to_string()
        };
        debug!("remote home directory is {}", home);
        self.home_dir = Some(home.clone());
        Ok(home)
    }

    /// Establish the SFTP subsystem atop the authenticated transport.
    /// Failure here is fatal to the connection.
    pub fn init_transfer_subsystem(&mut self) -> Result<(), SessionError> {
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }

        let subsystem = {
            let Some(handle) = self.handle.as_ref() else {
                return Err(SessionError::Disconnected);
            };
            self.runtime.block_on(async {
                let channel = handle
                    .channel_open_session()
                    .await
                    .map_err(|e| SessionError::ChannelError(e.to_string()))?;
                channel
                    .request_subsystem(true, "sftp")
                    .await
                    .map_err(|e| SessionError::SubsystemError(e.to_string()))?;
                SftpSession::new(channel.into_stream())
                    .await
                    .map_err(|e| SessionError::SubsystemError(e.to_string()))
            })
        };

        match subsystem {
            Ok(sftp) => {
                self.sftp = Some(sftp);
                info!("sftp subsystem ready on {}", self.host);
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// List a remote directory, sorted by name, `.`/`..` excluded.
    /// "Cannot open" and "cannot enumerate" surface as separate failures.
    pub fn list(&mut self, dir: &str) -> Result<Vec<DirEntry>, FileStatus> {
        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                self.set_message("transfer subsystem not initialized");
                return Err(FileStatus::ReadFailed);
            };
            self.runtime.block_on(async {
                if let Err(e) = sftp.metadata(dir).await {
                    return Err(format!("cannot open directory '{}': {}", dir, e));
                }
                let read_dir = sftp
                    .read_dir(dir)
                    .await
                    .map_err(|e| format!("cannot enumerate directory '{}': {}", dir, e))?;

                let mut entries = Vec::new();
                for entry in read_dir {
                    let name = entry.file_name();
                    if name == "." || name == ".." {
                        continue;
                    }
                    let attrs = entry.metadata();

                    let entry_type = if attrs.is_symlink() {
                        EntryType::Symlink
                    } else if attrs.is_dir() {
                        EntryType::Directory
                    } else if attrs.is_regular() {
                        EntryType::Regular
                    } else {
                        EntryType::Other
                    };
                    let uid = attrs.uid.unwrap_or(0);
                    let gid = attrs.gid.unwrap_or(0);
                    let modified = attrs
                        .mtime
                        .and_then(|t| Local.timestamp_opt(t as i64, 0).single())
                        .unwrap_or_else(Local::now);

                    entries.push(DirEntry {
                        name,
                        entry_type,
                        size: attrs.size.unwrap_or(0),
                        uid,
                        gid,
                        owner: attrs.user.clone().unwrap_or_else(|| uid.to_string()),
                        group: attrs.group.clone().unwrap_or_else(|| gid.to_string()),
                        permissions: attrs.permissions.unwrap_or(0) & 0o7777,
                        modified,
                    });
                }
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            })
        };

        match outcome {
            Ok(entries) => Ok(entries),
            Err(message) => {
                self.set_message(message);
                Err(FileStatus::ReadFailed)
            }
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let Some(sftp) = self.sftp.as_ref() else {
            return false;
        };
        self.runtime.block_on(sftp.metadata(path)).is_ok()
    }

    /// Entry type of a remote path, following symlinks
    pub fn entry_kind(&self, path: &str) -> Result<EntryType, FileStatus> {
        let Some(sftp) = self.sftp.as_ref() else {
            return Err(FileStatus::ReadFailed);
        };
        let attrs = self
            .runtime
            .block_on(sftp.metadata(path))
            .map_err(|_| FileStatus::ReadFailed)?;
        Ok(if attrs.is_dir() {
            EntryType::Directory
        } else if attrs.is_symlink() {
            EntryType::Symlink
        } else if attrs.is_regular() {
            EntryType::Regular
        } else {
            EntryType::Other
        })
    }

    /// Create a remote directory. The probe keeps the conflict
    /// distinguishable from a genuine creation failure.
    pub fn mkdir(&mut self, path: &str) -> FileStatus {
        if self.exists(path) {
            return FileStatus::DirAlreadyExists;
        }
        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::MkdirFailed;
            };
            self.runtime.block_on(sftp.create_dir(path))
        };
        match outcome {
            Ok(_) => FileStatus::WrittenSuccessfully,
            Err(e) => {
                self.set_message(format!("cannot create directory '{}': {}", path, e));
                FileStatus::MkdirFailed
            }
        }
    }

    /// Rename never overwrites an existing target.
    pub fn rename(&mut self, old: &str, new: &str) -> FileStatus {
        if self.exists(new) {
            return FileStatus::AlreadyExists;
        }
        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::WriteFailed;
            };
            self.runtime.block_on(sftp.rename(old, new))
        };
        match outcome {
            Ok(_) => FileStatus::WrittenSuccessfully,
            Err(e) => {
                self.set_message(format!("cannot rename '{}' to '{}': {}", old, new, e));
                FileStatus::WriteFailed
            }
        }
    }

    pub fn remove_file(&mut self, path: &str) -> FileStatus {
        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::RemoveFailed;
            };
            self.runtime.block_on(sftp.remove_file(path))
        };
        match outcome {
            Ok(_) => FileStatus::WrittenSuccessfully,
            Err(e) => {
                self.set_message(format!("cannot remove '{}': {}", path, e));
                FileStatus::RemoveFailed
            }
        }
    }

    /// Remove a remote tree depth-first, children before their parent,
    /// checking the cancellation flag before each entry.
    pub fn remove_recursive(&mut self, path: &str, cancel: &AtomicBool) -> FileStatus {
        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::RemoveFailed;
            };
            self.runtime.block_on(remove_tree(sftp, path, cancel))
        };
        match outcome {
            Ok(()) => FileStatus::WrittenSuccessfully,
            Err(status) => status,
        }
    }

    /// Read a whole remote file into memory, for transfers that cross
    /// backends.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, FileStatus> {
        let outcome: Result<Vec<u8>, String> = {
            let Some(sftp) = self.sftp.as_ref() else {
                return Err(FileStatus::ReadFailed);
            };
            self.runtime.block_on(async {
                let mut remote_file = sftp
                    .open(path)
                    .await
                    .map_err(|e| format!("cannot open '{}': {}", path, e))?;
                let mut data = Vec::new();
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                loop {
                    let n = remote_file
                        .read(&mut buf)
                        .await
                        .map_err(|e| format!("cannot read '{}': {}", path, e))?;
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                }
                Ok(data)
            })
        };
        match outcome {
            Ok(data) => Ok(data),
            Err(message) => {
                self.set_message(message);
                Err(FileStatus::ReadFailed)
            }
        }
    }

    /// Write a buffer to `dst_dir/name`, honoring the overwrite policy.
    pub fn write_file(
        &mut self,
        dst_dir: &str,
        name: &str,
        data: &[u8],
        overwrite: bool,
    ) -> FileStatus {
        let dst = path_model::join(dst_dir, name);
        if !overwrite && self.exists(&dst) {
            return FileStatus::AlreadyExists;
        }

        let outcome: Result<(), String> = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::WriteFailed;
            };
            self.runtime.block_on(async {
                let mut remote_file = sftp
                    .create(&dst)
                    .await
                    .map_err(|e| format!("cannot create '{}': {}", dst, e))?;
                for chunk in data.chunks(WRITE_CHUNK_SIZE) {
                    remote_file
                        .write_all(chunk)
                        .await
                        .map_err(|e| format!("cannot write '{}': {}", dst, e))?;
                }
                remote_file
                    .shutdown()
                    .await
                    .map_err(|e| format!("cannot close '{}': {}", dst, e))?;
                Ok(())
            })
        };
        match outcome {
            Ok(()) => FileStatus::WrittenSuccessfully,
            Err(message) => {
                self.set_message(message);
                FileStatus::WriteFailed
            }
        }
    }

    /// Copy one remote file into `dst_dir` under the same name, streaming
    /// through the SFTP channel. Truncates on overwrite, including the
    /// degenerate case where source and destination coincide.
    pub fn copy_file(
        &mut self,
        src_dir: &str,
        name: &str,
        dst_dir: &str,
        overwrite: bool,
    ) -> FileStatus {
        let src = path_model::join(src_dir, name);
        let dst = path_model::join(dst_dir, name);
        if !overwrite && self.exists(&dst) {
            return FileStatus::AlreadyExists;
        }

        let outcome = {
            let Some(sftp) = self.sftp.as_ref() else {
                return FileStatus::CopyFailed;
            };
            self.runtime.block_on(async {
                let mut from = sftp.open(&src).await.map_err(|e| {
                    (FileStatus::ReadFailed, format!("cannot open '{}': {}", src, e))
                })?;
                let mut to = sftp.create(&dst).await.map_err(|e| {
                    (FileStatus::WriteFailed, format!("cannot create '{}': {}", dst, e))
                })?;

                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                loop {
                    let n = from.read(&mut buf).await.map_err(|e| {
                        (FileStatus::ReadFailed, format!("cannot read '{}': {}", src, e))
                    })?;
                    if n == 0 {
                        break;
                    }
                    for chunk in buf[..n].chunks(WRITE_CHUNK_SIZE) {
                        to.write_all(chunk).await.map_err(|e| {
                            (FileStatus::WriteFailed, format!("cannot write '{}': {}", dst, e))
                        })?;
                    }
                }
                to.shutdown().await.map_err(|e| {
                    (FileStatus::WriteFailed, format!("cannot close '{}': {}", dst, e))
                })?;
                Ok(())
            })
        };
        match outcome {
            Ok(()) => FileStatus::WrittenSuccessfully,
            Err((status_code, message)) => {
                self.set_message(message);
                status_code
            }
        }
    }

    /// Copy a remote directory into `dst_dir` under the same name,
    /// checking the cancellation flag between children.
    pub fn copy_dir(
        &mut self,
        src_dir: &str,
        name: &str,
        dst_dir: &str,
        recursive: bool,
        overwrite: bool,
        cancel: &AtomicBool,
    ) -> FileStatus {
        let src = path_model::join(src_dir, name);
        let dst = path_model::join(dst_dir, name);

        match self.entry_kind(&dst) {
            Ok(EntryType::Directory) if !overwrite => return FileStatus::DirAlreadyExists,
            Ok(_) if !overwrite => return FileStatus::AlreadyExists,
            Ok(_) => {}
            Err(_) => {
                let status = self.mkdir(&dst);
                if status != FileStatus::WrittenSuccessfully
                    && status != FileStatus::DirAlreadyExists
                {
                    return status;
                }
            }
        }

        if !recursive {
            return FileStatus::WrittenSuccessfully;
        }

        let children = match self.list(&src) {
            Ok(children) => children,
            Err(status) => return status,
        };
        for child in children {
            if cancel.load(Ordering::Relaxed) {
                debug!("copy of {} stopped on request", src);
                return FileStatus::StopRequested;
            }
            let status = match child.entry_type {
                EntryType::Directory => {
                    self.copy_dir(&src, &child.name, &dst, true, overwrite, cancel)
                }
                _ => self.copy_file(&src, &child.name, &dst, overwrite),
            };
            if status != FileStatus::WrittenSuccessfully {
                return status;
            }
        }

        FileStatus::WrittenSuccessfully
    }

    /// Copy a remote file or tree, dispatching on the source's type.
    pub fn copy_files(
        &mut self,
        src_dir: &str,
        name: &str,
        dst_dir: &str,
        overwrite: bool,
        cancel: &AtomicBool,
    ) -> FileStatus {
        let src = path_model::join(src_dir, name);
        match self.entry_kind(&src) {
            Ok(EntryType::Directory) => self.copy_dir(src_dir, name, dst_dir, true, overwrite, cancel),
            Ok(_) => self.copy_file(src_dir, name, dst_dir, overwrite),
            Err(status) => status,
        }
    }

    /// Server-side copy or move; the bytes never round-trip through the
    /// client. Used whenever source and target are both on this host.
    pub fn copy_same_host(
        &mut self,
        src_path: &str,
        dst_dir: &str,
        name: &str,
        move_source: bool,
        overwrite: bool,
    ) -> FileStatus {
        let dst = path_model::join(dst_dir, name);
        if !overwrite {
            match self.entry_kind(&dst) {
                Ok(EntryType::Directory) => return FileStatus::DirAlreadyExists,
                Ok(_) => return FileStatus::AlreadyExists,
                Err(_) => {}
            }
        }

        let command = format!(
            "{} '{}' '{}'",
            if move_source { "mv" } else { "cp -a" },
            shell_escape(src_path),
            shell_escape(&dst),
        );
        match self.exec_status(&command) {
            Ok((true, _)) => FileStatus::WrittenSuccessfully,
            Ok((false, stderr)) => {
                self.set_message(format!("server-side copy failed: {}", stderr.trim()));
                FileStatus::CopyFailed
            }
            Err(e) => {
                self.set_message(e.to_string());
                FileStatus::CopyFailed
            }
        }
    }

    /// Run one command over an exec channel, collecting stdout.
    fn exec_capture(&self, command: &str) -> Result<String, SessionError> {
        let handle = self.handle.as_ref().ok_or(SessionError::Disconnected)?;
        self.runtime.block_on(async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| SessionError::ChannelError(e.to_string()))?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| SessionError::ExecFailed(e.to_string()))?;

            let mut stdout = Vec::new();
            let mut exit_status: Option<u32> = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    _ => {}
                }
            }

            if exit_status != Some(0) {
                return Err(SessionError::ExecFailed(format!(
                    "'{}' exited abnormally",
                    command
                )));
            }
            Ok(String::from_utf8_lossy(&stdout).to_string())
        })
    }

    /// Run one command over an exec channel.
    /// Returns (success, stderr_string).
    fn exec_status(&self, command: &str) -> Result<(bool, String), SessionError> {
        let handle = self.handle.as_ref().ok_or(SessionError::Disconnected)?;
        self.runtime.block_on(async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| SessionError::ChannelError(e.to_string()))?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| SessionError::ExecFailed(e.to_string()))?;

            let mut stderr_bytes = Vec::new();
            let mut exit_status: Option<u32> = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::ExtendedData { data, ext } => {
                        if ext == 1 {
                            stderr_bytes.extend_from_slice(&data);
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    _ => {}
                }
            }

            let success = exit_status.map_or(false, |code| code == 0);
            Ok((success, String::from_utf8_lossy(&stderr_bytes).to_string()))
        })
    }

    /// Tear the session down to `Disconnected`, closing every handle.
    pub fn disconnect(&mut self) {
        // Drop SFTP first, then SSH
        self.sftp = None;
        if let Some(handle) = self.handle.take() {
            let _ = self
                .runtime
                .block_on(handle.disconnect(Disconnect::ByApplication, "", "en"));
        }
        self.home_dir = None;
        self.pending_fingerprint = None;
        self.authenticated = false;
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Depth-first removal of a remote tree; `.`/`..` are skipped, the
/// cancellation flag is checked before each entry.
async fn remove_tree(
    sftp: &SftpSession,
    path: &str,
    cancel: &AtomicBool,
) -> Result<(), FileStatus> {
    let entries = sftp
        .read_dir(path)
        .await
        .map_err(|_| FileStatus::RemoveFailed)?;

    for entry in entries {
        if cancel.load(Ordering::Relaxed) {
            return Err(FileStatus::StopRequested);
        }
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }
        let child = path_model::join(path, &name);
        if entry.metadata().is_dir() {
            Box::pin(remove_tree(sftp, &child, cancel)).await?;
        } else {
            sftp.remove_file(&child)
                .await
                .map_err(|_| FileStatus::RemoveFailed)?;
        }
    }

    sftp.remove_dir(path)
        .await
        .map_err(|_| FileStatus::RemoveFailed)
}

/// Single quotes prevent all shell interpretation; only single quotes
/// inside the path need escaping: ' → '\''
fn shell_escape(path: &str) -> String {
    path.replace('\'', "'\\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_plain_path() {
        assert_eq!(shell_escape("/var/log/messages"), "/var/log/messages");
    }

    #[test]
    fn test_shell_escape_embedded_quote() {
        assert_eq!(shell_escape("it's here"), "it'\\''s here");
    }

    #[test]
    fn test_write_chunk_is_bounded() {
        let data = vec![0u8; WRITE_CHUNK_SIZE * 2 + 5];
        let frames: Vec<&[u8]> = data.chunks(WRITE_CHUNK_SIZE).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() <= WRITE_CHUNK_SIZE));
    }
}
