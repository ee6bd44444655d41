use std::fmt;

/// Outcome codes shared by the local and remote backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    WrittenSuccessfully,
    AlreadyExists,
    DirAlreadyExists,
    WriteFailed,
    ReadFailed,
    MkdirFailed,
    CopyFailed,
    RemoveFailed,
    StopRequested,
}

impl FileStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, FileStatus::WrittenSuccessfully)
    }

    /// Conflicts are recoverable by retrying with overwrite enabled.
    pub fn is_conflict(&self) -> bool {
        matches!(self, FileStatus::AlreadyExists | FileStatus::DirAlreadyExists)
    }

    pub fn message(&self) -> &'static str {
        match self {
            FileStatus::WrittenSuccessfully => "operation completed successfully",
            FileStatus::AlreadyExists => "file already exists",
            FileStatus::DirAlreadyExists => "directory already exists",
            FileStatus::WriteFailed => "file write failed",
            FileStatus::ReadFailed => "file read failed",
            FileStatus::MkdirFailed => "cannot create directory",
            FileStatus::CopyFailed => "copy failed",
            FileStatus::RemoveFailed => "remove failed",
            FileStatus::StopRequested => "operation stopped on request",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Authentication handshake outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    Ok,
    Cancel,
    Error,
    /// Host is not in the trust store; the caller must ask the user
    /// whether the offered key should be trusted.
    AskTrust,
    PasswordNeeded,
}

/// User's answer to an [`AuthResult::AskTrust`] prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustChoice {
    Accept,
    Decline,
}

/// Session diagnostics. Only the most recent one is kept on a session.
pub const MSG_CONNECT_FAILED: &str = "cannot connect to remote (username/address)";
pub const MSG_NO_SERVER_KEY: &str = "cannot get server public key";
pub const MSG_KEY_CHANGED: &str =
    "server public key changed, disconnected for security reasons";
pub const MSG_NO_APPROPRIATE_KEY: &str = "cannot find appropriate public key for server";
pub const MSG_STORE_MISSING: &str =
    "known_hosts not found (it is created if the server key is accepted).\nThe server provided the following public key: ";
pub const MSG_SERVER_UNKNOWN: &str =
    "server is unknown. Do you trust the server?\nThe server provided the following public key: ";
pub const MSG_PASSWORD_AUTH_FAILED: &str = "password authentication failed";
pub const MSG_TRUST_DECLINED: &str = "server key rejected, connection abandoned";

/// Render raw fingerprint bytes as two lowercase hex digits per byte.
pub fn fingerprint_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 15));
    }
    out
}

fn hex_digit(nibble: u8) -> char {
    (nibble + if nibble < 10 { b'0' } else { b'a' - 10 }) as char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex_pairs() {
        assert_eq!(fingerprint_hex(&[0x00, 0xff, 0x1a]), "00ff1a");
        assert_eq!(fingerprint_hex(&[]), "");
    }

    #[test]
    fn test_fingerprint_hex_is_lowercase_and_fixed_length() {
        let rendered = fingerprint_hex(&[0xAB; 32]);
        assert_eq!(rendered.len(), 64);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_conflict_classification() {
        assert!(FileStatus::AlreadyExists.is_conflict());
        assert!(FileStatus::DirAlreadyExists.is_conflict());
        assert!(!FileStatus::WriteFailed.is_conflict());
        assert!(!FileStatus::StopRequested.is_conflict());
    }
}
