use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Verdict of checking an offered server key against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerdict {
    /// Key matches the stored record
    Trusted,
    /// Key differs from the stored record (potential impersonation)
    Changed,
    /// Host is known, but only with keys of other algorithms
    KeyKindMismatch,
    /// Host has no record in the store
    UnknownHost,
    /// The store file itself does not exist yet
    StoreMissing,
}

/// Entry in known_hosts: key algorithm plus base64 key blob
#[derive(Debug, Clone)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// Persistent host trust store in OpenSSH known_hosts format. Owned by
/// the session that verifies against it; nothing here is shared state.
#[derive(Debug)]
pub struct TrustStore {
    hosts: HashMap<String, Vec<HostKeyEntry>>,
    path: PathBuf,
    file_present: bool,
}

impl TrustStore {
    /// Open ~/.ssh/known_hosts
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".known_hosts"));
        Self::with_path(path)
    }

    pub fn with_path(path: PathBuf) -> Self {
        let mut store = Self {
            hosts: HashMap::new(),
            path,
            file_present: false,
        };
        if let Err(e) = store.load() {
            warn!("failed to load known_hosts: {}", e);
        }
        store
    }

    fn load(&mut self) -> Result<(), SessionError> {
        if !self.path.exists() {
            debug!("known_hosts not present at {}", self.path.display());
            return Ok(());
        }
        self.file_present = true;

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias...] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) cannot be matched here
                if hostname.starts_with('|') {
                    continue;
                }
                let normalized = Self::normalize_hostname(hostname);
                self.hosts.entry(normalized).or_default().push(entry.clone());
            }
        }

        debug!(
            "loaded {} known hosts from {}",
            self.hosts.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Normalize hostname for lookup: [host]:port -> host
    fn normalize_hostname(host: &str) -> String {
        let host = host.trim_start_matches('[');
        if let Some(idx) = host.find("]:") {
            host[..idx].to_lowercase()
        } else {
            host.trim_end_matches(']').to_lowercase()
        }
    }

    /// Lookup key for host:port
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Check an offered key against the store.
    pub fn verify(&self, host: &str, port: u16, key_type: &str, key_blob: &[u8]) -> KeyVerdict {
        if !self.file_present {
            return KeyVerdict::StoreMissing;
        }

        let offered = BASE64.encode(key_blob);
        let lookup_key = Self::make_key(host, port);

        let entries = self
            .hosts
            .get(&lookup_key)
            .or_else(|| self.hosts.get(&host.to_lowercase()));
        let Some(entries) = entries else {
            return KeyVerdict::UnknownHost;
        };

        for entry in entries {
            if entry.key_type != key_type {
                continue;
            }
            if entry.key_data == offered {
                debug!("host key verified for {}", lookup_key);
                return KeyVerdict::Trusted;
            }
            warn!("host key changed for {} (type {})", lookup_key, key_type);
            return KeyVerdict::Changed;
        }

        // Known host, but no key of this algorithm on record
        KeyVerdict::KeyKindMismatch
    }

    /// Persist an accepted key, appending to the store file.
    pub fn trust(
        &mut self,
        host: &str,
        port: u16,
        key_type: &str,
        key_blob: &[u8],
    ) -> Result<(), SessionError> {
        let lookup_key = Self::make_key(host, port);
        let key_data = BASE64.encode(key_blob);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {} {}", lookup_key, key_type, key_data)?;

        self.hosts.entry(lookup_key.clone()).or_default().push(HostKeyEntry {
            key_type: key_type.to_string(),
            key_data,
        });
        self.file_present = true;

        info!("added host key for {} (type {})", lookup_key, key_type);
        Ok(())
    }
}

/// SHA-256 digest of a raw public-key blob; the session renders it as
/// lowercase hex pairs for display.
pub fn fingerprint(key_blob: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key_blob);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY_A: &[u8] = b"first server key blob";
    const KEY_B: &[u8] = b"second server key blob";

    #[test]
    fn test_missing_store_is_store_missing() {
        let dir = tempdir().unwrap();
        let store = TrustStore::with_path(dir.path().join("known_hosts"));
        assert_eq!(
            store.verify("example.com", 22, "ssh-ed25519", KEY_A),
            KeyVerdict::StoreMissing
        );
    }

    #[test]
    fn test_trust_then_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let mut store = TrustStore::with_path(path.clone());

        store.trust("example.com", 22, "ssh-ed25519", KEY_A).unwrap();
        assert_eq!(
            store.verify("example.com", 22, "ssh-ed25519", KEY_A),
            KeyVerdict::Trusted
        );

        // Survives a reload from disk
        let reloaded = TrustStore::with_path(path);
        assert_eq!(
            reloaded.verify("example.com", 22, "ssh-ed25519", KEY_A),
            KeyVerdict::Trusted
        );
    }

    #[test]
    fn test_changed_key_is_flagged() {
        let dir = tempdir().unwrap();
        let mut store = TrustStore::with_path(dir.path().join("known_hosts"));
        store.trust("example.com", 22, "ssh-ed25519", KEY_A).unwrap();
        assert_eq!(
            store.verify("example.com", 22, "ssh-ed25519", KEY_B),
            KeyVerdict::Changed
        );
    }

    #[test]
    fn test_other_key_kind_is_mismatch() {
        let dir = tempdir().unwrap();
        let mut store = TrustStore::with_path(dir.path().join("known_hosts"));
        store.trust("example.com", 22, "ssh-rsa", KEY_A).unwrap();
        assert_eq!(
            store.verify("example.com", 22, "ssh-ed25519", KEY_A),
            KeyVerdict::KeyKindMismatch
        );
    }

    #[test]
    fn test_unknown_host_with_populated_store() {
        let dir = tempdir().unwrap();
        let mut store = TrustStore::with_path(dir.path().join("known_hosts"));
        store.trust("other.com", 22, "ssh-ed25519", KEY_A).unwrap();
        assert_eq!(
            store.verify("example.com", 22, "ssh-ed25519", KEY_A),
            KeyVerdict::UnknownHost
        );
    }

    #[test]
    fn test_nondefault_port_uses_bracketed_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let mut store = TrustStore::with_path(path.clone());
        store.trust("example.com", 2222, "ssh-ed25519", KEY_A).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[example.com]:2222 ssh-ed25519 "));
        assert_eq!(
            store.verify("example.com", 2222, "ssh-ed25519", KEY_A),
            KeyVerdict::Trusted
        );
    }

    #[test]
    fn test_fingerprint_is_sha256_sized() {
        assert_eq!(fingerprint(KEY_A).len(), 32);
        assert_ne!(fingerprint(KEY_A), fingerprint(KEY_B));
    }
}
