//! Runtime configuration: key directory and timeouts. Not a file format —
//! just the knobs the FSM and KeyStore need, overridable from the
//! environment the way the upstream tool's `ADB_VENDOR_KEYS`/key path does.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the private key file; the public key is persisted alongside
    /// it as `<key_path>.pub`. Default `~/.android/adbkey`.
    pub key_path: PathBuf,
    /// Timeout for ordinary Transport reads (handshake, stream I/O).
    pub connect_timeout: Duration,
    /// Timeout while waiting for the user to approve this host's key on
    /// the device screen. Longer than `connect_timeout` by default.
    pub user_approval_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_path: default_keydir().join("adbkey"),
            connect_timeout: Duration::from_secs(10),
            user_approval_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Reads `ADB_KEY_PATH`, which points at the private key file itself
    /// (not a directory), overriding the default `~/.android/adbkey`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("ADB_KEY_PATH") {
            config.key_path = PathBuf::from(path);
        }
        config
    }
}

fn default_keydir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".android")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_key_path_is_adbkey_under_android_dir() {
        let config = Config::default();
        assert_eq!(config.key_path.file_name().unwrap(), "adbkey");
        assert!(config.key_path.parent().unwrap().ends_with(".android"));
    }
}
