//! Loads or generates the host's 2048-bit RSA key pair used to authenticate
//! with ADB devices, matching the upstream `~/.android/adbkey{,.pub}` layout
//! so an existing device trust list keeps working.

use crate::error::AdbError;
use crate::pubkey::AndroidPublicKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::signature::hazmat::PrehashSigner;
use rsa::signature::SignatureEncoding;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const RSA_KEY_BITS: usize = 2048;
/// How long to wait for a concurrent first-run to finish generating the key.
const LOCK_WAIT: Duration = Duration::from_millis(50);
const LOCK_RETRIES: u32 = 100;

pub struct KeyStore {
    private_key: RsaPrivateKey,
}

impl KeyStore {
    /// Loads the private key at `<keydir>/adbkey`, generating and
    /// persisting a fresh one on first use. Idempotent: a second call with
    /// an existing key file reads it rather than overwriting it.
    pub fn load_or_generate(keydir: impl AsRef<Path>) -> Result<Self, AdbError> {
        Self::load_or_generate_at_path(keydir.as_ref().join("adbkey"))
    }

    /// Like [`Self::load_or_generate`], but `priv_path` names the private
    /// key file directly (e.g. from `ADB_KEY_PATH`) rather than a directory
    /// containing `adbkey`. The public key is persisted alongside it as
    /// `<priv_path>.pub`.
    pub fn load_or_generate_at_path(priv_path: impl AsRef<Path>) -> Result<Self, AdbError> {
        let priv_path = priv_path.as_ref();
        if let Some(parent) = priv_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut pub_name = priv_path.file_name().unwrap_or_default().to_os_string();
        pub_name.push(".pub");
        let pub_path = priv_path.with_file_name(pub_name);

        if let Some(key) = Self::try_load(priv_path)? {
            log::debug!("keystore: loaded existing key at {}", priv_path.display());
            return Ok(Self { private_key: key });
        }

        match Self::claim_generation_lock(priv_path)? {
            true => {
                log::debug!("keystore: generating new key at {}", priv_path.display());
                let key = Self::generate_and_persist(priv_path, &pub_path)?;
                Ok(Self { private_key: key })
            }
            false => {
                // Another process is generating; wait for it to finish.
                for _ in 0..LOCK_RETRIES {
                    if let Some(key) = Self::try_load(priv_path)? {
                        return Ok(Self { private_key: key });
                    }
                    thread::sleep(LOCK_WAIT);
                }
                log::error!("keystore: timed out waiting for concurrent key generation");
                Err(AdbError::KeyStore(format!(
                    "timed out waiting for concurrent key generation at {}",
                    priv_path.display()
                )))
            }
        }
    }

    fn try_load(priv_path: &Path) -> Result<Option<RsaPrivateKey>, AdbError> {
        match fs::read_to_string(priv_path) {
            Ok(pem) => RsaPrivateKey::from_pkcs8_pem(&pem)
                .map(Some)
                .map_err(|e| AdbError::KeyStore(format!("failed to parse {}: {e}", priv_path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdbError::Io(e)),
        }
    }

    /// Atomically claims the right to generate the key by creating a lock
    /// file with `O_EXCL` semantics. Returns `true` if this call won the
    /// race, `false` if another process already holds it.
    fn claim_generation_lock(priv_path: &Path) -> Result<bool, AdbError> {
        let lock_path = priv_path.with_extension("lock");
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(AdbError::Io(e)),
        }
    }

    fn generate_and_persist(priv_path: &Path, pub_path: &Path) -> Result<RsaPrivateKey, AdbError> {
        let lock_path = priv_path.with_extension("lock");
        let result = (|| {
            let mut rng = rsa::rand_core::OsRng;
            let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
            let public_key = RsaPublicKey::from(&private_key);

            let pem = private_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| AdbError::KeyStore(e.to_string()))?;
            write_atomic(priv_path, pem.as_bytes(), 0o600)?;

            let mut pub_blob = AndroidPublicKey::new(&public_key)?.encode();
            // strip the protocol's embedded NUL, write a real text line instead.
            pub_blob.pop();
            pub_blob.push(b' ');
            pub_blob.extend_from_slice(default_comment().as_bytes());
            pub_blob.push(b'\n');
            write_atomic(pub_path, &pub_blob, 0o644)?;

            Ok(private_key)
        })();
        let _ = fs::remove_file(&lock_path);
        result
    }

    /// Signs a 20-byte AUTH token with PKCS#1 v1.5 / SHA-1, producing a
    /// 256-byte signature (for a 2048-bit key). The token is already the
    /// digest ADB wants embedded in the `DigestInfo`; it is not hashed again.
    pub fn sign(&self, token: &[u8]) -> Result<Vec<u8>, AdbError> {
        log::trace!("keystore: signing {}-byte auth token", token.len());
        let signing_key = SigningKey::<Sha1>::new(self.private_key.clone());
        let signature = signing_key
            .sign_prehash(token)
            .map_err(|_| AdbError::KeyStore("failed to sign auth token".into()))?;
        Ok(signature.to_vec())
    }

    /// The ADB-format public key blob, null-terminated, ready to go in an
    /// `AUTH(RSAPUBLICKEY, ...)` payload.
    pub fn public_key_blob(&self) -> Result<Vec<u8>, AdbError> {
        let public_key = RsaPublicKey::from(&self.private_key);
        Ok(AndroidPublicKey::new(&public_key)?.encode())
    }
}

fn default_comment() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
    let host = dirs::home_dir()
        .and_then(|h| h.file_name().map(|_| ()))
        .map(|_| whoami_host())
        .unwrap_or_else(whoami_host);
    format!("{user}@{host}")
}

fn whoami_host() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
}

#[cfg(unix)]
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), AdbError> {
    use std::os::unix::fs::OpenOptionsExt;
    let tmp_path = tmp_path(path);
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(&tmp_path)?;
    f.write_all(contents)?;
    f.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_atomic(path: &Path, contents: &[u8], _mode: u32) -> Result<(), AdbError> {
    let tmp_path = tmp_path(path);
    let mut f = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
    f.write_all(contents)?;
    f.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_then_reuses_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store1 = KeyStore::load_or_generate(dir.path()).unwrap();
        let pem1 = store1.private_key.to_pkcs8_pem(LineEnding::LF).unwrap();

        let store2 = KeyStore::load_or_generate(dir.path()).unwrap();
        let pem2 = store2.private_key.to_pkcs8_pem(LineEnding::LF).unwrap();

        assert_eq!(pem1.as_str(), pem2.as_str());
    }

    #[test]
    fn persists_expected_files_with_permissions() {
        let dir = tempfile::tempdir().unwrap();
        KeyStore::load_or_generate(dir.path()).unwrap();

        let priv_path = dir.path().join("adbkey");
        let pub_path = dir.path().join("adbkey.pub");
        assert!(priv_path.exists());
        assert!(pub_path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let priv_mode = fs::metadata(&priv_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(priv_mode, 0o600);
        }
    }

    #[test]
    fn sign_produces_256_byte_signature() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::load_or_generate(dir.path()).unwrap();
        let token = [7u8; 20];
        let sig = store.sign(&token).unwrap();
        assert_eq!(sig.len(), 256);
    }
}
