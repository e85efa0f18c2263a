//! Directory-backed key store.
//!
//! Layout under the store directory:
//!
//! ```text
//! signing_key.pem       PKCS#8 private key, mode 0600
//! signing_key.pub.pem   SPKI public key
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::error::KeyringError;
use crate::keypair::{AgentKeyPair, AgentPublicKey};

/// File name of the private key.
pub const PRIVATE_KEY_FILE: &str = "signing_key.pem";

/// File name of the public key.
pub const PUBLIC_KEY_FILE: &str = "signing_key.pub.pem";

const SECRET_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;

/// Key store rooted at a directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Create a store handle. Nothing touches the filesystem until a key is
    /// loaded or generated.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the private key file.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Path of the public key file.
    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Whether a private key is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.private_key_path().exists()
    }

    /// Load the stored key pair, generating and persisting a new one on
    /// first use.
    ///
    /// Safe against concurrent first starts: the private key is linked into
    /// place without replacing an existing file, and a caller that loses the
    /// race loads the winner's key. A missing public key file is rewritten
    /// from the private key. A public key file that disagrees with the
    /// private key is reported as corrupt.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written, if the private
    /// key file has insecure permissions, or if stored material is corrupt.
    pub fn load_or_generate(&self) -> Result<AgentKeyPair, KeyringError> {
        let private_path = self.private_key_path();

        let keypair = match AgentKeyPair::load(&private_path) {
            Ok(keypair) => keypair,
            Err(KeyringError::KeyNotFound { .. }) => self.generate_at(private_path)?,
            Err(e) => return Err(e),
        };

        self.sync_public_key(&keypair)?;
        Ok(keypair)
    }

    fn generate_at(&self, private_path: PathBuf) -> Result<AgentKeyPair, KeyringError> {
        tracing::info!(dir = %self.dir.display(), "KeyStore: no key found, generating");
        let keypair = AgentKeyPair::generate()?;

        match keypair.persist(&private_path) {
            Ok(()) => Ok(keypair.with_storage_path(private_path)),
            Err(KeyringError::KeyAlreadyExists { .. }) => {
                tracing::info!(
                    dir = %self.dir.display(),
                    "KeyStore: key created concurrently, loading it"
                );
                AgentKeyPair::load(&private_path)
            },
            Err(e) => Err(e),
        }
    }

    /// Load the public key without touching the private key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::KeyNotFound`] if no public key has been written,
    /// or [`KeyringError::CorruptKey`] if it does not decode.
    pub fn load_public_key(&self) -> Result<AgentPublicKey, KeyringError> {
        let path = self.public_key_path();
        let pem = match fs::read_to_string(&path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyringError::KeyNotFound { path });
            },
            Err(e) => return Err(KeyringError::persistence(&path, e.to_string())),
        };

        AgentPublicKey::from_pem(&pem).map_err(|e| KeyringError::corrupt(&path, e.to_string()))
    }

    fn sync_public_key(&self, keypair: &AgentKeyPair) -> Result<(), KeyringError> {
        let path = self.public_key_path();
        let expected = keypair.public_key();

        match self.load_public_key() {
            Ok(stored) if stored == expected => Ok(()),
            Ok(stored) => {
                tracing::error!(
                    stored_key_id = %stored.key_id(),
                    expected_key_id = %expected.key_id(),
                    "KeyStore: public key does not match private key"
                );
                Err(KeyringError::corrupt(
                    &path,
                    "public key does not match private key",
                ))
            },
            Err(KeyringError::KeyNotFound { .. }) => {
                let pem = expected.to_pem()?;
                match write_new_file(&path, pem.as_bytes(), PUBLIC_MODE) {
                    Ok(()) => {
                        tracing::debug!(path = %path.display(), "KeyStore: public key written");
                        Ok(())
                    },
                    // Written concurrently; it must still match.
                    Err(KeyringError::KeyAlreadyExists { .. }) => {
                        if self.load_public_key()? == expected {
                            Ok(())
                        } else {
                            Err(KeyringError::corrupt(
                                &path,
                                "public key does not match private key",
                            ))
                        }
                    },
                    Err(e) => Err(e),
                }
            },
            Err(e) => Err(e),
        }
    }
}

/// Write secret material to `path` with owner-only permissions. Refuses to
/// replace an existing file.
pub(crate) fn write_secret_file(path: &Path, contents: &[u8]) -> Result<(), KeyringError> {
    write_new_file(path, contents, SECRET_MODE)
}

/// Read secret material from `path` after checking its permissions.
pub(crate) fn read_secret_file(path: &Path) -> Result<Zeroizing<String>, KeyringError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(KeyringError::KeyNotFound {
                path: path.to_path_buf(),
            });
        },
        Err(e) => return Err(KeyringError::persistence(path, e.to_string())),
    };

    ensure_owner_only(path, &metadata)?;

    fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|e| KeyringError::persistence(path, e.to_string()))
}

#[cfg(unix)]
fn ensure_owner_only(path: &Path, metadata: &fs::Metadata) -> Result<(), KeyringError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        tracing::error!(path = %path.display(), mode = %format!("{mode:o}"), "insecure key file permissions");
        return Err(KeyringError::InsecurePermissions {
            path: path.to_path_buf(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only(_path: &Path, _metadata: &fs::Metadata) -> Result<(), KeyringError> {
    Ok(())
}

/// Write `contents` to a randomly named temp file in the target directory,
/// fsync it, then link it to `path` only if `path` does not exist yet.
///
/// `KeyAlreadyExists` when another writer got there first; the temp file is
/// removed on every failure path.
fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), KeyringError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| KeyringError::persistence(dir, e.to_string()))?;

    let mut temp =
        NamedTempFile::new_in(dir).map_err(|e| KeyringError::persistence(dir, e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| KeyringError::persistence(path, e.to_string()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.as_file_mut()
        .write_all(contents)
        .map_err(|e| KeyringError::persistence(path, e.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| KeyringError::persistence(path, e.to_string()))?;

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Err(KeyringError::KeyAlreadyExists {
            path: path.to_path_buf(),
        }),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e.error, "KeyStore: cannot persist file");
            Err(KeyringError::persistence(path, e.error.to_string()))
        },
    }
}
