//! Persistent ed25519 key the gateway presents to clients and uses to log
//! into backend nodes.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use russh_keys::key::KeyPair;
use std::io;
use tracing::info;

use crate::bastion::domain::{BastionError, BastionResult};

/// PEM-encoded gateway key, loaded from disk or freshly generated.
#[derive(Clone)]
pub struct HostKey {
    pem: String,
}

impl std::fmt::Debug for HostKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("HostKey(<redacted>)")
    }
}

impl HostKey {
    /// Loads the key stored at `path`, generating and storing a new one when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when the file cannot be read or
    /// written or does not hold a usable key.
    pub fn load_or_generate(path: &Utf8Path) -> BastionResult<Self> {
        let (directory, file_name) = split_path(path)?;
        let dir = Dir::create_ambient_dir_all(&directory, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(&directory, ambient_authority()))
            .map_err(BastionError::transport)?;

        match dir.read_to_string(file_name) {
            Ok(pem) => {
                let key = Self { pem };
                key.key_pair()?;
                Ok(key)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let key = Self::generate()?;
                dir.write(file_name, key.pem.as_bytes())
                    .map_err(BastionError::transport)?;
                #[cfg(unix)]
                restrict_permissions(&dir, file_name)?;
                info!(%path, fingerprint = %key.fingerprint()?, "generated gateway key");
                Ok(key)
            }
            Err(err) => Err(BastionError::transport(err)),
        }
    }

    /// Generates a key that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when key generation or encoding
    /// fails.
    pub fn generate() -> BastionResult<Self> {
        let key = KeyPair::generate_ed25519().ok_or_else(|| {
            BastionError::transport(io::Error::other("ed25519 key generation failed"))
        })?;
        let mut encoded = Vec::new();
        russh_keys::encode_pkcs8_pem(&key, &mut encoded).map_err(BastionError::transport)?;
        let pem = String::from_utf8(encoded).map_err(BastionError::transport)?;
        Ok(Self { pem })
    }

    /// Decodes a fresh key pair.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when the stored PEM is invalid.
    pub fn key_pair(&self) -> BastionResult<KeyPair> {
        russh_keys::decode_secret_key(&self.pem, None).map_err(BastionError::transport)
    }

    /// Returns the SHA-256 fingerprint of the public half.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Transport`] when the stored PEM is invalid.
    pub fn fingerprint(&self) -> BastionResult<String> {
        let public = self
            .key_pair()?
            .clone_public_key()
            .map_err(BastionError::transport)?;
        Ok(public.fingerprint())
    }
}

fn split_path(path: &Utf8Path) -> BastionResult<(Utf8PathBuf, &str)> {
    let file_name = path.file_name().ok_or_else(|| {
        BastionError::transport(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("host key path '{path}' has no file name"),
        ))
    })?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((directory.to_owned(), file_name))
}

#[cfg(unix)]
fn restrict_permissions(dir: &Dir, file_name: &str) -> BastionResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let owner_only = std::fs::Permissions::from_mode(0o600);
    dir.set_permissions(file_name, cap_std::fs::Permissions::from_std(owner_only))
        .map_err(BastionError::transport)
}
