//! User directory read from a JSON file exported by the identity service.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use std::io;

use crate::bastion::{
    domain::{BastionError, BastionResult, DirectoryUser},
    ports::UserDirectory,
};

/// Directory backed by a JSON array of users.
///
/// The file is re-read on every lookup so edits by the identity service are
/// picked up without restarting the gateway.
#[derive(Debug, Clone)]
pub struct JsonFileUserDirectory {
    directory: Utf8PathBuf,
    file_name: String,
}

impl JsonFileUserDirectory {
    /// Creates a directory reading from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BastionError::Directory`] when `path` has no file name.
    pub fn new(path: &Utf8Path) -> BastionResult<Self> {
        let file_name = path.file_name().ok_or_else(|| {
            BastionError::directory(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("user directory path '{path}' has no file name"),
            ))
        })?;
        let directory = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok(Self {
            directory: directory.to_owned(),
            file_name: file_name.to_owned(),
        })
    }

    fn load(&self) -> BastionResult<Vec<DirectoryUser>> {
        let dir = Dir::open_ambient_dir(&self.directory, ambient_authority())
            .map_err(BastionError::directory)?;
        let contents = match dir.read_to_string(&self.file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BastionError::directory(err)),
        };
        serde_json::from_str(&contents).map_err(BastionError::directory)
    }
}

#[async_trait]
impl UserDirectory for JsonFileUserDirectory {
    async fn find_by_username(&self, username: &str) -> BastionResult<Option<DirectoryUser>> {
        let this = self.clone();
        let users = tokio::task::spawn_blocking(move || this.load())
            .await
            .map_err(BastionError::directory)??;
        Ok(users.into_iter().find(|user| user.username == username))
    }
}
