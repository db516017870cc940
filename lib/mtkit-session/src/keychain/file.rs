// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::error::*;
use super::{Keychain, KeychainError};
use mtkit_tl_types::deserialize::{Buffer, Result as DeserializeResult};
use mtkit_tl_types::{Deserializable, Serializable};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

struct Entry {
    name: String,
    value: Vec<u8>,
}

impl Serializable for Entry {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.name.serialize(buf);
        self.value.serialize(buf);
    }
}

impl Deserializable for Entry {
    fn deserialize(buf: Buffer) -> DeserializeResult<Self> {
        Ok(Self {
            name: String::deserialize(buf)?,
            value: Vec::<u8>::deserialize(buf)?,
        })
    }
}

/// A keychain backed by a single file.
///
/// Every entry lives in memory and the whole file is rewritten on each
/// change. The new contents are written to a sibling file first, which
/// then replaces the old one, so a crash never leaves a truncated file.
pub struct FileKeychain {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
}

impl FileKeychain {
    /// Open the keychain at `path`, starting empty if the file does not
    /// exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(content) => Vec::<Entry>::from_bytes(&content)
                .context(InvalidFormatSnafu {
                    path: path.display().to_string(),
                })?
                .into_iter()
                .map(|e| (e.name, e.value))
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).context(UnexpectedIoSnafu),
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let entries = self
            .entries
            .iter()
            .map(|(name, value)| Entry {
                name: name.clone(),
                value: value.clone(),
            })
            .collect::<Vec<_>>();

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = fs::File::create(&tmp_path).context(UnexpectedIoSnafu)?;
        file.write_all(&entries.to_bytes()).context(UnexpectedIoSnafu)?;
        file.sync_data().context(UnexpectedIoSnafu)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).context(UnexpectedIoSnafu)
    }
}

impl Keychain for FileKeychain {
    fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(name.to_string(), value);
        self.save()
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        if self.entries.remove(name).is_some() {
            self.save()
        } else {
            Ok(())
        }
    }
}

type Result<T, E = KeychainError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        std::env::temp_dir().join(format!("mtkit-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn persists_across_opens() {
        let path = temp_path("persist");
        {
            let mut keychain = FileKeychain::open(&path).unwrap();
            keychain.set("auth_infos", vec![1, 2, 3]).unwrap();
            keychain.set("other", vec![4]).unwrap();
            keychain.remove("other").unwrap();
        }

        let keychain = FileKeychain::open(&path).unwrap();
        assert_eq!(keychain.get("auth_infos"), Some(vec![1, 2, 3]));
        assert_eq!(keychain.get("other"), None);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn garbage_is_invalid_format() {
        let path = temp_path("garbage");
        fs::write(&path, [0xff; 3]).unwrap();

        assert!(matches!(
            FileKeychain::open(&path),
            Err(KeychainError::InvalidFormat { .. })
        ));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_directory_fails_on_write() {
        let path = temp_path("missing").join("nested").join("keychain");
        let mut keychain = FileKeychain::open(&path).unwrap();

        assert!(matches!(
            keychain.set("a", vec![]),
            Err(KeychainError::UnexpectedIoError { .. })
        ));
    }
}
