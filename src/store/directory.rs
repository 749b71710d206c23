/*
 * Copyright 2021 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

//! A filesystem-backed chaincode store.
//!
//! Each package is stored once as `<hex-hash>.bin`.  Each installed
//! name/version pair is an index record `<hex of H(name, version)>.idx`
//! whose contents name the package hash it resolves to.  Index file names
//! are hashes so that chaincode names never need escaping into paths.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cbor::value::Value;
use sha2::{Digest, Sha256};

use crate::protocol::codec::{bytes, decode_map, encode, key, take_bytes, take_text, text};

use super::error::StoreError;
use super::{ChaincodeStore, InstalledChaincode};

const PACKAGE_SUFFIX: &str = "bin";
const INDEX_SUFFIX: &str = "idx";

/// A `ChaincodeStore` persisting packages under a single directory.
pub struct DirectoryStore {
    path: PathBuf,
}

impl DirectoryStore {
    /// Opens (creating if necessary) a store rooted at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        fs::create_dir_all(path.as_ref()).map_err(|err| {
            StoreError::storage(
                &format!("failed to create store directory {}", path.as_ref().display()),
                Box::new(err),
            )
        })?;
        Ok(DirectoryStore {
            path: path.as_ref().to_path_buf(),
        })
    }

    fn package_path(&self, hash: &[u8]) -> PathBuf {
        self.path
            .join(format!("{}.{}", hex::encode(hash), PACKAGE_SUFFIX))
    }

    fn index_path(&self, name: &str, version: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        self.path.join(format!(
            "{}.{}",
            hex::encode(hasher.finalize()),
            INDEX_SUFFIX
        ))
    }

    fn write_index(&self, name: &str, version: &str, hash: &[u8]) -> Result<(), StoreError> {
        let mut map = BTreeMap::new();
        map.insert(key("name"), text(name));
        map.insert(key("version"), text(version));
        map.insert(key("hash"), bytes(hash));
        let encoded = encode(Value::Map(map)).map_err(|err| {
            StoreError::storage("failed to encode index record", Box::new(err))
        })?;

        fs::write(self.index_path(name, version), encoded).map_err(|err| {
            StoreError::storage(
                &format!("failed to write index for {}:{}", name, version),
                Box::new(err),
            )
        })
    }

    fn read_index(&self, path: &Path) -> Result<InstalledChaincode, StoreError> {
        let raw = fs::read(path).map_err(|err| {
            StoreError::storage(
                &format!("failed to read index {}", path.display()),
                Box::new(err),
            )
        })?;
        let mut map = decode_map(&raw, "index record").map_err(|err| {
            StoreError::storage(
                &format!("failed to decode index {}", path.display()),
                Box::new(err),
            )
        })?;

        let name = take_text(&mut map, "name")
            .map_err(|err| StoreError::storage("corrupt index record", Box::new(err)))?;
        let version = take_text(&mut map, "version")
            .map_err(|err| StoreError::storage("corrupt index record", Box::new(err)))?;
        let id = take_bytes(&mut map, "hash")
            .map_err(|err| StoreError::storage("corrupt index record", Box::new(err)))?;

        Ok(InstalledChaincode { name, version, id })
    }

    fn read_all_indices(&self) -> Result<Vec<InstalledChaincode>, StoreError> {
        let entries = fs::read_dir(&self.path).map_err(|err| {
            StoreError::storage(
                &format!("failed to read store directory {}", self.path.display()),
                Box::new(err),
            )
        })?;

        let mut installed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                StoreError::storage("failed to read store directory entry", Box::new(err))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(INDEX_SUFFIX) {
                installed.push(self.read_index(&path)?);
            }
        }
        installed.sort();
        Ok(installed)
    }
}

impl ChaincodeStore for DirectoryStore {
    fn save(&self, name: &str, version: &str, package: &[u8]) -> Result<Vec<u8>, StoreError> {
        let hash = Sha256::digest(package).to_vec();

        let package_path = self.package_path(&hash);
        if !package_path.exists() {
            fs::write(&package_path, package).map_err(|err| {
                StoreError::storage(
                    &format!("failed to write package {}", package_path.display()),
                    Box::new(err),
                )
            })?;
        }

        self.write_index(name, version, &hash)?;
        Ok(hash)
    }

    fn retrieve_hash(&self, name: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.index_path(name, version);
        if !path.exists() {
            return Err(StoreError::NotFound(format!(
                "chaincode {}:{}",
                name, version
            )));
        }
        Ok(self.read_index(&path)?.id)
    }

    fn load(&self, hash: &[u8]) -> Result<(Vec<u8>, Vec<InstalledChaincode>), StoreError> {
        let path = self.package_path(hash);
        if !path.exists() {
            return Err(StoreError::NotFound(format!(
                "package {}",
                hex::encode(hash)
            )));
        }
        let package = fs::read(&path).map_err(|err| {
            StoreError::storage(
                &format!("failed to read package {}", path.display()),
                Box::new(err),
            )
        })?;

        let references = self
            .read_all_indices()?
            .into_iter()
            .filter(|installed| installed.id.as_slice() == hash)
            .collect();

        Ok((package, references))
    }

    fn list_installed_chaincodes(&self) -> Result<Vec<InstalledChaincode>, StoreError> {
        self.read_all_indices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Unable to create temp dir");
        let store = DirectoryStore::new(dir.path()).expect("Unable to open store");

        let hash = store
            .save("mycc", "1.0", b"package-bytes")
            .expect("Unable to save package");
        assert_eq!(Sha256::digest(b"package-bytes").to_vec(), hash);

        let (package, references) = store.load(&hash).expect("Unable to load package");
        assert_eq!(b"package-bytes".to_vec(), package);
        assert_eq!(
            vec![InstalledChaincode {
                name: "mycc".to_string(),
                version: "1.0".to_string(),
                id: hash.clone(),
            }],
            references
        );

        assert_eq!(
            hash,
            store
                .retrieve_hash("mycc", "1.0")
                .expect("Unable to retrieve hash")
        );
    }

    #[test]
    fn reopened_store_keeps_its_contents() {
        let dir = tempfile::tempdir().expect("Unable to create temp dir");

        let hash = {
            let store = DirectoryStore::new(dir.path()).expect("Unable to open store");
            store
                .save("mycc", "1.0", b"package-bytes")
                .expect("Unable to save package")
        };

        let reopened = DirectoryStore::new(dir.path()).expect("Unable to reopen store");
        let installed = reopened
            .list_installed_chaincodes()
            .expect("Unable to list installed chaincodes");
        assert_eq!(1, installed.len());
        assert_eq!(hash, installed[0].id);
    }

    #[test]
    fn names_with_path_characters_are_safe() {
        let dir = tempfile::tempdir().expect("Unable to create temp dir");
        let store = DirectoryStore::new(dir.path()).expect("Unable to open store");

        store
            .save("my/../cc", "1.0", b"bytes")
            .expect("Unable to save package with hostile name");
        assert!(store.retrieve_hash("my/../cc", "1.0").is_ok());
    }
}
