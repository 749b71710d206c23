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

//! An in-memory chaincode store for tests and dev mode.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use super::error::StoreError;
use super::{ChaincodeStore, InstalledChaincode};

#[derive(Default)]
struct MemoryStoreState {
    packages: BTreeMap<Vec<u8>, Vec<u8>>,
    index: BTreeMap<(String, String), Vec<u8>>,
}

/// A `ChaincodeStore` held entirely in memory.  Not durable; it exists for
/// tests and for dev-mode peers whose chaincodes are run out-of-band.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl ChaincodeStore for MemoryStore {
    fn save(&self, name: &str, version: &str, package: &[u8]) -> Result<Vec<u8>, StoreError> {
        let hash = Sha256::digest(package).to_vec();
        let mut state = self.state.lock().expect("MemoryStore mutex is poisoned");
        state
            .packages
            .entry(hash.clone())
            .or_insert_with(|| package.to_vec());
        state
            .index
            .insert((name.to_string(), version.to_string()), hash.clone());
        Ok(hash)
    }

    fn retrieve_hash(&self, name: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        self.state
            .lock()
            .expect("MemoryStore mutex is poisoned")
            .index
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("chaincode {}:{}", name, version)))
    }

    fn load(&self, hash: &[u8]) -> Result<(Vec<u8>, Vec<InstalledChaincode>), StoreError> {
        let state = self.state.lock().expect("MemoryStore mutex is poisoned");
        let package = state
            .packages
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("package {}", hex::encode(hash))))?;

        let references = state
            .index
            .iter()
            .filter(|(_, indexed)| indexed.as_slice() == hash)
            .map(|((name, version), indexed)| InstalledChaincode {
                name: name.clone(),
                version: version.clone(),
                id: indexed.clone(),
            })
            .collect();

        Ok((package, references))
    }

    fn list_installed_chaincodes(&self) -> Result<Vec<InstalledChaincode>, StoreError> {
        Ok(self
            .state
            .lock()
            .expect("MemoryStore mutex is poisoned")
            .index
            .iter()
            .map(|((name, version), hash)| InstalledChaincode {
                name: name.clone(),
                version: version.clone(),
                id: hash.clone(),
            })
            .collect())
    }
}
