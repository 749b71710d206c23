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

//! Content-addressed persistence of chaincode install packages.
//!
//! Packages are addressed by the SHA-256 hash of their bytes; name and
//! version are secondary indices onto the same content.  Installing the same
//! bytes twice stores them once.

pub mod directory;
pub mod error;
pub mod memory;

pub use directory::DirectoryStore;
pub use error::StoreError;
pub use memory::MemoryStore;

/// A name and version installed in the store, along with the content hash
/// the pair resolves to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstalledChaincode {
    pub name: String,
    pub version: String,
    pub id: Vec<u8>,
}

/// Durable persistence for chaincode install packages.
pub trait ChaincodeStore: Send + Sync {
    /// Persists a package and indexes it under `name` and `version`.
    /// Returns the content hash the package is addressed by.
    fn save(&self, name: &str, version: &str, package: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Returns the content hash indexed under `name` and `version`.
    fn retrieve_hash(&self, name: &str, version: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns the package bytes addressed by `hash`, along with every
    /// name/version pair indexed to it.
    fn load(&self, hash: &[u8]) -> Result<(Vec<u8>, Vec<InstalledChaincode>), StoreError>;

    /// Returns every name/version pair installed in the store.
    fn list_installed_chaincodes(&self) -> Result<Vec<InstalledChaincode>, StoreError>;
}
