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

//! Capability traits over the ledger's world state.
//!
//! State access is split into three capability sets: `ReadableState` for
//! point reads, `ReadWritableState` for mutation, and `RangeableState` for
//! prefix iteration.  The public channel state implements all three; each
//! organization's implicit private collection is accessed as a separate
//! state, and nothing in this library crosses collections except through
//! these interfaces.
//!
//! The per-invocation ledger interfaces (`QueryExecutor` and `TxSimulator`)
//! are also defined here.  Their implementations belong to the ledger; this
//! library only consumes them.

pub mod error;
pub mod hashmap;

use sha2::{Digest, Sha256};

pub use crate::state::error::{StateReadError, StateWriteError};

/// A state that supports point reads.
///
/// `get_state_hash` exists so that a caller may compare values held in a
/// private collection without learning them; implementations backed by
/// private data should return the stored hash rather than hashing a value
/// they may not possess.
///
/// Implementations shared across threads are expected to be internally
/// synchronized.
pub trait ReadableState {
    /// Returns the value stored under `key`, or `None` if the key is unset.
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StateReadError>;

    /// Returns the SHA-256 hash of the value stored under `key`, or `None`
    /// if the key is unset.
    fn get_state_hash(&self, key: &str) -> Result<Option<Vec<u8>>, StateReadError> {
        Ok(self
            .get_state(key)?
            .map(|value| Sha256::digest(&value).to_vec()))
    }
}

/// A state that supports point reads and writes.
pub trait ReadWritableState: ReadableState {
    /// Stores `value` under `key`, replacing any previous value.
    fn put_state(&self, key: &str, value: Vec<u8>) -> Result<(), StateWriteError>;

    /// Removes the value stored under `key`.  Deleting an unset key is not
    /// an error.
    fn del_state(&self, key: &str) -> Result<(), StateWriteError>;
}

/// A state that supports iteration over a key prefix.
pub trait RangeableState: ReadableState {
    /// Returns all entries whose keys begin with `prefix`, in ascending key
    /// order.
    fn get_state_range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StateReadError>;
}

/// A single entry produced by a state iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// An iterator over a result set produced by a range or rich query.
///
/// Result sets may be large; iterators are consumed a chunk at a time and
/// released by dropping them.
pub trait StateIterator: Send {
    fn next(&mut self) -> Result<Option<StateEntry>, StateReadError>;
}

/// Read-only, per-invocation access to the ledger, scoped by namespace.
///
/// A `QueryExecutor` is handed to operations such as `Launch` which must
/// resolve chaincode definitions without simulating a transaction.
pub trait QueryExecutor {
    /// Returns the value stored under `key` in `namespace`.
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StateReadError>;

    /// Returns an iterator over `namespace` keys in `[start, end)`.  An
    /// empty `end` is unbounded.
    fn get_state_range(
        &self,
        namespace: &str,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateIterator>, StateReadError>;
}

/// Transactional read/write access to the ledger for a single in-flight
/// invocation.
///
/// All writes are buffered into the simulation's read/write set; nothing
/// reaches the ledger until the transaction is ordered and validated, which
/// is outside this library.
pub trait TxSimulator: QueryExecutor {
    fn set_state(
        &mut self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StateWriteError>;

    fn delete_state(&mut self, namespace: &str, key: &str) -> Result<(), StateWriteError>;

    fn get_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StateReadError>;

    fn set_private_data(
        &mut self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StateWriteError>;

    fn delete_private_data(
        &mut self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), StateWriteError>;

    fn get_private_data_range(
        &self,
        namespace: &str,
        collection: &str,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateIterator>, StateReadError>;

    /// Executes a rich query against the state database, if the backing
    /// store supports one.
    fn execute_query(
        &self,
        namespace: &str,
        query: &str,
    ) -> Result<Box<dyn StateIterator>, StateReadError>;

    /// Returns the modification history of `key`, keyed by transaction id.
    fn get_history_for_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Box<dyn StateIterator>, StateReadError>;
}
