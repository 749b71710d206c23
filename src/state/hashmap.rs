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

//! Provides a simple, in-memory state backed by `std::collections::BTreeMap`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::error::{StateReadError, StateWriteError};
use super::{RangeableState, ReadWritableState, ReadableState};

/// An in-memory implementation of the state capability traits.
///
/// `HashMapState` implements all three capability sets over a single ordered
/// map.  It stands in for the public channel state or for an org's implicit
/// collection in tests and in dev-mode tooling; it makes no attempt at
/// durability.
#[derive(Debug, Clone, Default)]
pub struct HashMapState {
    state: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl HashMapState {
    pub fn new() -> Self {
        Default::default()
    }
}

impl ReadableState for HashMapState {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StateReadError> {
        Ok(self
            .state
            .lock()
            .expect("HashMapState mutex is poisoned")
            .get(key)
            .cloned())
    }
}

impl ReadWritableState for HashMapState {
    fn put_state(&self, key: &str, value: Vec<u8>) -> Result<(), StateWriteError> {
        self.state
            .lock()
            .expect("HashMapState mutex is poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    fn del_state(&self, key: &str) -> Result<(), StateWriteError> {
        self.state
            .lock()
            .expect("HashMapState mutex is poisoned")
            .remove(key);
        Ok(())
    }
}

impl RangeableState for HashMapState {
    fn get_state_range(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StateReadError> {
        Ok(self
            .state
            .lock()
            .expect("HashMapState mutex is poisoned")
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sha2::{Digest, Sha256};

    #[test]
    fn put_get_delete() {
        let state = HashMapState::new();

        assert_eq!(None, state.get_state("a").unwrap());

        state
            .put_state("a", b"value_a".to_vec())
            .expect("Unable to put state");
        assert_eq!(Some(b"value_a".to_vec()), state.get_state("a").unwrap());

        state.del_state("a").expect("Unable to delete state");
        assert_eq!(None, state.get_state("a").unwrap());

        // deleting an unset key is not an error
        state.del_state("a").expect("Unable to delete unset key");
    }

    #[test]
    fn state_hash_matches_value_hash() {
        let state = HashMapState::new();
        state
            .put_state("a", b"value_a".to_vec())
            .expect("Unable to put state");

        let hash = state
            .get_state_hash("a")
            .unwrap()
            .expect("Hash should be present");
        assert_eq!(Sha256::digest(b"value_a").to_vec(), hash);

        assert_eq!(None, state.get_state_hash("unset").unwrap());
    }

    #[test]
    fn range_by_prefix() {
        let state = HashMapState::new();
        for key in &["ns/a", "ns/b", "ns/c", "other/a"] {
            state
                .put_state(key, key.as_bytes().to_vec())
                .expect("Unable to put state");
        }

        let entries = state
            .get_state_range("ns/")
            .expect("Unable to range over state");

        assert_eq!(
            vec!["ns/a".to_string(), "ns/b".to_string(), "ns/c".to_string()],
            entries.into_iter().map(|(key, _)| key).collect::<Vec<_>>()
        );
    }
}
