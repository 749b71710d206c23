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

//! The two-stage resolver bridging the sequence-numbered definition store
//! and pre-lifecycle deployments.
//!
//! Both resolution paths consult the new definition store first; only when a
//! namespace has no metadata there do they delegate to the legacy
//! implementation.  Legacy logic is never folded into the new path.

use crate::protocol::definition::ChaincodeDefinition;
use crate::runtime::ChaincodeContainerInfo;
use crate::state::{QueryExecutor, ReadableState, StateReadError};

use super::error::{LifecycleError, SerializerError};
use super::{Lifecycle, CHAINCODE_DEFINITION_TYPE, LIFECYCLE_NAMESPACE, NAMESPACES};

/// The resolved details of a chaincode, in the shape pre-lifecycle
/// consumers expect.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyDefinition {
    pub name: String,
    pub version: String,
    /// The content hash of the backing code package.
    pub hash: Vec<u8>,
    pub endorsement_plugin: String,
    pub validation_plugin: String,
    pub validation_parameter: Vec<u8>,
    pub requires_init: bool,
}

/// The pre-lifecycle definition source.  Implemented outside this library;
/// consulted only when the new definition store has no entry for a
/// namespace.
pub trait LegacyLifecycle: Send + Sync {
    fn chaincode_definition(
        &self,
        name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<LegacyDefinition, LifecycleError>;

    fn chaincode_container_info(
        &self,
        name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<ChaincodeContainerInfo, LifecycleError>;
}

/// Adapts a namespace-scoped `QueryExecutor` to the flat-key `ReadableState`
/// the serializer expects, by pinning the ledger namespace.
pub struct SimpleQueryExecutorState<'a> {
    pub namespace: &'a str,
    pub executor: &'a dyn QueryExecutor,
}

impl<'a> ReadableState for SimpleQueryExecutorState<'a> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StateReadError> {
        self.executor.get_state(self.namespace, key)
    }
}

impl Lifecycle {
    /// Returns the details for a chaincode by name, falling back to the
    /// legacy implementation when the namespace is not in the definition
    /// store.
    pub fn resolve_chaincode_definition(
        &self,
        name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<LegacyDefinition, LifecycleError> {
        let state = SimpleQueryExecutorState {
            namespace: LIFECYCLE_NAMESPACE,
            executor: qe,
        };

        let metadata = self
            .serializer
            .deserialize_metadata(NAMESPACES, name, &state)
            .map_err(|err| {
                serializer_err(
                    &format!("could not get definition for chaincode {}", name),
                    err,
                )
            })?;

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => return self.legacy_impl.chaincode_definition(name, qe),
        };

        let defined: ChaincodeDefinition = self
            .serializer
            .deserialize(NAMESPACES, name, &metadata, &state)
            .map_err(|err| {
                serializer_err(
                    &format!("could not deserialize namespace {} as chaincode", name),
                    err,
                )
            })?;

        Ok(LegacyDefinition {
            name: name.to_string(),
            version: defined.endorsement_info.version,
            hash: defined.endorsement_info.id,
            endorsement_plugin: defined.endorsement_info.endorsement_plugin,
            validation_plugin: defined.validation_info.validation_plugin,
            validation_parameter: defined.validation_info.validation_parameter,
            requires_init: defined.endorsement_info.init_required,
        })
    }

    /// Returns the information necessary to launch a chaincode, falling
    /// back to the legacy implementation when the namespace is not in the
    /// definition store.
    ///
    /// The package bytes are re-read and re-parsed on every call.  A cache
    /// keyed on (name, version, package id) would avoid that, but its
    /// invalidation story is not settled, so none is kept here.
    pub fn resolve_chaincode_container_info(
        &self,
        name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<ChaincodeContainerInfo, LifecycleError> {
        let state = SimpleQueryExecutorState {
            namespace: LIFECYCLE_NAMESPACE,
            executor: qe,
        };

        let metadata = self
            .serializer
            .deserialize_metadata(NAMESPACES, name, &state)
            .map_err(|err| {
                serializer_err(
                    &format!("could not deserialize metadata for chaincode {}", name),
                    err,
                )
            })?;

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => return self.legacy_impl.chaincode_container_info(name, qe),
        };

        if metadata.datatype != CHAINCODE_DEFINITION_TYPE {
            return Err(LifecycleError::NotChaincodeType(metadata.datatype));
        }

        let defined: ChaincodeDefinition = self
            .serializer
            .deserialize(NAMESPACES, name, &metadata, &state)
            .map_err(|err| {
                serializer_err(
                    &format!(
                        "could not deserialize chaincode definition for chaincode {}",
                        name
                    ),
                    err,
                )
            })?;

        let version = defined.endorsement_info.version;
        let package_id = defined.endorsement_info.id;

        let (package_bytes, _) = self.chaincode_store.load(&package_id).map_err(|err| {
            LifecycleError::Store {
                context: format!(
                    "could not load chaincode from chaincode store for {}:{} ({})",
                    name,
                    version,
                    hex::encode(&package_id)
                ),
                source: err,
            }
        })?;

        let package = self.package_parser.parse(&package_bytes).map_err(|err| {
            LifecycleError::PackageParse(super::error::PackageParseError(format!(
                "could not parse chaincode package for {}:{} ({}): {}",
                name,
                version,
                hex::encode(&package_id),
                err
            )))
        })?;

        Ok(ChaincodeContainerInfo {
            name: name.to_string(),
            version,
            package_id,
            path: package.path,
            container_type: package.package_type,
        })
    }
}

fn serializer_err(context: &str, source: SerializerError) -> LifecycleError {
    LifecycleError::Serializer {
        context: context.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::lifecycle::error::PackageParseError;
    use crate::lifecycle::{ChaincodePackage, PackageParser};
    use crate::protocol::definition::{ChaincodeEndorsementInfo, ChaincodeValidationInfo};
    use crate::state::hashmap::HashMapState;
    use crate::state::{ReadWritableState, StateIterator};
    use crate::store::memory::MemoryStore;
    use crate::store::ChaincodeStore;

    struct FixedParser;

    impl PackageParser for FixedParser {
        fn parse(&self, _data: &[u8]) -> Result<ChaincodePackage, PackageParseError> {
            Ok(ChaincodePackage {
                path: "github.com/example/cc".to_string(),
                package_type: "GOLANG".to_string(),
            })
        }
    }

    /// Answers from the legacy store and records nothing else.
    struct StubLegacy;

    impl LegacyLifecycle for StubLegacy {
        fn chaincode_definition(
            &self,
            name: &str,
            _qe: &dyn QueryExecutor,
        ) -> Result<LegacyDefinition, LifecycleError> {
            Ok(LegacyDefinition {
                name: name.to_string(),
                version: "legacy".to_string(),
                hash: vec![0xee; 32],
                endorsement_plugin: "escc".to_string(),
                validation_plugin: "vscc".to_string(),
                validation_parameter: vec![],
                requires_init: false,
            })
        }

        fn chaincode_container_info(
            &self,
            name: &str,
            _qe: &dyn QueryExecutor,
        ) -> Result<ChaincodeContainerInfo, LifecycleError> {
            Ok(ChaincodeContainerInfo {
                name: name.to_string(),
                version: "legacy".to_string(),
                package_id: vec![0xee; 32],
                path: "legacy/path".to_string(),
                container_type: "DOCKER".to_string(),
            })
        }
    }

    /// A query executor over a `HashMapState`, keyed `namespace` then `key`.
    struct MapQueryExecutor {
        state: HashMapState,
    }

    impl QueryExecutor for MapQueryExecutor {
        fn get_state(
            &self,
            namespace: &str,
            key: &str,
        ) -> Result<Option<Vec<u8>>, StateReadError> {
            crate::state::ReadableState::get_state(
                &self.state,
                &format!("{}\u{0}{}", namespace, key),
            )
        }

        fn get_state_range(
            &self,
            _namespace: &str,
            _start: &str,
            _end: &str,
        ) -> Result<Box<dyn StateIterator>, StateReadError> {
            Err(StateReadError::InvalidKey("ranges not supported".into()))
        }
    }

    fn lifecycle(store: Arc<MemoryStore>) -> Lifecycle {
        Lifecycle::new(store, Arc::new(FixedParser), Arc::new(StubLegacy))
    }

    #[test]
    fn undefined_namespace_falls_back_to_legacy() {
        let lifecycle = lifecycle(Arc::new(MemoryStore::new()));
        let qe = MapQueryExecutor {
            state: HashMapState::new(),
        };

        let resolved = lifecycle
            .resolve_chaincode_definition("oldcc", &qe)
            .expect("Legacy resolution should succeed");
        assert_eq!("legacy", &resolved.version);

        let ccci = lifecycle
            .resolve_chaincode_container_info("oldcc", &qe)
            .expect("Legacy container info should succeed");
        assert_eq!("legacy/path", &ccci.path);
    }

    #[test]
    fn defined_namespace_is_resolved_from_the_definition_store() {
        let store = Arc::new(MemoryStore::new());
        let package_id = store
            .save("mycc", "1.0", b"package-bytes")
            .expect("Unable to save package");

        let lifecycle = lifecycle(store);

        // serialize a definition into the _lifecycle namespace the way a
        // commit would
        let backing = HashMapState::new();
        let definition = ChaincodeDefinition {
            sequence: 1,
            endorsement_info: ChaincodeEndorsementInfo {
                version: "1.0".to_string(),
                endorsement_plugin: "builtin".to_string(),
                id: package_id.clone(),
                init_required: true,
            },
            validation_info: ChaincodeValidationInfo {
                validation_plugin: "builtin".to_string(),
                validation_parameter: b"policy".to_vec(),
            },
            collections: None,
        };

        let shim_writer = NamespacedWriter {
            namespace: LIFECYCLE_NAMESPACE,
            state: &backing,
        };
        lifecycle
            .serializer
            .serialize(NAMESPACES, "mycc", &definition, &shim_writer)
            .expect("Unable to serialize definition");

        let qe = MapQueryExecutor { state: backing };

        let resolved = lifecycle
            .resolve_chaincode_definition("mycc", &qe)
            .expect("Definition resolution should succeed");
        assert_eq!("1.0", &resolved.version);
        assert_eq!(package_id, resolved.hash);
        assert!(resolved.requires_init);

        let ccci = lifecycle
            .resolve_chaincode_container_info("mycc", &qe)
            .expect("Container info resolution should succeed");
        assert_eq!("mycc:1.0", ccci.cname());
        assert_eq!(package_id, ccci.package_id);
        assert_eq!("GOLANG", &ccci.container_type);
    }

    /// Writes through to a `HashMapState` with the same namespaced keys the
    /// `MapQueryExecutor` reads.
    struct NamespacedWriter<'a> {
        namespace: &'a str,
        state: &'a HashMapState,
    }

    impl<'a> ReadableState for NamespacedWriter<'a> {
        fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StateReadError> {
            crate::state::ReadableState::get_state(
                self.state,
                &format!("{}\u{0}{}", self.namespace, key),
            )
        }
    }

    impl<'a> ReadWritableState for NamespacedWriter<'a> {
        fn put_state(
            &self,
            key: &str,
            value: Vec<u8>,
        ) -> Result<(), crate::state::StateWriteError> {
            self.state
                .put_state(&format!("{}\u{0}{}", self.namespace, key), value)
        }

        fn del_state(&self, key: &str) -> Result<(), crate::state::StateWriteError> {
            self.state
                .del_state(&format!("{}\u{0}{}", self.namespace, key))
        }
    }
}
