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

//! The decentralized chaincode definition lifecycle.
//!
//! Definitions are agreed on by sequence number.  Each organization approves
//! a definition at a sequence into its own implicit collection; committing
//! the definition at that sequence advances the public state by exactly one
//! and reports which organizations' approvals match the committed content.
//! Whether the resulting agreement satisfies the channel's lifecycle
//! endorsement policy is the caller's decision, not this module's.
//!
//! The public state layout, for a namespace `mycc` at sequence 1:
//!
//! ```text
//! namespaces/metadata/mycc              -> {datatype, field hashes}
//! namespaces/fields/mycc/Sequence       -> 1
//! namespaces/fields/mycc/EndorsementInfo -> {version, plugin, id, init_required}
//! namespaces/fields/mycc/ValidationInfo  -> {plugin, parameter}
//! namespaces/fields/mycc/Collections     -> {collection bundle}
//! ```
//!
//! Each org's approval is the same layout under the name `mycc#1` in the
//! org's implicit collection, holding `ChaincodeParameters` (no sequence
//! field; the sequence is embedded in the key).

pub mod error;
pub mod legacy;
pub mod serializer;

use std::sync::Arc;

use crate::protocol::definition::{ChaincodeDefinition, CollectionConfigPackage};
use crate::state::{RangeableState, ReadWritableState, ReadableState};
use crate::store::{ChaincodeStore, InstalledChaincode};

use error::{LifecycleError, PackageParseError, SerializerError};
use serializer::Serializer;

/// The prefix (or namespace) under which all lifecycle information is
/// stored in the DB.
pub const NAMESPACES: &str = "namespaces";

/// The datatype label of a committed chaincode definition.
pub const CHAINCODE_DEFINITION_TYPE: &str = "ChaincodeDefinition";

/// The datatype label exposed to callers for the chaincode namespace.
pub const FRIENDLY_CHAINCODE_DEFINITION_TYPE: &str = "Chaincode";

/// The ledger namespace holding the lifecycle's own public state.
pub const LIFECYCLE_NAMESPACE: &str = "_lifecycle";

/// The decoded contents of a chaincode install package.  Only the metadata
/// needed to launch a container is surfaced here; the full package format
/// belongs to the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodePackage {
    pub path: String,
    pub package_type: String,
}

/// Parses chaincode install packages.  Implemented outside this library.
pub trait PackageParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<ChaincodePackage, PackageParseError>;
}

/// Implements the lifecycle operations which are invoked by the lifecycle
/// system chaincode as well as internally by the peer.
pub struct Lifecycle {
    pub chaincode_store: Arc<dyn ChaincodeStore>,
    pub package_parser: Arc<dyn PackageParser>,
    pub serializer: Serializer,
    pub legacy_impl: Arc<dyn legacy::LegacyLifecycle>,
}

impl Lifecycle {
    pub fn new(
        chaincode_store: Arc<dyn ChaincodeStore>,
        package_parser: Arc<dyn PackageParser>,
        legacy_impl: Arc<dyn legacy::LegacyLifecycle>,
    ) -> Self {
        Lifecycle {
            chaincode_store,
            package_parser,
            serializer: Serializer::new(),
            legacy_impl,
        }
    }

    /// Adds a chaincode definition entry into the passed-in org state.  The
    /// definition must be for either the currently defined sequence number
    /// or the next sequence number.  If the definition is for the current
    /// sequence number it must match the committed definition field for
    /// field, or it is rejected.
    ///
    /// Re-approving an identical definition at the current sequence is
    /// idempotent.
    pub fn approve_chaincode_definition_for_org(
        &self,
        name: &str,
        definition: &ChaincodeDefinition,
        public_state: &dyn ReadableState,
        org_state: &dyn ReadWritableState,
    ) -> Result<(), LifecycleError> {
        let current_sequence = self
            .serializer
            .deserialize_field_as_i64(NAMESPACES, name, "Sequence", public_state)
            .map_err(|err| serializer_err("could not get current sequence", err))?;

        let requested_sequence = definition.sequence;

        if current_sequence == requested_sequence && requested_sequence == 0 {
            return Err(LifecycleError::ApproveSequenceZero);
        }

        if requested_sequence < current_sequence {
            return Err(LifecycleError::ApproveSequenceBehind {
                current: current_sequence,
                requested: requested_sequence,
            });
        }

        if requested_sequence > current_sequence + 1 {
            return Err(LifecycleError::ApproveSequenceAhead {
                requested: requested_sequence,
                next: current_sequence + 1,
            });
        }

        if requested_sequence == current_sequence {
            let metadata = self
                .serializer
                .deserialize_metadata(NAMESPACES, name, public_state)
                .map_err(|err| {
                    serializer_err("could not fetch metadata for current definition", err)
                })?
                .ok_or(LifecycleError::MissingCommittedMetadata {
                    sequence: current_sequence,
                })?;

            let defined: ChaincodeDefinition = self
                .serializer
                .deserialize(NAMESPACES, name, &metadata, public_state)
                .map_err(|err| {
                    serializer_err(
                        &format!("could not deserialize namespace {} as chaincode", name),
                        err,
                    )
                })?;

            self.check_matches_committed(name, current_sequence, &defined, definition)?;
        }

        let private_name = format!("{}#{}", name, requested_sequence);
        self.serializer
            .serialize(NAMESPACES, &private_name, &definition.parameters(), org_state)
            .map_err(|err| {
                serializer_err("could not serialize chaincode parameters to state", err)
            })?;

        Ok(())
    }

    /// Takes a chaincode definition, checks that its sequence number is the
    /// next allowable sequence number, checks which organizations' approvals
    /// agree with it, and applies the definition to the public world state.
    ///
    /// The returned vector holds one entry per org state, true where the
    /// org's approval matches the committed content.  A read error against a
    /// single org's state records disagreement for that org rather than
    /// failing the commit; it is the caller's responsibility to decide
    /// whether the agreement satisfies the channel's lifecycle endorsement
    /// policy.
    pub fn commit_chaincode_definition(
        &self,
        name: &str,
        definition: &ChaincodeDefinition,
        public_state: &dyn ReadWritableState,
        org_states: &[&dyn ReadableState],
    ) -> Result<Vec<bool>, LifecycleError> {
        let current_sequence = self
            .serializer
            .deserialize_field_as_i64(NAMESPACES, name, "Sequence", public_state)
            .map_err(|err| serializer_err("could not get current sequence", err))?;

        if definition.sequence != current_sequence + 1 {
            return Err(LifecycleError::CommitSequenceMismatch {
                requested: definition.sequence,
                next: current_sequence + 1,
            });
        }

        let private_name = format!("{}#{}", name, definition.sequence);
        let parameters = definition.parameters();
        let agreement = org_states
            .iter()
            .map(|org_state| {
                matches!(
                    self.serializer
                        .is_serialized(NAMESPACES, &private_name, &parameters, *org_state),
                    Ok(true)
                )
            })
            .collect();

        self.serializer
            .serialize(NAMESPACES, name, definition, public_state)
            .map_err(|err| serializer_err("could not serialize chaincode definition", err))?;

        Ok(agreement)
    }

    /// Returns the committed definition for `name`, or an error if the
    /// namespace is not defined.
    pub fn query_chaincode_definition(
        &self,
        name: &str,
        public_state: &dyn ReadableState,
    ) -> Result<ChaincodeDefinition, LifecycleError> {
        let metadata = self
            .serializer
            .deserialize_metadata(NAMESPACES, name, public_state)
            .map_err(|err| {
                serializer_err(&format!("could not fetch metadata for namespace {}", name), err)
            })?
            .ok_or_else(|| LifecycleError::NamespaceNotDefined(name.to_string()))?;

        self.serializer
            .deserialize(NAMESPACES, name, &metadata, public_state)
            .map_err(|err| {
                serializer_err(
                    &format!("could not deserialize namespace {} as chaincode", name),
                    err,
                )
            })
    }

    /// Lists the publicly defined namespaces in a channel, mapping each
    /// entry's stored datatype to its user-facing label.  Unknown datatypes
    /// are returned verbatim rather than rejected.
    pub fn query_namespace_definitions(
        &self,
        public_state: &dyn RangeableState,
    ) -> Result<Vec<(String, String)>, LifecycleError> {
        let metadatas = self
            .serializer
            .deserialize_all_metadata(NAMESPACES, public_state)
            .map_err(|err| serializer_err("could not query namespace metadata", err))?;

        Ok(metadatas
            .into_iter()
            .map(|(name, metadata)| {
                let datatype = match metadata.datatype.as_str() {
                    CHAINCODE_DEFINITION_TYPE => FRIENDLY_CHAINCODE_DEFINITION_TYPE.to_string(),
                    other => other.to_string(),
                };
                (name, datatype)
            })
            .collect())
    }

    /// Installs a chaincode package to the peer's chaincode store and
    /// returns the hash it may be referenced by.  The package is parsed
    /// before anything is written, so a malformed package is rejected
    /// without touching the store.
    pub fn install_chaincode(
        &self,
        name: &str,
        version: &str,
        package: &[u8],
    ) -> Result<Vec<u8>, LifecycleError> {
        self.package_parser
            .parse(package)
            .map_err(LifecycleError::PackageParse)?;

        self.chaincode_store
            .save(name, version, package)
            .map_err(|err| store_err("could not save cc install package", err))
    }

    /// Returns the hash of an installed chaincode of a given name and
    /// version.
    pub fn query_installed_chaincode(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, LifecycleError> {
        self.chaincode_store.retrieve_hash(name, version).map_err(|err| {
            store_err(
                &format!("could not retrieve hash for chaincode '{}:{}'", name, version),
                err,
            )
        })
    }

    /// Returns the chaincodes installed in the peer's chaincode store.
    pub fn query_installed_chaincodes(&self) -> Result<Vec<InstalledChaincode>, LifecycleError> {
        self.chaincode_store
            .list_installed_chaincodes()
            .map_err(|err| store_err("could not list installed chaincodes", err))
    }

    fn check_matches_committed(
        &self,
        name: &str,
        sequence: i64,
        defined: &ChaincodeDefinition,
        requested: &ChaincodeDefinition,
    ) -> Result<(), LifecycleError> {
        let mismatch = |detail: String| LifecycleError::CurrentDefinitionMismatch {
            sequence,
            namespace: name.to_string(),
            detail,
        };

        if defined.endorsement_info.version != requested.endorsement_info.version {
            return Err(mismatch(format!(
                "Version '{}' != '{}'",
                defined.endorsement_info.version, requested.endorsement_info.version
            )));
        }
        if defined.endorsement_info.endorsement_plugin
            != requested.endorsement_info.endorsement_plugin
        {
            return Err(mismatch(format!(
                "EndorsementPlugin '{}' != '{}'",
                defined.endorsement_info.endorsement_plugin,
                requested.endorsement_info.endorsement_plugin
            )));
        }
        if defined.validation_info.validation_plugin
            != requested.validation_info.validation_plugin
        {
            return Err(mismatch(format!(
                "ValidationPlugin '{}' != '{}'",
                defined.validation_info.validation_plugin,
                requested.validation_info.validation_plugin
            )));
        }
        if defined.validation_info.validation_parameter
            != requested.validation_info.validation_parameter
        {
            return Err(mismatch(format!(
                "ValidationParameter '{}' != '{}'",
                hex::encode(&defined.validation_info.validation_parameter),
                hex::encode(&requested.validation_info.validation_parameter)
            )));
        }
        if defined.endorsement_info.id != requested.endorsement_info.id {
            return Err(mismatch(format!(
                "Hash '{}' != '{}'",
                hex::encode(&defined.endorsement_info.id),
                hex::encode(&requested.endorsement_info.id)
            )));
        }
        if !collections_equal(&defined.collections, &requested.collections) {
            return Err(mismatch("Collections do not match".to_string()));
        }

        Ok(())
    }
}

/// An absent collection bundle and an empty one describe the same
/// definition; everything else compares structurally.
fn collections_equal(
    left: &Option<CollectionConfigPackage>,
    right: &Option<CollectionConfigPackage>,
) -> bool {
    let is_empty = |collections: &Option<CollectionConfigPackage>| match collections {
        None => true,
        Some(package) => package.collections.is_empty(),
    };

    match (left, right) {
        (Some(left), Some(right)) => left == right,
        (None, None) => true,
        _ => is_empty(left) && is_empty(right),
    }
}

fn serializer_err(context: &str, source: SerializerError) -> LifecycleError {
    LifecycleError::Serializer {
        context: context.to_string(),
        source,
    }
}

fn store_err(context: &str, source: crate::store::error::StoreError) -> LifecycleError {
    LifecycleError::Store {
        context: context.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::protocol::definition::{
        ChaincodeEndorsementInfo, ChaincodeValidationInfo, CollectionConfig,
    };
    use crate::state::hashmap::HashMapState;
    use crate::store::memory::MemoryStore;

    use super::legacy::LegacyDefinition;

    struct PassthroughParser;

    impl PackageParser for PassthroughParser {
        fn parse(&self, data: &[u8]) -> Result<ChaincodePackage, PackageParseError> {
            if data.is_empty() {
                return Err(PackageParseError("package is empty".to_string()));
            }
            Ok(ChaincodePackage {
                path: "github.com/example/cc".to_string(),
                package_type: "GOLANG".to_string(),
            })
        }
    }

    struct NoLegacy;

    impl legacy::LegacyLifecycle for NoLegacy {
        fn chaincode_definition(
            &self,
            name: &str,
            _qe: &dyn crate::state::QueryExecutor,
        ) -> Result<LegacyDefinition, LifecycleError> {
            Err(LifecycleError::NamespaceNotDefined(name.to_string()))
        }

        fn chaincode_container_info(
            &self,
            name: &str,
            _qe: &dyn crate::state::QueryExecutor,
        ) -> Result<crate::runtime::ChaincodeContainerInfo, LifecycleError> {
            Err(LifecycleError::NamespaceNotDefined(name.to_string()))
        }
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(
            Arc::new(MemoryStore::new()),
            Arc::new(PassthroughParser),
            Arc::new(NoLegacy),
        )
    }

    fn definition(sequence: i64) -> ChaincodeDefinition {
        ChaincodeDefinition {
            sequence,
            endorsement_info: ChaincodeEndorsementInfo {
                version: "1.0".to_string(),
                endorsement_plugin: "builtin".to_string(),
                id: vec![0x2a; 32],
                init_required: true,
            },
            validation_info: ChaincodeValidationInfo {
                validation_plugin: "builtin".to_string(),
                validation_parameter: b"policy".to_vec(),
            },
            collections: None,
        }
    }

    #[test]
    fn approve_then_commit_advances_sequence() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org1 = HashMapState::new();
        let org2 = HashMapState::new();

        let defn = definition(1);
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org1)
            .expect("Org1 approval should succeed");
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org2)
            .expect("Org2 approval should succeed");

        let agreement = lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org1, &org2])
            .expect("Commit should succeed");
        assert_eq!(vec![true, true], agreement);

        let committed = lifecycle
            .query_chaincode_definition("mycc", &public)
            .expect("Query should find committed definition");
        assert_eq!(defn, committed);
    }

    #[test]
    fn commit_rejects_wrong_sequence() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org = HashMapState::new();

        let defn = definition(1);
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org)
            .expect("Approval should succeed");
        lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org])
            .expect("Commit should succeed");

        let skipping = definition(3);
        let err = lifecycle
            .commit_chaincode_definition("mycc", &skipping, &public, &[&org])
            .expect_err("Sequence 3 must not commit after sequence 1");
        assert_eq!(
            "requested sequence is 3, but new definition must be sequence 2",
            err.to_string()
        );
    }

    #[test]
    fn approve_sequence_bounds() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org = HashMapState::new();

        let err = lifecycle
            .approve_chaincode_definition_for_org("mycc", &definition(0), &public, &org)
            .expect_err("Sequence 0 is not definable");
        assert_eq!(
            "requested sequence is 0, but first definable sequence number is 1",
            err.to_string()
        );

        let err = lifecycle
            .approve_chaincode_definition_for_org("mycc", &definition(2), &public, &org)
            .expect_err("Sequence 2 is past the next available sequence");
        assert_eq!(
            "requested sequence 2 is larger than the next available sequence number 1",
            err.to_string()
        );
    }

    #[test]
    fn reapprove_at_current_requires_field_equality() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org1 = HashMapState::new();
        let org3 = HashMapState::new();

        let defn = definition(1);
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org1)
            .expect("Approval should succeed");
        lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org1])
            .expect("Commit should succeed");

        // a late agreeing org may still approve the current sequence
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org3)
            .expect("Matching approval at the current sequence is accepted");

        let mut divergent = definition(1);
        divergent.endorsement_info.endorsement_plugin = "other".to_string();
        let err = lifecycle
            .approve_chaincode_definition_for_org("mycc", &divergent, &public, &org3)
            .expect_err("Divergent approval at the current sequence is rejected");
        assert_eq!(
            "attempted to define the current sequence (1) for namespace mycc, \
             but EndorsementPlugin 'builtin' != 'other'",
            err.to_string()
        );
    }

    #[test]
    fn reapprove_treats_absent_and_empty_collections_as_equal() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org = HashMapState::new();

        let mut defn = definition(1);
        defn.collections = Some(CollectionConfigPackage::default());
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org)
            .expect("Approval should succeed");
        lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org])
            .expect("Commit should succeed");

        let mut absent = definition(1);
        absent.collections = None;
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &absent, &public, &org)
            .expect("An absent bundle matches a committed empty bundle");

        let mut named = definition(1);
        named.collections = Some(CollectionConfigPackage {
            collections: vec![CollectionConfig {
                name: "secrets".to_string(),
                member_orgs_policy: b"orgs".to_vec(),
            }],
        });
        let err = lifecycle
            .approve_chaincode_definition_for_org("mycc", &named, &public, &org)
            .expect_err("A non-empty bundle does not match");
        assert_eq!(
            "attempted to define the current sequence (1) for namespace mycc, \
             but Collections do not match",
            err.to_string()
        );
    }

    #[test]
    fn commit_counts_unreadable_org_as_disagreement() {
        struct FailingState;

        impl ReadableState for FailingState {
            fn get_state(
                &self,
                _key: &str,
            ) -> Result<Option<Vec<u8>>, crate::state::StateReadError> {
                Err(crate::state::StateReadError::InvalidKey(
                    "unavailable".to_string(),
                ))
            }
        }

        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org = HashMapState::new();

        let defn = definition(1);
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org)
            .expect("Approval should succeed");

        let agreement = lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org, &FailingState])
            .expect("Commit proceeds despite a failing org state");
        assert_eq!(vec![true, false], agreement);
    }

    #[test]
    fn install_rejects_malformed_package_before_save() {
        let lifecycle = lifecycle();

        lifecycle
            .install_chaincode("mycc", "1.0", b"")
            .expect_err("An empty package must not install");
        assert!(lifecycle
            .query_installed_chaincodes()
            .expect("Listing should succeed")
            .is_empty());

        let hash = lifecycle
            .install_chaincode("mycc", "1.0", b"package-bytes")
            .expect("A well formed package installs");
        assert_eq!(
            hash,
            lifecycle
                .query_installed_chaincode("mycc", "1.0")
                .expect("Installed chaincode should be queryable")
        );
    }

    #[test]
    fn namespace_definitions_use_friendly_datatype() {
        let lifecycle = lifecycle();
        let public = HashMapState::new();
        let org = HashMapState::new();

        let defn = definition(1);
        lifecycle
            .approve_chaincode_definition_for_org("mycc", &defn, &public, &org)
            .expect("Approval should succeed");
        lifecycle
            .commit_chaincode_definition("mycc", &defn, &public, &[&org])
            .expect("Commit should succeed");

        let definitions = lifecycle
            .query_namespace_definitions(&public)
            .expect("Namespace query should succeed");
        assert_eq!(
            vec![("mycc".to_string(), "Chaincode".to_string())],
            definitions
        );
    }
}
