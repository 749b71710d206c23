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

//! End-to-end exercises of the definition lifecycle: install, per-org
//! approval, commit, and the sequence rules binding them together.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use chaincode::lifecycle::error::{LifecycleError, PackageParseError};
use chaincode::lifecycle::{ChaincodePackage, Lifecycle, PackageParser};
use chaincode::protocol::definition::{
    ChaincodeDefinition, ChaincodeEndorsementInfo, ChaincodeValidationInfo,
};
use chaincode::runtime::ChaincodeContainerInfo;
use chaincode::state::hashmap::HashMapState;
use chaincode::state::QueryExecutor;
use chaincode::store::MemoryStore;

struct AcceptingParser;

impl PackageParser for AcceptingParser {
    fn parse(&self, data: &[u8]) -> Result<ChaincodePackage, PackageParseError> {
        if data.is_empty() {
            return Err(PackageParseError("empty package".to_string()));
        }
        Ok(ChaincodePackage {
            path: "github.com/example/mycc".to_string(),
            package_type: "GOLANG".to_string(),
        })
    }
}

struct NoLegacy;

impl chaincode::lifecycle::legacy::LegacyLifecycle for NoLegacy {
    fn chaincode_definition(
        &self,
        name: &str,
        _qe: &dyn QueryExecutor,
    ) -> Result<chaincode::lifecycle::legacy::LegacyDefinition, LifecycleError> {
        Err(LifecycleError::NamespaceNotDefined(name.to_string()))
    }

    fn chaincode_container_info(
        &self,
        name: &str,
        _qe: &dyn QueryExecutor,
    ) -> Result<ChaincodeContainerInfo, LifecycleError> {
        Err(LifecycleError::NamespaceNotDefined(name.to_string()))
    }
}

fn lifecycle() -> Lifecycle {
    Lifecycle::new(
        Arc::new(MemoryStore::new()),
        Arc::new(AcceptingParser),
        Arc::new(NoLegacy),
    )
}

fn definition(sequence: i64, package_id: Vec<u8>) -> ChaincodeDefinition {
    ChaincodeDefinition {
        sequence,
        endorsement_info: ChaincodeEndorsementInfo {
            version: "1.0".to_string(),
            endorsement_plugin: "builtin".to_string(),
            id: package_id,
            init_required: true,
        },
        validation_info: ChaincodeValidationInfo {
            validation_plugin: "builtin".to_string(),
            validation_parameter: b"/Channel/Application/Endorsement".to_vec(),
        },
        collections: None,
    }
}

#[test]
fn happy_path_install_approve_commit_query() {
    let lifecycle = lifecycle();
    let public_state = HashMapState::new();
    let org1_state = HashMapState::new();
    let org2_state = HashMapState::new();

    let package = b"mycc-install-package".to_vec();
    let hash = lifecycle
        .install_chaincode("mycc", "1.0", &package)
        .expect("Install should succeed");
    assert_eq!(
        Sha256::digest(&package).to_vec(),
        hash,
        "the install hash is the content hash of the package"
    );

    let defn = definition(1, hash);

    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org1_state)
        .expect("Org1 approval should succeed");
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org2_state)
        .expect("Org2 approval should succeed");

    let agreement = lifecycle
        .commit_chaincode_definition("mycc", &defn, &public_state, &[&org1_state, &org2_state])
        .expect("Commit should succeed");
    assert_eq!(vec![true, true], agreement);

    let committed = lifecycle
        .query_chaincode_definition("mycc", &public_state)
        .expect("The committed definition should be queryable");
    assert_eq!(defn, committed);

    assert_eq!(
        vec![("mycc".to_string(), "Chaincode".to_string())],
        lifecycle
            .query_namespace_definitions(&public_state)
            .expect("Namespace definitions should be listable")
    );
}

#[test]
fn commit_rejects_a_skipped_sequence() {
    let lifecycle = lifecycle();
    let public_state = HashMapState::new();
    let org_state = HashMapState::new();

    let hash = lifecycle
        .install_chaincode("mycc", "1.0", b"mycc-install-package")
        .expect("Install should succeed");

    let defn = definition(1, hash.clone());
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org_state)
        .expect("Approval should succeed");
    lifecycle
        .commit_chaincode_definition("mycc", &defn, &public_state, &[&org_state])
        .expect("Commit at sequence 1 should succeed");

    let err = lifecycle
        .commit_chaincode_definition("mycc", &definition(3, hash), &public_state, &[&org_state])
        .expect_err("Commit at sequence 3 must fail after sequence 1");
    assert_eq!(
        "requested sequence is 3, but new definition must be sequence 2",
        err.to_string()
    );
}

#[test]
fn reapproval_with_divergent_parameters_is_rejected() {
    let lifecycle = lifecycle();
    let public_state = HashMapState::new();
    let org1_state = HashMapState::new();
    let org2_state = HashMapState::new();
    let org3_state = HashMapState::new();

    let hash = lifecycle
        .install_chaincode("mycc", "1.0", b"mycc-install-package")
        .expect("Install should succeed");

    let defn = definition(1, hash.clone());
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org1_state)
        .expect("Org1 approval should succeed");
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org2_state)
        .expect("Org2 approval should succeed");
    lifecycle
        .commit_chaincode_definition("mycc", &defn, &public_state, &[&org1_state, &org2_state])
        .expect("Commit should succeed");

    let mut divergent = definition(1, hash);
    divergent.endorsement_info.endorsement_plugin = "other".to_string();

    let err = lifecycle
        .approve_chaincode_definition_for_org("mycc", &divergent, &public_state, &org3_state)
        .expect_err("A divergent approval at the committed sequence must fail");
    assert_eq!(
        "attempted to define the current sequence (1) for namespace mycc, \
         but EndorsementPlugin 'builtin' != 'other'",
        err.to_string()
    );

    // the same org approving the committed parameters verbatim is fine,
    // and its agreement is visible on the next commit attempt
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org3_state)
        .expect("A matching late approval is accepted");
}

#[test]
fn approvals_track_sequences_independently_per_org() {
    let lifecycle = lifecycle();
    let public_state = HashMapState::new();
    let org1_state = HashMapState::new();
    let org2_state = HashMapState::new();

    let hash = lifecycle
        .install_chaincode("mycc", "1.0", b"mycc-install-package")
        .expect("Install should succeed");

    let defn = definition(1, hash.clone());
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn, &public_state, &org1_state)
        .expect("Org1 approval should succeed");

    // only org1 approved; org2's slot reports disagreement at commit
    let agreement = lifecycle
        .commit_chaincode_definition("mycc", &defn, &public_state, &[&org1_state, &org2_state])
        .expect("Commit should succeed regardless of the agreement split");
    assert_eq!(vec![true, false], agreement);

    // next revision: an approval at sequence 2 while sequence 1 is
    // committed
    let defn2 = definition(2, hash);
    lifecycle
        .approve_chaincode_definition_for_org("mycc", &defn2, &public_state, &org2_state)
        .expect("Approval at the next sequence should succeed");

    let agreement = lifecycle
        .commit_chaincode_definition("mycc", &defn2, &public_state, &[&org1_state, &org2_state])
        .expect("Commit at sequence 2 should succeed");
    assert_eq!(
        vec![false, true],
        agreement,
        "org1 approved only sequence 1, org2 only sequence 2"
    );

    let committed = lifecycle
        .query_chaincode_definition("mycc", &public_state)
        .expect("Query should succeed");
    assert_eq!(2, committed.sequence);
}
