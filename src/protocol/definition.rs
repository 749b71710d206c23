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

//! The records which make up a chaincode definition.
//!
//! A `ChaincodeDefinition` is the committed description of how a chaincode
//! is endorsed, validated, and initialized on a channel, together with the
//! monotonic sequence number identifying the definition's revision.  The
//! sequence-free portion, `ChaincodeParameters`, is what individual
//! organizations approve into their implicit collections.
//!
//! These records are serialized field-by-field into state; reordering the
//! fields of a record is harmless because fields are keyed by name, but
//! adding a field changes the stored metadata and is a breaking change.

use std::collections::BTreeMap;

use cbor::value::Value;

use super::codec::{
    bytes, decode_map, encode, key, take_bool, take_bytes, take_text, text,
};
use super::error::PayloadError;

/// How proposals for a chaincode are endorsed, and which installed package
/// backs it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeEndorsementInfo {
    pub version: String,
    pub endorsement_plugin: String,
    /// The content hash of the installed code package.
    pub id: Vec<u8>,
    pub init_required: bool,
}

impl ChaincodeEndorsementInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("version"), text(&self.version));
        map.insert(key("endorsement_plugin"), text(&self.endorsement_plugin));
        map.insert(key("id"), bytes(&self.id));
        map.insert(key("init_required"), Value::Bool(self.init_required));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "endorsement info")?;
        Ok(ChaincodeEndorsementInfo {
            version: take_text(&mut map, "version")?,
            endorsement_plugin: take_text(&mut map, "endorsement_plugin")?,
            id: take_bytes(&mut map, "id")?,
            init_required: take_bool(&mut map, "init_required")?,
        })
    }
}

/// How transactions for a chaincode are validated at commit time.  The
/// parameter is opaque to this library; it is interpreted by the named
/// validation plugin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeValidationInfo {
    pub validation_plugin: String,
    pub validation_parameter: Vec<u8>,
}

impl ChaincodeValidationInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("validation_plugin"), text(&self.validation_plugin));
        map.insert(
            key("validation_parameter"),
            bytes(&self.validation_parameter),
        );
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "validation info")?;
        Ok(ChaincodeValidationInfo {
            validation_plugin: take_text(&mut map, "validation_plugin")?,
            validation_parameter: take_bytes(&mut map, "validation_parameter")?,
        })
    }
}

/// A single private-data collection declaration.  The membership policy is
/// opaque bytes, interpreted by the policy machinery outside this library.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionConfig {
    pub name: String,
    pub member_orgs_policy: Vec<u8>,
}

/// The bundle of private-data collections attached to a definition.
///
/// An absent bundle and an empty bundle are treated as equal when comparing
/// definitions; see `Lifecycle::approve_chaincode_definition_for_org`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionConfigPackage {
    pub collections: Vec<CollectionConfig>,
}

impl CollectionConfigPackage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let collections = self
            .collections
            .iter()
            .map(|collection| {
                let mut map = BTreeMap::new();
                map.insert(key("name"), text(&collection.name));
                map.insert(
                    key("member_orgs_policy"),
                    bytes(&collection.member_orgs_policy),
                );
                Value::Map(map)
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert(key("collections"), Value::Array(collections));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "collection config package")?;
        let collections = match map.remove(&key("collections")) {
            Some(Value::Array(values)) => values
                .into_iter()
                .map(|value| match value {
                    Value::Map(mut entry) => Ok(CollectionConfig {
                        name: take_text(&mut entry, "name")?,
                        member_orgs_policy: take_bytes(&mut entry, "member_orgs_policy")?,
                    }),
                    _ => Err(PayloadError::Malformed(
                        "collection entry is not a map".into(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(PayloadError::Malformed("collections missing".into())),
        };
        Ok(CollectionConfigPackage { collections })
    }
}

/// The sequence-free portion of a chaincode definition, as approved by each
/// organization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeParameters {
    pub endorsement_info: ChaincodeEndorsementInfo,
    pub validation_info: ChaincodeValidationInfo,
    pub collections: Option<CollectionConfigPackage>,
}

/// A chaincode definition: the parameters plus the sequence number of this
/// revision.  Sequence 0 means undefined; the first definable sequence is 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeDefinition {
    pub sequence: i64,
    pub endorsement_info: ChaincodeEndorsementInfo,
    pub validation_info: ChaincodeValidationInfo,
    pub collections: Option<CollectionConfigPackage>,
}

impl ChaincodeDefinition {
    /// Returns the sequence-free portion of this definition.
    pub fn parameters(&self) -> ChaincodeParameters {
        ChaincodeParameters {
            endorsement_info: self.endorsement_info.clone(),
            validation_info: self.validation_info.clone(),
            collections: self.collections.clone(),
        }
    }
}
