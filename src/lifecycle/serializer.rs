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

//! Field-by-field serialization of definition records into namespaced state.
//!
//! A record is stored as one state key per field plus a metadata record
//! listing the record's datatype, its field names, and a SHA-256 hash of each
//! field's encoded bytes.  Because the metadata captures every field's hash,
//! two parties can decide whether they hold the same record by comparing
//! metadata alone, without parsing any field.  That is the property the
//! cross-org approval protocol depends on: an org's approval is compared to
//! a later commit through `is_serialized`, which only needs a hash-level
//! read of the org's private collection.
//!
//! Keys are laid out as `<namespace>/metadata/<name>` for metadata and
//! `<namespace>/fields/<name>/<field>` for each field.

use std::collections::{BTreeMap, HashMap};

use cbor::value::Value;
use sha2::{Digest, Sha256};

use crate::protocol::codec::{
    bytes, decode_map, encode, i64_value, key, key_to_string, take_i64, take_text, text,
    value_to_bytes,
};
use crate::protocol::definition::{
    ChaincodeDefinition, ChaincodeEndorsementInfo, ChaincodeParameters, ChaincodeValidationInfo,
    CollectionConfigPackage,
};
use crate::protocol::error::PayloadError;
use crate::state::{RangeableState, ReadWritableState, ReadableState};

use super::error::SerializerError;

/// A single serialized field value.
///
/// The tag survives encoding, so a field's kind can be checked without
/// knowing the record it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum StateData {
    Int64(i64),
    Bytes(Vec<u8>),
    String(String),
}

impl StateData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        match self {
            StateData::Int64(value) => map.insert(key("i"), i64_value(*value)),
            StateData::Bytes(value) => map.insert(key("b"), bytes(value)),
            StateData::String(value) => map.insert(key("s"), text(value)),
        };
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "state data")?;
        if map.contains_key(&key("i")) {
            return Ok(StateData::Int64(take_i64(&mut map, "i")?));
        }
        if let Some(value) = map.remove(&key("b")) {
            return Ok(StateData::Bytes(value_to_bytes(value)?));
        }
        if map.contains_key(&key("s")) {
            return Ok(StateData::String(take_text(&mut map, "s")?));
        }
        Err(PayloadError::Malformed("state data has no value tag".into()))
    }
}

/// The metadata record stored alongside a serialized value: the value's
/// datatype and the SHA-256 hash of each field's encoded bytes, keyed by
/// field name.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMetadata {
    pub datatype: String,
    pub fields: BTreeMap<String, Vec<u8>>,
}

impl StateMetadata {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let fields = self
            .fields
            .iter()
            .map(|(name, hash)| (key(name), bytes(hash)))
            .collect();

        let mut map = BTreeMap::new();
        map.insert(key("datatype"), text(&self.datatype));
        map.insert(key("fields"), Value::Map(fields));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "state metadata")?;
        let datatype = take_text(&mut map, "datatype")?;
        let fields = match map.remove(&key("fields")) {
            Some(Value::Map(entries)) => {
                let mut fields = BTreeMap::new();
                for (entry_key, entry_value) in entries {
                    fields.insert(key_to_string(entry_key)?, value_to_bytes(entry_value)?);
                }
                fields
            }
            _ => return Err(PayloadError::Malformed("metadata fields missing".into())),
        };
        Ok(StateMetadata { datatype, fields })
    }
}

/// A record which can be decomposed into named fields for serialization.
///
/// Implementations must keep field names stable across releases; the names
/// are part of the stored representation and of the cross-org equality
/// check.
pub trait SerializableFields {
    /// The datatype label recorded in metadata.
    const DATATYPE: &'static str;

    /// Decomposes the record into `(field name, value)` pairs.
    fn to_fields(&self) -> Result<Vec<(&'static str, StateData)>, PayloadError>;

    /// Reassembles the record from its named fields.
    fn from_fields(fields: HashMap<String, StateData>) -> Result<Self, PayloadError>
    where
        Self: Sized;
}

fn take_field(fields: &mut HashMap<String, StateData>, name: &str) -> Result<StateData, PayloadError> {
    fields
        .remove(name)
        .ok_or_else(|| PayloadError::Malformed(format!("field {} missing", name)))
}

fn bytes_field(fields: &mut HashMap<String, StateData>, name: &str) -> Result<Vec<u8>, PayloadError> {
    match take_field(fields, name)? {
        StateData::Bytes(value) => Ok(value),
        _ => Err(PayloadError::Malformed(format!(
            "field {} is not bytes",
            name
        ))),
    }
}

fn collections_to_field(
    collections: &Option<CollectionConfigPackage>,
) -> Result<StateData, PayloadError> {
    let package = collections.clone().unwrap_or_default();
    Ok(StateData::Bytes(package.to_bytes()?))
}

fn collections_from_field(raw: &[u8]) -> Result<Option<CollectionConfigPackage>, PayloadError> {
    let package = CollectionConfigPackage::from_bytes(raw)?;
    // an empty bundle deserializes as absent
    if package.collections.is_empty() {
        Ok(None)
    } else {
        Ok(Some(package))
    }
}

impl SerializableFields for ChaincodeParameters {
    const DATATYPE: &'static str = "ChaincodeParameters";

    fn to_fields(&self) -> Result<Vec<(&'static str, StateData)>, PayloadError> {
        Ok(vec![
            (
                "EndorsementInfo",
                StateData::Bytes(self.endorsement_info.to_bytes()?),
            ),
            (
                "ValidationInfo",
                StateData::Bytes(self.validation_info.to_bytes()?),
            ),
            ("Collections", collections_to_field(&self.collections)?),
        ])
    }

    fn from_fields(mut fields: HashMap<String, StateData>) -> Result<Self, PayloadError> {
        Ok(ChaincodeParameters {
            endorsement_info: ChaincodeEndorsementInfo::from_bytes(&bytes_field(
                &mut fields,
                "EndorsementInfo",
            )?)?,
            validation_info: ChaincodeValidationInfo::from_bytes(&bytes_field(
                &mut fields,
                "ValidationInfo",
            )?)?,
            collections: collections_from_field(&bytes_field(&mut fields, "Collections")?)?,
        })
    }
}

impl SerializableFields for ChaincodeDefinition {
    const DATATYPE: &'static str = "ChaincodeDefinition";

    fn to_fields(&self) -> Result<Vec<(&'static str, StateData)>, PayloadError> {
        Ok(vec![
            ("Sequence", StateData::Int64(self.sequence)),
            (
                "EndorsementInfo",
                StateData::Bytes(self.endorsement_info.to_bytes()?),
            ),
            (
                "ValidationInfo",
                StateData::Bytes(self.validation_info.to_bytes()?),
            ),
            ("Collections", collections_to_field(&self.collections)?),
        ])
    }

    fn from_fields(mut fields: HashMap<String, StateData>) -> Result<Self, PayloadError> {
        let sequence = match take_field(&mut fields, "Sequence")? {
            StateData::Int64(sequence) => sequence,
            _ => {
                return Err(PayloadError::Malformed(
                    "field Sequence is not an integer".into(),
                ))
            }
        };
        Ok(ChaincodeDefinition {
            sequence,
            endorsement_info: ChaincodeEndorsementInfo::from_bytes(&bytes_field(
                &mut fields,
                "EndorsementInfo",
            )?)?,
            validation_info: ChaincodeValidationInfo::from_bytes(&bytes_field(
                &mut fields,
                "ValidationInfo",
            )?)?,
            collections: collections_from_field(&bytes_field(&mut fields, "Collections")?)?,
        })
    }
}

/// Serializes records field-by-field into namespaced state.
#[derive(Debug, Default, Clone)]
pub struct Serializer;

impl Serializer {
    pub fn new() -> Self {
        Serializer
    }

    /// Writes `value` under `name`: one state key per field, plus the
    /// metadata record.  Fields present from an earlier serialization but
    /// absent from `value` are deleted; unchanged fields are not rewritten,
    /// which keeps re-approvals from dirtying the write set.
    pub fn serialize<T: SerializableFields>(
        &self,
        namespace: &str,
        name: &str,
        value: &T,
        state: &dyn ReadWritableState,
    ) -> Result<(), SerializerError> {
        let previous = self.deserialize_metadata(namespace, name, state)?;

        let fields = value.to_fields()?;
        let mut metadata_fields = BTreeMap::new();
        for (field_name, data) in &fields {
            let encoded = data.to_bytes()?;
            metadata_fields.insert((*field_name).to_string(), Sha256::digest(&encoded).to_vec());

            let field_key = Self::field_key(namespace, name, field_name);
            if state.get_state(&field_key)?.as_deref() != Some(encoded.as_slice()) {
                state.put_state(&field_key, encoded)?;
            }
        }

        if let Some(previous) = previous {
            for stale in previous
                .fields
                .keys()
                .filter(|field| !metadata_fields.contains_key(*field))
            {
                state.del_state(&Self::field_key(namespace, name, stale))?;
            }
        }

        let metadata = StateMetadata {
            datatype: T::DATATYPE.to_string(),
            fields: metadata_fields,
        };
        let metadata_key = Self::metadata_key(namespace, name);
        let encoded = metadata.to_bytes()?;
        if state.get_state(&metadata_key)?.as_deref() != Some(encoded.as_slice()) {
            state.put_state(&metadata_key, encoded)?;
        }

        Ok(())
    }

    /// Reads back a record previously written by `serialize`.  Every field
    /// named in `metadata` must be present and must match its recorded
    /// hash.
    pub fn deserialize<T: SerializableFields>(
        &self,
        namespace: &str,
        name: &str,
        metadata: &StateMetadata,
        state: &dyn ReadableState,
    ) -> Result<T, SerializerError> {
        if metadata.datatype != T::DATATYPE {
            return Err(SerializerError::DatatypeMismatch {
                expected: T::DATATYPE.to_string(),
                found: metadata.datatype.clone(),
            });
        }

        let mut fields = HashMap::new();
        for (field_name, expected_hash) in &metadata.fields {
            let encoded = state
                .get_state(&Self::field_key(namespace, name, field_name))?
                .ok_or_else(|| SerializerError::MissingField(field_name.clone()))?;
            if Sha256::digest(&encoded).as_slice() != expected_hash.as_slice() {
                return Err(SerializerError::FieldHashMismatch(field_name.clone()));
            }
            fields.insert(field_name.clone(), StateData::from_bytes(&encoded)?);
        }

        Ok(T::from_fields(fields)?)
    }

    /// Returns the metadata stored under `name`, or `None` if the namespace
    /// entry does not exist.
    pub fn deserialize_metadata(
        &self,
        namespace: &str,
        name: &str,
        state: &dyn ReadableState,
    ) -> Result<Option<StateMetadata>, SerializerError> {
        match state.get_state(&Self::metadata_key(namespace, name))? {
            Some(raw) => Ok(Some(StateMetadata::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    /// Returns every metadata record under `namespace`, keyed by entry name.
    pub fn deserialize_all_metadata(
        &self,
        namespace: &str,
        state: &dyn RangeableState,
    ) -> Result<Vec<(String, StateMetadata)>, SerializerError> {
        let prefix = format!("{}/metadata/", namespace);
        state
            .get_state_range(&prefix)?
            .into_iter()
            .map(|(full_key, raw)| {
                let name = full_key[prefix.len()..].to_string();
                Ok((name, StateMetadata::from_bytes(&raw)?))
            })
            .collect()
    }

    /// Fast path for integer fields such as `Sequence`.  Returns 0 when the
    /// field is absent, which doubles as "namespace undefined".
    pub fn deserialize_field_as_i64(
        &self,
        namespace: &str,
        name: &str,
        field: &str,
        state: &dyn ReadableState,
    ) -> Result<i64, SerializerError> {
        match state.get_state(&Self::field_key(namespace, name, field))? {
            Some(raw) => match StateData::from_bytes(&raw)? {
                StateData::Int64(value) => Ok(value),
                _ => Err(SerializerError::Payload(PayloadError::Malformed(format!(
                    "field {} is not an integer",
                    field
                )))),
            },
            None => Ok(0),
        }
    }

    /// Returns true if serializing `value` under `name` would reproduce
    /// exactly the record already stored in `state`.
    ///
    /// Only a hash-level read of the metadata key is required, so this works
    /// against an org's implicit collection where values are not available,
    /// only their hashes.
    pub fn is_serialized<T: SerializableFields>(
        &self,
        namespace: &str,
        name: &str,
        value: &T,
        state: &dyn ReadableState,
    ) -> Result<bool, SerializerError> {
        let mut metadata_fields = BTreeMap::new();
        for (field_name, data) in value.to_fields()? {
            let encoded = data.to_bytes()?;
            metadata_fields.insert(field_name.to_string(), Sha256::digest(&encoded).to_vec());
        }
        let metadata = StateMetadata {
            datatype: T::DATATYPE.to_string(),
            fields: metadata_fields,
        };

        let expected_hash = Sha256::digest(&metadata.to_bytes()?).to_vec();
        Ok(state.get_state_hash(&Self::metadata_key(namespace, name))?
            == Some(expected_hash))
    }

    fn metadata_key(namespace: &str, name: &str) -> String {
        format!("{}/metadata/{}", namespace, name)
    }

    fn field_key(namespace: &str, name: &str, field: &str) -> String {
        format!("{}/fields/{}/{}", namespace, name, field)
    }
}
