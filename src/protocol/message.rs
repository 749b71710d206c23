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

//! The messages exchanged between the peer and a running chaincode.
//!
//! Every message on the stream is a `ChaincodeMessage`: a type, an opaque
//! payload, and the `(channel_id, txid)` pair used to correlate responses
//! with in-flight requests.  The payload records defined here are the typed
//! contents of those payloads; each encodes to and from bytes independently
//! so the stream transport never needs to understand them.

use std::collections::BTreeMap;
use std::fmt;

use cbor::value::Value;

use crate::state::StateEntry;

use super::codec::{
    bytes, decode_map, encode, key, key_to_string, opt_text, take_bytes, take_opt_text, take_text,
    text, value_to_bytes,
};
use super::error::PayloadError;

/// The type tag of a message on the chaincode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Register,
    Registered,
    Ready,
    Init,
    Transaction,
    Completed,
    Error,
    Response,
    GetState,
    PutState,
    DelState,
    GetStateByRange,
    QueryStateNext,
    QueryStateClose,
    GetQueryResult,
    GetHistoryForKey,
    InvokeChaincode,
    Keepalive,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MessageType::Register => "REGISTER",
            MessageType::Registered => "REGISTERED",
            MessageType::Ready => "READY",
            MessageType::Init => "INIT",
            MessageType::Transaction => "TRANSACTION",
            MessageType::Completed => "COMPLETED",
            MessageType::Error => "ERROR",
            MessageType::Response => "RESPONSE",
            MessageType::GetState => "GET_STATE",
            MessageType::PutState => "PUT_STATE",
            MessageType::DelState => "DEL_STATE",
            MessageType::GetStateByRange => "GET_STATE_BY_RANGE",
            MessageType::QueryStateNext => "QUERY_STATE_NEXT",
            MessageType::QueryStateClose => "QUERY_STATE_CLOSE",
            MessageType::GetQueryResult => "GET_QUERY_RESULT",
            MessageType::GetHistoryForKey => "GET_HISTORY_FOR_KEY",
            MessageType::InvokeChaincode => "INVOKE_CHAINCODE",
            MessageType::Keepalive => "KEEPALIVE",
        };
        f.write_str(name)
    }
}

/// A single message on the bidirectional chaincode stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeMessage {
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub txid: String,
    pub channel_id: String,
    pub chaincode_event: Option<ChaincodeEvent>,
}

impl ChaincodeMessage {
    pub fn new(
        message_type: MessageType,
        channel_id: &str,
        txid: &str,
        payload: Vec<u8>,
    ) -> Self {
        ChaincodeMessage {
            message_type,
            payload,
            txid: txid.to_string(),
            channel_id: channel_id.to_string(),
            chaincode_event: None,
        }
    }
}

/// The name and version a chaincode registers under.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeId {
    pub name: String,
    pub version: String,
}

impl ChaincodeId {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("name"), text(&self.name));
        map.insert(key("version"), text(&self.version));
        encode(Value::Map(map))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(bytes, "chaincode id")?;
        Ok(ChaincodeId {
            name: take_text(&mut map, "name")?,
            version: take_text(&mut map, "version")?,
        })
    }
}

/// The arguments of an invocation, plus any proposal decorations attached by
/// the endorser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeInput {
    pub args: Vec<Vec<u8>>,
    pub decorations: BTreeMap<String, Vec<u8>>,
}

impl ChaincodeInput {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(
            key("args"),
            Value::Array(self.args.iter().map(|arg| bytes(arg)).collect()),
        );
        let decorations = self
            .decorations
            .iter()
            .map(|(name, value)| (key(name), bytes(value)))
            .collect();
        map.insert(key("decorations"), Value::Map(decorations));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "chaincode input")?;

        let args = match map.remove(&key("args")) {
            Some(Value::Array(values)) => values
                .into_iter()
                .map(value_to_bytes)
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(PayloadError::Malformed("input args missing".into())),
        };

        let decorations = match map.remove(&key("decorations")) {
            Some(Value::Map(entries)) => {
                let mut decorations = BTreeMap::new();
                for (entry_key, entry_value) in entries {
                    decorations.insert(key_to_string(entry_key)?, value_to_bytes(entry_value)?);
                }
                decorations
            }
            None => BTreeMap::new(),
            _ => {
                return Err(PayloadError::Malformed(
                    "input decorations are not a map".into(),
                ))
            }
        };

        Ok(ChaincodeInput { args, decorations })
    }
}

/// The chaincode-defined outcome of an invocation, carried in the payload of
/// a `COMPLETED` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("status"), bytes(&self.status.to_be_bytes()));
        map.insert(key("message"), text(&self.message));
        map.insert(key("payload"), bytes(&self.payload));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "response")?;
        let status_bytes = take_bytes(&mut map, "status")?;
        if status_bytes.len() != 4 {
            return Err(PayloadError::Malformed("response status width".into()));
        }
        let mut status = [0u8; 4];
        status.copy_from_slice(&status_bytes);
        Ok(Response {
            status: i32::from_be_bytes(status),
            message: take_text(&mut map, "message")?,
            payload: take_bytes(&mut map, "payload")?,
        })
    }
}

/// An event emitted by a chaincode, delivered alongside a terminal message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub tx_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
}

/// Payload of `GET_STATE` and `DEL_STATE`; a set `collection` addresses
/// private data instead of public state.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPayload {
    pub key: String,
    pub collection: Option<String>,
}

impl KeyPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("key"), text(&self.key));
        map.insert(key("collection"), opt_text(&self.collection));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "key payload")?;
        Ok(KeyPayload {
            key: take_text(&mut map, "key")?,
            collection: take_opt_text(&mut map, "collection")?,
        })
    }
}

/// Payload of `PUT_STATE`.
#[derive(Debug, Clone, PartialEq)]
pub struct PutStatePayload {
    pub key: String,
    pub value: Vec<u8>,
    pub collection: Option<String>,
}

impl PutStatePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("key"), text(&self.key));
        map.insert(key("value"), bytes(&self.value));
        map.insert(key("collection"), opt_text(&self.collection));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "put state payload")?;
        Ok(PutStatePayload {
            key: take_text(&mut map, "key")?,
            value: take_bytes(&mut map, "value")?,
            collection: take_opt_text(&mut map, "collection")?,
        })
    }
}

/// Payload of `GET_STATE_BY_RANGE`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePayload {
    pub start: String,
    pub end: String,
    pub collection: Option<String>,
}

impl RangePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("start"), text(&self.start));
        map.insert(key("end"), text(&self.end));
        map.insert(key("collection"), opt_text(&self.collection));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "range payload")?;
        Ok(RangePayload {
            start: take_text(&mut map, "start")?,
            end: take_text(&mut map, "end")?,
            collection: take_opt_text(&mut map, "collection")?,
        })
    }
}

/// Payload of `GET_QUERY_RESULT`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPayload {
    pub query: String,
    pub collection: Option<String>,
}

impl QueryPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("query"), text(&self.query));
        map.insert(key("collection"), opt_text(&self.collection));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "query payload")?;
        Ok(QueryPayload {
            query: take_text(&mut map, "query")?,
            collection: take_opt_text(&mut map, "collection")?,
        })
    }
}

/// Payload of `QUERY_STATE_NEXT` and `QUERY_STATE_CLOSE`, naming an open
/// iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatePayload {
    pub id: String,
}

impl QueryStatePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("id"), text(&self.id));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "query state payload")?;
        Ok(QueryStatePayload {
            id: take_text(&mut map, "id")?,
        })
    }
}

/// One chunk of a result set, carried in a `RESPONSE` to a range or rich
/// query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub results: Vec<StateEntry>,
    pub has_more: bool,
    pub id: String,
}

impl QueryResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let results = self
            .results
            .iter()
            .map(|entry| {
                let mut map = BTreeMap::new();
                map.insert(key("key"), text(&entry.key));
                map.insert(key("value"), bytes(&entry.value));
                Value::Map(map)
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert(key("results"), Value::Array(results));
        map.insert(key("has_more"), Value::Bool(self.has_more));
        map.insert(key("id"), text(&self.id));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "query response")?;

        let results = match map.remove(&key("results")) {
            Some(Value::Array(values)) => values
                .into_iter()
                .map(|value| match value {
                    Value::Map(mut entry) => Ok(StateEntry {
                        key: take_text(&mut entry, "key")?,
                        value: take_bytes(&mut entry, "value")?,
                    }),
                    _ => Err(PayloadError::Malformed(
                        "query result entry is not a map".into(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(PayloadError::Malformed("query results missing".into())),
        };

        let has_more = match map.remove(&key("has_more")) {
            Some(Value::Bool(has_more)) => has_more,
            _ => return Err(PayloadError::Malformed("has_more missing".into())),
        };

        Ok(QueryResponse {
            results,
            has_more,
            id: take_text(&mut map, "id")?,
        })
    }
}

/// Payload of `INVOKE_CHAINCODE`: a chaincode-to-chaincode call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeChaincodePayload {
    pub chaincode_name: String,
    pub input: ChaincodeInput,
}

impl InvokeChaincodePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PayloadError> {
        let mut map = BTreeMap::new();
        map.insert(key("chaincode_name"), text(&self.chaincode_name));
        map.insert(key("input"), bytes(&self.input.to_bytes()?));
        encode(Value::Map(map))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, PayloadError> {
        let mut map = decode_map(raw, "invoke chaincode payload")?;
        let input_bytes = take_bytes(&mut map, "input")?;
        Ok(InvokeChaincodePayload {
            chaincode_name: take_text(&mut map, "chaincode_name")?,
            input: ChaincodeInput::from_bytes(&input_bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_roundtrip_preserves_args_and_decorations() {
        let mut decorations = BTreeMap::new();
        decorations.insert("creator".to_string(), b"org1".to_vec());

        let input = ChaincodeInput {
            args: vec![b"invoke".to_vec(), b"a".to_vec(), b"100".to_vec()],
            decorations,
        };

        let unpacked = ChaincodeInput::from_bytes(
            &input.to_bytes().expect("Unable to encode chaincode input"),
        )
        .expect("Unable to decode chaincode input");

        assert_eq!(input, unpacked);
    }

    #[test]
    fn response_roundtrip_preserves_negative_status() {
        let response = Response {
            status: -1,
            message: "bad argument".to_string(),
            payload: vec![0x01, 0x02],
        };

        let unpacked =
            Response::from_bytes(&response.to_bytes().expect("Unable to encode response"))
                .expect("Unable to decode response");

        assert_eq!(response, unpacked);
    }

    #[test]
    fn query_response_roundtrip() {
        let response = QueryResponse {
            results: vec![
                StateEntry {
                    key: "a".to_string(),
                    value: b"1".to_vec(),
                },
                StateEntry {
                    key: "b".to_string(),
                    value: b"2".to_vec(),
                },
            ],
            has_more: true,
            id: "iter-1".to_string(),
        };

        let unpacked = QueryResponse::from_bytes(
            &response.to_bytes().expect("Unable to encode query response"),
        )
        .expect("Unable to decode query response");

        assert_eq!(response, unpacked);
    }

    #[test]
    fn key_payload_collection_is_optional() {
        let public = KeyPayload {
            key: "a".to_string(),
            collection: None,
        };
        let private = KeyPayload {
            key: "a".to_string(),
            collection: Some("_implicit_org1".to_string()),
        };

        for payload in &[public, private] {
            let unpacked =
                KeyPayload::from_bytes(&payload.to_bytes().expect("Unable to encode key payload"))
                    .expect("Unable to decode key payload");
            assert_eq!(payload, &unpacked);
        }
    }
}
