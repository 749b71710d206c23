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

//! CBOR map helpers shared by the record codecs in this crate.

use std::collections::BTreeMap;
use std::io::Cursor;

use cbor::decoder::GenericDecoder;
use cbor::encoder::GenericEncoder;
use cbor::value::{Bytes, Key, Text, Value};

use super::error::PayloadError;

pub(crate) fn encode(value: Value) -> Result<Vec<u8>, PayloadError> {
    let mut encoder = GenericEncoder::new(Cursor::new(Vec::new()));
    encoder.value(&value)?;
    Ok(encoder.into_inner().into_writer().into_inner())
}

pub(crate) fn decode_map(raw: &[u8], record: &str) -> Result<BTreeMap<Key, Value>, PayloadError> {
    let mut decoder = GenericDecoder::new(cbor::Config::default(), Cursor::new(raw));
    match decoder.value()? {
        Value::Map(map) => Ok(map),
        _ => Err(PayloadError::Malformed(format!("{} is not a map", record))),
    }
}

pub(crate) fn key(name: &str) -> Key {
    Key::Text(Text::Text(name.to_string()))
}

pub(crate) fn text(value: &str) -> Value {
    Value::Text(Text::Text(value.to_string()))
}

pub(crate) fn bytes(value: &[u8]) -> Value {
    Value::Bytes(Bytes::Bytes(value.to_vec()))
}

pub(crate) fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(value) => text(value),
        None => Value::Null,
    }
}

pub(crate) fn key_to_string(key_value: Key) -> Result<String, PayloadError> {
    match key_value {
        Key::Text(Text::Text(s)) => Ok(s),
        _ => Err(PayloadError::Malformed("map key is not text".into())),
    }
}

pub(crate) fn value_to_bytes(value: Value) -> Result<Vec<u8>, PayloadError> {
    match value {
        Value::Bytes(Bytes::Bytes(b)) => Ok(b),
        _ => Err(PayloadError::Malformed("value is not bytes".into())),
    }
}

pub(crate) fn take_text(
    map: &mut BTreeMap<Key, Value>,
    name: &str,
) -> Result<String, PayloadError> {
    match map.remove(&key(name)) {
        Some(Value::Text(Text::Text(s))) => Ok(s),
        _ => Err(PayloadError::Malformed(format!("field {} missing", name))),
    }
}

pub(crate) fn take_opt_text(
    map: &mut BTreeMap<Key, Value>,
    name: &str,
) -> Result<Option<String>, PayloadError> {
    match map.remove(&key(name)) {
        Some(Value::Text(Text::Text(s))) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        _ => Err(PayloadError::Malformed(format!(
            "field {} is not text",
            name
        ))),
    }
}

pub(crate) fn take_bytes(
    map: &mut BTreeMap<Key, Value>,
    name: &str,
) -> Result<Vec<u8>, PayloadError> {
    match map.remove(&key(name)) {
        Some(Value::Bytes(Bytes::Bytes(b))) => Ok(b),
        _ => Err(PayloadError::Malformed(format!("field {} missing", name))),
    }
}

pub(crate) fn take_bool(map: &mut BTreeMap<Key, Value>, name: &str) -> Result<bool, PayloadError> {
    match map.remove(&key(name)) {
        Some(Value::Bool(b)) => Ok(b),
        _ => Err(PayloadError::Malformed(format!("field {} missing", name))),
    }
}

pub(crate) fn take_i64(map: &mut BTreeMap<Key, Value>, name: &str) -> Result<i64, PayloadError> {
    let raw = take_bytes(map, name)?;
    if raw.len() != 8 {
        return Err(PayloadError::Malformed(format!(
            "field {} is not a 64-bit integer",
            name
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw);
    Ok(i64::from_be_bytes(buf))
}

pub(crate) fn i64_value(value: i64) -> Value {
    bytes(&value.to_be_bytes())
}
