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

use std::error::Error;
use std::fmt;

/// An error that may occur while encoding or decoding a message payload.
#[derive(Debug)]
pub enum PayloadError {
    /// The payload bytes decoded, but did not have the expected shape.
    Malformed(String),
    /// The underlying codec failed.
    Serialization(Box<dyn Error + Send>),
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayloadError::Malformed(msg) => write!(f, "malformed payload: {}", msg),
            PayloadError::Serialization(err) => write!(f, "payload serialization error: {}", err),
        }
    }
}

impl Error for PayloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PayloadError::Malformed(_) => None,
            PayloadError::Serialization(err) => Some(err.as_ref()),
        }
    }
}

impl From<cbor::EncodeError> for PayloadError {
    fn from(err: cbor::EncodeError) -> Self {
        PayloadError::Serialization(Box::new(err))
    }
}

impl From<cbor::DecodeError> for PayloadError {
    fn from(err: cbor::DecodeError) -> Self {
        PayloadError::Serialization(Box::new(err))
    }
}
