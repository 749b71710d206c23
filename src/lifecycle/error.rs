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

use crate::protocol::error::PayloadError;
use crate::state::error::{StateReadError, StateWriteError};
use crate::store::error::StoreError;

/// An error raised by the opaque field serializer.
#[derive(Debug)]
pub enum SerializerError {
    /// A field named by the stored metadata had no value in state.
    MissingField(String),
    /// A field's stored bytes did not match the hash recorded in metadata.
    FieldHashMismatch(String),
    /// The stored metadata describes a different datatype than requested.
    DatatypeMismatch { expected: String, found: String },
    Read(StateReadError),
    Write(StateWriteError),
    Payload(PayloadError),
}

impl fmt::Display for SerializerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SerializerError::MissingField(field) => write!(
                f,
                "field {} is named in metadata but missing from state",
                field
            ),
            SerializerError::FieldHashMismatch(field) => {
                write!(f, "field {} does not match its metadata hash", field)
            }
            SerializerError::DatatypeMismatch { expected, found } => write!(
                f,
                "serialized datatype is {} but {} was requested",
                found, expected
            ),
            SerializerError::Read(err) => write!(f, "state read failed: {}", err),
            SerializerError::Write(err) => write!(f, "state write failed: {}", err),
            SerializerError::Payload(err) => write!(f, "value encoding failed: {}", err),
        }
    }
}

impl Error for SerializerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SerializerError::Read(err) => Some(err),
            SerializerError::Write(err) => Some(err),
            SerializerError::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StateReadError> for SerializerError {
    fn from(err: StateReadError) -> Self {
        SerializerError::Read(err)
    }
}

impl From<StateWriteError> for SerializerError {
    fn from(err: StateWriteError) -> Self {
        SerializerError::Write(err)
    }
}

impl From<PayloadError> for SerializerError {
    fn from(err: PayloadError) -> Self {
        SerializerError::Payload(err)
    }
}

/// An error returned by a `PackageParser` implementation.
#[derive(Debug)]
pub struct PackageParseError(pub String);

impl fmt::Display for PackageParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for PackageParseError {}

/// An error raised by the definition lifecycle operations.
#[derive(Debug)]
pub enum LifecycleError {
    /// A commit's sequence was not exactly one past the current sequence.
    CommitSequenceMismatch { requested: i64, next: i64 },
    /// An approval at sequence 0 for an undefined namespace.
    ApproveSequenceZero,
    /// An approval behind the currently committed sequence.
    ApproveSequenceBehind { current: i64, requested: i64 },
    /// An approval more than one past the current sequence.
    ApproveSequenceAhead { requested: i64, next: i64 },
    /// An approval at the current sequence whose parameters differ from the
    /// committed definition.
    CurrentDefinitionMismatch {
        sequence: i64,
        namespace: String,
        detail: String,
    },
    /// The public sequence is set but its metadata record is gone.
    MissingCommittedMetadata { sequence: i64 },
    NamespaceNotDefined(String),
    NotChaincodeType(String),
    Serializer {
        context: String,
        source: SerializerError,
    },
    Store {
        context: String,
        source: StoreError,
    },
    PackageParse(PackageParseError),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LifecycleError::CommitSequenceMismatch { requested, next } => write!(
                f,
                "requested sequence is {}, but new definition must be sequence {}",
                requested, next
            ),
            LifecycleError::ApproveSequenceZero => write!(
                f,
                "requested sequence is 0, but first definable sequence number is 1"
            ),
            LifecycleError::ApproveSequenceBehind { current, requested } => write!(
                f,
                "currently defined sequence {} is larger than requested sequence {}",
                current, requested
            ),
            LifecycleError::ApproveSequenceAhead { requested, next } => write!(
                f,
                "requested sequence {} is larger than the next available sequence number {}",
                requested, next
            ),
            LifecycleError::CurrentDefinitionMismatch {
                sequence,
                namespace,
                detail,
            } => write!(
                f,
                "attempted to define the current sequence ({}) for namespace {}, but {}",
                sequence, namespace, detail
            ),
            LifecycleError::MissingCommittedMetadata { sequence } => write!(
                f,
                "missing metadata for currently committed sequence number ({})",
                sequence
            ),
            LifecycleError::NamespaceNotDefined(namespace) => {
                write!(f, "namespace {} is not defined", namespace)
            }
            LifecycleError::NotChaincodeType(datatype) => {
                write!(f, "not a chaincode type: {}", datatype)
            }
            LifecycleError::Serializer { context, source } => {
                write!(f, "{}: {}", context, source)
            }
            LifecycleError::Store { context, source } => write!(f, "{}: {}", context, source),
            LifecycleError::PackageParse(err) => {
                write!(f, "could not parse as a chaincode install package: {}", err)
            }
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LifecycleError::Serializer { source, .. } => Some(source),
            LifecycleError::Store { source, .. } => Some(source),
            LifecycleError::PackageParse(err) => Some(err),
            _ => None,
        }
    }
}
