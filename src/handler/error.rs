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

/// An error raised by the stream transport underneath a handler.
#[derive(Debug)]
pub struct StreamError(pub String);

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StreamError {}

/// An error raised by a chaincode handler.
#[derive(Debug)]
pub enum HandlerError {
    /// A malformed or unexpected message arrived on the stream.  Fatal to
    /// the handler; the stream is torn down.
    Protocol(String),
    /// The stream transport failed.  Fatal to the handler.
    Stream(String),
    /// A handler is already registered under the chaincode's name.
    AlreadyRegistered(String),
    /// A transaction context already exists for this (channel, txid).
    DuplicateTxId { channel_id: String, tx_id: String },
    /// The invocation did not complete within the execute timeout.  The
    /// handler survives; a late response is discarded.
    ExecutionTimeout { chaincode: String, tx_id: String },
    /// A chaincode request referenced a (channel, txid) with no live
    /// transaction context.
    MissingContext { channel_id: String, tx_id: String },
    /// A chaincode request referenced an unknown query iterator.
    MissingIterator(String),
    /// The ACL provider denied a chaincode request.
    AclViolation(String),
    /// A ledger operation performed for a chaincode request failed.
    Simulation(String),
    Payload(PayloadError),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandlerError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            HandlerError::Stream(msg) => write!(f, "chaincode stream failed: {}", msg),
            HandlerError::AlreadyRegistered(cname) => {
                write!(f, "found existing handler for {}", cname)
            }
            HandlerError::DuplicateTxId { channel_id, tx_id } => write!(
                f,
                "txid {} on channel {} already has a live transaction context",
                tx_id, channel_id
            ),
            HandlerError::ExecutionTimeout { chaincode, tx_id } => write!(
                f,
                "timeout expired while executing transaction {} on {}",
                tx_id, chaincode
            ),
            HandlerError::MissingContext { channel_id, tx_id } => write!(
                f,
                "no ledger context for txid {} on channel {}",
                tx_id, channel_id
            ),
            HandlerError::MissingIterator(id) => write!(f, "no query iterator {}", id),
            HandlerError::AclViolation(msg) => write!(f, "access denied: {}", msg),
            HandlerError::Simulation(msg) => write!(f, "ledger operation failed: {}", msg),
            HandlerError::Payload(err) => write!(f, "{}", err),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PayloadError> for HandlerError {
    fn from(err: PayloadError) -> Self {
        HandlerError::Payload(err)
    }
}
