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

use crate::handler::error::HandlerError;
use crate::lifecycle::error::LifecycleError;
use crate::protocol::error::PayloadError;
use crate::runtime::error::LaunchError;

/// An error raised by the chaincode support facade.
#[derive(Debug)]
pub enum SupportError {
    /// A non-init invocation arrived before init ran for this version.
    NotInitialized(String),
    /// An init invocation arrived after init already ran for this version.
    AlreadyInitialized(String),
    /// The channel has no application configuration.
    MissingApplicationConfig(String),
    /// A launch completed but no handler appeared in the registry.
    MissingHandler { channel_id: String, cname: String },
    /// The chaincode reported failure for the transaction.
    TransactionFailure(String),
    /// A terminal message of a type other than COMPLETED or ERROR.
    UnexpectedResponseType { message_type: String, tx_id: String },
    /// A read or write of the init marker failed.
    State(String),
    Launch {
        context: String,
        source: LaunchError,
    },
    Lifecycle {
        context: String,
        source: LifecycleError,
    },
    Handler {
        context: String,
        source: HandlerError,
    },
    Payload {
        context: String,
        source: PayloadError,
    },
}

impl fmt::Display for SupportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SupportError::NotInitialized(name) => write!(
                f,
                "chaincode '{}' has not been initialized for this version, must call 'init' first",
                name
            ),
            SupportError::AlreadyInitialized(name) => {
                write!(f, "chaincode '{}' is already initialized but 'init' called", name)
            }
            SupportError::MissingApplicationConfig(channel_id) => write!(
                f,
                "could not retrieve application config for channel '{}'",
                channel_id
            ),
            SupportError::MissingHandler { channel_id, cname } => write!(
                f,
                "[channel {}] claimed to start chaincode container for {} but could not find handler",
                channel_id, cname
            ),
            SupportError::TransactionFailure(message) => {
                write!(f, "transaction returned with failure: {}", message)
            }
            SupportError::UnexpectedResponseType {
                message_type,
                tx_id,
            } => write!(
                f,
                "unexpected response type {} for transaction {}",
                message_type, tx_id
            ),
            SupportError::State(message) => write!(f, "{}", message),
            SupportError::Launch { context, source } => write!(f, "{}: {}", context, source),
            SupportError::Lifecycle { context, source } => write!(f, "{}: {}", context, source),
            SupportError::Handler { context, source } => write!(f, "{}: {}", context, source),
            SupportError::Payload { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl Error for SupportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SupportError::Launch { source, .. } => Some(source),
            SupportError::Lifecycle { source, .. } => Some(source),
            SupportError::Handler { source, .. } => Some(source),
            SupportError::Payload { source, .. } => Some(source),
            _ => None,
        }
    }
}
