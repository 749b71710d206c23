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

use crate::store::error::StoreError;

/// An error raised by a container runtime or its underlying processor.
#[derive(Debug)]
pub struct ContainerError(pub String);

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ContainerError {}

/// An error raised while launching a chaincode.
#[derive(Debug)]
pub enum LaunchError {
    /// The backing package could not be fetched from the chaincode store.
    Package {
        context: String,
        source: StoreError,
    },
    /// The container runtime failed to start the chaincode.
    Container {
        context: String,
        source: ContainerError,
    },
    /// The chaincode did not reach ready within the startup timeout.
    Timeout(String),
    /// The launch in progress, owned by another caller, completed with an
    /// error.
    Failed { cname: String, message: String },
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LaunchError::Package { context, source } => write!(f, "{}: {}", context, source),
            LaunchError::Container { context, source } => write!(f, "{}: {}", context, source),
            LaunchError::Timeout(cname) => {
                write!(f, "timeout expired while starting chaincode {}", cname)
            }
            LaunchError::Failed { cname, message } => {
                write!(f, "could not launch chaincode {}: {}", cname, message)
            }
        }
    }
}

impl Error for LaunchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LaunchError::Package { source, .. } => Some(source),
            LaunchError::Container { source, .. } => Some(source),
            _ => None,
        }
    }
}
