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

/// An error raised by a chaincode store.
#[derive(Debug)]
pub enum StoreError {
    /// No package is stored for the requested name and version, or hash.
    NotFound(String),
    /// The store's backing medium failed.
    Storage {
        context: String,
        source: Box<dyn Error + Send>,
    },
}

impl StoreError {
    pub fn storage(context: &str, source: Box<dyn Error + Send>) -> Self {
        StoreError::Storage {
            context: context.to_string(),
            source,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "{} not found", what),
            StoreError::Storage { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::NotFound(_) => None,
            StoreError::Storage { source, .. } => Some(source.as_ref()),
        }
    }
}
