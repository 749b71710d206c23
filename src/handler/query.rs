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

//! Chunking of query result sets into bounded responses.

use crate::protocol::message::QueryResponse;

use super::contexts::TransactionContexts;
use super::error::HandlerError;

/// The default cap on rows returned in a single query response.
pub const DEFAULT_MAX_RESULT_LIMIT: usize = 100;

/// Builds bounded `QueryResponse` chunks from a context's open iterators.
#[derive(Clone)]
pub struct QueryResponseBuilder {
    pub max_result_limit: usize,
}

impl QueryResponseBuilder {
    pub fn new(max_result_limit: usize) -> Self {
        QueryResponseBuilder { max_result_limit }
    }

    /// Pulls the next chunk from the named iterator, capped at this
    /// builder's result limit.
    pub fn build(
        &self,
        contexts: &TransactionContexts,
        channel_id: &str,
        tx_id: &str,
        iterator_id: &str,
    ) -> Result<QueryResponse, HandlerError> {
        let (results, has_more) =
            contexts.next_chunk(channel_id, tx_id, iterator_id, self.max_result_limit)?;
        Ok(QueryResponse {
            results,
            has_more,
            id: iterator_id.to_string(),
        })
    }
}

impl Default for QueryResponseBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESULT_LIMIT)
    }
}
