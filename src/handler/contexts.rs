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

//! Per-handler transaction context tracking.
//!
//! A transaction context exists for the duration of a single
//! `(channel, txid)` request/response pair.  It carries the invocation's
//! simulator, the channel on which the correlated terminal response is
//! delivered, and any query iterators the chaincode has opened.  Creating a
//! second context for a live `(channel, txid)` fails, which is what rejects
//! txid replay against a running handler.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::protocol::message::{ChaincodeMessage, MessageType};
use crate::state::{StateEntry, StateIterator, TxSimulator};

use super::error::HandlerError;

/// A transaction simulator as shared between an invocation's caller and
/// the handler threads serving the chaincode's ledger requests.
pub type SharedTxSimulator = Arc<Mutex<Box<dyn TxSimulator + Send>>>;

/// The per-invocation inputs a transaction context is built from.
pub struct TransactionParams {
    pub channel_id: String,
    pub tx_id: String,
    pub tx_simulator: SharedTxSimulator,
    pub proposal_decorations: HashMap<String, Vec<u8>>,
}

struct TransactionContext {
    responder: Sender<ChaincodeMessage>,
    tx_simulator: SharedTxSimulator,
    query_iterators: HashMap<String, Box<dyn StateIterator>>,
}

/// The table of live transaction contexts for one handler.
#[derive(Clone)]
pub struct TransactionContexts {
    contexts: Arc<Mutex<HashMap<(String, String), TransactionContext>>>,
}

impl TransactionContexts {
    pub fn new() -> Self {
        TransactionContexts {
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a context for the given transaction and returns the receiver
    /// on which its terminal response will be delivered.  Fails if a context
    /// already exists for the `(channel, txid)`.
    pub fn create(
        &self,
        tx_params: &TransactionParams,
    ) -> Result<Receiver<ChaincodeMessage>, HandlerError> {
        let mut contexts = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned");

        let ctx_key = (tx_params.channel_id.clone(), tx_params.tx_id.clone());
        if contexts.contains_key(&ctx_key) {
            return Err(HandlerError::DuplicateTxId {
                channel_id: tx_params.channel_id.clone(),
                tx_id: tx_params.tx_id.clone(),
            });
        }

        let (responder, receiver) = channel();
        contexts.insert(
            ctx_key,
            TransactionContext {
                responder,
                tx_simulator: Arc::clone(&tx_params.tx_simulator),
                query_iterators: HashMap::new(),
            },
        );
        Ok(receiver)
    }

    /// Returns the simulator attached to a live context.
    pub fn simulator(&self, channel_id: &str, tx_id: &str) -> Option<SharedTxSimulator> {
        self.contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned")
            .get(&(channel_id.to_string(), tx_id.to_string()))
            .map(|ctx| Arc::clone(&ctx.tx_simulator))
    }

    /// Routes a terminal message to the waiter for its `(channel, txid)`.
    /// Returns false if no context matched, or the waiter is gone; the
    /// caller logs and discards such messages.
    pub fn respond(&self, message: ChaincodeMessage) -> bool {
        let contexts = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned");

        match contexts.get(&(message.channel_id.clone(), message.txid.clone())) {
            Some(ctx) => ctx.responder.send(message).is_ok(),
            None => false,
        }
    }

    /// Releases the context for `(channel, txid)`, dropping any query
    /// iterators it still holds.
    pub fn delete(&self, channel_id: &str, tx_id: &str) {
        self.contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned")
            .remove(&(channel_id.to_string(), tx_id.to_string()));
    }

    /// Attaches an open query iterator to a live context.
    pub fn insert_iterator(
        &self,
        channel_id: &str,
        tx_id: &str,
        iterator_id: &str,
        iterator: Box<dyn StateIterator>,
    ) -> Result<(), HandlerError> {
        let mut contexts = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned");

        let ctx = contexts
            .get_mut(&(channel_id.to_string(), tx_id.to_string()))
            .ok_or_else(|| HandlerError::MissingContext {
                channel_id: channel_id.to_string(),
                tx_id: tx_id.to_string(),
            })?;
        ctx.query_iterators
            .insert(iterator_id.to_string(), iterator);
        Ok(())
    }

    /// Pulls up to `max` entries from an open iterator.  Returns the chunk
    /// and whether the iterator may have more; an exhausted iterator is
    /// released.
    pub fn next_chunk(
        &self,
        channel_id: &str,
        tx_id: &str,
        iterator_id: &str,
        max: usize,
    ) -> Result<(Vec<StateEntry>, bool), HandlerError> {
        let mut contexts = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned");

        let ctx = contexts
            .get_mut(&(channel_id.to_string(), tx_id.to_string()))
            .ok_or_else(|| HandlerError::MissingContext {
                channel_id: channel_id.to_string(),
                tx_id: tx_id.to_string(),
            })?;

        let iterator = ctx
            .query_iterators
            .get_mut(iterator_id)
            .ok_or_else(|| HandlerError::MissingIterator(iterator_id.to_string()))?;

        let mut results = Vec::new();
        let mut has_more = true;
        while results.len() < max {
            match iterator
                .next()
                .map_err(|err| HandlerError::Simulation(err.to_string()))?
            {
                Some(entry) => results.push(entry),
                None => {
                    has_more = false;
                    break;
                }
            }
        }

        if !has_more {
            ctx.query_iterators.remove(iterator_id);
        }
        Ok((results, has_more))
    }

    /// Releases an open iterator without draining it.
    pub fn close_iterator(&self, channel_id: &str, tx_id: &str, iterator_id: &str) {
        if let Some(ctx) = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned")
            .get_mut(&(channel_id.to_string(), tx_id.to_string()))
        {
            ctx.query_iterators.remove(iterator_id);
        }
    }

    /// Tears down every outstanding context, delivering a terminal error to
    /// each waiter.  Called when the handler's stream dies.
    pub fn close_all(&self) {
        let mut contexts = self
            .contexts
            .lock()
            .expect("TransactionContexts mutex is poisoned");

        for ((channel_id, tx_id), ctx) in contexts.drain() {
            let notice = ChaincodeMessage::new(
                MessageType::Error,
                &channel_id,
                &tx_id,
                b"chaincode stream terminated".to_vec(),
            );
            // the waiter may already have timed out and gone away
            if ctx.responder.send(notice).is_err() {
                debug!(
                    "no waiter for ({}, {}) during context teardown",
                    channel_id, tx_id
                );
            }
        }
    }
}

impl Default for TransactionContexts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::state::error::{StateReadError, StateWriteError};
    use crate::state::QueryExecutor;

    static CHANNEL: &str = "testchannel";
    static TXID: &str = "tx-1";

    /// A simulator that answers nothing; these tests only exercise context
    /// bookkeeping.
    struct NullSimulator;

    impl QueryExecutor for NullSimulator {
        fn get_state(&self, _: &str, _: &str) -> Result<Option<Vec<u8>>, StateReadError> {
            Ok(None)
        }

        fn get_state_range(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Box<dyn StateIterator>, StateReadError> {
            Ok(Box::new(VecIterator { entries: vec![] }))
        }
    }

    impl TxSimulator for NullSimulator {
        fn set_state(&mut self, _: &str, _: &str, _: Vec<u8>) -> Result<(), StateWriteError> {
            Ok(())
        }

        fn delete_state(&mut self, _: &str, _: &str) -> Result<(), StateWriteError> {
            Ok(())
        }

        fn get_private_data(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Option<Vec<u8>>, StateReadError> {
            Ok(None)
        }

        fn set_private_data(
            &mut self,
            _: &str,
            _: &str,
            _: &str,
            _: Vec<u8>,
        ) -> Result<(), StateWriteError> {
            Ok(())
        }

        fn delete_private_data(&mut self, _: &str, _: &str, _: &str) -> Result<(), StateWriteError> {
            Ok(())
        }

        fn get_private_data_range(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<Box<dyn StateIterator>, StateReadError> {
            Ok(Box::new(VecIterator { entries: vec![] }))
        }

        fn execute_query(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Box<dyn StateIterator>, StateReadError> {
            Ok(Box::new(VecIterator { entries: vec![] }))
        }

        fn get_history_for_key(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Box<dyn StateIterator>, StateReadError> {
            Ok(Box::new(VecIterator { entries: vec![] }))
        }
    }

    struct VecIterator {
        entries: Vec<StateEntry>,
    }

    impl StateIterator for VecIterator {
        fn next(&mut self) -> Result<Option<StateEntry>, StateReadError> {
            if self.entries.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.entries.remove(0)))
            }
        }
    }

    fn params() -> TransactionParams {
        TransactionParams {
            channel_id: CHANNEL.to_string(),
            tx_id: TXID.to_string(),
            tx_simulator: Arc::new(Mutex::new(Box::new(NullSimulator))),
            proposal_decorations: HashMap::new(),
        }
    }

    #[test]
    fn duplicate_txid_is_rejected() {
        let contexts = TransactionContexts::new();

        let _receiver = contexts.create(&params()).expect("First create succeeds");
        match contexts.create(&params()) {
            Err(HandlerError::DuplicateTxId { tx_id, .. }) => assert_eq!(TXID, &tx_id),
            other => panic!("expected DuplicateTxId, got {:?}", other.map(|_| ())),
        }

        // after release the txid may be reused
        contexts.delete(CHANNEL, TXID);
        contexts
            .create(&params())
            .expect("Create succeeds after delete");
    }

    #[test]
    fn responses_are_correlated_by_channel_and_txid() {
        let contexts = TransactionContexts::new();
        let receiver = contexts.create(&params()).expect("Unable to create context");

        let stray = ChaincodeMessage::new(MessageType::Completed, CHANNEL, "other-tx", vec![]);
        assert!(!contexts.respond(stray), "unknown txid is not delivered");

        let matched = ChaincodeMessage::new(MessageType::Completed, CHANNEL, TXID, b"ok".to_vec());
        assert!(contexts.respond(matched.clone()));
        assert_eq!(matched, receiver.recv().expect("Waiter should see response"));
    }

    #[test]
    fn close_all_notifies_waiters() {
        let contexts = TransactionContexts::new();
        let receiver = contexts.create(&params()).expect("Unable to create context");

        contexts.close_all();

        let notice = receiver.recv().expect("Waiter should see teardown notice");
        assert_eq!(MessageType::Error, notice.message_type);
        assert_eq!(b"chaincode stream terminated".to_vec(), notice.payload);
    }

    #[test]
    fn chunked_iteration_reports_exhaustion() {
        let contexts = TransactionContexts::new();
        let _receiver = contexts.create(&params()).expect("Unable to create context");

        let entries: Vec<StateEntry> = (0..5)
            .map(|i| StateEntry {
                key: format!("k{}", i),
                value: vec![i as u8],
            })
            .collect();
        contexts
            .insert_iterator(CHANNEL, TXID, "iter-1", Box::new(VecIterator { entries }))
            .expect("Unable to insert iterator");

        let (chunk, has_more) = contexts
            .next_chunk(CHANNEL, TXID, "iter-1", 3)
            .expect("First chunk should succeed");
        assert_eq!(3, chunk.len());
        assert!(has_more);

        let (chunk, has_more) = contexts
            .next_chunk(CHANNEL, TXID, "iter-1", 3)
            .expect("Second chunk should succeed");
        assert_eq!(2, chunk.len());
        assert!(!has_more, "exhaustion is reported on the final chunk");

        match contexts.next_chunk(CHANNEL, TXID, "iter-1", 3) {
            Err(HandlerError::MissingIterator(_)) => (),
            other => panic!(
                "expected MissingIterator after exhaustion, got {:?}",
                other.map(|_| ())
            ),
        }
    }
}
