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

//! The per-stream chaincode handler.
//!
//! Each running chaincode connects to the peer over a bidirectional message
//! stream, and each stream is owned by one `Handler`: a state machine that
//! moves through `Created -> Established -> Ready` as the chaincode
//! registers and reports readiness, then multiplexes the stream for the
//! rest of the process lifetime.
//!
//! While ready, the handler serves two flows at once.  Outbound, the peer
//! dispatches `INIT`/`TRANSACTION` requests and waits for the correlated
//! terminal response, bounded by the execute timeout.  Inbound, the
//! chaincode issues ledger requests (state reads and writes, range and rich
//! queries, history, private data, chaincode-to-chaincode invocation); each
//! is checked against the ACL provider, run against the originating
//! transaction's simulator, and answered on the stream under the same
//! `(channel, txid)`.
//!
//! A single dispatcher thread reads one message at a time and routes it;
//! the stream writer is serialized under a lock and never shared bare.

pub mod contexts;
pub mod error;
pub mod query;
pub mod registry;

use std::error::Error;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::protocol::message::{
    ChaincodeId, ChaincodeInput, ChaincodeMessage, InvokeChaincodePayload, KeyPayload,
    MessageType, PutStatePayload, QueryPayload, QueryResponse, QueryStatePayload, RangePayload,
};
use crate::support::ChaincodeContext;

pub use contexts::{TransactionContexts, TransactionParams};
pub use error::{HandlerError, StreamError};
pub use query::QueryResponseBuilder;
pub use registry::{HandlerRegistry, LaunchSignal};

/// The transport under a handler: one bidirectional, blocking message
/// stream per running chaincode.  `recv` returns `Ok(None)` on clean
/// closure.  Implementations are shared between the handler's reader and
/// writer and must be internally synchronized.
pub trait ChaincodeStream: Send + Sync {
    fn send(&self, message: ChaincodeMessage) -> Result<(), StreamError>;
    fn recv(&self) -> Result<Option<ChaincodeMessage>, StreamError>;
}

/// Decides whether a chaincode-issued request may touch the named resource
/// on a channel.  Implemented outside this library.
pub trait AclProvider: Send + Sync {
    fn check_acl(&self, resource: &str, channel_id: &str, tx_id: &str) -> Result<(), String>;
}

/// Dispatches a chaincode-to-chaincode invocation back through the peer's
/// invocation path.
pub trait Invoker: Send + Sync {
    fn invoke(
        &self,
        tx_params: &TransactionParams,
        chaincode_name: &str,
        input: &ChaincodeInput,
    ) -> Result<ChaincodeMessage, Box<dyn Error + Send>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Created,
    Established,
    Ready,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// The state machine and stream owner for one running chaincode process.
pub struct Handler {
    keepalive: Duration,
    registry: HandlerRegistry,
    acl_provider: Arc<dyn AclProvider>,
    invoker: Arc<dyn Invoker>,
    tx_contexts: TransactionContexts,
    query_response_builder: QueryResponseBuilder,
    stream: Arc<dyn ChaincodeStream>,
    send_lock: Mutex<()>,
    state: Mutex<State>,
    chaincode_id: Mutex<Option<ChaincodeId>>,
    registered: Mutex<bool>,
}

impl Handler {
    pub fn new(
        stream: Arc<dyn ChaincodeStream>,
        registry: HandlerRegistry,
        acl_provider: Arc<dyn AclProvider>,
        invoker: Arc<dyn Invoker>,
        keepalive: Duration,
    ) -> Handler {
        Handler {
            keepalive,
            registry,
            acl_provider,
            invoker,
            tx_contexts: TransactionContexts::new(),
            query_response_builder: QueryResponseBuilder::default(),
            stream,
            send_lock: Mutex::new(()),
            state: Mutex::new(State::Created),
            chaincode_id: Mutex::new(None),
            registered: Mutex::new(false),
        }
    }

    /// The identity the chaincode registered under, once established.
    pub fn chaincode_id(&self) -> Option<ChaincodeId> {
        self.chaincode_id
            .lock()
            .expect("Handler chaincode_id mutex is poisoned")
            .clone()
    }

    fn cname(&self) -> Option<String> {
        self.chaincode_id()
            .map(|id| format!("{}:{}", id.name, id.version))
    }

    fn chaincode_name(&self) -> String {
        self.chaincode_id()
            .map(|id| id.name)
            .unwrap_or_default()
    }

    /// Drives the stream until it closes or fails.  This call owns the
    /// calling thread for the life of the chaincode connection; transports
    /// invoke it once per accepted stream.
    pub fn process_stream(self: Arc<Self>) -> Result<(), HandlerError> {
        let (sender, receiver) = channel();
        let stream = Arc::clone(&self.stream);

        // The reader forwards stream messages into a channel so the
        // dispatch loop can also observe keepalive deadlines.  It is not
        // joined: it parks in recv until the transport closes, and exits
        // when its send fails after the dispatch loop has gone away.
        thread::Builder::new()
            .name("chaincode_stream_reader".to_string())
            .spawn(move || loop {
                match stream.recv() {
                    Ok(Some(message)) => {
                        if sender.send(Ok(Some(message))).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        if sender.send(Ok(None)).is_err() {
                            debug!("stream closed after dispatch loop exit");
                        }
                        break;
                    }
                    Err(err) => {
                        if sender.send(Err(err)).is_err() {
                            debug!("stream failed after dispatch loop exit");
                        }
                        break;
                    }
                }
            })
            .map_err(|err| HandlerError::Stream(format!("could not start reader: {}", err)))?;

        let result = loop {
            let next = if self.keepalive.as_millis() == 0 {
                receiver
                    .recv()
                    .map_err(|_| HandlerError::Stream("stream reader terminated".to_string()))
            } else {
                match receiver.recv_timeout(self.keepalive) {
                    Ok(next) => Ok(next),
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = self.serial_send(ChaincodeMessage::new(
                            MessageType::Keepalive,
                            "",
                            "",
                            vec![],
                        )) {
                            break Err(err);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        Err(HandlerError::Stream("stream reader terminated".to_string()))
                    }
                }
            };

            match next {
                Ok(Ok(Some(message))) => {
                    if let Err(err) = Self::handle_message(&self, message) {
                        break Err(err);
                    }
                }
                Ok(Ok(None)) => break Ok(()),
                Ok(Err(err)) => break Err(HandlerError::Stream(err.to_string())),
                Err(err) => break Err(err),
            }
        };

        self.cleanup();
        result
    }

    /// Dispatches an `INIT` or `TRANSACTION` to the chaincode and waits for
    /// the correlated terminal response.
    ///
    /// On timeout the transaction context is released and an error
    /// returned, but the handler stays alive; a response arriving after
    /// that is uncorrelated and discarded.
    pub fn execute(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        message: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let receiver = self.tx_contexts.create(tx_params)?;

        if let Err(err) = self.serial_send(message) {
            self.tx_contexts
                .delete(&tx_params.channel_id, &tx_params.tx_id);
            return Err(err);
        }

        let result = receiver.recv_timeout(timeout);
        self.tx_contexts
            .delete(&tx_params.channel_id, &tx_params.tx_id);

        result.map_err(|_| HandlerError::ExecutionTimeout {
            chaincode: cccid.name.clone(),
            tx_id: tx_params.tx_id.clone(),
        })
    }

    fn handle_message(handler: &Arc<Handler>, message: ChaincodeMessage) -> Result<(), HandlerError> {
        let state = *handler
            .state
            .lock()
            .expect("Handler state mutex is poisoned");
        match state {
            State::Created => Self::handle_created(handler, message),
            State::Established => handler.handle_established(message),
            State::Ready => handler.handle_ready(message),
        }
    }

    fn handle_created(
        handler: &Arc<Handler>,
        message: ChaincodeMessage,
    ) -> Result<(), HandlerError> {
        match message.message_type {
            MessageType::Register => {
                let id = ChaincodeId::from_bytes(&message.payload)?;
                let cname = format!("{}:{}", id.name, id.version);

                *handler
                    .chaincode_id
                    .lock()
                    .expect("Handler chaincode_id mutex is poisoned") = Some(id);

                handler.registry.register(&cname, Arc::clone(handler))?;
                *handler
                    .registered
                    .lock()
                    .expect("Handler registered mutex is poisoned") = true;

                handler.serial_send(ChaincodeMessage::new(
                    MessageType::Registered,
                    "",
                    "",
                    vec![],
                ))?;

                *handler
                    .state
                    .lock()
                    .expect("Handler state mutex is poisoned") = State::Established;
                Ok(())
            }
            other => Err(HandlerError::Protocol(format!(
                "expected REGISTER, received {}",
                other
            ))),
        }
    }

    fn handle_established(&self, message: ChaincodeMessage) -> Result<(), HandlerError> {
        match message.message_type {
            MessageType::Ready => {
                *self.state.lock().expect("Handler state mutex is poisoned") = State::Ready;
                if let Some(cname) = self.cname() {
                    self.registry.ready(&cname);
                }
                Ok(())
            }
            MessageType::Keepalive => Ok(()),
            other => Err(HandlerError::Protocol(format!(
                "expected READY, received {}",
                other
            ))),
        }
    }

    fn handle_ready(&self, message: ChaincodeMessage) -> Result<(), HandlerError> {
        match message.message_type {
            MessageType::Keepalive => Ok(()),
            MessageType::Completed | MessageType::Error => {
                let channel_id = message.channel_id.clone();
                let txid = message.txid.clone();
                if !self.tx_contexts.respond(message) {
                    warn!(
                        "discarding uncorrelated {} response for ({}, {})",
                        self.chaincode_name(),
                        channel_id,
                        txid
                    );
                }
                Ok(())
            }
            MessageType::GetState
            | MessageType::PutState
            | MessageType::DelState
            | MessageType::GetStateByRange
            | MessageType::QueryStateNext
            | MessageType::QueryStateClose
            | MessageType::GetQueryResult
            | MessageType::GetHistoryForKey
            | MessageType::InvokeChaincode => self.handle_chaincode_request(message),
            other => Err(HandlerError::Protocol(format!(
                "unexpected message type {} in ready state",
                other
            ))),
        }
    }

    /// Serves one inbound request from the chaincode.  Failures are
    /// answered with an `ERROR` message rather than terminating the
    /// handler; only a failure to write the stream is fatal.
    fn handle_chaincode_request(&self, message: ChaincodeMessage) -> Result<(), HandlerError> {
        let reply = match self.process_request(&message) {
            Ok(payload) => ChaincodeMessage::new(
                MessageType::Response,
                &message.channel_id,
                &message.txid,
                payload,
            ),
            Err(err) => {
                debug!(
                    "{} request for ({}, {}) failed: {}",
                    message.message_type, message.channel_id, message.txid, err
                );
                ChaincodeMessage::new(
                    MessageType::Error,
                    &message.channel_id,
                    &message.txid,
                    err.to_string().into_bytes(),
                )
            }
        };

        self.serial_send(reply)
    }

    fn process_request(&self, message: &ChaincodeMessage) -> Result<Vec<u8>, HandlerError> {
        self.acl_provider
            .check_acl(
                &message.message_type.to_string(),
                &message.channel_id,
                &message.txid,
            )
            .map_err(HandlerError::AclViolation)?;

        let simulator = self
            .tx_contexts
            .simulator(&message.channel_id, &message.txid)
            .ok_or_else(|| HandlerError::MissingContext {
                channel_id: message.channel_id.clone(),
                tx_id: message.txid.clone(),
            })?;

        let namespace = self.chaincode_name();

        match message.message_type {
            MessageType::GetState => {
                let payload = KeyPayload::from_bytes(&message.payload)?;
                let simulator = simulator.lock().expect("simulator mutex is poisoned");
                let value = match &payload.collection {
                    Some(collection) => {
                        simulator.get_private_data(&namespace, collection, &payload.key)
                    }
                    None => simulator.get_state(&namespace, &payload.key),
                }
                .map_err(|err| HandlerError::Simulation(err.to_string()))?;
                Ok(value.unwrap_or_default())
            }
            MessageType::PutState => {
                let payload = PutStatePayload::from_bytes(&message.payload)?;
                let mut simulator = simulator.lock().expect("simulator mutex is poisoned");
                match &payload.collection {
                    Some(collection) => simulator.set_private_data(
                        &namespace,
                        collection,
                        &payload.key,
                        payload.value,
                    ),
                    None => simulator.set_state(&namespace, &payload.key, payload.value),
                }
                .map_err(|err| HandlerError::Simulation(err.to_string()))?;
                Ok(vec![])
            }
            MessageType::DelState => {
                let payload = KeyPayload::from_bytes(&message.payload)?;
                let mut simulator = simulator.lock().expect("simulator mutex is poisoned");
                match &payload.collection {
                    Some(collection) => {
                        simulator.delete_private_data(&namespace, collection, &payload.key)
                    }
                    None => simulator.delete_state(&namespace, &payload.key),
                }
                .map_err(|err| HandlerError::Simulation(err.to_string()))?;
                Ok(vec![])
            }
            MessageType::GetStateByRange => {
                let payload = RangePayload::from_bytes(&message.payload)?;
                let iterator = {
                    let simulator = simulator.lock().expect("simulator mutex is poisoned");
                    match &payload.collection {
                        Some(collection) => simulator.get_private_data_range(
                            &namespace,
                            collection,
                            &payload.start,
                            &payload.end,
                        ),
                        None => {
                            simulator.get_state_range(&namespace, &payload.start, &payload.end)
                        }
                    }
                    .map_err(|err| HandlerError::Simulation(err.to_string()))?
                };
                self.start_query(message, iterator)
            }
            MessageType::GetQueryResult => {
                let payload = QueryPayload::from_bytes(&message.payload)?;
                let iterator = {
                    let simulator = simulator.lock().expect("simulator mutex is poisoned");
                    simulator
                        .execute_query(&namespace, &payload.query)
                        .map_err(|err| HandlerError::Simulation(err.to_string()))?
                };
                self.start_query(message, iterator)
            }
            MessageType::GetHistoryForKey => {
                let payload = KeyPayload::from_bytes(&message.payload)?;
                let iterator = {
                    let simulator = simulator.lock().expect("simulator mutex is poisoned");
                    simulator
                        .get_history_for_key(&namespace, &payload.key)
                        .map_err(|err| HandlerError::Simulation(err.to_string()))?
                };
                self.start_query(message, iterator)
            }
            MessageType::QueryStateNext => {
                let payload = QueryStatePayload::from_bytes(&message.payload)?;
                let response = self.query_response_builder.build(
                    &self.tx_contexts,
                    &message.channel_id,
                    &message.txid,
                    &payload.id,
                )?;
                Ok(response.to_bytes()?)
            }
            MessageType::QueryStateClose => {
                let payload = QueryStatePayload::from_bytes(&message.payload)?;
                self.tx_contexts
                    .close_iterator(&message.channel_id, &message.txid, &payload.id);
                let response = QueryResponse {
                    results: vec![],
                    has_more: false,
                    id: payload.id,
                };
                Ok(response.to_bytes()?)
            }
            MessageType::InvokeChaincode => {
                let payload = InvokeChaincodePayload::from_bytes(&message.payload)?;
                let tx_params = TransactionParams {
                    channel_id: message.channel_id.clone(),
                    tx_id: message.txid.clone(),
                    tx_simulator: simulator,
                    proposal_decorations: Default::default(),
                };
                let inner = self
                    .invoker
                    .invoke(&tx_params, &payload.chaincode_name, &payload.input)
                    .map_err(|err| HandlerError::Simulation(err.to_string()))?;
                match inner.message_type {
                    MessageType::Completed => Ok(inner.payload),
                    MessageType::Error => Err(HandlerError::Simulation(
                        String::from_utf8_lossy(&inner.payload).to_string(),
                    )),
                    other => Err(HandlerError::Protocol(format!(
                        "unexpected terminal type {} from nested invocation",
                        other
                    ))),
                }
            }
            _ => unreachable!("filtered by handle_ready"),
        }
    }

    fn start_query(
        &self,
        message: &ChaincodeMessage,
        iterator: Box<dyn crate::state::StateIterator>,
    ) -> Result<Vec<u8>, HandlerError> {
        let iterator_id = Uuid::new_v4().to_string();
        self.tx_contexts.insert_iterator(
            &message.channel_id,
            &message.txid,
            &iterator_id,
            iterator,
        )?;
        let response = self.query_response_builder.build(
            &self.tx_contexts,
            &message.channel_id,
            &message.txid,
            &iterator_id,
        )?;
        Ok(response.to_bytes()?)
    }

    fn serial_send(&self, message: ChaincodeMessage) -> Result<(), HandlerError> {
        let _guard = self.send_lock.lock().expect("Handler send lock is poisoned");
        self.stream
            .send(message)
            .map_err(|err| HandlerError::Stream(err.to_string()))
    }

    fn cleanup(&self) {
        self.tx_contexts.close_all();

        let registered = *self
            .registered
            .lock()
            .expect("Handler registered mutex is poisoned");
        if registered {
            if let Some(cname) = self.cname() {
                if let Err(err) = self.registry.deregister(&cname) {
                    warn!("during handler cleanup for {}: {}", cname, err);
                }
            }
        }
    }
}
