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

//! Chaincode is a library implementing the chaincode lifecycle and execution
//! core of a permissioned distributed ledger peer.
//!
//! The lifecycle half implements the sequence-numbered protocol by which the
//! organizations on a channel propose, approve, and commit chaincode
//! definitions into the channel's world state.  The execution half implements
//! the peer-side controller which launches chaincode processes on demand,
//! multiplexes a bidirectional message stream with each running instance, and
//! dispatches transaction invocations through a per-transaction state machine.
//!
//! The ledger itself, the ordering service, the container provisioner, and
//! the cryptographic material providers are all consumed through traits; this
//! library implements none of them.

pub mod handler;
pub mod lifecycle;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod store;
pub mod support;

#[macro_use]
extern crate log;
