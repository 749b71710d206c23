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

//! The process-wide registry of chaincode handlers.
//!
//! The registry tracks, per `name:version`, either a live handler or a
//! launch-in-progress marker.  Concurrent launch attempts for the same
//! chaincode rendezvous on the marker's completion signal; exactly one
//! caller is the first launcher and owes the signal a completion.  A failed
//! launch removes the marker, so the next attempt starts fresh.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::error::HandlerError;
use super::Handler;

/// A one-shot completion signal for a launch in progress.  The first
/// completion wins; later completions are ignored.
pub struct LaunchSignal {
    outcome: Mutex<Option<Result<(), String>>>,
    cond: Condvar,
}

impl LaunchSignal {
    fn new() -> Arc<Self> {
        Arc::new(LaunchSignal {
            outcome: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// A signal that is already complete, for handlers registered
    /// out-of-band in dev mode.
    fn complete() -> Arc<Self> {
        Arc::new(LaunchSignal {
            outcome: Mutex::new(Some(Ok(()))),
            cond: Condvar::new(),
        })
    }

    pub fn notify(&self, result: Result<(), String>) {
        let mut outcome = self.outcome.lock().expect("LaunchSignal mutex is poisoned");
        if outcome.is_none() {
            *outcome = Some(result);
            self.cond.notify_all();
        }
    }

    /// Waits for the launch to complete, up to `timeout`.  Returns `None`
    /// if the signal is still pending when the timeout expires.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), String>> {
        let outcome = self.outcome.lock().expect("LaunchSignal mutex is poisoned");
        let (outcome, _) = self
            .cond
            .wait_timeout_while(outcome, timeout, |outcome| outcome.is_none())
            .expect("LaunchSignal mutex is poisoned");
        outcome.clone()
    }
}

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<String, Arc<Handler>>,
    launching: HashMap<String, Arc<LaunchSignal>>,
}

/// Tracks live handlers and launches in progress, keyed by `name:version`.
#[derive(Clone)]
pub struct HandlerRegistry {
    state: Arc<Mutex<RegistryState>>,
    /// Dev mode: chaincode processes are started out-of-band by a
    /// developer, so registrations arrive with no launch in progress and
    /// launches of already-registered chaincodes complete immediately.
    allow_unsolicited: bool,
}

impl HandlerRegistry {
    pub fn new(allow_unsolicited: bool) -> Self {
        HandlerRegistry {
            state: Arc::new(Mutex::new(RegistryState::default())),
            allow_unsolicited,
        }
    }

    /// Joins or starts a launch for `cname`.  Returns the launch's
    /// completion signal, and true if the caller is the first launcher and
    /// therefore must complete the signal exactly once.
    pub fn launching(&self, cname: &str) -> (Arc<LaunchSignal>, bool) {
        let mut state = self.state.lock().expect("HandlerRegistry mutex is poisoned");

        if self.allow_unsolicited && state.handlers.contains_key(cname) {
            return (LaunchSignal::complete(), false);
        }

        if let Some(signal) = state.launching.get(cname) {
            return (Arc::clone(signal), false);
        }

        let signal = LaunchSignal::new();
        state.launching.insert(cname.to_string(), Arc::clone(&signal));
        (signal, true)
    }

    /// Completes the launch for `cname` successfully and removes its
    /// marker.  Called when the chaincode's handler reaches ready.  A ready
    /// notification with no launch in progress (dev mode, out-of-band
    /// registration) is ignored.
    pub fn ready(&self, cname: &str) {
        let signal = self
            .state
            .lock()
            .expect("HandlerRegistry mutex is poisoned")
            .launching
            .remove(cname);
        if let Some(signal) = signal {
            signal.notify(Ok(()));
        }
    }

    /// Fails the launch for `cname` and removes its marker so the next
    /// launch attempt starts fresh.
    pub fn failed(&self, cname: &str, error: String) {
        let signal = self
            .state
            .lock()
            .expect("HandlerRegistry mutex is poisoned")
            .launching
            .remove(cname);
        if let Some(signal) = signal {
            signal.notify(Err(error));
        }
    }

    /// Binds a handler to its chaincode name.  Fails, without disturbing
    /// the existing handler, if one is already registered under the name.
    pub fn register(&self, cname: &str, handler: Arc<Handler>) -> Result<(), HandlerError> {
        let mut state = self.state.lock().expect("HandlerRegistry mutex is poisoned");
        if state.handlers.contains_key(cname) {
            return Err(HandlerError::AlreadyRegistered(cname.to_string()));
        }
        debug!("registered handler for {}", cname);
        state.handlers.insert(cname.to_string(), handler);
        Ok(())
    }

    /// Removes the handler registered under `cname`, typically on stream
    /// termination.
    pub fn deregister(&self, cname: &str) -> Result<(), HandlerError> {
        let removed = self
            .state
            .lock()
            .expect("HandlerRegistry mutex is poisoned")
            .handlers
            .remove(cname);
        match removed {
            Some(_) => {
                debug!("deregistered handler for {}", cname);
                Ok(())
            }
            None => Err(HandlerError::Protocol(format!(
                "could not deregister {}: no handler registered",
                cname
            ))),
        }
    }

    /// Returns the live handler for `cname`, if any.
    pub fn handler(&self, cname: &str) -> Option<Arc<Handler>> {
        self.state
            .lock()
            .expect("HandlerRegistry mutex is poisoned")
            .handlers
            .get(cname)
            .cloned()
    }
}
