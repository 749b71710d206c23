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

//! Reconciles "should be running" with "is running".
//!
//! `launch` is re-entrant: concurrent callers for the same chaincode
//! rendezvous on the registry's launch-in-progress marker, and only the
//! first arrival starts a container.  A failed launch stops the container,
//! fails the marker for every waiter, and removes it, so nothing is
//! poisoned for the next attempt.

use std::sync::Arc;
use std::time::Duration;

use crate::handler::registry::{HandlerRegistry, LaunchSignal};
use crate::store::ChaincodeStore;

use super::error::LaunchError;
use super::{ChaincodeContainerInfo, Runtime};

/// Launches chaincode runtimes.
pub trait Launcher: Send + Sync {
    /// Ensures a chaincode matching `ccci` is running and has reached
    /// ready.  Blocks up to the startup timeout.
    fn launch(&self, ccci: &ChaincodeContainerInfo) -> Result<(), LaunchError>;
}

pub struct RuntimeLauncher {
    pub runtime: Arc<dyn Runtime>,
    pub registry: HandlerRegistry,
    pub chaincode_store: Arc<dyn ChaincodeStore>,
    pub startup_timeout: Duration,
}

impl RuntimeLauncher {
    fn start_and_wait(
        &self,
        ccci: &ChaincodeContainerInfo,
        signal: &Arc<LaunchSignal>,
        cname: &str,
    ) -> Result<(), LaunchError> {
        let (code_package, _) =
            self.chaincode_store
                .load(&ccci.package_id)
                .map_err(|err| LaunchError::Package {
                    context: format!("failed to get chaincode package for {}", cname),
                    source: err,
                })?;

        self.runtime
            .start(ccci, &code_package)
            .map_err(|err| LaunchError::Container {
                context: format!("error starting container for {}", cname),
                source: err,
            })?;

        // completed by the registry when the handler registers and reports
        // ready
        match signal.wait_timeout(self.startup_timeout) {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(LaunchError::Failed {
                cname: cname.to_string(),
                message,
            }),
            None => Err(LaunchError::Timeout(cname.to_string())),
        }
    }
}

impl Launcher for RuntimeLauncher {
    fn launch(&self, ccci: &ChaincodeContainerInfo) -> Result<(), LaunchError> {
        let cname = ccci.cname();
        let (signal, first_launcher) = self.registry.launching(&cname);

        if !first_launcher {
            return match signal.wait_timeout(self.startup_timeout) {
                Some(Ok(())) => Ok(()),
                Some(Err(message)) => Err(LaunchError::Failed { cname, message }),
                None => Err(LaunchError::Timeout(cname)),
            };
        }

        match self.start_and_wait(ccci, &signal, &cname) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(stop_err) = self.runtime.stop(ccci) {
                    debug!("stop failed during launch cleanup for {}: {}", cname, stop_err);
                }
                self.registry.failed(&cname, err.to_string());
                Err(err)
            }
        }
    }
}
