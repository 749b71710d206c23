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

//! The peer-facing entry points for chaincode execution.
//!
//! `ChaincodeSupport` binds the registry, launcher, lifecycle resolver, and
//! handlers together: `launch` ensures a chaincode is running, `invoke`
//! dispatches a transaction (deciding init-vs-transaction through
//! `check_init`), and `execute_legacy_init` serves the pre-lifecycle deploy
//! path.  It also owns the init-exactly-once rule: for every
//! `(chaincode, version)` with `init_required`, exactly one successful init
//! runs before any transaction.

pub mod error;

use std::sync::Arc;
use std::time::Duration;

use crate::handler::{
    AclProvider, ChaincodeStream, Handler, HandlerError, HandlerRegistry, Invoker,
    TransactionParams,
};
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::legacy::LegacyDefinition;
use crate::protocol::message::{
    ChaincodeEvent, ChaincodeInput, ChaincodeMessage, MessageType, Response,
};
use crate::runtime::{
    CertGenerator, ChaincodeContainerInfo, ContainerError, ContainerRuntime, Launcher, Processor,
    Runtime, RuntimeLauncher,
};
use crate::state::{QueryExecutor, StateIterator, StateReadError, TxSimulator};
use crate::store::ChaincodeStore;

pub use error::SupportError;

/// The reserved key in a chaincode's namespace which records the version
/// for which init last ran.  Init-exactly-once is enforced against this
/// key, so a chaincode is re-initialized when its backing code changes but
/// not when, say, only its endorsement policy does.
pub const INITIALIZED_KEY: &str = "\u{0}\u{0}initialized";

/// The reserved first argument that selects the init function.
pub const INIT_FUNCTION_NAME: &[u8] = b"init";

/// Configuration recognized by the execution core.  Parsing configuration
/// sources into this record is the embedding peer's concern.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stream liveness probe period; zero disables keepalive.
    pub keepalive: Duration,
    /// Per-invocation deadline.
    pub execute_timeout: Duration,
    /// Launch-to-ready deadline.
    pub startup_timeout: Duration,
    /// Dev mode: chaincode processes are started out-of-band by a
    /// developer and register unsolicited.
    pub user_runs_cc: bool,
    /// When false, no per-instance certificates are issued to containers.
    pub tls_enabled: bool,
    pub log_level: String,
    pub shim_log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            keepalive: Duration::from_secs(0),
            execute_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(300),
            user_runs_cc: false,
            tls_enabled: false,
            log_level: "info".to_string(),
            shim_log_level: "warning".to_string(),
            log_format: "text".to_string(),
        }
    }
}

/// The identity of the chaincode an invocation addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeContext {
    pub name: String,
    pub version: String,
    pub init_required: bool,
}

/// The per-channel application configuration this core consults.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationConfig {
    /// Whether the channel's capabilities enable the v2.0 lifecycle; when
    /// false, `check_init` is skipped entirely.
    pub lifecycle_v20: bool,
}

/// Provides per-channel application configuration.  Implemented outside
/// this library.
pub trait ApplicationConfigRetriever: Send + Sync {
    /// Returns the application config for a channel, or `None` when the
    /// channel is unknown.
    fn application_config(&self, channel_id: &str) -> Option<ApplicationConfig>;
}

/// Resolves chaincode definitions and the packages necessary to run them.
/// `lifecycle::Lifecycle` implements this over the definition store with a
/// legacy fallback.
pub trait Lifecycle: Send + Sync {
    fn chaincode_definition(
        &self,
        chaincode_name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<LegacyDefinition, LifecycleError>;

    fn chaincode_container_info(
        &self,
        chaincode_name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<ChaincodeContainerInfo, LifecycleError>;
}

impl Lifecycle for crate::lifecycle::Lifecycle {
    fn chaincode_definition(
        &self,
        chaincode_name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<LegacyDefinition, LifecycleError> {
        self.resolve_chaincode_definition(chaincode_name, qe)
    }

    fn chaincode_container_info(
        &self,
        chaincode_name: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<ChaincodeContainerInfo, LifecycleError> {
        self.resolve_chaincode_container_info(chaincode_name, qe)
    }
}

/// Presents a locked transaction simulator as the read-only query executor
/// the launch path wants.
struct SimulatorQueryExecutor<'a> {
    simulator: &'a (dyn TxSimulator + Send),
}

impl<'a> QueryExecutor for SimulatorQueryExecutor<'a> {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StateReadError> {
        self.simulator.get_state(namespace, key)
    }

    fn get_state_range(
        &self,
        namespace: &str,
        start: &str,
        end: &str,
    ) -> Result<Box<dyn StateIterator>, StateReadError> {
        self.simulator.get_state_range(namespace, start, end)
    }
}

/// Responsible for interfacing with chaincodes from the peer.
pub struct ChaincodeSupport {
    pub keepalive: Duration,
    pub execute_timeout: Duration,
    pub user_runs_cc: bool,
    pub runtime: Arc<dyn Runtime>,
    pub acl_provider: Arc<dyn AclProvider>,
    pub handler_registry: HandlerRegistry,
    pub launcher: Arc<dyn Launcher>,
    pub lifecycle: Arc<dyn Lifecycle>,
    pub app_config: Arc<dyn ApplicationConfigRetriever>,
}

impl ChaincodeSupport {
    /// Wires up the standard support: a `ContainerRuntime` over the given
    /// processor and a `RuntimeLauncher` over the given store, all sharing
    /// one handler registry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        peer_address: &str,
        ca_cert: Vec<u8>,
        cert_generator: Option<Arc<dyn CertGenerator>>,
        processor: Arc<dyn Processor>,
        chaincode_store: Arc<dyn ChaincodeStore>,
        lifecycle: Arc<dyn Lifecycle>,
        acl_provider: Arc<dyn AclProvider>,
        app_config: Arc<dyn ApplicationConfigRetriever>,
    ) -> Arc<ChaincodeSupport> {
        let handler_registry = HandlerRegistry::new(config.user_runs_cc);

        let runtime: Arc<dyn Runtime> = Arc::new(ContainerRuntime {
            cert_generator: if config.tls_enabled {
                cert_generator
            } else {
                None
            },
            processor,
            ca_cert,
            peer_address: peer_address.to_string(),
            common_env: vec![
                format!("CORE_CHAINCODE_LOGGING_LEVEL={}", config.log_level),
                format!("CORE_CHAINCODE_LOGGING_SHIM={}", config.shim_log_level),
                format!("CORE_CHAINCODE_LOGGING_FORMAT={}", config.log_format),
            ],
        });

        let launcher = Arc::new(RuntimeLauncher {
            runtime: Arc::clone(&runtime),
            registry: handler_registry.clone(),
            chaincode_store,
            startup_timeout: config.startup_timeout,
        });

        Arc::new(ChaincodeSupport {
            keepalive: config.keepalive,
            execute_timeout: config.execute_timeout,
            user_runs_cc: config.user_runs_cc,
            runtime,
            acl_provider,
            handler_registry,
            launcher,
            lifecycle,
            app_config,
        })
    }

    /// Starts executing chaincode if it is not already running, blocking
    /// until the handler reaches ready.  If the chaincode is already
    /// running its handler is returned immediately.
    pub fn launch(
        &self,
        channel_id: &str,
        chaincode_name: &str,
        chaincode_version: &str,
        qe: &dyn QueryExecutor,
    ) -> Result<Arc<Handler>, SupportError> {
        let cname = format!("{}:{}", chaincode_name, chaincode_version);
        if let Some(handler) = self.handler_registry.handler(&cname) {
            return Ok(handler);
        }

        let ccci = self
            .lifecycle
            .chaincode_container_info(chaincode_name, qe)
            .map_err(|err| {
                if self.user_runs_cc {
                    error!(
                        "You are attempting to perform an action other than Deploy on Chaincode \
                         that is not ready and you are in developer mode. Did you forget to Deploy \
                         your chaincode?"
                    );
                }
                SupportError::Lifecycle {
                    context: format!(
                        "[channel {}] failed to get chaincode container info for {}",
                        channel_id, cname
                    ),
                    source: err,
                }
            })?;

        self.launcher
            .launch(&ccci)
            .map_err(|err| SupportError::Launch {
                context: format!(
                    "[channel {}] could not launch chaincode {}",
                    channel_id, cname
                ),
                source: err,
            })?;

        self.handler_registry
            .handler(&cname)
            .ok_or_else(|| SupportError::MissingHandler {
                channel_id: channel_id.to_string(),
                cname,
            })
    }

    /// Launches a chaincode from container info alone, bypassing the
    /// definition store.  Used by the legacy deploy path, where the
    /// chaincode is not yet defined on any channel.
    pub fn launch_init(&self, ccci: &ChaincodeContainerInfo) -> Result<(), SupportError> {
        if self.handler_registry.handler(&ccci.cname()).is_some() {
            return Ok(());
        }

        self.launcher
            .launch(ccci)
            .map_err(|err| SupportError::Launch {
                context: format!("could not launch chaincode {}", ccci.cname()),
                source: err,
            })
    }

    /// Stops a chaincode if running.
    pub fn stop(&self, ccci: &ChaincodeContainerInfo) -> Result<(), ContainerError> {
        self.runtime.stop(ccci)
    }

    /// The entry point transports call once per accepted chaincode stream.
    /// Owns the calling thread for the life of the connection.
    pub fn handle_chaincode_stream(
        self: Arc<Self>,
        stream: Arc<dyn ChaincodeStream>,
    ) -> Result<(), HandlerError> {
        let handler = Arc::new(Handler::new(
            stream,
            self.handler_registry.clone(),
            Arc::clone(&self.acl_provider),
            Arc::clone(&self) as Arc<dyn Invoker>,
            self.keepalive,
        ));
        handler.process_stream()
    }

    /// Invokes chaincode and returns the terminal message.  The chaincode
    /// is launched if it is not already running; whether the dispatch is an
    /// init is decided by `check_init`.
    pub fn invoke(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        input: &ChaincodeInput,
    ) -> Result<ChaincodeMessage, SupportError> {
        let handler = self.launch_for(tx_params, cccid)?;

        let is_init = self.check_init(tx_params, cccid, input)?;
        let message_type = if is_init {
            MessageType::Init
        } else {
            MessageType::Transaction
        };

        self.execute_message(message_type, tx_params, cccid, input, &handler)
    }

    /// Invokes chaincode init directly, for callers that already know the
    /// dispatch must be an init.
    pub fn invoke_init(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        input: &ChaincodeInput,
    ) -> Result<ChaincodeMessage, SupportError> {
        let handler = self.launch_for(tx_params, cccid)?;
        self.execute_message(MessageType::Init, tx_params, cccid, input, &handler)
    }

    /// Invokes chaincode and translates the terminal message into the
    /// chaincode's response record.
    pub fn execute(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        input: &ChaincodeInput,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
        let message = self.invoke(tx_params, cccid, input)?;
        process_execution_result(&tx_params.tx_id, &cccid.name, message)
    }

    /// The legacy install-and-init path: launches from the given container
    /// info and dispatches an init, all without consulting the definition
    /// store.
    pub fn execute_legacy_init(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        ccci: &ChaincodeContainerInfo,
        input: &ChaincodeInput,
    ) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
        let mut ccci = ccci.clone();
        ccci.version = cccid.version.clone();

        self.launch_init(&ccci)?;

        let cname = ccci.cname();
        let handler =
            self.handler_registry
                .handler(&cname)
                .ok_or_else(|| SupportError::MissingHandler {
                    channel_id: tx_params.channel_id.clone(),
                    cname,
                })?;

        let message =
            self.execute_message(MessageType::Init, tx_params, cccid, input, &handler)?;
        process_execution_result(&tx_params.tx_id, &cccid.name, message)
    }

    /// Decides whether this invocation is the chaincode's init, enforcing
    /// init-exactly-once per (chaincode, version).
    ///
    /// Invocations with an empty channel id are assumed to be system
    /// chaincode calls and bypass the check entirely; callers must uphold
    /// that invariant.  The check is also skipped when the channel's
    /// capabilities do not enable the v2.0 lifecycle, or when the chaincode
    /// does not require init (an explicit "init" argument is then treated
    /// as an ordinary invocation).
    ///
    /// The marker write happens under the caller's simulator, so
    /// concurrent inits race at commit time, not here.
    pub fn check_init(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        input: &ChaincodeInput,
    ) -> Result<bool, SupportError> {
        if tx_params.channel_id.is_empty() {
            return Ok(false);
        }

        let app_config = self
            .app_config
            .application_config(&tx_params.channel_id)
            .ok_or_else(|| {
                SupportError::MissingApplicationConfig(tx_params.channel_id.clone())
            })?;

        if !app_config.lifecycle_v20 {
            return Ok(false);
        }

        if !cccid.init_required {
            return Ok(false);
        }

        let is_init = input
            .args
            .first()
            .map(|arg| arg.as_slice() == INIT_FUNCTION_NAME)
            .unwrap_or(false);

        let mut simulator = tx_params
            .tx_simulator
            .lock()
            .expect("tx simulator mutex is poisoned");

        let stored = simulator
            .get_state(&cccid.name, INITIALIZED_KEY)
            .map_err(|err| {
                SupportError::State(format!("could not get 'initialized' key: {}", err))
            })?;
        let needs_initialization = stored.as_deref() != Some(cccid.version.as_bytes());

        match (is_init, needs_initialization) {
            (false, false) => Ok(false),
            (false, true) => Err(SupportError::NotInitialized(cccid.name.clone())),
            (true, false) => Err(SupportError::AlreadyInitialized(cccid.name.clone())),
            (true, true) => {
                simulator
                    .set_state(
                        &cccid.name,
                        INITIALIZED_KEY,
                        cccid.version.as_bytes().to_vec(),
                    )
                    .map_err(|err| {
                        SupportError::State(format!("could not set 'initialized' key: {}", err))
                    })?;
                Ok(true)
            }
        }
    }

    fn launch_for(
        &self,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
    ) -> Result<Arc<Handler>, SupportError> {
        let simulator = tx_params
            .tx_simulator
            .lock()
            .expect("tx simulator mutex is poisoned");
        let qe = SimulatorQueryExecutor {
            simulator: &**simulator,
        };
        self.launch(&tx_params.channel_id, &cccid.name, &cccid.version, &qe)
    }

    fn execute_message(
        &self,
        message_type: MessageType,
        tx_params: &TransactionParams,
        cccid: &ChaincodeContext,
        input: &ChaincodeInput,
        handler: &Arc<Handler>,
    ) -> Result<ChaincodeMessage, SupportError> {
        let mut input = input.clone();
        input.decorations = tx_params
            .proposal_decorations
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let payload = input.to_bytes().map_err(|err| SupportError::Payload {
            context: "failed to create chaincode message".to_string(),
            source: err,
        })?;

        let message = ChaincodeMessage::new(
            message_type,
            &tx_params.channel_id,
            &tx_params.tx_id,
            payload,
        );

        handler
            .execute(tx_params, cccid, message, self.execute_timeout)
            .map_err(|err| SupportError::Handler {
                context: format!("error sending to chaincode {}", cccid.name),
                source: err,
            })
    }
}

impl Invoker for ChaincodeSupport {
    /// Serves a chaincode-to-chaincode call: resolves the target's current
    /// definition to learn its version and init requirement, then runs the
    /// ordinary invocation path under the originating transaction.
    fn invoke(
        &self,
        tx_params: &TransactionParams,
        chaincode_name: &str,
        input: &ChaincodeInput,
    ) -> Result<ChaincodeMessage, Box<dyn std::error::Error + Send>> {
        let definition = {
            let simulator = tx_params
                .tx_simulator
                .lock()
                .expect("tx simulator mutex is poisoned");
            let qe = SimulatorQueryExecutor {
                simulator: &**simulator,
            };
            self.lifecycle
                .chaincode_definition(chaincode_name, &qe)
                .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send>)?
        };

        let cccid = ChaincodeContext {
            name: chaincode_name.to_string(),
            version: definition.version,
            init_required: definition.requires_init,
        };

        ChaincodeSupport::invoke(self, tx_params, &cccid, input)
            .map_err(|err| Box::new(err) as Box<dyn std::error::Error + Send>)
    }
}

/// Translates a terminal chaincode message into the chaincode's response
/// record, stamping any embedded event with the chaincode name and
/// transaction id.
pub fn process_execution_result(
    tx_id: &str,
    chaincode_name: &str,
    mut message: ChaincodeMessage,
) -> Result<(Response, Option<ChaincodeEvent>), SupportError> {
    if let Some(event) = message.chaincode_event.as_mut() {
        event.chaincode_id = chaincode_name.to_string();
        event.tx_id = tx_id.to_string();
    }

    match message.message_type {
        MessageType::Completed => {
            let response =
                Response::from_bytes(&message.payload).map_err(|err| SupportError::Payload {
                    context: format!("failed to unmarshal response for transaction {}", tx_id),
                    source: err,
                })?;
            Ok((response, message.chaincode_event))
        }
        MessageType::Error => Err(SupportError::TransactionFailure(
            String::from_utf8_lossy(&message.payload).to_string(),
        )),
        other => Err(SupportError::UnexpectedResponseType {
            message_type: other.to_string(),
            tx_id: tx_id.to_string(),
        }),
    }
}
