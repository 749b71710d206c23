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

//! Chaincode runtime management.
//!
//! A `Runtime` starts, stops, and waits on chaincode instances.  The
//! concrete process machinery (docker, a native exec, anything able to run
//! a package) lives behind the `Processor` trait; `ContainerRuntime`'s job
//! is assembling what every chaincode process needs regardless of how it is
//! run: its identity, the peer address to dial back, the logging
//! environment, and TLS material when enabled.

pub mod error;
pub mod launcher;

use std::collections::HashMap;
use std::sync::Arc;

pub use error::{ContainerError, LaunchError};
pub use launcher::{Launcher, RuntimeLauncher};

const TLS_CLIENT_CERT_PATH: &str = "/etc/chaincode/tls/client.crt";
const TLS_CLIENT_KEY_PATH: &str = "/etc/chaincode/tls/client.key";
const TLS_ROOT_CERT_PATH: &str = "/etc/chaincode/tls/ca.crt";

/// Everything needed to start a container for a chaincode: its identity,
/// the content hash of its install package, and the launch hints recovered
/// from the package metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeContainerInfo {
    pub name: String,
    pub version: String,
    pub package_id: Vec<u8>,
    pub path: String,
    pub container_type: String,
}

impl ChaincodeContainerInfo {
    /// The registry key for this chaincode: `name:version`.
    pub fn cname(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Manages chaincode runtime instances.
pub trait Runtime: Send + Sync {
    fn start(
        &self,
        ccci: &ChaincodeContainerInfo,
        code_package: &[u8],
    ) -> Result<(), ContainerError>;

    fn stop(&self, ccci: &ChaincodeContainerInfo) -> Result<(), ContainerError>;

    fn wait(&self, ccci: &ChaincodeContainerInfo) -> Result<i32, ContainerError>;
}

/// Issues per-instance TLS client material for a launching chaincode.
/// Implemented outside this library; absent entirely when TLS is off.
pub trait CertGenerator: Send + Sync {
    fn generate(&self, cname: &str) -> Result<CertKeyPair, ContainerError>;
}

/// A certificate and private key issued for one chaincode instance.
pub struct CertKeyPair {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Runs chaincode processes.  Docker and process-exec are both valid
/// implementations; this library never looks inside.
pub trait Processor: Send + Sync {
    fn start(
        &self,
        ccci: &ChaincodeContainerInfo,
        args: Vec<String>,
        env: Vec<String>,
        files: HashMap<String, Vec<u8>>,
        code_package: &[u8],
    ) -> Result<(), ContainerError>;

    fn stop(&self, ccci: &ChaincodeContainerInfo) -> Result<(), ContainerError>;

    fn wait(&self, ccci: &ChaincodeContainerInfo) -> Result<i32, ContainerError>;
}

/// The standard `Runtime`: assembles identity, environment, and TLS
/// material, then hands process management to the `Processor`.
pub struct ContainerRuntime {
    /// Absent when TLS is disabled; no per-instance material is issued.
    pub cert_generator: Option<Arc<dyn CertGenerator>>,
    pub processor: Arc<dyn Processor>,
    pub ca_cert: Vec<u8>,
    pub peer_address: String,
    /// Environment common to every chaincode, e.g. the logging variables.
    pub common_env: Vec<String>,
}

impl ContainerRuntime {
    fn launch_args(&self) -> Vec<String> {
        vec![
            "chaincode".to_string(),
            format!("-peer.address={}", self.peer_address),
        ]
    }

    fn launch_env(&self, cname: &str) -> Vec<String> {
        let mut env = self.common_env.clone();
        env.push(format!("CORE_CHAINCODE_ID_NAME={}", cname));
        env.push(format!(
            "CORE_PEER_TLS_ENABLED={}",
            self.cert_generator.is_some()
        ));
        if self.cert_generator.is_some() {
            env.push(format!("CORE_TLS_CLIENT_CERT_PATH={}", TLS_CLIENT_CERT_PATH));
            env.push(format!("CORE_TLS_CLIENT_KEY_PATH={}", TLS_CLIENT_KEY_PATH));
            env.push(format!("CORE_PEER_TLS_ROOTCERT_FILE={}", TLS_ROOT_CERT_PATH));
        }
        env
    }

    fn launch_files(&self, cname: &str) -> Result<HashMap<String, Vec<u8>>, ContainerError> {
        let mut files = HashMap::new();
        if let Some(generator) = &self.cert_generator {
            let pair = generator.generate(cname)?;
            files.insert(TLS_CLIENT_CERT_PATH.to_string(), pair.cert);
            files.insert(TLS_CLIENT_KEY_PATH.to_string(), pair.key);
            files.insert(TLS_ROOT_CERT_PATH.to_string(), self.ca_cert.clone());
        }
        Ok(files)
    }
}

impl Runtime for ContainerRuntime {
    fn start(
        &self,
        ccci: &ChaincodeContainerInfo,
        code_package: &[u8],
    ) -> Result<(), ContainerError> {
        let cname = ccci.cname();
        self.processor.start(
            ccci,
            self.launch_args(),
            self.launch_env(&cname),
            self.launch_files(&cname)?,
            code_package,
        )
    }

    fn stop(&self, ccci: &ChaincodeContainerInfo) -> Result<(), ContainerError> {
        self.processor.stop(ccci)
    }

    fn wait(&self, ccci: &ChaincodeContainerInfo) -> Result<i32, ContainerError> {
        self.processor.wait(ccci)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordedStart {
        env: Vec<String>,
        files: HashMap<String, Vec<u8>>,
    }

    #[derive(Clone, Default)]
    struct RecordingProcessor {
        starts: Arc<Mutex<Vec<RecordedStart>>>,
    }

    impl Processor for RecordingProcessor {
        fn start(
            &self,
            _ccci: &ChaincodeContainerInfo,
            _args: Vec<String>,
            env: Vec<String>,
            files: HashMap<String, Vec<u8>>,
            _code_package: &[u8],
        ) -> Result<(), ContainerError> {
            self.starts
                .lock()
                .expect("RecordingProcessor mutex is poisoned")
                .push(RecordedStart { env, files });
            Ok(())
        }

        fn stop(&self, _: &ChaincodeContainerInfo) -> Result<(), ContainerError> {
            Ok(())
        }

        fn wait(&self, _: &ChaincodeContainerInfo) -> Result<i32, ContainerError> {
            Ok(0)
        }
    }

    struct StaticCerts;

    impl CertGenerator for StaticCerts {
        fn generate(&self, _: &str) -> Result<CertKeyPair, ContainerError> {
            Ok(CertKeyPair {
                cert: b"cert".to_vec(),
                key: b"key".to_vec(),
            })
        }
    }

    fn ccci() -> ChaincodeContainerInfo {
        ChaincodeContainerInfo {
            name: "mycc".to_string(),
            version: "1.0".to_string(),
            package_id: vec![0x11; 32],
            path: "github.com/example/cc".to_string(),
            container_type: "GOLANG".to_string(),
        }
    }

    #[test]
    fn tls_disabled_omits_certificate_material() {
        let processor = RecordingProcessor::default();
        let runtime = ContainerRuntime {
            cert_generator: None,
            processor: Arc::new(processor.clone()),
            ca_cert: vec![],
            peer_address: "peer0:7051".to_string(),
            common_env: vec!["CORE_CHAINCODE_LOGGING_LEVEL=info".to_string()],
        };

        runtime.start(&ccci(), b"package").expect("Start should succeed");

        let starts = processor.starts.lock().unwrap();
        assert!(starts[0].files.is_empty(), "no TLS files are injected");
        assert!(starts[0]
            .env
            .contains(&"CORE_PEER_TLS_ENABLED=false".to_string()));
        assert!(starts[0]
            .env
            .contains(&"CORE_CHAINCODE_ID_NAME=mycc:1.0".to_string()));
        assert!(starts[0]
            .env
            .contains(&"CORE_CHAINCODE_LOGGING_LEVEL=info".to_string()));
    }

    #[test]
    fn tls_enabled_injects_per_instance_material() {
        let processor = RecordingProcessor::default();
        let runtime = ContainerRuntime {
            cert_generator: Some(Arc::new(StaticCerts)),
            processor: Arc::new(processor.clone()),
            ca_cert: b"ca".to_vec(),
            peer_address: "peer0:7051".to_string(),
            common_env: vec![],
        };

        runtime.start(&ccci(), b"package").expect("Start should succeed");

        let starts = processor.starts.lock().unwrap();
        assert_eq!(
            Some(&b"cert".to_vec()),
            starts[0].files.get(TLS_CLIENT_CERT_PATH)
        );
        assert_eq!(
            Some(&b"ca".to_vec()),
            starts[0].files.get(TLS_ROOT_CERT_PATH)
        );
        assert!(starts[0]
            .env
            .contains(&"CORE_PEER_TLS_ENABLED=true".to_string()));
    }
}
