//! In-memory engine used by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{ContainerEngine, ContainerInfo, ContainerSpec, ContainerState, EngineError};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub state: ContainerState,
    pub networks: Vec<String>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    networks: HashSet<String>,
    local_digests: HashMap<String, Vec<String>>,
    remote_digests: HashMap<String, String>,
    logs: HashMap<String, String>,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    fn check(&self, op: &'static str, target: &str) -> Result<(), EngineError> {
        self.with(|inner| {
            inner.calls.push(format!("{op}:{target}"));
            if inner.failing.contains(op) {
                Err(EngineError::Api(format!("{op} failed")))
            } else {
                Ok(())
            }
        })
    }

    /// Make every call of `op` fail until [`FakeEngine::recover`].
    pub fn fail(&self, op: &'static str) {
        self.with(|inner| inner.failing.insert(op));
    }

    pub fn recover(&self, op: &'static str) {
        self.with(|inner| inner.failing.remove(op));
    }

    pub fn insert_container(&self, name: &str, image: &str, state: ContainerState) {
        self.with(|inner| {
            inner.containers.insert(
                name.to_string(),
                FakeContainer {
                    spec: ContainerSpec {
                        name: name.to_string(),
                        image: image.to_string(),
                        ..Default::default()
                    },
                    state,
                    networks: Vec::new(),
                },
            )
        });
    }

    pub fn set_state(&self, name: &str, state: ContainerState) {
        self.with(|inner| {
            if let Some(container) = inner.containers.get_mut(name) {
                container.state = state;
            }
        });
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.with(|inner| inner.containers.get(name).cloned())
    }

    pub fn set_local_digests(&self, image: &str, digests: &[&str]) {
        self.with(|inner| {
            inner.local_digests.insert(
                image.to_string(),
                digests.iter().map(|d| d.to_string()).collect(),
            )
        });
    }

    pub fn set_remote_digest(&self, image: &str, digest: &str) {
        self.with(|inner| {
            inner
                .remote_digests
                .insert(image.to_string(), digest.to_string())
        });
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        self.with(|inner| inner.logs.insert(name.to_string(), logs.to_string()));
    }

    /// Number of recorded calls of `op` against `target`.
    pub fn calls(&self, op: &str, target: &str) -> usize {
        let needle = format!("{op}:{target}");
        self.with(|inner| inner.calls.iter().filter(|c| **c == needle).count())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        self.check("inspect", name)?;
        Ok(self.with(|inner| {
            inner.containers.get(name).map(|c| ContainerInfo {
                state: c.state,
                // The fake uses the image reference as its id.
                image_id: Some(c.spec.image.clone()),
                networks: c.networks.clone(),
            })
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        self.check("create", &spec.name)?;
        self.with(|inner| {
            if inner.containers.contains_key(&spec.name) {
                return Err(EngineError::Api(format!("{} already exists", spec.name)));
            }
            inner.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    spec: spec.clone(),
                    state: ContainerState::Stopped,
                    networks: vec![spec.network.clone()],
                },
            );
            Ok(())
        })
    }

    async fn start_container(&self, name: &str) -> Result<(), EngineError> {
        self.check("start", name)?;
        self.with(|inner| match inner.containers.get_mut(name) {
            Some(c) => {
                c.state = ContainerState::Running;
                Ok(())
            }
            None => Err(EngineError::NotFound(name.to_string())),
        })
    }

    async fn stop_container(&self, name: &str) -> Result<(), EngineError> {
        self.check("stop", name)?;
        self.with(|inner| match inner.containers.get_mut(name) {
            Some(c) => {
                c.state = ContainerState::Exited(0);
                Ok(())
            }
            None => Err(EngineError::NotFound(name.to_string())),
        })
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        self.check("remove", name)?;
        self.with(|inner| inner.containers.remove(name));
        Ok(())
    }

    async fn ensure_network(&self, network: &str) -> Result<(), EngineError> {
        self.check("ensure_network", network)?;
        self.with(|inner| inner.networks.insert(network.to_string()));
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<(), EngineError> {
        self.check("connect_network", container)?;
        self.with(|inner| match inner.containers.get_mut(container) {
            Some(c) if c.networks.iter().any(|n| n == network) => Err(EngineError::Api(format!(
                "{container} is already attached to {network}"
            ))),
            Some(c) => {
                c.networks.push(network.to_string());
                Ok(())
            }
            None => Err(EngineError::NotFound(container.to_string())),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.check("pull", image)
    }

    async fn local_image_digests(&self, image_id: &str) -> Result<Vec<String>, EngineError> {
        self.check("local_digests", image_id)?;
        self.with(|inner| {
            inner
                .local_digests
                .get(image_id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(image_id.to_string()))
        })
    }

    async fn remote_image_digest(&self, image: &str) -> Result<String, EngineError> {
        self.check("remote_digest", image)?;
        self.with(|inner| {
            inner
                .remote_digests
                .get(image)
                .cloned()
                .ok_or_else(|| EngineError::Registry(format!("no digest for {image}")))
        })
    }

    async fn logs(&self, name: &str, _tail: usize) -> Result<String, EngineError> {
        self.check("logs", name)?;
        self.with(|inner| {
            if !inner.containers.contains_key(name) {
                return Err(EngineError::NotFound(name.to_string()));
            }
            Ok(inner.logs.get(name).cloned().unwrap_or_default())
        })
    }
}
