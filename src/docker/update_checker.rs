use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ContainerDefinitions, ContainerEngine, ContainerName, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Available,
    UpToDate,
    /// The check could not be completed; treated as "no update known".
    Unknown,
}

/// Compares the digests of running images with what the registry serves.
///
/// Registry round trips are slow, so definite answers are cached per engine
/// container name for `cache_ttl`. Failures are never cached.
pub struct UpdateChecker {
    engine: Arc<dyn ContainerEngine>,
    definitions: Arc<ContainerDefinitions>,
    cache: DashMap<String, (Instant, UpdateStatus)>,
    cache_ttl: Duration,
}

impl UpdateChecker {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        definitions: Arc<ContainerDefinitions>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            engine,
            definitions,
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    pub async fn is_update_available(&self, name: ContainerName) -> UpdateStatus {
        let definition = self.definitions.get(name);
        self.cached_check(definition.container_name(), &definition.image)
            .await
    }

    /// Whether a newer image of the master container itself is published.
    pub async fn is_master_update_available(&self) -> UpdateStatus {
        let master = self.definitions.master();
        self.cached_check(&master.container_name, &master.image).await
    }

    async fn cached_check(&self, container: &str, image: &str) -> UpdateStatus {
        if let Some(entry) = self.cache.get(container) {
            let (checked_at, status) = *entry;
            if checked_at.elapsed() < self.cache_ttl {
                return status;
            }
        }

        match self.check(container, image).await {
            Ok(status) => {
                self.cache
                    .insert(container.to_string(), (Instant::now(), status));
                status
            }
            Err(e) => {
                warn!(container, error = %e, "Update check failed, reporting unknown");
                UpdateStatus::Unknown
            }
        }
    }

    async fn check(&self, container: &str, image: &str) -> Result<UpdateStatus, EngineError> {
        let Some(info) = self.engine.inspect_container(container).await? else {
            debug!(container, "Container does not exist, no update known");
            return Ok(UpdateStatus::Unknown);
        };
        let Some(image_id) = info.image_id else {
            return Ok(UpdateStatus::Unknown);
        };

        let local = self.engine.local_image_digests(&image_id).await?;
        let remote = self.engine.remote_image_digest(image).await?;
        let up_to_date = local
            .iter()
            .any(|digest| digest.rsplit('@').next() == Some(remote.as_str()));

        Ok(if up_to_date {
            UpdateStatus::UpToDate
        } else {
            UpdateStatus::Available
        })
    }

    /// True when any managed container is known to run an outdated image.
    /// Individual failures count as "no update known".
    pub async fn is_any_update_available(&self) -> bool {
        let checks = ContainerName::ALL.map(|name| self.is_update_available(name));
        join_all(checks)
            .await
            .into_iter()
            .any(|status| status == UpdateStatus::Available)
    }

    pub fn invalidate(&self, name: ContainerName) {
        self.cache.remove(name.container_name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ContainerState;
    use crate::docker::testing::FakeEngine;

    fn setup() -> (Arc<FakeEngine>, UpdateChecker, Arc<ContainerDefinitions>) {
        let engine = Arc::new(FakeEngine::new());
        let defs = Arc::new(ContainerDefinitions::new("nextcloud/", "latest", "aio"));
        let checker = UpdateChecker::new(engine.clone(), defs.clone(), Duration::from_secs(60));
        (engine, checker, defs)
    }

    fn run(engine: &FakeEngine, defs: &ContainerDefinitions, name: ContainerName, local: &str) {
        let def = defs.get(name);
        engine.insert_container(def.container_name(), &def.image, ContainerState::Running);
        engine.set_local_digests(&def.image, &[&format!("nextcloud/x@{local}")]);
    }

    #[tokio::test]
    async fn test_matching_digest_is_up_to_date() {
        let (engine, checker, defs) = setup();
        run(&engine, &defs, ContainerName::Application, "sha256:aaa");
        engine.set_remote_digest(&defs.get(ContainerName::Application).image, "sha256:aaa");
        assert_eq!(
            checker.is_update_available(ContainerName::Application).await,
            UpdateStatus::UpToDate
        );
    }

    #[tokio::test]
    async fn test_different_digest_is_available() {
        let (engine, checker, defs) = setup();
        run(&engine, &defs, ContainerName::Application, "sha256:aaa");
        engine.set_remote_digest(&defs.get(ContainerName::Application).image, "sha256:bbb");
        assert_eq!(
            checker.is_update_available(ContainerName::Application).await,
            UpdateStatus::Available
        );
        assert!(checker.is_any_update_available().await);
    }

    #[tokio::test]
    async fn test_registry_failure_is_unknown_and_not_fatal() {
        let (engine, checker, defs) = setup();
        run(&engine, &defs, ContainerName::Application, "sha256:aaa");
        run(&engine, &defs, ContainerName::Domaincheck, "sha256:ccc");
        engine.set_remote_digest(&defs.get(ContainerName::Domaincheck).image, "sha256:ddd");
        // No remote digest for the application image: its check fails.
        assert_eq!(
            checker.is_update_available(ContainerName::Application).await,
            UpdateStatus::Unknown
        );
        assert!(checker.is_any_update_available().await);
    }

    #[tokio::test]
    async fn test_all_failures_mean_no_update() {
        let (engine, checker, defs) = setup();
        run(&engine, &defs, ContainerName::Application, "sha256:aaa");
        engine.fail("inspect");
        assert!(!checker.is_any_update_available().await);
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let (engine, checker, defs) = setup();
        run(&engine, &defs, ContainerName::Watcher, "sha256:aaa");
        let image = defs.get(ContainerName::Watcher).image.clone();
        engine.set_remote_digest(&image, "sha256:aaa");
        checker.is_update_available(ContainerName::Watcher).await;
        checker.is_update_available(ContainerName::Watcher).await;
        assert_eq!(engine.calls("remote_digest", &image), 1);

        checker.invalidate(ContainerName::Watcher);
        checker.is_update_available(ContainerName::Watcher).await;
        assert_eq!(engine.calls("remote_digest", &image), 2);
    }

    #[tokio::test]
    async fn test_master_container_update() {
        let (engine, checker, defs) = setup();
        let master = defs.master();
        engine.insert_container(&master.container_name, &master.image, ContainerState::Running);
        engine.set_local_digests(&master.image, &["nextcloud/all-in-one@sha256:old"]);
        engine.set_remote_digest(&master.image, "sha256:new");

        assert_eq!(checker.is_master_update_available().await, UpdateStatus::Available);
        // The master container does not count towards the managed containers.
        assert!(!checker.is_any_update_available().await);
    }

    #[tokio::test]
    async fn test_missing_master_container_is_unknown() {
        let (_engine, checker, _defs) = setup();
        assert_eq!(checker.is_master_update_available().await, UpdateStatus::Unknown);
    }
}
