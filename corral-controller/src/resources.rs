use corral_core::coordination::{join_path, CoordinationError, CoordinationService, Result};
use corral_core::{Assignment, Participant, ReplicaId, ResourceDefinition};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

// Corral coordination paths, all rooted at /corral/{cluster}
pub(crate) const BASE_PATH: &str = "/corral";
pub(crate) const PARTICIPANTS: &str = "participants";
pub(crate) const RESOURCES: &str = "resources";
pub(crate) const ASSIGNMENT: &str = "assignment";
pub(crate) const CONTROLLER_LEADER: &str = "controller/leader";
pub(crate) const CURRENT_STATES: &str = "current_states";

/// Resource name of the controller's own leadership replica. Its partition is
/// the cluster name and its participant the controller instance.
pub(crate) const CONTROLLER_RESOURCE: &str = "corral_controller";

/// Typed access to the cluster's metadata in the coordination service.
#[derive(Clone)]
pub(crate) struct Resources {
    store: Arc<dyn CoordinationService>,
    cluster: String,
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("cluster", &self.cluster)
            .finish()
    }
}

impl Resources {
    pub(crate) fn new(store: Arc<dyn CoordinationService>, cluster: &str) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn CoordinationService> {
        &self.store
    }

    pub(crate) fn cluster_name(&self) -> &str {
        &self.cluster
    }

    fn path(&self, parts: &[&str]) -> String {
        let mut all = vec![BASE_PATH, self.cluster.as_str()];
        all.extend_from_slice(parts);
        join_path(&all)
    }

    pub(crate) fn participants_path(&self) -> String {
        self.path(&[PARTICIPANTS])
    }

    pub(crate) fn participant_path(&self, name: &str) -> String {
        self.path(&[PARTICIPANTS, name])
    }

    pub(crate) fn resources_path(&self) -> String {
        self.path(&[RESOURCES])
    }

    pub(crate) fn resource_path(&self, name: &str) -> String {
        self.path(&[RESOURCES, name])
    }

    pub(crate) fn assignment_path(&self) -> String {
        self.path(&[ASSIGNMENT])
    }

    pub(crate) fn controller_leader_path(&self) -> String {
        self.path(&[CONTROLLER_LEADER])
    }

    pub(crate) fn current_state_path(&self, participant: &str) -> String {
        self.path(&[CURRENT_STATES, participant])
    }

    /// Replica the controller instance `instance` runs its leadership through.
    pub(crate) fn controller_replica(&self, instance: &str) -> ReplicaId {
        ReplicaId::new(CONTROLLER_RESOURCE, &self.cluster, instance)
    }

    // Children may disappear between listing and reading them; those are skipped.
    async fn read_children<T: DeserializeOwned>(&self, parent: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for child in self.store.get_children(parent).await? {
            match self.store.watched_read(&child).await {
                Ok(versioned) => items.push(serde_json::from_value(versioned.value)?),
                Err(CoordinationError::NotFound(_)) => {
                    debug!(path = %child, "child removed while listing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    /// Participants currently registered, which is what live means here.
    pub(crate) async fn live_participants(&self) -> Result<BTreeMap<String, Participant>> {
        let participants: Vec<Participant> =
            self.read_children(&self.participants_path()).await?;
        Ok(participants
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect())
    }

    pub(crate) async fn resource_definitions(
        &self,
    ) -> Result<BTreeMap<String, ResourceDefinition>> {
        let resources: Vec<ResourceDefinition> =
            self.read_children(&self.resources_path()).await?;
        Ok(resources.into_iter().map(|r| (r.name.clone(), r)).collect())
    }

    /// Creates the resource unless it already exists. Returns whether it was created.
    pub(crate) async fn create_resource(&self, resource: &ResourceDefinition) -> Result<bool> {
        let value = serde_json::to_value(resource)?;
        match self
            .store
            .conditional_write(&self.resource_path(&resource.name), None, value)
            .await
        {
            Ok(_) => Ok(true),
            Err(CoordinationError::KeyExists(_)) => {
                debug!(resource = %resource.name, "resource already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Published assignment and its version, or an empty assignment and `None`
    /// when nothing was published yet.
    pub(crate) async fn read_assignment(&self) -> Result<(Assignment, Option<i64>)> {
        match self.store.watched_read(&self.assignment_path()).await {
            Ok(versioned) => Ok((
                serde_json::from_value(versioned.value)?,
                Some(versioned.version),
            )),
            Err(CoordinationError::NotFound(_)) => Ok((Assignment::new(), None)),
            Err(e) => Err(e),
        }
    }

    /// Publishes `assignment` if the stored version is still `expected`.
    pub(crate) async fn write_assignment(
        &self,
        assignment: &Assignment,
        expected: Option<i64>,
    ) -> Result<i64> {
        let value = serde_json::to_value(assignment)?;
        self.store
            .conditional_write(&self.assignment_path(), expected, value)
            .await
    }

    /// Replaces the participant's current-state record. Only the participant
    /// itself writes it, so the version read just before is the expected one.
    pub(crate) async fn publish_current_states(
        &self,
        participant: &str,
        states: &Assignment,
    ) -> Result<i64> {
        let path = self.current_state_path(participant);
        let value = serde_json::to_value(states)?;
        let expected = match self.store.watched_read(&path).await {
            Ok(versioned) => Some(versioned.version),
            Err(CoordinationError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let result = self.store.conditional_write(&path, expected, value).await;
        if let Err(e) = &result {
            warn!(participant = %participant, error = %e, "failed to publish current states");
        }
        result
    }

    pub(crate) async fn current_states(&self, participant: &str) -> Result<Option<Assignment>> {
        match self
            .store
            .watched_read(&self.current_state_path(participant))
            .await
        {
            Ok(versioned) => Ok(Some(serde_json::from_value(versioned.value)?)),
            Err(CoordinationError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
