//! Tag-driven lifecycle of a stored deployment

use serde::{Deserialize, Serialize};

use crate::models::deployment::{Deployment, DELETED_TAG, INACTIVE_TAG, LATEST_TAG};

/// Lifecycle state, derived from the tags of a stored deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Live on the hub, outranked within its device group
    Active,

    /// Live on the hub and in effect for its device group
    Latest,

    /// Native configuration removed, record kept for history
    Inactive,

    /// Native configuration removed and hidden from every listing
    Deleted,
}

/// Lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Won the device group election
    Promote,

    /// Lost the device group election
    Demote,

    /// Native configuration removed, history kept visible
    Deactivate,

    /// Native configuration removed (if still live) and history hidden
    Delete,

    /// Native configuration re-created from the stored record
    Reactivate,
}

impl DeploymentState {
    pub fn of(deployment: &Deployment) -> Self {
        if deployment.is_deleted() {
            DeploymentState::Deleted
        } else if deployment.is_inactive() {
            DeploymentState::Inactive
        } else if deployment.is_latest() {
            DeploymentState::Latest
        } else {
            DeploymentState::Active
        }
    }

    /// Whether the deployment still has a native configuration on the hub
    pub fn is_live(&self) -> bool {
        matches!(self, DeploymentState::Active | DeploymentState::Latest)
    }
}

/// Apply an event to the tags of a deployment
///
/// Repeating an event that already holds is a no-op; events that make no
/// sense for the current state are rejected and leave the tags untouched.
pub fn apply(deployment: &mut Deployment, event: LifecycleEvent) -> Result<DeploymentState, String> {
    use DeploymentState::*;
    use LifecycleEvent::*;

    let state = DeploymentState::of(deployment);
    let new_state = match (state, event) {
        (Active | Latest, Promote) => {
            deployment.add_tag(LATEST_TAG);
            Latest
        }
        (Active | Latest, Demote) => {
            deployment.remove_tag(LATEST_TAG);
            Active
        }
        (Active | Latest, Deactivate) => {
            deployment.remove_tag(LATEST_TAG);
            deployment.add_tag(INACTIVE_TAG);
            Inactive
        }
        (Active | Latest, Delete) => {
            deployment.remove_tag(LATEST_TAG);
            deployment.add_tag(INACTIVE_TAG);
            deployment.add_tag(DELETED_TAG);
            Deleted
        }
        (Inactive, Deactivate) => Inactive,
        (Inactive | Deleted, Delete) => {
            deployment.add_tag(DELETED_TAG);
            Deleted
        }
        (Deleted, Deactivate) => Deleted,
        (Inactive, Reactivate) => {
            deployment.remove_tag(INACTIVE_TAG);
            Active
        }
        (state, event) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
        }
    };

    Ok(new_state)
}
