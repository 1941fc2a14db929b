//! Server state

use std::sync::Arc;

use crate::deploy::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub deployments: Arc<DeploymentStore>,
}

impl ServerState {
    pub fn new(deployments: Arc<DeploymentStore>) -> Self {
        Self { deployments }
    }
}
