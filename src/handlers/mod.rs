//! HTTP handlers. Each one translates a request into calls on the storage
//! services and shapes the JSON response; no storage logic lives here.

use crate::{models::policy::EndpointPolicies, services::storage_service::StorageService};
use std::sync::Arc;

pub mod file_handlers;
pub mod health_handlers;
pub mod upload_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub policies: Arc<EndpointPolicies>,
}

impl AppState {
    pub fn new(storage: StorageService, policies: EndpointPolicies) -> Self {
        Self {
            storage,
            policies: Arc::new(policies),
        }
    }
}
