use std::sync::Arc;

use async_trait::async_trait;

use super::service::PersistenceService;
use crate::store::{Middleware, State, StateValue};

/// Writes every candidate state through a [`PersistenceService`] before it
/// commits. A failed save is reported as a middleware failure; the commit
/// still goes ahead.
#[derive(Clone)]
pub struct PersistenceMiddleware {
    service: Arc<PersistenceService>,
}

impl PersistenceMiddleware {
    pub fn new(service: Arc<PersistenceService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<PersistenceService> {
        &self.service
    }
}

#[async_trait]
impl<V: StateValue> Middleware<V> for PersistenceMiddleware {
    fn name(&self) -> &str {
        "persistence"
    }

    async fn handle(&self, _previous: &State<V>, next: &State<V>) -> anyhow::Result<()> {
        self.service.try_save_state(next).await?;
        Ok(())
    }
}
