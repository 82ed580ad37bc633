use std::sync::Arc;

use tracing::info;

use manda_core::Connector;
use manda_db::{Contact, CredentialStats, Instance, InstanceOverview, MandaDb, Message};

use crate::error::{Result, WorkerError};
use crate::fanout::Fanout;
use crate::lifecycle::InstanceManager;
use crate::policy::ReconnectPolicy;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_PAGE_SIZE: i64 = 999;

/// Owner-checked entry point for everything the API layer can do.
pub struct MandaWorker {
    db: Arc<MandaDb>,
    manager: Arc<InstanceManager>,
}

impl MandaWorker {
    pub fn new(db: Arc<MandaDb>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let fanout = Arc::new(Fanout::default());
        let manager = InstanceManager::new(Arc::clone(&db), connector, fanout, policy);
        Self { db, manager }
    }

    pub fn db(&self) -> &Arc<MandaDb> {
        &self.db
    }

    pub fn fanout(&self) -> &Arc<Fanout> {
        self.manager.fanout()
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    /// Stores a new instance and immediately starts pairing it.
    pub async fn create_instance(&self, owner_id: &str, name: &str) -> Result<Instance> {
        let instance = self.db.create_instance(owner_id, name).await?;
        info!(instance_id = %instance.id, user_id = owner_id, "Instance created");

        self.manager.create(&instance.id, owner_id).await?;
        self.get_instance(&instance.id, owner_id).await
    }

    pub async fn list_instances(&self, owner_id: &str) -> Result<Vec<InstanceOverview>> {
        Ok(self.db.list_instances(owner_id).await?)
    }

    pub async fn get_instance(&self, instance_id: &str, owner_id: &str) -> Result<Instance> {
        let instance = self
            .db
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(instance_id.to_string()))?;

        if instance.user_id != owner_id {
            return Err(WorkerError::Forbidden(instance_id.to_string()));
        }

        Ok(instance)
    }

    pub async fn connect_instance(&self, instance_id: &str, owner_id: &str) -> Result<()> {
        self.get_instance(instance_id, owner_id).await?;
        self.manager.connect(instance_id, owner_id).await
    }

    pub async fn disconnect_instance(&self, instance_id: &str, owner_id: &str) -> Result<()> {
        self.get_instance(instance_id, owner_id).await?;
        self.manager.disconnect(instance_id, owner_id).await;
        Ok(())
    }

    pub async fn send_message(
        &self,
        instance_id: &str,
        owner_id: &str,
        to: &str,
        text: &str,
    ) -> Result<String> {
        self.get_instance(instance_id, owner_id).await?;
        self.manager.send_message(instance_id, to, text).await
    }

    pub async fn get_messages(
        &self,
        instance_id: &str,
        owner_id: &str,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>> {
        self.get_instance(instance_id, owner_id).await?;
        Ok(self
            .db
            .get_messages(
                instance_id,
                page.unwrap_or(DEFAULT_PAGE),
                limit.unwrap_or(DEFAULT_PAGE_SIZE),
            )
            .await?)
    }

    pub async fn get_contacts(&self, instance_id: &str, owner_id: &str) -> Result<Vec<Contact>> {
        self.get_instance(instance_id, owner_id).await?;
        Ok(self.db.get_contacts(instance_id).await?)
    }

    pub async fn auth_stats(&self, instance_id: &str, owner_id: &str) -> Result<CredentialStats> {
        self.get_instance(instance_id, owner_id).await?;
        self.manager.credentials().stats(instance_id).await
    }

    /// Disconnects the instance, then deletes it with everything it stored.
    pub async fn delete_instance(&self, instance_id: &str, owner_id: &str) -> Result<()> {
        self.get_instance(instance_id, owner_id).await?;
        self.manager.disconnect(instance_id, owner_id).await;
        self.db.delete_instance(instance_id).await?;
        self.manager.forget(instance_id);

        info!(instance_id, user_id = owner_id, "Instance deleted");
        Ok(())
    }

    pub async fn restore_sessions(&self) -> Result<usize> {
        self.manager.restore().await
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
