use crate::entity::Model;
use crate::entity::ModelStatus;
use crate::entity::Service;
use crate::entity::ServiceProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity is nil")]
    NilEntity,
    #[error("primary key is empty")]
    EmptyPrimaryKey,
    #[error("table name is empty")]
    EmptyTableName,
    #[error("entity not found")]
    NotFound,
    #[error("database error: {0}")]
    Db(String),
}

/// Persistence contract for the three entity tables the gateway reads on
/// the hot path. Durable backends implement this; the gateway itself only
/// requires the contract. Accessors are explicit per entity rather than
/// generic over a table name; the entity set is small and closed.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn add_service(&self, service: Service) -> Result<(), StoreError>;
    async fn put_service(&self, service: Service) -> Result<(), StoreError>;
    async fn get_service(&self, name: &str) -> Result<Service, StoreError>;
    async fn delete_service(&self, name: &str) -> Result<(), StoreError>;
    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;
    async fn service_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn count_services(&self) -> Result<usize, StoreError>;

    async fn add_provider(&self, provider: ServiceProvider) -> Result<(), StoreError>;
    async fn put_provider(&self, provider: ServiceProvider) -> Result<(), StoreError>;
    async fn get_provider(&self, name: &str) -> Result<ServiceProvider, StoreError>;
    async fn delete_provider(&self, name: &str) -> Result<(), StoreError>;
    async fn list_providers(&self) -> Result<Vec<ServiceProvider>, StoreError>;
    async fn provider_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn count_providers(&self) -> Result<usize, StoreError>;

    async fn add_model(&self, model: Model) -> Result<(), StoreError>;
    async fn put_model(&self, model: Model) -> Result<(), StoreError>;
    async fn get_model(&self, name: &str) -> Result<Model, StoreError>;
    async fn delete_model(&self, name: &str) -> Result<(), StoreError>;
    async fn list_models(&self) -> Result<Vec<Model>, StoreError>;
    async fn model_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn count_models(&self) -> Result<usize, StoreError>;

    /// Models attached to one provider, in no particular order.
    async fn list_models_for_provider(
        &self,
        provider_name: &str,
    ) -> Result<Vec<Model>, StoreError> {
        Ok(self
            .list_models()
            .await?
            .into_iter()
            .filter(|m| m.provider_name == provider_name)
            .collect())
    }
}

/// In-memory store used by the gateway process and tests. Task state is
/// not durable by design; Service/Provider/Model rows are seeded at boot.
#[derive(Default)]
pub struct MemStore {
    services: RwLock<HashMap<String, Service>>,
    providers: RwLock<HashMap<String, ServiceProvider>>,
    models: RwLock<HashMap<String, Model>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_key(key: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            Err(StoreError::EmptyPrimaryKey)
        } else {
            Ok(())
        }
    }

    fn lock_poisoned() -> StoreError {
        StoreError::Db("store lock poisoned".to_string())
    }

    fn insert<T>(table: &RwLock<HashMap<String, T>>, key: &str, entity: T) -> Result<(), StoreError> {
        Self::require_key(key)?;
        table
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .insert(key.to_string(), entity);
        Ok(())
    }

    fn update<T>(table: &RwLock<HashMap<String, T>>, key: &str, entity: T) -> Result<(), StoreError> {
        Self::require_key(key)?;
        let mut guard = table.write().map_err(|_| Self::lock_poisoned())?;
        if !guard.contains_key(key) {
            return Err(StoreError::NotFound);
        }
        guard.insert(key.to_string(), entity);
        Ok(())
    }

    fn fetch<T: Clone>(table: &RwLock<HashMap<String, T>>, key: &str) -> Result<T, StoreError> {
        Self::require_key(key)?;
        table
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn remove<T>(table: &RwLock<HashMap<String, T>>, key: &str) -> Result<(), StoreError> {
        Self::require_key(key)?;
        table
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn values<T: Clone>(table: &RwLock<HashMap<String, T>>) -> Result<Vec<T>, StoreError> {
        Ok(table
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .values()
            .cloned()
            .collect())
    }

    fn contains<T>(table: &RwLock<HashMap<String, T>>, key: &str) -> Result<bool, StoreError> {
        Self::require_key(key)?;
        Ok(table
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .contains_key(key))
    }

    fn len<T>(table: &RwLock<HashMap<String, T>>) -> Result<usize, StoreError> {
        Ok(table.read().map_err(|_| Self::lock_poisoned())?.len())
    }

    /// Convenience used by tests and boot seeding: flip a model's status.
    pub fn set_model_status(&self, name: &str, status: ModelStatus) -> Result<(), StoreError> {
        let mut models = self.models.write().map_err(|_| Self::lock_poisoned())?;
        let model = models.get_mut(name).ok_or(StoreError::NotFound)?;
        model.status = status;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemStore {
    async fn add_service(&self, service: Service) -> Result<(), StoreError> {
        let key = service.name.clone();
        Self::insert(&self.services, &key, service)
    }

    async fn put_service(&self, service: Service) -> Result<(), StoreError> {
        let key = service.name.clone();
        Self::update(&self.services, &key, service)
    }

    async fn get_service(&self, name: &str) -> Result<Service, StoreError> {
        Self::fetch(&self.services, name)
    }

    async fn delete_service(&self, name: &str) -> Result<(), StoreError> {
        Self::remove(&self.services, name)
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Self::values(&self.services)
    }

    async fn service_exists(&self, name: &str) -> Result<bool, StoreError> {
        Self::contains(&self.services, name)
    }

    async fn count_services(&self) -> Result<usize, StoreError> {
        Self::len(&self.services)
    }

    async fn add_provider(&self, provider: ServiceProvider) -> Result<(), StoreError> {
        let key = provider.provider_name.clone();
        Self::insert(&self.providers, &key, provider)
    }

    async fn put_provider(&self, provider: ServiceProvider) -> Result<(), StoreError> {
        let key = provider.provider_name.clone();
        Self::update(&self.providers, &key, provider)
    }

    async fn get_provider(&self, name: &str) -> Result<ServiceProvider, StoreError> {
        Self::fetch(&self.providers, name)
    }

    async fn delete_provider(&self, name: &str) -> Result<(), StoreError> {
        Self::remove(&self.providers, name)
    }

    async fn list_providers(&self) -> Result<Vec<ServiceProvider>, StoreError> {
        Self::values(&self.providers)
    }

    async fn provider_exists(&self, name: &str) -> Result<bool, StoreError> {
        Self::contains(&self.providers, name)
    }

    async fn count_providers(&self) -> Result<usize, StoreError> {
        Self::len(&self.providers)
    }

    async fn add_model(&self, model: Model) -> Result<(), StoreError> {
        let key = model.model_name.clone();
        Self::insert(&self.models, &key, model)
    }

    async fn put_model(&self, model: Model) -> Result<(), StoreError> {
        let key = model.model_name.clone();
        Self::update(&self.models, &key, model)
    }

    async fn get_model(&self, name: &str) -> Result<Model, StoreError> {
        Self::fetch(&self.models, name)
    }

    async fn delete_model(&self, name: &str) -> Result<(), StoreError> {
        Self::remove(&self.models, name)
    }

    async fn list_models(&self) -> Result<Vec<Model>, StoreError> {
        Self::values(&self.models)
    }

    async fn model_exists(&self, name: &str) -> Result<bool, StoreError> {
        Self::contains(&self.models, name)
    }

    async fn count_models(&self) -> Result<usize, StoreError> {
        Self::len(&self.models)
    }
}
