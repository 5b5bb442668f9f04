//! Provider health refresh. A provider is only `available` once a health
//! check has succeeded since its last configuration change; boot and any
//! config reload call this to re-establish that.

use crate::context::GatewayContext;
use aog_protocol::EngineAdapter as _;
use aog_protocol::EntityStore as _;
use aog_protocol::StoreError;
use aog_protocol::entity::Location;
use aog_protocol::entity::ProviderStatus;
use tracing::info;
use tracing::warn;

/// Check the local engine and promote (or demote) local providers
/// accordingly. Remote providers are promoted optimistically; their first
/// real call surfaces any failure.
pub async fn refresh_provider_status(ctx: &GatewayContext) -> Result<(), StoreError> {
    let engine_healthy = match &ctx.engine {
        Some(engine) => match engine.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "engine health check failed");
                false
            }
        },
        None => false,
    };

    for mut provider in ctx.store.list_providers().await? {
        let healthy = match provider.service_source {
            Location::Local => engine_healthy,
            Location::Remote => true,
        };
        let status = if healthy {
            ProviderStatus::Available
        } else {
            ProviderStatus::Ready
        };
        if provider.status != status {
            info!(provider = %provider.provider_name, %status, "provider status updated");
            provider.status = status;
            ctx.store.put_provider(provider).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aog_api::FlavorRegistry;
    use aog_client::ReqwestTransport;
    use aog_protocol::EntityStore;
    use aog_protocol::MemStore;
    use aog_protocol::ServiceProvider;
    use aog_protocol::engine::EngineAdapter;
    use aog_protocol::engine::EngineError;
    use aog_protocol::engine::EngineMode;
    use aog_protocol::engine::EngineModel;
    use aog_protocol::engine::PullModelRequest;
    use aog_protocol::engine::PullProgress;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct HealthyEngine;

    #[async_trait]
    impl EngineAdapter for HealthyEngine {
        async fn pull_model(
            &self,
            _req: PullModelRequest,
        ) -> Result<mpsc::Receiver<PullProgress>, EngineError> {
            Err(EngineError::Unavailable("not needed".to_string()))
        }
        async fn delete_model(&self, _model_name: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn list_models(&self) -> Result<Vec<EngineModel>, EngineError> {
            Ok(Vec::new())
        }
        async fn get_version(&self) -> Result<String, EngineError> {
            Ok("test".to_string())
        }
        async fn start_engine(&self, _mode: EngineMode) -> Result<(), EngineError> {
            Ok(())
        }
        async fn stop_engine(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_providers_become_available_with_healthy_engine() {
        let store = Arc::new(MemStore::new());
        store
            .add_provider(ServiceProvider {
                provider_name: "local_chat".to_string(),
                flavor: "ollama".to_string(),
                service_name: "chat".to_string(),
                service_source: Location::Local,
                ..Default::default()
            })
            .await
            .unwrap();

        let ctx = aog_core_test_ctx(store.clone()).with_engine(Arc::new(HealthyEngine));
        refresh_provider_status(&ctx).await.unwrap();
        let provider = store.get_provider("local_chat").await.unwrap();
        assert_eq!(provider.status, ProviderStatus::Available);
    }

    #[tokio::test]
    async fn without_engine_local_providers_stay_ready() {
        let store = Arc::new(MemStore::new());
        store
            .add_provider(ServiceProvider {
                provider_name: "local_chat".to_string(),
                service_source: Location::Local,
                ..Default::default()
            })
            .await
            .unwrap();

        let ctx = aog_core_test_ctx(store.clone());
        refresh_provider_status(&ctx).await.unwrap();
        let provider = store.get_provider("local_chat").await.unwrap();
        assert_eq!(provider.status, ProviderStatus::Ready);
    }

    fn aog_core_test_ctx(store: Arc<MemStore>) -> GatewayContext {
        GatewayContext::new(
            store,
            Arc::new(FlavorRegistry::from_embedded().unwrap()),
            Arc::new(ReqwestTransport::new().unwrap()),
        )
    }
}
