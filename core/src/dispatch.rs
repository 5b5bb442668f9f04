//! Dispatch: turn an accepted request into a concrete target. Location is
//! chosen by policy, provider and model come from the entity store, the
//! protocol comes from the provider flavor's service definition.

use crate::context::GatewayContext;
use crate::error::TaskError;
use aog_protocol::EntityStore as _;
use aog_protocol::Model;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::StoreError;
use aog_protocol::entity::HybridPolicy;
use aog_protocol::entity::Location;
use tracing::info;
use tracing::warn;

pub async fn dispatch(
    ctx: &GatewayContext,
    request: &ServiceRequest,
) -> Result<ServiceTarget, TaskError> {
    let service = ctx
        .store
        .get_service(&request.service)
        .await
        .map_err(|err| match err {
            StoreError::NotFound => TaskError::ProviderNotFound {
                service: request.service.clone(),
                location: Location::Local,
            },
            other => TaskError::Store(other),
        })?;

    let location = match request.hybrid_policy {
        HybridPolicy::AlwaysLocal => Location::Local,
        HybridPolicy::AlwaysRemote => Location::Remote,
        HybridPolicy::Default => (ctx.location_picker)(request, &service),
    };

    let provider_name =
        service
            .provider_for(location)
            .ok_or_else(|| TaskError::ProviderNotFound {
                service: request.service.clone(),
                location,
            })?;
    let mut provider = ctx.store.get_provider(provider_name).await?;

    let model = match &request.model {
        Some(name) => {
            let model = ctx.store.get_model(name).await.map_err(|err| match err {
                StoreError::NotFound => TaskError::ModelNotFound(name.clone()),
                other => TaskError::Store(other),
            })?;
            if !model.is_ready() {
                return Err(TaskError::ModelNotDownloaded(name.clone()));
            }
            // The model row knows which provider serves it; prefer that
            // over the service default so per-model providers work.
            if model.provider_name != provider.provider_name {
                provider = ctx.store.get_provider(&model.provider_name).await?;
            }
            model.model_name
        }
        None => match location {
            Location::Local => pick_local_model(ctx, provider_name, &request.service).await?,
            Location::Remote => {
                let snapshot = ctx.registry.snapshot();
                snapshot
                    .service(&provider.flavor, &request.service)?
                    .default_model
                    .clone()
                    .ok_or_else(|| TaskError::ModelNotFound(request.service.clone()))?
            }
        },
    };

    let snapshot = ctx.registry.snapshot();
    let flavor_service = snapshot.service(&provider.flavor, &request.service)?;

    let mut stream = request.ask_stream_mode;
    if stream && !provider.properties.supports_stream() {
        warn!(
            provider = %provider.provider_name,
            service = %request.service,
            "provider does not support streaming, downgrading to non-stream"
        );
        stream = false;
    }

    let target = ServiceTarget {
        location,
        model,
        to_flavor: provider.flavor.clone(),
        protocol: flavor_service.protocol,
        stream,
        provider,
    };
    info!(
        service = %request.service,
        model = %target.model,
        flavor = %target.to_flavor,
        location = %target.location,
        protocol = %target.protocol,
        "dispatched"
    );
    Ok(target)
}

/// No explicit model: prefer the default downloaded model under the local
/// provider, then the most recently updated downloaded one.
async fn pick_local_model(
    ctx: &GatewayContext,
    provider_name: &str,
    service: &str,
) -> Result<String, TaskError> {
    let mut models: Vec<Model> = ctx
        .store
        .list_models_for_provider(provider_name)
        .await?
        .into_iter()
        .filter(|m| m.is_ready())
        .collect();
    if let Some(default) = models.iter().find(|m| m.is_default) {
        return Ok(default.model_name.clone());
    }
    models.sort_by_key(|m| m.updated_at);
    models
        .pop()
        .map(|m| m.model_name)
        .ok_or_else(|| TaskError::ModelNotFound(service.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aog_api::FlavorRegistry;
    use aog_client::ReqwestTransport;
    use aog_protocol::MemStore;
    use aog_protocol::Service;
    use aog_protocol::ServiceProvider;
    use aog_protocol::entity::AuthType;
    use aog_protocol::entity::ModelStatus;
    use aog_protocol::entity::ServiceProtocol;
    use chrono::Duration;
    use chrono::Utc;
    use std::sync::Arc;

    async fn test_ctx() -> GatewayContext {
        let store = Arc::new(MemStore::new());
        store
            .add_service(Service {
                name: "chat".to_string(),
                local_provider: "local_ollama_chat".to_string(),
                remote_provider: "remote_aliyun_chat".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .add_provider(ServiceProvider {
                provider_name: "local_ollama_chat".to_string(),
                flavor: "ollama".to_string(),
                service_name: "chat".to_string(),
                method: "POST".to_string(),
                url: "http://127.0.0.1:11434/api/chat".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .add_provider(ServiceProvider {
                provider_name: "remote_aliyun_chat".to_string(),
                flavor: "aliyun".to_string(),
                service_name: "chat".to_string(),
                service_source: Location::Remote,
                method: "POST".to_string(),
                url: "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation".to_string(),
                auth_type: AuthType::Apikey,
                ..Default::default()
            })
            .await
            .unwrap();

        GatewayContext::new(
            store,
            Arc::new(FlavorRegistry::from_embedded().unwrap()),
            Arc::new(ReqwestTransport::new().unwrap()),
        )
    }

    fn model(name: &str, status: ModelStatus, is_default: bool, age_secs: i64) -> aog_protocol::Model {
        aog_protocol::Model {
            model_name: name.to_string(),
            provider_name: "local_ollama_chat".to_string(),
            service_name: "chat".to_string(),
            service_source: Location::Local,
            status,
            is_default,
            updated_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn named_model_must_be_downloaded() {
        let ctx = test_ctx().await;
        ctx.store
            .add_model(model("m-down", ModelStatus::Downloading, false, 0))
            .await
            .unwrap();

        let request = ServiceRequest::new("aog", "chat").with_model("m-down");
        let err = dispatch(&ctx, &request).await.unwrap_err();
        assert!(matches!(err, TaskError::ModelNotDownloaded(_)));

        let request = ServiceRequest::new("aog", "chat").with_model("m-missing");
        let err = dispatch(&ctx, &request).await.unwrap_err();
        assert!(matches!(err, TaskError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn default_policy_resolves_local_and_prefers_default_model() {
        let ctx = test_ctx().await;
        ctx.store
            .add_model(model("older", ModelStatus::Downloaded, false, 100))
            .await
            .unwrap();
        ctx.store
            .add_model(model("newer", ModelStatus::Downloaded, false, 10))
            .await
            .unwrap();
        ctx.store
            .add_model(model("preferred", ModelStatus::Downloaded, true, 500))
            .await
            .unwrap();

        let request = ServiceRequest::new("aog", "chat");
        let target = dispatch(&ctx, &request).await.unwrap();
        assert_eq!(target.location, Location::Local);
        assert_eq!(target.model, "preferred");
        assert_eq!(target.to_flavor, "ollama");
        assert_eq!(target.protocol, ServiceProtocol::Http);
    }

    #[tokio::test]
    async fn without_default_flag_most_recent_wins() {
        let ctx = test_ctx().await;
        ctx.store
            .add_model(model("older", ModelStatus::Downloaded, false, 100))
            .await
            .unwrap();
        ctx.store
            .add_model(model("newer", ModelStatus::Downloaded, false, 10))
            .await
            .unwrap();
        ctx.store
            .add_model(model("not-ready", ModelStatus::Downloading, false, 0))
            .await
            .unwrap();

        let target = dispatch(&ctx, &ServiceRequest::new("aog", "chat"))
            .await
            .unwrap();
        assert_eq!(target.model, "newer");
    }

    #[tokio::test]
    async fn remote_policy_uses_flavor_default_model() {
        let ctx = test_ctx().await;
        let mut request = ServiceRequest::new("aog", "chat");
        request.hybrid_policy = HybridPolicy::AlwaysRemote;
        let target = dispatch(&ctx, &request).await.unwrap();
        assert_eq!(target.location, Location::Remote);
        assert_eq!(target.model, "qwen-plus");
        assert_eq!(target.to_flavor, "aliyun");
    }

    #[tokio::test]
    async fn missing_provider_is_reported() {
        let ctx = test_ctx().await;
        let mut service = ctx.store.get_service("chat").await.unwrap();
        service.local_provider = String::new();
        ctx.store.put_service(service).await.unwrap();

        let err = dispatch(&ctx, &ServiceRequest::new("aog", "chat"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn stream_downgrade_when_provider_lacks_stream_mode() {
        let ctx = test_ctx().await;
        let mut provider = ctx.store.get_provider("remote_aliyun_chat").await.unwrap();
        provider.properties.supported_response_mode = vec!["sync".to_string()];
        ctx.store.put_provider(provider).await.unwrap();

        let mut request = ServiceRequest::new("aog", "chat");
        request.hybrid_policy = HybridPolicy::AlwaysRemote;
        request.ask_stream_mode = true;
        let target = dispatch(&ctx, &request).await.unwrap();
        assert!(!target.stream);
    }
}
