//! Thin client over the generated inference bindings. Engines live on the
//! local network, so channels dial plain `http://` without TLS.

use crate::error::GrpcError;
use crate::pb::inference::ModelInferRequest;
use crate::pb::inference::ModelInferResponse;
use crate::pb::inference::ModelStreamInferResponse;
use crate::pb::inference::grpc_inference_service_client::GrpcInferenceServiceClient;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const STREAM_SEND_BUFFER: usize = 64;

#[derive(Clone)]
pub struct InferenceClient {
    inner: GrpcInferenceServiceClient<Channel>,
}

impl InferenceClient {
    /// Dial the engine. `url` may be a bare `host:port`; the scheme is
    /// normalized to `http://`.
    pub async fn connect(url: &str) -> Result<Self, GrpcError> {
        let dst = normalize_url(url);
        debug!("dialing inference engine at {dst}");
        let channel = Endpoint::from_shared(dst.clone())
            .map_err(|source| GrpcError::Connect {
                url: dst.clone(),
                source,
            })?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(|source| GrpcError::Connect { url: dst, source })?;
        Ok(Self {
            inner: GrpcInferenceServiceClient::new(channel),
        })
    }

    pub async fn model_infer(
        &mut self,
        request: ModelInferRequest,
        timeout: Duration,
    ) -> Result<ModelInferResponse, GrpcError> {
        let mut req = tonic::Request::new(request);
        req.set_timeout(timeout);
        Ok(self.inner.model_infer(req).await?.into_inner())
    }

    /// Open a bidirectional stream. The caller keeps the send half and
    /// reads responses off the returned `Streaming`; dropping the sender
    /// half-closes the stream, which engines treat as end of input.
    pub async fn open_stream(
        &mut self,
    ) -> Result<
        (
            mpsc::Sender<ModelInferRequest>,
            Streaming<ModelStreamInferResponse>,
        ),
        GrpcError,
    > {
        let (tx, rx) = mpsc::channel(STREAM_SEND_BUFFER);
        let response = self
            .inner
            .model_stream_infer(ReceiverStream::new(rx))
            .await?;
        Ok((tx, response.into_inner()))
    }
}

fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("grpc://") {
        format!("http://{rest}")
    } else {
        format!("http://{url}")
    }
}
