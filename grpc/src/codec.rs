//! Mapping between HTTP payloads and the inference tensor encoding. The
//! gateway ships request bodies as a single BYTES tensor in raw form and
//! reads responses back out of `raw_output_contents`.

use crate::error::GrpcError;
use crate::pb::inference::ModelInferRequest;
use crate::pb::inference::ModelInferResponse;
use crate::pb::inference::model_infer_request::InferInputTensor;
use bytes::Bytes;

pub const INPUT_TENSOR_NAME: &str = "INPUT";
pub const BYTES_DATATYPE: &str = "BYTES";

/// Encode an opaque request body as a one-element BYTES tensor.
pub fn infer_request_from_body(
    model_name: &str,
    id: &str,
    body: &[u8],
) -> ModelInferRequest {
    ModelInferRequest {
        model_name: model_name.to_string(),
        model_version: String::new(),
        id: id.to_string(),
        parameters: Default::default(),
        inputs: vec![InferInputTensor {
            name: INPUT_TENSOR_NAME.to_string(),
            datatype: BYTES_DATATYPE.to_string(),
            shape: vec![1],
            parameters: Default::default(),
        }],
        outputs: Vec::new(),
        raw_input_contents: vec![body.to_vec()],
    }
}

/// Pull the first raw output tensor out of a response.
pub fn http_body_from_response(resp: &ModelInferResponse) -> Result<Bytes, GrpcError> {
    resp.raw_output_contents
        .first()
        .map(|raw| Bytes::copy_from_slice(raw))
        .ok_or(GrpcError::EmptyResponse)
}
