//! Committed bindings for the `inference` protocol, kept in-tree so builds
//! do not depend on protoc. Regenerate with `tonic-build` if the contract
//! changes.

pub mod inference {
    /// An inference parameter value.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InferParameter {
        #[prost(oneof = "infer_parameter::ParameterChoice", tags = "1, 2, 3")]
        pub parameter_choice: ::core::option::Option<infer_parameter::ParameterChoice>,
    }
    /// Nested message and enum types in `InferParameter`.
    pub mod infer_parameter {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum ParameterChoice {
            #[prost(bool, tag = "1")]
            BoolParam(bool),
            #[prost(int64, tag = "2")]
            Int64Param(i64),
            #[prost(string, tag = "3")]
            StringParam(::prost::alloc::string::String),
        }
    }
    /// Request message for ModelInfer and ModelStreamInfer.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModelInferRequest {
        /// The name of the model to use for inferencing.
        #[prost(string, tag = "1")]
        pub model_name: ::prost::alloc::string::String,
        /// The version of the model to use for inference.
        #[prost(string, tag = "2")]
        pub model_version: ::prost::alloc::string::String,
        /// Optional identifier for the request. If specified will be
        /// returned in the response.
        #[prost(string, tag = "3")]
        pub id: ::prost::alloc::string::String,
        /// Optional inference parameters.
        #[prost(map = "string, message", tag = "4")]
        pub parameters: ::std::collections::HashMap<
            ::prost::alloc::string::String,
            InferParameter,
        >,
        /// The input tensors for the inference.
        #[prost(message, repeated, tag = "5")]
        pub inputs: ::prost::alloc::vec::Vec<model_infer_request::InferInputTensor>,
        /// The requested output tensors for the inference. Optional, if not
        /// specified all outputs produced by the model will be returned.
        #[prost(message, repeated, tag = "6")]
        pub outputs: ::prost::alloc::vec::Vec<model_infer_request::InferRequestedOutputTensor>,
        /// The data contained in an input tensor can be represented in
        /// "raw" bytes form or in the repeated type that matches the
        /// tensor's data type. Using the "raw" bytes form will
        /// typically allow higher performance due to the way protobuf
        /// allocation and reuse interacts with GRPC.
        #[prost(bytes = "vec", repeated, tag = "7")]
        pub raw_input_contents: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    }
    /// Nested message and enum types in `ModelInferRequest`.
    pub mod model_infer_request {
        /// An input tensor for an inference request.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InferInputTensor {
            /// The tensor name.
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
            /// The tensor data type.
            #[prost(string, tag = "2")]
            pub datatype: ::prost::alloc::string::String,
            /// The tensor shape.
            #[prost(int64, repeated, tag = "3")]
            pub shape: ::prost::alloc::vec::Vec<i64>,
            /// Optional inference input tensor parameters.
            #[prost(map = "string, message", tag = "4")]
            pub parameters: ::std::collections::HashMap<
                ::prost::alloc::string::String,
                super::InferParameter,
            >,
        }
        /// An output tensor requested for an inference request.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InferRequestedOutputTensor {
            /// The tensor name.
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
        }
    }
    /// Response message for ModelInfer.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModelInferResponse {
        /// The name of the model used for inference.
        #[prost(string, tag = "1")]
        pub model_name: ::prost::alloc::string::String,
        /// The version of the model used for inference.
        #[prost(string, tag = "2")]
        pub model_version: ::prost::alloc::string::String,
        /// The id of the inference request if one was specified.
        #[prost(string, tag = "3")]
        pub id: ::prost::alloc::string::String,
        /// The output tensors holding inference results.
        #[prost(message, repeated, tag = "5")]
        pub outputs: ::prost::alloc::vec::Vec<model_infer_response::InferOutputTensor>,
        /// The data contained in an output tensor can be represented in
        /// "raw" bytes form or in the repeated type that matches the
        /// tensor's data type.
        #[prost(bytes = "vec", repeated, tag = "6")]
        pub raw_output_contents: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    }
    /// Nested message and enum types in `ModelInferResponse`.
    pub mod model_infer_response {
        /// An output tensor returned for an inference request.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InferOutputTensor {
            /// The tensor name.
            #[prost(string, tag = "1")]
            pub name: ::prost::alloc::string::String,
            /// The tensor data type.
            #[prost(string, tag = "2")]
            pub datatype: ::prost::alloc::string::String,
            /// The tensor shape.
            #[prost(int64, repeated, tag = "3")]
            pub shape: ::prost::alloc::vec::Vec<i64>,
        }
    }
    /// Response message for ModelStreamInfer. Carries either an error
    /// message or a complete inference response.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModelStreamInferResponse {
        /// The message describing the error. The empty message indicates
        /// the inference was successful without errors.
        #[prost(string, tag = "1")]
        pub error_message: ::prost::alloc::string::String,
        /// Holds the results of the request.
        #[prost(message, optional, tag = "2")]
        pub infer_response: ::core::option::Option<ModelInferResponse>,
    }
    /// Generated client implementations.
    pub mod grpc_inference_service_client {
        #![allow(
            unused_variables,
            dead_code,
            missing_docs,
            clippy::wildcard_imports,
            clippy::let_unit_value
        )]
        use tonic::codegen::*;
        use tonic::codegen::http::Uri;
        /// Inference server GRPC endpoints.
        #[derive(Debug, Clone)]
        pub struct GrpcInferenceServiceClient<T> {
            inner: tonic::client::Grpc<T>,
        }
        impl GrpcInferenceServiceClient<tonic::transport::Channel> {
            /// Attempt to create a new client by connecting to a given endpoint.
            pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
            where
                D: TryInto<tonic::transport::Endpoint>,
                D::Error: Into<StdError>,
            {
                let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
                Ok(Self::new(conn))
            }
        }
        impl<T> GrpcInferenceServiceClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
        {
            pub fn new(inner: T) -> Self {
                let inner = tonic::client::Grpc::new(inner);
                Self { inner }
            }
            pub fn with_origin(inner: T, origin: Uri) -> Self {
                let inner = tonic::client::Grpc::with_origin(inner, origin);
                Self { inner }
            }
            pub fn with_interceptor<F>(
                inner: T,
                interceptor: F,
            ) -> GrpcInferenceServiceClient<InterceptedService<T, F>>
            where
                F: tonic::service::Interceptor,
                T::ResponseBody: Default,
                T: tonic::codegen::Service<
                    http::Request<tonic::body::BoxBody>,
                    Response = http::Response<
                        <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                    >,
                >,
                <T as tonic::codegen::Service<
                    http::Request<tonic::body::BoxBody>,
                >>::Error: Into<StdError> + std::marker::Send + std::marker::Sync,
            {
                GrpcInferenceServiceClient::new(InterceptedService::new(inner, interceptor))
            }
            /// Compress requests with the given encoding.
            ///
            /// This requires the server to support it otherwise it might respond with an
            /// error.
            #[must_use]
            pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.inner = self.inner.send_compressed(encoding);
                self
            }
            /// Enable decompressing responses.
            #[must_use]
            pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.inner = self.inner.accept_compressed(encoding);
                self
            }
            /// Limits the maximum size of a decoded message.
            ///
            /// Default: `4MB`
            #[must_use]
            pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
                self.inner = self.inner.max_decoding_message_size(limit);
                self
            }
            /// Limits the maximum size of an encoded message.
            ///
            /// Default: `usize::MAX`
            #[must_use]
            pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
                self.inner = self.inner.max_encoding_message_size(limit);
                self
            }
            /// Perform inference using a specific model.
            pub async fn model_infer(
                &mut self,
                request: impl tonic::IntoRequest<super::ModelInferRequest>,
            ) -> std::result::Result<
                tonic::Response<super::ModelInferResponse>,
                tonic::Status,
            > {
                self.inner
                    .ready()
                    .await
                    .map_err(|e| {
                        tonic::Status::unknown(
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(
                    "/inference.GRPCInferenceService/ModelInfer",
                );
                let mut req = request.into_request();
                req.extensions_mut()
                    .insert(GrpcMethod::new("inference.GRPCInferenceService", "ModelInfer"));
                self.inner.unary(req, path, codec).await
            }
            /// Perform streaming inference.
            pub async fn model_stream_infer(
                &mut self,
                request: impl tonic::IntoStreamingRequest<
                    Message = super::ModelInferRequest,
                >,
            ) -> std::result::Result<
                tonic::Response<tonic::codec::Streaming<super::ModelStreamInferResponse>>,
                tonic::Status,
            > {
                self.inner
                    .ready()
                    .await
                    .map_err(|e| {
                        tonic::Status::unknown(
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                let codec = tonic::codec::ProstCodec::default();
                let path = http::uri::PathAndQuery::from_static(
                    "/inference.GRPCInferenceService/ModelStreamInfer",
                );
                let mut req = request.into_streaming_request();
                req.extensions_mut()
                    .insert(
                        GrpcMethod::new(
                            "inference.GRPCInferenceService",
                            "ModelStreamInfer",
                        ),
                    );
                self.inner.streaming(req, path, codec).await
            }
        }
    }
    /// Generated server implementations.
    pub mod grpc_inference_service_server {
        #![allow(
            unused_variables,
            dead_code,
            missing_docs,
            clippy::wildcard_imports,
            clippy::let_unit_value
        )]
        use tonic::codegen::*;
        /// Generated trait containing gRPC methods that should be implemented for use with GrpcInferenceServiceServer.
        #[async_trait]
        pub trait GrpcInferenceService: std::marker::Send + std::marker::Sync + 'static {
            /// Perform inference using a specific model.
            async fn model_infer(
                &self,
                request: tonic::Request<super::ModelInferRequest>,
            ) -> std::result::Result<
                tonic::Response<super::ModelInferResponse>,
                tonic::Status,
            >;
            /// Server streaming response type for the ModelStreamInfer method.
            type ModelStreamInferStream: tonic::codegen::tokio_stream::Stream<
                    Item = std::result::Result<
                        super::ModelStreamInferResponse,
                        tonic::Status,
                    >,
                >
                + std::marker::Send
                + 'static;
            /// Perform streaming inference.
            async fn model_stream_infer(
                &self,
                request: tonic::Request<tonic::Streaming<super::ModelInferRequest>>,
            ) -> std::result::Result<
                tonic::Response<Self::ModelStreamInferStream>,
                tonic::Status,
            >;
        }
        /// Inference server GRPC endpoints.
        #[derive(Debug)]
        pub struct GrpcInferenceServiceServer<T> {
            inner: Arc<T>,
            accept_compression_encodings: EnabledCompressionEncodings,
            send_compression_encodings: EnabledCompressionEncodings,
            max_decoding_message_size: Option<usize>,
            max_encoding_message_size: Option<usize>,
        }
        impl<T> GrpcInferenceServiceServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }
            pub fn from_arc(inner: Arc<T>) -> Self {
                Self {
                    inner,
                    accept_compression_encodings: Default::default(),
                    send_compression_encodings: Default::default(),
                    max_decoding_message_size: None,
                    max_encoding_message_size: None,
                }
            }
            pub fn with_interceptor<F>(
                inner: T,
                interceptor: F,
            ) -> InterceptedService<Self, F>
            where
                F: tonic::service::Interceptor,
            {
                InterceptedService::new(Self::new(inner), interceptor)
            }
            /// Enable decompressing requests with the given encoding.
            #[must_use]
            pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.accept_compression_encodings.enable(encoding);
                self
            }
            /// Compress responses with the given encoding, if the client supports it.
            #[must_use]
            pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
                self.send_compression_encodings.enable(encoding);
                self
            }
            /// Limits the maximum size of a decoded message.
            ///
            /// Default: `4MB`
            #[must_use]
            pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
                self.max_decoding_message_size = Some(limit);
                self
            }
            /// Limits the maximum size of an encoded message.
            ///
            /// Default: `usize::MAX`
            #[must_use]
            pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
                self.max_encoding_message_size = Some(limit);
                self
            }
        }
        impl<T, B> tonic::codegen::Service<http::Request<B>>
        for GrpcInferenceServiceServer<T>
        where
            T: GrpcInferenceService,
            B: Body + std::marker::Send + 'static,
            B::Error: Into<StdError> + std::marker::Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = std::convert::Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;
            fn poll_ready(
                &mut self,
                _cx: &mut Context<'_>,
            ) -> Poll<std::result::Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }
            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                match req.uri().path() {
                    "/inference.GRPCInferenceService/ModelInfer" => {
                        #[allow(non_camel_case_types)]
                        struct ModelInferSvc<T: GrpcInferenceService>(pub Arc<T>);
                        impl<
                            T: GrpcInferenceService,
                        > tonic::server::UnaryService<super::ModelInferRequest>
                        for ModelInferSvc<T> {
                            type Response = super::ModelInferResponse;
                            type Future = BoxFuture<
                                tonic::Response<Self::Response>,
                                tonic::Status,
                            >;
                            fn call(
                                &mut self,
                                request: tonic::Request<super::ModelInferRequest>,
                            ) -> Self::Future {
                                let inner = Arc::clone(&self.0);
                                let fut = async move {
                                    <T as GrpcInferenceService>::model_infer(&inner, request)
                                        .await
                                };
                                Box::pin(fut)
                            }
                        }
                        let accept_compression_encodings = self.accept_compression_encodings;
                        let send_compression_encodings = self.send_compression_encodings;
                        let max_decoding_message_size = self.max_decoding_message_size;
                        let max_encoding_message_size = self.max_encoding_message_size;
                        let inner = self.inner.clone();
                        let fut = async move {
                            let method = ModelInferSvc(inner);
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec)
                                .apply_compression_config(
                                    accept_compression_encodings,
                                    send_compression_encodings,
                                )
                                .apply_max_message_size_config(
                                    max_decoding_message_size,
                                    max_encoding_message_size,
                                );
                            let res = grpc.unary(method, req).await;
                            Ok(res)
                        };
                        Box::pin(fut)
                    }
                    "/inference.GRPCInferenceService/ModelStreamInfer" => {
                        #[allow(non_camel_case_types)]
                        struct ModelStreamInferSvc<T: GrpcInferenceService>(pub Arc<T>);
                        impl<
                            T: GrpcInferenceService,
                        > tonic::server::StreamingService<super::ModelInferRequest>
                        for ModelStreamInferSvc<T> {
                            type Response = super::ModelStreamInferResponse;
                            type ResponseStream = T::ModelStreamInferStream;
                            type Future = BoxFuture<
                                tonic::Response<Self::ResponseStream>,
                                tonic::Status,
                            >;
                            fn call(
                                &mut self,
                                request: tonic::Request<tonic::Streaming<super::ModelInferRequest>>,
                            ) -> Self::Future {
                                let inner = Arc::clone(&self.0);
                                let fut = async move {
                                    <T as GrpcInferenceService>::model_stream_infer(
                                            &inner,
                                            request,
                                        )
                                        .await
                                };
                                Box::pin(fut)
                            }
                        }
                        let accept_compression_encodings = self.accept_compression_encodings;
                        let send_compression_encodings = self.send_compression_encodings;
                        let max_decoding_message_size = self.max_decoding_message_size;
                        let max_encoding_message_size = self.max_encoding_message_size;
                        let inner = self.inner.clone();
                        let fut = async move {
                            let method = ModelStreamInferSvc(inner);
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec)
                                .apply_compression_config(
                                    accept_compression_encodings,
                                    send_compression_encodings,
                                )
                                .apply_max_message_size_config(
                                    max_decoding_message_size,
                                    max_encoding_message_size,
                                );
                            let res = grpc.streaming(method, req).await;
                            Ok(res)
                        };
                        Box::pin(fut)
                    }
                    _ => {
                        Box::pin(async move {
                            let mut response = http::Response::new(empty_body());
                            let headers = response.headers_mut();
                            headers
                                .insert(
                                    tonic::Status::GRPC_STATUS,
                                    (tonic::Code::Unimplemented as i32).into(),
                                );
                            headers
                                .insert(
                                    http::header::CONTENT_TYPE,
                                    tonic::metadata::GRPC_CONTENT_TYPE,
                                );
                            Ok(response)
                        })
                    }
                }
            }
        }
        impl<T> Clone for GrpcInferenceServiceServer<T> {
            fn clone(&self) -> Self {
                let inner = self.inner.clone();
                Self {
                    inner,
                    accept_compression_encodings: self.accept_compression_encodings,
                    send_compression_encodings: self.send_compression_encodings,
                    max_decoding_message_size: self.max_decoding_message_size,
                    max_encoding_message_size: self.max_encoding_message_size,
                }
            }
        }
        /// Generated gRPC service name
        pub const SERVICE_NAME: &str = "inference.GRPCInferenceService";
        impl<T> tonic::server::NamedService for GrpcInferenceServiceServer<T> {
            const NAME: &'static str = SERVICE_NAME;
        }
    }
}
