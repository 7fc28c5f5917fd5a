//! Wire types and client for the `grapio.GrapioService` gRPC API.
//!
//! The messages are derived by hand with `prost` instead of being generated
//! at build time, so building the crate does not need `protoc`. They match:
//!
//! ```proto
//! syntax = "proto3";
//! package grapio;
//!
//! service GrapioService {
//!   rpc FetchFeatureFlags (FeatureFlagsRequest) returns (stream FeatureFlagReply);
//! }
//!
//! message FeatureFlagsRequest {
//!   string requester = 1;
//! }
//!
//! message FeatureFlagReply {
//!   string key = 1;
//!   oneof value {
//!     bool boolean_value = 2;
//!     string string_value = 3;
//!     int64 integer_value = 4;
//!     double double_value = 5;
//!     bytes structure_value = 6;
//!   }
//! }
//! ```

use tonic::codegen::{http, Body, Bytes, StdError};

use crate::flag::ValueKind;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeatureFlagsRequest {
    #[prost(string, tag = "1")]
    pub requester: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FeatureFlagReply {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(oneof = "feature_flag_reply::Value", tags = "2, 3, 4, 5, 6")]
    pub value: ::core::option::Option<feature_flag_reply::Value>,
}

pub mod feature_flag_reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "2")]
        BooleanValue(bool),
        #[prost(string, tag = "3")]
        StringValue(::prost::alloc::string::String),
        #[prost(int64, tag = "4")]
        IntegerValue(i64),
        #[prost(double, tag = "5")]
        DoubleValue(f64),
        #[prost(bytes = "vec", tag = "6")]
        StructureValue(::prost::alloc::vec::Vec<u8>),
    }
}

impl FeatureFlagReply {
    /// Which value variant this record carries.
    pub fn value_kind(&self) -> ValueKind {
        use feature_flag_reply::Value;

        match &self.value {
            Some(Value::BooleanValue(_)) => ValueKind::Boolean,
            Some(Value::StringValue(_)) => ValueKind::String,
            Some(Value::IntegerValue(_)) => ValueKind::Integer,
            Some(Value::DoubleValue(_)) => ValueKind::Double,
            Some(Value::StructureValue(_)) => ValueKind::Structure,
            None => ValueKind::NotSet,
        }
    }
}

const FETCH_FEATURE_FLAGS_PATH: &str = "/grapio.GrapioService/FetchFeatureFlags";

/// Client for `grapio.GrapioService`.
#[derive(Debug, Clone)]
pub struct GrapioServiceClient<T> {
    inner: tonic::client::Grpc<T>,
}

impl GrapioServiceClient<tonic::transport::Channel> {
    pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
    where
        D: TryInto<tonic::transport::Endpoint>,
        D::Error: Into<StdError>,
    {
        let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
        Ok(Self::new(conn))
    }
}

impl<T> GrapioServiceClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner: tonic::client::Grpc::new(inner),
        }
    }

    /// Opens the server-streaming call that downloads the full flag set.
    pub async fn fetch_feature_flags(
        &mut self,
        request: impl tonic::IntoRequest<FeatureFlagsRequest>,
    ) -> Result<tonic::Response<tonic::codec::Streaming<FeatureFlagReply>>, tonic::Status> {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::new(
                tonic::Code::Unknown,
                format!("Service was not ready: {}", e.into()),
            )
        })?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(FETCH_FEATURE_FLAGS_PATH);
        self.inner
            .server_streaming(request.into_request(), path, codec)
            .await
    }
}
