//! Checked-in protobuf types for `taskflow.executor.v1`.
//!
//! Maintained by hand in the generated style so the build needs no protoc;
//! keep tags and the service path in sync with the executor contract.

/// Execute Task Request
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteTaskRequest {
    #[prost(string, tag = "1")]
    pub task_id: ::prost::alloc::string::String,
    /// Method routed inside the remote service.
    #[prost(string, tag = "2")]
    pub task_type: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub payload: ::core::option::Option<::prost_types::Struct>,
    #[prost(map = "string, string", tag = "4")]
    pub metadata:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(message, optional, tag = "5")]
    pub options: ::core::option::Option<ExecutionOptions>,
}

/// Execution Options
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ExecutionOptions {
    #[prost(int64, tag = "1")]
    pub timeout_ms: i64,
    #[prost(bool, tag = "2")]
    pub enable_progress: bool,
    #[prost(int32, tag = "3")]
    pub progress_interval_ms: i32,
}

/// Execute Task Response (stream element)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteTaskResponse {
    #[prost(oneof = "execute_task_response::Response", tags = "1, 2, 3")]
    pub response: ::core::option::Option<execute_task_response::Response>,
}

/// Nested message and enum types in `ExecuteTaskResponse`.
pub mod execute_task_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Progress(super::Progress),
        #[prost(message, tag = "2")]
        Result(super::TaskResult),
        #[prost(message, tag = "3")]
        Error(super::TaskError),
    }
}

/// Progress
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Progress {
    #[prost(string, tag = "1")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub percentage: i32,
    #[prost(string, tag = "3")]
    pub stage: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub message: ::prost::alloc::string::String,
}

/// Task Result
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskResult {
    #[prost(string, tag = "1")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(enumeration = "TaskStatus", tag = "2")]
    pub status: i32,
    #[prost(message, optional, tag = "3")]
    pub data: ::core::option::Option<::prost_types::Struct>,
    #[prost(int64, tag = "4")]
    pub duration_ms: i64,
}

/// Task Error
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskError {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub retryable: bool,
}

/// Cancel Task Request
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTaskRequest {
    #[prost(string, tag = "1")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}

/// Cancel Task Response
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTaskResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

/// Health Check Request
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HealthCheckRequest {}

/// Health Check Response
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckResponse {
    #[prost(enumeration = "HealthStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TaskStatus {
    Unspecified = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl TaskStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TaskStatus::Unspecified => "TASK_STATUS_UNSPECIFIED",
            TaskStatus::Completed => "TASK_STATUS_COMPLETED",
            TaskStatus::Failed => "TASK_STATUS_FAILED",
            TaskStatus::Cancelled => "TASK_STATUS_CANCELLED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum HealthStatus {
    Unspecified = 0,
    Healthy = 1,
    Degraded = 2,
    Unhealthy = 3,
}

impl HealthStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            HealthStatus::Unspecified => "HEALTH_STATUS_UNSPECIFIED",
            HealthStatus::Healthy => "HEALTH_STATUS_HEALTHY",
            HealthStatus::Degraded => "HEALTH_STATUS_DEGRADED",
            HealthStatus::Unhealthy => "HEALTH_STATUS_UNHEALTHY",
        }
    }
}

/// Convert a JSON object into a protobuf `Struct` for the request payload.
pub fn json_map_to_struct(
    map: &std::collections::HashMap<String, serde_json::Value>,
) -> ::prost_types::Struct {
    ::prost_types::Struct {
        fields: map
            .iter()
            .map(|(k, v)| (k.clone(), json_to_value(v)))
            .collect(),
    }
}

fn json_to_value(v: &serde_json::Value) -> ::prost_types::Value {
    use ::prost_types::value::Kind;
    let kind = match v {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(::prost_types::ListValue {
            values: items.iter().map(json_to_value).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::StructValue(::prost_types::Struct {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        }),
    };
    ::prost_types::Value { kind: Some(kind) }
}

/// Generated client implementations.
pub mod task_executor_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct TaskExecutorServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl TaskExecutorServiceClient<tonic::transport::Channel> {
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

    impl<T> TaskExecutorServiceClient<T>
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

        /// Execute a task, receiving progress and the final result as a
        /// server stream.
        pub async fn execute_task(
            &mut self,
            request: impl tonic::IntoRequest<super::ExecuteTaskRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::ExecuteTaskResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/taskflow.executor.v1.TaskExecutorService/ExecuteTask",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "taskflow.executor.v1.TaskExecutorService",
                "ExecuteTask",
            ));
            self.inner.server_streaming(req, path, codec).await
        }

        pub async fn cancel_task(
            &mut self,
            request: impl tonic::IntoRequest<super::CancelTaskRequest>,
        ) -> std::result::Result<tonic::Response<super::CancelTaskResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/taskflow.executor.v1.TaskExecutorService/CancelTask",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "taskflow.executor.v1.TaskExecutorService",
                "CancelTask",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn health_check(
            &mut self,
            request: impl tonic::IntoRequest<super::HealthCheckRequest>,
        ) -> std::result::Result<tonic::Response<super::HealthCheckResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/taskflow.executor.v1.TaskExecutorService/HealthCheck",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "taskflow.executor.v1.TaskExecutorService",
                "HealthCheck",
            ));
            self.inner.unary(req, path, codec).await
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_conversion_covers_scalars() {
        let mut map = std::collections::HashMap::new();
        map.insert("s".to_owned(), serde_json::json!("text"));
        map.insert("n".to_owned(), serde_json::json!(2.5));
        map.insert("b".to_owned(), serde_json::json!(true));
        map.insert("null".to_owned(), serde_json::Value::Null);

        let s = json_map_to_struct(&map);
        assert_eq!(s.fields.len(), 4);
        assert!(matches!(
            s.fields["s"].kind,
            Some(::prost_types::value::Kind::StringValue(_))
        ));
        assert!(matches!(
            s.fields["n"].kind,
            Some(::prost_types::value::Kind::NumberValue(_))
        ));
    }

    #[test]
    fn json_conversion_nests_arrays_and_objects() {
        let mut map = std::collections::HashMap::new();
        map.insert("items".to_owned(), serde_json::json!([1, "two", {"k": 3}]));

        let s = json_map_to_struct(&map);
        let Some(::prost_types::value::Kind::ListValue(list)) = &s.fields["items"].kind else {
            panic!("expected list value");
        };
        assert_eq!(list.values.len(), 3);
        assert!(matches!(
            list.values[2].kind,
            Some(::prost_types::value::Kind::StructValue(_))
        ));
    }

    #[test]
    fn task_status_names() {
        assert_eq!(TaskStatus::Completed.as_str_name(), "TASK_STATUS_COMPLETED");
        assert_eq!(
            TaskStatus::try_from(2).unwrap().as_str_name(),
            "TASK_STATUS_FAILED"
        );
    }
}
