//! Typed payloads carried inside task records.
//!
//! Payloads travel through the broker as opaque JSON bytes; handlers
//! deserialize the structure registered for their kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Payload of the `demo` task kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoPayload {
    pub message: String,
    #[serde(default)]
    pub count: u32,
}

/// Payload of the `grpc_task` kind: a delegation to a remote executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcTaskPayload {
    /// Target service name (required); must match a configured executor.
    pub service: String,
    /// Method routed inside the remote service.
    #[serde(default)]
    pub method: String,
    /// Business data forwarded as a structured value.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    /// Per-task overrides of the service defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GrpcTaskOptions>,
}

/// Per-task execution options, overriding service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrpcTaskOptions {
    /// Remote call timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_interval_ms: Option<u32>,
}

impl GrpcTaskPayload {
    /// A payload without a target service can never be dispatched.
    pub fn validate(&self) -> Result<(), String> {
        if self.service.is_empty() {
            return Err("service is required".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grpc_payload_requires_service() {
        let p: GrpcTaskPayload = serde_json::from_str(r#"{"service":""}"#).unwrap();
        assert!(p.validate().is_err());

        let p: GrpcTaskPayload =
            serde_json::from_str(r#"{"service":"llm","method":"chat"}"#).unwrap();
        assert!(p.validate().is_ok());
        assert_eq!(p.method, "chat");
        assert!(p.data.is_empty());
    }

    #[test]
    fn grpc_payload_options_are_optional() {
        let p: GrpcTaskPayload = serde_json::from_str(
            r#"{"service":"llm","options":{"timeout_ms":5000}}"#,
        )
        .unwrap();
        let opts = p.options.unwrap();
        assert_eq!(opts.timeout_ms, Some(5000));
        assert_eq!(opts.enable_progress, None);
    }

    #[test]
    fn demo_payload_count_defaults_to_zero() {
        let p: DemoPayload = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(p.count, 0);
    }
}
