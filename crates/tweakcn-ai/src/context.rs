//! Per-request context.

use serde::Serialize;

use crate::llm::provider::ProviderConfig;

/// Identifies one request for tracing, logging and event correlation.
///
/// Built once per request and never mutated; nested calls derive a copy
/// with a different route via [`RequestContext::for_route`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub route: String,
    pub provider: String,
    pub model_id: String,
}

impl RequestContext {
    pub fn new(route: impl Into<String>, provider: &ProviderConfig) -> Self {
        Self {
            request_id: None,
            conversation_id: None,
            user_id: None,
            route: route.into(),
            provider: provider.provider_name().to_owned(),
            model_id: provider.model_id().to_owned(),
        }
    }

    pub fn with_correlation(
        mut self,
        request_id: Option<String>,
        conversation_id: Option<String>,
    ) -> Self {
        self.request_id = request_id;
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// The same request, seen from a nested call on another route.
    pub fn for_route(&self, route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{ModelHandle, ProviderKind};

    fn provider() -> ProviderConfig {
        ProviderConfig::from_model(ModelHandle {
            kind: ProviderKind::Groq,
            provider_name: "groq".into(),
            model_id: "llama-3.3-70b-versatile".into(),
            base_url: "http://localhost".into(),
            api_key: "k".into(),
        })
    }

    #[test]
    fn nested_route_keeps_identifiers() {
        let ctx = RequestContext::new("/api/generate-theme", &provider())
            .with_correlation(Some("r1".into()), Some("c1".into()))
            .with_user(Some("u1".into()));
        let nested = ctx.for_route("/api/generate-theme/tool");

        assert_eq!(nested.route, "/api/generate-theme/tool");
        assert_eq!(nested.request_id.as_deref(), Some("r1"));
        assert_eq!(nested.conversation_id.as_deref(), Some("c1"));
        assert_eq!(nested.user_id.as_deref(), Some("u1"));
        assert_eq!(nested.model_id, "llama-3.3-70b-versatile");
    }

    #[test]
    fn serializes_camel_case_without_absent_ids() {
        let ctx = RequestContext::new("/api/enhance-prompt", &provider());
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["modelId"], "llama-3.3-70b-versatile");
        assert!(json.get("requestId").is_none());
    }
}
