use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::transport::FlowTransport;

const UNKNOWN_FLOW_NAME: &str = "Unknown";

/// Identity of the single configured flow.
///
/// Only exists when the flow is enabled and both id and name are set; a
/// partially configured flow is represented by the absence of a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    pub enabled: bool,
    pub id: String,
    /// Configured name, lowercased.
    pub name: String,
    /// Name reported by the Flowise API, or `"Unknown"` when the lookup
    /// failed.
    pub resolved_api_name: Option<String>,
}

impl FlowConfig {
    /// Resolves the flow described by `config`.
    ///
    /// Looking up the API name is best-effort: failures are logged and leave
    /// the flow usable with the `"Unknown"` placeholder.
    pub async fn resolve(config: &PipelineConfig, transport: &dyn FlowTransport) -> Option<Self> {
        info!("updating flow configuration");
        let (true, Some(id), Some(name)) = (
            config.flow_enabled,
            config.flow_id.as_deref(),
            config.flow_name.as_deref(),
        ) else {
            warn!("Flowise flow is not fully configured or not enabled");
            return None;
        };

        let api_name = match transport.fetch_flow(id).await {
            Ok(details) => details
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(UNKNOWN_FLOW_NAME)
                .to_string(),
            Err(err) => {
                error!(flow_id = id, transport = transport.name(), error = %err, "failed to fetch flow details");
                UNKNOWN_FLOW_NAME.to_string()
            }
        };

        let flow = Self {
            enabled: true,
            id: id.to_string(),
            name: name.to_lowercase(),
            resolved_api_name: Some(api_name),
        };
        info!(
            flow_name = %flow.name,
            api_name = flow.resolved_api_name.as_deref().unwrap_or(UNKNOWN_FLOW_NAME),
            flow_id = %flow.id,
            "flow configured"
        );
        Some(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::query::PredictionRequest;
    use crate::transport::{ChunkStream, PredictionBody, ReplayTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingLookup {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FlowTransport for FailingLookup {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_flow(&self, _flow_id: &str) -> Result<serde_json::Value, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::status(404, "not found"))
        }

        async fn stream_prediction(
            &self,
            _flow_id: &str,
            _request: &PredictionRequest,
        ) -> Result<ChunkStream, TransportError> {
            unreachable!()
        }

        async fn predict(
            &self,
            _flow_id: &str,
            _request: &PredictionRequest,
        ) -> Result<PredictionBody, TransportError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn resolves_api_name_and_lowercases_configured_name() {
        let config = PipelineConfig::new("http://x", "k").flow("abc", "Research Flow");
        let transport = ReplayTransport::default().flow_name("Deep Research");
        let flow = FlowConfig::resolve(&config, &transport)
            .await
            .expect("configured");
        assert_eq!(
            flow,
            FlowConfig {
                enabled: true,
                id: "abc".into(),
                name: "research flow".into(),
                resolved_api_name: Some("Deep Research".into()),
            }
        );
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_unknown() {
        let config = PipelineConfig::new("http://x", "k").flow("abc", "r");
        let transport = FailingLookup {
            calls: AtomicUsize::new(0),
        };
        let flow = FlowConfig::resolve(&config, &transport)
            .await
            .expect("still configured");
        assert_eq!(flow.resolved_api_name.as_deref(), Some("Unknown"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn incomplete_or_disabled_flow_is_unconfigured_without_lookup() {
        let transport = FailingLookup {
            calls: AtomicUsize::new(0),
        };
        let mut disabled = PipelineConfig::new("http://x", "k").flow("abc", "r");
        disabled.flow_enabled = false;
        let mut nameless = PipelineConfig::new("http://x", "k").flow("abc", "r");
        nameless.flow_name = None;
        let mut idless = PipelineConfig::new("http://x", "k").flow("abc", "r");
        idless.flow_id = None;

        assert_eq!(FlowConfig::resolve(&disabled, &transport).await, None);
        assert_eq!(FlowConfig::resolve(&nameless, &transport).await, None);
        assert_eq!(FlowConfig::resolve(&idless, &transport).await, None);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
