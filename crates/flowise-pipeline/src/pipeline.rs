//! Inbound interface used by the chat host.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{Instrument as _, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, TransportError};
use crate::flow::FlowConfig;
use crate::fragment::OutputFragment;
use crate::query::{
    ChatMessage, OverrideConfig, PredictionRequest, QueryComposer, session_id, system_message,
};
use crate::rate::RateLimiter;
use crate::stream::{self, FragmentStream};
use crate::transport::{FlowTransport, HttpTransport};

const FLOW_NOT_CONFIGURED: &str = "FlowiseAI flow is not configured or enabled.";
const EMPTY_QUERY: &str = "Query is empty.";

/// Builds the transport for a (possibly refreshed) configuration.
pub type TransportFactory =
    Arc<dyn Fn(&PipelineConfig) -> Result<Arc<dyn FlowTransport>, TransportError> + Send + Sync>;

/// Answer to one chat message.
pub enum PipeOutput {
    /// Aggregate mode: the whole transcript at once.
    Text(String),
    /// Incremental mode.
    Stream(FragmentStream),
}

impl PipeOutput {
    /// Drains the output into its transcript text.
    pub async fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Stream(stream) => {
                use futures::StreamExt as _;
                let fragments: Vec<OutputFragment> = stream.collect().await;
                crate::fragment::concat_text(&fragments)
            }
        }
    }
}

impl std::fmt::Debug for PipeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Everything a request needs, swapped as a whole on refresh.
struct PipelineState {
    config: Arc<PipelineConfig>,
    transport: Arc<dyn FlowTransport>,
    flow: Option<Arc<FlowConfig>>,
    /// `false` until the flow has been resolved against `config`.
    resolved: bool,
}

impl PipelineState {
    fn unresolved(config: PipelineConfig, transport: Arc<dyn FlowTransport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            flow: None,
            resolved: false,
        }
    }
}

/// The Flowise chat pipeline.
///
/// Requests take a snapshot of the configuration, transport and flow at
/// start. A refresh builds the replacement state first and swaps it in
/// afterwards, so in-flight requests finish with the state they started
/// with. Refreshes run one at a time; the last one to start wins.
pub struct Pipeline {
    state: RwLock<Arc<PipelineState>>,
    refresh_lock: Mutex<()>,
    factory: TransportFactory,
}

impl Pipeline {
    /// Pipeline talking to Flowise over HTTP.
    ///
    /// The flow is resolved by [`Pipeline::on_startup`], by a refresh, or by
    /// the first request, whichever comes first.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let factory: TransportFactory = Arc::new(
            |config: &PipelineConfig| -> Result<Arc<dyn FlowTransport>, TransportError> {
                Ok(Arc::new(HttpTransport::new(config)?))
            },
        );
        Self::with_factory(config, factory)
    }

    /// Pipeline configured from environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::new(PipelineConfig::from_env())
    }

    /// Pipeline that always uses `transport`, whatever the configuration.
    pub fn with_transport(config: PipelineConfig, transport: Arc<dyn FlowTransport>) -> Self {
        let state = PipelineState::unresolved(config, transport.clone());
        Self {
            state: RwLock::new(Arc::new(state)),
            refresh_lock: Mutex::new(()),
            factory: Arc::new(
                move |_: &PipelineConfig| -> Result<Arc<dyn FlowTransport>, TransportError> {
                    Ok(transport.clone())
                },
            ),
        }
    }

    /// Pipeline that builds its transport with `factory` on every refresh.
    pub fn with_factory(
        config: PipelineConfig,
        factory: TransportFactory,
    ) -> Result<Self, PipelineError> {
        let transport = factory(&config)?;
        let state = PipelineState::unresolved(config, transport);
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            refresh_lock: Mutex::new(()),
            factory,
        })
    }

    async fn snapshot(&self) -> Arc<PipelineState> {
        self.state.read().await.clone()
    }

    /// Current configuration.
    pub async fn config(&self) -> Arc<PipelineConfig> {
        self.snapshot().await.config.clone()
    }

    /// Currently resolved flow, if any.
    pub async fn flow(&self) -> Option<Arc<FlowConfig>> {
        self.snapshot().await.flow.clone()
    }

    /// Re-resolves the flow with the current configuration.
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot().await;
        self.install(current.config.clone(), current.transport.clone())
            .await;
    }

    /// Resolves the flow for `config` and swaps in the resulting state.
    ///
    /// Callers hold `refresh_lock`.
    async fn install(&self, config: Arc<PipelineConfig>, transport: Arc<dyn FlowTransport>) {
        let flow = FlowConfig::resolve(&config, transport.as_ref())
            .await
            .map(Arc::new);
        let next = PipelineState {
            config,
            transport,
            flow,
            resolved: true,
        };
        *self.state.write().await = Arc::new(next);
    }

    /// Snapshot whose flow has been resolved at least once.
    async fn resolved_snapshot(&self) -> Arc<PipelineState> {
        let current = self.snapshot().await;
        if current.resolved {
            return current;
        }
        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot().await;
        if !current.resolved {
            self.install(current.config.clone(), current.transport.clone())
                .await;
        }
        self.snapshot().await
    }

    pub async fn on_startup(&self) {
        info!("starting Flowise pipeline");
        self.refresh().await;
    }

    pub async fn on_shutdown(&self) {
        info!("shutting down Flowise pipeline");
    }

    /// Applies a new configuration and resolves the flow against it.
    ///
    /// On error the previous state stays active.
    pub async fn on_config_refreshed(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        info!("configuration updated, refreshing flow details");
        let _guard = self.refresh_lock.lock().await;
        let transport = (self.factory)(&config).inspect_err(|err| {
            error!(error = %err, "failed to build transport for new configuration");
        })?;
        self.install(Arc::new(config), transport).await;
        Ok(())
    }

    /// Handles one chat message.
    ///
    /// `body.stream` selects incremental output. Configuration problems and
    /// transport connection failures come back as a single explanatory
    /// fragment; nothing here returns an error to the host.
    pub async fn process_message(
        &self,
        user_message: &str,
        model_id: &str,
        history: &[ChatMessage],
        body: &Value,
    ) -> PipeOutput {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let span = info_span!("flowise_request", %request_id, model_id, streaming);

        async move {
            info!("pipeline triggered");
            let mut state = self.snapshot().await;
            // Without credentials the request is rejected before any lookup.
            if !state.resolved && state.config.validate_credentials().is_ok() {
                state = self.resolved_snapshot().await;
            }
            match prepare(&state, user_message, history, body) {
                Ok((flow, request)) => {
                    run(&state, &flow, request, streaming, started).await
                }
                Err(message) => short_circuit(message, streaming),
            }
        }
        .instrument(span)
        .await
    }
}

fn prepare(
    state: &PipelineState,
    user_message: &str,
    history: &[ChatMessage],
    body: &Value,
) -> Result<(Arc<FlowConfig>, PredictionRequest), String> {
    if let Err(PipelineError::Config(message)) = state.config.validate_credentials() {
        error!(%message, "credentials missing");
        return Err(message);
    }
    let Some(flow) = state.flow.clone().filter(|flow| flow.enabled) else {
        warn!("{FLOW_NOT_CONFIGURED}");
        return Err(FLOW_NOT_CONFIGURED.to_string());
    };
    let question = QueryComposer::new(state.config.append_datetime).compose(user_message);
    if question.is_empty() {
        warn!("{EMPTY_QUERY}");
        return Err(EMPTY_QUERY.to_string());
    }
    let override_config = OverrideConfig {
        session_id: session_id(body),
        system_message: system_message(body, history),
    };
    Ok((
        flow,
        PredictionRequest::new(question).override_config(override_config),
    ))
}

fn short_circuit(message: String, streaming: bool) -> PipeOutput {
    if streaming {
        PipeOutput::Stream(stream::single(OutputFragment::text(message)))
    } else {
        PipeOutput::Text(message)
    }
}

async fn run(
    state: &PipelineState,
    flow: &FlowConfig,
    request: PredictionRequest,
    streaming: bool,
    started: Instant,
) -> PipeOutput {
    let config = &state.config;
    let transport = &state.transport;
    RateLimiter::per_minute(config.rate_limit).throttle(started).await;

    info!(
        flow_id = %flow.id,
        flow_name = %flow.name,
        transport = transport.name(),
        "sending query to Flowise"
    );

    if streaming || config.collect_stream {
        let chunks = match transport.stream_prediction(&flow.id, &request).await {
            Ok(chunks) => chunks,
            Err(err) => return short_circuit(transport_failure(&err), streaming),
        };
        return if streaming {
            PipeOutput::Stream(stream::incremental(
                chunks,
                config.visibility.clone(),
                started,
            ))
        } else {
            PipeOutput::Text(stream::aggregate(chunks, config.visibility.clone()).await)
        };
    }

    match transport.predict(&flow.id, &request).await {
        Ok(body) => {
            info!("received single-shot response from Flowise");
            PipeOutput::Text(stream::render_prediction(&body))
        }
        Err(err) => PipeOutput::Text(transport_failure(&err)),
    }
}

fn transport_failure(err: &TransportError) -> String {
    error!(error = %err, "Flowise request failed");
    match err.status_code() {
        Some(status) => format!("Error from FlowiseAI: Status {status}"),
        None => format!("Error from FlowiseAI: {err}"),
    }
}
