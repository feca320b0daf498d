//! Application state wiring the engine together.
//!
//! AppState holds the concrete engine instances used by both the CLI and the
//! REST API. The dispatcher and ingestor are generic over the store; here
//! they are pinned to `SqliteStore`.

use std::sync::Arc;

use opsflow_core::connector::ConnectorRegistry;
use opsflow_core::event::{EventBus, DEFAULT_EVENT_CAPACITY};
use opsflow_core::llm::{LlmClient, UnconfiguredLlm};
use opsflow_core::service::SecretCipher;
use opsflow_core::workflow::action::ActionExecutor;
use opsflow_core::workflow::executor::{DispatcherConfig, WorkflowDispatcher};
use opsflow_core::workflow::step_runner::StepRunner;
use opsflow_core::workflow::trigger::TriggerIngestor;
use opsflow_infra::config::load_secret_cipher;
use opsflow_infra::connector::HttpConnector;
use opsflow_infra::crypto::{HmacSignatureVerifier, Sha256TokenHasher};
use opsflow_infra::llm::ChatCompletionsClient;
use opsflow_infra::sqlite::{DatabasePool, SqliteStore};
use opsflow_types::config::EngineConfig;
use secrecy::SecretString;

/// Register an HTTP connector for every `[[connectors]]` entry.
pub fn connector_registry(config: &EngineConfig) -> anyhow::Result<ConnectorRegistry> {
    let connectors = ConnectorRegistry::new();
    for connector in &config.connectors {
        connectors.register(HttpConnector::from_config(connector)?);
    }
    Ok(connectors)
}

pub type ConcreteDispatcher = WorkflowDispatcher<SqliteStore>;
pub type ConcreteIngestor = TriggerIngestor<SqliteStore>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub dispatcher: Arc<ConcreteDispatcher>,
    pub ingestor: Arc<ConcreteIngestor>,
    pub events: EventBus,
    pub config: Arc<EngineConfig>,
    /// Bearer token guarding the organization-scoped admin routes. When
    /// unset those routes answer 401.
    pub admin_token: Option<Arc<SecretString>>,
}

impl AppState {
    /// Initialize the application state: connect to the DB and wire the
    /// engine from `config`.
    pub async fn init(config: EngineConfig, admin_token: Option<SecretString>) -> anyhow::Result<Self> {
        let pool = DatabasePool::new(&config.database_url).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let events = EventBus::new(DEFAULT_EVENT_CAPACITY);

        let connectors = Arc::new(connector_registry(&config)?);

        let cipher: Option<Arc<dyn SecretCipher>> = match load_secret_cipher(&config)? {
            Some(cipher) => Some(Arc::new(cipher)),
            None => None,
        };

        let llm: Arc<dyn LlmClient> = match &config.llm {
            Some(llm) => Arc::new(ChatCompletionsClient::from_config(llm)?),
            None => Arc::new(UnconfiguredLlm),
        };

        let actions = ActionExecutor::new(connectors, cipher, events.clone());
        let runner = StepRunner::new(actions, llm);
        let dispatcher = Arc::new(WorkflowDispatcher::new(
            Arc::clone(&store),
            runner,
            events.clone(),
            DispatcherConfig::from_engine(&config),
        ));

        let ingestor = Arc::new(
            TriggerIngestor::new(
                Arc::clone(&dispatcher),
                Arc::new(Sha256TokenHasher::new()),
                config.rate_limit_per_minute,
            )
            .with_signature_verifier(Arc::new(HmacSignatureVerifier::new())),
        );

        tracing::debug!(
            database_url = config.database_url.as_str(),
            connectors = config.connectors.len(),
            llm = config.llm.is_some(),
            "application state ready"
        );

        Ok(Self {
            store,
            dispatcher,
            ingestor,
            events,
            config: Arc::new(config),
            admin_token: admin_token.map(Arc::new),
        })
    }
}
