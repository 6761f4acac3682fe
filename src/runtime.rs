//! Everything an agent run needs, assembled once from the configuration.
//!
//! The runtime is passed explicitly to the CLI commands and the web
//! handlers; there is no global model or embedder.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agents::{load_prompt, Agent, AgentError, AgentKind, AgentOutcome, AgentSpec};
use crate::catalog::FunctionCatalog;
use crate::config::Config;
use crate::context::ContextStore;
use crate::llm::{build_chat_model, build_embedder, ChatModel, Embedder, OllamaClient};
use crate::routing::FunctionRouter;
use crate::tools::{
    AlphaVantageClient, AlphaVantageToolSpec, CodeInterpreterToolSpec, DateTimeToolSpec,
    EmailReaderToolSpec, ExchangeRateClient, ExchangeRateToolSpec, FinancialDataToolSpec,
    FlightsToolSpec, ToolRegistry,
};
use crate::vector::{ChromaStore, InMemoryStore, VectorStore};
use crate::workflow::TraderWorkflow;

pub struct Runtime {
    pub config: Config,
    pub chat: ChatModel,
    pub embedder: Arc<dyn Embedder>,
    pub router: Arc<FunctionRouter>,
    pub email_store: Arc<dyn VectorStore>,
    pub alpha_vantage: Arc<AlphaVantageClient>,
    pub exchange_rate: Arc<ExchangeRateClient>,
    pub contexts: ContextStore,
    /// Serializes load-run-save cycles on each agent's persisted context.
    context_locks: HashMap<AgentKind, Mutex<()>>,
}

impl Runtime {
    /// Build the runtime. `offline` swaps Chroma for in-memory collections.
    pub fn from_config(config: Config, offline: bool) -> anyhow::Result<Self> {
        let chat = build_chat_model(&config)?;
        let embedder = build_embedder(&config);

        let (functions_store, email_store): (Arc<dyn VectorStore>, Arc<dyn VectorStore>) =
            if offline {
                tracing::info!("Offline mode: using in-memory vector collections");
                (
                    Arc::new(InMemoryStore::new(&config.chroma.functions_collection)),
                    Arc::new(InMemoryStore::new(&config.chroma.email_collection)),
                )
            } else {
                (
                    Arc::new(ChromaStore::new(
                        &config.chroma.url,
                        &config.chroma.functions_collection,
                    )),
                    Arc::new(ChromaStore::new(
                        &config.chroma.url,
                        &config.chroma.email_collection,
                    )),
                )
            };

        Ok(Self::assemble(
            config,
            chat,
            embedder,
            functions_store,
            email_store,
        ))
    }

    /// Build the runtime from explicit parts.
    pub fn assemble(
        config: Config,
        chat: ChatModel,
        embedder: Arc<dyn Embedder>,
        functions_store: Arc<dyn VectorStore>,
        email_store: Arc<dyn VectorStore>,
    ) -> Self {
        let catalog = Arc::new(FunctionCatalog::load(&config.functions_path));
        let router = Arc::new(FunctionRouter::new(
            catalog,
            Arc::clone(&embedder),
            functions_store,
        ));
        let alpha_vantage = Arc::new(AlphaVantageClient::new(
            &config.alpha_vantage_url,
            config.alpha_vantage_key.clone(),
        ));
        let exchange_rate = Arc::new(ExchangeRateClient::new(&config.exchange_rate_url));
        let contexts = ContextStore::new(&config.context_dir);

        Self {
            config,
            chat,
            embedder,
            router,
            email_store,
            alpha_vantage,
            exchange_rate,
            contexts,
            context_locks: AgentKind::ALL
                .into_iter()
                .map(|kind| (kind, Mutex::new(())))
                .collect(),
        }
    }

    /// The chat model, or another one when `model` names a different model.
    pub fn chat_model(&self, model: Option<&str>) -> anyhow::Result<ChatModel> {
        match model.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) if m != self.config.model => Ok(build_chat_model(&self.config.with_model(m)?)?),
            _ => Ok(self.chat.clone()),
        }
    }

    /// The tools an agent is equipped with.
    pub fn tools_for(&self, kind: AgentKind) -> ToolRegistry {
        let exchange = ExchangeRateToolSpec::new(Arc::clone(&self.exchange_rate));
        match kind {
            AgentKind::Broker => ToolRegistry::new()
                .with_spec(&AlphaVantageToolSpec::new(
                    Arc::clone(&self.alpha_vantage),
                    Arc::clone(&self.router),
                ))
                .with_spec(&exchange),
            AgentKind::Travel => ToolRegistry::new()
                .with_spec(&FlightsToolSpec::new(&self.config.rapidapi))
                .with_spec(&exchange),
            AgentKind::Alfred => ToolRegistry::new()
                .with_spec(&DateTimeToolSpec)
                .with_spec(&EmailReaderToolSpec::new(
                    Arc::clone(&self.embedder),
                    Arc::clone(&self.email_store),
                ))
                .with_spec(&CodeInterpreterToolSpec::new(
                    &self.config.code_interpreter_image,
                )),
            AgentKind::Investor => ToolRegistry::new()
                .with_spec(&FinancialDataToolSpec::new(&self.config.rapidapi))
                .with_spec(&exchange),
        }
    }

    pub fn agent(&self, kind: AgentKind, chat: ChatModel) -> Agent {
        let spec = AgentSpec {
            name: kind.name().to_string(),
            description: kind.description().to_string(),
            system_prompt: load_prompt(&self.config.prompts_dir, kind),
            tools: self.tools_for(kind),
        };
        Agent::new(spec, chat, self.config.max_iterations)
    }

    /// One question to one agent. With `store_context` the agent's
    /// conversation is loaded before and saved after the run.
    pub async fn ask(
        &self,
        kind: AgentKind,
        question: &str,
        model: Option<&str>,
        store_context: bool,
    ) -> anyhow::Result<AgentOutcome> {
        let chat = self.chat_model(model)?;
        let agent = self.agent(kind, chat);

        if !store_context {
            let mut ctx = crate::context::ConversationContext::new(kind.name(), agent.model());
            return Ok(agent.run(question, &mut ctx).await?);
        }

        let _guard = match self.context_locks.get(&kind) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let mut ctx = self.contexts.load_or_new(kind.name(), agent.model()).await;
        let outcome = agent.run(question, &mut ctx).await?;
        ctx.model = agent.model().to_string();
        self.contexts.save(&ctx).await.map_err(AgentError::from)?;
        Ok(outcome)
    }

    pub fn trader_workflow(&self, chat: ChatModel) -> TraderWorkflow {
        TraderWorkflow::new(
            chat,
            Arc::clone(&self.router),
            Arc::clone(&self.alpha_vantage),
        )
    }

    /// Log the state of the external services; nothing here is fatal.
    pub async fn check_services(&self) -> ServiceHealth {
        let ollama = OllamaClient::new(&self.config.ollama_url).health_check().await;
        if ollama {
            tracing::info!("Ollama reachable at {}", self.config.ollama_url);
        } else {
            tracing::warn!(
                "Ollama is not reachable at {}; chat and embeddings will fail",
                self.config.ollama_url
            );
        }

        let vector_store = match self.email_store.heartbeat().await {
            Ok(()) => {
                match self.email_store.count().await {
                    Ok(n) => tracing::info!(
                        "Vector store reachable, '{}' holds {} documents",
                        self.email_store.collection(),
                        n
                    ),
                    Err(e) => tracing::warn!(
                        "Vector store reachable, but '{}' cannot be counted: {}",
                        self.email_store.collection(),
                        e
                    ),
                }
                true
            }
            Err(e) => {
                tracing::warn!("Vector store is not reachable: {}", e);
                false
            }
        };

        let catalog_functions = self.router.catalog().len();
        if catalog_functions == 0 {
            tracing::warn!(
                "Function catalog {} is empty; the broker cannot route requests",
                self.config.functions_path.display()
            );
        }

        ServiceHealth {
            ollama,
            vector_store,
            catalog_functions,
        }
    }
}

/// Result of [`Runtime::check_services`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHealth {
    pub ollama: bool,
    pub vector_store: bool,
    pub catalog_functions: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedLlm;
    use crate::routing::tests::KeywordEmbedder;

    pub(crate) fn test_runtime(llm: Arc<ScriptedLlm>, context_dir: &std::path::Path) -> Runtime {
        runtime_with_client(llm, context_dir)
    }

    fn runtime_with_client(
        client: Arc<dyn crate::llm::LlmClient>,
        context_dir: &std::path::Path,
    ) -> Runtime {
        let mut config = Config::new("llama3.1", "http://127.0.0.1:9");
        config.context_dir = context_dir.to_path_buf();
        config.prompts_dir = context_dir.join("no-prompts");
        config.functions_path = context_dir.join("no-functions.json");
        Runtime::assemble(
            config,
            ChatModel {
                client,
                model: "llama3.1".to_string(),
            },
            Arc::new(KeywordEmbedder::new()),
            Arc::new(InMemoryStore::new("docs")),
            Arc::new(InMemoryStore::new("alfred")),
        )
    }

    #[test]
    fn test_each_agent_gets_its_tools() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(Arc::new(ScriptedLlm::default()), dir.path());

        let broker = runtime.tools_for(AgentKind::Broker);
        assert!(broker.has_tool("get_relevant_functions"));
        assert!(broker.has_tool("execute_function"));
        assert!(broker.has_tool("convert"));

        let travel = runtime.tools_for(AgentKind::Travel);
        assert!(travel.has_tool("round_trip_flight"));
        assert!(travel.has_tool("get_exchange_rates"));
        assert!(!travel.has_tool("execute_function"));

        let alfred = runtime.tools_for(AgentKind::Alfred);
        assert_eq!(alfred.len(), 3);
        assert!(alfred.has_tool("email_reader_engine"));

        let investor = runtime.tools_for(AgentKind::Investor);
        assert_eq!(investor.len(), 22 + 2);
    }

    #[tokio::test]
    async fn test_ask_persists_context_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            ScriptedLlm::text("Good evening."),
            ScriptedLlm::text("Still here."),
        ]));
        let runtime = test_runtime(llm.clone(), dir.path());

        runtime
            .ask(AgentKind::Alfred, "Hello", None, false)
            .await
            .unwrap();
        assert!(!runtime.contexts.path_for("alfred").exists());

        runtime
            .ask(AgentKind::Alfred, "Anyone home?", None, true)
            .await
            .unwrap();
        let saved = runtime.contexts.load_or_new("alfred", "llama3.1").await;
        assert_eq!(saved.turns(), 1);
        assert_eq!(saved.messages[0].text_content(), Some("Anyone home?"));
    }

    /// Hangs on the question "wait", answers anything else at once.
    struct Gated {
        entered: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl crate::llm::LlmClient for Gated {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[crate::llm::ChatMessage],
            _tools: Option<&[crate::llm::ToolDefinition]>,
        ) -> anyhow::Result<crate::llm::ChatResponse> {
            if messages.last().and_then(|m| m.text_content()) == Some("wait") {
                self.entered.notify_one();
                std::future::pending::<()>().await;
            }
            Ok(ScriptedLlm::text("Done."))
        }
    }

    #[tokio::test]
    async fn test_stored_runs_only_wait_on_the_same_agent() {
        let dir = tempfile::tempdir().unwrap();
        let gated = Arc::new(Gated {
            entered: tokio::sync::Notify::new(),
        });
        let runtime = Arc::new(runtime_with_client(gated.clone(), dir.path()));

        let slow = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move { runtime.ask(AgentKind::Alfred, "wait", None, true).await }
        });
        gated.entered.notified().await;

        let travel = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            runtime.ask(AgentKind::Travel, "Flights to Rome?", None, true),
        )
        .await
        .expect("another agent must not wait on the running one")
        .unwrap();
        assert_eq!(travel.answer, "Done.");
        assert!(runtime.contexts.path_for("travel").exists());

        let same_agent = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            runtime.ask(AgentKind::Alfred, "Anything else?", None, true),
        )
        .await;
        assert!(same_agent.is_err());

        slow.abort();
    }

    #[tokio::test]
    async fn test_check_services_uses_chroma_heartbeat() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/heartbeat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("llama3.1", "http://127.0.0.1:9");
        config.functions_path = dir.path().join("no-functions.json");
        let runtime = Runtime::assemble(
            config,
            ChatModel {
                client: Arc::new(ScriptedLlm::default()),
                model: "llama3.1".to_string(),
            },
            Arc::new(KeywordEmbedder::new()),
            Arc::new(InMemoryStore::new("docs")),
            Arc::new(ChromaStore::new(&server.uri(), "alfred")),
        );

        // Collection creation is not mocked, so only the count fails.
        let health = runtime.check_services().await;
        assert!(health.vector_store);
        assert!(!health.ollama);
        assert_eq!(health.catalog_functions, 0);

        let offline = Runtime::assemble(
            Config::new("llama3.1", "http://127.0.0.1:9"),
            ChatModel {
                client: Arc::new(ScriptedLlm::default()),
                model: "llama3.1".to_string(),
            },
            Arc::new(KeywordEmbedder::new()),
            Arc::new(InMemoryStore::new("docs")),
            Arc::new(ChromaStore::new("http://127.0.0.1:9", "alfred")),
        );
        assert!(!offline.check_services().await.vector_store);
    }
}
