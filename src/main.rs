//! Alfred - command-line entry point.

use std::io::{self, Write};

use alfred::{
    agents::AgentKind,
    api,
    context::ConversationContext,
    gmail::{ingest_emails, GmailReader},
    routing::DEFAULT_TOP_K,
    Config, Runtime,
};
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "alfred", version, about = "Your smart butler, at your service")]
struct Cli {
    /// Use in-memory vector collections instead of Chroma
    #[arg(long, global = true)]
    offline: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Ask an agent a single question")]
    Ask {
        question: String,
        #[arg(short, long, value_enum, default_value_t = AgentKind::Broker)]
        agent: AgentKind,
        /// Load the agent's conversation before answering and save it after
        #[arg(short, long)]
        store: bool,
        #[arg(short, long)]
        model: Option<String>,
    },
    #[command(about = "Interactive conversation ('new' resets, 'exit' quits)")]
    Chat {
        #[arg(short, long, value_enum, default_value_t = AgentKind::Alfred)]
        agent: AgentKind,
        #[arg(short, long)]
        model: Option<String>,
    },
    #[command(about = "Run the trader workflow and print the collected market data")]
    Trade {
        question: String,
        #[arg(short, long)]
        model: Option<String>,
    },
    #[command(about = "Show the Alpha Vantage functions closest to a query")]
    Route {
        query: String,
        #[arg(short, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },
    #[command(about = "Ingest Gmail messages into the e-mail collection")]
    ScanEmails {
        /// Gmail search query (defaults to GMAIL_QUERY)
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    #[command(about = "Start the web chat and the OpenAI-compatible endpoint")]
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "alfred=debug,tower_http=debug"
    } else {
        "alfred=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Loaded configuration: model={}, ollama={}",
        config.model,
        config.ollama_url
    );
    let runtime = Runtime::from_config(config, cli.offline)?;

    match cli.command {
        Command::Ask {
            question,
            agent,
            store,
            model,
        } => {
            let outcome = runtime
                .ask(agent, &question, model.as_deref(), store)
                .await?;
            println!("{}", outcome.answer);
        }
        Command::Chat { agent, model } => chat(&runtime, agent, model.as_deref()).await?,
        Command::Trade { question, model } => {
            let chat = runtime.chat_model(model.as_deref())?;
            let outcome = runtime.trader_workflow(chat).run(&question).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Route { query, k } => {
            let routed = runtime.router.route(&query, k).await?;
            println!("{}", serde_json::to_string_pretty(&routed)?);
        }
        Command::ScanEmails { query, limit } => {
            let token = runtime
                .config
                .gmail_access_token
                .clone()
                .context("GMAIL_ACCESS_TOKEN is not set")?;
            let query = query.unwrap_or_else(|| runtime.config.gmail_query.clone());
            let reader = GmailReader::new(token);
            let stored = ingest_emails(
                &reader,
                &query,
                limit,
                runtime.embedder.as_ref(),
                runtime.email_store.as_ref(),
            )
            .await?;
            println!("Stored {} e-mails", stored);
        }
        Command::Serve => {
            runtime.check_services().await;
            api::serve(runtime).await?;
        }
    }

    Ok(())
}

/// Read-eval loop. The conversation lives for the session only.
async fn chat(runtime: &Runtime, kind: AgentKind, model: Option<&str>) -> anyhow::Result<()> {
    let agent = runtime.agent(kind, runtime.chat_model(model)?);
    let mut ctx = ConversationContext::new(kind.name(), agent.model());
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Talking to {} ({}). Type 'new' to start over, 'exit' to quit.", kind, agent.model());
    loop {
        print!("Q: ");
        io::stdout().flush().context("failed to flush stdout")?;
        line.clear();
        if stdin
            .read_line(&mut line)
            .context("failed to read input from stdin")?
            == 0
        {
            break;
        }

        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.eq_ignore_ascii_case("new") {
            ctx.reset();
            println!("Starting a new conversation.");
            continue;
        }
        if input.is_empty() {
            continue;
        }

        match agent.run(input, &mut ctx).await {
            Ok(outcome) => println!("{}\n", outcome.answer),
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }
    Ok(())
}
