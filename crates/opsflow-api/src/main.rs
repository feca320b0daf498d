//! Opsflow CLI and REST ingress entry point.
//!
//! Binary name: `opsflow`
//!
//! Parses CLI arguments, loads the engine configuration, wires the engine,
//! then dispatches to the matching command handler or starts the server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use secrecy::SecretString;

use cli::{ApprovalAction, Cli, Commands, ExecutionAction, TriggerAction, WorkflowAction};
use opsflow_infra::config::{default_config_path, load_engine_config};
use opsflow_observe::{init_tracing, shutdown_tracing, TracingOptions};
use opsflow_types::approval::ApprovalDecision;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The server logs at info by default; one-shot commands stay quiet.
    let serving = matches!(cli.command, Commands::Serve { .. });
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 if serving => "info",
        0 => "warn",
        1 => "info,opsflow_core=debug,opsflow_infra=debug,opsflow_api=debug",
        _ => "trace",
    };
    init_tracing(
        &TracingOptions::new(filter)
            .with_json(cli.log_json)
            .with_otel(cli.otel),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "opsflow", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_engine_config(&config_path).await?;

    // Validation reads connector schemas from config but needs no database.
    if let Commands::Validate { file } = &cli.command {
        let connectors = state::connector_registry(&config)?;
        return cli::workflow::validate(file, connectors, cli.json);
    }

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }

    let mut admin_token = None;
    if let Commands::Serve {
        host,
        port,
        workers,
        admin_token: token,
    } = &cli.command
    {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(workers) = workers {
            config.worker_count = *workers;
        }
        admin_token = token.clone().map(SecretString::from);
    }

    let state = AppState::init(config, admin_token).await?;
    let json = cli.json;

    match cli.command {
        Commands::Serve { .. } => cli::serve::serve(state).await?,

        Commands::Workflows { action } => match action {
            WorkflowAction::Import { path, draft } => {
                cli::workflow::import(&state, &path, draft, json).await?;
            }
            WorkflowAction::List { org } => cli::workflow::list(&state, &org, json).await?,
        },

        Commands::Triggers { action } => match action {
            TriggerAction::Create { kind } => cli::trigger::create(&state, kind, json).await?,
            TriggerAction::List { org } => cli::trigger::list(&state, &org, json).await?,
            TriggerAction::Logs { org, limit } => {
                cli::trigger::logs(&state, &org, limit, json).await?;
            }
        },

        Commands::Executions { action } => match action {
            ExecutionAction::List { org, status, limit } => {
                cli::execution::list(&state, &org, status, limit, json).await?;
            }
            ExecutionAction::Show { org, id } => {
                cli::execution::show(&state, &org, &id, json).await?;
            }
            ExecutionAction::Start {
                org,
                workflow,
                payload,
                thread,
            } => {
                cli::execution::start(&state, &org, &workflow, payload.as_deref(), thread, json)
                    .await?;
            }
            ExecutionAction::Cancel { org, id } => {
                cli::execution::cancel(&state, &org, &id, json).await?;
            }
        },

        Commands::Approvals { action } => match action {
            ApprovalAction::List { org, status } => {
                cli::approval::list(&state, &org, status, json).await?;
            }
            ApprovalAction::Approve { org, id, by } => {
                cli::approval::resolve(&state, &org, &id, ApprovalDecision::Approve, &by, json)
                    .await?;
            }
            ApprovalAction::Reject { org, id, by } => {
                cli::approval::resolve(&state, &org, &id, ApprovalDecision::Reject, &by, json)
                    .await?;
            }
        },

        Commands::Status { org } => cli::status::status(&state, &org, json).await?,

        Commands::Completions { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}
