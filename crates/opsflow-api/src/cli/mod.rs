//! CLI command definitions and dispatch for the `opsflow` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a
//! noun-verb pattern (e.g., `opsflow executions list`, `opsflow approvals
//! approve <id>`). Organization-scoped commands read `--org` or
//! `OPSFLOW_ORG`.

pub mod approval;
pub mod execution;
pub mod serve;
pub mod status;
pub mod trigger;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use console::style;
use uuid::Uuid;

use opsflow_types::approval::ApprovalStatus;
use opsflow_types::execution::ExecutionStatus;

/// Durable workflow execution engine.
#[derive(Parser)]
#[command(name = "opsflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the engine configuration file.
    #[arg(long, global = true, env = "OPSFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database URL (overrides the configuration file).
    #[arg(long, global = true, env = "OPSFLOW_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Write logs as JSON lines.
    #[arg(long, global = true, env = "OPSFLOW_LOG_JSON")]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "OPSFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST ingress, dispatcher workers and schedule driver.
    Serve {
        /// Address to bind.
        #[arg(long, env = "OPSFLOW_HOST")]
        host: Option<String>,

        /// Port to listen on.
        #[arg(short, long, env = "OPSFLOW_PORT")]
        port: Option<u16>,

        /// Number of dispatcher workers.
        #[arg(long, env = "OPSFLOW_WORKERS")]
        workers: Option<usize>,

        /// Bearer token for the organization-scoped admin routes.
        #[arg(long, env = "OPSFLOW_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: Option<String>,
    },

    /// Validate a workflow bundle without storing it.
    Validate {
        /// Path to a YAML bundle.
        file: PathBuf,
    },

    /// Publish and list workflow definitions.
    #[command(alias = "wf")]
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Create and inspect triggers.
    Triggers {
        #[command(subcommand)]
        action: TriggerAction,
    },

    /// Start, inspect and cancel executions.
    #[command(alias = "exec")]
    Executions {
        #[command(subcommand)]
        action: ExecutionAction,
    },

    /// Review approval-gated actions.
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Summary of an organization's executions, approvals and triggers.
    Status {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// Publish a bundle file, or every bundle under a directory, as the
    /// active version of its workflow.
    Import {
        /// YAML file or directory of bundles.
        path: PathBuf,

        /// Store as a draft instead of activating.
        #[arg(long)]
        draft: bool,
    },

    /// List stored workflow versions.
    #[command(alias = "ls")]
    List {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,
    },
}

#[derive(Subcommand)]
pub enum TriggerAction {
    /// Create a trigger for a workflow.
    Create {
        #[command(subcommand)]
        kind: CreateTrigger,
    },

    /// List an organization's triggers.
    #[command(alias = "ls")]
    List {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,
    },

    /// Show recent trigger attempts.
    Logs {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Maximum rows to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum CreateTrigger {
    /// Webhook reachable at `/api/v1/hooks/<token>`.
    Webhook {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Workflow root id.
        #[arg(long)]
        workflow: Uuid,

        /// Require an HMAC-SHA256 signature with this secret.
        #[arg(long)]
        signing_secret: Option<String>,
    },

    /// API key accepted by `POST /api/v1/trigger`.
    ApiKey {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Workflow root id.
        #[arg(long)]
        workflow: Uuid,

        /// Expire the key after this many days.
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// Subscription to an event type.
    Event {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Workflow root id.
        #[arg(long)]
        workflow: Uuid,

        /// Event type to subscribe to (e.g. `order.created`).
        #[arg(long)]
        event_type: String,

        /// JSON object of payload fields that must match.
        #[arg(long)]
        filter: Option<String>,
    },

    /// Cron schedule.
    Schedule {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Workflow root id.
        #[arg(long)]
        workflow: Uuid,

        /// Cron expression or phrase such as "every 5 minutes".
        #[arg(long)]
        cron: String,

        /// IANA timezone the schedule is evaluated in, e.g. "Europe/Berlin".
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
}

#[derive(Subcommand)]
pub enum ExecutionAction {
    /// List recent executions.
    #[command(alias = "ls")]
    List {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Filter by status.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Maximum rows to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Show an execution with its step history.
    Show {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        id: Uuid,
    },

    /// Start a workflow and run it in this process until it finishes or
    /// waits for approval.
    Start {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        /// Workflow root id.
        workflow: Uuid,

        /// JSON payload.
        #[arg(long)]
        payload: Option<String>,

        /// Conversation thread id.
        #[arg(long)]
        thread: Option<String>,
    },

    /// Cancel a running or waiting execution.
    Cancel {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum ApprovalAction {
    /// List approvals (pending unless a status is given).
    #[command(alias = "ls")]
    List {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        #[arg(long)]
        status: Option<ApprovalStatus>,
    },

    /// Approve a gated action and continue the execution.
    Approve {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        id: Uuid,

        /// Reviewer name recorded on the approval.
        #[arg(long, env = "USER", default_value = "cli")]
        by: String,
    },

    /// Reject a gated action; the execution ends cancelled.
    Reject {
        #[arg(long, env = "OPSFLOW_ORG")]
        org: String,

        id: Uuid,

        #[arg(long, env = "USER", default_value = "cli")]
        by: String,
    },
}

// ---------------------------------------------------------------------------
// Shared formatting helpers
// ---------------------------------------------------------------------------

/// First eight characters of an id, for tables.
pub fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

/// Table cell for an execution status.
pub fn execution_status_cell(status: ExecutionStatus) -> Cell {
    let color = match status {
        ExecutionStatus::Running => Color::Cyan,
        ExecutionStatus::WaitingApproval => Color::Yellow,
        ExecutionStatus::Succeeded => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Styled execution status for line output.
pub fn execution_status_label(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Running => style(status.as_str()).cyan().to_string(),
        ExecutionStatus::WaitingApproval => style(status.as_str()).yellow().to_string(),
        ExecutionStatus::Succeeded => style(status.as_str()).green().to_string(),
        ExecutionStatus::Failed => style(status.as_str()).red().to_string(),
        ExecutionStatus::Cancelled => style(status.as_str()).dim().to_string(),
    }
}

/// Parse an optional JSON argument.
pub fn parse_json_arg(raw: Option<&str>, what: &str) -> anyhow::Result<serde_json::Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--{what} is not valid JSON: {e}")),
        None => Ok(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_executions_list() {
        let cli = Cli::try_parse_from([
            "opsflow", "executions", "list", "--org", "org-1", "--status", "failed", "-n", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Executions {
                action: ExecutionAction::List { org, status, limit },
            } => {
                assert_eq!(org, "org-1");
                assert_eq!(status, Some(ExecutionStatus::Failed));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected executions list"),
        }
    }

    #[test]
    fn test_parse_trigger_create_schedule() {
        let root = Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "opsflow",
            "triggers",
            "create",
            "schedule",
            "--org",
            "org-1",
            "--workflow",
            &root.to_string(),
            "--cron",
            "every 5 minutes",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Triggers {
                action: TriggerAction::Create {
                    kind: CreateTrigger::Schedule { .. }
                }
            }
        ));
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::now_v7();
        assert_eq!(short_id(&id), &id.to_string()[..8]);
    }

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg(None, "payload").unwrap(), serde_json::Value::Null);
        assert_eq!(parse_json_arg(Some(r#"{"a":1}"#), "payload").unwrap()["a"], 1);
        assert!(parse_json_arg(Some("{"), "payload").is_err());
    }
}
