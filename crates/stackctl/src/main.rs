//! stackctl: changeset-driven CloudFormation deployments
//!
//! Reads `<dir>/<template>/<params>.json` files and shows, inspects or
//! executes the changesets that would bring each stack up to date.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use stackctl::Engine;
use stackctl::commands::execute::ExecuteArgs;
use stackctl::commands::status::StatusArgs;
use stackctl::commands::{CommandContext, execute, inspect, status};
use stackctl::config::{AwsOverrides, OutputConfig, RunConfig, TimeoutConfig};
use stackctl_common::defaults::{DEFAULT_CLEANUP_TIMEOUT, DEFAULT_TEMPLATE_DIR};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SDK targets that stay at warn regardless of verbosity
const QUIET_TARGETS: &[&str] = &[
    "aws_config",
    "aws_smithy_runtime",
    "aws_sdk_cloudformation",
    "aws_sdk_s3",
    "aws_sdk_sts",
];

#[derive(Parser, Debug)]
#[command(name = "stackctl")]
#[command(about = "Execute and manage a set of CloudFormation stacks through changesets")]
#[command(version)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct GlobalArgs {
    /// Directory containing <template>/<params>.json files
    #[arg(short, long, global = true, default_value = DEFAULT_TEMPLATE_DIR)]
    dir: PathBuf,

    /// Output JSON instead of tables
    #[arg(short, long, global = true)]
    json: bool,

    /// Output verbosity. Repeat for more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbosity: u8,

    /// Deadline for the whole command in seconds (0 waits indefinitely)
    #[arg(short, long, global = true, default_value_t = 0)]
    timeout: u64,

    /// How long cleanup jobs may run after the command, in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_CLEANUP_TIMEOUT.as_secs())]
    cleanup_timeout: u64,

    /// AWS profile for parameter files that do not name one
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region for parameter files that do not name one
    #[arg(long, global = true)]
    region: Option<String>,
}

impl From<GlobalArgs> for RunConfig {
    fn from(args: GlobalArgs) -> Self {
        Self {
            template_dir: args.dir,
            output: OutputConfig {
                json: args.json,
                verbosity: args.verbosity,
            },
            timeouts: TimeoutConfig::from_secs(args.timeout, args.cleanup_timeout),
            aws: AwsOverrides {
                profile: args.profile,
                region: args.region,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display status of all stacks
    Status {
        /// Stop at the first stack that cannot be inspected
        #[arg(long)]
        fail_fast: bool,
    },

    /// Display one stack with its pending changes
    Inspect {
        /// Template directory name
        template: String,
        /// Parameter file name, without `.json`
        params: String,
    },

    /// Execute a CloudFormation update for a stack
    Execute {
        /// Template directory name
        template: String,
        /// Parameter file name, without `.json`
        params: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        auto: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(suggestion) = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<stackctl::aws::AwsError>())
        .and_then(stackctl::aws::AwsError::suggestion)
    {
        let _ = writeln!(stderr, "\n\x1b[2mHint:\x1b[0m {suggestion}");
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![level.to_string()];
        directives.extend(QUIET_TARGETS.iter().map(|t| format!("{t}=warn")));
        EnvFilter::new(directives.join(","))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.global.verbosity);

    let config: RunConfig = args.global.into();
    let ctx = CommandContext::new(Engine::aws(), config);

    if let Some(timeout) = ctx.config.command_timeout() {
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout = ?timeout, "Command deadline reached, cancelling");
            cancel.cancel();
        });
    }

    let result = dispatch(&ctx, args.command).await;

    let report = ctx.engine.run_cleanup(ctx.config.cleanup_timeout()).await;
    if !report.is_clean() {
        warn!(
            failed = report.failed.len(),
            succeeded = report.succeeded,
            "Some cleanup jobs did not finish"
        );
    } else if report.succeeded > 0 {
        info!(count = report.succeeded, "Cleanup finished");
    }

    result
}

async fn dispatch(ctx: &CommandContext, command: Command) -> Result<()> {
    let mut out = std::io::stdout();
    match command {
        Command::Status { fail_fast } => status::run(ctx, StatusArgs { fail_fast }, &mut out).await,
        Command::Inspect { template, params } => {
            inspect::run(ctx, &template, &params, &mut out).await
        }
        Command::Execute {
            template,
            params,
            auto,
        } => {
            let args = ExecuteArgs {
                template,
                params,
                auto_confirm: auto,
            };
            execute::run(ctx, &args, &mut out).await
        }
    }
}
