use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sfncli::client::{CloudWatchSink, SfnCoordinator};
use sfncli::config::{expand_env, WorkerConfig};
use sfncli::error::{Result, WorkerError};
use sfncli::metadata;
use sfncli::shutdown::install_shutdown_handler;
use sfncli::worker::{tags_from_env, ActivityPoller};

#[derive(Parser, Debug)]
#[command(name = "sfncli")]
#[command(about = "Runs a command as an AWS Step Functions activity worker")]
struct Args {
    /// The activity name to register with AWS Step Functions. $VAR and
    /// ${VAR} env variables are expanded.
    #[arg(long, default_value = "")]
    activityname: String,

    /// The worker name to send to AWS Step Functions when processing a
    /// task. Env variables are expanded. The magic strings
    /// MAGIC_ECS_TASK_ARN and MAGIC_ECS_TASK_ID are expanded via the ECS
    /// task metadata source.
    #[arg(long, default_value = "")]
    workername: String,

    /// The command to run to process activity tasks.
    #[arg(long, default_value = "")]
    cmd: String,

    /// The AWS region to send Step Function API calls. Defaults to
    /// AWS_REGION.
    #[arg(long, default_value = "")]
    region: String,

    /// The AWS region to report metrics. Defaults to the value of the
    /// region flag.
    #[arg(long, default_value = "")]
    cloudwatchregion: String,

    /// Create the specified directory and pass a per-task subdirectory to
    /// the cmd via the environment variable WORK_DIR. Default is to not
    /// create the path.
    #[arg(long, default_value = "")]
    workdirectory: String,

    /// Write task input to a file (input.json) in WORK_DIR instead of
    /// passing it as a CLI argument. Useful for avoiding ARG_MAX limits
    /// with large payloads.
    #[arg(long)]
    inputfile: bool,

    /// Print the version and exit.
    #[arg(long)]
    version: bool,

    /// Additional args passed to cmd on every invocation, before the input
    /// argument.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    cmd_args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(args).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if args.activityname.is_empty() {
        return Err(WorkerError::Config("activityname is required".into()));
    }
    let activity_name = expand_env(&args.activityname);

    if args.workername.is_empty() {
        return Err(WorkerError::Config("workername is required".into()));
    }
    let worker_name = metadata::expand_worker_name(&expand_env(&args.workername)).await?;

    if args.cmd.is_empty() {
        return Err(WorkerError::Config("cmd is required".into()));
    }
    let cmd = expand_env(&args.cmd);

    let region = if args.region.is_empty() {
        std::env::var("AWS_REGION").unwrap_or_default()
    } else {
        args.region.clone()
    };
    if region.is_empty() {
        return Err(WorkerError::Config("region or AWS_REGION is required".into()));
    }
    let cloudwatch_region = if args.cloudwatchregion.is_empty() {
        region.clone()
    } else {
        expand_env(&args.cloudwatchregion)
    };

    let work_directory = if args.workdirectory.is_empty() {
        None
    } else {
        Some(validate_work_directory(&args.workdirectory)?)
    };
    if args.inputfile && work_directory.is_none() {
        return Err(WorkerError::Config(
            "inputfile requires workdirectory".into(),
        ));
    }

    let shutdown = install_shutdown_handler();

    let sfn_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region))
        .load()
        .await;
    let coordinator = Arc::new(SfnCoordinator::new(aws_sdk_sfn::Client::new(&sfn_config)));
    let cloudwatch_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(cloudwatch_region))
        .load()
        .await;
    let metrics = Arc::new(CloudWatchSink::new(aws_sdk_cloudwatch::Client::new(
        &cloudwatch_config,
    )));

    let config = WorkerConfig {
        activity_name,
        worker_name,
        cmd,
        cmd_args: args.cmd_args,
        work_directory,
        input_file: args.inputfile,
        ..WorkerConfig::default()
    };
    ActivityPoller::new(coordinator, metrics, config, tags_from_env())
        .run(shutdown)
        .await
}

/// Ensure the work directory parent exists and is writable, creating it
/// (0700) if absent.
fn validate_work_directory(dir: &str) -> Result<PathBuf> {
    let path = PathBuf::from(dir);
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .map_err(|e| WorkerError::Config(format!("workdirectory create error: {e}")))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| WorkerError::Config(format!("workdirectory create error: {e}")))?;
        return Ok(path);
    }
    if !path.is_dir() {
        return Err(WorkerError::Config(
            "workdirectory is not a directory".into(),
        ));
    }
    let probe = path.join(format!(".probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"")
        .map_err(|e| WorkerError::Config(format!("workdirectory write error: {e}")))?;
    let _ = std::fs::remove_file(&probe);
    Ok(path)
}
