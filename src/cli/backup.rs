use anyhow::{anyhow, Context, Result};
use clap::Args;
use log::{info, warn};
use std::path::PathBuf;

use crate::cluster::dir::DirCluster;
use crate::config::BackupConfig;
use crate::fence::{CommandFence, HookCommand, PauseFence, WriteFence};
use crate::metrics;
use crate::orchestrator::{BackupRequest, BackupRun, Orchestrator};
use crate::report::render_text;
use crate::topology::ReplicaScope;

/// Flags override SS_* env vars, which override the --config file.
#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Cluster state directory (file-backed control plane)
    #[arg(long)]
    pub cluster: Option<PathBuf>,
    #[arg(long)]
    pub namespace: Option<String>,
    /// Comma-separated shard (StatefulSet) names
    #[arg(long, value_delimiter = ',', required = true)]
    pub shards: Vec<String>,
    /// VolumeSnapshotClass name
    #[arg(long)]
    pub snapshot_class: Option<String>,
    /// Directory for output.json
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// primary | all | <n>
    #[arg(long)]
    pub replicas: Option<String>,
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Concurrent workers per phase (0 = one per volume)
    #[arg(long)]
    pub max_parallel: Option<usize>,
    /// Freeze hook, run via `sh -c` (requires --resume-cmd)
    #[arg(long)]
    pub freeze_cmd: Option<String>,
    /// Resume hook, run via `sh -c` (requires --freeze-cmd)
    #[arg(long)]
    pub resume_cmd: Option<String>,
    /// Pause used when no hook commands are configured
    #[arg(long)]
    pub pause_secs: Option<u64>,
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Print the report as JSON instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// `shardsnap backup`: Ok only when every volume was snapshotted, the workload
/// was resumed and the report (if requested) was written.
pub fn cmd_backup(args: BackupArgs) -> Result<()> {
    let cfg = layered_config(&args)?;
    info!("{}", cfg);

    let cluster_dir = cfg
        .cluster_dir
        .clone()
        .ok_or_else(|| anyhow!("provide --cluster or SS_CLUSTER_DIR"))?;
    let cluster = DirCluster::open(&cluster_dir)
        .with_context(|| format!("open cluster at {}", cluster_dir.display()))?;
    let fence = build_fence(&cfg)?;

    let req = BackupRequest::from_config(&cfg, args.shards.clone())?;
    let run = Orchestrator::new(&cluster, &cluster, fence.as_ref()).run(&req)?;

    let out = run.report.to_output();
    if args.json {
        let s = serde_json::to_string_pretty(&out).context("serialize report")?;
        println!("{s}");
    } else {
        print!("{}", render_text(&out));
        if let Some(p) = run.output_path.as_ref() {
            println!("output: {}", p.display());
        }
    }

    let m = metrics::snapshot();
    info!(
        "metrics: submitted={} ready={} driver_errors={} timed_out={} polls={} avg_polls={:.1}",
        m.snapshots_submitted,
        m.snapshots_ready,
        m.snapshots_driver_errors,
        m.snapshots_timed_out,
        m.readiness_polls,
        m.avg_polls_per_snapshot()
    );

    check_run(run)
}

/// Map a finished run to the command result (and so to the exit status).
/// Output-write and resume failures are reported ahead of failed targets.
pub fn check_run(run: BackupRun) -> Result<()> {
    let succeeded = run.is_success();
    if let Some(e) = run.output_error {
        return Err(e.context("write output.json"));
    }
    if let Some(e) = run.resume_error {
        return Err(anyhow!(e).context("workload was not resumed"));
    }
    if !succeeded {
        return Err(anyhow!(
            "backup {} failed: {} of {} volume(s) not snapshotted",
            run.report.run_token,
            run.report.failed_count(),
            run.report.outcomes.len()
        ));
    }
    Ok(())
}

/// defaults < --config TOML < SS_* env < flags
pub fn layered_config(args: &BackupArgs) -> Result<BackupConfig> {
    let mut cfg = BackupConfig::load(args.config.as_deref())?;

    if let Some(v) = args.cluster.as_ref() {
        cfg = cfg.with_cluster_dir(Some(v));
    }
    if let Some(v) = args.namespace.as_ref() {
        cfg = cfg.with_namespace(v.as_str());
    }
    if let Some(v) = args.snapshot_class.as_ref() {
        cfg = cfg.with_snapshot_class(Some(v.as_str()));
    }
    if let Some(v) = args.output_dir.as_ref() {
        cfg = cfg.with_output_dir(Some(v));
    }
    if let Some(v) = args.replicas.as_deref() {
        let scope: ReplicaScope = v.parse().map_err(|e: String| anyhow!(e))?;
        cfg = cfg.with_replicas(scope);
    }
    if let Some(v) = args.poll_interval_ms {
        cfg = cfg.with_poll_interval_ms(v);
    }
    if let Some(v) = args.timeout_secs {
        cfg = cfg.with_timeout_secs(v);
    }
    if let Some(v) = args.max_parallel {
        cfg = cfg.with_max_parallel(v);
    }
    if args.freeze_cmd.is_some() || args.resume_cmd.is_some() {
        cfg = cfg.with_fence_commands(args.freeze_cmd.as_deref(), args.resume_cmd.as_deref());
    }
    if let Some(v) = args.pause_secs {
        cfg = cfg.with_pause_secs(v);
    }
    Ok(cfg.build())
}

/// Both hook commands, or neither (pause fence).
pub fn build_fence(cfg: &BackupConfig) -> Result<Box<dyn WriteFence>> {
    match (cfg.freeze_cmd.as_deref(), cfg.resume_cmd.as_deref()) {
        (Some(freeze), Some(resume)) => Ok(Box::new(CommandFence::new(
            HookCommand::new(freeze),
            HookCommand::new(resume),
        ))),
        (None, None) => {
            warn!(
                "no freeze/resume commands configured: pausing {}s instead of fencing writes",
                cfg.pause_secs
            );
            Ok(Box::new(PauseFence::new(cfg.pause())))
        }
        _ => Err(anyhow!("--freeze-cmd and --resume-cmd must be given together")),
    }
}
