//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use shotq_core::job_family::{HostGroup, JobFamily};

/// Queue story-config shots onto ComfyUI workers
#[derive(Parser, Debug)]
#[command(name = "shotq-launcher")]
#[command(about = "Compile a story config into ComfyUI jobs and queue them on worker hosts", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to SHOTQ_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile, dispatch and annotate
    Run {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output root (defaults to COMFYUI_OUTPUT)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Template directory (defaults to SHOTQ_WORKFLOWS_DIR)
        #[arg(long)]
        workflows: Option<PathBuf>,

        /// Resubmit frames whose outputs already exist
        #[arg(long)]
        regenerate: bool,

        /// Abort when the config produces parse warnings
        #[arg(long)]
        strict: bool,

        /// Wait for each job's first prompt to finish
        #[arg(long)]
        poll: bool,

        /// Replace a host pool for this run, e.g. `flux=gpu-1:8188,gpu-2:8188`
        #[arg(long = "host", value_name = "GROUP=HOSTS", value_parser = parse_host_override)]
        hosts: Vec<HostOverride>,

        /// Do not write STATUS fields back into the config
        #[arg(long)]
        no_annotate: bool,
    },

    /// List the jobs a run would queue, without submitting
    Jobs {
        #[command(flatten)]
        filter: FilterArgs,

        /// Output root (defaults to COMFYUI_OUTPUT)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Include frames whose outputs already exist
        #[arg(long)]
        regenerate: bool,

        /// Print descriptors as JSON
        #[arg(long)]
        as_json: bool,
    },

    /// Print the line range of every shot block
    Ranges,

    /// Set a family status on a shot or subshot
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Job family tag
        #[arg(long)]
        family: JobFamily,

        /// New status; `not_started` removes the field
        value: String,
    },

    /// Mark a shot or subshot disabled
    Disable {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Clear the disabled mark
    Enable {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the global block
    Globals,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only these families; repeatable
    #[arg(long = "family")]
    pub families: Vec<JobFamily>,

    /// Project to compile (defaults to the config's PROJECT)
    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub sequence: Option<String>,

    #[arg(long)]
    pub shot: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(long)]
    pub sequence: String,

    #[arg(long)]
    pub shot: String,

    /// Subshot NAME; every subshot of the shot when omitted
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOverride {
    pub group: HostGroup,
    pub hosts: Vec<String>,
}

/// Parse `GROUP=host[,host...]`. `GROUP` is `flux`, `qwen`, `wan` or a
/// family tag, which selects that family's pool.
pub fn parse_host_override(raw: &str) -> Result<HostOverride, String> {
    let (group, hosts) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected GROUP=HOSTS, got '{raw}'"))?;
    let group = match group.trim().to_ascii_lowercase().as_str() {
        "flux" => HostGroup::Flux,
        "qwen" => HostGroup::Qwen,
        "wan" => HostGroup::Wan,
        other => JobFamily::from_tag(other)
            .map(JobFamily::host_group)
            .ok_or_else(|| format!("unknown host group '{other}'"))?,
    };
    let hosts: Vec<String> = hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(String::from)
        .collect();
    if hosts.is_empty() {
        return Err(format!("no hosts given for '{raw}'"));
    }
    Ok(HostOverride { group, hosts })
}
