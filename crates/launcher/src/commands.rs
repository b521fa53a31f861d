//! Subcommand handlers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use shotq_core::annotation::{self, globals_text, ShotSelector};
use shotq_core::job_compiler::CompileFilter;
use shotq_core::job_family::HostGroup;
use shotq_core::shot_range::{scan_blocks, split_lines};
use shotq_pipeline::batch::{self, RunRequest, RunSummary};
use shotq_pipeline::dispatcher::{Dispatcher, PollConfig};
use shotq_pipeline::gateway::HttpGateway;
use shotq_pipeline::store::ConfigStore;
use shotq_pipeline::template::TemplateSet;

use crate::cli::{Commands, FilterArgs, HostOverride, TargetArgs};
use crate::config::LauncherConfig;

pub async fn execute(command: Commands, config_path: PathBuf, config: &LauncherConfig) -> anyhow::Result<()> {
    let store = ConfigStore::new(&config_path);
    match command {
        Commands::Run {
            filter,
            output,
            workflows,
            regenerate,
            strict,
            poll,
            hosts,
            no_annotate,
        } => {
            let request = RunRequest {
                filter: compile_filter(filter),
                output_root: output.unwrap_or_else(|| config.output_root.clone()),
                regenerate,
                strict,
                host_overrides: host_overrides(hosts),
                annotate: !no_annotate,
            };
            let workflows = workflows.unwrap_or_else(|| config.workflows_dir.clone());
            let summary = run(&store, &request, &workflows, poll, config).await?;
            print_summary(&summary);
        }

        Commands::Jobs {
            filter,
            output,
            regenerate,
            as_json,
        } => {
            let model = store.load_model().await?;
            let request = RunRequest {
                filter: compile_filter(filter),
                output_root: output.unwrap_or_else(|| config.output_root.clone()),
                regenerate,
                ..RunRequest::default()
            };
            let jobs = batch::plan_jobs(&model, &request)?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                for job in &jobs {
                    println!(
                        "{}  seed={} iterations={} {}x{}",
                        job.key(),
                        job.seed,
                        job.iterations,
                        job.width,
                        job.height
                    );
                }
                println!("{} job(s)", jobs.len());
            }
        }

        Commands::Ranges => {
            let text = store.read_text().await?;
            let lines = split_lines(&text);
            for block in scan_blocks(&lines) {
                // 1-based, inclusive, as an editor shows them.
                println!(
                    "{}/{}/{}  lines {}-{}",
                    block.sequence,
                    block.shot,
                    block.name,
                    block.range.start + 1,
                    block.range.end
                );
            }
        }

        Commands::Status { target, family, value } => {
            let selector = selector(&target);
            store
                .edit(|lines| Ok(annotation::set_status(lines, &selector, family, &value)?))
                .await?;
            println!("{} {} = {}", describe(&target), family.status_key(), value.trim());
        }

        Commands::Disable { target } => {
            let selector = selector(&target);
            store
                .edit(|lines| Ok(annotation::set_disabled(lines, &selector)?))
                .await?;
            println!("{} disabled", describe(&target));
        }

        Commands::Enable { target } => {
            let selector = selector(&target);
            store
                .edit(|lines| Ok(annotation::set_enabled(lines, &selector)?))
                .await?;
            println!("{} enabled", describe(&target));
        }

        Commands::Globals => {
            let text = store.read_text().await?;
            print!("{}", globals_text(&split_lines(&text)));
        }
    }
    Ok(())
}

async fn run(
    store: &ConfigStore,
    request: &RunRequest,
    workflows: &Path,
    poll: bool,
    config: &LauncherConfig,
) -> anyhow::Result<RunSummary> {
    let gateway = HttpGateway::new(config.request_timeout()).context("Failed to build HTTP client")?;
    let mut dispatcher = Dispatcher::new(gateway);
    if poll {
        dispatcher = dispatcher.with_polling(PollConfig {
            interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.poll_timeout_secs),
        });
    }
    let mut templates = TemplateSet::new(workflows);

    tracing::info!(
        config = %store.path().display(),
        output = %request.output_root.display(),
        workflows = %workflows.display(),
        "Starting run"
    );
    batch::run(store, request, &mut templates, &dispatcher)
        .await
        .with_context(|| format!("Run against {} failed", store.path().display()))
}

fn print_summary(summary: &RunSummary) {
    for failed in summary.failures() {
        println!(
            "FAILED {} on {}: {}",
            failed.job,
            failed.host,
            failed.error().unwrap_or_else(|| "no prompt accepted".to_string())
        );
    }
    println!(
        "Executions: {}  Successes: {}  Annotated: {}",
        summary.executions(),
        summary.successes(),
        summary.annotated
    );
}

fn compile_filter(args: FilterArgs) -> CompileFilter {
    CompileFilter {
        families: (!args.families.is_empty()).then_some(args.families),
        project: args.project,
        sequence: args.sequence,
        shot: args.shot,
    }
}

/// Later `--host` flags for the same group extend the earlier ones.
fn host_overrides(overrides: Vec<HostOverride>) -> BTreeMap<HostGroup, Vec<String>> {
    let mut pools: BTreeMap<HostGroup, Vec<String>> = BTreeMap::new();
    for o in overrides {
        pools.entry(o.group).or_default().extend(o.hosts);
    }
    pools
}

fn selector(target: &TargetArgs) -> ShotSelector {
    match &target.name {
        Some(name) => ShotSelector::subshot(&target.sequence, &target.shot, name),
        None => ShotSelector::shot(&target.sequence, &target.shot),
    }
}

fn describe(target: &TargetArgs) -> String {
    match &target.name {
        Some(name) => format!("{}/{}/{name}", target.sequence, target.shot),
        None => format!("{}/{}", target.sequence, target.shot),
    }
}

#[cfg(test)]
mod tests {
    use shotq_core::job_family::JobFamily;

    use super::*;

    #[test]
    fn empty_family_list_means_all_families() {
        assert!(compile_filter(FilterArgs::default()).families.is_none());
        let filter = compile_filter(FilterArgs {
            families: vec![JobFamily::Wan25s],
            ..FilterArgs::default()
        });
        assert_eq!(filter.families, Some(vec![JobFamily::Wan25s]));
    }

    #[test]
    fn repeated_host_flags_extend_one_pool() {
        let pools = host_overrides(vec![
            HostOverride {
                group: HostGroup::Flux,
                hosts: vec!["a".into()],
            },
            HostOverride {
                group: HostGroup::Flux,
                hosts: vec!["b".into()],
            },
        ]);
        assert_eq!(pools[&HostGroup::Flux], ["a", "b"]);
    }

    #[tokio::test]
    async fn disable_then_enable_round_trips_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.txt");
        let text = "PROJECT=Demo\n!---------\nSEQUENCE=s1\nSHOT=0001\nNAME=heroA\n";
        std::fs::write(&path, text).unwrap();
        let config = LauncherConfig::from_env().unwrap();
        let target = TargetArgs {
            sequence: "s1".into(),
            shot: "0001".into(),
            name: None,
        };

        execute(Commands::Disable { target: target.clone() }, path.clone(), &config)
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("DISABLED=1\n"));

        execute(Commands::Enable { target }, path.clone(), &config)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }

    #[tokio::test]
    async fn status_on_missing_shot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.txt");
        std::fs::write(&path, "PROJECT=Demo\n").unwrap();
        let config = LauncherConfig::from_env().unwrap();
        let outcome = execute(
            Commands::Status {
                target: TargetArgs {
                    sequence: "s1".into(),
                    shot: "0001".into(),
                    name: None,
                },
                family: JobFamily::FluxT2i,
                value: "omit".into(),
            },
            path,
            &config,
        )
        .await;
        assert!(outcome.is_err());
    }
}
