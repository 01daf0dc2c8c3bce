use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cullrs::config::ProjectConfig;
use cullrs::core::catalog::Catalog;
use cullrs::core::executor::{ActionExecutor, EntryOutcome};
use cullrs::core::history::{self, ApplyRecord};
use cullrs::core::planner::{ActionPlan, ActionPlanner, OutputConfig};
use cullrs::core::scanner::{ScanPhase, ScanProgress, Scanner};
use cullrs::core::scoring::{decorate, HeuristicScorer};
use cullrs::core::suggest::accept_suggestions;
use cullrs::database::models::{Asset, Decision, DecisionState, OperationKind, ReasonCode, VariantGroup};
use cullrs::database::{load_decisions, set_decision, Repository, SledStore};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "cullrs", version, about = "Non-destructive photo culling")]
struct Cli {
    /// Project directory holding cullrs.json and the index
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a project configuration
    Init {
        /// Directory to index (repeatable)
        #[arg(short, long = "source", value_name = "DIR", required = true)]
        sources: Vec<PathBuf>,
        /// Folder that receives kept photos
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
        /// Glob pattern to skip (repeatable)
        #[arg(short, long = "exclude", value_name = "GLOB")]
        excludes: Vec<String>,
        /// Similarity threshold in [0, 100]
        #[arg(long)]
        threshold: Option<f64>,
        /// Mirror source folders under the output root
        #[arg(long)]
        preserve_structure: bool,
        /// Hardlink instead of copying
        #[arg(long)]
        hardlink: bool,
        #[arg(long)]
        name: Option<String>,
    },

    /// Index the source roots and rebuild groups
    Scan,

    /// List exact and similar groups
    Groups {
        /// Re-cluster at this threshold without rescanning
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Store the threshold in the project configuration
        #[arg(long, requires = "threshold")]
        save: bool,
    },

    /// Record a decision for one photo (path or asset id)
    Decide {
        asset: String,
        #[arg(long, conflicts_with_all = ["remove", "undecided"])]
        keep: bool,
        #[arg(long, conflicts_with = "undecided")]
        remove: bool,
        #[arg(long)]
        undecided: bool,
        #[arg(long)]
        note: Option<String>,
    },

    /// Turn keep suggestions into decisions
    Accept {
        /// Replace decisions that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Show what apply would do
    Preview {
        #[arg(long)]
        include_removed: bool,
    },

    /// Copy or hardlink kept photos into the output folder
    Apply {
        #[arg(long)]
        hardlink: bool,
        /// Also set aside removed photos under `_removed/`
        #[arg(long)]
        include_removed: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List past apply runs
    History,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("CULLRS_LOG", "info")).init();
    let cli = Cli::parse();
    let project = cli.project;

    match cli.command {
        Commands::Init {
            sources,
            output,
            excludes,
            threshold,
            preserve_structure,
            hardlink,
            name,
        } => {
            let sources = sources
                .iter()
                .map(|s| fs::canonicalize(s).with_context(|| format!("Source {:?} not found", s)))
                .collect::<Result<Vec<_>>>()?;
            let name = name.unwrap_or_else(|| {
                sources[0]
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "photos".to_string())
            });

            let mut config = ProjectConfig::new(name, sources);
            config.output_root = output;
            config.exclude_patterns = excludes;
            config.preserve_structure = preserve_structure;
            if let Some(threshold) = threshold {
                config.similarity_threshold = threshold;
            }
            if hardlink {
                config.operation = OperationKind::Hardlink;
            }
            config
                .save(&project)
                .with_context(|| format!("Failed to write project in {:?}", project))?;
            println!(
                "✅ Created project '{}' in {}",
                config.name,
                ProjectConfig::path_in(&project).display()
            );
        }

        Commands::Scan => {
            let config = load_config(&project)?;
            let store = open_store(&project)?;
            scan(&config, &store)?;
        }

        Commands::Groups { threshold, save } => {
            let mut config = load_config(&project)?;
            let store = open_store(&project)?;
            let threshold = threshold.unwrap_or(config.similarity_threshold);

            let assets = store.list::<Asset>()?;
            let catalog = Catalog::new();
            let groups = catalog.load(assets, threshold)?;
            store.replace_all(&groups.to_vec())?;
            store.flush()?;

            if save {
                config.similarity_threshold = threshold;
                config.save(&project)?;
            }

            let snapshot = catalog.snapshot();
            println!(
                "▶ {} exact and {} similar group(s) at threshold {:.1}",
                groups.exact.len(),
                groups.similar.len(),
                threshold
            );
            for (i, group) in groups.iter().enumerate() {
                print_group(i + 1, group, |id| snapshot.asset(id).map(|a| a.path.clone()));
            }
        }

        Commands::Decide {
            asset,
            keep,
            remove,
            undecided,
            note,
        } => {
            let store = open_store(&project)?;
            let asset_id = resolve_asset_id(&asset)?;
            if store.get::<Asset>(&asset_id)?.is_none() {
                bail!("{} is not an indexed asset; run `cullrs scan` first", asset);
            }

            let (state, reason) = match (keep, remove, undecided) {
                (true, _, _) => (DecisionState::Keep, ReasonCode::UserOverrideKeep),
                (_, true, _) => (DecisionState::Remove, ReasonCode::UserOverrideRemove),
                (_, _, true) => (DecisionState::Undecided, ReasonCode::ManualNoReason),
                _ => bail!("Pass one of --keep, --remove or --undecided"),
            };

            let changed = set_decision(&store, Decision::new(asset_id, state, reason, note))?;
            store.flush()?;
            if changed {
                println!("✅ {} → {}", asset, state);
            } else {
                println!("No change for {}", asset);
            }
        }

        Commands::Accept { overwrite } => {
            let store = open_store(&project)?;
            let assets = store.list::<Asset>()?;
            let groups = store.list::<VariantGroup>()?;
            let existing = load_decisions(&store)?;

            let decisions = accept_suggestions(&assets, &groups, &existing, overwrite);
            let mut kept = 0;
            let mut removed = 0;
            for decision in decisions {
                match decision.state {
                    DecisionState::Keep => kept += 1,
                    DecisionState::Remove => removed += 1,
                    DecisionState::Undecided => {}
                }
                set_decision(&store, decision)?;
            }
            store.flush()?;
            println!("✅ Accepted suggestions: {} keep, {} remove", kept, removed);
        }

        Commands::Preview { include_removed } => {
            let config = load_config(&project)?;
            let store = open_store(&project)?;
            let mut output = output_config(&config)?;
            output.include_removed = include_removed;
            output.confirm_removed = include_removed;

            let plan = build_plan(&store, &output)?;
            if plan.is_empty() {
                println!("Nothing to do: no photo is marked Keep.");
                return Ok(());
            }
            println!("▶ {} operation(s) into {}", plan.len(), plan.output_root.display());
            for entry in &plan.entries {
                println!(
                    "   {} {} → {}",
                    entry.operation,
                    entry.source_path.display(),
                    entry.output_path.display()
                );
            }
            println!("\n⚠️  Preview only; no files were changed.");
        }

        Commands::Apply {
            hardlink,
            include_removed,
            yes,
        } => {
            let config = load_config(&project)?;
            let store = open_store(&project)?;
            let mut output = output_config(&config)?;
            if hardlink {
                output.operation = OperationKind::Hardlink;
            }
            if include_removed {
                let confirmed = yes
                    || Confirm::new()
                        .with_prompt("Also copy photos marked Remove into _removed/?")
                        .default(false)
                        .interact()?;
                if !confirmed {
                    bail!("Set-aside of removed photos was not confirmed");
                }
                output.include_removed = true;
                output.confirm_removed = true;
            }

            let mut plan = build_plan(&store, &output)?;
            if plan.is_empty() {
                println!("Nothing to do: no photo is marked Keep.");
                return Ok(());
            }
            apply(&config, &mut plan)?;
        }

        Commands::History => {
            let config = load_config(&project)?;
            let output_root = config
                .output_root
                .context("No output root configured; set one with `cullrs init --output`")?;
            let records = history::load(&output_root)?;

            println!("🗂️  Apply history:");
            for (i, record) in records.iter().enumerate() {
                println!(
                    "[{}] {}\n     into: {}\n     completed: {}\n     failed: {}\n",
                    i,
                    record.applied_at.to_rfc3339(),
                    record.output_root.display(),
                    record.completed.len(),
                    record.failed.len()
                );
            }
        }
    }

    Ok(())
}

fn load_config(project: &Path) -> Result<ProjectConfig> {
    ProjectConfig::load(project)
        .with_context(|| format!("Could not load project from {:?}; run `cullrs init`", project))
}

fn open_store(project: &Path) -> Result<SledStore> {
    let path = project.join("store");
    SledStore::open(&path).with_context(|| format!("Failed to open index at {:?}", path))
}

fn output_config(config: &ProjectConfig) -> Result<OutputConfig> {
    config
        .output_config()
        .context("No output root configured; set one with `cullrs init --output`")
}

fn resolve_asset_id(asset: &str) -> Result<String> {
    if asset.starts_with("ast_") {
        return Ok(asset.to_string());
    }
    let path = fs::canonicalize(asset).with_context(|| format!("File {:?} not found", asset))?;
    Ok(Asset::id_for_path(&path))
}

fn scan(config: &ProjectConfig, store: &SledStore) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let scanner = Scanner::from_patterns(&config.file_types, &config.exclude_patterns)?
        .with_workers(config.workers)
        .with_progress_interval(config.progress_interval())
        .with_progress_sender(tx);

    let reporter = spawn_scan_reporter(rx);
    let started = Instant::now();
    let result = scanner.scan(&config.source_roots);
    drop(scanner);
    let _ = reporter.join();
    let mut outcome = result.context("Scan failed")?;

    for skipped in &outcome.skipped {
        println!("   ⚠️  Skipped {}: {}", skipped.path.display(), skipped.reason);
    }

    if config.advanced_scoring {
        let scored = decorate(&mut outcome.assets, &config.advanced_scoring, &HeuristicScorer::new());
        println!("▶ Scored {} photo(s)", scored);
    }

    let catalog = Catalog::new();
    let groups = catalog.load(outcome.assets.clone(), config.similarity_threshold)?;
    store.replace_all(&outcome.assets)?;
    store.replace_all(&groups.to_vec())?;
    store.flush()?;

    println!(
        "✅ Indexed {} photo(s) in {:.2?} ({} skipped, {} without a visual fingerprint)",
        outcome.assets.len(),
        started.elapsed(),
        outcome.skipped_count(),
        outcome.assets.len() - outcome.fingerprinted_count()
    );
    println!(
        "   {} exact and {} similar group(s) at threshold {:.1}",
        groups.exact.len(),
        groups.similar.len(),
        config.similarity_threshold
    );
    Ok(())
}

fn spawn_scan_reporter(mut rx: mpsc::UnboundedReceiver<ScanProgress>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        while let Some(progress) = rx.blocking_recv() {
            match progress.phase {
                ScanPhase::Discovery => {
                    bar.set_message(format!("discovering ({} found)", progress.files_processed));
                }
                ScanPhase::Hashing | ScanPhase::Fingerprinting => {
                    bar.set_length(progress.total_files as u64);
                    bar.set_position(progress.files_processed as u64);
                    let label = if progress.phase == ScanPhase::Hashing {
                        "hashing"
                    } else {
                        "fingerprinting"
                    };
                    match progress.estimated_time_remaining {
                        Some(eta) => bar.set_message(format!("{} (~{}s left)", label, eta)),
                        None => bar.set_message(label),
                    }
                }
                ScanPhase::Complete => {
                    bar.finish_with_message("scan complete");
                }
            }
        }
        if !bar.is_finished() {
            bar.abandon();
        }
    })
}

fn build_plan(store: &SledStore, output: &OutputConfig) -> Result<ActionPlan> {
    let assets = store.list::<Asset>()?;
    let decisions = load_decisions(store)?;
    let plan = ActionPlanner::new()
        .preview(&assets, &decisions, output)
        .context("Could not build the output plan")?;
    Ok(plan)
}

fn apply(config: &ProjectConfig, plan: &mut ActionPlan) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<EntryOutcome>();
    let executor = ActionExecutor::new()
        .with_workers(config.workers)
        .with_outcome_sender(tx);

    let total = plan.len() as u64;
    let reporter = thread::spawn(move || {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        while let Some(outcome) = rx.blocking_recv() {
            bar.inc(1);
            bar.set_message(outcome.output_path.display().to_string());
        }
        bar.finish_with_message("done");
    });

    let result = executor.apply(plan);
    drop(executor);
    let _ = reporter.join();
    let summary = result?;

    let record = ApplyRecord::from_plan(plan, &summary);
    history::append(&plan.output_root, &record)
        .with_context(|| format!("Failed to record history in {:?}", plan.output_root))?;

    println!(
        "\n✅ {} succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    for failure in &summary.failures {
        println!(
            "   ❌ {} → {}: {}",
            failure.source_path.display(),
            failure.output_path.display(),
            failure.error
        );
    }
    println!(
        "   Recorded in {}",
        history::history_path(&plan.output_root).display()
    );
    Ok(())
}

fn print_group<F>(index: usize, group: &VariantGroup, path_of: F)
where
    F: Fn(&str) -> Option<PathBuf>,
{
    println!(
        "\n✨ Group {} ({}, {:.1}%):",
        index, group.group_type, group.similarity
    );
    for id in &group.asset_ids {
        let path = path_of(id)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| id.clone());
        if group.suggested_keep.as_deref() == Some(id.as_str()) {
            let reason = group
                .suggested_reason
                .map(|r| r.to_string())
                .unwrap_or_default();
            println!("   🏆 {} ({})", path, reason);
        } else {
            println!("   ▶ {}", path);
        }
    }
}
