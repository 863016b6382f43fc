use crate::config::CliConfig;
use anyhow::{anyhow, bail, Context, Result};
use cactus_core::command::{CactusTools, ToolCommand, ROOT_FLOWER};
use cactus_core::experiment::{DatabaseSpec, ExperimentWrapper, KYOTO_TYCOON, TOKYO_CABINET};
use cactus_core::flowers;
use cactus_core::newick::SpeciesTree;
use cactus_core::pipeline::{
    plan_cactus_workflow, run_cactus_workflow, run_in_job_tree, PipelineOptions,
};
use cactus_core::runner::DryRunRunner;
use cactus_core::workflow::JobTree;
use cactus_core::LogLevel;
use clap::Args;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Species tree in Newick format
    #[arg(long)]
    tree: String,

    /// Sequence for a leaf event, as NAME=PATH (repeat for every leaf)
    #[arg(long = "seq", value_parser = parse_key_val)]
    sequences: Vec<(String, String)>,

    /// Database directory
    #[arg(long)]
    db_dir: PathBuf,

    /// Database type (tokyo_cabinet or kyoto_tycoon)
    #[arg(long, default_value = TOKYO_CABINET)]
    db_type: String,

    #[arg(long)]
    db_name: Option<String>,

    /// Kyoto Tycoon server host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Kyoto Tycoon server port
    #[arg(long)]
    port: Option<u16>,

    /// Workflow config path, or default / defaultProgressive
    #[arg(long, default_value = "default")]
    workflow_config: String,

    /// Experiment file to create
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
pub struct SetOutgroupArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    /// Outgroup event name
    #[arg(long)]
    name: String,

    /// Branch length from the new root to the outgroup
    #[arg(long)]
    distance: f64,

    /// Sequence file of the outgroup
    #[arg(long)]
    path: String,

    /// Write here instead of editing in place
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SetDbArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    #[arg(long)]
    dir: Option<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Write here instead of editing in place
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SetPathsArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    #[arg(long)]
    reference: Option<String>,

    #[arg(long)]
    maf: Option<String>,

    #[arg(long)]
    workflow_config: Option<String>,

    /// Write here instead of editing in place
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    /// Job tree directory holding the run's event log
    #[arg(short, long, default_value = "jobTree")]
    job_tree: PathBuf,

    /// Skip cactus_setup, the aligner and cactus_core
    #[arg(long)]
    skip_setup: bool,

    #[arg(long)]
    skip_trees: bool,

    #[arg(long)]
    skip_reference: bool,

    #[arg(long)]
    skip_maf: bool,

    /// Run cactus_check at the end
    #[arg(long)]
    check: bool,

    #[arg(long)]
    use_dummy_aligner: bool,

    /// Print the tool commands without running them
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    retry_count: Option<u32>,

    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Per-step timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(short, long, default_value = "jobTree")]
    job_tree: PathBuf,
}

#[derive(Args, Debug)]
pub struct FlowersArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    /// Extend the terminal groups of this flower instead of listing children
    #[arg(long)]
    extend: Option<String>,

    /// Minimum size of a group to extend
    #[arg(long, default_value = "1")]
    min_size: u64,

    /// Directory for the tools' output files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Flowers whose children are listed
    #[arg(default_value = ROOT_FLOWER)]
    names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UniqueNameArgs {
    #[arg(short, long)]
    experiment: PathBuf,

    /// Directory for the tool's output file
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", s))?;
    if key.is_empty() || value.is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load(path: &Path) -> Result<ExperimentWrapper> {
    ExperimentWrapper::load(path)
        .with_context(|| format!("Failed to load experiment {}", path.display()))
}

fn save(experiment: &ExperimentWrapper, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| input.to_path_buf());
    experiment
        .write_xml(&path)
        .with_context(|| format!("Failed to write experiment {}", path.display()))?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

fn tools(experiment: &ExperimentWrapper, config: &CliConfig) -> Result<CactusTools> {
    Ok(CactusTools::new(
        experiment.disk_database_string()?,
        config.tools.log_level,
    ))
}

pub fn init(args: InitArgs) -> Result<()> {
    let tree = SpeciesTree::parse(&args.tree).context("Invalid species tree")?;
    let seq_map: HashMap<String, String> = args.sequences.into_iter().collect();

    let mut database = match args.db_type.as_str() {
        TOKYO_CABINET => DatabaseSpec::tokyo_cabinet(&args.db_dir),
        KYOTO_TYCOON => {
            let port = args
                .port
                .ok_or_else(|| anyhow!("--port is required for kyoto_tycoon"))?;
            DatabaseSpec::kyoto_tycoon(&args.db_dir, &args.host, port)
        }
        other => bail!("Unsupported database type '{}'", other),
    };
    database.name = args.db_name;

    let experiment = ExperimentWrapper::create(&tree, &seq_map, &args.workflow_config, &database)?;
    experiment
        .write_xml(&args.output)
        .with_context(|| format!("Failed to write experiment {}", args.output.display()))?;

    tracing::info!("Created experiment {}", args.output.display());
    Ok(())
}

#[derive(Debug, Serialize)]
struct ExperimentSummary {
    species_tree: String,
    sequences: BTreeMap<String, String>,
    outgroups: Vec<String>,
    config: String,
    config_path: PathBuf,
    db_type: String,
    db_dir: Option<String>,
    db_name: Option<String>,
    db_port: Option<u16>,
    reference_path: Option<String>,
    maf_path: Option<String>,
    cactus_disk: String,
}

impl ExperimentSummary {
    fn from_experiment(experiment: &ExperimentWrapper, cactus_root: &Path) -> Result<Self> {
        Ok(Self {
            species_tree: experiment.tree()?.to_newick(),
            sequences: experiment
                .sequence_map()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            outgroups: experiment
                .outgroup_events()
                .unwrap_or_default()
                .into_iter()
                .map(str::to_string)
                .collect(),
            config: experiment.config()?.to_string(),
            config_path: experiment.config_path_in(cactus_root)?,
            db_type: experiment.db_type()?.to_string(),
            db_dir: experiment.db_dir().ok().map(str::to_string),
            db_name: experiment.db_name().ok().map(str::to_string),
            db_port: experiment.db_port().ok(),
            reference_path: experiment.reference_path().ok().map(str::to_string),
            maf_path: experiment.maf_path().ok().map(str::to_string),
            cactus_disk: experiment.disk_database_string()?,
        })
    }
}

pub fn show(args: ShowArgs, config: &CliConfig) -> Result<()> {
    let experiment = load(&args.experiment)?;
    let summary = ExperimentSummary::from_experiment(&experiment, &config.cactus_root())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("species tree: {}", summary.species_tree);
    for (event, path) in &summary.sequences {
        println!("  {}\t{}", event, path);
    }
    if !summary.outgroups.is_empty() {
        println!("outgroups:    {}", summary.outgroups.join(" "));
    }
    println!("config:       {} ({})", summary.config, summary.config_path.display());
    println!("database:     {}", summary.db_type);
    if let Some(dir) = &summary.db_dir {
        println!("  dir:  {}", dir);
    }
    if let Some(name) = &summary.db_name {
        println!("  name: {}", name);
    }
    if let Some(port) = summary.db_port {
        println!("  port: {}", port);
    }
    if let Some(reference) = &summary.reference_path {
        println!("reference:    {}", reference);
    }
    if let Some(maf) = &summary.maf_path {
        println!("maf:          {}", maf);
    }
    Ok(())
}

pub fn set_outgroup(args: SetOutgroupArgs) -> Result<()> {
    let mut experiment = load(&args.experiment)?;
    experiment.set_outgroup(&args.name, args.distance, &args.path)?;
    save(&experiment, &args.experiment, args.output)
}

pub fn set_db(args: SetDbArgs) -> Result<()> {
    let mut experiment = load(&args.experiment)?;
    if let Some(dir) = &args.dir {
        experiment.set_db_dir(dir)?;
    }
    if let Some(name) = &args.name {
        experiment.set_db_name(name)?;
    }
    if let Some(port) = args.port {
        experiment.set_db_port(port)?;
    }
    save(&experiment, &args.experiment, args.output)
}

pub fn set_paths(args: SetPathsArgs) -> Result<()> {
    let mut experiment = load(&args.experiment)?;
    if let Some(reference) = &args.reference {
        experiment.set_reference_path(reference);
    }
    if let Some(maf) = &args.maf {
        experiment.set_maf_path(maf);
    }
    if let Some(config) = &args.workflow_config {
        experiment.set_config_path(config);
    }
    save(&experiment, &args.experiment, args.output)
}

fn pipeline_options(args: &RunArgs, config: &CliConfig) -> PipelineOptions {
    let mut options = config.pipeline_options();
    options.setup_and_build_alignments = !args.skip_setup;
    options.build_trees = !args.skip_trees;
    options.build_reference = !args.skip_reference;
    options.build_maf = !args.skip_maf;
    options.check = args.check;
    options.use_dummy_aligner = args.use_dummy_aligner;
    if let Some(retry_count) = args.retry_count {
        options.retry_count = retry_count;
    }
    if let Some(log_level) = args.log_level {
        options.log_level = log_level;
    }
    if args.timeout.is_some() {
        options.step_timeout_secs = args.timeout;
    }
    options
}

/// Commands a real run would dispatch, in order.
///
/// Intermediate files are placed in the job tree as for a real run, while the
/// events go to a scratch directory so the job tree itself is left alone.
async fn dry_run(args: &RunArgs, options: PipelineOptions) -> Result<Vec<ToolCommand>> {
    let workflow = plan_cactus_workflow(&args.experiment, &args.job_tree, options)?;

    let scratch = tempfile::TempDir::new().context("Failed to create scratch job tree")?;
    let runner = Arc::new(DryRunRunner::new());
    let job_tree = JobTree::open(scratch.path(), runner.clone())?;
    run_in_job_tree(&job_tree, &workflow).await?;

    Ok(runner.commands())
}

pub async fn run(args: RunArgs, config: &CliConfig) -> Result<()> {
    let options = pipeline_options(&args, config);

    if args.dry_run {
        for command in dry_run(&args, options).await? {
            println!("{}", command);
        }
        return Ok(());
    }

    let run = run_cactus_workflow(&args.experiment, &args.job_tree, options, config.runner())
        .await?;
    println!("run {} completed ({} steps)", run.id, run.steps.len());
    Ok(())
}

pub async fn status(args: StatusArgs) -> Result<()> {
    let job_tree = JobTree::open(&args.job_tree, Arc::new(DryRunRunner::new()))?;

    if let Some(status) = job_tree.status().await? {
        println!(
            "run {} ({}): {:?}, {}/{} steps completed",
            status.run_id,
            status.workflow,
            status.status,
            status.completed.len(),
            status.total_steps
        );
        for step in &status.failed {
            println!("  failed:  {}", step);
        }
        for step in &status.skipped {
            println!("  skipped: {}", step);
        }
    }

    job_tree.ensure_complete().await?;
    Ok(())
}

pub async fn flowers(args: FlowersArgs, config: &CliConfig) -> Result<()> {
    let experiment = load(&args.experiment)?;
    let tools = tools(&experiment, config)?;
    let runner = config.runner();
    let temp_dir = args.temp_dir.unwrap_or_else(std::env::temp_dir);

    let children = match &args.extend {
        Some(flower) => {
            flowers::extend_flowers(runner.as_ref(), &tools, flower, args.min_size, &temp_dir)
                .await?
        }
        None => flowers::get_flowers(runner.as_ref(), &tools, &args.names, &temp_dir).await?,
    };

    for child in children {
        println!("{}\t{}", child.name, child.size);
    }
    Ok(())
}

pub async fn unique_name(args: UniqueNameArgs, config: &CliConfig) -> Result<()> {
    let experiment = load(&args.experiment)?;
    let tools = tools(&experiment, config)?;
    let runner = config.runner();
    let temp_dir = args.temp_dir.unwrap_or_else(std::env::temp_dir);

    let name = flowers::get_unique_name(runner.as_ref(), &tools, &temp_dir).await?;
    println!("{}", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("human=/seq/human.fa").unwrap(),
            ("human".to_string(), "/seq/human.fa".to_string())
        );
        assert!(parse_key_val("human").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    fn init_experiment(dir: &Path) -> PathBuf {
        let output = dir.join("experiment.xml");
        init(InitArgs {
            tree: "(a:1,b:2);".to_string(),
            sequences: vec![
                ("a".to_string(), "/seq/a.fa".to_string()),
                ("b".to_string(), "/seq/b.fa".to_string()),
            ],
            db_dir: dir.join("db"),
            db_type: KYOTO_TYCOON.to_string(),
            db_name: Some("cactus.kch".to_string()),
            host: "localhost".to_string(),
            port: Some(1978),
            workflow_config: "default".to_string(),
            output: output.clone(),
        })
        .unwrap();
        output
    }

    #[test]
    fn test_init_then_edit() {
        let dir = TempDir::new().unwrap();
        let path = init_experiment(dir.path());

        set_outgroup(SetOutgroupArgs {
            experiment: path.clone(),
            name: "c".to_string(),
            distance: 0.5,
            path: "/seq/c.fa".to_string(),
            output: None,
        })
        .unwrap();

        set_db(SetDbArgs {
            experiment: path.clone(),
            dir: None,
            name: None,
            port: Some(2000),
            output: None,
        })
        .unwrap();

        set_paths(SetPathsArgs {
            experiment: path.clone(),
            reference: Some("ref.fa".to_string()),
            maf: Some("out.maf".to_string()),
            workflow_config: None,
            output: None,
        })
        .unwrap();

        let experiment = ExperimentWrapper::load(&path).unwrap();
        assert_eq!(experiment.sequence("c").unwrap(), "/seq/c.fa");
        assert_eq!(experiment.db_port().unwrap(), 2000);
        assert_eq!(experiment.maf_path().unwrap(), "out.maf");
        assert_eq!(experiment.reference_path().unwrap(), "ref.fa");

        let summary =
            ExperimentSummary::from_experiment(&experiment, Path::new("/opt/cactus")).unwrap();
        assert_eq!(summary.outgroups, vec!["c"]);
        assert_eq!(summary.sequences.len(), 3);
    }

    #[test]
    fn test_init_rejects_unknown_database() {
        let dir = TempDir::new().unwrap();
        let result = init(InitArgs {
            tree: "(a,b);".to_string(),
            sequences: vec![],
            db_dir: dir.path().join("db"),
            db_type: "mysql".to_string(),
            db_name: None,
            host: "localhost".to_string(),
            port: None,
            workflow_config: "default".to_string(),
            output: dir.path().join("experiment.xml"),
        });
        assert!(result.is_err());
    }

    fn run_args(experiment: PathBuf, job_tree: PathBuf) -> RunArgs {
        RunArgs {
            experiment,
            job_tree,
            skip_setup: false,
            skip_trees: false,
            skip_reference: false,
            skip_maf: false,
            check: true,
            use_dummy_aligner: true,
            dry_run: true,
            retry_count: None,
            log_level: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_dry_run_leaves_job_tree_untouched() {
        let dir = TempDir::new().unwrap();
        let path = init_experiment(dir.path());
        let job_tree = dir.path().join("jobTree");

        run(run_args(path, job_tree.clone()), &CliConfig::default())
            .await
            .unwrap();

        assert!(!job_tree.exists());
    }

    #[tokio::test]
    async fn test_dry_run_uses_job_tree_for_intermediate_files() {
        let dir = TempDir::new().unwrap();
        let path = init_experiment(dir.path());
        let job_tree = dir.path().join("jobTree");
        let args = run_args(path, job_tree.clone());

        let commands = dry_run(&args, pipeline_options(&args, &CliConfig::default()))
            .await
            .unwrap();

        let alignments = job_tree.join("alignments.cigars").display().to_string();
        let aligner = commands.iter().find(|c| c.program == "cactus_aligner").unwrap();
        let core = commands.iter().find(|c| c.program == "cactus_core").unwrap();
        assert!(aligner.args.contains(&alignments));
        assert!(core.args.contains(&alignments));
        assert!(aligner.args.iter().any(|a| a == "--useDummy"));
        assert_eq!(commands.last().unwrap().program, "cactus_check");
        assert!(!job_tree.exists());
    }
}
