//! The cactus alignment pipeline as a workflow of tool invocations.
//!
//! Every stage rewrites the same cactus disk, so the stages form a chain:
//! setup → aligner → core → phylogeny → reference → MAF → check.

use crate::command::{CactusTools, CoreOptions, ToolCommand, ROOT_FLOWER};
use crate::error::CactusError;
use crate::experiment::ExperimentWrapper;
use crate::runner::CommandRunner;
use crate::types::{LogLevel, RetryPolicy, Run, StepId, StepSpec, WorkflowSpec};
use crate::workflow::JobTree;
use crate::workflow_config::{cactus_root_path, WorkflowConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File the aligner writes and `cactus_core` reads, inside the work directory
pub const ALIGNMENTS_FILE: &str = "alignments.cigars";

/// Which stages to run and how to run them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub setup_and_build_alignments: bool,
    pub build_trees: bool,
    /// Face building is not supported by the current tools and is always
    /// turned off
    pub build_faces: bool,
    pub build_reference: bool,
    /// Only takes effect when the experiment names a MAF path
    pub build_maf: bool,
    pub check: bool,
    pub use_dummy_aligner: bool,
    pub log_level: LogLevel,
    pub retry_count: u32,
    pub backoff_secs: u64,
    pub step_timeout_secs: Option<u64>,
    pub core: CoreOptions,
    /// Installation root for `default` workflow configs; `CACTUS_ROOT` when
    /// unset
    pub cactus_root: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            setup_and_build_alignments: true,
            build_trees: true,
            build_faces: false,
            build_reference: true,
            build_maf: true,
            check: false,
            use_dummy_aligner: false,
            log_level: LogLevel::default(),
            retry_count: 0,
            backoff_secs: 1,
            step_timeout_secs: None,
            core: CoreOptions::default(),
            cactus_root: None,
        }
    }
}

/// Builds the pipeline workflow for one experiment
pub struct CactusPipeline<'a> {
    experiment: &'a ExperimentWrapper,
    config: Option<&'a WorkflowConfig>,
    options: PipelineOptions,
}

impl<'a> CactusPipeline<'a> {
    pub fn new(
        experiment: &'a ExperimentWrapper,
        config: Option<&'a WorkflowConfig>,
        mut options: PipelineOptions,
    ) -> Self {
        if options.build_faces {
            tracing::warn!("Face building is not supported; disabling it");
            options.build_faces = false;
        }
        Self {
            experiment,
            config,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn step(&self, id: &str, name: &str, command: ToolCommand) -> StepSpec {
        let mut step = StepSpec::new(id, name, command);
        step.timeout_secs = self.options.step_timeout_secs;
        if self.options.retry_count > 0 {
            step.retry_policy = Some(RetryPolicy {
                max_attempts: self.options.retry_count + 1,
                backoff_secs: self.options.backoff_secs,
            });
        }
        step
    }

    /// Lay out the stages as a chained workflow; `work_dir` receives
    /// intermediate files
    pub fn plan(&self, work_dir: &Path) -> Result<WorkflowSpec> {
        let tools = CactusTools::new(
            self.experiment
                .disk_database_string()
                .context("Failed to read the cactus disk configuration")?,
            self.options.log_level,
        );
        let flowers = [ROOT_FLOWER];
        let alignments = work_dir.join(ALIGNMENTS_FILE);

        let mut workflow = WorkflowSpec::new("cactus_workflow");
        let mut previous: Option<StepId> = None;
        let mut chain = |workflow: &mut WorkflowSpec, step: StepSpec| {
            let after: Vec<StepId> = previous.iter().cloned().collect();
            previous = Some(step.id.clone());
            workflow.push(step, &after);
        };

        if self.options.setup_and_build_alignments {
            let tree = self.experiment.tree().context("Failed to read the species tree")?;
            let sequences = self
                .experiment
                .leaf_sequences()
                .context("Failed to map species tree leaves to sequences")?;
            chain(
                &mut workflow,
                self.step(
                    "setup",
                    "Load sequences into the cactus disk",
                    tools.setup(&sequences, &tree.to_newick(), false),
                ),
            );
            chain(
                &mut workflow,
                self.step(
                    "aligner",
                    "Compute pairwise alignments",
                    tools.aligner(ROOT_FLOWER, &alignments, self.options.use_dummy_aligner),
                ),
            );
            chain(
                &mut workflow,
                self.step(
                    "core",
                    "Build the cactus graph from alignments",
                    tools.core(ROOT_FLOWER, &alignments, &self.options.core),
                ),
            );
        }

        if self.options.build_trees {
            chain(
                &mut workflow,
                self.step("phylogeny", "Build event trees", tools.phylogeny(&flowers)),
            );
        }

        if self.options.build_reference {
            let matching_algorithm = match self.config.map(|c| c.matching_algorithm()) {
                Some(result) => result.context("Invalid workflow config")?,
                None => None,
            };
            chain(
                &mut workflow,
                self.step(
                    "reference",
                    "Build the reference",
                    tools.reference(&flowers, false, matching_algorithm),
                ),
            );
        }

        if self.options.build_maf {
            match self.experiment.maf_path() {
                Ok(maf) => chain(
                    &mut workflow,
                    self.step(
                        "maf",
                        "Write the MAF",
                        tools.maf_generator(ROOT_FLOWER, Path::new(maf)),
                    ),
                ),
                // No <maf> element: nothing to write
                Err(CactusError::MissingElement(_)) => {}
                Err(e) => return Err(e).context("Invalid MAF path in experiment"),
            }
        }

        if self.options.check {
            chain(
                &mut workflow,
                self.step("check", "Check the cactus disk", tools.check(&flowers, true)),
            );
        }

        Ok(workflow)
    }
}

/// Load an experiment file and lay out its pipeline with intermediate files in
/// `work_dir`
pub fn plan_cactus_workflow(
    experiment_file: &Path,
    work_dir: &Path,
    options: PipelineOptions,
) -> Result<WorkflowSpec> {
    let experiment = ExperimentWrapper::load(experiment_file)
        .with_context(|| format!("Failed to load experiment {}", experiment_file.display()))?;

    let cactus_root = options.cactus_root.clone().unwrap_or_else(cactus_root_path);
    let config = match experiment.config_path_in(&cactus_root) {
        Ok(path) => load_config(&path),
        Err(e) => {
            tracing::warn!("Experiment has no workflow config: {}", e);
            None
        }
    };

    CactusPipeline::new(&experiment, config.as_ref(), options).plan(work_dir)
}

/// Run a planned pipeline in `job_tree` and fail unless every stage completed
pub async fn run_in_job_tree(job_tree: &JobTree, workflow: &WorkflowSpec) -> Result<Run> {
    let run = job_tree.run(workflow).await?;
    job_tree.ensure_complete().await?;

    tracing::info!("Ran the cactus workflow okay");
    Ok(run)
}

/// Run the pipeline for an experiment file in `job_tree_dir` and fail unless
/// every stage completed
pub async fn run_cactus_workflow(
    experiment_file: &Path,
    job_tree_dir: &Path,
    options: PipelineOptions,
    runner: Arc<dyn CommandRunner>,
) -> Result<Run> {
    let workflow = plan_cactus_workflow(experiment_file, job_tree_dir, options)?;
    let job_tree = JobTree::open(job_tree_dir, runner)?;
    run_in_job_tree(&job_tree, &workflow).await
}

fn load_config(path: &Path) -> Option<WorkflowConfig> {
    match WorkflowConfig::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Could not read workflow config {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_config::MatchingAlgorithm;
    use crate::xml::Element;

    const EXPERIMENT: &str = r#"<cactus_workflow_experiment sequences="a.fa b.fa" species_tree="(a:1,b:2);" config="default">
	<cactus_disk>
		<st_kv_database_conf type="tokyo_cabinet">
			<tokyo_cabinet database_dir="/data/db"/>
		</st_kv_database_conf>
	</cactus_disk>
	<maf path="/out/final.maf"/>
</cactus_workflow_experiment>"#;

    fn experiment() -> ExperimentWrapper {
        ExperimentWrapper::new(Element::parse(EXPERIMENT).unwrap()).unwrap()
    }

    fn ids(workflow: &WorkflowSpec) -> Vec<&str> {
        workflow.steps.iter().map(|s| s.id.0.as_str()).collect()
    }

    #[test]
    fn test_full_plan_is_a_chain() {
        let exp = experiment();
        let workflow = CactusPipeline::new(&exp, None, PipelineOptions::default())
            .plan(Path::new("/work"))
            .unwrap();

        assert_eq!(
            ids(&workflow),
            vec!["setup", "aligner", "core", "phylogeny", "reference", "maf"]
        );
        assert_eq!(
            workflow.dependencies[&StepId::new("core")],
            vec![StepId::new("aligner")]
        );
        assert!(!workflow.dependencies.contains_key(&StepId::new("setup")));

        let setup = &workflow.step("setup").unwrap().command;
        assert_eq!(&setup.args[..3], &["a.fa", "b.fa", "--speciesTree"]);

        let core = workflow.step("core").unwrap().command.to_string();
        assert!(core.contains("--alignments /work/alignments.cigars"));

        let maf = workflow.step("maf").unwrap().command.to_string();
        assert!(maf.contains("--outputFile /out/final.maf"));
    }

    #[test]
    fn test_stage_selection() {
        let exp = experiment();
        let options = PipelineOptions {
            setup_and_build_alignments: false,
            build_trees: false,
            build_maf: false,
            check: true,
            ..Default::default()
        };
        let workflow = CactusPipeline::new(&exp, None, options)
            .plan(Path::new("/work"))
            .unwrap();

        assert_eq!(ids(&workflow), vec!["reference", "check"]);
        assert_eq!(
            workflow.dependencies[&StepId::new("check")],
            vec![StepId::new("reference")]
        );
    }

    #[test]
    fn test_setup_gets_one_sequence_per_leaf() {
        let exp = ExperimentWrapper::new(
            Element::parse(&EXPERIMENT.replace("a.fa b.fa", "a.fa b.fa extra.fa")).unwrap(),
        )
        .unwrap();
        let workflow = CactusPipeline::new(&exp, None, PipelineOptions::default())
            .plan(Path::new("/work"))
            .unwrap();

        let setup = &workflow.step("setup").unwrap().command;
        assert_eq!(&setup.args[..3], &["a.fa", "b.fa", "--speciesTree"]);
        assert!(!setup.args.iter().any(|a| a == "extra.fa"));
    }

    #[test]
    fn test_maf_element_without_path_is_an_error() {
        let exp = ExperimentWrapper::new(
            Element::parse(&EXPERIMENT.replace(r#"<maf path="/out/final.maf"/>"#, "<maf/>"))
                .unwrap(),
        )
        .unwrap();
        let result = CactusPipeline::new(&exp, None, PipelineOptions::default())
            .plan(Path::new("/work"));
        assert!(result.is_err());

        let no_maf = PipelineOptions {
            build_maf: false,
            ..Default::default()
        };
        assert!(CactusPipeline::new(&exp, None, no_maf)
            .plan(Path::new("/work"))
            .is_ok());
    }

    #[test]
    fn test_missing_maf_element_skips_the_stage() {
        let exp = ExperimentWrapper::new(
            Element::parse(&EXPERIMENT.replace(r#"<maf path="/out/final.maf"/>"#, "")).unwrap(),
        )
        .unwrap();
        let workflow = CactusPipeline::new(&exp, None, PipelineOptions::default())
            .plan(Path::new("/work"))
            .unwrap();
        assert!(workflow.step("maf").is_none());
    }

    #[test]
    fn test_faces_are_forced_off() {
        let exp = experiment();
        let options = PipelineOptions {
            build_faces: true,
            ..Default::default()
        };
        let pipeline = CactusPipeline::new(&exp, None, options);
        assert!(!pipeline.options().build_faces);
    }

    #[test]
    fn test_retry_and_matching_algorithm_from_config() {
        let exp = experiment();
        let mut config = WorkflowConfig::new(Element::parse("<cactus_workflow_config/>").unwrap());
        config.set_matching_algorithm(MatchingAlgorithm::Blossom);

        let options = PipelineOptions {
            retry_count: 2,
            step_timeout_secs: Some(60),
            ..Default::default()
        };
        let workflow = CactusPipeline::new(&exp, Some(&config), options)
            .plan(Path::new("/work"))
            .unwrap();

        let reference = workflow.step("reference").unwrap();
        assert!(reference
            .command
            .to_string()
            .contains("--matchingAlgorithm blossom"));
        assert_eq!(reference.retry_policy.as_ref().unwrap().max_attempts, 3);
        assert_eq!(reference.timeout_secs, Some(60));
    }
}
