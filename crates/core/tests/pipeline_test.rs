use cactus_core::command::ToolCommand;
use cactus_core::experiment::{DatabaseSpec, ExperimentWrapper};
use cactus_core::newick::SpeciesTree;
use cactus_core::pipeline::{plan_cactus_workflow, run_cactus_workflow, PipelineOptions};
use cactus_core::runner::{DryRunRunner, ProcessRunner};
use cactus_core::workflow::JobTree;
use cactus_core::RunStatus;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_experiment(dir: &Path) -> std::path::PathBuf {
    let tree = SpeciesTree::parse("((human:0.006,chimp:0.006):0.1,mouse:0.3);").unwrap();
    let seq_map: HashMap<String, String> = ["human", "chimp", "mouse"]
        .iter()
        .map(|name| (name.to_string(), format!("/seqs/{}.fa", name)))
        .collect();

    let mut experiment = ExperimentWrapper::create(
        &tree,
        &seq_map,
        "default",
        &DatabaseSpec::tokyo_cabinet(dir.join("db")),
    )
    .unwrap();
    experiment.set_maf_path(dir.join("out.maf").to_str().unwrap());

    let path = dir.join("experiment.xml");
    experiment.write_xml(&path).unwrap();
    path
}

#[tokio::test]
async fn test_dry_run_pipeline_dispatches_every_stage() {
    let dir = TempDir::new().unwrap();
    let experiment_file = write_experiment(dir.path());
    let job_tree_dir = dir.path().join("jobTree");

    let runner = Arc::new(DryRunRunner::new());
    let run = run_cactus_workflow(
        &experiment_file,
        &job_tree_dir,
        PipelineOptions::default(),
        runner.clone(),
    )
    .await
    .unwrap();

    assert_eq!(run.status, RunStatus::Completed);

    let programs: Vec<String> = runner.commands().into_iter().map(|c| c.program).collect();
    assert_eq!(
        programs,
        vec![
            "cactus_setup",
            "cactus_aligner",
            "cactus_core",
            "cactus_phylogeny",
            "cactus_reference",
            "cactus_MAFGenerator",
        ]
    );

    let setup: ToolCommand = runner.commands()[0].clone();
    assert_eq!(
        &setup.args[..3],
        &["/seqs/human.fa", "/seqs/chimp.fa", "/seqs/mouse.fa"]
    );
    let disk_index = setup.args.iter().position(|a| a == "--cactusDisk").unwrap();
    assert!(setup.args[disk_index + 1].starts_with("<st_kv_database_conf type=\"tokyo_cabinet\">"));

    let job_tree = JobTree::open(&job_tree_dir, Arc::new(DryRunRunner::new())).unwrap();
    let status = job_tree.ensure_complete().await.unwrap();
    assert_eq!(status.total_steps, 6);
}

#[test]
fn test_default_config_resolves_under_explicit_root() {
    let dir = TempDir::new().unwrap();
    let experiment_file = write_experiment(dir.path());

    let root = dir.path().join("cactus");
    std::fs::create_dir_all(root.join("pipeline")).unwrap();
    std::fs::write(
        root.join("pipeline").join("cactus_workflow_config.xml"),
        r#"<cactus_workflow_config><reference reference="human" matching_algorithm="edmonds"/></cactus_workflow_config>"#,
    )
    .unwrap();

    let options = PipelineOptions {
        cactus_root: Some(root),
        ..Default::default()
    };
    let workflow = plan_cactus_workflow(&experiment_file, dir.path(), options).unwrap();

    let reference = workflow.step("reference").unwrap().command.to_string();
    assert!(reference.contains("--matchingAlgorithm edmonds"));

    let alignments = dir.path().join("alignments.cigars").display().to_string();
    assert!(workflow.step("aligner").unwrap().command.args.contains(&alignments));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_tool_leaves_job_tree_incomplete() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let experiment_file = write_experiment(dir.path());
    let job_tree_dir = dir.path().join("jobTree");

    // Stand-in binaries: every tool succeeds except cactus_core
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    for tool in [
        "cactus_setup",
        "cactus_aligner",
        "cactus_core",
        "cactus_phylogeny",
        "cactus_reference",
        "cactus_MAFGenerator",
    ] {
        let script = if tool == "cactus_core" {
            "#!/bin/sh\necho 'core exploded' >&2\nexit 1\n"
        } else {
            "#!/bin/sh\nexit 0\n"
        };
        let path = bin_dir.join(tool);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let result = run_cactus_workflow(
        &experiment_file,
        &job_tree_dir,
        PipelineOptions::default(),
        Arc::new(ProcessRunner::with_bin_dir(&bin_dir)),
    )
    .await;

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("core exploded"));

    let job_tree = JobTree::open(&job_tree_dir, Arc::new(DryRunRunner::new())).unwrap();
    let status = job_tree.status().await.unwrap().unwrap();
    assert_eq!(status.status, RunStatus::Failed);
    assert!(status.completed.contains("aligner"));
    assert!(status.failed.contains("core"));
    assert!(status.skipped.contains("maf"));
}
