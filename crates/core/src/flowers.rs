//! Flower listings produced by the `cactus_workflow_*` helpers.
//!
//! The helpers write their results to a file named on the command line; the
//! functions here allocate that file, run the tool and parse it back.

use crate::command::CactusTools;
use crate::error::{CactusError, CactusResult};
use crate::runner::CommandRunner;
use std::path::Path;
use tempfile::TempPath;

/// A child flower and its size as reported by the tools
#[derive(Debug, Clone, PartialEq)]
pub struct ChildFlower {
    pub name: String,
    pub size: f64,
}

/// Parse `name size` lines. Extra columns are ignored.
pub fn parse_flower_names(content: &str, path: &Path) -> CactusResult<Vec<ChildFlower>> {
    let mut flowers = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: &str| CactusError::MalformedOutput {
            path: path.to_path_buf(),
            line: index + 1,
            reason: reason.to_string(),
        };

        let mut fields = line.split_whitespace();
        let name = fields.next().ok_or_else(|| malformed("missing flower name"))?;
        let size = fields
            .next()
            .ok_or_else(|| malformed("missing flower size"))?
            .parse::<f64>()
            .map_err(|_| malformed("flower size is not a number"))?;

        flowers.push(ChildFlower {
            name: name.to_string(),
            size,
        });
    }
    Ok(flowers)
}

pub fn read_flower_names(path: &Path) -> CactusResult<Vec<ChildFlower>> {
    let content = std::fs::read_to_string(path).map_err(|e| CactusError::io(path, e))?;
    parse_flower_names(&content, path)
}

/// First line of a unique-name file, without its line terminator
pub fn read_unique_name(path: &Path) -> CactusResult<String> {
    let content = std::fs::read_to_string(path).map_err(|e| CactusError::io(path, e))?;
    content
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| CactusError::MalformedOutput {
            path: path.to_path_buf(),
            line: 1,
            reason: "empty unique name file".to_string(),
        })
}

fn output_file(temp_dir: &Path) -> CactusResult<TempPath> {
    let file = tempfile::Builder::new()
        .prefix("cactus_")
        .suffix(".txt")
        .tempfile_in(temp_dir)
        .map_err(|e| CactusError::io(temp_dir, e))?;
    Ok(file.into_temp_path())
}

/// Children of the given flowers
pub async fn get_flowers<S: AsRef<str>>(
    runner: &dyn CommandRunner,
    tools: &CactusTools,
    flowers: &[S],
    temp_dir: &Path,
) -> CactusResult<Vec<ChildFlower>> {
    let output = output_file(temp_dir)?;
    runner.run(&tools.get_flowers(&output, flowers)).await?;
    read_flower_names(&output)
}

/// Extend the terminal groups of `flower`, returning the new child flowers in
/// ascending depth-first discovery order
pub async fn extend_flowers(
    runner: &dyn CommandRunner,
    tools: &CactusTools,
    flower: &str,
    min_size_to_extend: u64,
    temp_dir: &Path,
) -> CactusResult<Vec<ChildFlower>> {
    let output = output_file(temp_dir)?;
    runner
        .run(&tools.extend_flowers(flower, &output, min_size_to_extend))
        .await?;
    read_flower_names(&output)
}

/// A globally unique name from the cactus disk
pub async fn get_unique_name(
    runner: &dyn CommandRunner,
    tools: &CactusTools,
    temp_dir: &Path,
) -> CactusResult<String> {
    let output = output_file(temp_dir)?;
    runner.run(&tools.get_unique_name(&output)).await?;
    read_unique_name(&output)
}
