//! Command lines for the native `cactus_*` tools.
//!
//! Every builder returns a [`ToolCommand`]; nothing here spawns a process.
//! Dispatch lives in [`crate::runner`].

use crate::error::{CactusError, CactusResult};
use crate::types::LogLevel;
use crate::workflow_config::MatchingAlgorithm;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Name of the top-level flower in a cactus disk
pub const ROOT_FLOWER: &str = "0";

/// A program plus its argument vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `--name value`
    pub fn option(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{}", name)).arg(value.to_string())
    }

    /// `--name value` when a value is present, nothing otherwise
    pub fn option_if<T: fmt::Display>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.option(name, value),
            None => self,
        }
    }

    /// `--name` when enabled, nothing otherwise
    pub fn switch(self, name: &str, enabled: bool) -> Self {
        if enabled {
            self.arg(format!("--{}", name))
        } else {
            self
        }
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            f.write_str(" ")?;
            f.write_str(&shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote an argument for display in a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Tuning flags for `cactus_core`; unset values are left to the tool's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreOptions {
    pub write_debug_files: bool,
    pub annealing_rounds: Option<u32>,
    pub align_repeats_at_round: Option<u32>,
    pub trim: Option<u32>,
    pub trim_change: Option<f64>,
    pub minimum_tree_coverage: Option<f64>,
    pub minimum_block_length: Option<u32>,
    pub minimum_block_length_change: Option<f64>,
    pub minimum_chain_length: Option<u32>,
    pub minimum_chain_length_change: Option<f64>,
    pub deannealing_rounds: Option<u32>,
}

/// Builds tool invocations against one cactus disk
#[derive(Debug, Clone)]
pub struct CactusTools {
    disk: String,
    log_level: LogLevel,
}

impl CactusTools {
    /// `disk` is the serialized `st_kv_database_conf` element
    pub fn new(disk: impl Into<String>, log_level: LogLevel) -> Self {
        Self {
            disk: disk.into(),
            log_level,
        }
    }

    pub fn disk(&self) -> &str {
        &self.disk
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    fn tool(&self, program: &str) -> ToolCommand {
        ToolCommand::new(program).option("cactusDisk", &self.disk)
    }

    /// Load sequences and the species tree into an empty cactus disk
    pub fn setup<S: AsRef<str>>(
        &self,
        sequences: &[S],
        species_tree: &str,
        debug: bool,
    ) -> ToolCommand {
        ToolCommand::new("cactus_setup")
            .args(sequences.iter().map(|s| s.as_ref().to_string()))
            .option("speciesTree", species_tree)
            .option("cactusDisk", &self.disk)
            .option("logLevel", self.log_level)
            .switch("debug", debug)
    }

    pub fn aligner(&self, flower: &str, results_file: &Path, use_dummy: bool) -> ToolCommand {
        self.tool("cactus_aligner")
            .option("flowerName", flower)
            .option("resultsFile", results_file.display())
            .switch("useDummy", use_dummy)
    }

    pub fn core(&self, flower: &str, alignments: &Path, options: &CoreOptions) -> ToolCommand {
        self.tool("cactus_core")
            .option("flowerName", flower)
            .option("alignments", alignments.display())
            .option("logLevel", self.log_level)
            .switch("writeDebugFiles", options.write_debug_files)
            .option_if("annealingRounds", options.annealing_rounds)
            .option_if("alignRepeatsAtRound", options.align_repeats_at_round)
            .option_if("trim", options.trim)
            .option_if("trimChange", options.trim_change)
            .option_if("minimumTreeCoverage", options.minimum_tree_coverage)
            .option_if("minimumBlockLength", options.minimum_block_length)
            .option_if("minimumBlockLengthChange", options.minimum_block_length_change)
            .option_if("minimumChainLength", options.minimum_chain_length)
            .option_if("minimumChainLengthChange", options.minimum_chain_length_change)
            .option_if("deannealingRounds", options.deannealing_rounds)
    }

    pub fn phylogeny<S: AsRef<str>>(&self, flowers: &[S]) -> ToolCommand {
        self.tool("cactus_phylogeny")
            .option("logLevel", self.log_level)
            .args(names(flowers))
    }

    pub fn fill_adjacencies<S: AsRef<str>>(&self, flowers: &[S]) -> ToolCommand {
        self.tool("cactus_fillAdjacencies")
            .option("logLevel", self.log_level)
            .args(names(flowers))
    }

    /// Writes `name size` lines for the children of `flowers` to `output`
    pub fn get_flowers<S: AsRef<str>>(&self, output: &Path, flowers: &[S]) -> ToolCommand {
        ToolCommand::new("cactus_workflow_getFlowers")
            .arg(&self.disk)
            .path(output)
            .args(names(flowers))
    }

    /// Extends terminal groups of `flower` and writes the new children to `output`
    pub fn extend_flowers(
        &self,
        flower: &str,
        output: &Path,
        min_size_to_extend: u64,
    ) -> ToolCommand {
        ToolCommand::new("cactus_workflow_extendFlowers")
            .arg(&self.disk)
            .arg(flower)
            .path(output)
            .arg(min_size_to_extend.to_string())
    }

    pub fn get_unique_name(&self, output: &Path) -> ToolCommand {
        ToolCommand::new("cactus_workflow_getUniqueName")
            .arg(&self.disk)
            .path(output)
    }

    pub fn normalisation<S: AsRef<str>>(
        &self,
        flowers: &[S],
        max_number_of_chains: u32,
    ) -> ToolCommand {
        self.tool("cactus_normalisation")
            .option("maxNumberOfChains", max_number_of_chains)
            .option("logLevel", self.log_level)
            .args(names(flowers))
    }

    pub fn base_aligner<S: AsRef<str>>(&self, flowers: &[S]) -> ToolCommand {
        self.tool("cactus_baseAligner")
            .option("logLevel", self.log_level)
            .args(names(flowers))
    }

    pub fn reference<S: AsRef<str>>(
        &self,
        flowers: &[S],
        bottom_up: bool,
        matching_algorithm: Option<MatchingAlgorithm>,
    ) -> ToolCommand {
        self.tool("cactus_reference")
            .option("logLevel", self.log_level)
            .switch("bottomUp", bottom_up)
            .option_if("matchingAlgorithm", matching_algorithm)
            .args(names(flowers))
    }

    pub fn check<S: AsRef<str>>(&self, flowers: &[S], recursive: bool) -> ToolCommand {
        self.tool("cactus_check")
            .args(names(flowers))
            .option("logLevel", self.log_level)
            .switch("recursive", recursive)
    }

    pub fn tree_stats(&self, flower: &str, output: &Path) -> ToolCommand {
        self.tool("cactus_treeStats")
            .option("flowerName", flower)
            .option("outputFile", output.display())
    }

    pub fn tree_viewer(&self, flower: &str, graph_file: &Path) -> ToolCommand {
        self.viewer("cactus_treeViewer", flower, graph_file)
    }

    pub fn adjacency_graph_viewer(
        &self,
        flower: &str,
        graph_file: &Path,
        include_internal_adjacencies: bool,
    ) -> ToolCommand {
        self.viewer("cactus_adjacencyGraphViewer", flower, graph_file)
            .switch("includeInternalAdjacencies", include_internal_adjacencies)
    }

    pub fn reference_viewer(&self, flower: &str, graph_file: &Path) -> ToolCommand {
        self.viewer("cactus_referenceViewer", flower, graph_file)
    }

    pub fn maf_generator(&self, flower: &str, maf_file: &Path) -> ToolCommand {
        self.viewer("cactus_MAFGenerator", flower, maf_file)
    }

    fn viewer(&self, program: &str, flower: &str, output: &Path) -> ToolCommand {
        self.tool(program)
            .option("flowerName", flower)
            .option("outputFile", output.display())
            .option("logLevel", self.log_level)
    }

    /// Pairs each tree-stats file with its region name for the LaTeX summary
    pub fn tree_stats_to_latex_tables<P: AsRef<Path>, S: AsRef<str>>(
        input_files: &[P],
        region_names: &[S],
        output: &Path,
    ) -> CactusResult<ToolCommand> {
        if input_files.len() != region_names.len() {
            return Err(CactusError::InvalidInput(format!(
                "{} tree stats files but {} region names",
                input_files.len(),
                region_names.len()
            )));
        }

        let mut command = ToolCommand::new("cactus_treeStatsToLatexTables")
            .option("outputFile", output.display());
        for (file, region) in input_files.iter().zip(region_names) {
            command = command
                .path(file.as_ref())
                .arg(region.as_ref());
        }
        Ok(command)
    }
}

fn names<S: AsRef<str>>(flowers: &[S]) -> impl Iterator<Item = String> + '_ {
    flowers.iter().map(|f| f.as_ref().to_string())
}
