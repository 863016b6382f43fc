//! Workflow configuration document (`cactus_workflow_config.xml`).

use crate::error::{CactusError, CactusResult};
use crate::xml::Element;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the cactus installation root
pub const CACTUS_ROOT_ENV: &str = "CACTUS_ROOT";

/// Config name that resolves to the standard workflow config
pub const DEFAULT_CONFIG: &str = "default";

/// Config name that resolves to the progressive workflow config
pub const DEFAULT_PROGRESSIVE_CONFIG: &str = "defaultProgressive";

/// Matching algorithm used by `cactus_reference`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingAlgorithm {
    Greedy,
    Blossom,
    Edmonds,
}

impl MatchingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Blossom => "blossom",
            Self::Edmonds => "edmonds",
        }
    }
}

impl std::fmt::Display for MatchingAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchingAlgorithm {
    type Err = CactusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "blossom" => Ok(Self::Blossom),
            "edmonds" => Ok(Self::Edmonds),
            other => Err(CactusError::InvalidAttribute {
                attribute: "matching_algorithm".to_string(),
                value: other.to_string(),
                reason: "expected greedy, blossom or edmonds".to_string(),
            }),
        }
    }
}

/// Installation root used to locate the bundled workflow configs.
///
/// Taken from `CACTUS_ROOT`, falling back to the current directory.
pub fn cactus_root_path() -> PathBuf {
    std::env::var_os(CACTUS_ROOT_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve an experiment's `config` attribute to a file path
pub fn resolve_config_path(config: &str, root: &Path) -> PathBuf {
    match config {
        DEFAULT_CONFIG => root.join("pipeline").join("cactus_workflow_config.xml"),
        DEFAULT_PROGRESSIVE_CONFIG => root
            .join("progressive")
            .join("cactus_progressive_workflow_config.xml"),
        path => PathBuf::from(path),
    }
}

/// Wrapper around a workflow configuration document
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    root: Element,
}

impl WorkflowConfig {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn load(path: &Path) -> CactusResult<Self> {
        Ok(Self::new(Element::from_file(path)?))
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Name of the reference event (`reference@reference`)
    pub fn reference_name(&self) -> CactusResult<&str> {
        self.root.require("reference")?.require_attr("reference")
    }

    /// `reference@matching_algorithm`, if configured
    pub fn matching_algorithm(&self) -> CactusResult<Option<MatchingAlgorithm>> {
        self.root
            .find("reference")
            .and_then(|reference| reference.attr("matching_algorithm"))
            .map(str::parse::<MatchingAlgorithm>)
            .transpose()
    }

    pub fn set_matching_algorithm(&mut self, algorithm: MatchingAlgorithm) {
        self.root
            .find_or_insert("reference")
            .set_attr("matching_algorithm", algorithm.as_str());
    }

    pub fn write(&self, path: &Path) -> CactusResult<()> {
        self.root.write_pretty(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"<cactus_workflow_config>
    <setup/>
    <reference reference="reference" matching_algorithm="greedy"/>
</cactus_workflow_config>"#;

    #[test]
    fn test_resolve_config_path() {
        let root = Path::new("/opt/cactus");
        assert_eq!(
            resolve_config_path("default", root),
            PathBuf::from("/opt/cactus/pipeline/cactus_workflow_config.xml")
        );
        assert_eq!(
            resolve_config_path("defaultProgressive", root),
            PathBuf::from("/opt/cactus/progressive/cactus_progressive_workflow_config.xml")
        );
        assert_eq!(
            resolve_config_path("my/config.xml", root),
            PathBuf::from("my/config.xml")
        );
    }

    #[test]
    fn test_reference_settings() {
        let config = WorkflowConfig::new(Element::parse(CONFIG).unwrap());
        assert_eq!(config.reference_name().unwrap(), "reference");
        assert_eq!(
            config.matching_algorithm().unwrap(),
            Some(MatchingAlgorithm::Greedy)
        );
    }

    #[test]
    fn test_set_matching_algorithm_and_write() {
        let mut config = WorkflowConfig::new(Element::parse(CONFIG).unwrap());
        config.set_matching_algorithm(MatchingAlgorithm::Edmonds);

        let file = NamedTempFile::new().unwrap();
        config.write(file.path()).unwrap();

        let reloaded = WorkflowConfig::load(file.path()).unwrap();
        assert_eq!(
            reloaded.matching_algorithm().unwrap(),
            Some(MatchingAlgorithm::Edmonds)
        );
        assert_eq!(reloaded.reference_name().unwrap(), "reference");
    }

    #[test]
    fn test_invalid_matching_algorithm() {
        let config = WorkflowConfig::new(
            Element::parse(r#"<c><reference matching_algorithm="random"/></c>"#).unwrap(),
        );
        assert!(config.matching_algorithm().is_err());

        let empty = WorkflowConfig::new(Element::parse("<c/>").unwrap());
        assert_eq!(empty.matching_algorithm().unwrap(), None);
        assert!(empty.reference_name().is_err());
    }
}
