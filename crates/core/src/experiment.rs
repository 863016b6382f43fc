//! Reading and editing experiment files.
//!
//! An experiment is a single XML document:
//!
//! ```xml
//! <cactus_workflow_experiment sequences="a.fa b.fa" species_tree="(a:1,b:2);" config="default">
//!   <cactus_disk>
//!     <st_kv_database_conf type="tokyo_cabinet">
//!       <tokyo_cabinet database_dir="/data/db"/>
//!     </st_kv_database_conf>
//!   </cactus_disk>
//!   <reference path="ref.fa"/>
//!   <maf path="out.maf"/>
//! </cactus_workflow_experiment>
//! ```
//!
//! `sequences` lists one path per species-tree leaf, in post-order.

use crate::error::{CactusError, CactusResult};
use crate::newick::SpeciesTree;
use crate::workflow_config::{cactus_root_path, resolve_config_path, WorkflowConfig};
use crate::xml::Element;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const EXPERIMENT_TAG: &str = "cactus_workflow_experiment";
pub const TOKYO_CABINET: &str = "tokyo_cabinet";
pub const KYOTO_TYCOON: &str = "kyoto_tycoon";

const DISK_TAG: &str = "cactus_disk";
const DB_CONF_TAG: &str = "st_kv_database_conf";

/// Database settings for a new experiment
#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub db_type: String,
    pub dir: PathBuf,
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl DatabaseSpec {
    pub fn tokyo_cabinet(dir: impl Into<PathBuf>) -> Self {
        Self {
            db_type: TOKYO_CABINET.to_string(),
            dir: dir.into(),
            name: None,
            host: None,
            port: None,
        }
    }

    pub fn kyoto_tycoon(dir: impl Into<PathBuf>, host: &str, port: u16) -> Self {
        Self {
            db_type: KYOTO_TYCOON.to_string(),
            dir: dir.into(),
            name: None,
            host: Some(host.to_string()),
            port: Some(port),
        }
    }
}

/// Wrapper over an experiment document
#[derive(Debug, Clone)]
pub struct ExperimentWrapper {
    root: Element,
    seq_map: HashMap<String, String>,
}

impl ExperimentWrapper {
    /// Wrap a parsed document, checking that the database element exists and
    /// that every leaf has a sequence
    pub fn new(root: Element) -> CactusResult<Self> {
        let mut experiment = Self {
            root,
            seq_map: HashMap::new(),
        };
        experiment.db_elem()?;
        experiment.seq_map = experiment.build_sequence_map()?;
        Ok(experiment)
    }

    pub fn load(path: &Path) -> CactusResult<Self> {
        Self::new(Element::from_file(path)?)
    }

    /// Build a fresh experiment from a tree and an event to sequence map
    pub fn create(
        tree: &SpeciesTree,
        seq_map: &HashMap<String, String>,
        config: &str,
        database: &DatabaseSpec,
    ) -> CactusResult<Self> {
        let mut db = Element::new(database.db_type.as_str())
            .with_attr("database_dir", database.dir.display().to_string());
        if let Some(name) = &database.name {
            db.set_attr("database_name", name.as_str());
        }
        if let Some(host) = &database.host {
            db.set_attr("host", host.as_str());
        }
        if let Some(port) = database.port {
            db.set_attr("port", port.to_string());
        }

        let root = Element::new(EXPERIMENT_TAG)
            .with_attr("sequences", "")
            .with_attr("species_tree", tree.to_newick())
            .with_attr("config", config)
            .with_child(
                Element::new(DISK_TAG).with_child(
                    Element::new(DB_CONF_TAG)
                        .with_attr("type", database.db_type.as_str())
                        .with_child(db),
                ),
            );

        let mut experiment = Self {
            root,
            seq_map: HashMap::new(),
        };
        experiment.update_tree(tree, Some(seq_map.clone()))?;
        if let Some(name) = &database.name {
            experiment.set_db_name(name)?;
        }
        Ok(experiment)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Write the document, pretty-printed
    pub fn write_xml(&self, path: &Path) -> CactusResult<()> {
        self.root.write_pretty(path)
    }

    fn db_elem(&self) -> CactusResult<&Element> {
        let conf = self.root.require(DISK_TAG)?.require(DB_CONF_TAG)?;
        let db_type = conf.require_attr("type")?;
        conf.require(db_type)
    }

    fn db_elem_mut(&mut self) -> CactusResult<&mut Element> {
        let conf = self.root.require_mut(DISK_TAG)?.require_mut(DB_CONF_TAG)?;
        let db_type = conf.require_attr("type")?.to_string();
        conf.require_mut(&db_type)
    }

    /// Database flavour, i.e. the tag of the database element
    pub fn db_type(&self) -> CactusResult<&str> {
        Ok(self.db_elem()?.tag.as_str())
    }

    pub fn db_dir(&self) -> CactusResult<&str> {
        self.db_elem()?.require_attr("database_dir")
    }

    pub fn set_db_dir(&mut self, path: &str) -> CactusResult<()> {
        self.db_elem_mut()?.set_attr("database_dir", path);
        Ok(())
    }

    pub fn db_name(&self) -> CactusResult<&str> {
        self.db_elem()?.require_attr("database_name")
    }

    /// Kyoto Tycoon databases must be named `*.kch`
    pub fn set_db_name(&mut self, name: &str) -> CactusResult<()> {
        let extension = Path::new(name).extension().and_then(|e| e.to_str());
        if self.db_type()? == KYOTO_TYCOON && extension != Some("kch") {
            return Err(CactusError::InvalidAttribute {
                attribute: "database_name".to_string(),
                value: name.to_string(),
                reason: "kyoto_tycoon database names must end in .kch".to_string(),
            });
        }
        self.db_elem_mut()?.set_attr("database_name", name);
        Ok(())
    }

    pub fn db_port(&self) -> CactusResult<u16> {
        self.require_kyoto_tycoon("port")?;
        let port = self.db_elem()?.require_attr("port")?;
        port.parse().map_err(|_| CactusError::InvalidAttribute {
            attribute: "port".to_string(),
            value: port.to_string(),
            reason: "expected a TCP port number".to_string(),
        })
    }

    pub fn set_db_port(&mut self, port: u16) -> CactusResult<()> {
        self.require_kyoto_tycoon("port")?;
        self.db_elem_mut()?.set_attr("port", port.to_string());
        Ok(())
    }

    fn require_kyoto_tycoon(&self, operation: &str) -> CactusResult<()> {
        let db_type = self.db_type()?;
        if db_type != KYOTO_TYCOON {
            return Err(CactusError::DatabaseType {
                actual: db_type.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Raw `config` attribute
    pub fn config(&self) -> CactusResult<&str> {
        self.root.require_attr("config")
    }

    /// `config` resolved against the installation root named by `CACTUS_ROOT`
    pub fn config_path(&self) -> CactusResult<PathBuf> {
        self.config_path_in(&cactus_root_path())
    }

    /// `config` resolved against an explicit installation root
    pub fn config_path_in(&self, cactus_root: &Path) -> CactusResult<PathBuf> {
        Ok(resolve_config_path(self.config()?, cactus_root))
    }

    pub fn set_config_path(&mut self, path: &str) {
        self.root.set_attr("config", path);
    }

    /// Parse the species tree
    pub fn tree(&self) -> CactusResult<SpeciesTree> {
        SpeciesTree::parse(self.root.require_attr("species_tree")?)
    }

    /// Sequence path of a leaf event
    pub fn sequence(&self, event: &str) -> CactusResult<&str> {
        self.seq_map
            .get(event)
            .map(String::as_str)
            .ok_or_else(|| CactusError::UnknownEvent(event.to_string()))
    }

    pub fn sequence_map(&self) -> &HashMap<String, String> {
        &self.seq_map
    }

    /// Sequence paths in post-order, as the `sequences` attribute lists them
    pub fn sequences(&self) -> Vec<&str> {
        self.root
            .attr("sequences")
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Sequence paths of the species tree leaves in post-order, without any
    /// surplus entries of the `sequences` attribute
    pub fn leaf_sequences(&self) -> CactusResult<Vec<String>> {
        let tree = self.tree()?;
        tree.leaf_names()
            .into_iter()
            .map(|leaf| self.sequence(leaf).map(str::to_string))
            .collect()
    }

    pub fn reference_path(&self) -> CactusResult<&str> {
        self.root.require("reference")?.require_attr("path")
    }

    pub fn set_reference_path(&mut self, path: &str) {
        self.root.find_or_insert("reference").set_attr("path", path);
    }

    pub fn maf_path(&self) -> CactusResult<&str> {
        self.root.require("maf")?.require_attr("path")
    }

    pub fn set_maf_path(&mut self, path: &str) {
        self.root.find_or_insert("maf").set_attr("path", path);
    }

    /// Reference event name from the workflow config this experiment points at
    pub fn reference_name_from_config(&self) -> CactusResult<String> {
        let config = WorkflowConfig::load(&self.config_path()?)?;
        Ok(config.reference_name()?.to_string())
    }

    /// Events marked as outgroups, `None` when the attribute is absent
    pub fn outgroup_events(&self) -> Option<Vec<&str>> {
        self.root
            .attr("outgroup_events")
            .map(|events| events.split_whitespace().collect())
    }

    /// The `st_kv_database_conf` element on one line, as the tools expect it
    pub fn disk_database_string(&self) -> CactusResult<String> {
        let conf = self.root.require(DISK_TAG)?.require(DB_CONF_TAG)?;
        conf.to_compact_string()
    }

    /// Map leaf event names to sequence paths by walking leaves in post-order
    fn build_sequence_map(&self) -> CactusResult<HashMap<String, String>> {
        let tree = self.tree()?;
        let sequences = self.sequences();
        let leaves = tree.leaf_names();

        if sequences.len() < leaves.len() {
            return Err(CactusError::InvalidAttribute {
                attribute: "sequences".to_string(),
                value: sequences.join(" "),
                reason: format!(
                    "{} sequences for {} species tree leaves",
                    sequences.len(),
                    leaves.len()
                ),
            });
        }

        Ok(leaves
            .into_iter()
            .zip(sequences)
            .map(|(leaf, seq)| (leaf.to_string(), seq.to_string()))
            .collect())
    }

    /// Replace the species tree, optionally with a new sequence map.
    ///
    /// The stored map is restricted to the leaves of `tree`.
    pub fn update_tree(
        &mut self,
        tree: &SpeciesTree,
        seq_map: Option<HashMap<String, String>>,
    ) -> CactusResult<()> {
        let source = seq_map.unwrap_or_else(|| self.seq_map.clone());

        let mut sequences = Vec::new();
        let mut new_map = HashMap::new();
        for leaf in tree.leaf_names() {
            let path = source
                .get(leaf)
                .ok_or_else(|| CactusError::UnknownEvent(leaf.to_string()))?;
            sequences.push(path.clone());
            new_map.insert(leaf.to_string(), path.clone());
        }

        self.root.set_attr("species_tree", tree.to_newick());
        self.root.set_attr("sequences", sequences.join(" "));
        self.seq_map = new_map;
        Ok(())
    }

    /// Add an outgroup above the current root and record it in the document
    pub fn set_outgroup(&mut self, name: &str, distance: f64, path: &str) -> CactusResult<()> {
        let mut tree = self.tree()?;
        tree.add_outgroup(name, distance)?;

        let mut seq_map = self.seq_map.clone();
        seq_map.insert(name.to_string(), path.to_string());
        self.update_tree(&tree, Some(seq_map))?;

        self.root.set_attr("outgroup_events", name);
        Ok(())
    }
}
