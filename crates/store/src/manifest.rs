//! Collection manifest (`collection.yaml`) model.
//!
//! Parsing is purely structural: it never touches the filesystem. Element globs are
//! expanded lazily by [`Manifest::expand_elements`] when files are actually needed.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_op, Result, StoreError};

/// File name of the manifest at the root of every collection.
pub const MANIFEST_FILE: &str = "collection.yaml";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub elements: Vec<Element>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<CollectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Hooks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changelog: Vec<ChangelogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
}

/// A dependency on another collection, addressed by URI.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Dependency {
    #[serde(default)]
    pub uri: String,
    /// Version constraint such as `^1.0.0`, `~1.2.0`, `>=1.0.0`, `<2.0.0` or `*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// File path relative to the collection root, may be a glob pattern.
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Element {
    pub fn kind(&self) -> Option<ElementType> {
        self.element_type.parse().ok()
    }

    pub fn is_glob(&self) -> bool {
        self.path.contains(['*', '?', '['])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Persona,
    Skill,
    Template,
    Agent,
    Memory,
    Ensemble,
}

impl ElementType {
    pub const ALL: [ElementType; 6] = [
        ElementType::Persona,
        ElementType::Skill,
        ElementType::Template,
        ElementType::Agent,
        ElementType::Memory,
        ElementType::Ensemble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Persona => "persona",
            ElementType::Skill => "skill",
            ElementType::Template => "template",
            ElementType::Agent => "agent",
            ElementType::Memory => "memory",
            ElementType::Ensemble => "ensemble",
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "persona" => Ok(ElementType::Persona),
            "skill" => Ok(ElementType::Skill),
            "template" => Ok(ElementType::Template),
            "agent" => Ok(ElementType::Agent),
            "memory" => Ok(ElementType::Memory),
            "ensemble" => Ok(ElementType::Ensemble),
            other => Err(format!("unknown element type: {}", other)),
        }
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CollectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_persona: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_activate_skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_privacy_level: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_install: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_install: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_update: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_update: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_uninstall: Vec<Hook>,
}

impl Hooks {
    /// All hook groups paired with their manifest key, in lifecycle order.
    pub fn groups(&self) -> [(HookStage, &[Hook]); 5] {
        [
            (HookStage::PreInstall, self.pre_install.as_slice()),
            (HookStage::PostInstall, self.post_install.as_slice()),
            (HookStage::PreUpdate, self.pre_update.as_slice()),
            (HookStage::PostUpdate, self.post_update.as_slice()),
            (HookStage::PreUninstall, self.pre_uninstall.as_slice()),
        ]
    }

    pub fn for_stage(&self, stage: HookStage) -> &[Hook] {
        match stage {
            HookStage::PreInstall => self.pre_install.as_slice(),
            HookStage::PostInstall => self.post_install.as_slice(),
            HookStage::PreUpdate => self.pre_update.as_slice(),
            HookStage::PostUpdate => self.post_update.as_slice(),
            HookStage::PreUninstall => self.pre_uninstall.as_slice(),
        }
    }

    pub fn total(&self) -> usize {
        self.groups().iter().map(|(_, hooks)| hooks.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    PreInstall,
    PostInstall,
    PreUpdate,
    PostUpdate,
    PreUninstall,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::PreInstall => "pre_install",
            HookStage::PostInstall => "post_install",
            HookStage::PreUpdate => "pre_update",
            HookStage::PostUpdate => "post_update",
            HookStage::PreUninstall => "pre_uninstall",
        }
    }
}

impl Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle hook. `hook_type` is kept as a string so that an unknown type
/// is reported by validation instead of failing the parse.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Hook {
    #[serde(rename = "type", default)]
    pub hook_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<ToolCheck>,
}

impl Hook {
    pub fn kind(&self) -> Option<HookType> {
        self.hook_type.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    Command,
    Validate,
    Backup,
    Confirm,
}

impl FromStr for HookType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "command" => Ok(HookType::Command),
            "validate" => Ok(HookType::Validate),
            "backup" => Ok(HookType::Backup),
            "confirm" => Ok(HookType::Confirm),
            other => Err(format!("unknown hook type: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ToolCheck {
    pub tool: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    #[serde(default)]
    pub total_elements: usize,
    #[serde(default)]
    pub personas: usize,
    #[serde(default)]
    pub skills: usize,
    #[serde(default)]
    pub templates: usize,
    #[serde(default)]
    pub agents: usize,
    #[serde(default)]
    pub memories: usize,
    #[serde(default)]
    pub ensembles: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Stats {
    pub fn count(&self, element_type: ElementType) -> usize {
        match element_type {
            ElementType::Persona => self.personas,
            ElementType::Skill => self.skills,
            ElementType::Template => self.templates,
            ElementType::Agent => self.agents,
            ElementType::Memory => self.memories,
            ElementType::Ensemble => self.ensembles,
        }
    }

    fn count_mut(&mut self, element_type: ElementType) -> &mut usize {
        match element_type {
            ElementType::Persona => &mut self.personas,
            ElementType::Skill => &mut self.skills,
            ElementType::Template => &mut self.templates,
            ElementType::Agent => &mut self.agents,
            ElementType::Memory => &mut self.memories,
            ElementType::Ensemble => &mut self.ensembles,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChangelogEntry {
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub changes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Media {
    #[serde(rename = "type", default)]
    pub media_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One element file after glob expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    /// Index of the declaring entry in `Manifest::elements`.
    pub index: usize,
    pub element_type: Option<ElementType>,
    /// Path relative to the collection root, always `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

/// Result of expanding one element entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementMatch {
    Files(Vec<ResolvedElement>),
    Missing,
    InvalidPattern(String),
}

impl Manifest {
    /// Parses a manifest and requires the identity keys `name`, `version` and `author`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest = Self::parse_unchecked(bytes)?;

        let missing: Vec<&str> = [
            ("name", &manifest.name),
            ("version", &manifest.version),
            ("author", &manifest.author),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| *key)
        .collect();

        if !missing.is_empty() {
            return Err(StoreError::MalformedManifest(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        Ok(manifest)
    }

    /// Structural parse only. Missing identity keys are left for the validator to report.
    pub fn parse_unchecked(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StoreError::MalformedManifest(format!("invalid UTF-8: {}", e)))?;

        if text.trim().is_empty() {
            return Err(StoreError::MalformedManifest("manifest is empty".to_string()));
        }

        serde_yaml::from_str(text).map_err(|e| StoreError::MalformedManifest(e.to_string()))
    }

    /// Reads and strictly parses a manifest file.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(io_op("read manifest", path))?;
        Self::parse(&bytes)
    }

    /// Loads `collection.yaml` from a collection directory.
    pub async fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(MANIFEST_FILE)).await
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// `author/name`, case-sensitive and not normalised.
    pub fn id(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }

    /// `author/name@version`
    pub fn full_id(&self) -> String {
        format!("{}/{}@{}", self.author, self.name, self.version)
    }

    pub fn semver(&self) -> Result<semver::Version> {
        Ok(semver::Version::parse(&self.version)?)
    }

    pub fn hook_stage(&self, stage: HookStage) -> &[Hook] {
        self.hooks
            .as_ref()
            .map(|hooks| hooks.for_stage(stage))
            .unwrap_or(&[])
    }

    /// Expands each element entry against `base_dir`. Entries are returned in
    /// manifest order and glob matches are sorted, so the result is deterministic.
    pub fn expand_elements(&self, base_dir: &Path) -> Vec<(usize, ElementMatch)> {
        self.elements
            .iter()
            .enumerate()
            .map(|(index, element)| (index, expand_element(index, element, base_dir)))
            .collect()
    }

    /// All files referenced by the manifest, deduplicated, in stable order.
    /// Unresolvable entries are skipped.
    pub fn element_files(&self, base_dir: &Path) -> Vec<ResolvedElement> {
        let mut seen = std::collections::HashSet::new();
        let mut files = Vec::new();
        for (_, matched) in self.expand_elements(base_dir) {
            if let ElementMatch::Files(resolved) = matched {
                for element in resolved {
                    if seen.insert(element.relative_path.clone()) {
                        files.push(element);
                    }
                }
            }
        }
        files
    }

    /// Counts element files per type after expansion.
    pub fn tally_elements(&self, base_dir: &Path) -> Stats {
        let mut stats = Stats::default();
        for element in self.element_files(base_dir) {
            stats.total_elements += 1;
            if let Some(kind) = element.element_type {
                *stats.count_mut(kind) += 1;
            }
        }
        stats
    }
}

fn expand_element(index: usize, element: &Element, base_dir: &Path) -> ElementMatch {
    if element.path.is_empty() {
        return ElementMatch::Missing;
    }

    let kind = element.kind();

    if !element.is_glob() {
        let absolute_path = base_dir.join(&element.path);
        return if absolute_path.is_file() {
            ElementMatch::Files(vec![ResolvedElement {
                index,
                element_type: kind,
                relative_path: element.path.trim_start_matches("./").to_string(),
                absolute_path,
            }])
        } else {
            ElementMatch::Missing
        };
    }

    let pattern = base_dir.join(&element.path);
    let pattern = pattern.to_string_lossy();
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => return ElementMatch::InvalidPattern(e.to_string()),
    };

    let mut files: Vec<ResolvedElement> = paths
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let relative = path.strip_prefix(base_dir).ok()?;
            Some(ResolvedElement {
                index,
                element_type: kind,
                relative_path: relative_to_slash(relative),
                absolute_path: path.clone(),
            })
        })
        .collect();

    if files.is_empty() {
        return ElementMatch::Missing;
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    ElementMatch::Files(files)
}

pub(crate) fn relative_to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
