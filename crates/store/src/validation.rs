//! Manifest validation.
//!
//! A [`Validator`] runs a fixed, ordered battery of [`ValidationRule`]s against a parsed
//! manifest and, when it has a base directory, the files the manifest references.
//! Validation never fails: even a hopelessly broken manifest yields a structured
//! [`ValidationResult`]. Rules only read, so validating the same manifest twice gives
//! identical results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::manifest::{ElementMatch, ElementType, HookType, Manifest};

/// Largest single element file accepted.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Largest total size of all element files.
pub const MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024;

const MAX_ELEMENTS: usize = 1000;
const MAX_DEPENDENCIES: usize = 10;
const MAX_HOOKS: usize = 20;

pub const CATEGORIES: &[&str] = &[
    "development",
    "devops",
    "creative-writing",
    "data-science",
    "security",
    "productivity",
    "education",
    "research",
    "other",
];

pub const LICENSES: &[&str] = &[
    "MIT",
    "Apache-2.0",
    "GPL-3.0",
    "BSD-3-Clause",
    "ISC",
    "MPL-2.0",
    "LGPL-3.0",
    "Proprietary",
    "Other",
];

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

/// Lowercase alphanumerics and hyphens, starting and ending with an alphanumeric.
pub fn is_valid_collection_name(name: &str) -> bool {
    let edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    name.len() >= 2
        && name.chars().all(|c| edge(c) || c == '-')
        && name.chars().next().is_some_and(edge)
        && name.chars().last().is_some_and(edge)
}

fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(email))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Manifest field, e.g. `name` or `elements[0].path`.
    pub field: String,
    /// Dotted rule identifier, e.g. `schema.required` or `security.path_traversal`.
    pub rule: String,
    pub message: String,
    pub severity: IssueSeverity,
    /// JSON path of the field, e.g. `$.elements[0].path`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl ValidationError {
    fn new(severity: IssueSeverity, field: impl Into<String>, rule: &str, message: String) -> Self {
        let field = field.into();
        Self {
            path: format!("$.{}", field),
            field,
            rule: rule.to_string(),
            message,
            severity,
            fix: None,
        }
    }

    pub fn error(field: impl Into<String>, rule: &str, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, field, rule, message.into())
    }

    pub fn warning(field: impl Into<String>, rule: &str, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, field, rule, message.into())
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        if let Some(fix) = &self.fix {
            write!(f, " (fix: {})", fix)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_rules_checked: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
    pub stats: ValidationStats,
}

impl ValidationResult {
    pub fn errors_for(&self, field: &str) -> Vec<&ValidationError> {
        self.errors.iter().filter(|e| e.field == field).collect()
    }

    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

/// What a rule sees while it runs.
pub struct ValidationContext<'a> {
    pub manifest: &'a Manifest,
    /// Collection root. `None` skips every check that needs the filesystem.
    pub base_dir: Option<&'a Path>,
}

/// Collects the issues and check count of one rule.
#[derive(Debug, Default)]
pub struct RuleOutput {
    issues: Vec<ValidationError>,
    checked: usize,
}

impl RuleOutput {
    pub fn checked(&mut self) {
        self.checked += 1;
    }

    pub fn push(&mut self, issue: ValidationError) {
        self.issues.push(issue);
    }
}

pub trait ValidationRule: Send + Sync {
    /// Name of the rule group
    fn rule_name(&self) -> &str;

    fn description(&self) -> &str;

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput);
}

pub struct Validator {
    base_dir: Option<PathBuf>,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Validator that also checks the files referenced by the manifest under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            rules: default_rules(),
        }
    }

    /// Validator for the manifest document alone.
    pub fn schema_only() -> Self {
        Self {
            base_dir: None,
            rules: default_rules(),
        }
    }

    /// Appends a rule after the built-in ones.
    pub fn add_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn validate_comprehensive(&self, manifest: &Manifest) -> ValidationResult {
        let ctx = ValidationContext {
            manifest,
            base_dir: self.base_dir.as_deref(),
        };

        let mut result = ValidationResult::default();
        for rule in &self.rules {
            let mut out = RuleOutput::default();
            rule.check(&ctx, &mut out);
            debug!(
                "Validation rule '{}' ran {} check(s), {} issue(s)",
                rule.rule_name(),
                out.checked,
                out.issues.len()
            );

            result.stats.total_rules_checked += out.checked;
            for issue in out.issues {
                match issue.severity {
                    IssueSeverity::Error => result.errors.push(issue),
                    IssueSeverity::Warning => result.warnings.push(issue),
                }
            }
        }

        result.stats.errors = result.errors.len();
        result.stats.warnings = result.warnings.len();
        result.valid = result.errors.is_empty();
        result
    }
}

fn default_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(SchemaRule),
        Box::new(ElementsRule),
        Box::new(StatsRule),
        Box::new(DependenciesRule),
        Box::new(SecurityRule),
        Box::new(HooksRule),
        Box::new(SizeRule),
    ]
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Accepts `*` and anything `semver::VersionReq` parses (`^1.2.0`, `~1.2`, `>=1.0.0`, `<2`, `1.2.3`).
pub fn is_valid_version_constraint(constraint: &str) -> bool {
    let constraint = constraint.trim();
    constraint == "*" || semver::VersionReq::parse(constraint).is_ok()
}

pub fn is_supported_uri(uri: &str) -> bool {
    ["github://", "file://", "https://", "http://"]
        .iter()
        .any(|scheme| uri.starts_with(scheme))
}

struct SchemaRule;

impl ValidationRule for SchemaRule {
    fn rule_name(&self) -> &str {
        "schema"
    }

    fn description(&self) -> &str {
        "Required fields, formats, lengths and enumerations"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let m = ctx.manifest;

        let required = [
            ("name", &m.name, "Add a collection name (e.g., 'my-collection')"),
            ("version", &m.version, "Add a semver version (e.g., '1.0.0')"),
            ("author", &m.author, "Add author name or organization"),
            ("description", &m.description, "Add a clear description of the collection"),
        ];
        for (field, value, fix) in required {
            out.checked();
            if value.trim().is_empty() {
                out.push(
                    ValidationError::error(field, "schema.required", format!("{} is required", field))
                        .with_fix(fix),
                );
            }
        }

        out.checked();
        if m.elements.is_empty() {
            out.push(
                ValidationError::error("elements", "schema.required", "at least one element is required")
                    .with_fix("Add at least one element (persona, skill, template, etc.)"),
            );
        }

        out.checked();
        if !m.version.is_empty() && semver::Version::parse(&m.version).is_err() {
            out.push(
                ValidationError::error(
                    "version",
                    "schema.format",
                    format!("invalid version format: {}", m.version),
                )
                .with_fix("Use semver format: X.Y.Z (e.g., '1.0.0', '2.1.3-beta')"),
            );
        }

        if !m.name.is_empty() {
            out.checked();
            if !is_valid_collection_name(&m.name) {
                out.push(
                    ValidationError::error(
                        "name",
                        "schema.format",
                        format!("invalid name format: {}", m.name),
                    )
                    .with_fix("Use lowercase, hyphens, and alphanumeric (e.g., 'my-collection')"),
                );
            }

            out.checked();
            let len = m.name.chars().count();
            if !(3..=64).contains(&len) {
                out.push(
                    ValidationError::error(
                        "name",
                        "schema.length",
                        format!("name length must be 3-64 chars, got {}", len),
                    )
                    .with_fix("Use a name between 3 and 64 characters"),
                );
            }
        }

        if !m.author.is_empty() {
            out.checked();
            let len = m.author.chars().count();
            if !(2..=100).contains(&len) {
                out.push(
                    ValidationError::error(
                        "author",
                        "schema.length",
                        format!("author length must be 2-100 chars, got {}", len),
                    )
                    .with_fix("Use an author name between 2 and 100 characters"),
                );
            }
        }

        if !m.description.is_empty() {
            out.checked();
            let len = m.description.chars().count();
            if !(10..=500).contains(&len) {
                out.push(
                    ValidationError::warning(
                        "description",
                        "schema.length",
                        format!("description should be 10-500 chars, got {}", len),
                    )
                    .with_fix("Provide a concise but informative description"),
                );
            }
        }

        if let Some(category) = m.category.as_deref() {
            out.checked();
            if !CATEGORIES.contains(&category) {
                out.push(
                    ValidationError::warning(
                        "category",
                        "schema.enum",
                        format!("unknown category: {}", category),
                    )
                    .with_fix(format!("Use a standard category: {}", CATEGORIES.join(", "))),
                );
            }
        }

        if let Some(license) = m.license.as_deref() {
            out.checked();
            if !LICENSES.contains(&license) {
                out.push(
                    ValidationError::warning(
                        "license",
                        "schema.enum",
                        format!("non-standard license: {}", license),
                    )
                    .with_fix("Use SPDX license identifier (e.g., MIT, Apache-2.0)"),
                );
            }
        }

        let urls = [
            ("homepage", m.homepage.as_deref()),
            ("documentation", m.documentation.as_deref()),
            ("repository", m.repository.as_deref()),
        ];
        for (field, value) in urls {
            let Some(value) = value else { continue };
            out.checked();
            if !is_http_url(value) {
                out.push(
                    ValidationError::error(field, "schema.format", format!("invalid URL format: {}", value))
                        .with_fix("Use valid HTTP(S) URL"),
                );
            }
        }

        for (i, maintainer) in m.maintainers.iter().enumerate() {
            let Some(email) = maintainer.email.as_deref() else { continue };
            out.checked();
            if !is_valid_email(email) {
                out.push(
                    ValidationError::error(
                        format!("maintainers[{}].email", i),
                        "schema.format",
                        format!("invalid email format: {}", email),
                    )
                    .with_fix("Use valid email format: user@example.com"),
                );
            }
        }
    }
}

struct ElementsRule;

impl ValidationRule for ElementsRule {
    fn rule_name(&self) -> &str {
        "elements"
    }

    fn description(&self) -> &str {
        "Element paths, types and resolvability"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let m = ctx.manifest;
        let mut seen: HashMap<&str, usize> = HashMap::new();

        for (i, element) in m.elements.iter().enumerate() {
            let field = format!("elements[{}].path", i);

            out.checked();
            if element.path.trim().is_empty() {
                out.push(
                    ValidationError::error(&field, "element.path_required", "element path is required")
                        .with_fix("Add path field to element"),
                );
                continue;
            }

            out.checked();
            if element.kind().is_none() {
                out.push(
                    ValidationError::error(
                        format!("elements[{}].type", i),
                        "element.type_invalid",
                        format!("invalid element type: {}", element.element_type),
                    )
                    .with_fix(format!(
                        "Use: {}",
                        ElementType::ALL.map(|t| t.as_str()).join(", ")
                    )),
                );
            }

            out.checked();
            match seen.get(element.path.as_str()) {
                Some(previous) => out.push(
                    ValidationError::warning(
                        format!("elements[{},{}].path", previous, i),
                        "element.duplicate_path",
                        format!("duplicate element path: {}", element.path),
                    )
                    .at(format!("$.{}", field))
                    .with_fix("Remove duplicate or use unique paths"),
                ),
                None => {
                    seen.insert(element.path.as_str(), i);
                }
            }

            if !element.is_glob() && element.kind().is_some() {
                out.checked();
                let extension = Path::new(&element.path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("");
                if !matches!(extension, "yaml" | "yml" | "md" | "markdown" | "json") {
                    out.push(
                        ValidationError::warning(
                            format!("elements[{}]", i),
                            "element.type_mismatch",
                            format!(
                                "type '{}' doesn't match file extension '.{}'",
                                element.element_type, extension
                            ),
                        )
                        .at(format!("$.{}", field))
                        .with_fix(format!("Rename to <name>.{}.yaml", element.element_type)),
                    );
                }
            }

            if element.path.contains("**/**") {
                out.checked();
                out.push(
                    ValidationError::warning(&field, "element.glob_pattern", "redundant glob pattern: **/**")
                        .with_fix("Simplify to **/*"),
                );
            }
        }

        if let Some(base) = ctx.base_dir {
            for (i, matched) in m.expand_elements(base) {
                let element = &m.elements[i];
                if element.path.trim().is_empty() {
                    continue;
                }
                out.checked();
                let field = format!("elements[{}].path", i);
                match matched {
                    ElementMatch::Files(_) => {}
                    ElementMatch::Missing if element.is_glob() => out.push(
                        ValidationError::error(
                            &field,
                            "element.glob_no_match",
                            format!("no files match glob pattern: {}", element.path),
                        )
                        .with_fix("Fix the pattern or add matching files"),
                    ),
                    ElementMatch::Missing => out.push(
                        ValidationError::error(
                            &field,
                            "element.not_found",
                            format!("element file not found: {}", element.path),
                        )
                        .with_fix("Create the file or correct the path"),
                    ),
                    ElementMatch::InvalidPattern(message) => out.push(
                        ValidationError::error(
                            &field,
                            "element.glob_invalid",
                            format!("invalid glob pattern '{}': {}", element.path, message),
                        )
                        .with_fix("Use a valid glob pattern such as 'skills/*.md'"),
                    ),
                }
            }
        }

        out.checked();
        if m.elements.len() > MAX_ELEMENTS {
            out.push(
                ValidationError::warning(
                    "elements",
                    "element.count_limit",
                    format!("very large collection: {} elements", m.elements.len()),
                )
                .with_fix("Consider splitting into multiple collections (recommended: <100 elements)"),
            );
        }
    }
}

struct StatsRule;

impl ValidationRule for StatsRule {
    fn rule_name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Declared element counts match the files"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let (Some(declared), Some(base)) = (ctx.manifest.stats.as_ref(), ctx.base_dir) else {
            return;
        };
        let actual = ctx.manifest.tally_elements(base);

        for kind in ElementType::ALL {
            out.checked();
            let (want, got) = (declared.count(kind), actual.count(kind));
            if want != got {
                let field = format!("stats.{}s", kind.as_str());
                let field = if kind == ElementType::Memory {
                    "stats.memories".to_string()
                } else {
                    field
                };
                out.push(
                    ValidationError::warning(
                        &field,
                        "stats.mismatch",
                        format!("declared {} {}(s) but found {}", want, kind, got),
                    )
                    .with_fix(format!("Set {} to {}", field, got)),
                );
            }
        }

        if declared.total_elements != 0 {
            out.checked();
            if declared.total_elements != actual.total_elements {
                out.push(
                    ValidationError::warning(
                        "stats.total_elements",
                        "stats.mismatch",
                        format!(
                            "declared {} element(s) but found {}",
                            declared.total_elements, actual.total_elements
                        ),
                    )
                    .with_fix(format!("Set stats.total_elements to {}", actual.total_elements)),
                );
            }
        }
    }
}

struct DependenciesRule;

impl ValidationRule for DependenciesRule {
    fn rule_name(&self) -> &str {
        "dependencies"
    }

    fn description(&self) -> &str {
        "Dependency URIs, constraints, duplicates and self references"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let m = ctx.manifest;
        let self_uri = format!("github://{}/{}", m.author, m.name);

        for (i, dep) in m.dependencies.iter().enumerate() {
            let field = format!("dependencies[{}].uri", i);

            out.checked();
            if !is_supported_uri(&dep.uri) {
                out.push(
                    ValidationError::error(
                        &field,
                        "dependency.uri_format",
                        format!("invalid dependency URI: {}", dep.uri),
                    )
                    .with_fix("Use format: github://owner/repo[@version], file:///, or https://"),
                );
            }

            if let Some(version) = dep.version.as_deref() {
                out.checked();
                if !is_valid_version_constraint(version) {
                    out.push(
                        ValidationError::error(
                            format!("dependencies[{}].version", i),
                            "dependency.version_constraint",
                            format!("invalid version constraint: {}", version),
                        )
                        .with_fix("Use semver constraints: ^1.0.0, ~2.1.0, >=1.0.0, <2.0.0"),
                    );
                }
            }

            for (j, other) in m.dependencies.iter().enumerate().skip(i + 1) {
                out.checked();
                if other.uri == dep.uri {
                    out.push(
                        ValidationError::error(
                            format!("dependencies[{},{}].uri", i, j),
                            "dependency.duplicate",
                            format!("duplicate dependency: {}", dep.uri),
                        )
                        .at(format!("$.{}", field))
                        .with_fix("Remove duplicate dependency entries"),
                    );
                }
            }

            if !m.name.is_empty() && !m.author.is_empty() {
                out.checked();
                let target = dep.uri.split('@').next().unwrap_or(&dep.uri);
                let target = target.trim_end_matches('/');
                if target == self_uri || target == m.id() {
                    out.push(
                        ValidationError::error(
                            &field,
                            "dependency.self_reference",
                            "collection cannot depend on itself",
                        )
                        .with_fix("Remove self-dependency"),
                    );
                }
            }
        }

        out.checked();
        if m.dependencies.len() > MAX_DEPENDENCIES {
            out.push(
                ValidationError::warning(
                    "dependencies",
                    "dependency.count_limit",
                    format!("too many dependencies: {}", m.dependencies.len()),
                )
                .with_fix("Consider reducing dependencies (recommended: <10)"),
            );
        }
    }
}

struct HookPattern {
    name: &'static str,
    pattern: Regex,
    label: &'static str,
}

fn hook_patterns(entries: &[(&'static str, &'static str, &'static str)]) -> Vec<HookPattern> {
    entries
        .iter()
        .filter_map(|(name, pattern, label)| {
            Regex::new(pattern).ok().map(|pattern| HookPattern {
                name,
                pattern,
                label,
            })
        })
        .collect()
}

static DANGEROUS_HOOK_PATTERNS: Lazy<Vec<HookPattern>> = Lazy::new(|| {
    hook_patterns(&[
        ("backtick_execution", r"`", "`"),
        ("command_substitution", r"\$\(", "$("),
        ("command_chaining", r"&&", "&&"),
        ("command_chaining", r"\|\|", "||"),
        ("command_separator", r";", ";"),
        ("pipe", r"\|", "|"),
        ("redirection", r">", ">"),
        ("eval_injection", r"\beval\b", "eval"),
        ("exec_injection", r"\bexec\b", "exec"),
    ])
});

static MALICIOUS_HOOK_PATTERNS: Lazy<Vec<HookPattern>> = Lazy::new(|| {
    hook_patterns(&[
        ("malicious_command", r"rm\s+-rf", "rm -rf"),
        ("malicious_command", r"\bmkfs\b", "mkfs"),
        ("malicious_command", r"\bdd\s+if=", "dd if="),
        ("malicious_command", r":\(\)\s*\{\s*:\|:&\s*\};:", ":(){:|:&};:"),
        ("malicious_command", r"chmod\s+777", "chmod 777"),
        ("malicious_command", r"curl.*\|.*bash", "curl | bash"),
        ("malicious_command", r"wget.*\|.*sh", "wget | sh"),
        ("malicious_command", r"\bnc\s+-l", "nc -l"),
        ("malicious_command", r"\bncat\b", "ncat"),
    ])
});

struct SecurityRule;

impl ValidationRule for SecurityRule {
    fn rule_name(&self) -> &str {
        "security"
    }

    fn description(&self) -> &str {
        "Path traversal, symlinks and unsafe hook commands"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let m = ctx.manifest;

        for (i, element) in m.elements.iter().enumerate() {
            let field = format!("elements[{}].path", i);

            out.checked();
            if element.path.contains("..") {
                out.push(
                    ValidationError::error(
                        &field,
                        "security.path_traversal",
                        format!("path traversal detected: {}", element.path),
                    )
                    .with_fix("Remove '..' from path, use relative paths only"),
                );
            }

            out.checked();
            if Path::new(&element.path).is_absolute() || element.path.starts_with('/') {
                out.push(
                    ValidationError::error(
                        &field,
                        "security.absolute_path",
                        format!("absolute path not allowed: {}", element.path),
                    )
                    .with_fix("Use relative paths from collection root"),
                );
            }

            if let Some(base) = ctx.base_dir {
                if !element.is_glob() && !element.path.is_empty() {
                    out.checked();
                    let is_symlink = std::fs::symlink_metadata(base.join(&element.path))
                        .map(|meta| meta.file_type().is_symlink())
                        .unwrap_or(false);
                    if is_symlink {
                        out.push(
                            ValidationError::warning(
                                &field,
                                "security.symlink",
                                format!("symlink detected: {}", element.path),
                            )
                            .with_fix("Consider using actual files instead of symlinks"),
                        );
                    }
                }
            }
        }

        let Some(hooks) = m.hooks.as_ref() else { return };
        for (stage, group) in hooks.groups() {
            for (i, hook) in group.iter().enumerate() {
                let Some(command) = hook.command.as_deref() else { continue };
                let field = format!("hooks.{}[{}].command", stage, i);

                for dangerous in DANGEROUS_HOOK_PATTERNS.iter() {
                    out.checked();
                    if dangerous.pattern.is_match(command) {
                        out.push(
                            ValidationError::warning(
                                &field,
                                &format!("security.{}", dangerous.name),
                                format!("potentially dangerous pattern in command: {}", dangerous.label),
                            )
                            .with_fix("Avoid shell operators, use safe commands only"),
                        );
                    }
                }

                for malicious in MALICIOUS_HOOK_PATTERNS.iter() {
                    out.checked();
                    if malicious.pattern.is_match(command) {
                        out.push(
                            ValidationError::error(
                                &field,
                                &format!("security.{}", malicious.name),
                                format!("potentially malicious command detected: {}", malicious.label),
                            )
                            .with_fix("Remove dangerous commands, use safe alternatives"),
                        );
                    }
                }
            }
        }
    }
}

struct HooksRule;

impl ValidationRule for HooksRule {
    fn rule_name(&self) -> &str {
        "hooks"
    }

    fn description(&self) -> &str {
        "Hook types and their required fields"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let Some(hooks) = ctx.manifest.hooks.as_ref() else {
            out.checked();
            return;
        };

        for (stage, group) in hooks.groups() {
            for (i, hook) in group.iter().enumerate() {
                let prefix = format!("hooks.{}[{}]", stage, i);

                out.checked();
                if hook.hook_type.trim().is_empty() {
                    out.push(
                        ValidationError::error(format!("{}.type", prefix), "hook.type_required", "hook type is required")
                            .with_fix("Add type: command, validate, backup, or confirm"),
                    );
                    continue;
                }

                out.checked();
                let Some(kind) = hook.kind() else {
                    out.push(
                        ValidationError::error(
                            format!("{}.type", prefix),
                            "hook.type_invalid",
                            format!("invalid hook type: {}", hook.hook_type),
                        )
                        .with_fix("Use: command, validate, backup, or confirm"),
                    );
                    continue;
                };

                out.checked();
                match kind {
                    HookType::Command if hook.command.as_deref().unwrap_or("").trim().is_empty() => {
                        out.push(
                            ValidationError::error(
                                format!("{}.command", prefix),
                                "hook.command_required",
                                "command hook requires 'command' field",
                            )
                            .with_fix("Add command field with shell command"),
                        )
                    }
                    HookType::Confirm if hook.message.as_deref().unwrap_or("").trim().is_empty() => {
                        out.push(
                            ValidationError::error(
                                format!("{}.message", prefix),
                                "hook.message_required",
                                "confirm hook requires 'message' field",
                            )
                            .with_fix("Add message field with confirmation prompt"),
                        )
                    }
                    HookType::Validate if hook.checks.is_empty() => out.push(
                        ValidationError::error(
                            format!("{}.checks", prefix),
                            "hook.checks_required",
                            "validate hook requires 'checks' field",
                        )
                        .with_fix("Add checks array with tool availability checks"),
                    ),
                    _ => {}
                }
            }
        }

        out.checked();
        let total = hooks.total();
        if total > MAX_HOOKS {
            out.push(
                ValidationError::warning("hooks", "hook.count_limit", format!("many hooks defined: {}", total))
                    .with_fix("Consider reducing hooks (recommended: <10 total)"),
            );
        }
    }
}

struct SizeRule;

impl ValidationRule for SizeRule {
    fn rule_name(&self) -> &str {
        "size"
    }

    fn description(&self) -> &str {
        "Per-file and total content size limits"
    }

    fn check(&self, ctx: &ValidationContext<'_>, out: &mut RuleOutput) {
        let Some(base) = ctx.base_dir else { return };

        let mut total: u64 = 0;
        for element in ctx.manifest.element_files(base) {
            out.checked();
            let Ok(meta) = std::fs::metadata(&element.absolute_path) else {
                continue;
            };
            total += meta.len();
            if meta.len() > MAX_FILE_SIZE {
                out.push(
                    ValidationError::error(
                        format!("elements[{}].path", element.index),
                        "size.file_limit",
                        format!(
                            "file '{}' is {} bytes, limit is {} bytes",
                            element.relative_path,
                            meta.len(),
                            MAX_FILE_SIZE
                        ),
                    )
                    .with_fix("Split the file or move large assets out of the collection"),
                );
            }
        }

        out.checked();
        if total > MAX_TOTAL_SIZE {
            out.push(
                ValidationError::error(
                    "elements",
                    "size.total_limit",
                    format!("collection content is {} bytes, limit is {} bytes", total, MAX_TOTAL_SIZE),
                )
                .with_fix("Split into multiple collections"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID: &str = r#"
name: devops
version: 1.0.0
author: alice
description: Tools and personas for day to day operations work
category: devops
license: MIT
elements:
  - path: personas/sre.yaml
    type: persona
  - path: skills/*.md
    type: skill
stats:
  personas: 1
  skills: 2
"#;

    async fn fixture(manifest: &str) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        tokio::fs::create_dir_all(root.join("personas")).await.unwrap();
        tokio::fs::create_dir_all(root.join("skills")).await.unwrap();
        tokio::fs::write(root.join("personas/sre.yaml"), "name: sre\n").await.unwrap();
        tokio::fs::write(root.join("skills/deploy.md"), "# Deploy\n").await.unwrap();
        tokio::fs::write(root.join("skills/rollback.md"), "# Rollback\n").await.unwrap();
        tokio::fs::write(root.join("collection.yaml"), manifest).await.unwrap();
        temp_dir
    }

    fn parse(yaml: &str) -> Manifest {
        Manifest::parse_unchecked(yaml.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_manifest_passes() {
        let temp_dir = fixture(VALID).await;
        let result = Validator::new(temp_dir.path()).validate_comprehensive(&parse(VALID));

        assert!(result.valid, "unexpected errors: {:?}", result.errors);
        assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
        assert!(result.stats.total_rules_checked > 10);
        assert_eq!(result.stats.errors, 0);
    }

    #[test]
    fn test_missing_author_reported_with_fix() {
        let manifest = parse(&VALID.replace("author: alice\n", ""));
        let result = Validator::schema_only().validate_comprehensive(&manifest);

        assert!(!result.valid);
        let errors = result.errors_for("author");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule, "schema.required");
        assert_eq!(errors[0].path, "$.author");
        assert!(errors[0].fix.is_some());
    }

    #[test]
    fn test_bad_formats() {
        let manifest = parse(
            &VALID
                .replace("name: devops", "name: Dev_Ops")
                .replace("version: 1.0.0", "version: one")
                .replace("license: MIT", "license: WTFPL"),
        );
        let result = Validator::schema_only().validate_comprehensive(&manifest);

        assert!(result.has_error_for("name"));
        assert!(result.has_error_for("version"));
        assert!(result.warnings.iter().any(|w| w.field == "license"));
    }

    #[tokio::test]
    async fn test_missing_files_and_globs() {
        let yaml = VALID
            .replace("personas/sre.yaml", "personas/missing.yaml")
            .replace("skills/*.md", "agents/*.md");
        let temp_dir = fixture(&yaml).await;
        let result = Validator::new(temp_dir.path()).validate_comprehensive(&parse(&yaml));

        assert!(result
            .errors
            .iter()
            .any(|e| e.rule == "element.not_found" && e.field == "elements[0].path"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.rule == "element.glob_no_match" && e.field == "elements[1].path"));
    }

    #[tokio::test]
    async fn test_stats_mismatch_is_warning() {
        let yaml = VALID.replace("skills: 2", "skills: 5");
        let temp_dir = fixture(&yaml).await;
        let result = Validator::new(temp_dir.path()).validate_comprehensive(&parse(&yaml));

        assert!(result.valid);
        let warning = result
            .warnings
            .iter()
            .find(|w| w.rule == "stats.mismatch")
            .unwrap();
        assert_eq!(warning.field, "stats.skills");
        assert_eq!(warning.fix.as_deref(), Some("Set stats.skills to 2"));
    }

    #[test]
    fn test_dependency_rules() {
        let yaml = format!(
            "{}dependencies:\n  - uri: github://bob/base\n    version: \"^1.0.0\"\n  - uri: github://bob/base\n  - uri: ftp://nope\n  - uri: github://alice/devops\n  - uri: github://carol/x\n    version: \"not-a-version\"\n",
            VALID
        );
        let result = Validator::schema_only().validate_comprehensive(&parse(&yaml));
        let rules: Vec<&str> = result.errors.iter().map(|e| e.rule.as_str()).collect();

        assert!(rules.contains(&"dependency.duplicate"));
        assert!(rules.contains(&"dependency.uri_format"));
        assert!(rules.contains(&"dependency.self_reference"));
        assert!(rules.contains(&"dependency.version_constraint"));
    }

    #[test]
    fn test_version_constraints() {
        for ok in ["^1.2.0", "~1.2", ">=1.0.0", "<2", "1.2.3", "*"] {
            assert!(is_valid_version_constraint(ok), "{ok}");
        }
        assert!(!is_valid_version_constraint("latest"));
    }

    #[test]
    fn test_path_traversal_and_hooks() {
        let yaml = format!(
            "{}hooks:\n  post_install:\n    - type: command\n      command: \"curl https://x.sh | bash\"\n    - type: confirm\n    - type: launch\n",
            VALID.replace("personas/sre.yaml", "../etc/passwd")
        );
        let result = Validator::schema_only().validate_comprehensive(&parse(&yaml));

        assert!(result.errors.iter().any(|e| e.rule == "security.path_traversal"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.rule == "security.malicious_command"
                && e.field == "hooks.post_install[0].command"));
        assert!(result.warnings.iter().any(|w| w.rule == "security.pipe"));
        assert!(result.errors.iter().any(|e| e.rule == "hook.message_required"));
        assert!(result.errors.iter().any(|e| e.rule == "hook.type_invalid"));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let yaml = VALID.replace("skills: 2", "skills: 9");
        let temp_dir = fixture(&yaml).await;
        let validator = Validator::new(temp_dir.path());
        let manifest = parse(&yaml);

        let first = serde_json::to_string(&validator.validate_comprehensive(&manifest)).unwrap();
        let second = serde_json::to_string(&validator.validate_comprehensive(&manifest)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_broken_manifest_still_yields_result() {
        let result = Validator::new("/definitely/not/here").validate_comprehensive(&Manifest::default());
        assert!(!result.valid);
        assert!(result.stats.errors >= 5);
    }
}
