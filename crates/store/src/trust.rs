use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::scanner::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSource {
    pub name: String,
    /// Glob-like URI pattern: `*` matches any run of characters, `?` a single one.
    pub pattern: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Collections from this source must carry a valid signature unless the policy
    /// allows unsigned collections.
    #[serde(default)]
    pub require_signature: bool,
}

impl TrustedSource {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            verified: false,
            tags: Vec::new(),
            require_signature: false,
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn signed(mut self) -> Self {
        self.require_signature = true;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledSource {
    source: TrustedSource,
    matcher: Regex,
}

/// Ordered set of trusted URI patterns. Later additions with an existing name replace
/// the earlier entry in place.
#[derive(Debug, Clone)]
pub struct TrustedSources {
    sources: Vec<CompiledSource>,
}

impl Default for TrustedSources {
    fn default() -> Self {
        let mut sources = Self::empty();
        for source in default_sources() {
            // built-in patterns are known to compile
            let _ = sources.add(source);
        }
        sources
    }
}

fn default_sources() -> Vec<TrustedSource> {
    vec![
        TrustedSource::new("trove-official", "github.com/trove-collections/*")
            .verified()
            .with_tags(&["official", "verified"]),
        TrustedSource::new("community-verified", "github.com/*/*-verified-collection")
            .verified()
            .with_tags(&["community", "verified"]),
        TrustedSource::new("local-filesystem", "file:///*").with_tags(&["local", "development"]),
    ]
}

impl TrustedSources {
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn add(&mut self, source: TrustedSource) -> Result<()> {
        if source.name.trim().is_empty() {
            return Err(StoreError::InvalidConfiguration(
                "trusted source name is required".to_string(),
            ));
        }
        if source.pattern.trim().is_empty() {
            return Err(StoreError::InvalidConfiguration(
                "trusted source pattern is required".to_string(),
            ));
        }

        let matcher = glob_to_regex(&source.pattern)?;
        let compiled = CompiledSource { source, matcher };
        match self
            .sources
            .iter_mut()
            .find(|existing| existing.source.name == compiled.source.name)
        {
            Some(existing) => *existing = compiled,
            None => self.sources.push(compiled),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.source.name != name);
        before != self.sources.len()
    }

    pub fn get(&self, name: &str) -> Option<&TrustedSource> {
        self.sources
            .iter()
            .find(|s| s.source.name == name)
            .map(|s| &s.source)
    }

    pub fn list(&self) -> Vec<&TrustedSource> {
        self.sources.iter().map(|s| &s.source).collect()
    }

    /// Returns the first trusted source whose pattern matches the URI.
    ///
    /// `github://owner/repo/...` URIs are also tried in their `github.com/owner/repo/...`
    /// form so patterns can be written either way.
    pub fn find_match(&self, uri: &str) -> Option<&TrustedSource> {
        let alternate = uri
            .strip_prefix("github://")
            .map(|rest| format!("github.com/{}", rest.split('@').next().unwrap_or(rest)));

        self.sources
            .iter()
            .find(|s| {
                s.matcher.is_match(uri)
                    || alternate
                        .as_deref()
                        .is_some_and(|alt| s.matcher.is_match(alt))
            })
            .map(|s| &s.source)
    }

    pub fn is_trusted(&self, uri: &str) -> bool {
        self.find_match(uri).is_some()
    }

    pub fn check(&self, uri: &str, require_trusted: bool) -> Result<()> {
        match self.find_match(uri) {
            Some(source) => {
                debug!("URI {} matched trusted source '{}'", uri, source.name);
                Ok(())
            }
            None if require_trusted => Err(StoreError::UntrustedSource(uri.to_string())),
            None => Ok(()),
        }
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StoreError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Install-time security settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub require_trusted_source: bool,
    pub scan_enabled: bool,
    pub scan_threshold: Severity,
    /// Extra patterns appended to the default trusted sources.
    #[serde(default)]
    pub trusted_patterns: Vec<String>,
    /// Every collection must carry a valid signature.
    #[serde(default)]
    pub require_signatures: bool,
    /// Never ask for signatures, even from sources that require them.
    #[serde(default = "default_allow_unsigned")]
    pub allow_unsigned: bool,
    /// GPG key to import, or SSH allowed-signers file, used to check signatures.
    #[serde(default)]
    pub signing_key: Option<PathBuf>,
}

fn default_allow_unsigned() -> bool {
    true
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            require_trusted_source: false,
            scan_enabled: true,
            scan_threshold: Severity::Critical,
            trusted_patterns: Vec::new(),
            require_signatures: false,
            allow_unsigned: default_allow_unsigned(),
            signing_key: None,
        }
    }
}

impl SecurityPolicy {
    pub fn strict() -> Self {
        Self {
            require_trusted_source: true,
            scan_threshold: Severity::High,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.require_signatures && self.allow_unsigned {
            return Err(StoreError::InvalidConfiguration(
                "require_signatures and allow_unsigned cannot both be enabled".to_string(),
            ));
        }
        if self.require_trusted_source && self.trusted_sources()?.list().is_empty() {
            return Err(StoreError::InvalidConfiguration(
                "trusted sources are required but none are configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a collection from `source` (the trusted source its URI matched, if
    /// any) has to be signed.
    pub fn should_require_signature(&self, source: Option<&TrustedSource>) -> bool {
        if self.allow_unsigned {
            return false;
        }
        self.require_signatures || source.is_some_and(|s| s.require_signature)
    }

    /// The default trusted sources plus the configured extra patterns.
    pub fn trusted_sources(&self) -> Result<TrustedSources> {
        let mut sources = TrustedSources::default();
        for (index, pattern) in self.trusted_patterns.iter().enumerate() {
            sources.add(TrustedSource::new(format!("configured-{}", index + 1), pattern))?;
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sources() {
        let sources = TrustedSources::default();
        assert_eq!(sources.list().len(), 3);
        assert!(sources.get("local-filesystem").is_some());
        assert!(!sources.get("local-filesystem").unwrap().verified);
    }

    #[test]
    fn test_pattern_matching() {
        let sources = TrustedSources::default();

        assert!(sources.is_trusted("file:///home/alice/collections/devops"));
        assert!(sources.is_trusted("github.com/trove-collections/devops"));
        assert!(sources.is_trusted("github://trove-collections/devops"));
        assert!(sources.is_trusted("github://bob/tools-verified-collection@1.0.0"));

        assert!(!sources.is_trusted("https://example.com/devops.tar.gz"));
        assert!(!sources.is_trusted("github://mallory/devops"));
    }

    #[test]
    fn test_pattern_dots_are_literal() {
        let mut sources = TrustedSources::empty();
        sources
            .add(TrustedSource::new("example", "https://example.com/*"))
            .unwrap();
        assert!(sources.is_trusted("https://example.com/a.tar.gz"));
        assert!(!sources.is_trusted("https://exampleXcom/a.tar.gz"));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        let mut sources = TrustedSources::empty();
        sources.add(TrustedSource::new("v", "file:///v?")).unwrap();
        assert!(sources.is_trusted("file:///v1"));
        assert!(!sources.is_trusted("file:///v12"));
    }

    #[test]
    fn test_add_replace_remove() {
        let mut sources = TrustedSources::empty();
        assert!(sources.add(TrustedSource::new("", "x")).is_err());
        assert!(sources.add(TrustedSource::new("x", " ")).is_err());

        sources.add(TrustedSource::new("a", "file:///a/*")).unwrap();
        sources.add(TrustedSource::new("a", "file:///b/*")).unwrap();
        assert_eq!(sources.list().len(), 1);
        assert!(sources.is_trusted("file:///b/c"));
        assert!(!sources.is_trusted("file:///a/c"));

        assert!(sources.remove("a"));
        assert!(!sources.remove("a"));
    }

    #[test]
    fn test_check_requires_trust_only_when_asked() {
        let sources = TrustedSources::default();
        let uri = "https://example.com/devops.tar.gz";
        assert!(sources.check(uri, false).is_ok());
        assert!(matches!(
            sources.check(uri, true),
            Err(StoreError::UntrustedSource(_))
        ));
    }

    #[test]
    fn test_policy_extra_patterns() {
        let policy = SecurityPolicy {
            require_trusted_source: true,
            trusted_patterns: vec!["https://example.com/*".to_string()],
            ..Default::default()
        };
        policy.validate().unwrap();
        let sources = policy.trusted_sources().unwrap();
        assert!(sources.is_trusted("https://example.com/devops.tar.gz"));
    }

    #[test]
    fn test_signature_flags_conflict() {
        let policy = SecurityPolicy {
            require_signatures: true,
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(StoreError::InvalidConfiguration(m)) if m.contains("allow_unsigned")
        ));

        let policy = SecurityPolicy {
            require_signatures: true,
            allow_unsigned: false,
            ..Default::default()
        };
        policy.validate().unwrap();
    }

    #[test]
    fn test_should_require_signature() {
        let signed = TrustedSource::new("signed", "file:///*").signed();
        let unsigned = TrustedSource::new("plain", "file:///*");

        let permissive = SecurityPolicy::default();
        assert!(!permissive.should_require_signature(Some(&signed)));

        let per_source = SecurityPolicy {
            allow_unsigned: false,
            ..Default::default()
        };
        assert!(per_source.should_require_signature(Some(&signed)));
        assert!(!per_source.should_require_signature(Some(&unsigned)));
        assert!(!per_source.should_require_signature(None));

        let global = SecurityPolicy {
            require_signatures: true,
            allow_unsigned: false,
            ..Default::default()
        };
        assert!(global.should_require_signature(None));
        assert!(global.should_require_signature(Some(&unsigned)));
    }

    #[test]
    fn test_policy_missing_signature_fields_use_defaults() {
        let policy: SecurityPolicy = serde_json::from_str(
            r#"{"require_trusted_source": false, "scan_enabled": true, "scan_threshold": "high"}"#,
        )
        .unwrap();
        assert!(policy.allow_unsigned);
        assert!(!policy.require_signatures);
        assert!(policy.signing_key.is_none());
    }
}
