//! Project configuration: store locations and per-project settings.
//!
//! Locations are an explicit record handed to the repo adapter and the
//! database constructors; there is no process-wide state. Per-project
//! settings load from a TOML file inside the data directory.

use crate::{Family, LxrefError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the external repository store.
pub const ENV_REPO: &str = "LXREF_REPO";
/// Environment variable naming the database directory.
pub const ENV_DATA: &str = "LXREF_DATA";
/// Environment variable naming the multi-project root
/// (`<root>/<project>/{repo,data}`).
pub const ENV_ROOT: &str = "LXREF_ROOT";

/// Where the external repository and the cross-reference database live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    pub repo_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Locations {
    pub fn new(repo_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve locations from explicit flags, the `LXREF_REPO`/`LXREF_DATA`
    /// pair, or the `LXREF_ROOT` multi-project layout, in that order.
    pub fn resolve(
        repo_flag: Option<PathBuf>,
        data_flag: Option<PathBuf>,
        project: Option<&str>,
    ) -> Result<Self, LxrefError> {
        let repo_env = std::env::var_os(ENV_REPO).map(PathBuf::from);
        let data_env = std::env::var_os(ENV_DATA).map(PathBuf::from);

        if let (Some(repo), Some(data)) = (
            repo_flag.clone().or(repo_env.clone()),
            data_flag.clone().or(data_env.clone()),
        ) {
            return Ok(Self::new(repo, data));
        }

        if let Some(root) = std::env::var_os(ENV_ROOT).map(PathBuf::from) {
            let project = project.ok_or_else(|| {
                LxrefError::Config(format!("{ENV_ROOT} is set but no project name was given"))
            })?;
            let base = root.join(project);
            return Ok(Self::new(
                repo_flag.or(repo_env).unwrap_or_else(|| base.join("repo")),
                data_flag.or(data_env).unwrap_or_else(|| base.join("data")),
            ));
        }

        Err(LxrefError::Config(format!(
            "no locations: pass --repo/--data, set {ENV_REPO} and {ENV_DATA}, or set {ENV_ROOT}"
        )))
    }

    /// Path of the per-project configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("lxref.toml")
    }
}

/// Maps a basename pattern (single `*` wildcard) to a language family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyRule {
    pub pattern: String,
    pub family: Family,
}

impl FamilyRule {
    fn new(pattern: &str, family: Family) -> Self {
        Self {
            pattern: pattern.to_string(),
            family,
        }
    }
}

/// Per-project settings, loaded from `<data>/lxref.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Only tags starting with this prefix are listed and indexed.
    pub tag_prefix: Option<String>,
    /// Family-classification table, first match wins.
    pub families: Vec<FamilyRule>,
    /// Per-blob extraction budget in seconds.
    pub extraction_timeout_secs: u64,
    /// Blobs larger than this are marked partial instead of extracted.
    pub max_blob_bytes: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            tag_prefix: None,
            families: default_family_rules(),
            extraction_timeout_secs: 30,
            max_blob_bytes: 4 * 1024 * 1024,
        }
    }
}

fn default_family_rules() -> Vec<FamilyRule> {
    vec![
        FamilyRule::new("*.c", Family::C),
        FamilyRule::new("*.h", Family::C),
        FamilyRule::new("Kconfig*", Family::K),
        FamilyRule::new("*.dts", Family::D),
        FamilyRule::new("*.dtsi", Family::D),
        FamilyRule::new("Makefile*", Family::M),
        FamilyRule::new("makefile", Family::M),
        FamilyRule::new("GNUmakefile", Family::M),
        FamilyRule::new("*.mk", Family::M),
    ]
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, LxrefError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| LxrefError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), LxrefError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| LxrefError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from the given path, or return defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Classify a repository path into a language family, if any rule
    /// matches its basename.
    pub fn classify(&self, path: &str) -> Option<Family> {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.families
            .iter()
            .find(|rule| glob_match(&rule.pattern, basename))
            .map(|rule| rule.family)
    }

    /// Accept or reject a tag name against the configured prefix.
    pub fn tag_matches(&self, tag: &str) -> bool {
        match &self.tag_prefix {
            Some(prefix) => tag.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

/// Basename matcher with at most one `*` wildcard.
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_cover_the_usual_suspects() {
        let config = ProjectConfig::default();
        assert_eq!(config.classify("drivers/net/e1000.c"), Some(Family::C));
        assert_eq!(config.classify("include/linux/sched.h"), Some(Family::C));
        assert_eq!(config.classify("drivers/net/Kconfig"), Some(Family::K));
        assert_eq!(config.classify("Kconfig.debug"), Some(Family::K));
        assert_eq!(config.classify("arch/arm/boot/dts/imx6.dtsi"), Some(Family::D));
        assert_eq!(config.classify("drivers/net/Makefile"), Some(Family::M));
        assert_eq!(config.classify("scripts/rules.mk"), Some(Family::M));
        assert_eq!(config.classify("README"), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut config = ProjectConfig::default();
        config
            .families
            .insert(0, FamilyRule::new("Makefile.dts", Family::M));
        assert_eq!(config.classify("Makefile.dts"), Some(Family::M));
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = ProjectConfig::default();
        config.tag_prefix = Some("v".to_string());
        config.extraction_timeout_secs = 5;
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ProjectConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.tag_prefix.as_deref(), Some("v"));
        assert_eq!(parsed.extraction_timeout_secs, 5);
        assert_eq!(parsed.families.len(), config.families.len());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: ProjectConfig = toml::from_str("tag_prefix = \"v4.\"\n").unwrap();
        assert_eq!(parsed.tag_prefix.as_deref(), Some("v4."));
        assert_eq!(parsed.max_blob_bytes, 4 * 1024 * 1024);
        assert!(!parsed.families.is_empty());
    }

    #[test]
    fn tag_prefix_filters() {
        let mut config = ProjectConfig::default();
        assert!(config.tag_matches("anything"));
        config.tag_prefix = Some("v4.".to_string());
        assert!(config.tag_matches("v4.19"));
        assert!(!config.tag_matches("v5.0"));
    }

    #[test]
    fn locations_resolve_from_flags() {
        let locations = Locations::resolve(
            Some(PathBuf::from("/srv/linux.git")),
            Some(PathBuf::from("/srv/data")),
            None,
        )
        .unwrap();
        assert_eq!(locations.repo_dir, PathBuf::from("/srv/linux.git"));
        assert_eq!(locations.config_path(), PathBuf::from("/srv/data/lxref.toml"));
    }
}
