//! Specialist registry: the one immutable routing table.
//!
//! Loaded once at startup from TOML (the bundled default or a user file),
//! validated eagerly, then shared read-only behind an `Arc` by every
//! component. Malformed tables and cyclic fallback chains abort loading with
//! a [`ConfigError`]; nothing is checked lazily at request time.

use crate::error::ConfigError;
use crate::text::normalize;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_REGISTRY: &str = include_str!("../registry/default.toml");

/// Static profile of one specialist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistProfile {
    pub id: String,
    /// Human-readable name used in synthesized reports.
    #[serde(default)]
    pub display_name: String,
    /// Persona text placed before the user query in the prompt.
    #[serde(default)]
    pub prompt_preamble: String,
    /// Scoring vocabulary, including negated and contextual variants.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Domain importance; higher wins ties.
    pub priority: i32,
    /// Phrases that bypass scoring entirely.
    #[serde(default)]
    pub forced_triggers: Vec<String>,
    /// Ordered degradation path, ending at the generalist.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

impl SpecialistProfile {
    /// Display name, or the id when none was configured.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Cross-domain mismatch heuristic consumed by the response validator.
///
/// A reply from `specialist` containing at least `min_hits` of `markers`
/// (and more of them than of its own keywords) is considered off-domain and
/// suggests rerouting to `foreign`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchRule {
    pub specialist: String,
    pub foreign: String,
    pub markers: Vec<String>,
    #[serde(default = "default_min_hits")]
    pub min_hits: usize,
}

fn default_min_hits() -> usize {
    2
}

/// On-disk registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub generalist: String,
    pub specialists: Vec<SpecialistProfile>,
    #[serde(default)]
    pub mismatch_rules: Vec<MismatchRule>,
}

/// Validated, immutable specialist table.
#[derive(Debug, Clone)]
pub struct SpecialistRegistry {
    generalist: String,
    profiles: BTreeMap<String, SpecialistProfile>,
    mismatch_rules: Vec<MismatchRule>,
}

impl SpecialistRegistry {
    /// The bundled parenting-assistant registry.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_REGISTRY)
    }

    /// Parse and validate a registry from TOML text.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = toml::from_str(source).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        Self::from_file(file)
    }

    /// Load and validate a registry file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let registry = Self::from_toml_str(&source)?;
        info!(
            path = %path.display(),
            specialists = registry.len(),
            "Specialist registry loaded"
        );
        Ok(registry)
    }

    /// Validate a parsed document.
    pub fn from_file(file: RegistryFile) -> Result<Self, ConfigError> {
        let RegistryFile {
            generalist,
            specialists,
            mismatch_rules,
        } = file;

        let mut profiles = BTreeMap::new();
        for mut profile in specialists {
            profile.id = profile.id.trim().to_string();
            if profile.id.is_empty() {
                return Err(ConfigError::Invalid {
                    message: "specialist id must not be empty".into(),
                });
            }
            profile.keywords = normalize_vocabulary(&profile.id, "keywords", &profile.keywords)?;
            profile.forced_triggers =
                normalize_vocabulary(&profile.id, "forced_triggers", &profile.forced_triggers)?;
            if profiles.contains_key(&profile.id) {
                return Err(ConfigError::DuplicateSpecialist { id: profile.id });
            }
            profiles.insert(profile.id.clone(), profile);
        }

        let generalist = generalist.trim().to_string();
        if !profiles.contains_key(&generalist) {
            return Err(ConfigError::MissingGeneralist { id: generalist });
        }

        for profile in profiles.values() {
            validate_chain(profile, &generalist, &profiles)?;
        }
        check_acyclic(&profiles)?;

        let mut rules = Vec::with_capacity(mismatch_rules.len());
        for mut rule in mismatch_rules {
            for id in [&rule.specialist, &rule.foreign] {
                if !profiles.contains_key(id) {
                    return Err(ConfigError::UnknownSpecialist {
                        referenced_by: "mismatch_rules".into(),
                        id: id.clone(),
                    });
                }
            }
            if rule.specialist == rule.foreign {
                return Err(ConfigError::Invalid {
                    message: format!("mismatch rule for '{}' targets itself", rule.specialist),
                });
            }
            rule.markers = normalize_vocabulary(&rule.specialist, "markers", &rule.markers)?;
            if rule.markers.is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "mismatch rule {} -> {} has no markers",
                        rule.specialist, rule.foreign
                    ),
                });
            }
            rule.min_hits = rule.min_hits.max(1);
            rules.push(rule);
        }

        debug!(
            specialists = profiles.len(),
            rules = rules.len(),
            generalist = generalist.as_str(),
            "Specialist registry validated"
        );

        Ok(Self {
            generalist,
            profiles,
            mismatch_rules: rules,
        })
    }

    /// Id of the terminal generalist.
    pub fn generalist(&self) -> &str {
        &self.generalist
    }

    pub fn generalist_profile(&self) -> &SpecialistProfile {
        // Presence checked in `from_file`.
        &self.profiles[&self.generalist]
    }

    pub fn get(&self, id: &str) -> Option<&SpecialistProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    /// Profiles in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SpecialistProfile> {
        self.profiles.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Priority of a specialist; unknown ids rank below everything.
    pub fn priority(&self, id: &str) -> i32 {
        self.profiles.get(id).map(|p| p.priority).unwrap_or(i32::MIN)
    }

    /// Display name of a specialist, falling back to the id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.profiles.get(id).map(SpecialistProfile::name).unwrap_or(id)
    }

    /// Fallback chain of a specialist (empty for the generalist and unknown ids).
    pub fn fallback_chain(&self, id: &str) -> &[String] {
        self.profiles
            .get(id)
            .map(|p| p.fallback_chain.as_slice())
            .unwrap_or(&[])
    }

    /// Mismatch rules that apply to replies from `specialist`.
    pub fn mismatch_rules_for<'a>(
        &'a self,
        specialist: &'a str,
    ) -> impl Iterator<Item = &'a MismatchRule> + 'a {
        self.mismatch_rules
            .iter()
            .filter(move |rule| rule.specialist == specialist)
    }

    pub fn mismatch_rules(&self) -> &[MismatchRule] {
        &self.mismatch_rules
    }
}

/// Normalize a vocabulary list, rejecting blanks and dropping duplicates.
fn normalize_vocabulary(
    owner: &str,
    field: &str,
    phrases: &[String],
) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(phrases.len());
    for phrase in phrases {
        let normalized = normalize(phrase.trim());
        if normalized.is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("'{owner}' has a blank entry in {field}"),
            });
        }
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    Ok(out)
}

fn validate_chain(
    profile: &SpecialistProfile,
    generalist: &str,
    profiles: &BTreeMap<String, SpecialistProfile>,
) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidFallbackChain {
        id: profile.id.clone(),
        reason: reason.to_string(),
    };

    if profile.id == generalist {
        if !profile.fallback_chain.is_empty() {
            return Err(invalid("the generalist must not have a fallback chain"));
        }
        return Ok(());
    }

    let mut seen = HashSet::new();
    for step in &profile.fallback_chain {
        if !profiles.contains_key(step) {
            return Err(ConfigError::UnknownSpecialist {
                referenced_by: profile.id.clone(),
                id: step.clone(),
            });
        }
        if *step == profile.id {
            return Err(invalid("chain contains its own specialist"));
        }
        if !seen.insert(step.as_str()) {
            return Err(invalid(&format!("'{step}' appears more than once")));
        }
    }

    match profile.fallback_chain.last() {
        Some(last) if last == generalist => Ok(()),
        Some(_) => Err(invalid(&format!("chain must end at '{generalist}'"))),
        None => Err(invalid("chain is empty")),
    }
}

/// Reject registries whose chains, taken together, loop.
///
/// Edges are owner -> first step and step i -> step i+1. Walking any
/// specialist's own chain stays bounded only when this graph is a DAG.
fn check_acyclic(profiles: &BTreeMap<String, SpecialistProfile>) -> Result<(), ConfigError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, NodeIndex> = profiles
        .keys()
        .map(|id| (id.as_str(), graph.add_node(id.as_str())))
        .collect();

    for profile in profiles.values() {
        let mut from = profile.id.as_str();
        for step in &profile.fallback_chain {
            graph.update_edge(nodes[from], nodes[step.as_str()], ());
            from = step.as_str();
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        ConfigError::CyclicFallback {
            id: graph[cycle.node_id()].to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
generalist = "general"

[[specialists]]
id = "sleep"
priority = 5
keywords = ["夜泣き", "NAP"]
fallback_chain = ["general"]

[[specialists]]
id = "general"
priority = 1
"#;

    #[test]
    fn test_builtin_registry_loads() {
        let registry = SpecialistRegistry::builtin().unwrap();
        assert_eq!(registry.generalist(), "coordinator");
        assert_eq!(registry.len(), 9);
        for profile in registry.iter() {
            if profile.id != registry.generalist() {
                assert_eq!(
                    profile.fallback_chain.last().map(String::as_str),
                    Some("coordinator"),
                    "{} must fall back to the generalist",
                    profile.id
                );
            }
        }
        assert!(registry.get("health").unwrap().forced_triggers.contains(&"38度".to_string()));
    }

    #[test]
    fn test_vocabulary_normalized() {
        let registry = SpecialistRegistry::from_toml_str(MINIMAL).unwrap();
        let sleep = registry.get("sleep").unwrap();
        assert_eq!(sleep.keywords, vec!["夜泣き".to_string(), "nap".to_string()]);
        assert_eq!(sleep.name(), "sleep");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let source = format!(
            "{MINIMAL}\n[[specialists]]\nid = \"sleep\"\npriority = 2\nfallback_chain = [\"general\"]\n"
        );
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSpecialist { id } if id == "sleep"));
    }

    #[test]
    fn test_missing_generalist_rejected() {
        let source = MINIMAL.replace("generalist = \"general\"", "generalist = \"nobody\"");
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::MissingGeneralist { .. }));
    }

    #[test]
    fn test_unknown_chain_member_rejected() {
        let source = MINIMAL.replace(
            "fallback_chain = [\"general\"]",
            "fallback_chain = [\"chef\", \"general\"]",
        );
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownSpecialist { referenced_by, id } if referenced_by == "sleep" && id == "chef"
        ));
    }

    #[test]
    fn test_chain_must_end_at_generalist() {
        let source = r#"
generalist = "general"

[[specialists]]
id = "a"
priority = 1
fallback_chain = ["b"]

[[specialists]]
id = "b"
priority = 1
fallback_chain = ["general"]

[[specialists]]
id = "general"
priority = 1
"#;
        let err = SpecialistRegistry::from_toml_str(source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFallbackChain { id, .. } if id == "a"));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let source = MINIMAL.replace("fallback_chain = [\"general\"]", "");
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFallbackChain { id, .. } if id == "sleep"));
    }

    #[test]
    fn test_generalist_chain_rejected() {
        let source = format!("{MINIMAL}fallback_chain = [\"sleep\"]\n");
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFallbackChain { id, .. } if id == "general"));
    }

    #[test]
    fn test_cycle_across_chains_rejected() {
        let source = r#"
generalist = "general"

[[specialists]]
id = "a"
priority = 1
fallback_chain = ["b", "general"]

[[specialists]]
id = "b"
priority = 1
fallback_chain = ["a", "general"]

[[specialists]]
id = "general"
priority = 1
"#;
        let err = SpecialistRegistry::from_toml_str(source).unwrap_err();
        assert!(matches!(err, ConfigError::CyclicFallback { .. }));
    }

    #[test]
    fn test_self_reference_rejected() {
        let source = MINIMAL.replace(
            "fallback_chain = [\"general\"]",
            "fallback_chain = [\"sleep\", \"general\"]",
        );
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFallbackChain { .. }));
    }

    #[test]
    fn test_blank_keyword_rejected() {
        let source = MINIMAL.replace("\"NAP\"", "\"  \"");
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_mismatch_rule_unknown_id_rejected() {
        let source = format!(
            "{MINIMAL}\n[[mismatch_rules]]\nspecialist = \"sleep\"\nforeign = \"chef\"\nmarkers = [\"x\"]\n"
        );
        let err = SpecialistRegistry::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSpecialist { id, .. } if id == "chef"));
    }

    #[test]
    fn test_parse_error() {
        let err = SpecialistRegistry::from_toml_str("generalist = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SpecialistRegistry::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let registry = SpecialistRegistry::load(&path).unwrap();
        assert_eq!(registry.generalist(), "general");
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["general", "sleep"]);
    }

    #[test]
    fn test_lookup_helpers() {
        let registry = SpecialistRegistry::builtin().unwrap();
        assert_eq!(registry.display_name("sleep"), "Sleep");
        assert_eq!(registry.display_name("ghost"), "ghost");
        assert_eq!(registry.priority("ghost"), i32::MIN);
        assert!(registry.fallback_chain("coordinator").is_empty());
        assert_eq!(registry.mismatch_rules_for("sleep").count(), 1);
    }
}
