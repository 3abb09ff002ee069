//! Execution optimizer: skips analysis sub-units that cannot produce
//! findings for the current request.
//!
//! Pruning is conservative. A sensor is only skipped when one of its declared
//! requirements provably cannot be met; a sensor that declares nothing always
//! runs, and a request targeting the whole scope (no explicit file list)
//! never prunes on file-derived evidence.

use crate::api::{language_for_file, AnalysisConfig, FileSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Static description of one analysis sub-unit, declared by the engine.
///
/// Empty lists mean "no requirement of that kind".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    /// Languages the sensor processes.
    #[serde(default)]
    pub languages: Vec<String>,
    /// File extensions (lowercase, without dot) the sensor processes.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Rule repositories the sensor raises findings for.
    #[serde(default)]
    pub rule_repositories: Vec<String>,
    /// Configuration properties that must be present for the sensor to work.
    #[serde(default)]
    pub required_properties: Vec<String>,
}

impl SensorDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Evidence about one analysis request, extracted once and matched against
/// every sensor.
#[derive(Debug)]
pub struct SensorContext {
    /// False when the request targets the whole scope and file-derived
    /// evidence is unavailable.
    has_file_info: bool,
    languages: BTreeSet<String>,
    extensions: BTreeSet<String>,
    repositories: BTreeSet<String>,
    properties: BTreeSet<String>,
}

impl SensorContext {
    pub fn for_request(files: &FileSet, config: &AnalysisConfig) -> Self {
        let mut languages = BTreeSet::new();
        let mut extensions = BTreeSet::new();
        for file in files {
            if let Some(language) = language_for_file(file) {
                languages.insert(language.to_owned());
            }
            if let Some(extension) = file.extension() {
                extensions.insert(extension);
            }
        }
        Self {
            has_file_info: !files.is_empty(),
            languages,
            extensions,
            repositories: config
                .active_rules
                .iter()
                .map(|rule| rule.repository().to_owned())
                .collect(),
            properties: config.properties.keys().cloned().collect(),
        }
    }

    /// Whether `sensor` could produce findings for this request.
    pub fn should_execute(&self, sensor: &SensorDescriptor) -> bool {
        if self.has_file_info {
            if !sensor.languages.is_empty()
                && !sensor.languages.iter().any(|l| self.languages.contains(l))
            {
                tracing::debug!(
                    target = "argus.optimizer",
                    sensor = %sensor.name,
                    "skipping sensor, no file in a matching language"
                );
                return false;
            }
            if !sensor.extensions.is_empty()
                && !sensor
                    .extensions
                    .iter()
                    .any(|e| self.extensions.contains(e))
            {
                tracing::debug!(
                    target = "argus.optimizer",
                    sensor = %sensor.name,
                    "skipping sensor, no file with a matching extension"
                );
                return false;
            }
        }
        if !sensor.rule_repositories.is_empty()
            && !sensor
                .rule_repositories
                .iter()
                .any(|r| self.repositories.contains(r))
        {
            tracing::debug!(
                target = "argus.optimizer",
                sensor = %sensor.name,
                "skipping sensor, no active rule in its repositories"
            );
            return false;
        }
        if !sensor
            .required_properties
            .iter()
            .all(|p| self.properties.contains(p))
        {
            tracing::debug!(
                target = "argus.optimizer",
                sensor = %sensor.name,
                "skipping sensor, missing required property"
            );
            return false;
        }
        true
    }

    /// Filter `sensors` down to the ones worth running.
    pub fn prune(&self, sensors: Vec<SensorDescriptor>) -> Vec<SensorDescriptor> {
        let before = sensors.len();
        let kept: Vec<_> = sensors
            .into_iter()
            .filter(|sensor| self.should_execute(sensor))
            .collect();
        if kept.len() < before {
            tracing::debug!(
                target = "argus.optimizer",
                kept = kept.len(),
                pruned = before - kept.len(),
                "pruned sensors for request"
            );
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ActiveRule;

    fn files(names: &[&str]) -> FileSet {
        names.iter().map(|n| (*n).into()).collect()
    }

    fn java_config() -> AnalysisConfig {
        AnalysisConfig {
            active_rules: vec![ActiveRule::new("java:S1481", "java")],
            properties: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn sensor_without_requirements_always_runs() {
        let ctx = SensorContext::for_request(&files(&["Main.java"]), &java_config());
        assert!(ctx.should_execute(&SensorDescriptor::new("generic")));
    }

    #[test]
    fn language_mismatch_prunes() {
        let ctx = SensorContext::for_request(&files(&["Main.java"]), &java_config());
        let mut python = SensorDescriptor::new("python");
        python.languages = vec!["python".into()];
        assert!(!ctx.should_execute(&python));

        let mut java = SensorDescriptor::new("java");
        java.languages = vec!["java".into()];
        assert!(ctx.should_execute(&java));
    }

    #[test]
    fn whole_scope_requests_skip_file_evidence() {
        // No explicit files: languages are unknown, so a language-constrained
        // sensor must still run.
        let ctx = SensorContext::for_request(&FileSet::new(), &java_config());
        let mut python = SensorDescriptor::new("python");
        python.languages = vec!["python".into()];
        assert!(ctx.should_execute(&python));
    }

    #[test]
    fn repository_without_active_rules_prunes() {
        let ctx = SensorContext::for_request(&files(&["Main.java"]), &java_config());
        let mut secrets = SensorDescriptor::new("secrets");
        secrets.rule_repositories = vec!["secrets".into()];
        assert!(!ctx.should_execute(&secrets));

        let mut java = SensorDescriptor::new("java");
        java.rule_repositories = vec!["java".into()];
        assert!(ctx.should_execute(&java));
    }

    #[test]
    fn missing_required_property_prunes() {
        let mut config = java_config();
        let ctx = SensorContext::for_request(&files(&["Main.java"]), &config);
        let mut node = SensorDescriptor::new("node");
        node.required_properties = vec!["argus.nodejs.executable".into()];
        assert!(!ctx.should_execute(&node));

        config
            .properties
            .insert("argus.nodejs.executable".into(), "/usr/bin/node".into());
        let ctx = SensorContext::for_request(&files(&["Main.java"]), &config);
        assert!(ctx.should_execute(&node));
    }

    #[test]
    fn prune_keeps_order_and_drops_mismatches() {
        let ctx = SensorContext::for_request(&files(&["app.py"]), &AnalysisConfig::default());
        let mut java = SensorDescriptor::new("java");
        java.languages = vec!["java".into()];
        let generic = SensorDescriptor::new("generic");
        let mut python = SensorDescriptor::new("python");
        python.languages = vec!["python".into()];

        let kept = ctx.prune(vec![java, generic.clone(), python.clone()]);
        assert_eq!(kept, vec![generic, python]);
    }
}
