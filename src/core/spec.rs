//! Acquisition specifications and their text form.
//!
//! A specification is an ordered list of stages, each an ordered list of
//! entries. An entry is a step or a group: a nested list of entries run as
//! one block. The text form is JSON:
//!
//! ```json
//! [
//!   [{"name": "snap", "args": [10.0], "node": {"needs_response": true}}],
//!   [{"name": "move_stage", "args": ["z", 2.5]}, [{"name": "expose"}, {"name": "save"}]]
//! ]
//! ```
//!
//! Parsing is lenient: a scalar `args` is read as a one-element tuple, `args`
//! may be omitted, and `need_response` / `one-step` are accepted as aliases.

use crate::core::NodeValue;
use crate::core::error::SpecificationError;
use crate::core::node::NodeOverrides;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One step of a stage: a feature type name, its positional arguments and
/// optional per-step node overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub name: String,
    #[serde(
        default,
        deserialize_with = "positional_args",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<NodeValue>,
    #[serde(rename = "node", default, skip_serializing_if = "Option::is_none")]
    pub node_overrides: Option<NodeOverrides>,
}

fn positional_args<'de, D>(deserializer: D) -> Result<Vec<NodeValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match NodeValue::deserialize(deserializer)? {
        NodeValue::Array(values) => values,
        NodeValue::Null => Vec::new(),
        scalar => vec![scalar],
    })
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            node_overrides: None,
        }
    }

    pub fn arg(mut self, value: impl Into<NodeValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn overrides(mut self, overrides: NodeOverrides) -> Self {
        self.node_overrides = Some(overrides);
        self
    }
}

/// One entry of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepEntry {
    Step(StepDescriptor),
    /// Entries run as one block. A response-needing step inside a group
    /// unlocks the rest of the group and whatever follows it, and never
    /// cuts off the entries that follow the group in its stage.
    Group(Vec<StepEntry>),
}

impl StepEntry {
    pub fn group<E: Into<StepEntry>>(entries: impl IntoIterator<Item = E>) -> Self {
        StepEntry::Group(entries.into_iter().map(Into::into).collect())
    }

    pub fn as_step(&self) -> Option<&StepDescriptor> {
        match self {
            StepEntry::Step(step) => Some(step),
            StepEntry::Group(_) => None,
        }
    }

    /// Steps in execution order, groups flattened.
    pub fn steps(&self) -> Box<dyn Iterator<Item = &StepDescriptor> + '_> {
        match self {
            StepEntry::Step(step) => Box::new(std::iter::once(step)),
            StepEntry::Group(entries) => Box::new(entries.iter().flat_map(StepEntry::steps)),
        }
    }
}

impl From<StepDescriptor> for StepEntry {
    fn from(step: StepDescriptor) -> Self {
        StepEntry::Step(step)
    }
}

/// Ordered stages of entries describing one acquisition run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSpec {
    pub stages: Vec<Vec<StepEntry>>,
}

impl From<Vec<Vec<StepEntry>>> for FeatureSpec {
    fn from(stages: Vec<Vec<StepEntry>>) -> Self {
        Self { stages }
    }
}

impl From<Vec<Vec<StepDescriptor>>> for FeatureSpec {
    fn from(stages: Vec<Vec<StepDescriptor>>) -> Self {
        stages.into_iter().fold(Self::new(), |spec, steps| spec.stage(steps))
    }
}

impl FeatureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage<E: Into<StepEntry>>(mut self, entries: impl IntoIterator<Item = E>) -> Self {
        self.stages.push(entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps().count()
    }

    /// True when no stage holds a step.
    pub fn is_empty(&self) -> bool {
        self.steps().next().is_none()
    }

    /// Every step with the index of its stage, groups flattened.
    pub fn steps(&self) -> impl Iterator<Item = (usize, &StepDescriptor)> {
        self.stages.iter().enumerate().flat_map(|(stage, entries)| {
            entries
                .iter()
                .flat_map(StepEntry::steps)
                .map(move |step| (stage, step))
        })
    }

    pub fn parse(text: &str) -> Result<Self, SpecificationError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> Result<String, SpecificationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_pretty_text(&self) -> Result<String, SpecificationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpecificationError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SpecificationError> {
        std::fs::write(path.as_ref(), self.to_pretty_text()?)?;
        Ok(())
    }
}

impl FromStr for FeatureSpec {
    type Err = SpecificationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::NodeKind;
    use serde_json::json;

    #[test]
    fn test_parse_accepts_lenient_forms() {
        let spec = FeatureSpec::parse(
            r#"[[{"name": "snap", "args": 10, "node": {"need_response": true, "node_type": "one-step"}}],
                [{"name": "save"}, {"name": "move_stage", "args": ["z", 2.5]}]]"#,
        )
        .unwrap();

        assert_eq!(spec.stages.len(), 2);
        assert_eq!(spec.step_count(), 3);
        let snap = spec.stages[0][0].as_step().unwrap();
        assert_eq!(snap.args, vec![json!(10)]);
        let overrides = snap.node_overrides.clone().unwrap();
        assert_eq!(overrides.needs_response, Some(true));
        assert_eq!(overrides.node_type, Some(NodeKind::SingleStep));
        let steps: Vec<_> = spec.steps().collect();
        assert_eq!(steps[1].0, 1);
        assert!(steps[1].1.args.is_empty());
        assert_eq!(steps[2].1.args, vec![json!("z"), json!(2.5)]);
    }

    #[test]
    fn test_text_form_round_trips() {
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("snap").arg(10.0).overrides(NodeOverrides {
                needs_response: Some(true),
                ..NodeOverrides::default()
            })])
            .stage(vec![
                StepDescriptor::new("stack").arg(json!([1, 2, 3])),
                StepDescriptor::new("save").overrides(NodeOverrides::default()),
            ]);

        let text = spec.to_text().unwrap();
        assert_eq!(FeatureSpec::parse(&text).unwrap(), spec);
        assert_eq!(spec.to_string(), text);
        assert_eq!(text.parse::<FeatureSpec>().unwrap(), spec);
        assert_eq!(FeatureSpec::parse(&spec.to_pretty_text().unwrap()).unwrap(), spec);
    }

    #[test]
    fn test_serialized_steps_omit_empty_fields() {
        let spec = FeatureSpec::from(vec![vec![StepDescriptor::new("wait")]]);
        assert_eq!(spec.to_text().unwrap(), r#"[[{"name":"wait"}]]"#);
    }

    #[test]
    fn test_malformed_text_is_a_parse_error() {
        assert!(matches!(
            FeatureSpec::parse(r#"[[{"args": [1]}]]"#),
            Err(SpecificationError::Parse(_))
        ));
        assert!(FeatureSpec::parse(r#"[[{"name": "a", "node": {"device": true}}]]"#).is_err());
    }

    #[test]
    fn test_nested_groups_round_trip() {
        let spec = FeatureSpec::new()
            .stage(vec![
                StepEntry::from(StepDescriptor::new("move_stage").arg(1.5)),
                StepEntry::group([
                    StepEntry::from(StepDescriptor::new("snap").overrides(NodeOverrides {
                        needs_response: Some(true),
                        ..NodeOverrides::default()
                    })),
                    StepEntry::group([StepDescriptor::new("save"), StepDescriptor::new("save").arg("copy")]),
                ]),
                StepEntry::from(StepDescriptor::new("wait")),
            ])
            .stage(vec![StepEntry::group(Vec::<StepEntry>::new())]);

        let text = spec.to_text().unwrap();
        assert_eq!(
            text,
            r#"[[{"name":"move_stage","args":[1.5]},[{"name":"snap","node":{"needs_response":true}},[{"name":"save"},{"name":"save","args":["copy"]}]],{"name":"wait"}],[[]]]"#
        );
        assert_eq!(FeatureSpec::parse(&text).unwrap(), spec);
        assert_eq!(FeatureSpec::parse(&spec.to_pretty_text().unwrap()).unwrap(), spec);

        assert_eq!(spec.step_count(), 5);
        let names: Vec<&str> = spec.steps().map(|(_, step)| step.name.as_str()).collect();
        assert_eq!(names, vec!["move_stage", "snap", "save", "save", "wait"]);
    }

    #[test]
    fn test_parse_reads_deeply_nested_groups() {
        let spec = FeatureSpec::parse(r#"[[[[[{"name": "snap", "args": 3}]]], {"name": "save"}]]"#).unwrap();
        let StepEntry::Group(outer) = &spec.stages[0][0] else {
            panic!("expected a group");
        };
        let StepEntry::Group(inner) = &outer[0] else {
            panic!("expected a nested group");
        };
        assert_eq!(inner[0], StepEntry::group([StepDescriptor::new("snap").arg(3)]));
        assert_eq!(spec.stages[0][1].as_step().map(|step| step.name.as_str()), Some("save"));
        assert_eq!(spec.to_text().unwrap().parse::<FeatureSpec>().unwrap(), spec);

        assert!(FeatureSpec::parse(r#"[[[{"args": 1}]]]"#).is_err());
        assert!(FeatureSpec::parse(r#"[[[1, 2]]]"#).is_err());
    }

    #[test]
    fn test_groups_only_is_empty() {
        let spec = FeatureSpec::new().stage(vec![StepEntry::group(Vec::<StepEntry>::new())]);
        assert!(spec.is_empty());
        assert_eq!(spec.step_count(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("acqtree-{}.json", uuid::Uuid::new_v4()));
        let spec = FeatureSpec::from(vec![vec![StepDescriptor::new("snap").arg("fast")]]);
        spec.save(&path).unwrap();
        let loaded = FeatureSpec::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, spec);

        assert!(matches!(FeatureSpec::load(&path), Err(SpecificationError::Io(_))));
    }
}
