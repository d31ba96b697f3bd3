use crate::core::error::SpecificationError;
use crate::core::registry::FeatureRegistry;
use crate::core::spec::{FeatureSpec, StepEntry};

/// Represents an issue found while checking a specification against a registry.
#[derive(Debug)]
pub enum ValidationIssue {
    /// A hard error: the specification cannot be built.
    Error(SpecificationError),
    /// A warning: the specification builds, but not everything in it will run.
    Warning(String),
}

/// The result of a validation pass.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: SpecificationError) {
        self.issues.push(ValidationIssue::Error(error));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|issue| match issue {
            ValidationIssue::Warning(msg) => Some(msg.as_str()),
            ValidationIssue::Error(_) => None,
        })
    }

    /// Consumes the result, keeping only the first error.
    pub fn into_result(self) -> Result<(), SpecificationError> {
        self.issues
            .into_iter()
            .find_map(|issue| match issue {
                ValidationIssue::Error(err) => Some(err),
                ValidationIssue::Warning(_) => None,
            })
            .map_or(Ok(()), Err)
    }

    pub fn log_summary(&self) {
        if self.is_safe() && !self.has_warnings() {
            log::debug!("specification validation passed");
            return;
        }

        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(err) => log::error!("specification error: {}", err),
                ValidationIssue::Warning(msg) => log::warn!("specification warning: {}", msg),
            }
        }
    }
}

/// Checks every step of `spec` against `registry` without instantiating anything.
///
/// Unknown feature names, unbindable arguments and an empty specification
/// are errors. Empty stages, empty groups and entries that follow a
/// response-needing step at the top of a stage (they can never run) are
/// warnings. A response-needing step inside a group cuts nothing off.
pub fn validate(spec: &FeatureSpec, registry: &FeatureRegistry) -> ValidationResult {
    let mut result = ValidationResult::new();
    if spec.is_empty() {
        result.add_error(SpecificationError::Empty);
        return result;
    }

    for (stage, entries) in spec.stages.iter().enumerate() {
        if entries.is_empty() {
            result.add_warning(format!("stage {} has no steps", stage));
            continue;
        }
        let mut walk = StageWalk {
            registry,
            stage,
            step: 0,
            gate: None,
        };
        walk.entries(entries, true, &mut result);
    }
    result
}

/// One stage, walked depth-first; `step` counts steps across groups.
struct StageWalk<'s, 'r> {
    registry: &'r FeatureRegistry,
    stage: usize,
    step: usize,
    gate: Option<&'s str>,
}

impl<'s> StageWalk<'s, '_> {
    fn entries(&mut self, entries: &'s [StepEntry], top_level: bool, result: &mut ValidationResult) {
        for entry in entries {
            let descriptor = match entry {
                StepEntry::Group(group) => {
                    if group.is_empty() {
                        result.add_warning(format!("stage {} contains an empty group", self.stage));
                    }
                    self.entries(group, false, result);
                    continue;
                }
                StepEntry::Step(descriptor) => descriptor,
            };
            let step = self.step;
            self.step += 1;

            if let Some(gate) = self.gate {
                result.add_warning(format!(
                    "step {} '{}' of stage {} follows response-needing step '{}' and is unreachable",
                    step, descriptor.name, self.stage, gate
                ));
                continue;
            }
            let Some(feature) = self.registry.get(&descriptor.name) else {
                result.add_error(SpecificationError::UnknownFeature {
                    name: descriptor.name.clone(),
                    stage: self.stage,
                    step,
                });
                continue;
            };
            if let Err(err) = feature.bind(&descriptor.args) {
                result.add_error(err);
            }
            if top_level
                && feature
                    .options_for(descriptor.node_overrides.as_ref())
                    .needs_response
            {
                self.gate = Some(descriptor.name.as_str());
            }
        }
    }
}
