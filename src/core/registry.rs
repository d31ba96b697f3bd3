//! Feature types and the registry the tree builder resolves them from.
//!
//! A feature type pairs a signal-side factory with an optional data-side
//! factory, declares the positional parameters a specification step may
//! pass, and carries the default [`NodeOptions`] of its nodes.

use crate::core::NodeValue;
use crate::core::error::{FeatureError, SpecificationError};
use crate::core::frames::FeatureContext;
use crate::core::node::{DataLogic, NodeOptions, NodeOverrides, SignalLogic};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type SignalFactory =
    Arc<dyn Fn(&FeatureArgs, &FeatureContext) -> Result<Box<dyn SignalLogic>, FeatureError> + Send + Sync>;
type DataFactory =
    Arc<dyn Fn(&FeatureArgs, &FeatureContext) -> Result<Box<dyn DataLogic>, FeatureError> + Send + Sync>;

/// The JSON shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Any,
    Bool,
    Integer,
    Float,
    String,
    List,
}

impl ParamKind {
    pub fn accepts(&self, value: &NodeValue) -> bool {
        match self {
            ParamKind::Any => true,
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::List => value.is_array(),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Any => "any",
            ParamKind::Bool => "bool",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::String => "string",
            ParamKind::List => "list",
        };
        f.write_str(name)
    }
}

/// One declared positional parameter of a feature type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Used when a step passes fewer arguments. `None` makes the parameter required.
    pub default: Option<NodeValue>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, default: NodeValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Some(default),
        }
    }
}

/// Arguments of one step, bound to their parameter names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureArgs {
    values: Vec<(String, NodeValue)>,
}

impl FeatureArgs {
    pub fn get(&self, name: &str) -> Option<&NodeValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Like [`get`](FeatureArgs::get), but a missing parameter is a feature error.
    pub fn require(&self, name: &str) -> Result<&NodeValue, FeatureError> {
        self.get(name)
            .ok_or_else(|| FeatureError::new(format!("missing argument '{}'", name)))
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(NodeValue::as_bool)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(NodeValue::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(NodeValue::as_f64)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(NodeValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }
}

/// A named feature: parameter list, node defaults, and the factories that
/// produce its signal-side and data-side callbacks.
#[derive(Clone)]
pub struct FeatureType {
    name: String,
    params: Vec<ParamSpec>,
    options: NodeOptions,
    signal: SignalFactory,
    data: Option<DataFactory>,
}

impl fmt::Debug for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureType")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("options", &self.options)
            .field("has_data_side", &self.data.is_some())
            .finish()
    }
}

impl FeatureType {
    pub fn new<F, L>(name: impl Into<String>, signal: F) -> Self
    where
        F: Fn(&FeatureArgs, &FeatureContext) -> Result<L, FeatureError> + Send + Sync + 'static,
        L: SignalLogic,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            options: NodeOptions::default(),
            signal: Arc::new(move |args: &FeatureArgs, context: &FeatureContext| {
                signal(args, context).map(|logic| Box::new(logic) as Box<dyn SignalLogic>)
            }),
            data: None,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_data<F, L>(mut self, data: F) -> Self
    where
        F: Fn(&FeatureArgs, &FeatureContext) -> Result<L, FeatureError> + Send + Sync + 'static,
        L: DataLogic,
    {
        self.data = Some(Arc::new(move |args: &FeatureArgs, context: &FeatureContext| {
            data(args, context).map(|logic| Box::new(logic) as Box<dyn DataLogic>)
        }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn default_options(&self) -> NodeOptions {
        self.options
    }

    /// The options of one node of this type after a step's overrides.
    pub fn options_for(&self, overrides: Option<&NodeOverrides>) -> NodeOptions {
        overrides.map_or(self.options, |overrides| self.options.apply(overrides))
    }

    pub fn has_data_side(&self) -> bool {
        self.data.is_some()
    }

    /// Binds positional `args` to the declared parameters.
    ///
    /// Missing trailing parameters take their defaults. Surplus arguments, a
    /// missing required parameter or a value of the wrong kind fail.
    pub fn bind(&self, args: &[NodeValue]) -> Result<FeatureArgs, SpecificationError> {
        if args.len() > self.params.len() {
            return Err(self.mismatch(format!(
                "expected at most {} arguments, got {}",
                self.params.len(),
                args.len()
            )));
        }

        let mut values = Vec::with_capacity(self.params.len());
        for (index, param) in self.params.iter().enumerate() {
            let value = match (args.get(index), &param.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(self.mismatch(format!("missing required argument '{}'", param.name)));
                }
            };
            if !param.kind.accepts(&value) {
                return Err(self.mismatch(format!(
                    "argument '{}' expects {}, got {}",
                    param.name, param.kind, value
                )));
            }
            values.push((param.name.clone(), value));
        }
        Ok(FeatureArgs { values })
    }

    pub fn instantiate_signal(
        &self,
        args: &FeatureArgs,
        context: &FeatureContext,
    ) -> Result<Box<dyn SignalLogic>, SpecificationError> {
        (self.signal)(args, context).map_err(|source| self.instantiation(source))
    }

    /// `Ok(None)` when the feature has no data-side behaviour.
    pub fn instantiate_data(
        &self,
        args: &FeatureArgs,
        context: &FeatureContext,
    ) -> Result<Option<Box<dyn DataLogic>>, SpecificationError> {
        let Some(data) = &self.data else {
            return Ok(None);
        };
        data(args, context)
            .map(Some)
            .map_err(|source| self.instantiation(source))
    }

    fn mismatch(&self, reason: String) -> SpecificationError {
        SpecificationError::ArgumentMismatch {
            feature: self.name.clone(),
            reason,
        }
    }

    fn instantiation(&self, source: FeatureError) -> SpecificationError {
        SpecificationError::Instantiation {
            feature: self.name.clone(),
            source,
        }
    }
}

/// Feature types by name. Passed explicitly to the tree builder; there is
/// no process-wide registry.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    types: HashMap<String, FeatureType>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `feature`, returning the type it replaced.
    pub fn register(&mut self, feature: FeatureType) -> Option<FeatureType> {
        let replaced = self.types.insert(feature.name.clone(), feature);
        if let Some(old) = &replaced {
            log::warn!("feature type '{}' was already registered and is being replaced", old.name);
        }
        replaced
    }

    pub fn with(mut self, feature: FeatureType) -> Self {
        self.register(feature);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FeatureType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
