use crate::core::error::SpecificationError;
use crate::core::frames::FeatureContext;
use crate::core::node::{DataNode, SignalNode};
use crate::core::registry::FeatureRegistry;
use crate::core::spec::{FeatureSpec, StepEntry};
use crate::core::tree::{FeatureTree, NodeId};
use crate::core::validation::validate;

/// Nodes created for one step, before linking.
struct Placed {
    signal: NodeId,
    data: Option<NodeId>,
    gate: bool,
}

/// Turns a [`FeatureSpec`] into a signal tree and an isomorphic data tree.
///
/// Steps of a stage form a sibling chain. The next stage hangs off the
/// stage's response-needing step as its child, or follows the stage's last
/// step as a sibling when nothing in the stage needs a response. Entries
/// after the first response-needing step at the top of a stage are dropped.
///
/// A group is laid out in place, depth first. A response-needing step inside
/// it takes the rest of the group, the rest of the stage and the following
/// stages as its child.
pub struct TreeBuilder<'r> {
    registry: &'r FeatureRegistry,
    context: FeatureContext,
}

impl<'r> TreeBuilder<'r> {
    pub fn new(registry: &'r FeatureRegistry) -> Self {
        Self {
            registry,
            context: FeatureContext::default(),
        }
    }

    /// The context every feature factory receives.
    pub fn with_context(mut self, context: FeatureContext) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &FeatureContext {
        &self.context
    }

    pub fn build(
        &self,
        spec: &FeatureSpec,
    ) -> Result<(FeatureTree<SignalNode>, FeatureTree<DataNode>), SpecificationError> {
        let report = validate(spec, self.registry);
        report.log_summary();
        report.into_result()?;

        let mut signal_tree = FeatureTree::new();
        let mut data_tree = FeatureTree::new();
        let mut stages: Vec<Vec<Placed>> = Vec::with_capacity(spec.stages.len());
        for (stage, entries) in spec.stages.iter().enumerate() {
            let mut placed = Vec::with_capacity(entries.len());
            self.place(entries, stage, true, &mut placed, &mut signal_tree, &mut data_tree)?;
            stages.push(placed);
        }

        let mut signal_next: Option<NodeId> = None;
        let mut data_next: Option<NodeId> = None;
        for placed in stages.iter().rev().flat_map(|stage| stage.iter().rev()) {
            link(&mut signal_tree, placed.signal, placed.gate, signal_next);
            signal_next = Some(placed.signal);
            if let Some(data) = placed.data {
                link(&mut data_tree, data, placed.gate, data_next);
                data_next = Some(data);
            }
        }
        signal_tree.set_root(signal_next);
        data_tree.set_root(data_next);

        log::debug!(
            "built signal tree of {} nodes and data tree of {} nodes",
            signal_tree.len(),
            data_tree.len()
        );
        Ok((signal_tree, data_tree))
    }

    /// Instantiates both sides of every step in `entries`, depth first.
    fn place(
        &self,
        entries: &[StepEntry],
        stage: usize,
        top_level: bool,
        placed: &mut Vec<Placed>,
        signal_tree: &mut FeatureTree<SignalNode>,
        data_tree: &mut FeatureTree<DataNode>,
    ) -> Result<(), SpecificationError> {
        for entry in entries {
            let descriptor = match entry {
                StepEntry::Group(group) => {
                    self.place(group, stage, false, placed, signal_tree, data_tree)?;
                    continue;
                }
                StepEntry::Step(descriptor) => descriptor,
            };
            let Some(feature) = self.registry.get(&descriptor.name) else {
                return Err(SpecificationError::UnknownFeature {
                    name: descriptor.name.clone(),
                    stage,
                    step: placed.len(),
                });
            };
            let args = feature.bind(&descriptor.args)?;
            let options = feature.options_for(descriptor.node_overrides.as_ref());

            let logic = feature.instantiate_signal(&args, &self.context)?;
            let signal = signal_tree.insert(SignalNode::from_boxed(&descriptor.name, options, logic));
            let data = feature
                .instantiate_data(&args, &self.context)?
                .map(|logic| data_tree.insert(DataNode::from_boxed(&descriptor.name, options, logic)));

            placed.push(Placed {
                signal,
                data,
                gate: options.needs_response,
            });
            if top_level && options.needs_response {
                break;
            }
        }
        Ok(())
    }
}

/// A response-needing node unlocks what follows as its child; any other
/// node is followed by it as a sibling.
fn link<N>(tree: &mut FeatureTree<N>, id: NodeId, gate: bool, next: Option<NodeId>) {
    if gate {
        tree.set_child(id, next);
    } else {
        tree.set_sibling(id, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeValue;
    use crate::core::error::FeatureError;
    use crate::core::node::{DataLogic, NodeOptions, NodeOverrides, SignalLogic};
    use crate::core::registry::{FeatureType, ParamKind, ParamSpec};
    use crate::core::spec::{StepDescriptor, StepEntry};

    struct Noop;
    impl SignalLogic for Noop {
        fn main(&mut self) -> Result<NodeValue, FeatureError> {
            Ok(NodeValue::Null)
        }
    }
    impl DataLogic for Noop {
        fn main(&mut self) -> Result<NodeValue, FeatureError> {
            Ok(NodeValue::Null)
        }
    }

    fn registry() -> FeatureRegistry {
        let plain = |name: &str| {
            FeatureType::new(name, |_, _| Ok(Noop)).with_data(|_, _| Ok(Noop))
        };
        FeatureRegistry::new()
            .with(plain("A").options(NodeOptions::default().needs_response()))
            .with(plain("B"))
            .with(plain("C").options(NodeOptions::default().device_related()))
            .with(plain("D"))
            .with(FeatureType::new("wait", |_, _| Ok(Noop)).param(ParamSpec::required("ms", ParamKind::Integer)))
    }

    fn names<N>(tree: &FeatureTree<N>, name: impl Fn(&N) -> &str) -> Vec<String> {
        tree.preorder().into_iter().map(|id| name(&tree[id]).to_string()).collect()
    }

    #[test]
    fn test_response_stage_hangs_next_stage_as_child() {
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("A")])
            .stage(vec![StepDescriptor::new("B"), StepDescriptor::new("C")])
            .stage(vec![StepDescriptor::new("D")]);
        let registry = registry();
        let (signal, data) = TreeBuilder::new(&registry).build(&spec).unwrap();

        let a = signal.root().unwrap();
        assert_eq!(signal[a].name(), "A");
        assert_eq!(signal.sibling(a), None);
        let b = signal.child(a).unwrap();
        let c = signal.sibling(b).unwrap();
        let d = signal.sibling(c).unwrap();
        assert_eq!((signal[b].name(), signal[c].name(), signal[d].name()), ("B", "C", "D"));
        assert!(signal[c].options().device_related);
        assert_eq!(signal.depth_counts(), vec![1, 3]);

        assert!(signal.same_shape(&data, |s, d| s.name() == d.name()));
        assert_eq!(names(&data, DataNode::name), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_signal_only_steps_are_skipped_in_data_tree() {
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("B"), StepDescriptor::new("wait").arg(5)])
            .stage(vec![StepDescriptor::new("A")])
            .stage(vec![StepDescriptor::new("wait").arg(1), StepDescriptor::new("D")]);
        let registry = registry();
        let (signal, data) = TreeBuilder::new(&registry).build(&spec).unwrap();

        assert_eq!(signal.len(), 5);
        assert_eq!(names(&signal, SignalNode::name), vec!["B", "wait", "A", "wait", "D"]);
        assert_eq!(data.len(), 3);
        assert_eq!(names(&data, DataNode::name), vec!["B", "A", "D"]);
        let b = data.root().unwrap();
        let a = data.sibling(b).unwrap();
        assert_eq!(data.child(a).map(|d| data[d].name()), Some("D"));
    }

    #[test]
    fn test_steps_after_response_gate_are_dropped() {
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("A"), StepDescriptor::new("B")])
            .stage(vec![StepDescriptor::new("D")]);
        let registry = registry();
        let (signal, _) = TreeBuilder::new(&registry).build(&spec).unwrap();
        assert_eq!(names(&signal, SignalNode::name), vec!["A", "D"]);
    }

    #[test]
    fn test_overrides_change_linkage() {
        let no_response = NodeOverrides {
            needs_response: Some(false),
            ..NodeOverrides::default()
        };
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("A").overrides(no_response)])
            .stage(vec![StepDescriptor::new("B")]);
        let registry = registry();
        let (signal, _) = TreeBuilder::new(&registry).build(&spec).unwrap();
        let a = signal.root().unwrap();
        assert!(!signal[a].options().needs_response);
        assert_eq!(signal.child(a), None);
        assert!(signal.sibling(a).is_some());
    }

    #[test]
    fn test_build_fails_before_instantiating_anything() {
        let spec = FeatureSpec::new()
            .stage(vec![StepDescriptor::new("B")])
            .stage(vec![StepDescriptor::new("missing")]);
        let registry = registry();
        let err = TreeBuilder::new(&registry).build(&spec).unwrap_err();
        assert!(matches!(err, SpecificationError::UnknownFeature { stage: 1, step: 0, .. }));

        let bad_args = FeatureSpec::new().stage(vec![StepDescriptor::new("wait")]);
        assert!(matches!(
            TreeBuilder::new(&registry).build(&bad_args),
            Err(SpecificationError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn test_gate_inside_group_keeps_rest_of_stage() {
        let spec = FeatureSpec::new()
            .stage(vec![
                StepEntry::from(StepDescriptor::new("B")),
                StepEntry::group([StepDescriptor::new("A"), StepDescriptor::new("C")]),
                StepEntry::from(StepDescriptor::new("D")),
            ])
            .stage(vec![StepDescriptor::new("B")]);
        let registry = registry();
        let (signal, data) = TreeBuilder::new(&registry).build(&spec).unwrap();

        assert_eq!(names(&signal, SignalNode::name), vec!["B", "A", "C", "D", "B"]);
        let b = signal.root().unwrap();
        let a = signal.sibling(b).unwrap();
        assert_eq!(signal.sibling(a), None);
        let c = signal.child(a).unwrap();
        let d = signal.sibling(c).unwrap();
        assert_eq!((signal[c].name(), signal[d].name()), ("C", "D"));
        assert_eq!(signal.sibling(d).map(|last| signal[last].name()), Some("B"));
        assert_eq!(signal.depth_counts(), vec![2, 3]);
        assert!(signal.same_shape(&data, |s, d| s.name() == d.name()));
    }

    #[test]
    fn test_groups_without_gates_lay_out_in_place() {
        let nested = FeatureSpec::new().stage(vec![
            StepEntry::group([StepEntry::from(StepDescriptor::new("B")), StepEntry::group([StepDescriptor::new("C")])]),
            StepEntry::from(StepDescriptor::new("D")),
        ]);
        let flat = FeatureSpec::new().stage(vec![
            StepDescriptor::new("B"),
            StepDescriptor::new("C"),
            StepDescriptor::new("D"),
        ]);
        let registry = registry();
        let builder = TreeBuilder::new(&registry);
        let (nested_signal, _) = builder.build(&nested).unwrap();
        let (flat_signal, _) = builder.build(&flat).unwrap();
        assert!(nested_signal.same_shape(&flat_signal, |x, y| x.name() == y.name()));
    }

    #[test]
    fn test_group_after_top_level_gate_is_dropped() {
        let spec = FeatureSpec::new().stage(vec![
            StepEntry::from(StepDescriptor::new("A")),
            StepEntry::group([StepDescriptor::new("B")]),
        ]);
        let registry = registry();
        let (signal, _) = TreeBuilder::new(&registry).build(&spec).unwrap();
        assert_eq!(names(&signal, SignalNode::name), vec!["A"]);
    }
}
