//! Dependency graph construction.
//!
//! Runs once per route at registration. Validates the declarations, pulls in
//! shared dependencies referenced by name, and orders the descriptors into
//! topological waves: every member of a wave has all of its inputs available
//! once the previous waves are done.

use std::collections::HashMap;
use std::sync::Arc;

use super::core::{CyclicDependencyError, Dependency, DependencyGraphError};

/// Where a provider input comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Value of another node in the plan (index into [`ResolutionPlan::nodes`])
    Dependency(usize),
    /// Converted path or query parameter
    Param(Arc<str>),
}

/// Validated, wave-ordered dependency graph for one route.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    nodes: Vec<Dependency>,
    inputs: Vec<Vec<(Arc<str>, Input)>>,
    waves: Vec<Vec<usize>>,
}

impl ResolutionPlan {
    /// Plan with no dependencies
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build and validate a plan.
    ///
    /// * `declared` - the route's own descriptors, in declaration order
    /// * `shared` - application-wide descriptors, pulled in when referenced
    /// * `params` - names of the route's path and query parameters
    ///
    /// A route-level descriptor takes precedence over a shared one with the
    /// same name. A referenced name that is both a route parameter and a
    /// shared descriptor is rejected as [`DependencyGraphError::ShadowsParameter`].
    ///
    /// # Errors
    ///
    /// [`DependencyGraphError`] for duplicate names, names shadowing
    /// parameters, unknown inputs and cycles.
    pub fn build(
        declared: &[Dependency],
        shared: &[Dependency],
        params: &[Arc<str>],
    ) -> Result<Self, DependencyGraphError> {
        let is_param = |name: &str| params.iter().any(|p| p.as_ref() == name);

        let mut nodes: Vec<Dependency> = Vec::with_capacity(declared.len());
        let mut index: HashMap<Arc<str>, usize> = HashMap::new();

        for dep in declared {
            if index.contains_key(dep.name()) {
                return Err(DependencyGraphError::Duplicate {
                    name: dep.name().to_string(),
                });
            }
            if is_param(dep.name()) {
                return Err(DependencyGraphError::ShadowsParameter {
                    name: dep.name().to_string(),
                });
            }
            index.insert(Arc::clone(dep.name()), nodes.len());
            nodes.push(dep.clone());
        }

        // Pull in shared descriptors transitively; `nodes` grows while we scan
        let mut cursor = 0;
        while cursor < nodes.len() {
            let wanted: Vec<Arc<str>> = nodes[cursor].input_names().to_vec();
            for input in wanted {
                if index.contains_key(&input) {
                    continue;
                }
                let provided = shared.iter().find(|d| d.name() == &input);
                if is_param(&input) {
                    // Ambiguous: the name is both a parameter and a shared provider
                    if provided.is_some() {
                        return Err(DependencyGraphError::ShadowsParameter {
                            name: input.to_string(),
                        });
                    }
                    continue;
                }
                let Some(dep) = provided else {
                    return Err(DependencyGraphError::UnknownInput {
                        dependency: nodes[cursor].name().to_string(),
                        input: input.to_string(),
                    });
                };
                index.insert(Arc::clone(dep.name()), nodes.len());
                nodes.push(dep.clone());
            }
            cursor += 1;
        }

        let inputs: Vec<Vec<(Arc<str>, Input)>> = nodes
            .iter()
            .map(|dep| {
                dep.input_names()
                    .iter()
                    .map(|name| {
                        let source = match index.get(name) {
                            Some(&i) => Input::Dependency(i),
                            None => Input::Param(Arc::clone(name)),
                        };
                        (Arc::clone(name), source)
                    })
                    .collect()
            })
            .collect();

        let waves = topological_waves(&nodes, &inputs)?;

        Ok(Self {
            nodes,
            inputs,
            waves,
        })
    }

    /// Descriptors in the plan; declared ones first, then pulled-in shared ones
    #[must_use]
    pub fn nodes(&self) -> &[Dependency] {
        &self.nodes
    }

    /// Inputs of node `idx` with their sources
    #[must_use]
    pub fn inputs(&self, idx: usize) -> &[(Arc<str>, Input)] {
        self.inputs.get(idx).map(Vec::as_slice).unwrap_or_default()
    }

    /// Waves of node indices, each in declaration order
    #[must_use]
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Waves as descriptor names, for logging and tests
    #[must_use]
    pub fn wave_names(&self) -> Vec<Vec<&str>> {
        self.waves
            .iter()
            .map(|w| w.iter().map(|&i| self.nodes[i].name().as_ref()).collect())
            .collect()
    }

    /// Number of descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when the route has no dependencies
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Kahn's algorithm, one wave per round.
fn topological_waves(
    nodes: &[Dependency],
    inputs: &[Vec<(Arc<str>, Input)>],
) -> Result<Vec<Vec<usize>>, CyclicDependencyError> {
    let n = nodes.len();
    let mut pending = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (idx, node_inputs) in inputs.iter().enumerate() {
        let mut seen: Vec<usize> = Vec::new();
        for (_, input) in node_inputs {
            if let Input::Dependency(dep) = input {
                if !seen.contains(dep) {
                    seen.push(*dep);
                    pending[idx] += 1;
                    dependents[*dep].push(idx);
                }
            }
        }
    }

    let mut waves = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &done in &current {
            for &dependent in &dependents[done] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        waves.push(current);
        current = next;
    }

    if placed < n {
        return Err(find_cycle(nodes, inputs, &pending));
    }
    Ok(waves)
}

/// Depth-first search over the nodes Kahn could not place.
fn find_cycle(
    nodes: &[Dependency],
    inputs: &[Vec<(Arc<str>, Input)>],
    pending: &[usize],
) -> CyclicDependencyError {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    fn visit(
        idx: usize,
        inputs: &[Vec<(Arc<str>, Input)>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[idx] = Mark::OnPath;
        path.push(idx);
        for (_, input) in &inputs[idx] {
            let Input::Dependency(next) = input else {
                continue;
            };
            match marks[*next] {
                Mark::OnPath => {
                    let start = path.iter().position(|&p| p == *next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(*next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(*next, inputs, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[idx] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path = Vec::new();
    for start in (0..nodes.len()).filter(|&i| pending[i] > 0) {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        if let Some(cycle) = visit(start, inputs, &mut marks, &mut path) {
            return CyclicDependencyError {
                cycle: cycle.iter().map(|&i| nodes[i].name().to_string()).collect(),
            };
        }
    }

    // Unplaced nodes always contain a cycle; fall back to listing them
    CyclicDependencyError {
        cycle: (0..nodes.len())
            .filter(|&i| pending[i] > 0)
            .map(|i| nodes[i].name().to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dep(name: &str, inputs: &[&str]) -> Dependency {
        Dependency::blocking(name.to_string(), |_| Ok(json!(null)))
            .inputs(inputs.iter().map(|s| s.to_string()))
    }

    fn params(names: &[&str]) -> Vec<Arc<str>> {
        names.iter().map(|n| Arc::from(*n)).collect()
    }

    #[test]
    fn test_independent_nodes_share_first_wave() {
        let plan = ResolutionPlan::build(
            &[dep("a", &[]), dep("b", &[]), dep("c", &["a", "b"])],
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(plan.wave_names(), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_shared_name_clashing_with_param_is_rejected() {
        let shared = [dep("tenant", &[])];
        let err = ResolutionPlan::build(&[dep("scope", &["tenant"])], &shared, &params(&["tenant"]))
            .unwrap_err();
        assert!(matches!(err, DependencyGraphError::ShadowsParameter { ref name } if name == "tenant"));

        // Not referenced, so no ambiguity
        let plan = ResolutionPlan::build(&[dep("scope", &[])], &shared, &params(&["tenant"])).unwrap();
        assert_eq!(plan.wave_names(), vec![vec!["scope"]]);
    }

    #[test]
    fn test_diamond() {
        let plan = ResolutionPlan::build(
            &[
                dep("top", &["left", "right"]),
                dep("left", &["base"]),
                dep("right", &["base"]),
                dep("base", &[]),
            ],
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(
            plan.wave_names(),
            vec![vec!["base"], vec!["left", "right"], vec!["top"]]
        );
    }

    #[test]
    fn test_params_are_inputs_not_edges() {
        let plan =
            ResolutionPlan::build(&[dep("user", &["id"])], &[], &params(&["id"])).unwrap();
        assert_eq!(plan.waves().len(), 1);
        assert_eq!(plan.inputs(0)[0].1, Input::Param(Arc::from("id")));
    }

    #[test]
    fn test_shared_pulled_in_transitively() {
        let shared = [dep("config", &[]), dep("db", &["config"]), dep("unused", &[])];
        let plan = ResolutionPlan::build(&[dep("repo", &["db"])], &shared, &[]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.wave_names(), vec![vec!["config"], vec!["db"], vec!["repo"]]);
    }

    #[test]
    fn test_declared_overrides_shared() {
        let shared = [dep("db", &["missing"])];
        let plan = ResolutionPlan::build(&[dep("db", &[]), dep("repo", &["db"])], &shared, &[])
            .unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = ResolutionPlan::build(
            &[dep("ok", &[]), dep("a", &["b"]), dep("b", &["c"]), dep("c", &["a"])],
            &[],
            &[],
        )
        .unwrap_err();
        match err {
            DependencyGraphError::Cyclic(c) => assert_eq!(c.cycle, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let err = ResolutionPlan::build(&[dep("a", &["a"])], &[], &[]).unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: a -> a");
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            ResolutionPlan::build(&[dep("a", &[]), dep("a", &[])], &[], &[]),
            Err(DependencyGraphError::Duplicate { .. })
        ));
        assert!(matches!(
            ResolutionPlan::build(&[dep("id", &[])], &[], &params(&["id"])),
            Err(DependencyGraphError::ShadowsParameter { .. })
        ));
        assert!(matches!(
            ResolutionPlan::build(&[dep("a", &["ghost"])], &[], &[]),
            Err(DependencyGraphError::UnknownInput { ref input, .. }) if input == "ghost"
        ));
    }
}
