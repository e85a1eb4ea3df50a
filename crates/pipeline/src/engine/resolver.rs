//! Dependency resolver
//!
//! Steps run strictly in the order they are supplied. The resolver only
//! answers two questions: is a step set well formed, and are a step's
//! dependencies already complete when its turn comes.

use std::collections::{HashMap, HashSet};

use stationflow_schemas::Step;

use crate::error::ValidationError;

/// Every dependency of `step` is in `completed`
pub fn can_run(step: &Step, completed: &HashSet<String>) -> bool {
    step.depends_on.iter().all(|dep| completed.contains(dep))
}

/// Dependencies of `step` that are not in `completed`, in id order
pub fn missing_dependencies(step: &Step, completed: &HashSet<String>) -> Vec<String> {
    step.depends_on
        .iter()
        .filter(|dep| !completed.contains(*dep))
        .cloned()
        .collect()
}

/// Check a step set before anything runs
///
/// Rejects duplicate ids, zero timeouts, dependencies on ids outside the set
/// and dependency cycles (a step depending on itself included).
pub fn validate(steps: &[Step]) -> Result<(), ValidationError> {
    let mut ids = HashSet::with_capacity(steps.len());
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStep(step.id.clone()));
        }
        if step.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout(step.id.clone()));
        }
    }

    for step in steps {
        if let Some(dep) = step.depends_on.iter().find(|dep| !ids.contains(dep.as_str())) {
            return Err(ValidationError::UnknownDependency {
                step_id: step.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    match find_cycle(steps) {
        Some(path) => Err(ValidationError::Cycle { path }),
        None => Ok(()),
    }
}

/// Find a dependency cycle, if any
///
/// Depth-first walk over `visiting`/`visited` marks. The returned path starts
/// and ends on the same step id. Dependencies outside the set are ignored.
pub fn find_cycle(steps: &[Step]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Visited,
    }

    let graph: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut marks: HashMap<&str, Mark> = steps
        .iter()
        .map(|s| (s.id.as_str(), Mark::Unvisited))
        .collect();
    let mut path: Vec<&str> = Vec::new();

    fn dfs<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a Step>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);

        if let Some(step) = graph.get(node) {
            for dep in &step.depends_on {
                match marks.get(dep.as_str()).copied() {
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|id| *id == dep.as_str()).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|id| id.to_string()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Unvisited) => {
                        if let Some(cycle) = dfs(dep.as_str(), graph, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Some(Mark::Visited) | None => {}
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Visited);
        None
    }

    for step in steps {
        if marks.get(step.id.as_str()) == Some(&Mark::Unvisited) {
            if let Some(cycle) = dfs(step.id.as_str(), &graph, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationflow_schemas::StepKind;

    fn step(id: &str, deps: &[&str]) -> Step {
        deps.iter().fold(Step::new(id, id.to_uppercase(), StepKind::Full), |s, d| {
            s.depends_on(*d)
        })
    }

    #[test]
    fn test_can_run() {
        let y = step("y", &["x"]);
        let mut completed = HashSet::new();
        assert!(!can_run(&y, &completed));
        assert_eq!(missing_dependencies(&y, &completed), vec!["x".to_string()]);

        completed.insert("x".to_string());
        assert!(can_run(&y, &completed));
        assert!(can_run(&step("z", &[]), &HashSet::new()));
    }

    #[test]
    fn test_validate_ok() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])];
        assert_eq!(validate(&steps), Ok(()));
        assert!(find_cycle(&steps).is_none());
    }

    #[test]
    fn test_validate_cycle() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        match validate(&steps) {
            Err(ValidationError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let steps = vec![step("a", &["a"])];
        assert_eq!(
            validate(&steps),
            Err(ValidationError::Cycle {
                path: vec!["a".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let steps = vec![step("a", &[]), step("b", &["ghost"])];
        assert_eq!(
            validate(&steps),
            Err(ValidationError::UnknownDependency {
                step_id: "b".into(),
                dependency: "ghost".into()
            })
        );
    }

    #[test]
    fn test_validate_duplicate_and_timeout() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert_eq!(validate(&steps), Err(ValidationError::DuplicateStep("a".into())));

        let steps = vec![step("a", &[]).with_timeout_ms(0)];
        assert_eq!(validate(&steps), Err(ValidationError::InvalidTimeout("a".into())));
    }

    #[test]
    fn test_out_of_order_is_still_valid() {
        // Order is checked at run time, not here
        let steps = vec![step("y", &["x"]), step("x", &[])];
        assert_eq!(validate(&steps), Ok(()));
    }
}
