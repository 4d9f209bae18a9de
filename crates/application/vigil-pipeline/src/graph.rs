//! Build order for the projects of a solution.

use std::collections::HashSet;

use thiserror::Error;
use vigil_core::{Project, Solution};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("project {0:?} is declared more than once")]
    Duplicate(String),
    #[error("dependency cycle between {0:?}")]
    Cycle(Vec<String>),
}

/// Orders projects so that every project follows the projects it references.
///
/// Repeatedly takes the first remaining project, in input order, none of
/// whose references is still remaining. References to projects outside the
/// solution are ignored.
pub fn build_order(solution: &Solution) -> Result<Vec<&Project>, GraphError> {
    let mut seen = HashSet::new();
    for project in &solution.projects {
        if !seen.insert(project.name.as_str()) {
            return Err(GraphError::Duplicate(project.name.clone()));
        }
    }

    let mut remaining: Vec<&Project> = solution.projects.iter().collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let pending: HashSet<&str> = remaining.iter().map(|p| p.name.as_str()).collect();
        let ready = remaining.iter().position(|p| {
            p.references
                .iter()
                .all(|r| r == &p.name || !pending.contains(r.as_str()))
        });
        let Some(ix) = ready else {
            return Err(GraphError::Cycle(
                remaining.iter().map(|p| p.name.clone()).collect(),
            ));
        };
        ordered.push(remaining.remove(ix));
    }

    Ok(ordered)
}
