//! TG-013: Plan generation — execution levels for a pipeline generator.

use super::error::GraphError;
use super::graph::DependencyGraph;
use super::types::{ExecutionPlan, PlannedModule};
use std::collections::BTreeSet;
use tracing::debug;

/// Plan the whole graph, or only `scope` when given.
///
/// Each planned module lists its direct dependencies inside the planned set,
/// which is what a pipeline job needs for its ordering constraints.
pub fn plan(graph: &DependencyGraph, scope: Option<&BTreeSet<String>>) -> Result<ExecutionPlan, GraphError> {
    let scoped;
    let graph = match scope {
        Some(ids) => {
            scoped = graph.subgraph(ids);
            &scoped
        }
        None => graph,
    };

    let levels = graph.execution_levels()?;
    let modules = levels
        .iter()
        .enumerate()
        .flat_map(|(level, ids)| {
            ids.iter().map(move |id| PlannedModule {
                id: id.clone(),
                level,
                needs: graph.dependencies(id),
            })
        })
        .collect::<Vec<_>>();

    debug!(levels = levels.len(), modules = modules.len(), "planned");
    Ok(ExecutionPlan { levels, modules })
}

/// Human-readable plan, one level per block.
pub fn format_plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();
    for (i, level) in plan.levels.iter().enumerate() {
        out.push_str(&format!("Level {} ({} modules):\n", i, level.len()));
        for id in level {
            let needs = plan
                .modules
                .iter()
                .find(|m| &m.id == id)
                .map(|m| m.needs.as_slice())
                .unwrap_or_default();
            if needs.is_empty() {
                out.push_str(&format!("  {}\n", id));
            } else {
                out.push_str(&format!("  {}  <- {}\n", id, needs.join(", ")));
            }
        }
    }
    out.push_str(&format!(
        "\n{} modules in {} levels\n",
        plan.total_modules(),
        plan.levels.len()
    ));
    out
}
