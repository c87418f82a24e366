use std::sync::Arc;

use super::{ASSOCIATIONS, PreloadCondition, PreloadDirective};
use crate::error::SqlPreloadError;
use crate::schema::{Association, Registry, Schema};

/// One association to load, with everything below it.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub association: Association,
    pub owner: Arc<Schema>,
    pub target: Arc<Schema>,
    /// Dotted path from the root model, e.g. `Pets.Toy`.
    pub path: String,
    pub conditions: Vec<PreloadCondition>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.association.name
    }
}

/// Resolved preload tree. Roots are associations of the queried model.
#[derive(Debug, Clone, Default)]
pub struct PreloadPlan {
    pub roots: Vec<PlanNode>,
}

impl PreloadPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every node path, parents before children, siblings in insertion order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        fn walk(nodes: &[PlanNode], out: &mut Vec<String>) {
            for node in nodes {
                out.push(node.path.clone());
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        fn depth_of(nodes: &[PlanNode]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + depth_of(&n.children))
                .max()
                .unwrap_or(0)
        }
        depth_of(&self.roots)
    }
}

/// Build the plan for `root` from `directives`.
///
/// # Errors
/// `UnknownAssociation` for any name the schema at that depth does not declare.
pub fn resolve(
    registry: &Registry,
    root: &Arc<Schema>,
    directives: &[PreloadDirective],
) -> Result<PreloadPlan, SqlPreloadError> {
    let mut plan = PreloadPlan::default();
    for directive in directives {
        let segments: Vec<&str> = directive
            .path
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            continue;
        }
        insert(
            registry,
            &mut plan.roots,
            root,
            "",
            &segments,
            &directive.conditions,
        )?;
    }
    Ok(plan)
}

fn insert(
    registry: &Registry,
    nodes: &mut Vec<PlanNode>,
    owner: &Arc<Schema>,
    parent_path: &str,
    segments: &[&str],
    conditions: &[PreloadCondition],
) -> Result<(), SqlPreloadError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    let names: Vec<String> = if *head == ASSOCIATIONS {
        owner.associations.iter().map(|a| a.name.clone()).collect()
    } else {
        vec![(*head).to_owned()]
    };

    for name in names {
        let idx = match nodes.iter().position(|n| n.association.name == name) {
            Some(idx) => idx,
            None => {
                let association =
                    owner
                        .association(&name)
                        .ok_or_else(|| SqlPreloadError::UnknownAssociation {
                            model: owner.name.clone(),
                            name: name.clone(),
                        })?;
                let target = registry.resolve(&association.target);
                let path = if parent_path.is_empty() {
                    name.clone()
                } else {
                    format!("{parent_path}.{name}")
                };
                nodes.push(PlanNode {
                    association: association.clone(),
                    owner: Arc::clone(owner),
                    target,
                    path,
                    conditions: Vec::new(),
                    children: Vec::new(),
                });
                nodes.len() - 1
            }
        };

        let node = &mut nodes[idx];
        if rest.is_empty() {
            node.conditions = conditions.to_vec();
        } else {
            let target = Arc::clone(&node.target);
            let path = node.path.clone();
            insert(registry, &mut node.children, &target, &path, rest, conditions)?;
        }
    }
    Ok(())
}
