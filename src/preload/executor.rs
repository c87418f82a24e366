use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::resolver::{PlanNode, PreloadPlan};
use super::{PreloadScope, effective_scope};
use crate::conn::ConnPool;
use crate::context::QueryContext;
use crate::dialect::Dialect;
use crate::error::SqlPreloadError;
use crate::record::{Record, Related};
use crate::schema::{AssociationKind, Schema};
use crate::statement::{ColumnRef, Condition, SelectStatement};
use crate::types::JoinKey;

/// Loads a [`PreloadPlan`] into already fetched root records.
///
/// Levels run in order; within a level nodes run in plan order. The first
/// failing node stops the pass: its slots and everything below stay in the
/// zero state, while nodes finished earlier keep their results.
pub struct PreloadExecutor<'a> {
    conn: &'a dyn ConnPool,
    dialect: &'a dyn Dialect,
    ctx: &'a QueryContext,
    unscoped: bool,
}

impl<'a> PreloadExecutor<'a> {
    #[must_use]
    pub fn new(conn: &'a dyn ConnPool, dialect: &'a dyn Dialect, ctx: &'a QueryContext) -> Self {
        Self {
            conn,
            dialect,
            ctx,
            unscoped: false,
        }
    }

    /// Skip soft-delete scopes on every association.
    #[must_use]
    pub fn unscoped(mut self, unscoped: bool) -> Self {
        self.unscoped = unscoped;
        self
    }

    /// Run the plan against `records`.
    ///
    /// # Errors
    /// The first failure, wrapped as [`SqlPreloadError::Preload`].
    #[tracing::instrument(skip_all, fields(roots = records.len(), depth = plan.depth()))]
    pub async fn run(&self, plan: &PreloadPlan, records: &mut [Record]) -> Result<(), SqlPreloadError> {
        if plan.is_empty() || records.is_empty() {
            return Ok(());
        }

        let mut level: Vec<(Vec<&str>, &PlanNode)> =
            plan.roots.iter().map(|node| (Vec::new(), node)).collect();
        let mut depth = 0usize;

        while !level.is_empty() {
            let mut next = Vec::new();
            for (chain, node) in level {
                self.ctx
                    .check()
                    .map_err(|e| e.in_preload(&node.path, None))?;

                let mut parents = Vec::new();
                collect_parents(records, &chain, &mut parents);
                self.load_node(node, &mut parents).await?;

                for child in &node.children {
                    let mut child_chain = chain.clone();
                    child_chain.push(node.name());
                    next.push((child_chain, child));
                }
            }
            depth += 1;
            tracing::debug!(depth, "preload level finished");
            level = next;
        }
        tracing::info!(associations = plan.paths().len(), "preload finished");
        Ok(())
    }

    async fn load_node(
        &self,
        node: &PlanNode,
        parents: &mut [&mut Record],
    ) -> Result<(), SqlPreloadError> {
        if parents.is_empty() {
            return Ok(());
        }
        let name = node.name();
        let owner_key = node.association.owner_key(&node.owner);
        let keys = distinct_keys(parents.iter().map(|p| p.key(owner_key)));

        if keys.is_empty() {
            for parent in parents.iter_mut() {
                parent.set_related(name, Related::zero(node.association.kind));
            }
            return Ok(());
        }

        let scope = effective_scope(&node.conditions, self.unscoped);
        let grouped = match node.association.kind {
            AssociationKind::ManyToMany => self.load_through(node, &scope, &keys).await?,
            _ => self.load_direct(node, &scope, &keys).await?,
        };

        let kind = node.association.kind;
        for parent in parents.iter_mut() {
            let matched = parent
                .key(owner_key)
                .and_then(|key| grouped.get(&key))
                .map_or(&[][..], Vec::as_slice);
            let related = if kind.is_collection() {
                Related::Many(matched.to_vec())
            } else {
                Related::One(matched.first().cloned().map(Box::new))
            };
            parent.set_related(name, related);
        }

        tracing::debug!(
            path = %node.path,
            keys = keys.len(),
            matched = grouped.len(),
            "association preloaded"
        );
        Ok(())
    }

    /// has-one, has-many, belongs-to: one query on the target table.
    async fn load_direct(
        &self,
        node: &PlanNode,
        scope: &PreloadScope,
        keys: &[JoinKey],
    ) -> Result<HashMap<JoinKey, Vec<Record>>, SqlPreloadError> {
        let target_key = node.association.target_key(&node.target);
        let rows = self.select_targets(node, scope, target_key, keys).await?;

        let mut grouped: HashMap<JoinKey, Vec<Record>> = HashMap::new();
        for record in rows {
            if let Some(key) = record.key(target_key) {
                grouped.entry(key).or_default().push(record);
            }
        }
        Ok(grouped)
    }

    /// many-to-many: join table first, then the targets it points at.
    async fn load_through(
        &self,
        node: &PlanNode,
        scope: &PreloadScope,
        keys: &[JoinKey],
    ) -> Result<HashMap<JoinKey, Vec<Record>>, SqlPreloadError> {
        let join = node.association.join.as_ref().ok_or_else(|| {
            SqlPreloadError::ConfigError(format!(
                "many-to-many `{}` has no join table",
                node.path
            ))
            .in_preload(&node.path, None)
        })?;

        let (sql, params) = SelectStatement::new(&join.table)
            .filter(Condition::is_in(
                ColumnRef::qualified(&join.table, &join.owner_column),
                keys.iter().map(JoinKey::to_value).collect(),
            ))
            .build(self.dialect);
        let links = self
            .conn
            .query(self.ctx, &sql, &params)
            .await
            .map_err(|e| e.in_preload(&node.path, Some(&sql)))?;

        let mut pairs = Vec::with_capacity(links.len());
        for row in &links.results {
            let owner = row.get(&join.owner_column).and_then(|v| v.join_key());
            let target = row.get(&join.target_column).and_then(|v| v.join_key());
            if let (Some(owner), Some(target)) = (owner, target) {
                pairs.push((owner, target));
            }
        }

        let target_keys = distinct_keys(pairs.iter().map(|(_, t)| Some(t.clone())));
        if target_keys.is_empty() {
            return Ok(HashMap::new());
        }

        let target_key = node.association.target_key(&node.target);
        let targets: HashMap<JoinKey, Record> = self
            .select_targets(node, scope, target_key, &target_keys)
            .await?
            .into_iter()
            .filter_map(|r| r.key(target_key).map(|k| (k, r)))
            .collect();

        let mut grouped: HashMap<JoinKey, Vec<Record>> = HashMap::new();
        for (owner, target) in pairs {
            if let Some(record) = targets.get(&target) {
                grouped.entry(owner).or_default().push(record.clone());
            }
        }
        Ok(grouped)
    }

    async fn select_targets(
        &self,
        node: &PlanNode,
        scope: &PreloadScope,
        key_column: &str,
        keys: &[JoinKey],
    ) -> Result<Vec<Record>, SqlPreloadError> {
        let target: &Arc<Schema> = &node.target;
        let qualifier = scope.alias.as_deref().unwrap_or(&target.table).to_owned();

        let mut stmt = SelectStatement::new(&target.table)
            .alias(scope.alias.as_deref())
            .columns(scope.select.as_deref())
            .filter(Condition::is_in(
                ColumnRef::qualified(&qualifier, key_column),
                keys.iter().map(JoinKey::to_value).collect(),
            ));
        if let Some(poly) = &node.association.polymorphic {
            stmt = stmt.filter(Condition::Eq {
                column: ColumnRef::qualified(&qualifier, &poly.type_column),
                value: poly.type_value.clone().into(),
            });
        }
        stmt = stmt.filters(scope.conditions.iter().cloned());
        if !scope.unscoped {
            stmt = stmt.soft_delete(target.soft_delete.as_deref());
        }
        for term in &scope.order {
            stmt = stmt.order(term);
        }

        let (sql, params) = stmt.build(self.dialect);
        let rows = self
            .conn
            .query(self.ctx, &sql, &params)
            .await
            .map_err(|e| e.in_preload(&node.path, Some(&sql)))?;
        Ok(rows
            .results
            .iter()
            .map(|row| Record::from_row(Arc::clone(target), row))
            .collect())
    }
}

/// Records reached from `records` by following `chain` through association slots.
fn collect_parents<'r>(records: &'r mut [Record], chain: &[&str], out: &mut Vec<&'r mut Record>) {
    let Some((head, rest)) = chain.split_first() else {
        out.extend(records.iter_mut());
        return;
    };
    for record in records.iter_mut() {
        if let Some(related) = record.related_mut(head) {
            collect_parents(related.records_mut(), rest, out);
        }
    }
}

/// Non-null keys, first occurrence order.
fn distinct_keys(keys: impl Iterator<Item = Option<JoinKey>>) -> Vec<JoinKey> {
    let mut seen = HashSet::new();
    keys.flatten().filter(|k| seen.insert(k.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use crate::types::RowValues;

    fn record(id: i64) -> Record {
        let schema = Arc::new(SchemaBuilder::new("Node", "nodes").build());
        let mut r = Record::new(schema);
        r.set("id", RowValues::Int(id));
        r
    }

    #[test]
    fn distinct_keys_skip_nulls_and_duplicates() {
        let keys = distinct_keys(
            vec![
                Some(JoinKey::Int(2)),
                None,
                Some(JoinKey::Int(1)),
                Some(JoinKey::Int(2)),
            ]
            .into_iter(),
        );
        assert_eq!(keys, vec![JoinKey::Int(2), JoinKey::Int(1)]);
    }

    #[test]
    fn parents_are_collected_through_one_and_many_slots() {
        let mut child = record(10);
        child.set_related("leaf", Related::One(Some(Box::new(record(100)))));
        let mut root = record(1);
        root.set_related("children", Related::Many(vec![child, record(11)]));
        let mut roots = vec![root, record(2)];

        let mut out = Vec::new();
        collect_parents(&mut roots, &["children"], &mut out);
        assert_eq!(out.len(), 2);

        let mut out = Vec::new();
        collect_parents(&mut roots, &["children", "leaf"], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("id"), Some(&RowValues::Int(100)));
    }
}
