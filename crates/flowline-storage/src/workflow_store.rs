// Workflow store: CRUD with tenant isolation and optimistic versioning
//
// In-memory implementation. A read with the wrong tenant returns
// not-found; the store never reveals whether the id exists elsewhere.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use flowline_core::validation::validate_workflow_structure;
use flowline_core::{
    Edge, EngineError, Node, Result, ValidationError, Workflow, WorkflowMeta, WorkflowStatus,
};

#[derive(Default)]
struct WorkflowStoreInner {
    workflows: HashMap<String, Workflow>,
    /// Cached validation errors for workflows currently invalid
    validation_errors: HashMap<String, Vec<ValidationError>>,
}

/// Workflow CRUD service. All read paths are tenant-scoped.
#[derive(Default)]
pub struct WorkflowStore {
    inner: RwLock<WorkflowStoreInner>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        WorkflowStore::default()
    }

    /// Create a new workflow.
    ///
    /// Runs structural validation and sets status to valid/invalid.
    /// Returns the workflow and validation errors, if any.
    pub async fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        owner_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> (Workflow, Option<Vec<ValidationError>>) {
        let now = Utc::now();
        let mut workflow = Workflow {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            status: WorkflowStatus::Draft,
            meta: WorkflowMeta {
                name: name.into(),
                description: description.into(),
                created_at: now,
                updated_at: now,
                owner_id: owner_id.into(),
                version: 1,
            },
            nodes,
            edges,
        };

        let result = validate_workflow_structure(&workflow);
        let errors = if result.valid {
            workflow.status = WorkflowStatus::Valid;
            None
        } else {
            workflow.status = WorkflowStatus::Invalid;
            Some(result.errors)
        };

        let mut inner = self.inner.write().await;
        if let Some(errors) = &errors {
            inner
                .validation_errors
                .insert(workflow.id.clone(), errors.clone());
        }
        inner.workflows.insert(workflow.id.clone(), workflow.clone());

        tracing::debug!(workflow_id = %workflow.id, status = ?workflow.status, "Workflow created");

        (workflow, errors)
    }

    /// Get a workflow by id. Wrong tenant reads as not found.
    pub async fn get(&self, workflow_id: &str, tenant_id: &str) -> Result<Workflow> {
        let inner = self.inner.read().await;
        inner
            .workflows
            .get(workflow_id)
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))
    }

    /// Cached validation errors for a workflow, if it is invalid
    pub async fn validation_errors(&self, workflow_id: &str) -> Option<Vec<ValidationError>> {
        let inner = self.inner.read().await;
        inner.validation_errors.get(workflow_id).cloned()
    }

    /// List workflows for a tenant, newest-updated first.
    ///
    /// Cursor is the id of the last element of the previous page; an
    /// unknown cursor is rejected.
    pub async fn list(
        &self,
        tenant_id: &str,
        status: Option<WorkflowStatus>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<Workflow>, Option<String>)> {
        let inner = self.inner.read().await;

        let mut workflows: Vec<Workflow> = inner
            .workflows
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .filter(|w| status.map(|s| w.status == s).unwrap_or(true))
            .cloned()
            .collect();

        // UUIDv7 ids are time-ordered, breaking ties between equal timestamps
        workflows.sort_by(|a, b| {
            b.meta
                .updated_at
                .cmp(&a.meta.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        paginate(workflows, limit, cursor, |w| &w.id)
    }

    /// Update a workflow with optimistic version check.
    ///
    /// Re-runs structural validation and bumps the version.
    pub async fn update(
        &self,
        workflow_id: &str,
        tenant_id: &str,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        version: u32,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<(Workflow, Option<Vec<ValidationError>>)> {
        let mut inner = self.inner.write().await;

        let existing = inner
            .workflows
            .get(workflow_id)
            .filter(|w| w.tenant_id == tenant_id)
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        if existing.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowArchived(workflow_id.to_string()));
        }

        if existing.meta.version != version {
            return Err(EngineError::VersionConflict {
                expected: version,
                actual: existing.meta.version,
            });
        }

        let mut updated = Workflow {
            id: existing.id.clone(),
            tenant_id: existing.tenant_id.clone(),
            status: existing.status,
            meta: WorkflowMeta {
                name: name.unwrap_or_else(|| existing.meta.name.clone()),
                description: description.unwrap_or_else(|| existing.meta.description.clone()),
                created_at: existing.meta.created_at,
                updated_at: Utc::now(),
                owner_id: existing.meta.owner_id.clone(),
                version: existing.meta.version + 1,
            },
            nodes,
            edges,
        };

        let result = validate_workflow_structure(&updated);
        let errors = if result.valid {
            updated.status = WorkflowStatus::Valid;
            inner.validation_errors.remove(workflow_id);
            None
        } else {
            updated.status = WorkflowStatus::Invalid;
            inner
                .validation_errors
                .insert(workflow_id.to_string(), result.errors.clone());
            Some(result.errors)
        };

        inner
            .workflows
            .insert(workflow_id.to_string(), updated.clone());

        Ok((updated, errors))
    }

    /// Soft-delete a workflow by setting status to archived
    pub async fn archive(&self, workflow_id: &str, tenant_id: &str) -> Result<Workflow> {
        let mut inner = self.inner.write().await;

        let existing = inner
            .workflows
            .get_mut(workflow_id)
            .filter(|w| w.tenant_id == tenant_id)
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        existing.status = WorkflowStatus::Archived;
        existing.meta.updated_at = Utc::now();
        let archived = existing.clone();

        inner.validation_errors.remove(workflow_id);

        Ok(archived)
    }

    /// Overwrite a workflow's validation status (used by the validate-
    /// persisted endpoint).
    pub async fn set_validation_status(
        &self,
        workflow_id: &str,
        valid: bool,
        errors: Vec<ValidationError>,
    ) -> Result<Workflow> {
        let mut inner = self.inner.write().await;

        let existing = inner
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        existing.status = if valid {
            WorkflowStatus::Valid
        } else {
            WorkflowStatus::Invalid
        };
        existing.meta.updated_at = Utc::now();
        let updated = existing.clone();

        if valid {
            inner.validation_errors.remove(workflow_id);
        } else {
            inner
                .validation_errors
                .insert(workflow_id.to_string(), errors);
        }

        Ok(updated)
    }
}

/// Cursor pagination shared by the stores.
///
/// The cursor is the opaque id of the last returned element. A cursor
/// that matches nothing in the (filtered, sorted) listing is invalid.
pub(crate) fn paginate<T, F>(
    items: Vec<T>,
    limit: usize,
    cursor: Option<&str>,
    id_of: F,
) -> Result<(Vec<T>, Option<String>)>
where
    F: Fn(&T) -> &str,
{
    let mut items = items;

    if let Some(cursor) = cursor {
        match items.iter().position(|item| id_of(item) == cursor) {
            Some(pos) => {
                items.drain(..=pos);
            }
            None => return Err(EngineError::InvalidCursor(cursor.to_string())),
        }
    }

    let has_more = items.len() > limit;
    items.truncate(limit);

    let next_cursor = if has_more {
        items.last().map(|item| id_of(item).to_string())
    } else {
        None
    };

    Ok((items, next_cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::{NodeConfig, NodePosition, NodeType};

    fn node(id: &str, node_type: NodeType) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            label: id.to_string(),
            position: NodePosition::default(),
            config: NodeConfig::default(),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.to_string(),
            source: source.to_string(),
            source_port: "output".to_string(),
            target: target.to_string(),
            target_port: "input".to_string(),
        }
    }

    fn linear_nodes() -> (Vec<Node>, Vec<Edge>) {
        (
            vec![node("a", NodeType::Input), node("b", NodeType::Output)],
            vec![edge("e1", "a", "b")],
        )
    }

    #[tokio::test]
    async fn test_create_valid_workflow() {
        let store = WorkflowStore::new();
        let (nodes, edges) = linear_nodes();

        let (workflow, errors) = store
            .create("wf", "", nodes, edges, "user-1", "tenant-1")
            .await;

        assert_eq!(workflow.status, WorkflowStatus::Valid);
        assert_eq!(workflow.meta.version, 1);
        assert!(errors.is_none());
    }

    #[tokio::test]
    async fn test_create_invalid_workflow_keeps_errors() {
        let store = WorkflowStore::new();

        let (workflow, errors) = store
            .create("wf", "", vec![], vec![], "user-1", "tenant-1")
            .await;

        assert_eq!(workflow.status, WorkflowStatus::Invalid);
        assert!(errors.is_some());
        assert!(store.validation_errors(&workflow.id).await.is_some());
    }

    #[tokio::test]
    async fn test_get_wrong_tenant_is_not_found() {
        let store = WorkflowStore::new();
        let (nodes, edges) = linear_nodes();
        let (workflow, _) = store
            .create("wf", "", nodes, edges, "user-1", "tenant-1")
            .await;

        assert!(store.get(&workflow.id, "tenant-1").await.is_ok());
        assert!(matches!(
            store.get(&workflow.id, "tenant-2").await,
            Err(EngineError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_version_conflict() {
        let store = WorkflowStore::new();
        let (nodes, edges) = linear_nodes();
        let (workflow, _) = store
            .create("wf", "", nodes.clone(), edges.clone(), "user-1", "tenant-1")
            .await;

        let updated = store
            .update(&workflow.id, "tenant-1", nodes.clone(), edges.clone(), 1, None, None)
            .await
            .expect("update");
        assert_eq!(updated.0.meta.version, 2);

        // Stale version is rejected
        let err = store
            .update(&workflow.id, "tenant-1", nodes, edges, 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_archived_workflow_rejects_update() {
        let store = WorkflowStore::new();
        let (nodes, edges) = linear_nodes();
        let (workflow, _) = store
            .create("wf", "", nodes.clone(), edges.clone(), "user-1", "tenant-1")
            .await;

        let archived = store.archive(&workflow.id, "tenant-1").await.expect("archive");
        assert_eq!(archived.status, WorkflowStatus::Archived);

        let err = store
            .update(&workflow.id, "tenant-1", nodes, edges, 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowArchived(_)));
    }

    #[tokio::test]
    async fn test_list_pagination_with_cursor() {
        let store = WorkflowStore::new();
        for i in 0..5 {
            let (nodes, edges) = linear_nodes();
            store
                .create(format!("wf-{i}"), "", nodes, edges, "user-1", "tenant-1")
                .await;
        }

        let (page1, cursor) = store.list("tenant-1", None, 2, None).await.expect("list");
        assert_eq!(page1.len(), 2);
        let cursor = cursor.expect("next cursor");

        let (page2, _) = store
            .list("tenant-1", None, 2, Some(&cursor))
            .await
            .expect("list");
        assert_eq!(page2.len(), 2);
        assert!(page1.iter().all(|w| page2.iter().all(|x| x.id != w.id)));

        // Unknown cursor is rejected
        assert!(matches!(
            store.list("tenant-1", None, 2, Some("nope")).await,
            Err(EngineError::InvalidCursor(_))
        ));
    }
}
