//! Resource key routing.
//!
//! Every workspace-scoped pattern is a prefix of the workspace-level one,
//! so the table is ordered from most to least specific and the first match
//! wins. ID segments exclude `*` so a collection key such as
//! `/api/workspaces/W/tasks/*/` never matches the single-task route.

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::debug;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

/// Which local store to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    /// Comments of one task.
    Comments { workspace: String, task: String },
    /// One task.
    Task { workspace: String, task: String },
    /// The task collection of a workspace.
    Tasks { workspace: String },
    /// The chore collection of a workspace.
    Chores { workspace: String },
    /// Workspace-level configuration.
    Workspace { workspace: String },
}

/// Local store refresh calls. Each re-fetches from the API.
#[async_trait]
pub trait StoreRefresher: Send + Sync + std::fmt::Debug {
    /// Re-fetch the comments of a task.
    async fn fetch_comments(&self, workspace: &str, task: &str) -> AppResult<()>;

    /// Re-fetch one task.
    async fn fetch_task(&self, workspace: &str, task: &str) -> AppResult<()>;

    /// Re-fetch the task list of a workspace.
    async fn fetch_tasks(&self, workspace: &str) -> AppResult<()>;

    /// Re-fetch the chore list of a workspace.
    async fn fetch_chores(&self, workspace: &str) -> AppResult<()>;

    /// Re-fetch workspace configuration.
    async fn fetch_config(&self, workspace: &str) -> AppResult<()>;
}

type Build = fn(&Captures<'_>) -> RefreshTarget;

#[derive(Debug)]
struct Route {
    name: &'static str,
    pattern: Regex,
    build: Build,
}

const ID: &str = "[^/*]+";

fn capture(caps: &Captures<'_>, name: &str) -> String {
    caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default()
}

/// Ordered key → refresh table.
#[derive(Debug)]
pub struct MessageRouter {
    routes: Vec<Route>,
}

impl MessageRouter {
    /// Build the route table.
    pub fn new() -> AppResult<Self> {
        let table: [(&'static str, String, Build); 5] = [
            (
                "comments",
                format!("^/api/workspaces/(?P<ws>{ID})/tasks/(?P<task>{ID})/comments/"),
                |c| RefreshTarget::Comments {
                    workspace: capture(c, "ws"),
                    task: capture(c, "task"),
                },
            ),
            (
                "task",
                format!("^/api/workspaces/(?P<ws>{ID})/tasks/(?P<task>{ID})/"),
                |c| RefreshTarget::Task {
                    workspace: capture(c, "ws"),
                    task: capture(c, "task"),
                },
            ),
            (
                "tasks",
                format!("^/api/workspaces/(?P<ws>{ID})/tasks/"),
                |c| RefreshTarget::Tasks {
                    workspace: capture(c, "ws"),
                },
            ),
            (
                "chores",
                format!("^/api/workspaces/(?P<ws>{ID})/chores/"),
                |c| RefreshTarget::Chores {
                    workspace: capture(c, "ws"),
                },
            ),
            (
                "workspace",
                format!("^/api/workspaces/(?P<ws>{ID})/"),
                |c| RefreshTarget::Workspace {
                    workspace: capture(c, "ws"),
                },
            ),
        ];

        let routes = table
            .into_iter()
            .map(|(name, pattern, build)| {
                Regex::new(&pattern)
                    .map(|pattern| Route { name, pattern, build })
                    .map_err(|e| {
                        AppError::with_source(
                            ErrorKind::Internal,
                            format!("Invalid route pattern '{name}'"),
                            e,
                        )
                    })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self { routes })
    }

    /// First matching target for a key, if any.
    pub fn resolve(&self, key: &str) -> Option<RefreshTarget> {
        self.routes.iter().find_map(|route| {
            route.pattern.captures(key).map(|caps| {
                debug!(route = route.name, key, "Key routed");
                (route.build)(&caps)
            })
        })
    }

    /// Resolve a key and run the matching refresh.
    ///
    /// Returns `Ok(None)` for keys no route claims.
    pub async fn dispatch(
        &self,
        key: &str,
        refresher: &dyn StoreRefresher,
    ) -> AppResult<Option<RefreshTarget>> {
        let Some(target) = self.resolve(key) else {
            debug!(key, "No route for key");
            return Ok(None);
        };

        match &target {
            RefreshTarget::Comments { workspace, task } => {
                refresher.fetch_comments(workspace, task).await?
            }
            RefreshTarget::Task { workspace, task } => refresher.fetch_task(workspace, task).await?,
            RefreshTarget::Tasks { workspace } => refresher.fetch_tasks(workspace).await?,
            RefreshTarget::Chores { workspace } => refresher.fetch_chores(workspace).await?,
            RefreshTarget::Workspace { workspace } => refresher.fetch_config(workspace).await?,
        }

        Ok(Some(target))
    }
}
