//! Interactive tools exposed via Model Context Protocol
//!
//! The registry is closed: [`ToolName`] enumerates every tool, and unknown
//! names are rejected when the call is parsed. Each handler validates its
//! arguments, calls a single [`WorkTrackingClient`] capability and renders the
//! result as Markdown text.

use std::fmt::Display;

use rust_mcp_sdk::{macros, schema::Tool};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::devops_client::{NewWorkItem, WiqlQuery, WorkTrackingClient};
use crate::domain::format;
use crate::errors::AppError;

// Multi-word fields carry an explicit rename: the schema macro honors
// field-level renames but not `rename_all`.

#[macros::mcp_tool(
    name = "get_work_item",
    description = "Get a work item by ID with its fields, state and assignee"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetWorkItemTool {
    /// Numeric work item ID
    #[serde(rename = "workItemId")]
    pub work_item_id: i64,
}

#[macros::mcp_tool(
    name = "list_projects",
    description = "List all projects in the Azure DevOps organization"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema, Default)]
pub struct ListProjectsTool {}

#[macros::mcp_tool(
    name = "get_project",
    description = "Get details of a project by ID or name"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetProjectTool {
    /// Project ID or name
    #[serde(rename = "projectId")]
    pub project_id: String,
}

#[macros::mcp_tool(
    name = "create_work_item",
    description = "Create a new work item (Bug, Task, User Story, ...) in a project"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct CreateWorkItemTool {
    /// Project ID or name
    pub project: String,
    /// Work item type, e.g. Bug, Task, User Story
    #[serde(rename = "workItemType")]
    pub work_item_type: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<String>,
    #[serde(rename = "areaPath")]
    pub area_path: Option<String>,
    #[serde(rename = "iterationPath")]
    pub iteration_path: Option<String>,
    pub priority: Option<i64>,
    /// Semicolon separated tags
    pub tags: Option<String>,
}

#[macros::mcp_tool(
    name = "query_work_items",
    description = "Run a WIQL query and return the matching work items"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct QueryWorkItemsTool {
    /// WIQL query text
    pub query: String,
    /// Project scope for @project macros
    pub project: Option<String>,
    /// Maximum number of work items to return (at most 200)
    pub top: Option<u32>,
}

#[macros::mcp_tool(
    name = "list_repositories",
    description = "List Git repositories in a project"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct ListRepositoriesTool {
    /// Project ID or name
    pub project: String,
}

#[macros::mcp_tool(
    name = "get_repository",
    description = "Get details of a Git repository"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct GetRepositoryTool {
    /// Project ID or name
    pub project: String,
    /// Repository ID or name
    #[serde(rename = "repositoryId")]
    pub repository_id: String,
}

#[macros::mcp_tool(
    name = "search_repository_code",
    description = "Search code in repositories (not available through this bridge)"
)]
#[derive(Debug, Clone, Deserialize, Serialize, macros::JsonSchema)]
pub struct SearchRepositoryCodeTool {
    #[serde(rename = "searchText")]
    pub search_text: String,
    pub project: Option<String>,
    #[serde(rename = "repositoryId")]
    pub repository_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetWorkItem,
    ListProjects,
    GetProject,
    CreateWorkItem,
    QueryWorkItems,
    ListRepositories,
    GetRepository,
    SearchRepositoryCode,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::GetWorkItem,
        ToolName::ListProjects,
        ToolName::GetProject,
        ToolName::CreateWorkItem,
        ToolName::QueryWorkItems,
        ToolName::ListRepositories,
        ToolName::GetRepository,
        ToolName::SearchRepositoryCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetWorkItem => "get_work_item",
            ToolName::ListProjects => "list_projects",
            ToolName::GetProject => "get_project",
            ToolName::CreateWorkItem => "create_work_item",
            ToolName::QueryWorkItems => "query_work_items",
            ToolName::ListRepositories => "list_repositories",
            ToolName::GetRepository => "get_repository",
            ToolName::SearchRepositoryCode => "search_repository_code",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    pub fn descriptor(self) -> Tool {
        match self {
            ToolName::GetWorkItem => GetWorkItemTool::tool(),
            ToolName::ListProjects => ListProjectsTool::tool(),
            ToolName::GetProject => GetProjectTool::tool(),
            ToolName::CreateWorkItem => CreateWorkItemTool::tool(),
            ToolName::QueryWorkItems => QueryWorkItemsTool::tool(),
            ToolName::ListRepositories => ListRepositoriesTool::tool(),
            ToolName::GetRepository => GetRepositoryTool::tool(),
            ToolName::SearchRepositoryCode => SearchRepositoryCodeTool::tool(),
        }
    }

    /// Argument names the advertised input schema marks as required.
    pub fn required_arguments(self) -> Vec<String> {
        serde_json::to_value(self.descriptor())
            .ok()
            .and_then(|descriptor| descriptor.pointer("/inputSchema/required").cloned())
            .and_then(|required| serde_json::from_value(required).ok())
            .unwrap_or_default()
    }
}

pub fn build_tools_list() -> Vec<Tool> {
    ToolName::ALL.into_iter().map(ToolName::descriptor).collect()
}

pub fn check_required_arguments(
    tool: ToolName,
    arguments: &Map<String, Value>,
) -> Result<(), AppError> {
    let missing = tool
        .required_arguments()
        .into_iter()
        .find(|name| arguments.get(name).is_none_or(Value::is_null));

    match missing {
        Some(name) => Err(AppError::invalid_arguments(format!(
            "Missing required argument '{name}' for tool '{}'",
            tool.as_str()
        ))),
        None => Ok(()),
    }
}

fn parse_arguments<T: DeserializeOwned>(
    tool: ToolName,
    arguments: Map<String, Value>,
) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(arguments)).map_err(|err| {
        AppError::invalid_arguments(format!(
            "Invalid arguments for tool '{}': {err}",
            tool.as_str()
        ))
    })
}

fn failed(context: impl Display) -> impl FnOnce(AppError) -> AppError {
    move |err| AppError::tool_failed(format!("{context}: {err}"))
}

/// Runs one tool to completion; the returned text becomes the single content block.
pub async fn call_tool(
    client: &dyn WorkTrackingClient,
    tool: ToolName,
    arguments: Map<String, Value>,
) -> Result<String, AppError> {
    check_required_arguments(tool, &arguments)?;

    match tool {
        ToolName::GetWorkItem => {
            let args: GetWorkItemTool = parse_arguments(tool, arguments)?;
            let item = client
                .get_work_item(args.work_item_id)
                .await
                .map_err(failed(format!("Failed to get work item {}", args.work_item_id)))?;
            Ok(format::work_item(&item))
        }
        ToolName::ListProjects => {
            let projects = client
                .list_projects()
                .await
                .map_err(failed("Failed to list projects"))?;
            Ok(format::project_list(&projects))
        }
        ToolName::GetProject => {
            let args: GetProjectTool = parse_arguments(tool, arguments)?;
            let project = client
                .get_project(&args.project_id)
                .await
                .map_err(failed(format!("Failed to get project {}", args.project_id)))?;
            Ok(format::project(&project))
        }
        ToolName::CreateWorkItem => {
            let args: CreateWorkItemTool = parse_arguments(tool, arguments)?;
            let new_item = NewWorkItem {
                project: args.project,
                work_item_type: args.work_item_type,
                title: args.title,
                description: args.description,
                assigned_to: args.assigned_to,
                area_path: args.area_path,
                iteration_path: args.iteration_path,
                priority: args.priority,
                tags: args.tags,
            };
            let item = client.create_work_item(&new_item).await.map_err(failed(format!(
                "Failed to create {} in project {}",
                new_item.work_item_type, new_item.project
            )))?;
            Ok(format::created_work_item(&item))
        }
        ToolName::QueryWorkItems => {
            let args: QueryWorkItemsTool = parse_arguments(tool, arguments)?;
            let query = WiqlQuery {
                query: args.query,
                project: args.project,
                top: args.top.map(|top| top as usize),
            };
            let result = client
                .query_work_items(&query)
                .await
                .map_err(failed("Failed to query work items"))?;
            Ok(format::query_result(&result))
        }
        ToolName::ListRepositories => {
            let args: ListRepositoriesTool = parse_arguments(tool, arguments)?;
            let repositories = client.list_repositories(&args.project).await.map_err(failed(
                format!("Failed to list repositories in project {}", args.project),
            ))?;
            Ok(format::repository_list(&args.project, &repositories))
        }
        ToolName::GetRepository => {
            let args: GetRepositoryTool = parse_arguments(tool, arguments)?;
            let repository = client
                .get_repository(&args.project, &args.repository_id)
                .await
                .map_err(failed(format!("Failed to get repository {}", args.repository_id)))?;
            Ok(format::repository(&repository))
        }
        ToolName::SearchRepositoryCode => {
            let args: SearchRepositoryCodeTool = parse_arguments(tool, arguments)?;
            let scope = args.repository_id.as_deref().or(args.project.as_deref());
            Ok(format::code_search_unavailable(&args.search_text, scope))
        }
    }
}
