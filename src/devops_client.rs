use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use url::Url;

use crate::errors::AppError;

pub const API_VERSION: &str = "7.0";
/// Upper bound of the work item batch endpoint.
pub const MAX_BATCH_IDS: usize = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    pub state: String,
    pub work_item_type: String,
    pub assigned_to: Option<String>,
    pub team_project: Option<String>,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
    pub created_date: Option<String>,
    pub changed_date: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub project: Option<String>,
    pub default_branch: Option<String>,
    pub size: Option<u64>,
    pub remote_url: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WiqlQuery {
    pub query: String,
    pub project: Option<String>,
    pub top: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Number of ids matched by WIQL, before the batch fetch cap.
    pub total: usize,
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewWorkItem {
    pub project: String,
    pub work_item_type: String,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
    pub priority: Option<i64>,
    pub tags: Option<String>,
}

#[async_trait]
pub trait WorkTrackingClient: Send + Sync {
    async fn get_work_item(&self, id: i64) -> Result<WorkItem, AppError>;

    async fn list_projects(&self) -> Result<Vec<Project>, AppError>;

    async fn get_project(&self, project: &str) -> Result<Project, AppError>;

    async fn create_work_item(&self, item: &NewWorkItem) -> Result<WorkItem, AppError>;

    async fn query_work_items(&self, query: &WiqlQuery) -> Result<QueryResult, AppError>;

    async fn list_repositories(&self, project: &str) -> Result<Vec<Repository>, AppError>;

    async fn get_repository(&self, project: &str, repository: &str)
        -> Result<Repository, AppError>;
}

#[derive(Debug, Deserialize)]
struct RawWorkItem {
    id: i64,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default, rename = "_links")]
    links: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    id: String,
    name: String,
    #[serde(default)]
    project: Option<RawProjectRef>,
    #[serde(default, rename = "defaultBranch")]
    default_branch: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default, rename = "remoteUrl")]
    remote_url: Option<String>,
    #[serde(default, rename = "webUrl")]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProjectRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WiqlReference>,
}

#[derive(Debug, Deserialize)]
struct WiqlReference {
    id: i64,
}

impl From<RawWorkItem> for WorkItem {
    fn from(raw: RawWorkItem) -> Self {
        let text = |name: &str| raw.fields.get(name).and_then(Value::as_str).map(str::to_string);
        let assigned_to = raw.fields.get("System.AssignedTo").and_then(|value| {
            value
                .get("displayName")
                .and_then(Value::as_str)
                .or_else(|| value.as_str())
                .map(str::to_string)
        });
        let web_url = raw
            .links
            .as_ref()
            .and_then(|links| links.pointer("/html/href"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            id: raw.id,
            title: text("System.Title").unwrap_or_default(),
            state: text("System.State").unwrap_or_default(),
            work_item_type: text("System.WorkItemType").unwrap_or_default(),
            assigned_to,
            team_project: text("System.TeamProject"),
            area_path: text("System.AreaPath"),
            iteration_path: text("System.IterationPath"),
            created_date: text("System.CreatedDate"),
            changed_date: text("System.ChangedDate"),
            description: text("System.Description"),
            tags: text("System.Tags"),
            web_url,
        }
    }
}

impl From<RawRepository> for Repository {
    fn from(raw: RawRepository) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            project: raw.project.map(|project| project.name),
            default_branch: raw.default_branch,
            size: raw.size,
            remote_url: raw.remote_url,
            web_url: raw.web_url,
        }
    }
}

/// Azure DevOps REST client authenticated with a personal access token.
///
/// Built without credentials it stays usable as a value but every call fails
/// with [`AppError::NotInitialized`].
#[derive(Clone)]
pub struct AzureDevOpsClient {
    connection: Option<Connection>,
}

#[derive(Clone)]
struct Connection {
    http: reqwest::Client,
    org_url: Url,
    token: String,
}

impl AzureDevOpsClient {
    pub fn new(org_url: Option<Url>, token: Option<String>) -> Result<Self, AppError> {
        let (Some(org_url), Some(token)) = (org_url, token) else {
            return Ok(Self { connection: None });
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            connection: Some(Connection {
                http,
                org_url,
                token,
            }),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&self) -> Result<&Connection, AppError> {
        self.connection.as_ref().ok_or(AppError::NotInitialized)
    }
}

impl Connection {
    fn url(&self, segments: &[&str]) -> Result<Url, AppError> {
        build_api_url(&self.org_url, segments)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let response = request.basic_auth("", Some(&self.token)).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(status.as_u16(), upstream_message(&body)));
        }

        response.json::<T>().await.map_err(|err| {
            AppError::internal(format!("failed to decode azure devops response: {err}"))
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, AppError> {
        self.send(self.http.get(url)).await
    }

    async fn fetch_work_items(&self, ids: &[i64]) -> Result<Vec<WorkItem>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.url(&["_apis", "wit", "workitems"])?;
        let joined = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut().append_pair("ids", &joined);

        let list: ValueList<RawWorkItem> = self.get(url).await?;
        Ok(list.value.into_iter().map(WorkItem::from).collect())
    }
}

#[async_trait]
impl WorkTrackingClient for AzureDevOpsClient {
    async fn get_work_item(&self, id: i64) -> Result<WorkItem, AppError> {
        let connection = self.connection()?;
        let mut url = connection.url(&["_apis", "wit", "workitems", id.to_string().as_str()])?;
        url.query_pairs_mut().append_pair("$expand", "all");

        let raw: RawWorkItem = connection.get(url).await?;
        Ok(raw.into())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, AppError> {
        let connection = self.connection()?;
        let url = connection.url(&["_apis", "projects"])?;

        let list: ValueList<Project> = connection.get(url).await?;
        Ok(list.value)
    }

    async fn get_project(&self, project: &str) -> Result<Project, AppError> {
        let connection = self.connection()?;
        let url = connection.url(&["_apis", "projects", project])?;
        connection.get(url).await
    }

    async fn create_work_item(&self, item: &NewWorkItem) -> Result<WorkItem, AppError> {
        let connection = self.connection()?;
        let type_segment = format!("${}", item.work_item_type);
        let url = connection.url(&[
            item.project.as_str(),
            "_apis",
            "wit",
            "workitems",
            type_segment.as_str(),
        ])?;

        let request = connection
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json-patch+json")
            .body(patch_document(item).to_string());

        let raw: RawWorkItem = connection.send(request).await?;
        Ok(raw.into())
    }

    async fn query_work_items(&self, query: &WiqlQuery) -> Result<QueryResult, AppError> {
        let connection = self.connection()?;
        let url = match query.project.as_deref() {
            Some(project) => connection.url(&[project, "_apis", "wit", "wiql"])?,
            None => connection.url(&["_apis", "wit", "wiql"])?,
        };

        let request = connection
            .http
            .post(url)
            .json(&json!({ "query": query.query }));
        let wiql: WiqlResponse = connection.send(request).await?;

        let total = wiql.work_items.len();
        let limit = query.top.unwrap_or(MAX_BATCH_IDS).min(MAX_BATCH_IDS);
        let ids = wiql
            .work_items
            .iter()
            .take(limit)
            .map(|reference| reference.id)
            .collect::<Vec<_>>();

        let items = connection.fetch_work_items(&ids).await?;
        Ok(QueryResult { total, items })
    }

    async fn list_repositories(&self, project: &str) -> Result<Vec<Repository>, AppError> {
        let connection = self.connection()?;
        let url = connection.url(&[project, "_apis", "git", "repositories"])?;

        let list: ValueList<RawRepository> = connection.get(url).await?;
        Ok(list.value.into_iter().map(Repository::from).collect())
    }

    async fn get_repository(
        &self,
        project: &str,
        repository: &str,
    ) -> Result<Repository, AppError> {
        let connection = self.connection()?;
        let url = connection.url(&[project, "_apis", "git", "repositories", repository])?;

        let raw: RawRepository = connection.get(url).await?;
        Ok(raw.into())
    }
}

fn build_api_url(org_url: &Url, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = org_url.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::internal("organization url cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    url.query_pairs_mut().append_pair("api-version", API_VERSION);
    Ok(url)
}

fn patch_document(item: &NewWorkItem) -> Value {
    let mut operations = vec![json!({
        "op": "add",
        "path": "/fields/System.Title",
        "value": item.title,
    })];

    let optional_fields = [
        ("System.Description", item.description.as_ref().map(|value| json!(value))),
        ("System.AssignedTo", item.assigned_to.as_ref().map(|value| json!(value))),
        ("System.AreaPath", item.area_path.as_ref().map(|value| json!(value))),
        ("System.IterationPath", item.iteration_path.as_ref().map(|value| json!(value))),
        ("Microsoft.VSTS.Common.Priority", item.priority.map(|value| json!(value))),
        ("System.Tags", item.tags.as_ref().map(|value| json!(value))),
    ];

    operations.extend(optional_fields.into_iter().filter_map(|(field, value)| {
        value.map(|value| {
            json!({
                "op": "add",
                "path": format!("/fields/{field}"),
                "value": value,
            })
        })
    }));

    Value::Array(operations)
}

fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty response body".to_string()
            } else {
                trimmed.chars().take(500).collect()
            }
        })
}
