//! Markdown renderings of backend records returned as tool text
//!
//! Azure DevOps stores rich-text fields as HTML; those are flattened to plain
//! text before they are embedded.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::devops_client::{Project, QueryResult, Repository, WorkItem};

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("html tag pattern"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line pattern"));

pub fn strip_html(input: &str) -> String {
    let with_breaks = input
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n")
        .replace("</div>", "\n");
    let text = HTML_TAG.replace_all(&with_breaks, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    BLANK_RUNS.replace_all(text.trim(), "\n\n").into_owned()
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|value| !value.trim().is_empty()).unwrap_or("-")
}

pub fn work_item(item: &WorkItem) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Work Item {}: {}", item.id, item.title);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Type**: {}", item.work_item_type);
    let _ = writeln!(out, "- **State**: {}", item.state);
    let _ = writeln!(out, "- **Assigned To**: {}", or_dash(item.assigned_to.as_deref()));
    let _ = writeln!(out, "- **Project**: {}", or_dash(item.team_project.as_deref()));
    let _ = writeln!(out, "- **Area Path**: {}", or_dash(item.area_path.as_deref()));
    let _ = writeln!(out, "- **Iteration**: {}", or_dash(item.iteration_path.as_deref()));
    let _ = writeln!(out, "- **Created**: {}", or_dash(item.created_date.as_deref()));
    let _ = writeln!(out, "- **Changed**: {}", or_dash(item.changed_date.as_deref()));

    if let Some(tags) = item.tags.as_deref().filter(|tags| !tags.trim().is_empty()) {
        let _ = writeln!(out, "- **Tags**: {tags}");
    }
    if let Some(url) = item.web_url.as_deref() {
        let _ = writeln!(out, "- **Link**: {url}");
    }

    if let Some(description) = item.description.as_deref().map(strip_html) {
        if !description.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Description");
            let _ = writeln!(out);
            let _ = writeln!(out, "{description}");
        }
    }

    out
}

pub fn created_work_item(item: &WorkItem) -> String {
    format!("Created work item {}.\n\n{}", item.id, work_item(item))
}

pub fn project_list(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No projects found.".to_string();
    }

    let mut out = format!("# Projects ({})\n\n", projects.len());
    for project in projects {
        let _ = write!(out, "- **{}** (`{}`)", project.name, project.id);
        if let Some(description) = project.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = write!(out, ": {description}");
        }
        let _ = writeln!(out);
    }
    out
}

pub fn project(project: &Project) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Project: {}", project.name);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **ID**: {}", project.id);
    let _ = writeln!(out, "- **Description**: {}", or_dash(project.description.as_deref()));
    let _ = writeln!(out, "- **State**: {}", or_dash(project.state.as_deref()));
    let _ = writeln!(out, "- **Visibility**: {}", or_dash(project.visibility.as_deref()));
    let _ = writeln!(out, "- **Last Updated**: {}", or_dash(project.last_update_time.as_deref()));
    out
}

pub fn query_result(result: &QueryResult) -> String {
    if result.items.is_empty() {
        return "No work items found for the query.".to_string();
    }

    let mut out = format!(
        "# Query Results ({} of {} work items)\n\n",
        result.items.len(),
        result.total
    );
    for item in &result.items {
        let _ = writeln!(
            out,
            "- **#{}** [{}] {} ({}, {})",
            item.id,
            item.work_item_type,
            item.title,
            item.state,
            or_dash(item.assigned_to.as_deref())
        );
    }
    out
}

pub fn repository_list(project: &str, repositories: &[Repository]) -> String {
    if repositories.is_empty() {
        return format!("No repositories found in project {project}.");
    }

    let mut out = format!("# Repositories in {project} ({})\n\n", repositories.len());
    for repository in repositories {
        let _ = writeln!(
            out,
            "- **{}** (`{}`), default branch: {}",
            repository.name,
            repository.id,
            or_dash(repository.default_branch.as_deref())
        );
    }
    out
}

pub fn repository(repository: &Repository) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Repository: {}", repository.name);
    let _ = writeln!(out);
    let _ = writeln!(out, "- **ID**: {}", repository.id);
    let _ = writeln!(out, "- **Project**: {}", or_dash(repository.project.as_deref()));
    let _ = writeln!(
        out,
        "- **Default Branch**: {}",
        or_dash(repository.default_branch.as_deref())
    );
    match repository.size {
        Some(size) => {
            let _ = writeln!(out, "- **Size**: {size} bytes");
        }
        None => {
            let _ = writeln!(out, "- **Size**: -");
        }
    }
    let _ = writeln!(out, "- **Clone URL**: {}", or_dash(repository.remote_url.as_deref()));
    let _ = writeln!(out, "- **Web URL**: {}", or_dash(repository.web_url.as_deref()));
    out
}

pub fn code_search_unavailable(search_text: &str, scope: Option<&str>) -> String {
    let scope = scope.map(|scope| format!(" in {scope}")).unwrap_or_default();
    format!(
        "Code search for \"{search_text}\"{scope} is not available through this bridge: \
         the Azure DevOps client does not expose the code search API. \
         Use the Azure DevOps web portal search or list repositories with `list_repositories` instead."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        WorkItem {
            id: 12,
            title: "Broken build".to_string(),
            state: "New".to_string(),
            work_item_type: "Bug".to_string(),
            assigned_to: None,
            team_project: Some("Web".to_string()),
            area_path: None,
            iteration_path: None,
            created_date: None,
            changed_date: None,
            description: Some("<div>First&nbsp;line<br>second &amp; last</div>".to_string()),
            tags: None,
            web_url: None,
        }
    }

    #[test]
    fn strips_tags_and_entities() {
        assert_eq!(
            strip_html("<p>Hello <b>world</b></p><p>x &lt; y</p>"),
            "Hello world\nx < y"
        );
    }

    #[test]
    fn work_item_includes_core_fields_and_plain_description() {
        let text = work_item(&item());
        assert!(text.starts_with("# Work Item 12: Broken build"));
        assert!(text.contains("- **State**: New"));
        assert!(text.contains("- **Assigned To**: -"));
        assert!(text.contains("First line\nsecond & last"));
        assert!(!text.contains("<div>"));
    }

    #[test]
    fn empty_collections_say_so() {
        assert_eq!(project_list(&[]), "No projects found.");
        assert_eq!(
            repository_list("Web", &[]),
            "No repositories found in project Web."
        );
        assert_eq!(
            query_result(&QueryResult {
                total: 0,
                items: vec![]
            }),
            "No work items found for the query."
        );
    }

    #[test]
    fn query_result_reports_truncation_counts() {
        let text = query_result(&QueryResult {
            total: 340,
            items: vec![item()],
        });
        assert!(text.contains("(1 of 340 work items)"));
        assert!(text.contains("**#12** [Bug] Broken build (New, -)"));
    }
}
