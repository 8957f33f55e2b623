//! Thin client for the Asana REST API.
//!
//! Every operation wraps exactly one call and never retries. Failures are
//! logged with the operation and id, then surface as `None`/`false` so the
//! calling workflow decides what is fatal. The one exception is
//! [`AsanaClient::set_parent`]: a silently missing parent link breaks the
//! review workflow, so its error is returned to the caller.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;

use crate::errors::Result;

pub const DEFAULT_BASE_URL: &str = "https://app.asana.com/api/1.0";

#[derive(Clone)]
pub struct AsanaClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    dry_run: bool,
}

/// Parameters for creating a task. `custom_fields` holds the already
/// parsed JSON object from the `asana-task-custom-fields` input.
#[derive(Clone, Debug, Default)]
pub struct TaskDescriptor {
    pub name: String,
    pub notes: String,
    pub project_id: String,
    pub section_id: Option<String>,
    pub tags: Vec<String>,
    pub followers: Vec<String>,
    pub assignee: Option<String>,
    pub custom_fields: Option<serde_json::Map<String, serde_json::Value>>,
    pub due_on: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CreatedTask {
    pub gid: String,
    pub duplicate: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TaskCompact {
    pub gid: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Task {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub permalink_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Subtask {
    pub gid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Story {
    pub gid: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize)]
struct Data<T> {
    data: T,
}

impl AsanaClient {
    pub fn new(token: String, dry_run: bool) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL, dry_run)
    }

    pub fn with_base_url(token: String, base_url: &str, dry_run: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            dry_run,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Asana-Enable", "new-sections,string_ids")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .request(reqwest::Method::GET, path)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Data<T>>().await?.data)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        data: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(&json!({ "data": data }))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Data<T>>().await?.data)
    }

    async fn put_json(&self, path: &str, data: &serde_json::Value) -> Result<()> {
        self.request(reqwest::Method::PUT, path)
            .json(&json!({ "data": data }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Create a task from `desc`. With a section set, an existing task of
    /// the same name in that section short-circuits creation and comes back
    /// with `duplicate = true`. A failed create returns `None`.
    pub async fn create_task(&self, desc: &TaskDescriptor) -> Option<CreatedTask> {
        if let Some(section_id) = &desc.section_id {
            println!(
                "checking for duplicate task before creating a new one: {}",
                desc.name
            );
            if let Some(existing) = self.find_task_in_section(section_id, &desc.name).await {
                println!("task already exists, skipping");
                return Some(CreatedTask {
                    gid: existing,
                    duplicate: true,
                });
            }
        }

        let mut data = json!({
            "name": desc.name,
            "notes": desc.notes,
            "projects": [desc.project_id],
            "tags": desc.tags,
            "followers": desc.followers,
        });
        if let Some(assignee) = &desc.assignee {
            data["assignee"] = json!(assignee);
        }
        if let Some(fields) = &desc.custom_fields {
            data["custom_fields"] = serde_json::Value::Object(fields.clone());
        }
        if let Some(due_on) = &desc.due_on {
            data["due_on"] = json!(due_on);
        }
        if let Some(section_id) = &desc.section_id {
            data["memberships"] = json!([{ "project": desc.project_id, "section": section_id }]);
        }

        println!("creating new task: {}", desc.name);
        if self.dry_run {
            return Some(CreatedTask {
                gid: "dry-run".to_string(),
                duplicate: false,
            });
        }
        match self.post_json::<TaskCompact>("/tasks", &data).await {
            Ok(task) => {
                println!("task created: {}", task.gid);
                Some(CreatedTask {
                    gid: task.gid,
                    duplicate: false,
                })
            }
            Err(err) => {
                println!(" ... ERROR when creating task {:?}", err);
                None
            }
        }
    }

    /// First exact name match among the tasks of a section. Only the first
    /// page of the listing is scanned, so matches beyond it are missed.
    pub async fn find_task_in_section(&self, section_id: &str, name: &str) -> Option<String> {
        println!("searching tasks in section {section_id}");
        match self
            .get_json::<Vec<TaskCompact>>(&format!("/sections/{section_id}/tasks"))
            .await
        {
            Ok(tasks) => match tasks.into_iter().find(|t| t.name == name) {
                Some(task) => {
                    println!("task found: {}", task.gid);
                    Some(task.gid)
                }
                None => {
                    println!("task not found");
                    None
                }
            },
            Err(err) => {
                println!(" ... ERROR when listing section {section_id} {:?}", err);
                None
            }
        }
    }

    /// Post a comment on a task. Returns the story gid, or `None` on
    /// failure (logged, never raised past this boundary).
    pub async fn create_story(&self, task_id: &str, text: &str, is_pinned: bool) -> Option<String> {
        println!(" ... add comment to task {task_id}");
        if self.dry_run {
            return Some("dry-run".to_string());
        }
        match self
            .post_json::<Story>(
                &format!("/tasks/{task_id}/stories"),
                &json!({ "text": text, "is_pinned": is_pinned }),
            )
            .await
        {
            Ok(story) => Some(story.gid),
            Err(err) => {
                println!(" ... ERROR when posting comment to task {task_id} {:?}", err);
                None
            }
        }
    }

    /// Link `task_id` as a subtask of `parent_task_id`.
    pub async fn set_parent(&self, task_id: &str, parent_task_id: &str) -> Result<()> {
        println!(" ... set parent of {task_id} to {parent_task_id}");
        if self.dry_run {
            return Ok(());
        }
        self.post_json::<TaskCompact>(
            &format!("/tasks/{task_id}/setParent"),
            &json!({ "parent": parent_task_id }),
        )
        .await?;
        Ok(())
    }

    /// Partial update of a task (name, notes, completed, custom fields).
    pub async fn update_task(&self, task_id: &str, fields: &serde_json::Value) -> bool {
        println!(" ... update task {task_id}");
        if self.dry_run {
            return true;
        }
        match self.put_json(&format!("/tasks/{task_id}"), fields).await {
            Ok(()) => true,
            Err(err) => {
                println!(" ... ERROR when updating task {task_id} {:?}", err);
                false
            }
        }
    }

    pub async fn mark_complete(&self, task_id: &str, completed: bool) -> bool {
        println!(
            "marking task {task_id} {}",
            if completed { "complete" } else { "incomplete" }
        );
        self.update_task(task_id, &json!({ "completed": completed }))
            .await
    }

    /// Add a task to a project, scoped to a section when one is given.
    /// Without a section the task is appended unordered.
    pub async fn add_task_to_project(
        &self,
        task_id: &str,
        project_id: &str,
        section_id: Option<&str>,
    ) -> bool {
        println!("adding task {task_id} to project {project_id}");
        if self.dry_run {
            return true;
        }
        let added = self
            .post_json::<serde_json::Value>(
                &format!("/tasks/{task_id}/addProject"),
                &json!({ "project": project_id, "insert_after": null }),
            )
            .await;
        if let Err(err) = added {
            println!(
                " ... ERROR when adding task {task_id} to project {project_id} {:?}",
                err
            );
            return false;
        }
        let Some(section_id) = section_id else {
            return true;
        };
        println!(" ... move task {task_id} to section {section_id}");
        match self
            .post_json::<serde_json::Value>(
                &format!("/sections/{section_id}/addTask"),
                &json!({ "task": task_id }),
            )
            .await
        {
            Ok(_) => true,
            Err(err) => {
                println!(
                    " ... ERROR when moving task {task_id} to section {section_id} {:?}",
                    err
                );
                false
            }
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        match self
            .get_json::<Task>(&format!(
                "/tasks/{task_id}?opt_fields=name,notes,completed,permalink_url"
            ))
            .await
        {
            Ok(task) => Some(task),
            Err(err) => {
                println!(" ... ERROR when retrieving task {task_id} {:?}", err);
                None
            }
        }
    }

    pub async fn get_subtasks(&self, task_id: &str) -> Vec<Subtask> {
        match self
            .get_json::<Vec<Subtask>>(&format!(
                "/tasks/{task_id}/subtasks?opt_fields=name,notes,completed"
            ))
            .await
        {
            Ok(subtasks) => subtasks,
            Err(err) => {
                println!(" ... ERROR when listing subtasks of {task_id} {:?}", err);
                Vec::new()
            }
        }
    }

    pub async fn get_stories(&self, task_id: &str) -> Vec<Story> {
        match self
            .get_json::<Vec<Story>>(&format!("/tasks/{task_id}/stories"))
            .await
        {
            Ok(stories) => stories,
            Err(err) => {
                println!(" ... ERROR when listing stories of {task_id} {:?}", err);
                Vec::new()
            }
        }
    }

    pub async fn get_project_tasks(&self, project_id: &str) -> Vec<TaskCompact> {
        match self
            .get_json::<Vec<TaskCompact>>(&format!("/projects/{project_id}/tasks"))
            .await
        {
            Ok(tasks) => tasks,
            Err(err) => {
                println!(" ... ERROR when listing tasks of project {project_id} {:?}", err);
                Vec::new()
            }
        }
    }

    /// Whether the task belongs to any of the given projects. A failed
    /// lookup returns `false` so the default action (autoclose) proceeds;
    /// the check fails open.
    pub async fn is_in_no_autoclose_projects(
        &self,
        task_id: &str,
        no_autoclose: &HashSet<String>,
    ) -> bool {
        if no_autoclose.is_empty() {
            return false;
        }
        match self
            .get_json::<Vec<TaskCompact>>(&format!("/tasks/{task_id}/projects"))
            .await
        {
            Ok(projects) => projects.iter().any(|p| no_autoclose.contains(&p.gid)),
            Err(err) => {
                println!(
                    " ... ERROR when listing projects of {task_id}, allowing autoclose {:?}",
                    err
                );
                false
            }
        }
    }
}
