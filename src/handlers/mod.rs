pub mod pr_sync;

use std::collections::HashMap;

use crate::asana::{AsanaClient, TaskDescriptor};
use crate::errors::{Result, SyncError};
use crate::host;
use crate::task_refs::{find_task_references, TaskReference};
use crate::Context;

/// Task references found in the pull request body, honoring the
/// `trigger-phrase` and optional `asana-project` filter inputs.
fn trigger_matched_tasks(ctx: &Context) -> Result<Vec<TaskReference>> {
    let pr = ctx.pull_request()?;
    let body = pr["body"].as_str().unwrap_or_default();
    let trigger = host::get_input("trigger-phrase").unwrap_or_default();
    let filter = host::get_input("asana-project");
    println!("looking for asana task links in body (trigger-phrase: {trigger:?})");
    Ok(find_task_references(body, &trigger, filter.as_deref()))
}

/// Parse the `asana-task-custom-fields` JSON object input. Invalid JSON is
/// logged and the custom fields are omitted, not fatal.
pub(crate) fn parse_custom_fields(
    input: Option<String>,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let raw = input?;
    match serde_json::from_str(&raw) {
        Ok(fields) => Some(fields),
        Err(err) => {
            println!(" ... ERROR invalid custom fields JSON, ignoring {:?}", err);
            None
        }
    }
}

pub async fn create_issue_task(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let issue = ctx.issue()?;
    let project_id = host::get_required_input("asana-project")?;
    let title = issue["title"].as_str().ok_or(SyncError::KeyNotFound)?;
    let body = issue["body"].as_str().unwrap_or_default();
    let html_url = issue["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;

    println!("creating asana task from issue: {title}");
    let desc = TaskDescriptor {
        name: format!("Github Issue: {title}"),
        notes: format!("Description: {body}"),
        project_id,
        ..TaskDescriptor::default()
    };
    if let Some(task) = asana.create_task(&desc).await {
        asana
            .create_story(&task.gid, &format!("Link to Issue: {html_url}"), true)
            .await;
    }
    Ok(())
}

pub async fn notify_pr_approved(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let pr = ctx.pull_request()?;
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;
    let comment = format!("PR: {html_url} has been approved");
    for task in trigger_matched_tasks(ctx)? {
        asana.create_story(&task.task_id, &comment, false).await;
    }
    Ok(())
}

pub async fn notify_pr_merged(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let is_complete = host::get_bool_input("is-complete");
    for task in trigger_matched_tasks(ctx)? {
        asana.mark_complete(&task.task_id, is_complete).await;
    }
    Ok(())
}

pub async fn check_pr_membership(ctx: &Context) -> Result<()> {
    let pr = ctx.pull_request()?;
    let org = pr["base"]["repo"]["owner"]["login"]
        .as_str()
        .ok_or(SyncError::KeyNotFound)?;
    let user = pr["user"]["login"].as_str().ok_or(SyncError::KeyNotFound)?;
    let head = pr["head"]["user"]["login"]
        .as_str()
        .ok_or(SyncError::KeyNotFound)?;

    println!("PR opened/reopened by {user}, checking membership in {org}");
    let external = head != org;
    println!(
        "{user} {} to {org}",
        if external { "does not belong" } else { "belongs" }
    );
    host::set_output("external", if external { "true" } else { "false" });
    Ok(())
}

pub async fn add_comment_to_pr_task(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let pr = ctx.pull_request()?;
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;
    let is_pinned = host::get_bool_input("is-pinned");
    let comment = format!("PR: {html_url}");
    for task in trigger_matched_tasks(ctx)? {
        asana.create_story(&task.task_id, &comment, is_pinned).await;
    }
    Ok(())
}

pub async fn add_task_to_asana_project(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let project_id = host::get_required_input("asana-project")?;
    let section_id = host::get_input("asana-section");
    let task_ids = host::get_list_input("asana-task-id");
    if task_ids.is_empty() {
        return Err(SyncError::NoValidTaskIds);
    }

    let mut success = true;
    for task_id in &task_ids {
        if !asana
            .add_task_to_project(task_id, &project_id, section_id.as_deref())
            .await
        {
            success = false;
        }
    }
    if success {
        Ok(())
    } else {
        Err(SyncError::TasksUpdateFailed)
    }
}

pub async fn get_latest_repository_release(ctx: &Context) -> Result<()> {
    let github = ctx.github()?;
    let org = host::get_required_input("github-org")?;
    let repo = host::get_required_input("github-repository")?;

    match github.repos(&org, &repo).releases().get_latest().await {
        Ok(release) => {
            println!("{repo} latest version is {}", release.tag_name);
            host::set_output("version", &release.tag_name);
            Ok(())
        }
        Err(err) => {
            println!("{repo} can't find latest version {:?}", err);
            Err(SyncError::ReleaseNotFound(repo))
        }
    }
}

pub async fn create_asana_task(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let desc = TaskDescriptor {
        project_id: host::get_required_input("asana-project")?,
        section_id: host::get_input("asana-section"),
        name: host::get_required_input("asana-task-name")?,
        notes: host::get_required_input("asana-task-description")?,
        tags: host::get_list_input("asana-tags"),
        followers: host::get_list_input("asana-collaborators"),
        assignee: host::get_input("asana-task-assignee"),
        custom_fields: parse_custom_fields(host::get_input("asana-task-custom-fields")),
        due_on: None,
    };

    match asana.create_task(&desc).await {
        Some(task) => {
            host::set_output("taskId", &task.gid);
            host::set_output("duplicate", if task.duplicate { "true" } else { "false" });
        }
        None => {
            host::set_output("taskId", "0");
            host::set_output("duplicate", "false");
        }
    }
    Ok(())
}

pub async fn add_task_pr_description(ctx: &Context) -> Result<()> {
    let github = ctx.github()?;
    let org = host::get_required_input("github-org")?;
    let repo = host::get_required_input("github-repository")?;
    let pr_input = host::get_required_input("github-pr")?;
    let pr_number: u64 = pr_input
        .parse()
        .map_err(|_| SyncError::InvalidPullRequestNumber(pr_input))?;
    let project_id = host::get_required_input("asana-project")?;
    let task_id = host::get_required_input("asana-task-id")?;

    let pull = github.pulls(&org, &repo).get(pr_number).await?;
    let body = pull.body.unwrap_or_default();
    let task_link = format!("Task/Issue URL: https://app.asana.com/0/{project_id}/{task_id}/f");
    let updated = format!("{task_link}\n\n-----\n{body}");

    println!("updating description of {org}/{repo}#{pr_number}");
    if !ctx.dry_run {
        github
            .pulls(&org, &repo)
            .update(pr_number)
            .body(updated.as_str())
            .send()
            .await?;
    }
    Ok(())
}

/// Fetch and decode `user_map.yml` (GitHub login to Asana user gid) from
/// the configured repository.
pub(crate) async fn fetch_user_map(
    github: &octocrab::Octocrab,
    slug: &util::Slug,
) -> Result<HashMap<String, String>> {
    println!("fetching user_map.yml from {}", slug.str());
    let content = github
        .repos(&slug.owner, &slug.repo)
        .get_content()
        .path("user_map.yml")
        .send()
        .await?;
    let raw = content
        .items
        .first()
        .and_then(|item| item.decoded_content())
        .ok_or(SyncError::UserMapUnreadable)?;
    Ok(serde_yaml::from_str(&raw)?)
}

pub async fn get_asana_user_id(ctx: &Context) -> Result<()> {
    let github = ctx.github()?;
    let username = match host::get_input("github-username") {
        Some(username) => username,
        None => ctx.pull_request()?["user"]["login"]
            .as_str()
            .ok_or(SyncError::KeyNotFound)?
            .to_string(),
    };
    let slug = ctx
        .config
        .user_map_repo
        .clone()
        .ok_or(SyncError::MissingEnv("USER_MAP_REPO"))?;

    println!("looking up asana user id for {username}");
    let user_map = fetch_user_map(&github, &slug).await?;
    match user_map.get(&username) {
        Some(gid) => {
            host::set_output("asanaUserId", gid);
            Ok(())
        }
        None => Err(SyncError::UserNotInMap(username)),
    }
}

pub async fn find_asana_task_id(ctx: &Context) -> Result<()> {
    let tasks = trigger_matched_tasks(ctx)?;
    match tasks.first() {
        Some(task) => {
            host::set_output("asanaTaskId", &task.task_id);
            Ok(())
        }
        None => Err(SyncError::NoTaskFound),
    }
}

pub async fn find_asana_task_ids(ctx: &Context) -> Result<()> {
    let tasks = trigger_matched_tasks(ctx)?;
    if tasks.is_empty() {
        return Err(SyncError::NoTasksFound);
    }
    let ids = tasks
        .iter()
        .map(|t| t.task_id.as_str())
        .collect::<Vec<_>>()
        .join(",");
    host::set_output("asanaTaskIds", &ids);
    Ok(())
}

/// Comment on every task in the list. All tasks are attempted; the run
/// fails afterwards if any single post failed.
pub(crate) async fn post_comments(
    asana: &AsanaClient,
    task_ids: &[String],
    text: &str,
    is_pinned: bool,
) -> Result<()> {
    let mut success = true;
    for task_id in task_ids {
        println!("adding comment to asana task {task_id}");
        if asana.create_story(task_id, text, is_pinned).await.is_none() {
            success = false;
        }
    }
    if success {
        println!("comments added to {} asana task(s)", task_ids.len());
        Ok(())
    } else {
        Err(SyncError::CommentsFailed)
    }
}

pub async fn post_comment_asana_task(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let task_ids = host::get_list_input("asana-task-id");
    if task_ids.is_empty() {
        return Err(SyncError::NoValidTaskIds);
    }
    let comment = host::get_input("asana-task-comment").unwrap_or_default();
    let is_pinned = host::get_bool_input("asana-task-comment-pinned");
    post_comments(&asana, &task_ids, &comment, is_pinned).await
}

pub async fn send_mattermost_message(ctx: &Context) -> Result<()> {
    let channel_name = host::get_required_input("mattermost-channel-name")?;
    let team_id = host::get_required_input("mattermost-team-id")?;
    let message = host::get_required_input("mattermost-message")?;
    let mattermost = ctx.mattermost()?;

    match mattermost.channel_by_name(&team_id, &channel_name).await {
        Some(channel) => {
            println!("channel {} found", channel.id);
            mattermost
                .create_post(&channel.id, &message)
                .await
                .map_err(|err| {
                    println!(" ... ERROR sending message {:?}", err);
                    SyncError::MessageSendFailed
                })
        }
        None => Err(SyncError::ChannelNotFound(channel_name)),
    }
}

pub async fn get_asana_task_permalink(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let task_id = host::get_required_input("asana-task-id")?;
    match asana.get_task(&task_id).await {
        Some(task) => {
            host::set_output("asanaTaskPermalink", &task.permalink_url);
            Ok(())
        }
        None => Err(SyncError::TaskRetrieveFailed(task_id)),
    }
}

pub async fn mark_asana_task_complete(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let task_ids = host::get_list_input("asana-task-id");
    if task_ids.is_empty() {
        return Err(SyncError::NoValidTaskIds);
    }
    let is_complete = host::get_bool_input("is-complete");

    let mut success = true;
    for task_id in &task_ids {
        if !asana.mark_complete(task_id, is_complete).await {
            success = false;
        }
    }
    if success {
        Ok(())
    } else {
        Err(SyncError::TasksUpdateFailed)
    }
}
