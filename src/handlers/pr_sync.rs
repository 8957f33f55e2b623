//! Pull-request lifecycle sync: one Asana task per pull request, one
//! review subtask per requested reviewer, resolved as reviews come in.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::json;

use crate::asana::{AsanaClient, Subtask, TaskDescriptor};
use crate::errors::{Result, SyncError};
use crate::host;
use crate::task_refs::find_task_references;
use crate::{Context, GitHubEvent};

const REVIEW_PREFIX: &str = "Review: ";
const REVIEW_SUFFIXES: [&str; 2] = [" (changes requested)", " (commented)"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
}

/// Inputs shared by the sync flows.
pub struct ReviewOptions {
    pub project_id: String,
    pub section_id: Option<String>,
    pub tags: Vec<String>,
    pub collaborators: Vec<String>,
    pub trigger_phrase: String,
    pub assignee: Option<String>,
    pub custom_fields: Option<serde_json::Map<String, serde_json::Value>>,
    pub state_field: Option<String>,
    pub due_in_days: i64,
}

impl ReviewOptions {
    fn from_inputs() -> Result<Self> {
        Ok(Self {
            project_id: host::get_required_input("asana-project")?,
            section_id: host::get_input("asana-section"),
            tags: host::get_list_input("asana-tags"),
            collaborators: host::get_list_input("asana-collaborators"),
            trigger_phrase: host::get_input("trigger-phrase").unwrap_or_default(),
            assignee: host::get_input("asana-task-assignee"),
            custom_fields: super::parse_custom_fields(host::get_input(
                "asana-task-custom-fields",
            )),
            state_field: host::get_input("asana-pr-state-field"),
            due_in_days: host::get_input("review-due-days")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        })
    }
}

pub struct SubtaskOutcome {
    pub login: String,
    pub gid: Option<String>,
}

pub struct PrTaskOutcome {
    pub task_gid: String,
    pub parent_gid: Option<String>,
    pub subtasks: Vec<SubtaskOutcome>,
}

/// Entry point of the `asana-pr-sync` meta action: dispatch on the GitHub
/// event name and its `action` field.
pub async fn sync(ctx: &Context) -> Result<()> {
    let event = ctx.event.ok_or(SyncError::MissingEnv("GITHUB_EVENT_NAME"))?;
    let action = ctx.payload["action"]
        .as_str()
        .ok_or(SyncError::KeyNotFound)?;
    println!("Handling: {event}::{action}");
    match event {
        GitHubEvent::PullRequest => match action {
            "opened" => create_pr_task(ctx).await,
            "edited" => edited(ctx).await,
            "closed" => closed(ctx).await,
            "review_requested" | "assigned" => review_requested(ctx).await,
            _ => Ok(()),
        },
        GitHubEvent::PullRequestReview if action == "submitted" => review_submitted(ctx).await,
        _ => Ok(()),
    }
}

/// Create the tracking task for a pull request, link it under a referenced
/// task when the body names one, and spawn the per-reviewer subtasks.
/// Also serves the `create-pr-task`/`create-asana-pr-task` actions.
pub async fn create_pr_task(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let opts = ReviewOptions::from_inputs()?;
    let pr = ctx.pull_request()?;
    let user_map = load_user_map(ctx).await;
    let today = chrono::Utc::now().date_naive();

    let outcome = open_pull_request(&asana, &opts, pr, user_map.as_ref(), today).await?;
    let created = outcome.subtasks.iter().filter(|s| s.gid.is_some()).count();
    println!(
        "created {created}/{} review subtask(s) for task {}",
        outcome.subtasks.len(),
        outcome.task_gid
    );
    host::set_output("asanaTaskId", &outcome.task_gid);
    if let Some(parent) = &outcome.parent_gid {
        host::set_output("parentTaskId", parent);
    }
    Ok(())
}

pub(crate) async fn open_pull_request(
    asana: &AsanaClient,
    opts: &ReviewOptions,
    pr: &serde_json::Value,
    user_map: Option<&HashMap<String, String>>,
    today: NaiveDate,
) -> Result<PrTaskOutcome> {
    let title = pr["title"].as_str().ok_or(SyncError::KeyNotFound)?;
    let body = pr["body"].as_str().unwrap_or_default();
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;

    println!("creating asana task from pull request: {title}");
    let desc = TaskDescriptor {
        name: format!("Github PR: {title}"),
        notes: format!("Description: {body}"),
        project_id: opts.project_id.clone(),
        section_id: opts.section_id.clone(),
        tags: opts.tags.clone(),
        followers: opts.collaborators.clone(),
        assignee: opts.assignee.clone(),
        custom_fields: opts.custom_fields.clone(),
        due_on: None,
    };
    let task = asana
        .create_task(&desc)
        .await
        .ok_or_else(|| SyncError::TaskCreateFailed(opts.project_id.clone()))?;
    asana
        .create_story(&task.gid, &format!("Link to Pull Request: {html_url}"), true)
        .await;

    // Link under the first referenced task when the body names one.
    let parent_gid = match find_task_references(body, &opts.trigger_phrase, None).first() {
        Some(parent) => match asana.set_parent(&task.gid, &parent.task_id).await {
            Ok(()) => Some(parent.task_id.clone()),
            Err(err) => {
                println!(
                    " ... ERROR when linking task {} under {} {:?}",
                    task.gid, parent.task_id, err
                );
                None
            }
        },
        None => None,
    };

    let logins = requested_logins(pr);
    let subtasks =
        create_review_subtasks(asana, opts, pr, &logins, user_map, &task.gid, today).await;

    Ok(PrTaskOutcome {
        task_gid: task.gid,
        parent_gid,
        subtasks,
    })
}

/// Requested reviewers, requested teams and assignees, deduplicated by
/// login with the original order kept.
pub(crate) fn requested_logins(pr: &serde_json::Value) -> Vec<String> {
    fn push_unique(logins: &mut Vec<String>, login: &str) {
        if !logins.iter().any(|l| l == login) {
            logins.push(login.to_string());
        }
    }

    let mut logins = Vec::new();
    for user in pr["requested_reviewers"].as_array().into_iter().flatten() {
        if let Some(login) = user["login"].as_str() {
            push_unique(&mut logins, login);
        }
    }
    for team in pr["requested_teams"].as_array().into_iter().flatten() {
        if let Some(slug) = team["slug"].as_str() {
            push_unique(&mut logins, slug);
        }
    }
    for user in pr["assignees"].as_array().into_iter().flatten() {
        if let Some(login) = user["login"].as_str() {
            push_unique(&mut logins, login);
        }
    }
    logins
}

pub(crate) fn review_subtask_notes(login: &str, pr_url: &str) -> String {
    format!("@{login} please review this pull request.\n\nPull Request: {pr_url}")
}

/// One review subtask per login, each linked under the pull request task.
/// A single subtask's failure is logged and recorded; the loop continues.
/// Subtasks are not deduplicated against earlier deliveries, so a reviewer
/// requested twice gets two subtasks (known gap, kept as-is).
pub(crate) async fn create_review_subtasks(
    asana: &AsanaClient,
    opts: &ReviewOptions,
    pr: &serde_json::Value,
    logins: &[String],
    user_map: Option<&HashMap<String, String>>,
    parent_gid: &str,
    today: NaiveDate,
) -> Vec<SubtaskOutcome> {
    let title = pr["title"].as_str().unwrap_or_default();
    let html_url = pr["html_url"].as_str().unwrap_or_default();
    let due = due_on(today, opts.due_in_days).format("%Y-%m-%d").to_string();

    let mut outcomes = Vec::new();
    for login in logins {
        println!("creating review subtask for {login}");
        let assignee = user_map.and_then(|map| map.get(login).cloned());
        if assignee.is_none() {
            println!(" ... no asana user mapped for {login}, leaving unassigned");
        }
        let desc = TaskDescriptor {
            name: format!("{REVIEW_PREFIX}{title}"),
            notes: review_subtask_notes(login, html_url),
            project_id: opts.project_id.clone(),
            section_id: None,
            tags: opts.tags.clone(),
            followers: Vec::new(),
            assignee,
            custom_fields: None,
            due_on: Some(due.clone()),
        };
        let Some(task) = asana.create_task(&desc).await else {
            outcomes.push(SubtaskOutcome {
                login: login.clone(),
                gid: None,
            });
            continue;
        };
        if let Err(err) = asana.set_parent(&task.gid, parent_gid).await {
            println!(
                " ... ERROR when linking review subtask {} under {} {:?}",
                task.gid, parent_gid, err
            );
            outcomes.push(SubtaskOutcome {
                login: login.clone(),
                gid: None,
            });
            continue;
        }
        asana
            .create_story(
                &task.gid,
                &format!("@{login} please review: {html_url}"),
                false,
            )
            .await;
        outcomes.push(SubtaskOutcome {
            login: login.clone(),
            gid: Some(task.gid),
        });
    }
    outcomes
}

async fn edited(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let opts = ReviewOptions::from_inputs()?;
    let pr = ctx.pull_request()?;
    let title = pr["title"].as_str().ok_or(SyncError::KeyNotFound)?;
    let body = pr["body"].as_str().unwrap_or_default();
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;

    let Some(task_gid) = find_pr_task(&asana, &opts.project_id, html_url).await else {
        println!(" ... no asana task found for {html_url}");
        return Ok(());
    };
    println!("resyncing task {task_gid} from pull request");
    asana
        .update_task(
            &task_gid,
            &json!({
                "name": format!("Github PR: {title}"),
                "notes": format!("Description: {body}"),
            }),
        )
        .await;
    Ok(())
}

async fn closed(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let opts = ReviewOptions::from_inputs()?;
    let pr = ctx.pull_request()?;
    resolve_closed_pull_request(&asana, &opts, pr, &ctx.config.no_autoclose_projects).await
}

pub(crate) async fn resolve_closed_pull_request(
    asana: &AsanaClient,
    opts: &ReviewOptions,
    pr: &serde_json::Value,
    no_autoclose: &HashSet<String>,
) -> Result<()> {
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;
    let state = pr_state(
        pr["merged"].as_bool().unwrap_or(false),
        pr["state"].as_str().unwrap_or_default() == "closed",
        pr["draft"].as_bool().unwrap_or(false),
        false,
    );
    println!("pull request closed with state {state}");

    let Some(task_gid) = find_pr_task(asana, &opts.project_id, html_url).await else {
        println!(" ... no asana task found for {html_url}");
        return Ok(());
    };
    if let Some(field) = &opts.state_field {
        let mut custom_fields = serde_json::Map::new();
        custom_fields.insert(field.clone(), json!(state));
        asana
            .update_task(&task_gid, &json!({ "custom_fields": custom_fields }))
            .await;
    }

    let mut skipped = 0;
    for subtask in asana.get_subtasks(&task_gid).await {
        if subtask.completed || !subtask.name.starts_with(REVIEW_PREFIX) {
            continue;
        }
        if asana
            .is_in_no_autoclose_projects(&subtask.gid, no_autoclose)
            .await
        {
            println!(
                " ... skipping {}: autoclose disabled for its project",
                subtask.gid
            );
            skipped += 1;
            continue;
        }
        asana.mark_complete(&subtask.gid, true).await;
    }
    if skipped > 0 {
        println!("skipped {skipped} review subtask(s) in no-autoclose projects");
    }
    Ok(())
}

async fn review_requested(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let opts = ReviewOptions::from_inputs()?;
    let pr = ctx.pull_request()?;
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;

    // The reviewer (or assignee) named by this delivery; fall back to the
    // full current list when the payload does not single one out.
    let logins = match ctx.payload["requested_reviewer"]["login"]
        .as_str()
        .or_else(|| ctx.payload["assignee"]["login"].as_str())
    {
        Some(login) => vec![login.to_string()],
        None => requested_logins(pr),
    };

    let Some(task_gid) = find_pr_task(&asana, &opts.project_id, html_url).await else {
        println!(" ... no asana task found for {html_url}");
        return Ok(());
    };
    let user_map = load_user_map(ctx).await;
    let today = chrono::Utc::now().date_naive();
    create_review_subtasks(
        &asana,
        &opts,
        pr,
        &logins,
        user_map.as_ref(),
        &task_gid,
        today,
    )
    .await;
    Ok(())
}

async fn review_submitted(ctx: &Context) -> Result<()> {
    let asana = ctx.asana()?;
    let opts = ReviewOptions::from_inputs()?;
    let pr = ctx.pull_request()?;
    let review = &ctx.payload["review"];
    resolve_review(&asana, &opts, pr, review, &ctx.config.no_autoclose_projects).await
}

pub(crate) async fn resolve_review(
    asana: &AsanaClient,
    opts: &ReviewOptions,
    pr: &serde_json::Value,
    review: &serde_json::Value,
    no_autoclose: &HashSet<String>,
) -> Result<()> {
    let html_url = pr["html_url"].as_str().ok_or(SyncError::KeyNotFound)?;
    let login = review["user"]["login"]
        .as_str()
        .ok_or(SyncError::KeyNotFound)?;
    let raw_state = review["state"].as_str().ok_or(SyncError::KeyNotFound)?;
    let Ok(state) = raw_state.parse::<ReviewState>() else {
        println!(" ... ignoring review state {raw_state}");
        return Ok(());
    };

    let Some(task_gid) = find_pr_task(asana, &opts.project_id, html_url).await else {
        println!(" ... no asana task found for {html_url}");
        return Ok(());
    };
    let subtasks = asana.get_subtasks(&task_gid).await;
    let Some(subtask) = find_reviewer_subtask(&subtasks, login) else {
        println!(" ... no review subtask found for {login}");
        return Ok(());
    };

    match state {
        ReviewState::Approved => {
            if asana
                .is_in_no_autoclose_projects(&subtask.gid, no_autoclose)
                .await
            {
                println!(
                    " ... skipping {}: autoclose disabled for its project",
                    subtask.gid
                );
                return Ok(());
            }
            asana.mark_complete(&subtask.gid, true).await;
            asana
                .create_story(&subtask.gid, &format!("@{login} approved: {html_url}"), false)
                .await;
        }
        ReviewState::ChangesRequested => {
            asana
                .update_task(
                    &subtask.gid,
                    &json!({ "name": reviewed_name(&subtask.name, state) }),
                )
                .await;
            asana
                .create_story(
                    &subtask.gid,
                    &format!("@{login} requested changes: {html_url}"),
                    false,
                )
                .await;
        }
        ReviewState::Commented => {
            asana
                .update_task(
                    &subtask.gid,
                    &json!({ "name": reviewed_name(&subtask.name, state) }),
                )
                .await;
            asana
                .create_story(&subtask.gid, &format!("@{login} commented: {html_url}"), false)
                .await;
        }
    }
    Ok(())
}

/// Locate the task tracking a pull request by scanning every task of the
/// project for a comment containing the PR URL. O(tasks x stories); fine
/// at the scale of a single team's project.
pub(crate) async fn find_pr_task(
    asana: &AsanaClient,
    project_id: &str,
    pr_url: &str,
) -> Option<String> {
    for task in asana.get_project_tasks(project_id).await {
        for story in asana.get_stories(&task.gid).await {
            if story.text.contains(pr_url) {
                return Some(task.gid);
            }
        }
    }
    None
}

/// Match a reviewer to their review subtask. The link is textual: the
/// subtask name carries the review prefix and its notes mention `@login`.
/// Kept in one place so a structured link (e.g. a custom field holding the
/// reviewer id) can replace it without touching callers.
pub(crate) fn find_reviewer_subtask<'a>(subtasks: &'a [Subtask], login: &str) -> Option<&'a Subtask> {
    let needle = format!("@{login}");
    subtasks
        .iter()
        .find(|s| s.name.starts_with(REVIEW_PREFIX) && s.notes.contains(&needle))
}

/// Rename a review subtask after a non-approving review, replacing any
/// suffix left by an earlier review round.
pub(crate) fn reviewed_name(name: &str, state: ReviewState) -> String {
    let mut base = name;
    for suffix in REVIEW_SUFFIXES {
        base = base.strip_suffix(suffix).unwrap_or(base);
    }
    let suffix = match state {
        ReviewState::Approved => "",
        ReviewState::ChangesRequested => " (changes requested)",
        ReviewState::Commented => " (commented)",
    };
    format!("{base}{suffix}")
}

/// Final state of a pull request, written into the configured custom field.
pub(crate) fn pr_state(merged: bool, closed: bool, draft: bool, any_approved: bool) -> &'static str {
    if merged {
        "Merged"
    } else if closed {
        "Closed"
    } else if any_approved {
        "Approved"
    } else if draft {
        "Draft"
    } else {
        "Open"
    }
}

/// Add `business_days` working days to `start`, skipping weekends.
pub(crate) fn due_on(start: NaiveDate, business_days: i64) -> NaiveDate {
    let mut date = start;
    let mut remaining = business_days;
    while remaining > 0 {
        date = date.succ_opt().expect("date overflow");
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}

async fn load_user_map(ctx: &Context) -> Option<HashMap<String, String>> {
    let slug = ctx.config.user_map_repo.clone()?;
    let github = match ctx.github() {
        Ok(github) => github,
        Err(err) => {
            println!(" ... ERROR building github client {:?}", err);
            return None;
        }
    };
    match super::fetch_user_map(&github, &slug).await {
        Ok(map) => Some(map),
        Err(err) => {
            println!(
                " ... ERROR fetching user map, leaving subtasks unassigned {:?}",
                err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(project_id: &str) -> ReviewOptions {
        ReviewOptions {
            project_id: project_id.to_string(),
            section_id: None,
            tags: Vec::new(),
            collaborators: Vec::new(),
            trigger_phrase: "Closes".to_string(),
            assignee: None,
            custom_fields: None,
            state_field: None,
            due_in_days: 2,
        }
    }

    fn client(server: &MockServer) -> AsanaClient {
        AsanaClient::with_base_url("token".to_string(), &server.uri(), false)
    }

    #[test]
    fn test_due_on_skips_weekends() {
        // Tuesday.
        let start = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let expected = [
            (0, "2024-09-10"),
            (1, "2024-09-11"),
            (2, "2024-09-12"),
            (3, "2024-09-13"),
            (4, "2024-09-16"),
            (5, "2024-09-17"),
            (6, "2024-09-18"),
            (7, "2024-09-19"),
            (8, "2024-09-20"),
            (9, "2024-09-23"),
            (25, "2024-10-15"),
        ];
        for (offset, date) in expected {
            assert_eq!(due_on(start, offset).format("%Y-%m-%d").to_string(), date);
        }
    }

    #[test]
    fn test_pr_state() {
        assert_eq!(pr_state(true, true, false, false), "Merged");
        assert_eq!(pr_state(false, true, false, true), "Closed");
        assert_eq!(pr_state(false, false, false, true), "Approved");
        assert_eq!(pr_state(false, false, true, false), "Draft");
        assert_eq!(pr_state(false, false, false, false), "Open");
    }

    #[test]
    fn test_reviewed_name_replaces_suffix() {
        assert_eq!(
            reviewed_name("Review: Fix crash", ReviewState::ChangesRequested),
            "Review: Fix crash (changes requested)"
        );
        assert_eq!(
            reviewed_name(
                "Review: Fix crash (changes requested)",
                ReviewState::Commented
            ),
            "Review: Fix crash (commented)"
        );
        assert_eq!(
            reviewed_name("Review: Fix crash (commented)", ReviewState::Approved),
            "Review: Fix crash"
        );
    }

    #[test]
    fn test_requested_logins_dedup() {
        let pr = serde_json::json!({
            "requested_reviewers": [{ "login": "alice" }, { "login": "bob" }],
            "requested_teams": [{ "slug": "platform" }],
            "assignees": [{ "login": "alice" }, { "login": "carol" }],
        });
        assert_eq!(
            requested_logins(&pr),
            vec!["alice", "bob", "platform", "carol"]
        );
    }

    #[test]
    fn test_find_reviewer_subtask() {
        let subtasks = vec![
            Subtask {
                gid: "s-1".to_string(),
                name: "Unrelated".to_string(),
                notes: "@alice mentioned here".to_string(),
                completed: false,
            },
            Subtask {
                gid: "s-2".to_string(),
                name: "Review: Fix crash".to_string(),
                notes: review_subtask_notes("alice", "https://github.com/o/r/pull/1"),
                completed: false,
            },
        ];
        assert_eq!(find_reviewer_subtask(&subtasks, "alice").unwrap().gid, "s-2");
        assert!(find_reviewer_subtask(&subtasks, "mallory").is_none());
    }

    #[test]
    fn test_review_state_parsing() {
        assert_eq!(
            "changes_requested".parse::<ReviewState>().unwrap(),
            ReviewState::ChangesRequested
        );
        assert_eq!("approved".parse::<ReviewState>().unwrap(), ReviewState::Approved);
        assert!("dismissed".parse::<ReviewState>().is_err());
    }

    fn opened_pr_payload() -> serde_json::Value {
        serde_json::json!({
            "title": "Test Pull Request",
            "body": "This PR fixes bugs.",
            "html_url": "https://github.com/test-owner/test-repo/pull/123",
            "requested_reviewers": [{ "login": "alice" }],
            "assignees": [{ "login": "alice" }, { "login": "bob" }],
        })
    }

    #[tokio::test]
    async fn test_opened_without_reference_creates_task_and_subtasks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "9001", "name": "created" }
            })))
            .expect(3) // the PR task plus one subtask per deduplicated login
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/setParent"))
            .and(body_partial_json(serde_json::json!({ "data": { "parent": "9001" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "gid": "9001" }
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "story-1", "text": "" }
            })))
            .expect(3) // PR link story plus one please-review story per subtask
            .mount(&server)
            .await;

        let today = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let outcome = open_pull_request(
            &client(&server),
            &options("1111"),
            &opened_pr_payload(),
            None,
            today,
        )
        .await
        .expect("opened flow should succeed");

        assert_eq!(outcome.task_gid, "9001");
        assert!(outcome.parent_gid.is_none());
        let logins: Vec<&str> = outcome.subtasks.iter().map(|s| s.login.as_str()).collect();
        assert_eq!(logins, vec!["alice", "bob"]);
        assert!(outcome.subtasks.iter().all(|s| s.gid.is_some()));
    }

    #[tokio::test]
    async fn test_opened_links_referenced_task_as_parent() {
        let server = MockServer::start().await;
        let mut payload = opened_pr_payload();
        payload["body"] =
            serde_json::json!("Closes https://app.asana.com/0/1111/2222");
        payload["requested_reviewers"] = serde_json::json!([]);
        payload["assignees"] = serde_json::json!([]);

        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "9001", "name": "created" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "story-1", "text": "" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/setParent"))
            .and(body_partial_json(serde_json::json!({ "data": { "parent": "2222" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "gid": "9001" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let today = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let outcome = open_pull_request(&client(&server), &options("1111"), &payload, None, today)
            .await
            .expect("opened flow should succeed");
        assert_eq!(outcome.parent_gid.as_deref(), Some("2222"));
    }

    #[tokio::test]
    async fn test_approved_review_in_no_autoclose_project_is_skipped() {
        let server = MockServer::start().await;
        let pr_url = "https://github.com/test-owner/test-repo/pull/123";
        Mock::given(method("GET"))
            .and(path("/projects/1111/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "t-1", "name": "Github PR: Test Pull Request" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "story-1", "text": format!("Link to Pull Request: {pr_url}") }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/subtasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "gid": "sub-1",
                    "name": "Review: Test Pull Request",
                    "notes": "@alice please review this pull request.",
                    "completed": false
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/sub-1/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "p-guarded", "name": "Guarded" }]
            })))
            .mount(&server)
            .await;
        // The subtask must stay untouched.
        Mock::given(method("PUT"))
            .and(path("/tasks/sub-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let pr = serde_json::json!({ "html_url": pr_url });
        let review = serde_json::json!({
            "user": { "login": "alice" },
            "state": "approved",
        });
        let no_autoclose: HashSet<String> = ["p-guarded".to_string()].into_iter().collect();
        resolve_review(&client(&server), &options("1111"), &pr, &review, &no_autoclose)
            .await
            .expect("review flow should succeed");
    }

    #[tokio::test]
    async fn test_approved_review_completes_subtask() {
        let server = MockServer::start().await;
        let pr_url = "https://github.com/test-owner/test-repo/pull/123";
        Mock::given(method("GET"))
            .and(path("/projects/1111/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "t-1", "name": "Github PR: Test Pull Request" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "story-1", "text": format!("Link to Pull Request: {pr_url}") }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/subtasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "gid": "sub-1",
                    "name": "Review: Test Pull Request",
                    "notes": "@alice please review this pull request.",
                    "completed": false
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tasks/sub-1"))
            .and(body_partial_json(serde_json::json!({ "data": { "completed": true } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/sub-1/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "story-2", "text": "" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pr = serde_json::json!({ "html_url": pr_url });
        let review = serde_json::json!({
            "user": { "login": "alice" },
            "state": "approved",
        });
        // Empty no-autoclose set: membership is not even looked up.
        resolve_review(
            &client(&server),
            &options("1111"),
            &pr,
            &review,
            &HashSet::new(),
        )
        .await
        .expect("review flow should succeed");
    }

    #[tokio::test]
    async fn test_closed_pr_completes_subtasks_and_skips_guarded_projects() {
        let server = MockServer::start().await;
        let pr_url = "https://github.com/test-owner/test-repo/pull/123";
        Mock::given(method("GET"))
            .and(path("/projects/1111/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "t-1", "name": "Github PR: Test Pull Request" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/stories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "story-1", "text": format!("Link to Pull Request: {pr_url}") }]
            })))
            .mount(&server)
            .await;
        // The state custom field is written on the PR task.
        Mock::given(method("PUT"))
            .and(path("/tasks/t-1"))
            .and(body_partial_json(serde_json::json!({
                "data": { "custom_fields": { "field-1": "Merged" } }
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/t-1/subtasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "gid": "sub-1",
                        "name": "Review: Test Pull Request",
                        "notes": "@alice please review this pull request.",
                        "completed": false
                    },
                    {
                        "gid": "sub-2",
                        "name": "Review: Test Pull Request",
                        "notes": "@bob please review this pull request.",
                        "completed": false
                    }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/sub-1/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "p-guarded", "name": "Guarded" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/sub-2/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "gid": "p-open", "name": "Open" }]
            })))
            .mount(&server)
            .await;
        // Only the unguarded subtask is completed.
        Mock::given(method("PUT"))
            .and(path("/tasks/sub-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/tasks/sub-2"))
            .and(body_partial_json(serde_json::json!({ "data": { "completed": true } })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pr = serde_json::json!({
            "html_url": pr_url,
            "merged": true,
            "state": "closed",
        });
        let mut opts = options("1111");
        opts.state_field = Some("field-1".to_string());
        let no_autoclose: HashSet<String> = ["p-guarded".to_string()].into_iter().collect();
        resolve_closed_pull_request(&client(&server), &opts, &pr, &no_autoclose)
            .await
            .expect("closed flow should succeed");
    }

    #[tokio::test]
    async fn test_repeated_review_requests_duplicate_subtasks() {
        // Known gap: a reviewer requested twice gets two subtasks. This
        // asserts the current behavior so a change shows up in the tests.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "9001", "name": "created" }
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/setParent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "gid": "9001" }
            })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks/9001/stories"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "story-1", "text": "" }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let asana = client(&server);
        let opts = options("1111");
        let pr = opened_pr_payload();
        let logins = vec!["alice".to_string()];
        let today = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        for _ in 0..2 {
            let outcomes =
                create_review_subtasks(&asana, &opts, &pr, &logins, None, "pr-task", today).await;
            assert_eq!(outcomes.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_subtask_failure_does_not_abort_remaining_reviewers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "gid": "9001", "name": "created" }
            })))
            .expect(2)
            .mount(&server)
            .await;
        // Linking fails for everyone; creation must still be attempted for
        // both reviewers and both failures recorded.
        Mock::given(method("POST"))
            .and(path("/tasks/9001/setParent"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let logins = vec!["alice".to_string(), "bob".to_string()];
        let today = NaiveDate::from_ymd_opt(2024, 9, 10).unwrap();
        let outcomes = create_review_subtasks(
            &client(&server),
            &options("1111"),
            &opened_pr_payload(),
            &logins,
            None,
            "pr-task",
            today,
        )
        .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.gid.is_none()));
    }
}
