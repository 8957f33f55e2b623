mod asana;
mod config;
mod errors;
mod handlers;
mod host;
mod mattermost;
mod task_refs;

use clap::Parser;

use crate::errors::{Result, SyncError};

#[derive(Parser)]
#[command(about = "Synchronize GitHub pull requests and issues with Asana tasks.", long_about = None)]
struct Args {
    /// The operation to run. Falls back to the `action` input.
    #[arg(long)]
    action: Option<String>,
    /// Print changes/edits instead of calling the remote APIs.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum GitHubEvent {
    Issues,
    IssueComment,
    PullRequest,
    PullRequestReview,
}

/// Everything a handler needs from the invocation: the GitHub event
/// payload, the event name, the environment configuration and the dry-run
/// flag. Built once in `main`; handlers never read ambient event state.
pub struct Context {
    pub payload: serde_json::Value,
    pub event: Option<GitHubEvent>,
    pub config: config::Config,
    pub dry_run: bool,
}

impl Context {
    fn from_env(dry_run: bool) -> Self {
        let payload = std::env::var("GITHUB_EVENT_PATH")
            .ok()
            .and_then(|path| std::fs::File::open(path).ok())
            .and_then(|file| serde_json::from_reader(file).ok())
            .unwrap_or(serde_json::Value::Null);
        let event = std::env::var("GITHUB_EVENT_NAME")
            .ok()
            .and_then(|name| name.parse().ok());
        Self {
            payload,
            event,
            config: config::Config::from_env(),
            dry_run,
        }
    }

    pub fn pull_request(&self) -> Result<&serde_json::Value> {
        let pr = &self.payload["pull_request"];
        if pr.is_null() {
            return Err(SyncError::MissingEventContext("pull_request"));
        }
        Ok(pr)
    }

    pub fn issue(&self) -> Result<&serde_json::Value> {
        let issue = &self.payload["issue"];
        if issue.is_null() {
            return Err(SyncError::MissingEventContext("issue"));
        }
        Ok(issue)
    }

    pub fn asana(&self) -> Result<asana::AsanaClient> {
        let token = host::get_required_input("asana-pat")?;
        Ok(asana::AsanaClient::new(token, self.dry_run))
    }

    pub fn github(&self) -> Result<octocrab::Octocrab> {
        Ok(util::get_octocrab(host::get_input("github-pat"))?)
    }

    pub fn mattermost(&self) -> Result<mattermost::MattermostClient> {
        let url = self
            .config
            .mattermost_url
            .as_deref()
            .ok_or(SyncError::MissingEnv("MATTERMOST_URL"))?;
        let token = host::get_required_input("mattermost-token")?;
        Ok(mattermost::MattermostClient::new(url, token, self.dry_run))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "kebab-case")]
enum Action {
    CreateAsanaIssueTask,
    NotifyPrApproved,
    NotifyPrMerged,
    CheckPrMembership,
    AddAsanaComment,
    AddTaskAsanaProject,
    CreateAsanaPrTask,
    CreatePrTask,
    GetLatestRepoRelease,
    CreateAsanaTask,
    AddTaskPrDescription,
    GetAsanaUserId,
    FindAsanaTaskId,
    FindAsanaTaskIds,
    PostCommentAsanaTask,
    SendMattermostMessage,
    GetAsanaTaskPermalink,
    MarkAsanaTaskComplete,
    AsanaPrSync,
}

async fn run(ctx: &Context, action: Action) -> Result<()> {
    match action {
        Action::CreateAsanaIssueTask => handlers::create_issue_task(ctx).await,
        Action::NotifyPrApproved => handlers::notify_pr_approved(ctx).await,
        Action::NotifyPrMerged => handlers::notify_pr_merged(ctx).await,
        Action::CheckPrMembership => handlers::check_pr_membership(ctx).await,
        Action::AddAsanaComment => handlers::add_comment_to_pr_task(ctx).await,
        Action::AddTaskAsanaProject => handlers::add_task_to_asana_project(ctx).await,
        Action::CreateAsanaPrTask | Action::CreatePrTask => {
            handlers::pr_sync::create_pr_task(ctx).await
        }
        Action::GetLatestRepoRelease => handlers::get_latest_repository_release(ctx).await,
        Action::CreateAsanaTask => handlers::create_asana_task(ctx).await,
        Action::AddTaskPrDescription => handlers::add_task_pr_description(ctx).await,
        Action::GetAsanaUserId => handlers::get_asana_user_id(ctx).await,
        Action::FindAsanaTaskId => handlers::find_asana_task_id(ctx).await,
        Action::FindAsanaTaskIds => handlers::find_asana_task_ids(ctx).await,
        Action::PostCommentAsanaTask => handlers::post_comment_asana_task(ctx).await,
        Action::SendMattermostMessage => handlers::send_mattermost_message(ctx).await,
        Action::GetAsanaTaskPermalink => handlers::get_asana_task_permalink(ctx).await,
        Action::MarkAsanaTaskComplete => handlers::mark_asana_task_complete(ctx).await,
        Action::AsanaPrSync => handlers::pr_sync::sync(ctx).await,
    }
}

async fn dispatch(ctx: &Context, action_arg: Option<String>) -> Result<()> {
    let raw = match action_arg {
        Some(action) => action,
        None => host::get_required_input("action")?,
    };
    tracing::info!(action = %raw, "calling");
    let action = raw
        .parse::<Action>()
        .map_err(|_| SyncError::UnexpectedAction(raw.clone()))?;
    run(ctx, action).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let ctx = Context::from_env(args.dry_run);
    if let Err(err) = dispatch(&ctx, args.action).await {
        tracing::error!(error = %err, "action failed");
        host::set_failed(&err.to_string());
        std::process::exit(1);
    }
}
