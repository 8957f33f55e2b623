use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Everything a handler can fail with. The `Display` strings of the
/// semantic variants are what the workflow run reports through the
/// failure channel.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("GitHub Error {0}")]
    GitHubError(#[from] octocrab::Error),
    #[error("HTTP Error {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("YAML Error {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Key not found")]
    KeyNotFound,
    #[error("no {0} in event payload")]
    MissingEventContext(&'static str),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("Input required and not supplied: {0}")]
    MissingInput(String),
    #[error("Invalid pull request number {0}")]
    InvalidPullRequestNumber(String),
    #[error("unexpected action {0}")]
    UnexpectedAction(String),
    #[error("No valid task IDs provided")]
    NoValidTaskIds,
    #[error("Can't find an Asana task with the expected prefix")]
    NoTaskFound,
    #[error("Can't find any Asana tasks with the expected prefix")]
    NoTasksFound,
    #[error("User {0} not found in user map")]
    UserNotInMap(String),
    #[error("user map is missing or not decodable")]
    UserMapUnreadable,
    #[error("Channel \"{0}\" not found.")]
    ChannelNotFound(String),
    #[error("Error sending message")]
    MessageSendFailed,
    #[error("can't find latest version for {0}")]
    ReleaseNotFound(String),
    #[error("task could not be created in project {0}")]
    TaskCreateFailed(String),
    #[error("Failed to retrieve task {0}")]
    TaskRetrieveFailed(String),
    #[error("Failed to post comments to one or more Asana tasks")]
    CommentsFailed,
    #[error("Failed to update one or more Asana tasks")]
    TasksUpdateFailed,
}
