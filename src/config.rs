use std::collections::HashSet;

/// Configuration sourced from the workflow environment rather than action
/// inputs. Everything is optional at load time; handlers validate what
/// they actually need.
pub struct Config {
    /// Asana project gids whose subtasks must never be auto-completed.
    pub no_autoclose_projects: HashSet<String>,
    /// Base URL of the Mattermost instance, e.g. `https://chat.example.com`.
    pub mattermost_url: Option<String>,
    /// `owner/repo` of the repository holding `user_map.yml`.
    pub user_map_repo: Option<util::Slug>,
}

impl Config {
    pub fn from_env() -> Self {
        let no_autoclose_projects = std::env::var("NO_AUTOCLOSE_PROJECTS")
            .map(|v| util::csv_list(&v).into_iter().collect())
            .unwrap_or_default();
        let mattermost_url = std::env::var("MATTERMOST_URL")
            .ok()
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());
        let user_map_repo = std::env::var("USER_MAP_REPO")
            .ok()
            .and_then(|v| v.parse().ok());
        Self {
            no_autoclose_projects,
            mattermost_url,
            user_map_repo,
        }
    }
}
