//! Minimal Mattermost client: resolve a channel by name within a team,
//! post a message to it.

use serde::Deserialize;
use serde_json::json;

use crate::errors::Result;

#[derive(Clone)]
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    dry_run: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl MattermostClient {
    pub fn new(base_url: &str, token: String, dry_run: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            dry_run,
        }
    }

    /// Look up a channel by name within a team. Any failure (including an
    /// unknown channel) comes back as `None`; the caller treats a missing
    /// channel as fatal for the send.
    pub async fn channel_by_name(&self, team_id: &str, name: &str) -> Option<Channel> {
        let url = format!(
            "{}/api/v4/teams/{team_id}/channels/name/{name}",
            self.base_url
        );
        let resp = match self.http.get(url).bearer_auth(&self.token).send().await {
            Ok(resp) => resp,
            Err(err) => {
                println!(" ... ERROR when looking up channel {name} {:?}", err);
                return None;
            }
        };
        if !resp.status().is_success() {
            println!(" ... channel lookup for {name} returned {}", resp.status());
            return None;
        }
        match resp.json::<Channel>().await {
            Ok(channel) => Some(channel),
            Err(err) => {
                println!(" ... ERROR when decoding channel {name} {:?}", err);
                None
            }
        }
    }

    pub async fn create_post(&self, channel_id: &str, message: &str) -> Result<()> {
        println!("sending message to channel {channel_id}");
        if self.dry_run {
            return Ok(());
        }
        self.http
            .post(format!("{}/api/v4/posts", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "channel_id": channel_id, "message": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
