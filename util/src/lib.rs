#[derive(Clone, Debug)]
pub struct Slug {
    pub owner: String,
    pub repo: String,
}

impl Slug {
    pub fn str(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl std::str::FromStr for Slug {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Format: a/b
        let err = "Wrong format, see --help.";
        let mut it_slug = s.split('/');
        let res = Self {
            owner: it_slug.next().ok_or(err)?.to_string(),
            repo: it_slug.next().ok_or(err)?.to_string(),
        };
        if res.owner.is_empty() || res.repo.is_empty() {
            return Err(err);
        }
        if it_slug.next().is_none() {
            return Ok(res);
        }
        Err(err)
    }
}

/// Split a comma separated action input into trimmed, non-empty items.
pub fn csv_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(feature = "github")]
pub fn get_octocrab(token: Option<String>) -> octocrab::Result<octocrab::Octocrab> {
    let build = octocrab::Octocrab::builder();
    match token {
        Some(tok) => build.personal_token(tok),
        None => build,
    }
    .build()
}
