use std::fmt;

use crate::GithubContentError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// `owner/name` pair identifying a GitHub repository.
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Result<Self, GithubContentError> {
        let invalid = || GithubContentError::InvalidRepo {
            raw: raw.to_string(),
        };
        let trimmed = raw.trim().trim_end_matches(".git");
        let (owner, name) = trimmed.split_once('/').ok_or_else(invalid)?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
