//! Remote repository listing
//!
//! This module turns the cursor-paginated Bitbucket repository listing into a
//! lazy stream of [`RemoteDescriptor`]s. Transport and authentication live behind
//! the [`RemoteApi`] trait so the pagination logic can be exercised without a
//! network.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ListingError;

/// Page size requested from the listing endpoint (the API maximum).
const PAGE_LEN: u32 = 100;

/// Source control backend advertised by the remote for a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteScm {
    Git,
    Mercurial,
    /// A tag this tool does not know how to mirror; kept so the failure is
    /// reported per repository instead of aborting the listing.
    Unsupported(String),
}

impl RemoteScm {
    /// Map the `scm` tag of an API repository object
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "git" => RemoteScm::Git,
            "hg" | "mercurial" => RemoteScm::Mercurial,
            _ => RemoteScm::Unsupported(tag.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteScm::Git => "git",
            RemoteScm::Mercurial => "hg",
            RemoteScm::Unsupported(tag) => tag,
        }
    }
}

impl fmt::Display for RemoteScm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hosted repository, as produced by the lister
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub scm: RemoteScm,

    /// Owning account or workspace (e.g., "atlassian")
    pub owner: String,

    /// Repository slug (e.g., "python-bitbucket")
    pub slug: String,

    /// `owner/slug`
    pub full_name: String,
}

impl RemoteDescriptor {
    pub fn new(scm: RemoteScm, owner: impl Into<String>, slug: impl Into<String>) -> Self {
        let owner = owner.into();
        let slug = slug.into();
        let full_name = format!("{}/{}", owner, slug);

        Self {
            scm,
            owner,
            slug,
            full_name,
        }
    }
}

/// Authenticated access to the remote JSON API
///
/// Implementations return the decoded body of a successful GET and map every
/// non-success status to an error; the lister treats any error as fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, ListingError>;
}

// Wire format of the listing endpoint

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    values: Vec<RawRepository>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    #[serde(default)]
    scm: String,
    slug: String,
    full_name: Option<String>,
    owner: Option<RawAccount>,
    workspace: Option<RawWorkspace>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    username: Option<String>,
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWorkspace {
    slug: Option<String>,
}

impl RawRepository {
    fn into_descriptor(self) -> RemoteDescriptor {
        let from_full_name = self
            .full_name
            .as_deref()
            .and_then(|name| name.split_once('/'))
            .map(|(owner, _)| owner.to_string());

        let owner = self
            .workspace
            .and_then(|w| w.slug)
            .or_else(|| self.owner.and_then(|o| o.username.or(o.nickname)))
            .or(from_full_name)
            .unwrap_or_default();

        let mut descriptor =
            RemoteDescriptor::new(RemoteScm::from_tag(&self.scm), owner, self.slug);
        if let Some(full_name) = self.full_name {
            descriptor.full_name = full_name;
        }
        descriptor
    }
}

/// Where the pagination walk currently stands
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Walks the paginated repository listing of one account or owner
pub struct RepositoryLister<A: ?Sized> {
    api: Arc<A>,
    api_url: String,
    owner_filter: Option<String>,
}

impl<A: RemoteApi + ?Sized> RepositoryLister<A> {
    /// Create a lister; an empty owner filter means "everything the account can see"
    pub fn new(api: Arc<A>, api_url: impl Into<String>, owner_filter: Option<String>) -> Self {
        let owner_filter = owner_filter
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty());

        Self {
            api,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner_filter,
        }
    }

    pub fn owner_filter(&self) -> Option<&str> {
        self.owner_filter.as_deref()
    }

    /// Lazily list every repository, page by page
    ///
    /// Pages are requested only as the stream is polled. The stream yields an
    /// error and then ends as soon as any request fails.
    pub fn list(&self) -> impl Stream<Item = Result<RemoteDescriptor, ListingError>> + Send + '_ {
        let pages = stream::try_unfold(Cursor::Start, move |cursor| async move {
            let url = match cursor {
                Cursor::Start => self.first_page_url().await?,
                Cursor::Next(url) => url,
                Cursor::Done => return Ok(None),
            };

            let page = self.fetch_page(&url).await?;
            debug!("Fetched {} repositories from {}", page.values.len(), url);

            let next = match page.next {
                Some(next) if next != url => Cursor::Next(next),
                _ => Cursor::Done,
            };

            Ok::<_, ListingError>(Some((page.values, next)))
        });

        pages
            .map_ok(|values| {
                stream::iter(
                    values
                        .into_iter()
                        .map(|raw| Ok::<_, ListingError>(raw.into_descriptor())),
                )
            })
            .try_flatten()
            .try_filter(move |repo| future::ready(self.matches_owner(repo)))
    }

    /// Drain [`list`](Self::list) into memory, failing if any page fails
    pub async fn collect(&self) -> Result<Vec<RemoteDescriptor>, ListingError> {
        let repositories: Vec<RemoteDescriptor> = self.list().try_collect().await?;
        info!("Listed {} repositories", repositories.len());
        Ok(repositories)
    }

    fn matches_owner(&self, repo: &RemoteDescriptor) -> bool {
        match &self.owner_filter {
            Some(owner) => repo.owner.eq_ignore_ascii_case(owner),
            None => true,
        }
    }

    async fn first_page_url(&self) -> Result<String, ListingError> {
        if let Some(owner) = &self.owner_filter {
            return Ok(format!(
                "{}/repositories/{}?pagelen={}",
                self.api_url, owner, PAGE_LEN
            ));
        }

        let username = self.resolve_username().await?;
        Ok(format!(
            "{}/repositories/{}?role=member&pagelen={}",
            self.api_url, username, PAGE_LEN
        ))
    }

    async fn resolve_username(&self) -> Result<String, ListingError> {
        #[derive(Deserialize)]
        struct User {
            username: Option<String>,
            nickname: Option<String>,
        }

        let url = format!("{}/user", self.api_url);
        let value = self.api.get_json(&url).await?;
        let user: User =
            serde_json::from_value(value).map_err(|source| ListingError::Decode { url, source })?;

        let username = user
            .username
            .or(user.nickname)
            .filter(|name| !name.is_empty())
            .ok_or(ListingError::MissingUsername)?;

        info!("Authenticated as Bitbucket user: {}", username);
        Ok(username)
    }

    async fn fetch_page(&self, url: &str) -> Result<Page, ListingError> {
        let value = self.api.get_json(url).await?;
        serde_json::from_value(value).map_err(|source| ListingError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
