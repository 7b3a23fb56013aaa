//! GitHub organizations and users
//!
//! Members' own repositories are reported first, then the target's
//! repositories. Public repositories are checked for recent exposure:
//! created in the last day, or flipped from private to public in the last day.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use outpost_core::{Asset, AssetStatus, Capability, Error, Job, Result, Risk};
use outpost_exec::{next_link, HttpClient, HttpResponse};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::github_owner;

pub const API: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;
const EVENTS_PER_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
struct Member {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct Owner {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    html_url: String,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    owner: Owner,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type", default)]
    kind: String,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Within the last day
fn recent(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    at.map(|at| now - at <= Duration::hours(24)).unwrap_or(false)
}

pub struct Github {
    job: Job,
    asset: Asset,
    api: String,
}

impl Github {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            api: API.to_string(),
        })
    }

    /// Asset PAT first, then the injected secret
    fn token(&self) -> Option<&str> {
        self.asset
            .config
            .get("pat")
            .or_else(|| self.job.config.get("secret"))
            .map(String::as_str)
            .filter(|token| !token.is_empty())
    }

    async fn get(&self, client: &HttpClient, url: &str) -> Result<HttpResponse> {
        let authorization = self.token().map(|token| format!("Bearer {}", token));
        let mut headers = vec![("Accept", "application/vnd.github+json")];
        if let Some(authorization) = &authorization {
            headers.push(("Authorization", authorization.as_str()));
        }
        client.send(Method::GET, url, None, &headers).await?.ensure_success()
    }

    /// Each page of `url`, following `Link` headers, handed to `each`
    async fn paginate<T, F>(&self, client: &HttpClient, url: String, mut each: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(Vec<T>),
    {
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = self.get(client, &url).await?;
            each(response.json::<Vec<T>>()?);
            next = response.header("link").and_then(next_link);
        }
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, client: &HttpClient, url: String) -> Result<Vec<T>> {
        let mut all = Vec::new();
        self.paginate(client, url, |page: Vec<T>| all.extend(page)).await?;
        Ok(all)
    }

    /// Repositories members own outright
    async fn contributors(&self, client: &HttpClient, org: &str) -> Result<()> {
        let url = format!("{}/orgs/{}/members?per_page={}", self.api, org, PER_PAGE);
        let members: Vec<Member> = match self.list(client, url).await {
            Ok(members) => members,
            Err(err) => {
                debug!(org, error = %err, "members not listed");
                return Ok(());
            }
        };
        for member in members {
            let url = format!("{}/users/{}/repos?per_page={}", self.api, member.login, PER_PAGE);
            let repos: Vec<Repository> = match self.list(client, url).await {
                Ok(repos) => repos,
                Err(err) => {
                    warn!(login = %member.login, error = %err, "member repositories not listed");
                    continue;
                }
            };
            for repo in repos {
                if !repo.fork && repo.owner.login == member.login {
                    self.job.emit(Asset::new(repo.html_url, repo.name)).await?;
                }
            }
        }
        Ok(())
    }

    async fn repositories_url(&self, client: &HttpClient, owner: &str) -> String {
        let profile: Option<Profile> = match self.get(client, &format!("{}/users/{}", self.api, owner)).await {
            Ok(response) => response.json().ok(),
            Err(err) => {
                warn!(owner, error = %err, "profile lookup failed");
                None
            }
        };
        if profile.map(|p| p.kind == "Organization").unwrap_or(false) {
            format!("{}/orgs/{}/repos?per_page={}", self.api, owner, PER_PAGE)
        } else if self.asset.config.contains_key("pat") {
            format!("{}/user/repos?per_page={}", self.api, PER_PAGE)
        } else {
            format!("{}/users/{}/repos?per_page={}", self.api, owner, PER_PAGE)
        }
    }

    async fn exposures(&self, client: &HttpClient, asset: &Asset, repo: &Repository) -> Result<()> {
        if repo.private {
            return Ok(());
        }
        let now = Utc::now();
        if recent(repo.created_at, now) {
            self.job.emit(Risk::new(asset, "newly-created-public-repo")).await?;
        }

        let url = format!(
            "{}/repos/{}/{}/events?per_page={}",
            self.api, repo.owner.login, repo.name, EVENTS_PER_PAGE
        );
        let events: Vec<Event> = match self.get(client, &url).await.and_then(|r| r.json()) {
            Ok(events) => events,
            Err(err) => {
                debug!(repo = %repo.html_url, error = %err, "events not listed");
                return Ok(());
            }
        };
        for event in events {
            if event.kind != "PublicEvent" || !recent(event.created_at, now) {
                continue;
            }
            let risk = Risk::new(asset, "private-repo-newly-made-public");
            let proof = risk.proof(serde_json::to_vec(&event.payload)?);
            self.job.emit(risk).await?;
            self.job.emit(proof).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for Github {
    fn name(&self) -> &'static str {
        "github"
    }

    fn matches(&self) -> bool {
        self.asset.is("github")
    }

    fn secret(&self) -> Option<&'static str> {
        Some("/pats/github")
    }

    async fn invoke(&self) -> Result<()> {
        let owner = github_owner(&self.asset.name)
            .ok_or_else(|| Error::InvalidTarget(format!("not a github owner: {}", self.asset.name)))?;
        let client = HttpClient::builder().user_agent("outpost").build()?;

        self.contributors(&client, owner).await?;

        let url = self.repositories_url(&client, owner).await;
        let repos: Vec<Repository> = self.list(&client, url).await?;
        for repo in repos.iter().filter(|repo| !repo.fork) {
            let asset = Asset::new(repo.html_url.as_str(), repo.name.as_str())
                .with_config(self.asset.config.clone())
                .with_status(AssetStatus::ActiveLow);
            self.job.emit(asset.clone()).await?;
            self.exposures(&client, &asset, repo).await?;
        }
        Ok(())
    }
}
