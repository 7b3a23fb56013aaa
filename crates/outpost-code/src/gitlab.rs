//! GitLab group projects

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Error, Job, Result};
use outpost_exec::HttpClient;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::gitlab_group;

pub const API: &str = "https://gitlab.com/api";

#[derive(Debug, Deserialize)]
struct Project {
    name: String,
    web_url: String,
}

pub struct Gitlab {
    job: Job,
    asset: Asset,
    api: String,
}

impl Gitlab {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            api: API.to_string(),
        })
    }

    fn url(&self, group: &str, page: u32) -> String {
        format!(
            "{}/v4/groups/{}/projects?order_by=created_at&page={}&pagination=keyset&per_page=100&include_subgroups=true",
            self.api, group, page
        )
    }

    /// Emit one page of projects; true while GitLab announces another
    async fn page(&self, client: &HttpClient, pat: &str, group: &str, page: u32) -> Result<bool> {
        let response = client
            .send(Method::GET, &self.url(group, page), None, &[("PRIVATE-TOKEN", pat)])
            .await?
            .ensure_success()?;
        let projects: Vec<Project> = response.json()?;
        debug!(group, page, projects = projects.len(), "gitlab projects");
        for project in projects {
            let asset = Asset::new(project.web_url, project.name).with_config(self.asset.config.clone());
            self.job.emit(asset).await?;
        }
        Ok(response
            .header("x-next-page")
            .map(|next| !next.is_empty())
            .unwrap_or(false))
    }
}

#[async_trait]
impl Capability for Gitlab {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn matches(&self) -> bool {
        self.asset.is("gitlab")
            && self
                .asset
                .config
                .get("pat")
                .map(|pat| !pat.is_empty())
                .unwrap_or(false)
    }

    async fn invoke(&self) -> Result<()> {
        let group = gitlab_group(&self.asset.name)
            .ok_or_else(|| Error::InvalidTarget(format!("not a gitlab group: {}", self.asset.name)))?;
        let pat = self
            .asset
            .config
            .get("pat")
            .ok_or_else(|| Error::MissingConfig { key: "pat".into() })?;

        let client = HttpClient::new()?;
        let mut page = 0;
        while self.page(&client, pat, group, page).await? {
            page += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{Config, Entity, Stream};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GROUP: &str = "https://gitlab.com/acme";

    fn target() -> Asset {
        let mut config = Config::new();
        config.insert("pat".into(), "glpat-token".into());
        Asset::new(GROUP, GROUP).with_config(config)
    }

    #[test]
    fn test_matches() {
        assert!(Gitlab::new(Job::new("gitlab", target())).matches());
        assert!(!Gitlab::new(Job::new("gitlab", Asset::new(GROUP, GROUP))).matches());
    }

    #[tokio::test]
    async fn test_invoke_follows_next_page() {
        let server = MockServer::start().await;
        let projects = |page: &str, body: &str, next: &str| {
            Mock::given(method("GET"))
                .and(path("/v4/groups/acme/projects"))
                .and(query_param("page", page))
                .and(query_param("pagination", "keyset"))
                .and(header("PRIVATE-TOKEN", "glpat-token"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(body)
                        .insert_header("x-next-page", next),
                )
        };
        projects("0", r#"[{"name": "api", "web_url": "https://gitlab.com/acme/api"}]"#, "1")
            .mount(&server)
            .await;
        projects("1", r#"[{"name": "web", "web_url": "https://gitlab.com/acme/sub/web"}]"#, "")
            .mount(&server)
            .await;
        let api = server.uri();

        let (stream, mut receiver) = Stream::channel();
        let mut job = Job::new("gitlab", target());
        job.stream = Some(stream);
        let gitlab = Gitlab {
            asset: job.target.clone(),
            job,
            api,
        };

        let task = tokio::spawn(async move { gitlab.invoke().await });
        let mut assets = Vec::new();
        while let Some(Entity::Asset(asset)) = receiver.recv().await {
            assets.push(asset);
        }
        task.await.unwrap().unwrap();

        let keys: Vec<&str> = assets.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["#asset#https://gitlab.com/acme/api#api", "#asset#https://gitlab.com/acme/sub/web#web"]
        );
        assert_eq!(assets[0].config.get("pat").map(String::as_str), Some("glpat-token"));
    }
}
