//! GitHub organizations belonging to a seed domain
//!
//! Organizations are searched by the domain's first label. One is kept
//! when its profile blog points at a registrable domain.

use async_trait::async_trait;
use outpost_core::{Asset, AssetStatus, Capability, Job, Result};
use outpost_exec::HttpClient;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{first_label, seed};

pub const API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Search {
    #[serde(default)]
    items: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Organization {
    #[serde(default)]
    blog: Option<String>,
    html_url: String,
}

impl Organization {
    /// Blog host, when it is a registrable domain
    fn blog_domain(&self) -> Option<String> {
        let blog = Url::parse(self.blog.as_deref()?).ok()?;
        let host = blog.host_str()?;
        Asset::new(host, host).is("tld").then(|| host.to_string())
    }
}

pub struct GithubDiscovery {
    job: Job,
    asset: Asset,
    api: String,
}

impl GithubDiscovery {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            api: API.to_string(),
        })
    }
}

#[async_trait]
impl Capability for GithubDiscovery {
    fn name(&self) -> &'static str {
        "github-discovery"
    }

    fn matches(&self) -> bool {
        seed(&self.asset)
    }

    fn secret(&self) -> Option<&'static str> {
        Some("/pats/discovery")
    }

    async fn invoke(&self) -> Result<()> {
        let client = HttpClient::builder().user_agent("outpost").build()?;
        let authorization = self
            .job
            .config
            .get("secret")
            .map(|pat| format!("Bearer {}", pat));
        let mut headers = vec![("Accept", "application/vnd.github+json")];
        if let Some(authorization) = &authorization {
            headers.push(("Authorization", authorization.as_str()));
        }

        let query: String =
            url::form_urlencoded::byte_serialize(format!("type:org {}", first_label(&self.asset)).as_bytes())
                .collect();
        let search: Search = client
            .send(Method::GET, &format!("{}/search/users?q={}", self.api, query), None, &headers)
            .await?
            .ensure_success()?
            .json()?;

        for account in search.items {
            let url = format!("{}/orgs/{}", self.api, account.login);
            let organization: Organization = match client.get_json(&url, &headers).await {
                Ok(organization) => organization,
                Err(err) => {
                    debug!(login = %account.login, error = %err, "organization lookup failed");
                    continue;
                }
            };
            let Some(domain) = organization.blog_domain() else {
                continue;
            };
            debug!(org = %organization.html_url, domain = %domain, "organization linked to domain");
            let asset = Asset::new(organization.html_url.as_str(), organization.html_url.as_str())
                .with_status(AssetStatus::ActiveLow);
            self.job.emit(asset).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{Config, Entity, Origin, Stream};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_blog_domain() {
        let organization = |blog: Option<&str>| Organization {
            blog: blog.map(str::to_string),
            html_url: "https://github.com/acme".into(),
        };
        assert_eq!(organization(Some("https://acme.com")).blog_domain().as_deref(), Some("acme.com"));
        assert_eq!(organization(Some("https://www.acme.com/about")).blog_domain(), None);
        assert_eq!(organization(Some("acme.com")).blog_domain(), None);
        assert_eq!(organization(None).blog_domain(), None);
    }

    #[tokio::test]
    async fn test_invoke() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/users"))
            .and(query_param("q", "type:org acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"total_count": 3, "items": [{"login": "acme"}, {"login": "acme-labs"}, {"login": "gone"}]}"#,
            ))
            .mount(&server)
            .await;
        for (org, body) in [
            ("/orgs/acme", r#"{"blog": "https://acme.com", "html_url": "https://github.com/acme"}"#),
            ("/orgs/acme-labs", r#"{"blog": "https://labs.acme.com", "html_url": "https://github.com/acme-labs"}"#),
        ] {
            Mock::given(method("GET"))
                .and(path(org))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }
        let api = server.uri();

        let mut config = Config::new();
        config.insert("secret".into(), "ghp_discovery".into());
        let (stream, mut receiver) = Stream::channel();
        let target = Asset::new("acme.com", "acme.com").with_source(Origin::Provided);
        let mut job = Job::new("github-discovery", target).with_config(config);
        job.stream = Some(stream);
        let discovery = GithubDiscovery {
            asset: job.target.clone(),
            job,
            api,
        };
        assert!(discovery.matches());

        let task = tokio::spawn(async move { discovery.invoke().await });
        let mut assets = Vec::new();
        while let Some(Entity::Asset(asset)) = receiver.recv().await {
            assets.push(asset);
        }
        task.await.unwrap().unwrap();

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].key, "#asset#https://github.com/acme#https://github.com/acme");
        assert_eq!(assets[0].status, AssetStatus::ActiveLow);
    }
}
