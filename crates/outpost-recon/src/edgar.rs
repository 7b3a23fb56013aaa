//! Domains named in a company's SEC filings
//!
//! The seed's first label is looked up as a company name in EDGAR. Today's
//! filings that mention the seed domain are scanned for other `.com`
//! domains, which are reported as frozen-low assets.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use outpost_core::{Asset, AssetStatus, Capability, Job, Result};
use outpost_exec::HttpClient;
use regex::Regex;
use reqwest::Method;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::{first_label, seed};

pub const HTML_API: &str = "https://www.sec.gov";
pub const JSON_API: &str = "https://data.sec.gov";
/// EDGAR rejects requests without a declared user agent
const USER_AGENT: &str = "outpost asm-research";
/// Filing agents whose domains appear in every document they file
const FILING_AGENTS: [&str; 1] = ["dfinsolutions"];
const LOOKUP_AGAIN: &str = "Perform another Company-CIK Lookup";

static COM_DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:[\w-]+\.)+com)\b").expect("valid regex"));

#[derive(Debug, Default, Deserialize)]
struct Submissions {
    #[serde(default)]
    filings: SubmissionFilings,
}

#[derive(Debug, Default, Deserialize)]
struct SubmissionFilings {
    #[serde(default)]
    recent: Recent,
}

/// Column-oriented filing table
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recent {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    acceptance_date_time: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Filing {
    accession_number: String,
    filing_date: String,
    form: String,
    primary_document: String,
}

impl Recent {
    /// Rows of the table; rows missing a column are dropped
    fn filings(&self) -> Vec<Filing> {
        (0..self.acceptance_date_time.len())
            .filter_map(|i| {
                Some(Filing {
                    accession_number: self.accession_number.get(i)?.clone(),
                    filing_date: self.filing_date.get(i)?.clone(),
                    form: self.form.get(i)?.clone(),
                    primary_document: self.primary_document.get(i)?.clone(),
                })
            })
            .collect()
    }
}

/// CIKs listed in a `cik_lookup` result page
fn parse_ciks(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(links) = Selector::parse("table tr a") else {
        return Vec::new();
    };
    document
        .select(&links)
        .map(|link| link.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty() && !text.contains(LOOKUP_AGAIN))
        .collect()
}

/// Registrable `.com` domains in a filing that mentions `seed`
fn related_domains(text: &str, seed: &str) -> BTreeSet<String> {
    if !text.to_uppercase().contains(&seed.to_uppercase()) {
        return BTreeSet::new();
    }
    COM_DOMAIN
        .find_iter(text)
        .filter_map(|found| {
            let lower = found.as_str().to_lowercase();
            let labels: Vec<&str> = lower.split('.').collect();
            let [.., name, tld] = labels.as_slice() else {
                return None;
            };
            Some(format!("{}.{}", name, tld))
        })
        .collect()
}

pub struct Edgar {
    job: Job,
    asset: Asset,
    html_api: String,
    json_api: String,
}

impl Edgar {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            html_api: HTML_API.to_string(),
            json_api: JSON_API.to_string(),
        })
    }

    async fn search(&self, client: &HttpClient, company: &str) -> Result<Vec<String>> {
        let form: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("company", company)
            .finish();
        let response = client
            .send(
                Method::POST,
                &format!("{}/cgi-bin/cik_lookup", self.html_api),
                Some(form.into_bytes()),
                &[("Content-Type", "application/x-www-form-urlencoded")],
            )
            .await?
            .ensure_success()?;
        Ok(parse_ciks(&response.text()))
    }

    async fn filings(&self, client: &HttpClient, cik: &str) -> Result<Vec<Filing>> {
        let url = format!("{}/submissions/CIK{}.json", self.json_api, cik);
        let submissions: Submissions = client
            .send(Method::GET, &url, None, &[])
            .await?
            .ensure_success()?
            .json()?;
        Ok(submissions.filings.recent.filings())
    }

    async fn document(&self, client: &HttpClient, cik: &str, filing: &Filing) -> Result<String> {
        let url = format!(
            "{}/Archives/edgar/data/{}/{}/{}",
            self.html_api,
            cik.trim_start_matches('0'),
            filing.accession_number.replace('-', ""),
            filing.primary_document
        );
        Ok(client
            .send(Method::GET, &url, None, &[])
            .await?
            .ensure_success()?
            .text())
    }

    /// Domains from every filing kept by `keep`, across all matching companies
    async fn adjacent<F>(&self, keep: F) -> Result<BTreeSet<String>>
    where
        F: Fn(&Filing) -> bool + Send + Sync,
    {
        let client = HttpClient::builder().user_agent(USER_AGENT).build()?;
        let mut domains = BTreeSet::new();

        for cik in self.search(&client, first_label(&self.asset)).await? {
            let filings: Vec<Filing> = self.filings(&client, &cik).await?.into_iter().filter(&keep).collect();
            debug!(cik = %cik, filings = filings.len(), "edgar filings");

            let mut texts = Vec::with_capacity(filings.len());
            for filing in &filings {
                match self.document(&client, &cik, filing).await {
                    Ok(text) => texts.push(text),
                    Err(err) => {
                        warn!(cik = %cik, accession = %filing.accession_number, error = %err, "filing download failed");
                        texts.clear();
                        break;
                    }
                }
            }
            for text in &texts {
                domains.extend(related_domains(text, &self.asset.dns));
            }
        }

        domains.retain(|domain| {
            domain != &self.asset.dns && !FILING_AGENTS.iter().any(|agent| domain.contains(agent))
        });
        Ok(domains)
    }
}

#[async_trait]
impl Capability for Edgar {
    fn name(&self) -> &'static str {
        "edgar"
    }

    fn matches(&self) -> bool {
        seed(&self.asset)
    }

    async fn invoke(&self) -> Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let domains = self.adjacent(|filing| filing.filing_date.starts_with(&today)).await?;
        info!(domain = %self.asset.dns, related = domains.len(), "edgar related domains");
        for domain in domains {
            let asset = Asset::new(domain.as_str(), domain.as_str()).with_status(AssetStatus::FrozenLow);
            self.job.emit(asset).await?;
        }
        Ok(())
    }
}
