//! Scoped web crawler
//!
//! Breadth-first crawl of a single site. Links are followed only to hosts
//! under the asset's registrable domain and only when they look like text.
//! Once the crawl is done two passes run over what was collected:
//! parameterised URLs from pages with input fields go to dalfox, and every
//! text body written to a scratch corpus goes to noseyparker.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use outpost_common::tenant_tag;
use outpost_core::{
    registrable_domain, Asset, Capability, Error, Job, Result, Risk, RiskStatus, Severity,
};
use outpost_exec::{process, HttpClient};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Bodies are truncated past this size
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Pages fetched per crawl
pub const MAX_PAGES: usize = 1000;
const MAX_CORPUS_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

const DALFOX_ARGS: [&str; 9] = [
    "pipe",
    "--timeout",
    "3",
    "--report-format",
    "json",
    "--only-poc=v",
    "--format",
    "json",
    "--skip-bav",
];

/// Extensions whose registered media type is not `text/*`
const NON_TEXT_EXTENSIONS: &[&str] = &[
    "7z", "avi", "avif", "bin", "bmp", "dmg", "doc", "docx", "eot", "exe", "gif", "gz", "ico",
    "iso", "jpeg", "jpg", "json", "mov", "mp3", "mp4", "mpeg", "ogg", "otf", "pdf", "png", "ppt",
    "pptx", "rar", "svg", "tar", "tgz", "tif", "tiff", "ttf", "wasm", "wav", "webm", "webp",
    "woff", "woff2", "xls", "xlsx", "zip",
];

pub struct Crawler {
    job: Job,
    asset: Asset,
    header: String,
}

impl Crawler {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            header: tenant_tag(&job.username),
            asset: job.target.clone(),
            job,
        })
    }

    async fn crawl(&self, client: &HttpClient, scope: &Scope, start: Url, corpus: &mut Corpus) -> Crawl {
        let mut crawl = Crawl::default();
        let mut seen = HashSet::from([start.to_string()]);
        let mut queue = VecDeque::from([start]);

        while let Some(url) = queue.pop_front() {
            if crawl.pages >= MAX_PAGES {
                debug!(asset = %self.asset.key, "page limit reached");
                break;
            }
            let page = match fetch(client, &url).await {
                Ok(page) => page,
                Err(err) => {
                    debug!(url = %url, error = %err, "fetch failed");
                    continue;
                }
            };
            if !scope.contains(page.url.as_str()) {
                debug!(url = %url, location = %page.url, "redirected out of scope");
                continue;
            }
            crawl.pages += 1;

            if let Err(err) = corpus.store(&page.url, page.content_type.as_deref(), &page.body).await {
                warn!(url = %page.url, error = %err, "failed to store page");
            }

            let parsed = parse_page(&page.url, &String::from_utf8_lossy(&page.body));
            if parsed.has_input {
                if let Some(fuzz) = fuzz_url(&page.url) {
                    crawl.fuzzable.insert(fuzz);
                }
            }
            for link in parsed.links {
                if scope.follow(&link) && seen.insert(link.to_string()) {
                    queue.push_back(link);
                }
            }
        }
        crawl
    }

    /// Run dalfox over the parameterised URLs
    async fn fuzz_inputs(&self, urls: &BTreeSet<String>) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new("dalfox");
        cmd.args(DALFOX_ARGS).arg("--silence");
        let input = urls.iter().cloned().collect::<Vec<_>>().join("\n");

        let output = match process::run_with_input(cmd, input.as_bytes()).await {
            Ok(output) => output,
            Err(err) => {
                warn!(asset = %self.asset.key, error = %err, "xss scan failed");
                return Ok(());
            }
        };

        for result in parse_dalfox(&output) {
            let risk = Risk::new(&self.asset, format!("xss-identified:{}", result.param))
                .with_status(RiskStatus::triage(Severity::Medium));
            let proof = serde_json::to_vec_pretty(&result)?;
            self.job.emit(risk.clone()).await?;
            self.job.emit(risk.proof(proof)).await?;
        }
        Ok(())
    }

    /// Run noseyparker over the corpus and report every distinct match
    async fn scan_secrets(&self, corpus: &Corpus) -> Result<()> {
        if corpus.size == 0 {
            return Ok(());
        }
        let store = corpus.store.to_string_lossy().into_owned();
        let crawl = corpus.crawl.to_string_lossy().into_owned();

        let mut scan = Command::new("noseyparker");
        scan.args(["scan", "--datastore", &store, &crawl]);
        if let Err(err) = process::run(scan).await {
            warn!(asset = %self.asset.key, error = %err, "secret scan failed");
            return Ok(());
        }

        let mut report = Command::new("noseyparker");
        report.args(["report", "--datastore", &store, "-f", "jsonl"]);
        let mut lines = process::stream(report)?;
        let mut found = SecretsByHost::new();
        while let Some(line) = lines.next_line().await? {
            collect_secrets(corpus, &line, &mut found);
        }
        if let Err(err) = lines.finish().await {
            warn!(asset = %self.asset.key, error = %err, "secret report failed");
        }

        if found.is_empty() {
            return Ok(());
        }
        let risk = Risk::new(&self.asset, "web-secrets").with_status(RiskStatus::triage(Severity::Medium));
        let proof = serde_json::to_vec_pretty(&found)?;
        self.job.emit(risk.clone()).await?;
        self.job.emit(risk.proof(proof)).await
    }
}

#[async_trait]
impl Capability for Crawler {
    fn name(&self) -> &'static str {
        "crawler"
    }

    fn matches(&self) -> bool {
        self.asset.name.starts_with("http") && self.asset.is("AH")
    }

    async fn invoke(&self) -> Result<()> {
        let scope = Scope::new(&self.asset.dns)?;
        let start = Url::parse(&self.asset.name)
            .map_err(|e| Error::InvalidTarget(format!("{}: {}", self.asset.name, e)))?;
        let client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("outpost-{}", self.header))
            .header("Outpost", self.header.clone())
            .build()?;
        let mut corpus = Corpus::new()?;

        let crawl = self.crawl(&client, &scope, start, &mut corpus).await;
        info!(
            asset = %self.asset.key,
            pages = crawl.pages,
            fuzzable = crawl.fuzzable.len(),
            "crawl complete"
        );

        self.fuzz_inputs(&crawl.fuzzable).await?;
        self.scan_secrets(&corpus).await
    }
}

#[derive(Debug, Default)]
struct Crawl {
    pages: usize,
    fuzzable: BTreeSet<String>,
}

/// Hosts at or under a registrable domain, over http or https
struct Scope {
    pattern: Regex,
}

impl Scope {
    fn new(dns: &str) -> Result<Self> {
        let root = registrable_domain(dns).unwrap_or(dns);
        let pattern = Regex::new(&format!(
            r"(?i)^https?://(?:[a-z0-9-]+\.)*{}(?::\d+)?(?:[/?#]|$)",
            regex::escape(root)
        ))
        .map_err(|e| Error::InvalidTarget(format!("{}: {}", dns, e)))?;
        Ok(Self { pattern })
    }

    fn contains(&self, link: &str) -> bool {
        self.pattern.is_match(link)
    }

    fn follow(&self, link: &Url) -> bool {
        self.contains(link.as_str()) && textual_path(link.path())
    }
}

fn textual_path(path: &str) -> bool {
    if path.ends_with('/') {
        return true;
    }
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((_, ext)) => !NON_TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}

/// Whether a response's media type is worth scanning for secrets. Pages
/// served without a `Content-Type` count as text.
fn textual_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    kind == "text"
        || matches!(
            subtype,
            "json" | "javascript" | "ecmascript" | "x-javascript" | "xml" | "xhtml+xml" | "x-www-form-urlencoded"
        )
        || subtype.ends_with("+json")
        || subtype.ends_with("+xml")
}

struct Page {
    url: Url,
    content_type: Option<String>,
    body: Vec<u8>,
}

async fn fetch(client: &HttpClient, url: &Url) -> Result<Page> {
    let mut response = client
        .inner()
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| Error::Http(e.to_string()))? {
        let room = MAX_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_BODY_BYTES {
            break;
        }
    }
    Ok(Page {
        url: final_url,
        content_type,
        body,
    })
}

#[derive(Debug, Default)]
struct Parsed {
    links: Vec<Url>,
    has_input: bool,
}

fn parse_page(base: &Url, html: &str) -> Parsed {
    let (Ok(anchors), Ok(inputs)) = (Selector::parse("a[href]"), Selector::parse("input")) else {
        return Parsed::default();
    };
    let document = Html::parse_document(html);
    let links = document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(base, href))
        .collect();
    let has_input = document.select(&inputs).next().is_some();
    Parsed { links, has_input }
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("data:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// `url` with every query parameter set to `FUZZ`, keys sorted and unique
fn fuzz_url(url: &Url) -> Option<String> {
    let keys: BTreeSet<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
    if keys.is_empty() {
        return None;
    }
    let mut fuzz = url.clone();
    fuzz.set_fragment(None);
    fuzz.query_pairs_mut()
        .clear()
        .extend_pairs(keys.iter().map(|key| (key.as_str(), "FUZZ")));
    Some(fuzz.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct DalfoxResult {
    #[serde(default)]
    param: String,
    #[serde(rename = "message_str", default)]
    message: String,
    #[serde(rename = "message_id", default)]
    message_id: i64,
    #[serde(default)]
    data: String,
}

/// Confirmed findings from a dalfox JSON report
fn parse_dalfox(output: &str) -> Vec<DalfoxResult> {
    serde_json::from_str::<Vec<DalfoxResult>>(output.trim())
        .unwrap_or_default()
        .into_iter()
        .filter(|result| result.message_id != 0)
        .collect()
}

/// Crawled bodies on disk as `crawl/{host}/{base64(path)}`
struct Corpus {
    _dir: TempDir,
    crawl: PathBuf,
    store: PathBuf,
    size: u64,
}

impl Corpus {
    fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("crawler.").tempdir()?;
        Ok(Self {
            crawl: dir.path().join("crawl"),
            store: dir.path().join("store"),
            _dir: dir,
            size: 0,
        })
    }

    async fn store(&mut self, url: &Url, content_type: Option<&str>, body: &[u8]) -> Result<()> {
        if body.is_empty() || !textual_type(content_type) {
            return Ok(());
        }
        if self.size + body.len() as u64 >= MAX_CORPUS_BYTES {
            return Ok(());
        }
        let dir = self.crawl.join(url.host_str().unwrap_or_default());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(URL_SAFE.encode(url.path())), body).await?;
        self.size += body.len() as u64;
        Ok(())
    }

    /// `(host, path)` for a file written by [`Corpus::store`]
    fn locate(&self, file: &str) -> Option<(String, String)> {
        let relative = Path::new(file).strip_prefix(&self.crawl).ok()?;
        let mut parts = relative.iter().map(|part| part.to_str());
        let host = parts.next()??;
        let name = parts.next()??;
        if parts.next().is_some() {
            return None;
        }
        let location = String::from_utf8(URL_SAFE.decode(name).ok()?).ok()?;
        Some((host.to_string(), location))
    }
}

#[derive(Debug, Deserialize)]
struct ReportLine {
    #[serde(default)]
    rule_name: String,
    #[serde(default)]
    matches: Vec<ReportMatch>,
}

#[derive(Debug, Deserialize)]
struct ReportMatch {
    #[serde(default)]
    provenance: Vec<Provenance>,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    matching: String,
}

#[derive(Debug, Deserialize)]
struct Provenance {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct SecretFinding {
    rule: String,
    matches: Vec<String>,
}

/// host -> matched text -> where it was seen
type SecretsByHost = BTreeMap<String, BTreeMap<String, SecretFinding>>;

fn collect_secrets(corpus: &Corpus, line: &str, found: &mut SecretsByHost) {
    let report: ReportLine = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(err) => {
            debug!(error = %err, "skipping report line");
            return;
        }
    };
    for m in &report.matches {
        for provenance in &m.provenance {
            let Some((host, location)) = corpus.locate(&provenance.path) else {
                continue;
            };
            found
                .entry(host)
                .or_default()
                .entry(m.snippet.matching.clone())
                .or_insert_with(|| SecretFinding {
                    rule: report.rule_name.clone(),
                    matches: Vec::new(),
                })
                .matches
                .push(location);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::AssetStatus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_scope() {
        let scope = Scope::new("www.example.com").unwrap();
        assert!(scope.contains("https://www.example.com/login"));
        assert!(scope.contains("http://example.com"));
        assert!(scope.contains("https://api.EXAMPLE.com:8443/v1"));
        assert!(!scope.contains("https://example.com.evil.net/"));
        assert!(!scope.contains("https://notexample.com/"));
        assert!(!scope.contains("ftp://example.com/"));
    }

    #[test]
    fn test_follow_text_only() {
        let scope = Scope::new("example.com").unwrap();
        let follow = |s: &str| scope.follow(&Url::parse(s).unwrap());
        assert!(follow("https://example.com/docs/"));
        assert!(follow("https://example.com/app.js"));
        assert!(follow("https://example.com/about"));
        assert!(!follow("https://example.com/logo.PNG"));
        assert!(!follow("https://example.com/api/data.json"));
        assert!(!follow("https://other.com/"));
    }

    #[test]
    fn test_textual_type() {
        assert!(textual_type(Some("text/html; charset=utf-8")));
        assert!(textual_type(Some("Application/JavaScript")));
        assert!(textual_type(Some("application/json")));
        assert!(textual_type(Some("application/ld+json")));
        assert!(textual_type(Some("image/svg+xml")));
        assert!(textual_type(None));
        assert!(!textual_type(Some("image/png")));
        assert!(!textual_type(Some("application/octet-stream")));
        assert!(!textual_type(Some("font/woff2")));
        assert!(!textual_type(Some("garbage")));
    }

    #[tokio::test]
    async fn test_fetch_keeps_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/javascript")
                    .set_body_string("const token = 'ghp_abc';"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/logo"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"\x89PNG\r\n".to_vec(), "image/png"))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let mut corpus = Corpus::new().unwrap();
        for route in ["/app.js", "/logo"] {
            let url = Url::parse(&format!("{}{}", server.uri(), route)).unwrap();
            let page = fetch(&client, &url).await.unwrap();
            corpus
                .store(&page.url, page.content_type.as_deref(), &page.body)
                .await
                .unwrap();
        }
        assert_eq!(corpus.size, 24);
    }

    #[test]
    fn test_parse_page() {
        let base = Url::parse("https://example.com/dir/page").unwrap();
        let html = r##"
            <a href="next">next</a>
            <a href="/top#section">top</a>
            <a href="#local">local</a>
            <a href="mailto:root@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <form><input name="q"></form>
        "##;
        let parsed = parse_page(&base, html);
        let links: Vec<String> = parsed.links.iter().map(Url::to_string).collect();
        assert_eq!(links, vec!["https://example.com/dir/next", "https://example.com/top"]);
        assert!(parsed.has_input);

        let parsed = parse_page(&base, "<p>no forms</p>");
        assert!(parsed.links.is_empty());
        assert!(!parsed.has_input);
    }

    #[test]
    fn test_fuzz_url() {
        let url = Url::parse("https://example.com/search?q=test&page=2&q=x#top").unwrap();
        assert_eq!(
            fuzz_url(&url).as_deref(),
            Some("https://example.com/search?page=FUZZ&q=FUZZ")
        );
        assert_eq!(fuzz_url(&Url::parse("https://example.com/").unwrap()), None);
    }

    #[test]
    fn test_parse_dalfox() {
        let output = r#"[{},{"param":"q","message_str":"Triggered XSS Payload","message_id":1,"data":"https://example.com/?q=%3Csvg%3E"},{"param":"page","message_id":0}]"#;
        let results = parse_dalfox(output);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].param, "q");
        assert!(parse_dalfox("not json").is_empty());
    }

    #[tokio::test]
    async fn test_corpus_and_secret_report() {
        let mut corpus = Corpus::new().unwrap();
        let url = Url::parse("https://www.example.com/static/config.js").unwrap();
        corpus
            .store(&url, Some("application/javascript"), b"const token = 'ghp_abc';")
            .await
            .unwrap();
        corpus
            .store(
                &Url::parse("https://www.example.com/logo.png").unwrap(),
                Some("image/png"),
                b"\x89PNG\r\n",
            )
            .await
            .unwrap();
        assert_eq!(corpus.size, 24);

        let file = corpus
            .crawl
            .join("www.example.com")
            .join(URL_SAFE.encode("/static/config.js"));
        assert!(file.exists());
        let line = serde_json::json!({
            "rule_name": "GitHub Personal Access Token",
            "matches": [
                {"provenance": [{"path": file.to_string_lossy()}], "snippet": {"matching": "ghp_abc"}},
                {"provenance": [{"path": "/elsewhere/file"}], "snippet": {"matching": "ghp_abc"}}
            ]
        })
        .to_string();

        let mut found = SecretsByHost::new();
        collect_secrets(&corpus, &line, &mut found);
        collect_secrets(&corpus, "garbage", &mut found);

        let finding = &found["www.example.com"]["ghp_abc"];
        assert_eq!(finding.rule, "GitHub Personal Access Token");
        assert_eq!(finding.matches, vec!["/static/config.js"]);
    }

    #[test]
    fn test_matches() {
        let asset = Asset::new("example.com", "https://example.com").with_status(AssetStatus::ActiveHigh);
        assert!(Crawler::new(Job::new("crawler", asset)).matches());
        let asset = Asset::new("example.com", "https://example.com");
        assert!(!Crawler::new(Job::new("crawler", asset)).matches());
        let asset = Asset::new("example.com", "example.com").with_status(AssetStatus::ActiveHigh);
        assert!(!Crawler::new(Job::new("crawler", asset)).matches());
    }
}
