//! Outpost Webapp - capabilities that talk to web servers
//!
//! - `crawler`: scoped crawl feeding an XSS scan and a secret scan
//! - `nuclei`: template-driven vulnerability scanning

pub mod crawler;
pub mod nuclei;

pub use crawler::Crawler;
pub use nuclei::Nuclei;
