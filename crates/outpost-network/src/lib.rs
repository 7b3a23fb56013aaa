//! Outpost Network - discovery capabilities that work at the network layer
//!
//! - `subdomain`: passive subdomain enumeration and resolution
//! - `portscan`: full-port scans with per-port service fingerprinting
//! - `whois`: registration data, expiry risk and reverse WHOIS
//! - `ssh`: banner checks for known OpenSSH vulnerabilities

pub mod portscan;
pub mod ssh;
pub mod subdomain;
pub mod whois;

pub use portscan::PortScan;
pub use ssh::Ssh;
pub use subdomain::Subdomain;
pub use whois::Whois;
