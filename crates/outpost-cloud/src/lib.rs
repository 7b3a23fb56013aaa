//! Outpost Cloud - capabilities that enumerate cloud and DNS providers
//!
//! The three cloud crawlers drive the provider CLIs (`aws`, `az`,
//! `gcloud`) with a scoped credential. The DNS and EDR integrations talk
//! to their REST APIs directly.

pub mod amazon;
pub mod azure;
pub mod cloudflare;
pub mod crowdstrike;
pub mod gcp;
pub mod ns1;

pub use amazon::Amazon;
pub use azure::Azure;
pub use cloudflare::Cloudflare;
pub use crowdstrike::Crowdstrike;
pub use gcp::Gcp;
pub use ns1::Ns1;

use outpost_core::{Asset, Error, Job, Result};
use tracing::error;

/// Emit a cloud resource and its `cloud` attribute naming the provider id
pub(crate) async fn publish(job: &Job, asset: Asset, resource: &str) -> Result<()> {
    let attribute = asset.attribute("cloud", resource);
    job.emit(asset).await?;
    job.emit(attribute).await
}

/// Queue `capability` against a child account, project or region,
/// keeping the parent job's user
pub(crate) async fn descend(job: &Job, capability: &str, asset: Asset) -> Result<()> {
    let mut child = Job::new(capability, asset).with_config(job.config.clone());
    child.username = job.username.clone();
    job.emit(child).await
}

/// One enumeration failing does not stop the others; a closed stream does
pub(crate) fn tolerate(capability: &str, step: &str, result: Result<()>) -> Result<()> {
    match result {
        Err(Error::StreamClosed) => Err(Error::StreamClosed),
        Err(err) => {
            error!(capability, step, error = %err, "enumeration failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{Entity, Stream};

    #[tokio::test]
    async fn test_publish_emits_asset_then_attribute() {
        let (stream, mut receiver) = Stream::channel();
        let mut job = Job::new("amazon", Asset::new("amazon", "123456789012"));
        job.stream = Some(stream);

        let arn = "arn:aws:ec2:us-east-1:123456789012:instance/i-0abc";
        let task = tokio::spawn(async move {
            publish(&job, Asset::new("ec2-3-4-5-6.compute.amazonaws.com", "3.4.5.6"), arn).await
        });
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(matches!(first, Entity::Asset(ref a) if a.name == "3.4.5.6"));
        match second {
            Entity::Attribute(attr) => {
                assert_eq!(attr.name, "cloud");
                assert_eq!(attr.value, arn);
                assert_eq!(attr.source, "#asset#ec2-3-4-5-6.compute.amazonaws.com#3.4.5.6");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_descend_queues_child_job() {
        let (stream, mut receiver) = Stream::channel();
        let mut job = Job::new("gcp", Asset::new("gcp", "root-project"));
        job.username = "user@example.com".into();
        job.stream = Some(stream);

        let task = tokio::spawn(async move { descend(&job, "gcp", Asset::new("gcp", "child-project")).await });
        let queued = receiver.recv().await.unwrap();
        task.await.unwrap().unwrap();

        match queued {
            Entity::Job(child) => {
                assert_eq!(child.key, "#job#gcp#child-project#gcp");
                assert_eq!(child.username, "user@example.com");
                assert_eq!(child.target.name, "child-project");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tolerate() {
        assert!(tolerate("amazon", "lambda", Err(Error::Upstream("denied".into()))).is_ok());
        assert!(matches!(
            tolerate("amazon", "lambda", Err(Error::StreamClosed)),
            Err(Error::StreamClosed)
        ));
    }
}
