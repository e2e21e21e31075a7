use aws_config::Region;
use aws_sdk_s3::config::{BehaviorVersion, Credentials};
use clap::Args;

use crate::s3::S3BlobClient;

/// Configuration for an S3-compatible destination.
#[derive(Args, Debug, Clone)]
pub struct BlobConfig {
    /// Custom endpoint URL (R2, MinIO, ...); AWS when omitted
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Region name
    #[arg(long, default_value = "auto", env = "S3_REGION")]
    pub s3_region: String,

    /// Destination bucket
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: String,

    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub s3_access_key_id: String,

    #[arg(long, env = "S3_SECRET_ACCESS_KEY")]
    pub s3_secret_access_key: String,

    /// Prefix prepended to every object key
    #[arg(long, default_value = "", env = "S3_KEY_PREFIX")]
    pub s3_key_prefix: String,

    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[arg(long, env = "S3_FORCE_PATH_STYLE")]
    pub s3_force_path_style: bool,
}

impl BlobConfig {
    pub fn client(&self) -> S3BlobClient {
        let credentials = Credentials::new(
            &self.s3_access_key_id,
            &self.s3_secret_access_key,
            None,
            None,
            "rsync-os",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(self.s3_region.clone()))
            .force_path_style(self.s3_force_path_style);
        if let Some(endpoint) = &self.s3_endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let s3_client = aws_sdk_s3::Client::from_conf(builder.build());
        S3BlobClient::new(s3_client, self.s3_bucket.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        blob: BlobConfig,
    }

    #[test]
    fn test_defaults() {
        let h = Harness::parse_from([
            "test",
            "--s3-bucket",
            "mirror",
            "--s3-access-key-id",
            "id",
            "--s3-secret-access-key",
            "secret",
        ]);
        assert_eq!(h.blob.s3_region, "auto");
        assert_eq!(h.blob.s3_key_prefix, "");
        assert!(h.blob.s3_endpoint.is_none());
        assert!(!h.blob.s3_force_path_style);
        assert_eq!(h.blob.client().bucket_name(), "mirror");
    }
}
