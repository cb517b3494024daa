use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use super::*;
use crate::lookup::{HostedZoneProvider, HostedZoneQuery};
use crate::variables::StackConfig;

pub const DEFAULT_STACK_NAME: &str = "S3AngularStack";
/// the pre-built Angular bundle.
pub const ASSET_DIR: &str = "./simple-angular-app/dist";

pub const OAI_ID: &str = "MyOriginAccessIdentity";
pub const HOSTED_ZONE_ID: &str = "MyHostedZone";
pub const BUCKET_ID: &str = "MyS3Bucket";
pub const BUCKET_POLICY_ID: &str = "MyS3BucketPolicy";
pub const CERTIFICATE_ID: &str = "MySiteCertificate";
pub const DISTRIBUTION_ID: &str = "MyCloudFrontDistribution";
pub const ALIAS_RECORD_ID: &str = "MySiteAliasRecord";
pub const DEPLOYMENT_ID: &str = "MyS3BucketDeployment";

#[derive(Debug, Clone, PartialEq)]
pub struct StackOutput {
    pub description: Option<String>,
    pub value: Expr,
}

/// An S3 bucket served through CloudFront on `<subDomain>.<domainName>`,
/// with a DNS validated certificate and the site bundle uploaded into it.
#[derive(Debug, Clone)]
pub struct S3AngularStack {
    pub stack_id: String,
    pub config: StackConfig,
    pub domain: String,
    pub hosted_zone: HostedZone,
    pub asset_dir: PathBuf,
    pub graph: ResourceGraph,
    pub outputs: IndexMap<String, StackOutput>,
}

impl S3AngularStack {
    pub fn synthesize(
        stack_id: &str,
        config: &StackConfig,
        asset_dir: &Path,
        zones: &dyn HostedZoneProvider,
    ) -> Result<Self> {
        let stack_id = aws_cfn_stack::validate_stack_name(stack_id).map_err(Error::Template)?;
        let domain = compose_domain(&config.sub_domain, &config.domain_name)?;
        tracing::info!(stack = %stack_id, %domain, "synthesizing stack");
        let mut graph = ResourceGraph::new();

        let oai = graph.add(OAI_ID, OriginAccessIdentity::new(format!("OAI for {stack_id}")))?;

        let query = HostedZoneQuery::new(&stack_id, &config.env, &config.domain_name)?;
        let zone = zones.lookup(&query)?;
        tracing::debug!(id = HOSTED_ZONE_ID, zone = %zone.id, "resolved hosted zone");

        let bucket = Bucket::new(&config.domain_name)?
            .with_website(WebsiteConfiguration::default())
            .with_public_read_access(true);
        let bucket_handle = graph.add(BUCKET_ID, bucket.clone())?;
        let policy = AccessPolicy::for_bucket(&bucket_handle, &bucket)
            .with_statement(PolicyStatement::get_object(Principal::OriginAccessIdentity(oai.clone())));
        graph.add(BUCKET_POLICY_ID, policy)?;
        let bucket = bucket_handle;

        let cert = Certificate::dns_validated(&domain, &zone)?;
        let cert = graph.add(CERTIFICATE_ID, cert)?;

        let viewer_certificate = ViewerCertificate::from_acm_certificate(
            &cert,
            SslMethod::Sni,
            SecurityPolicyProtocol::TlsV1_1_2016,
            vec![domain.clone()],
        )?;
        let origin = SourceConfiguration {
            s3_origin_source: S3OriginSource {
                bucket: bucket.clone(),
                origin_access_identity: oai.clone(),
            },
            behaviors: vec![Behavior::default_behavior(AllowedMethods::GetHeadOptions)],
        };
        let distribution = graph.add(DISTRIBUTION_ID, Distribution::new(vec![origin], viewer_certificate)?)?;

        let record = ZoneRecord::alias_a(&domain, &zone, RecordTarget::CloudFront(distribution.clone()))?;
        graph.add(ALIAS_RECORD_ID, record)?;

        let deployment = Deployment::new(vec![Source::asset(asset_dir)], &bucket)
            .with_invalidation(&distribution, &["/*"]);
        let deployment = graph.add(DEPLOYMENT_ID, deployment)?;

        graph.validate()?;

        let mut outputs = IndexMap::new();
        let mut output = |name: &str, description: &str, value: Expr| {
            outputs.insert(name.to_string(), StackOutput { description: Some(description.to_string()), value });
        };
        output("HostedZoneId", "Hosted zone the site records live in", zone.id.clone().into());
        output("MyBucketName", "Domain name of the site bucket", bucket.domain_name());
        output("Certificate", "ARN of the site certificate", cert.certificate_arn());
        output("CloudFrontWebDistributionId", "Id of the CloudFront distribution", distribution.distribution_id());
        output("Mys3BucketDeployment", "Bucket deployment of the site bundle", deployment.id().to_string().into());

        Ok(Self {
            stack_id,
            config: config.clone(),
            domain,
            hosted_zone: zone,
            asset_dir: asset_dir.to_path_buf(),
            graph,
            outputs,
        })
    }

    /// region of everything that is not pinned elsewhere.
    pub fn home_region(&self) -> &str {
        &self.config.env.region
    }
}
