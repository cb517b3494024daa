use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginAccessIdentity {
    pub comment: String,
}

impl OriginAccessIdentity {
    pub const CFN_TYPE: &'static str = "AWS::CloudFront::CloudFrontOriginAccessIdentity";

    pub fn new<S: Into<String>>(comment: S) -> Self {
        Self { comment: comment.into() }
    }

    pub fn properties(&self) -> Value {
        json!({
            "CloudFrontOriginAccessIdentityConfig": { "Comment": self.comment }
        })
    }
}

impl Handle<OriginAccessIdentity> {
    pub fn s3_canonical_user_id(&self) -> Expr {
        self.get_att("S3CanonicalUserId")
    }

    /// the form S3 origins expect: `origin-access-identity/cloudfront/<id>`
    pub fn origin_access_identity_path(&self) -> Expr {
        Expr::join("", vec!["origin-access-identity/cloudfront/".into(), self.reference()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedMethods {
    GetHead,
    GetHeadOptions,
}

impl AllowedMethods {
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            AllowedMethods::GetHead => &["GET", "HEAD"],
            AllowedMethods::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub is_default_behavior: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    pub compress: bool,
    pub allowed_methods: AllowedMethods,
}

impl Behavior {
    pub fn default_behavior(allowed_methods: AllowedMethods) -> Self {
        Self {
            is_default_behavior: true,
            path_pattern: None,
            compress: true,
            allowed_methods,
        }
    }

    fn to_value(&self, target_origin_id: &str) -> Value {
        let mut out = json!({
            "TargetOriginId": target_origin_id,
            "ViewerProtocolPolicy": "redirect-to-https",
            "AllowedMethods": self.allowed_methods.methods(),
            "CachedMethods": ["GET", "HEAD"],
            "Compress": self.compress,
            "ForwardedValues": {
                "QueryString": false,
                "Cookies": { "Forward": "none" }
            },
        });
        if let (Some(pattern), Value::Object(map)) = (&self.path_pattern, &mut out) {
            map.insert("PathPattern".into(), Value::String(pattern.clone()));
        }
        out
    }
}

/// an S3 bucket reached through an OAI rather than the bucket's public endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3OriginSource {
    pub bucket: Handle<Bucket>,
    pub origin_access_identity: Handle<OriginAccessIdentity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfiguration {
    pub s3_origin_source: S3OriginSource,
    pub behaviors: Vec<Behavior>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SslMethod {
    Sni,
}

impl SslMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMethod::Sni => "sni-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityPolicyProtocol {
    SslV3,
    TlsV1,
    TlsV1_2016,
    TlsV1_1_2016,
    TlsV1_2_2018,
    TlsV1_2_2019,
    TlsV1_2_2021,
}

impl SecurityPolicyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityPolicyProtocol::SslV3 => "SSLv3",
            SecurityPolicyProtocol::TlsV1 => "TLSv1",
            SecurityPolicyProtocol::TlsV1_2016 => "TLSv1_2016",
            SecurityPolicyProtocol::TlsV1_1_2016 => "TLSv1.1_2016",
            SecurityPolicyProtocol::TlsV1_2_2018 => "TLSv1.2_2018",
            SecurityPolicyProtocol::TlsV1_2_2019 => "TLSv1.2_2019",
            SecurityPolicyProtocol::TlsV1_2_2021 => "TLSv1.2_2021",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerCertificate {
    pub certificate: Handle<Certificate>,
    pub ssl_method: SslMethod,
    pub security_policy: SecurityPolicyProtocol,
    pub aliases: Vec<String>,
}

impl ViewerCertificate {
    pub fn from_acm_certificate(
        certificate: &Handle<Certificate>,
        ssl_method: SslMethod,
        security_policy: SecurityPolicyProtocol,
        aliases: Vec<String>,
    ) -> Result<Self> {
        for alias in &aliases {
            validate_domain_name(alias)?;
        }
        Ok(Self { certificate: certificate.clone(), ssl_method, security_policy, aliases })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub origin_configs: Vec<SourceConfiguration>,
    pub viewer_certificate: ViewerCertificate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub default_root_object: String,
    pub price_class: String,
    pub enabled: bool,
}

impl Distribution {
    pub const CFN_TYPE: &'static str = "AWS::CloudFront::Distribution";

    /// needs at least one origin, and exactly one default behavior across all of them.
    pub fn new(origin_configs: Vec<SourceConfiguration>, viewer_certificate: ViewerCertificate) -> Result<Self> {
        if origin_configs.is_empty() {
            return Err(Error::Template("Distribution needs at least one origin configuration".into()));
        }
        let defaults = origin_configs.iter()
            .flat_map(|c| c.behaviors.iter())
            .filter(|b| b.is_default_behavior)
            .count();
        if defaults != 1 {
            return Err(Error::Template(format!("Distribution needs exactly one default behavior, found {defaults}")));
        }
        for behavior in origin_configs.iter().flat_map(|c| c.behaviors.iter()) {
            if !behavior.is_default_behavior && behavior.path_pattern.is_none() {
                return Err(Error::Template("Non-default behaviors must have a path pattern".into()));
            }
        }
        Ok(Self {
            origin_configs,
            viewer_certificate,
            comment: None,
            default_root_object: "index.html".into(),
            price_class: "PriceClass_100".into(),
            enabled: true,
        })
    }

    pub fn default_behavior(&self) -> Option<&Behavior> {
        self.origin_configs.iter()
            .flat_map(|c| c.behaviors.iter())
            .find(|b| b.is_default_behavior)
    }

    pub fn dependencies(&self) -> Vec<LogicalId> {
        let mut out: Vec<LogicalId> = vec![];
        for config in &self.origin_configs {
            let source = &config.s3_origin_source;
            for id in [source.bucket.id(), source.origin_access_identity.id()] {
                if !out.contains(id) {
                    out.push(id.clone());
                }
            }
        }
        out.push(self.viewer_certificate.certificate.id().clone());
        out
    }

    pub fn properties(&self) -> Value {
        let mut origins = vec![];
        let mut default_cache_behavior = Value::Null;
        let mut cache_behaviors = vec![];
        for (i, config) in self.origin_configs.iter().enumerate() {
            let origin_id = format!("origin{}", i + 1);
            let source = &config.s3_origin_source;
            origins.push(json!({
                "Id": origin_id,
                "DomainName": source.bucket.regional_domain_name(),
                "S3OriginConfig": {
                    "OriginAccessIdentity": source.origin_access_identity.origin_access_identity_path()
                }
            }));
            for behavior in &config.behaviors {
                if behavior.is_default_behavior {
                    default_cache_behavior = behavior.to_value(&origin_id);
                } else {
                    cache_behaviors.push(behavior.to_value(&origin_id));
                }
            }
        }
        let cert = &self.viewer_certificate;
        let mut config = json!({
            "Aliases": cert.aliases,
            "DefaultRootObject": self.default_root_object,
            "Enabled": self.enabled,
            "HttpVersion": "http2",
            "IPV6Enabled": true,
            "PriceClass": self.price_class,
            "Origins": origins,
            "DefaultCacheBehavior": default_cache_behavior,
            "ViewerCertificate": {
                "AcmCertificateArn": cert.certificate.certificate_arn(),
                "SslSupportMethod": cert.ssl_method.as_str(),
                "MinimumProtocolVersion": cert.security_policy.as_str(),
            },
        });
        if let Value::Object(map) = &mut config {
            if !cache_behaviors.is_empty() {
                map.insert("CacheBehaviors".into(), Value::Array(cache_behaviors));
            }
            if let Some(comment) = &self.comment {
                map.insert("Comment".into(), Value::String(comment.clone()));
            }
        }
        json!({ "DistributionConfig": config })
    }
}

impl Handle<Distribution> {
    pub fn distribution_id(&self) -> Expr {
        self.reference()
    }

    pub fn domain_name(&self) -> Expr {
        self.get_att("DomainName")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixture {
        graph: ResourceGraph,
        bucket: Handle<Bucket>,
        oai: Handle<OriginAccessIdentity>,
        cert: Handle<Certificate>,
    }

    fn fixture() -> Fixture {
        let mut graph = ResourceGraph::new();
        let oai = graph.add("Oai", OriginAccessIdentity::new("OAI for test")).unwrap();
        let bucket = graph.add("Bucket", Bucket::new("example.com").unwrap()).unwrap();
        let zone = HostedZone::new("Z123", "example.com");
        let cert = graph.add("Cert", Certificate::dns_validated("www.example.com", &zone).unwrap()).unwrap();
        Fixture { graph, bucket, oai, cert }
    }

    fn source(f: &Fixture, behaviors: Vec<Behavior>) -> SourceConfiguration {
        SourceConfiguration {
            s3_origin_source: S3OriginSource { bucket: f.bucket.clone(), origin_access_identity: f.oai.clone() },
            behaviors,
        }
    }

    fn viewer(f: &Fixture) -> ViewerCertificate {
        ViewerCertificate::from_acm_certificate(
            &f.cert, SslMethod::Sni, SecurityPolicyProtocol::TlsV1_1_2016, vec!["www.example.com".into()],
        ).unwrap()
    }

    #[test]
    fn renders_s3_origin_through_oai() {
        let mut f = fixture();
        let distr = Distribution::new(
            vec![source(&f, vec![Behavior::default_behavior(AllowedMethods::GetHeadOptions)])],
            viewer(&f),
        ).unwrap();
        let props = distr.properties();
        let config = &props["DistributionConfig"];
        assert_eq!(config["Origins"][0], json!({
            "Id": "origin1",
            "DomainName": { "Fn::GetAtt": ["Bucket", "RegionalDomainName"] },
            "S3OriginConfig": {
                "OriginAccessIdentity": { "Fn::Join": ["", ["origin-access-identity/cloudfront/", { "Ref": "Oai" }]] }
            }
        }));
        assert_eq!(config["DefaultCacheBehavior"]["AllowedMethods"], json!(["GET", "HEAD", "OPTIONS"]));
        assert_eq!(config["DefaultCacheBehavior"]["Compress"], true);
        assert_eq!(config["DefaultCacheBehavior"]["TargetOriginId"], "origin1");
        assert_eq!(config["ViewerCertificate"], json!({
            "AcmCertificateArn": { "Ref": "Cert" },
            "SslSupportMethod": "sni-only",
            "MinimumProtocolVersion": "TLSv1.1_2016",
        }));
        assert_eq!(config["Aliases"], json!(["www.example.com"]));
        assert!(config.get("CacheBehaviors").is_none());

        let d = f.graph.add("Distr", distr).unwrap();
        assert_eq!(f.graph.get(d.id()).unwrap().depends_on.len(), 3);
        f.graph.validate().unwrap();
    }

    #[test]
    fn needs_exactly_one_default_behavior() {
        let f = fixture();
        let none = Distribution::new(vec![source(&f, vec![])], viewer(&f));
        assert!(none.unwrap_err().to_string().contains("exactly one default behavior, found 0"));

        let two = Distribution::new(
            vec![source(&f, vec![
                Behavior::default_behavior(AllowedMethods::GetHead),
                Behavior::default_behavior(AllowedMethods::GetHeadOptions),
            ])],
            viewer(&f),
        );
        assert!(two.unwrap_err().to_string().contains("found 2"));
        assert!(Distribution::new(vec![], viewer(&f)).is_err());
    }

    #[test]
    fn extra_behaviors_need_a_path() {
        let f = fixture();
        let extra = Behavior { is_default_behavior: false, path_pattern: None, compress: false, allowed_methods: AllowedMethods::GetHead };
        let res = Distribution::new(
            vec![source(&f, vec![Behavior::default_behavior(AllowedMethods::GetHead), extra.clone()])],
            viewer(&f),
        );
        assert!(res.is_err());

        let with_path = Behavior { path_pattern: Some("/api/*".into()), ..extra };
        let distr = Distribution::new(
            vec![source(&f, vec![Behavior::default_behavior(AllowedMethods::GetHead), with_path])],
            viewer(&f),
        ).unwrap();
        let props = distr.properties();
        assert_eq!(props["DistributionConfig"]["CacheBehaviors"][0]["PathPattern"], "/api/*");
    }

    #[test]
    fn aliases_must_be_domains() {
        let f = fixture();
        let res = ViewerCertificate::from_acm_certificate(
            &f.cert, SslMethod::Sni, SecurityPolicyProtocol::TlsV1_1_2016, vec!["www..example.com".into()],
        );
        assert!(matches!(res, Err(Error::InvalidDomain { .. })));
    }
}
