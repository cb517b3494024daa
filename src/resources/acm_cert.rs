use super::*;

/// An ACM certificate for a domain hosted in Route53, validated through DNS.
/// CloudFront only reads certificates from `us-east-1`, so that is where it
/// goes regardless of the stack's region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Must be fully qualified. Can have 1 optional wildcard.
    /// Examples of valid values:
    /// - www.mysite.com
    /// - multiple.sub.domains.mysite.com
    /// - mysite.com
    /// - *.mysite.com
    /// Examples of invalid values:
    /// - *.something.*.mysite.com
    /// - cannotendwithdot.com.
    pub domain_name: String,
    pub validation_zone: HostedZone,
    region: String,
}

impl Certificate {
    pub const CFN_TYPE: &'static str = "AWS::CertificateManager::Certificate";

    pub fn dns_validated(domain_name: &str, zone: &HostedZone) -> Result<Self> {
        if domain_name.is_empty() {
            return Err(Error::InvalidDomain { domain: domain_name.into(), message: "Must provide a domain name".into() });
        }
        if domain_name.matches('*').count() > 1 {
            return Err(Error::InvalidDomain {
                domain: domain_name.into(),
                message: "Must only provide 1 wildcard".into(),
            });
        }
        validate_domain_name(domain_name)?;
        let bare = domain_name.strip_prefix("*.").unwrap_or(domain_name);
        if !zone.contains(bare) {
            return Err(Error::InvalidDomain {
                domain: domain_name.into(),
                message: format!("Cannot be validated through hosted zone {}", zone.name),
            });
        }
        Ok(Self {
            domain_name: domain_name.to_string(),
            validation_zone: zone.clone(),
            region: aws_regions::CLOUDFRONT_CERTIFICATE_REGION.to_string(),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn properties(&self) -> Value {
        json!({
            "DomainName": self.domain_name,
            "ValidationMethod": "DNS",
            "DomainValidationOptions": [{
                "DomainName": self.domain_name,
                "HostedZoneId": self.validation_zone.id,
            }],
        })
    }
}

impl Handle<Certificate> {
    pub fn certificate_arn(&self) -> Expr {
        self.reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn zone() -> HostedZone {
        HostedZone::new("/hostedzone/Z123", "example.com.")
    }

    #[test]
    fn always_pinned_to_us_east_1() {
        let cert = Certificate::dns_validated("www.example.com", &zone()).unwrap();
        assert_eq!(cert.region(), "us-east-1");
        assert_eq!(Resource::from(cert).pinned_region(), Some("us-east-1"));
    }

    #[test]
    fn validated_through_the_zone() {
        let cert = Certificate::dns_validated("www.example.com", &zone()).unwrap();
        assert_eq!(cert.properties(), json!({
            "DomainName": "www.example.com",
            "ValidationMethod": "DNS",
            "DomainValidationOptions": [{ "DomainName": "www.example.com", "HostedZoneId": "Z123" }],
        }));
    }

    #[test]
    fn graph_records_the_pinned_region() {
        let mut graph = ResourceGraph::new();
        let cert = graph.add("Cert", Certificate::dns_validated("*.example.com", &zone()).unwrap()).unwrap();
        assert_eq!(graph.get(cert.id()).unwrap().region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn wildcard_rules() {
        let err = Certificate::dns_validated("*.something.*.example.com", &zone()).unwrap_err();
        assert!(err.to_string().contains("Must only provide 1 wildcard"));
        assert!(Certificate::dns_validated("www.*.example.com", &zone()).is_err());
        assert!(Certificate::dns_validated("example.com.", &zone()).is_err());
        assert!(Certificate::dns_validated("", &zone()).is_err());
    }

    #[test]
    fn domain_must_be_in_the_validation_zone() {
        let err = Certificate::dns_validated("www.example.org", &zone()).unwrap_err();
        assert!(err.to_string().contains("Cannot be validated through hosted zone example.com"));
    }
}
