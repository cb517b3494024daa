use super::*;

/// A public hosted zone. Not a graph node: zones are looked up, never created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    /// without the `/hostedzone/` prefix.
    pub id: String,
    /// without the trailing dot.
    pub name: String,
}

impl HostedZone {
    pub fn new<I: AsRef<str>, N: AsRef<str>>(id: I, name: N) -> Self {
        let id = id.as_ref();
        let id = id.strip_prefix("/hostedzone/").unwrap_or(id);
        let name = name.as_ref();
        let name = name.strip_suffix('.').unwrap_or(name);
        Self { id: id.to_string(), name: name.to_string() }
    }

    /// true if `domain` is the zone apex or anything under it.
    pub fn contains(&self, domain: &str) -> bool {
        let domain = domain.strip_suffix('.').unwrap_or(domain);
        domain == self.name || domain.ends_with(&format!(".{}", self.name))
    }
}

/// Domain names as CloudFront, ACM and Route53 all accept them:
/// dot separated labels of lowercase letters, digits and dashes, no empty labels.
/// Route53 reports zone names in lowercase, so mixed case is refused up front.
/// A single `*` is allowed as the first label.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    let invalid = |message: &str| Error::InvalidDomain { domain: domain.to_string(), message: message.to_string() };
    if domain.is_empty() {
        return Err(invalid("Must not be empty"));
    }
    if domain.len() > 253 {
        return Err(invalid("Must be at most 253 characters"));
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid("Must not start or end with a dot"));
    }
    for (i, label) in domain.split('.').enumerate() {
        if label.is_empty() {
            return Err(invalid("May not contain two consecutive dots"));
        }
        if label == "*" {
            if i == 0 {
                continue;
            }
            return Err(invalid("A wildcard must be the first component of the domain, eg: \"*.something.com\""));
        }
        if label.len() > 63 {
            return Err(invalid("Each component must be at most 63 characters"));
        }
        if !label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(invalid("May only contain lowercase letters, numbers, dashes, and dots"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("Components may not start or end with a dash"));
        }
    }
    Ok(())
}

/// `sub + "." + domain`. Both parts must be valid on their own, so stray
/// dots are rejected instead of being joined into something malformed.
pub fn compose_domain(sub_domain: &str, domain_name: &str) -> Result<String> {
    validate_domain_name(sub_domain)?;
    validate_domain_name(domain_name)?;
    let composed = format!("{sub_domain}.{domain_name}");
    validate_domain_name(&composed)?;
    Ok(composed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordTarget {
    CloudFront(Handle<Distribution>),
}

impl RecordTarget {
    fn alias_target(&self) -> Value {
        match self {
            RecordTarget::CloudFront(distr) => json!({
                "DNSName": distr.domain_name(),
                "HostedZoneId": aws_regions::CLOUDFRONT_HOSTED_ZONE_ID,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub zone: HostedZone,
    pub record_name: String,
    pub record_type: String,
    pub target: RecordTarget,
}

impl ZoneRecord {
    pub const CFN_TYPE: &'static str = "AWS::Route53::RecordSet";

    pub fn alias_a(record_name: &str, zone: &HostedZone, target: RecordTarget) -> Result<Self> {
        validate_domain_name(record_name)?;
        if !zone.contains(record_name) {
            return Err(Error::InvalidDomain {
                domain: record_name.to_string(),
                message: format!("Not part of hosted zone {}", zone.name),
            });
        }
        Ok(Self {
            zone: zone.clone(),
            record_name: record_name.to_string(),
            record_type: "A".into(),
            target,
        })
    }

    pub fn dependencies(&self) -> Vec<LogicalId> {
        match &self.target {
            RecordTarget::CloudFront(distr) => vec![distr.id().clone()],
        }
    }

    pub fn properties(&self) -> Value {
        json!({
            // record names are fully qualified
            "Name": format!("{}.", self.record_name),
            "Type": self.record_type,
            "HostedZoneId": self.zone.id,
            "AliasTarget": self.target.alias_target(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zone_ids_and_names_are_normalized() {
        let zone = HostedZone::new("/hostedzone/Z0123456789", "example.com.");
        assert_eq!(zone, HostedZone { id: "Z0123456789".into(), name: "example.com".into() });
        assert!(zone.contains("www.example.com"));
        assert!(zone.contains("example.com."));
        assert!(!zone.contains("notexample.com"));
    }

    #[test]
    fn composes_without_stray_dots() {
        assert_eq!(compose_domain("www", "example.com").unwrap(), "www.example.com");
        assert_eq!(compose_domain("a.b", "example.com").unwrap(), "a.b.example.com");
        assert!(compose_domain("www.", "example.com").is_err());
        assert!(compose_domain("www", ".example.com").is_err());
        assert!(compose_domain("", "example.com").is_err());
        assert!(compose_domain("www", "example.com.").is_err());
    }

    #[test]
    fn domain_rules() {
        assert!(validate_domain_name("*.example.com").is_ok());
        assert!(validate_domain_name("my-site.example.com").is_ok());
        let msg = |d: &str| validate_domain_name(d).unwrap_err().to_string();
        assert!(msg("www.*.example.com").contains("wildcard"));
        assert!(msg("-www.example.com").contains("dash"));
        assert!(msg("www_x.example.com").contains("May only contain"));
        assert!(msg("Example.com").contains("lowercase"));
        assert!(msg(&format!("{}.com", "a".repeat(64))).contains("63"));
    }

    #[test]
    fn alias_record_points_at_cloudfront() {
        let id = LogicalId::new("Distr").unwrap();
        let target = RecordTarget::CloudFront(Handle::new(id.clone()));
        let zone = HostedZone::new("Z123", "example.com");
        let record = ZoneRecord::alias_a("www.example.com", &zone, target).unwrap();
        assert_eq!(record.dependencies(), vec![id]);
        assert_eq!(record.properties(), json!({
            "Name": "www.example.com.",
            "Type": "A",
            "HostedZoneId": "Z123",
            "AliasTarget": {
                "DNSName": { "Fn::GetAtt": ["Distr", "DomainName"] },
                "HostedZoneId": "Z2FDTNDATAQYW2",
            }
        }));
    }

    #[test]
    fn records_must_be_inside_the_zone() {
        let target = RecordTarget::CloudFront(Handle::new(LogicalId::new("Distr").unwrap()));
        let zone = HostedZone::new("Z123", "example.com");
        let err = ZoneRecord::alias_a("www.example.org", &zone, target).unwrap_err();
        assert!(err.to_string().contains("Not part of hosted zone example.com"));
    }
}
