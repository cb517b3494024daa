use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteConfiguration {
    pub index_document: String,
    pub error_document: String,
}

impl Default for WebsiteConfiguration {
    fn default() -> Self {
        Self {
            index_document: "index.html".into(),
            error_document: "error.html".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// physical name of the bucket. must be globally unique.
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<WebsiteConfiguration>,
    /// grants `s3:GetObject` on every object to everyone.
    #[serde(default)]
    pub public_read_access: bool,
}

impl Bucket {
    pub const CFN_TYPE: &'static str = "AWS::S3::Bucket";

    pub fn new<S: AsRef<str>>(bucket_name: S) -> Result<Self> {
        let bucket_name = bucket_name.as_ref();
        validate_bucket_name(bucket_name)?;
        Ok(Self {
            bucket_name: bucket_name.to_string(),
            website: None,
            public_read_access: false,
        })
    }

    pub fn with_website(mut self, website: WebsiteConfiguration) -> Self {
        self.website = Some(website);
        self
    }

    pub fn with_public_read_access(mut self, public: bool) -> Self {
        self.public_read_access = public;
        self
    }

    pub fn properties(&self) -> Value {
        let mut props = serde_json::Map::new();
        props.insert("BucketName".into(), Value::String(self.bucket_name.clone()));
        if let Some(website) = &self.website {
            props.insert("WebsiteConfiguration".into(), json!({
                "IndexDocument": website.index_document,
                "ErrorDocument": website.error_document,
            }));
        }
        // new buckets block public policies by default, so the public-read
        // statement would be rejected without this.
        if self.public_read_access {
            props.insert("PublicAccessBlockConfiguration".into(), json!({
                "BlockPublicAcls": true,
                "IgnorePublicAcls": true,
                "BlockPublicPolicy": false,
                "RestrictPublicBuckets": false,
            }));
        }
        Value::Object(props)
    }
}

impl Handle<Bucket> {
    pub fn bucket_name(&self) -> Expr {
        self.reference()
    }

    pub fn arn(&self) -> Expr {
        self.get_att("Arn")
    }

    /// `<bucket arn>/<pattern>`
    pub fn arn_for_objects(&self, pattern: &str) -> Expr {
        Expr::join("", vec![self.arn(), format!("/{pattern}").into()])
    }

    pub fn domain_name(&self) -> Expr {
        self.get_att("DomainName")
    }

    pub fn regional_domain_name(&self) -> Expr {
        self.get_att("RegionalDomainName")
    }
}

pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |message: &str| Error::InvalidBucketName { name: name.to_string(), message: message.to_string() };
    if name.len() > 63 || name.len() < 3 {
        return Err(invalid("Must be between 3 and 63 characters"));
    }
    let valid_char_check = |c: char| -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
    };
    if !name.chars().all(valid_char_check) {
        return Err(invalid("May only contain lowercase letters, numbers, dots, and dashes"));
    }
    let first_char = name.chars().next().unwrap_or('.');
    let last_char = name.chars().last().unwrap_or('.');
    if !first_char.is_ascii_alphanumeric() || !last_char.is_ascii_alphanumeric() {
        return Err(invalid("First and last character must be either lowercase letter, or number"));
    }
    if name.contains("..") {
        return Err(invalid("May not contain two consecutive dots"));
    }
    if name.split('.').count() == 4 && name.split('.').all(|part| part.parse::<u8>().is_ok()) {
        return Err(invalid("May not be formatted as an IP address"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Principal {
    Anyone,
    /// the S3 canonical user of an OAI in the same graph.
    OriginAccessIdentity(Handle<OriginAccessIdentity>),
}

impl Principal {
    fn to_value(&self) -> Value {
        match self {
            Principal::Anyone => Value::String("*".into()),
            Principal::OriginAccessIdentity(oai) => json!({ "CanonicalUser": oai.s3_canonical_user_id() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub principal: Principal,
    /// object key pattern under the bucket, `*` for everything.
    pub object_pattern: String,
}

impl PolicyStatement {
    pub fn get_object(principal: Principal) -> Self {
        Self {
            actions: vec!["s3:GetObject".to_string()],
            principal,
            object_pattern: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub bucket: Handle<Bucket>,
    pub statements: Vec<PolicyStatement>,
}

impl AccessPolicy {
    pub const CFN_TYPE: &'static str = "AWS::S3::BucketPolicy";

    /// starts with the public-read statement when the bucket asks for it.
    pub fn for_bucket(bucket: &Handle<Bucket>, descriptor: &Bucket) -> Self {
        let mut statements = vec![];
        if descriptor.public_read_access {
            statements.push(PolicyStatement::get_object(Principal::Anyone));
        }
        Self { bucket: bucket.clone(), statements }
    }

    pub fn with_statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn dependencies(&self) -> Vec<LogicalId> {
        let mut out = vec![self.bucket.id().clone()];
        for statement in &self.statements {
            if let Principal::OriginAccessIdentity(oai) = &statement.principal {
                out.push(oai.id().clone());
            }
        }
        out
    }

    pub fn properties(&self) -> Value {
        let statements: Vec<Value> = self.statements.iter().map(|s| {
            let action = match s.actions.as_slice() {
                [single] => Value::String(single.clone()),
                many => json!(many),
            };
            json!({
                "Action": action,
                "Effect": "Allow",
                "Principal": s.principal.to_value(),
                "Resource": self.bucket.arn_for_objects(&s.object_pattern),
            })
        }).collect();
        json!({
            "Bucket": self.bucket.bucket_name(),
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": statements,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn website_bucket_properties() {
        let bucket = Bucket::new("example.com").unwrap()
            .with_website(WebsiteConfiguration::default())
            .with_public_read_access(true);
        let props = bucket.properties();
        assert_eq!(props["BucketName"], "example.com");
        assert_eq!(props["WebsiteConfiguration"], json!({ "IndexDocument": "index.html", "ErrorDocument": "error.html" }));
        assert_eq!(props["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], false);
    }

    #[test]
    fn private_bucket_has_no_public_access_block_override() {
        let props = Bucket::new("example.com").unwrap().properties();
        assert_eq!(props, json!({ "BucketName": "example.com" }));
    }

    #[test]
    fn bucket_name_rules() {
        assert!(validate_bucket_name("example.com").is_ok());
        assert!(validate_bucket_name("my-site-123").is_ok());
        let msg = |n: &str| validate_bucket_name(n).unwrap_err().to_string();
        assert!(msg("ab").contains("Must be between 3 and 63 characters"));
        assert!(msg(&"a".repeat(64)).contains("Must be between 3 and 63 characters"));
        assert!(msg("Example.com").contains("May only contain lowercase letters"));
        assert!(msg("-example.com").contains("First and last character"));
        assert!(msg("example..com").contains("May not contain two consecutive dots"));
        assert!(msg("192.168.1.1").contains("IP address"));
    }

    #[test]
    fn public_and_oai_statements_are_both_granted() {
        let mut graph = ResourceGraph::new();
        let oai = graph.add("Oai", OriginAccessIdentity::new("OAI for test")).unwrap();
        let bucket = Bucket::new("example.com").unwrap().with_public_read_access(true);
        let b = graph.add("Bucket", bucket).unwrap();
        let policy = AccessPolicy::for_bucket(&b, graph.descriptor(&b).unwrap())
            .with_statement(PolicyStatement::get_object(Principal::OriginAccessIdentity(oai)));
        let props = policy.properties();
        let statements = props["PolicyDocument"]["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0]["Principal"], "*");
        assert_eq!(statements[1], json!({
            "Action": "s3:GetObject",
            "Effect": "Allow",
            "Principal": { "CanonicalUser": { "Fn::GetAtt": ["Oai", "S3CanonicalUserId"] } },
            "Resource": { "Fn::Join": ["", [{ "Fn::GetAtt": ["Bucket", "Arn"] }, "/*"]] },
        }));
        assert_eq!(props["Bucket"], json!({ "Ref": "Bucket" }));
    }
}
