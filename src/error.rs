use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing context value {key:?}. Provide it with `-c {key}=...` or in the context file")]
    MissingContext { key: String },

    #[error("Invalid context value for {key:?}: {message}")]
    InvalidContext { key: String, message: String },

    #[error("Invalid domain name {domain:?}: {message}")]
    InvalidDomain { domain: String, message: String },

    #[error("Invalid bucket name {name:?}: {message}")]
    InvalidBucketName { name: String, message: String },

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Stack {stack} is environment-agnostic (account={account:?}, region={region:?}). Set AWS_ACCOUNT and AWS_REGION to {action}")]
    EnvironmentRequired { stack: String, account: String, region: String, action: &'static str },

    #[error("No hosted zone cached for {key:?}. Run `s3_angular lookup` to resolve it")]
    MissingLookup { key: String },

    #[error("Hosted zone lookup for {domain:?} failed: {message}")]
    HostedZoneLookup { domain: String, message: String },

    #[error("Duplicate logical id {0:?}: each resource may be constructed once per synthesis")]
    DuplicateId(String),

    #[error("Resource {from:?} depends on unknown resource {to:?}")]
    UnknownDependency { from: String, to: String },

    #[error("Resource {from:?} references {to:?} without declaring a dependency on it")]
    UndeclaredReference { from: String, to: String },

    #[error("Dependency cycle between resources: {0:?}")]
    Cycle(Vec<String>),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Asset directory {path:?} is unusable: {message}")]
    Asset { path: String, message: String },

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Deploy failed: {0}")]
    Deploy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
