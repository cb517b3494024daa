use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::resources::validate_domain_name;

pub const SUB_DOMAIN_KEY: &str = "subDomain";
pub const DOMAIN_NAME_KEY: &str = "domainName";
pub const ACCOUNT_VAR: &str = "AWS_ACCOUNT";
pub const REGION_VAR: &str = "AWS_REGION";
pub const CONTEXT_FILE: &str = "cdk.json";

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped,
/// and a value wrapped in matching quotes is unquoted.
pub fn parse_dot_env(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, val)) = line.split_once('=') {
            let val = val.trim();
            let val = match (val.chars().next(), val.chars().last()) {
                (Some(a), Some(b)) if val.len() >= 2 && a == b && (a == '"' || a == '\'') => &val[1..val.len() - 1],
                _ => val,
            };
            map.insert(key.trim().to_string(), val.to_string());
        }
    }
    map
}

pub fn load_dot_env(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)?;
    let map = parse_dot_env(&contents);
    tracing::debug!(path = %path.display(), vars = map.len(), "loaded .env file");
    Ok(map)
}

/// Where a stack is deployed. Either field may be empty, which makes the
/// stack environment-agnostic: it can be synthesized as long as nothing
/// needs to know the target, but lookups and deploys refuse it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
}

impl Environment {
    pub fn new<A: Into<String>, R: Into<String>>(account: A, region: R) -> Self {
        Self { account: account.into(), region: region.into() }
    }

    /// `AWS_ACCOUNT` / `AWS_REGION` from the process, falling back to `dot_env`.
    /// Variables already set in the process always win.
    pub fn from_env(dot_env: &HashMap<String, String>) -> Self {
        let read = |key: &str| -> String {
            std::env::var(key).ok()
                .filter(|v| !v.is_empty())
                .or_else(|| dot_env.get(key).cloned())
                .unwrap_or_default()
        };
        let env = Self::new(read(ACCOUNT_VAR), read(REGION_VAR));
        if env.is_agnostic() {
            tracing::warn!(account = %env.account, region = %env.region, "{ACCOUNT_VAR} or {REGION_VAR} not set, stack is environment-agnostic");
        }
        env
    }

    pub fn is_agnostic(&self) -> bool {
        self.account.is_empty() || self.region.is_empty()
    }

    /// checks whatever is set. an agnostic environment is valid.
    pub fn validate(&self) -> Result<()> {
        if !self.account.is_empty() {
            aws_regions::verify_account(&self.account).map_err(Error::InvalidEnvironment)?;
        }
        if !self.region.is_empty() {
            aws_regions::verify_region(&self.region).map_err(Error::InvalidEnvironment)?;
        }
        Ok(())
    }

    pub fn require(&self, stack: &str, action: &'static str) -> Result<()> {
        if self.is_agnostic() {
            return Err(Error::EnvironmentRequired {
                stack: stack.to_string(),
                account: self.account.clone(),
                region: self.region.clone(),
                action,
            });
        }
        Ok(())
    }
}

/// Context values, in the order they were set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    values: IndexMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_pair(pair: &str) -> Result<(String, String)> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
            _ => Err(Error::InvalidContext {
                key: pair.to_string(),
                message: "Must be of the form KEY=VALUE".into(),
            }),
        }
    }

    /// reads the `context` object of a `cdk.json` style file.
    /// strings are taken as is, numbers and booleans are stringified.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let raw: Value = serde_json::from_str(&contents)?;
        let mut out = Self::new();
        let Some(context) = raw.get("context") else {
            tracing::debug!(path = %path.display(), "context file has no context object");
            return Ok(out);
        };
        let Value::Object(map) = context else {
            return Err(Error::InvalidContext {
                key: "context".into(),
                message: format!("Expected an object in {}", path.display()),
            });
        };
        for (key, val) in map {
            let val = match val {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(Error::InvalidContext {
                    key: key.clone(),
                    message: format!("Expected a string, found {other}"),
                }),
            };
            out.set(key, val);
        }
        tracing::debug!(path = %path.display(), values = out.values.len(), "loaded context file");
        Ok(out)
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.values.insert(key.into(), value.into());
    }

    /// applies `KEY=VALUE` pairs on top of what is already there.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, pairs: &[S]) -> Result<()> {
        for pair in pairs {
            let (key, value) = Self::parse_pair(pair.as_ref())?;
            self.set(key, value);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// present and not empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(Error::MissingContext { key: key.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    pub sub_domain: String,
    pub domain_name: String,
    pub env: Environment,
}

impl StackConfig {
    pub fn from_context(context: &Context, env: Environment) -> Result<Self> {
        let sub_domain = context.require(SUB_DOMAIN_KEY)?;
        let domain_name = context.require(DOMAIN_NAME_KEY)?;
        for (key, value) in [(SUB_DOMAIN_KEY, sub_domain), (DOMAIN_NAME_KEY, domain_name)] {
            if let Err(e) = validate_domain_name(value) {
                return Err(Error::InvalidContext { key: key.into(), message: e.to_string() });
            }
        }
        env.validate()?;
        Ok(Self {
            sub_domain: sub_domain.to_string(),
            domain_name: domain_name.to_string(),
            env,
        })
    }
}

/// looks for `file_name` in `search_dir` and up to four of its parents.
pub fn find_closest_file(mut search_dir: PathBuf, file_name: &str) -> Option<PathBuf> {
    for _ in 0..5 {
        search_dir.push(file_name);
        if search_dir.is_file() {
            return Some(search_dir);
        }
        search_dir.pop();
        if !search_dir.pop() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dot_env_parsing() {
        let map = parse_dot_env("# comment\n\nAWS_ACCOUNT=123456789012\nexport AWS_REGION = \"eu-west-1\"\nBROKEN\n");
        assert_eq!(map.len(), 2);
        assert_eq!(map["AWS_ACCOUNT"], "123456789012");
        assert_eq!(map["AWS_REGION"], "eu-west-1");
    }

    #[test]
    fn agnostic_environment_is_constructible_but_not_usable() {
        let env = Environment::new("", "eu-west-1");
        assert!(env.is_agnostic());
        env.validate().unwrap();
        let err = env.require("S3AngularStack", "deploy").unwrap_err();
        assert!(matches!(err, Error::EnvironmentRequired { ref account, .. } if account.is_empty()));
        assert!(err.to_string().contains("Set AWS_ACCOUNT and AWS_REGION to deploy"));

        Environment::new("123456789012", "eu-west-1").require("S3AngularStack", "deploy").unwrap();
    }

    #[test]
    fn environment_values_are_validated() {
        assert!(Environment::new("1234", "").validate().is_err());
        assert!(Environment::new("", "moon-east-1").validate().is_err());
    }

    #[test]
    fn context_pairs() {
        assert_eq!(Context::parse_pair("subDomain=www").unwrap(), ("subDomain".into(), "www".into()));
        assert_eq!(Context::parse_pair("k=a=b").unwrap(), ("k".into(), "a=b".into()));
        assert!(Context::parse_pair("subDomain").is_err());
        assert!(Context::parse_pair("=www").is_err());
    }

    #[test]
    fn cli_overrides_file_context() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_FILE);
        std::fs::write(&path, r#"{ "app": "cargo run", "context": { "subDomain": "www", "domainName": "example.com", "retries": 3 } }"#).unwrap();
        let mut context = Context::from_file(&path).unwrap();
        assert_eq!(context.get("retries"), Some("3"));
        context.apply_overrides(&["subDomain=app"]).unwrap();
        let config = StackConfig::from_context(&context, Environment::default()).unwrap();
        assert_eq!(config.sub_domain, "app");
        assert_eq!(config.domain_name, "example.com");
    }

    #[test]
    fn missing_and_malformed_context() {
        let mut context = Context::new();
        context.set(SUB_DOMAIN_KEY, "www");
        let err = StackConfig::from_context(&context, Environment::default()).unwrap_err();
        assert!(matches!(err, Error::MissingContext { key } if key == DOMAIN_NAME_KEY));

        context.set(DOMAIN_NAME_KEY, "");
        assert!(matches!(StackConfig::from_context(&context, Environment::default()), Err(Error::MissingContext { .. })));

        context.set(DOMAIN_NAME_KEY, ".example.com");
        let err = StackConfig::from_context(&context, Environment::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidContext { key, .. } if key == DOMAIN_NAME_KEY));

        context.set(DOMAIN_NAME_KEY, "Example.com");
        let err = StackConfig::from_context(&context, Environment::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidContext { ref key, .. } if key == DOMAIN_NAME_KEY));
        assert!(err.to_string().contains("domainName"));
    }

    #[test]
    fn finds_context_file_in_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(tmp.path().join(CONTEXT_FILE), "{}").unwrap();
        assert_eq!(find_closest_file(nested, CONTEXT_FILE), Some(tmp.path().join(CONTEXT_FILE)));
        assert_eq!(find_closest_file(tmp.path().join("a"), "nope.json"), None);
    }
}
