use std::path::{Path, PathBuf};

use aws_config::BehaviorVersion;
use aws_sdk_route53::{config::Region, error::DisplayErrorContext};
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::resources::HostedZone;
use crate::variables::Environment;

pub const CONTEXT_CACHE_FILE: &str = "cdk.context.json";

/// What to look up, and for which environment. Lookups are always scoped to
/// a concrete account and region, so agnostic environments cannot build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZoneQuery {
    pub account: String,
    pub region: String,
    pub domain_name: String,
}

impl HostedZoneQuery {
    pub fn new(stack: &str, env: &Environment, domain_name: &str) -> Result<Self> {
        env.require(stack, "look up hosted zones")?;
        Ok(Self {
            account: env.account.clone(),
            region: env.region.clone(),
            domain_name: domain_name.to_string(),
        })
    }

    pub fn cache_key(&self) -> String {
        format!("hosted-zone:account={}:domainName={}:region={}", self.account, self.domain_name, self.region)
    }
}

/// Resolves a domain to the public hosted zone that serves it.
/// Synthesis calls this synchronously, so implementations must not block on the network.
pub trait HostedZoneProvider {
    fn lookup(&self, query: &HostedZoneQuery) -> Result<HostedZone>;
}

/// Serves lookups from the `cdk.context.json` cache written by the `lookup` command.
#[derive(Debug, Clone, Default)]
pub struct ContextProvider {
    path: PathBuf,
    entries: IndexMap<String, Value>,
}

impl ContextProvider {
    /// a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.is_file() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            IndexMap::new()
        };
        Ok(Self { path: path.to_path_buf(), entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert(&mut self, query: &HostedZoneQuery, zone: &HostedZone) {
        let value = json!({
            "Id": format!("/hostedzone/{}", zone.id),
            "Name": format!("{}.", zone.name),
        });
        self.entries.insert(query.cache_key(), value);
    }

    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, contents + "\n")?;
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "saved lookup cache");
        Ok(())
    }
}

impl HostedZoneProvider for ContextProvider {
    fn lookup(&self, query: &HostedZoneQuery) -> Result<HostedZone> {
        let key = query.cache_key();
        let entry = self.entries.get(&key).ok_or_else(|| Error::MissingLookup { key: key.clone() })?;
        let zone = HostedZone::new(cached_field(entry, "Id", query, &key)?, cached_field(entry, "Name", query, &key)?);
        if zone.name != query.domain_name {
            return Err(Error::HostedZoneLookup {
                domain: query.domain_name.clone(),
                message: format!("Cached entry {key:?} is for {}", zone.name),
            });
        }
        tracing::debug!(zone = %zone.id, domain = %zone.name, "hosted zone from cache");
        Ok(zone)
    }
}

fn cached_field<'a>(entry: &'a Value, name: &str, query: &HostedZoneQuery, key: &str) -> Result<&'a str> {
    entry.get(name).and_then(Value::as_str).ok_or_else(|| Error::HostedZoneLookup {
        domain: query.domain_name.clone(),
        message: format!("Cached entry {key:?} has no {name:?} string"),
    })
}

/// a hosted zone as Route53 lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCandidate {
    pub id: String,
    pub name: String,
    pub private_zone: bool,
}

/// exactly one public zone whose name is the domain must match.
pub fn select_zone(domain_name: &str, candidates: &[ZoneCandidate]) -> Result<HostedZone> {
    let fqdn = format!("{domain_name}.");
    let matching: Vec<&ZoneCandidate> = candidates.iter()
        .filter(|c| c.name == fqdn && !c.private_zone)
        .collect();
    match matching.as_slice() {
        [zone] => Ok(HostedZone::new(&zone.id, &zone.name)),
        [] => Err(Error::HostedZoneLookup {
            domain: domain_name.to_string(),
            message: "No public hosted zone found".into(),
        }),
        many => Err(Error::HostedZoneLookup {
            domain: domain_name.to_string(),
            message: format!("Found {} public hosted zones, expected exactly 1", many.len()),
        }),
    }
}

pub async fn lookup_route53(query: &HostedZoneQuery) -> Result<HostedZone> {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(query.region.clone()))
        .load()
        .await;
    let client = aws_sdk_route53::Client::new(&config);
    let lookup_err = |message: String| Error::HostedZoneLookup { domain: query.domain_name.clone(), message };
    let resp = client.list_hosted_zones_by_name()
        .dns_name(format!("{}.", query.domain_name))
        .send()
        .await
        .map_err(|e| lookup_err(DisplayErrorContext(&e).to_string()))?;
    let candidates: Vec<ZoneCandidate> = resp.hosted_zones().iter().map(|z| ZoneCandidate {
        id: z.id().to_string(),
        name: z.name().to_string(),
        private_zone: z.config().map(|c| c.private_zone()).unwrap_or(false),
    }).collect();
    tracing::debug!(candidates = candidates.len(), "listed hosted zones");
    let zone = select_zone(&query.domain_name, &candidates)?;
    tracing::info!(zone = %zone.id, domain = %zone.name, "found hosted zone");
    Ok(zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn query() -> HostedZoneQuery {
        HostedZoneQuery::new("S3AngularStack", &Environment::new("123456789012", "eu-west-1"), "example.com").unwrap()
    }

    #[test]
    fn agnostic_environments_cannot_look_up() {
        let err = HostedZoneQuery::new("S3AngularStack", &Environment::new("123456789012", ""), "example.com").unwrap_err();
        assert!(matches!(err, Error::EnvironmentRequired { action: "look up hosted zones", .. }));
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(query().cache_key(), "hosted-zone:account=123456789012:domainName=example.com:region=eu-west-1");
    }

    #[test]
    fn cache_round_trips_through_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_CACHE_FILE);
        let mut provider = ContextProvider::load(&path).unwrap();
        assert!(matches!(provider.lookup(&query()), Err(Error::MissingLookup { .. })));

        provider.insert(&query(), &HostedZone::new("Z0123", "example.com"));
        provider.save().unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw[query().cache_key()], json!({ "Id": "/hostedzone/Z0123", "Name": "example.com." }));

        let reloaded = ContextProvider::load(&path).unwrap();
        assert_eq!(reloaded.lookup(&query()).unwrap(), HostedZone::new("Z0123", "example.com"));
    }

    #[test]
    fn malformed_cache_entries_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTEXT_CACHE_FILE);
        let mut raw = serde_json::Map::new();
        raw.insert(query().cache_key(), json!({ "Id": 5 }));
        std::fs::write(&path, Value::Object(raw).to_string()).unwrap();
        let provider = ContextProvider::load(&path).unwrap();
        assert!(matches!(provider.lookup(&query()), Err(Error::HostedZoneLookup { .. })));
    }

    #[test]
    fn selects_the_single_public_exact_match() {
        let candidate = |id: &str, name: &str, private_zone: bool| ZoneCandidate { id: id.into(), name: name.into(), private_zone };
        let zones = vec![
            candidate("/hostedzone/ZPRIV", "example.com.", true),
            candidate("/hostedzone/ZPUB", "example.com.", false),
            candidate("/hostedzone/ZOTHER", "example.com.au.", false),
        ];
        assert_eq!(select_zone("example.com", &zones).unwrap(), HostedZone::new("ZPUB", "example.com"));
        assert!(select_zone("example.org", &zones).is_err());

        let dupes = vec![candidate("A", "example.com.", false), candidate("B", "example.com.", false)];
        let err = select_zone("example.com", &dupes).unwrap_err();
        assert!(err.to_string().contains("Found 2 public hosted zones"));
    }
}
