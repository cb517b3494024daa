use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt,
    marker::PhantomData,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{Error, Result};

mod s3_bucket;
pub use s3_bucket::*;
mod cloudfront;
pub use cloudfront::*;
mod route53;
pub use route53::*;
mod acm_cert;
pub use acm_cert::*;
mod bucket_deployment;
pub use bucket_deployment::*;

// higher level resources:
mod static_website;
pub use static_website::*;

/// the name of a resource inside its template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new<S: AsRef<str>>(id: S) -> Result<Self> {
        aws_cfn_stack::verify_resource_name(id.as_ref()).map_err(Error::Template)?;
        Ok(Self(id.as_ref().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed reference to a descriptor that lives in a [`ResourceGraph`].
/// Handles can only be obtained by adding a descriptor to a graph, so a descriptor
/// holding a handle always points at something constructed earlier in the same pass.
pub struct Handle<T> {
    id: LogicalId,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(id: LogicalId) -> Self {
        Self { id, _ty: PhantomData }
    }

    pub fn id(&self) -> &LogicalId {
        &self.id
    }

    pub fn reference(&self) -> Expr {
        Expr::Ref(self.id.clone())
    }

    pub fn get_att(&self, attribute: &str) -> Expr {
        Expr::GetAtt(self.id.clone(), attribute.to_string())
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        LogicalId::deserialize(deserializer).map(Self::new)
    }
}

/// a CloudFormation value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    Ref(LogicalId),
    GetAtt(LogicalId, String),
    Join(String, Vec<Expr>),
}

impl Expr {
    pub fn join<S: Into<String>>(separator: S, parts: Vec<Expr>) -> Self {
        Expr::Join(separator.into(), parts)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Expr::Literal(s) => Value::String(s.clone()),
            Expr::Ref(id) => json!({ "Ref": id.as_str() }),
            Expr::GetAtt(id, attr) => json!({ "Fn::GetAtt": [id.as_str(), attr] }),
            Expr::Join(sep, parts) => {
                let parts: Vec<Value> = parts.iter().map(Expr::to_value).collect();
                json!({ "Fn::Join": [sep, parts] })
            }
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(s.to_string())
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(s)
    }
}

/// logical ids targeted by `Ref` / `Fn::GetAtt` anywhere inside a rendered value.
/// pseudo parameters (`AWS::Region` etc.) are skipped.
pub fn referenced_ids(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_refs(value, &mut out);
    out
}

fn collect_refs(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    if !id.starts_with("AWS::") {
                        out.insert(id.clone());
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    if let Some(Value::String(id)) = args.first() {
                        out.insert(id.clone());
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_refs(v, out);
            }
        }
        _ => {}
    }
}

/// every descriptor the stack can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resource {
    OriginAccessIdentity(OriginAccessIdentity),
    Bucket(Bucket),
    AccessPolicy(AccessPolicy),
    Certificate(Certificate),
    Distribution(Distribution),
    ZoneRecord(ZoneRecord),
    Deployment(Deployment),
}

/// implemented by every descriptor type so that graphs can hand back typed views.
pub trait Descriptor: Into<Resource> {
    fn from_resource(resource: &Resource) -> Option<&Self>;
}

macro_rules! descriptor_variants {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Resource {
                fn from(d: $variant) -> Self {
                    Resource::$variant(d)
                }
            }

            impl Descriptor for $variant {
                fn from_resource(resource: &Resource) -> Option<&Self> {
                    match resource {
                        Resource::$variant(d) => Some(d),
                        _ => None,
                    }
                }
            }
        )*
    };
}

descriptor_variants!(
    OriginAccessIdentity,
    Bucket,
    AccessPolicy,
    Certificate,
    Distribution,
    ZoneRecord,
    Deployment,
);

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::OriginAccessIdentity(_) => "OriginAccessIdentity",
            Resource::Bucket(_) => "Bucket",
            Resource::AccessPolicy(_) => "AccessPolicy",
            Resource::Certificate(_) => "Certificate",
            Resource::Distribution(_) => "Distribution",
            Resource::ZoneRecord(_) => "ZoneRecord",
            Resource::Deployment(_) => "Deployment",
        }
    }

    /// `None` for descriptors that are carried out by the deploy runtime
    /// instead of CloudFormation.
    pub fn cfn_type(&self) -> Option<&'static str> {
        match self {
            Resource::OriginAccessIdentity(_) => Some(OriginAccessIdentity::CFN_TYPE),
            Resource::Bucket(_) => Some(Bucket::CFN_TYPE),
            Resource::AccessPolicy(_) => Some(AccessPolicy::CFN_TYPE),
            Resource::Certificate(_) => Some(Certificate::CFN_TYPE),
            Resource::Distribution(_) => Some(Distribution::CFN_TYPE),
            Resource::ZoneRecord(_) => Some(ZoneRecord::CFN_TYPE),
            Resource::Deployment(_) => None,
        }
    }

    pub fn properties(&self) -> Value {
        match self {
            Resource::OriginAccessIdentity(d) => d.properties(),
            Resource::Bucket(d) => d.properties(),
            Resource::AccessPolicy(d) => d.properties(),
            Resource::Certificate(d) => d.properties(),
            Resource::Distribution(d) => d.properties(),
            Resource::ZoneRecord(d) => d.properties(),
            Resource::Deployment(_) => Value::Null,
        }
    }

    /// the descriptors this one holds handles to.
    pub fn dependencies(&self) -> Vec<LogicalId> {
        match self {
            Resource::OriginAccessIdentity(_) | Resource::Bucket(_) => vec![],
            Resource::AccessPolicy(d) => d.dependencies(),
            Resource::Certificate(_) => vec![],
            Resource::Distribution(d) => d.dependencies(),
            Resource::ZoneRecord(d) => d.dependencies(),
            Resource::Deployment(d) => d.dependencies(),
        }
    }

    /// some resources must live in a fixed region no matter where the stack goes.
    pub fn pinned_region(&self) -> Option<&str> {
        match self {
            Resource::Certificate(d) => Some(d.region()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: LogicalId,
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// The resource descriptors of one synthesis pass, in insertion order,
/// with explicit dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    nodes: Vec<Node>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Descriptor>(&mut self, id: &str, descriptor: T) -> Result<Handle<T>> {
        self.insert(id, descriptor.into(), None)
    }

    /// like `add`, but the node is deployed to `region` instead of the stack's home region.
    pub fn add_in_region<T: Descriptor>(&mut self, id: &str, descriptor: T, region: &str) -> Result<Handle<T>> {
        aws_regions::verify_region(region).map_err(Error::InvalidEnvironment)?;
        self.insert(id, descriptor.into(), Some(region.to_string()))
    }

    fn insert<T>(&mut self, id: &str, resource: Resource, region: Option<String>) -> Result<Handle<T>> {
        let id = LogicalId::new(id)?;
        if self.get(&id).is_some() {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let mut depends_on: Vec<LogicalId> = vec![];
        for dep in resource.dependencies() {
            if self.get(&dep).is_none() {
                return Err(Error::UnknownDependency { from: id.to_string(), to: dep.to_string() });
            }
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }
        let region = match (resource.pinned_region(), region) {
            (Some(pinned), Some(asked)) if pinned != asked => {
                return Err(Error::Template(format!("{} must be deployed to {pinned}, not {asked}", resource.kind())));
            }
            (Some(pinned), _) => Some(pinned.to_string()),
            (None, asked) => asked,
        };
        tracing::debug!(id = %id, kind = resource.kind(), ?depends_on, "adding resource");
        self.nodes.push(Node { id: id.clone(), resource, depends_on, region });
        Ok(Handle::new(id))
    }

    /// an ordering edge on top of the ones implied by handles.
    pub fn add_dependency<A, B>(&mut self, from: &Handle<A>, on: &Handle<B>) -> Result<()> {
        if self.get(on.id()).is_none() {
            return Err(Error::UnknownDependency { from: from.id().to_string(), to: on.id().to_string() });
        }
        if from.id() == on.id() {
            return Err(Error::Cycle(vec![from.id().to_string()]));
        }
        let node = self.nodes.iter_mut().find(|n| &n.id == from.id())
            .ok_or_else(|| Error::UnknownDependency { from: from.id().to_string(), to: on.id().to_string() })?;
        if !node.depends_on.contains(on.id()) {
            node.depends_on.push(on.id().clone());
        }
        Ok(())
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn descriptor<T: Descriptor>(&self, handle: &Handle<T>) -> Option<&T> {
        self.get(handle.id()).and_then(|n| T::from_resource(&n.resource))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Unique ids, known edge targets, every emitted reference backed by an edge, no cycles.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            aws_cfn_stack::verify_resource_name(node.id.as_str()).map_err(Error::Template)?;
            if !seen.insert(node.id.as_str()) {
                return Err(Error::DuplicateId(node.id.to_string()));
            }
        }
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(Error::UnknownDependency { from: node.id.to_string(), to: dep.to_string() });
                }
            }
            for target in referenced_ids(&node.resource.properties()) {
                if !node.depends_on.iter().any(|d| d.as_str() == target) {
                    return Err(Error::UndeclaredReference { from: node.id.to_string(), to: target });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm. Ties keep insertion order so the output is deterministic.
    pub fn topological_order(&self) -> Result<Vec<&Node>> {
        let index: HashMap<&LogicalId, usize> = self.nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();
        let mut remaining: Vec<usize> = self.nodes.iter().map(|n| n.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                let dep_index = *index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    from: node.id.to_string(),
                    to: dep.to_string(),
                })?;
                dependents[dep_index].push(i);
            }
        }
        let mut ready: VecDeque<usize> = (0..self.nodes.len()).filter(|i| remaining[*i] == 0).collect();
        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            out.push(&self.nodes[i]);
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.push_back(d);
                }
            }
        }
        if out.len() != self.nodes.len() {
            let stuck = self.nodes.iter().enumerate()
                .filter(|(i, _)| remaining[*i] > 0)
                .map(|(_, n)| n.id.to_string())
                .collect();
            return Err(Error::Cycle(stuck));
        }
        Ok(out)
    }
}
