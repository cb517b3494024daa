use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aws_cfn_stack::{ResourceOutput, SavedResource, SavedTemplate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::resources::{fingerprint_asset, stage_asset, Resource, ResourceGraph, S3AngularStack, Source, StackOutput};
use crate::variables::Environment;

pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const DEFAULT_OUT_DIR: &str = "cdk.out";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TemplateFormat {
    #[default]
    Json,
    Yaml,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "json",
            TemplateFormat::Yaml => "yaml",
        }
    }
}

/// an output of an earlier stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub stack: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackArtifact {
    pub stack_name: String,
    pub account: String,
    pub region: String,
    pub template_file: String,
    /// stacks that must be deployed first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// template parameter -> the output that fills it.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, OutputRef>,
    /// outputs meant for people. cross-stack exports are left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentArtifact {
    pub id: String,
    /// staged copy, relative to the assembly directory.
    pub asset_dir: String,
    pub asset_hash: String,
    pub destination_bucket: OutputRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<OutputRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidation_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// in deploy order.
    pub stacks: Vec<StackArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<DeploymentArtifact>,
}

impl Manifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Assembly(format!("Failed to read {}: {e}", path.display())))?;
        let manifest: Manifest = serde_json::from_str(&contents)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::Assembly(format!(
                "Unsupported manifest version {:?}, expected {MANIFEST_VERSION:?}", manifest.version,
            )));
        }
        Ok(manifest)
    }

    pub fn stack(&self, name: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|s| s.stack_name == name)
    }
}

/// Everything `deploy` needs: one template per region and the assets to upload.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub manifest: Manifest,
    pub templates: IndexMap<String, SavedTemplate>,
    pub graph: ResourceGraph,
    /// local source directory of each deployment, same order as the manifest's.
    asset_sources: Vec<PathBuf>,
}

impl Assembly {
    pub fn from_stack(stack: &S3AngularStack) -> Result<Self> {
        let description = format!("Static website for {}", stack.domain);
        Self::from_graph(&stack.stack_id, &stack.config.env, &stack.graph, &stack.outputs, &description)
    }

    /// Nodes without a region go to the `stack_id` stack, anything pinned
    /// to another region goes to `<stack_id>-<region>`. References between
    /// them become an output on one side and a parameter on the other.
    pub fn from_graph(
        stack_id: &str,
        env: &Environment,
        graph: &ResourceGraph,
        outputs: &IndexMap<String, StackOutput>,
        description: &str,
    ) -> Result<Self> {
        graph.validate()?;
        let order = graph.topological_order()?;

        let mut wiring = Wiring::default();
        for node in &order {
            let region = node.region.clone().unwrap_or_else(|| env.region.clone());
            let stack_name = if region == env.region {
                stack_id.to_string()
            } else {
                aws_cfn_stack::validate_stack_name(&format!("{stack_id}-{region}")).map_err(Error::Assembly)?
            };
            if !wiring.artifacts.contains_key(&stack_name) {
                let mut template = SavedTemplate::default();
                template.description = Some(if stack_name == stack_id {
                    description.to_string()
                } else {
                    format!("{region} resources of {stack_id}")
                });
                wiring.templates.insert(stack_name.clone(), template);
                wiring.artifacts.insert(stack_name.clone(), StackArtifact {
                    template_file: template_file(&stack_name, TemplateFormat::Json),
                    stack_name: stack_name.clone(),
                    account: env.account.clone(),
                    region,
                    dependencies: vec![],
                    parameters: IndexMap::new(),
                    outputs: vec![],
                });
            }
            wiring.stack_of.insert(node.id.to_string(), stack_name);
        }
        // the home stack always exists, even if everything was pinned elsewhere
        if !wiring.artifacts.contains_key(stack_id) {
            return Err(Error::Assembly(format!("No resources left in stack {stack_id}")));
        }

        let mut deployments = vec![];
        let mut asset_sources = vec![];
        for node in &order {
            let stack_name = wiring.stack_name(node.id.as_str())?;
            match &node.resource {
                Resource::Deployment(d) => {
                    let id = node.id.to_string();
                    let bucket = wiring.export(
                        &format!("{id}DestinationBucket"),
                        node.id.as_str(),
                        d.destination_bucket.bucket_name().to_value(),
                    )?;
                    let distribution = match &d.distribution {
                        Some(distr) => Some(wiring.export(
                            &format!("{id}DistributionId"),
                            node.id.as_str(),
                            distr.distribution_id().to_value(),
                        )?),
                        None => None,
                    };
                    for source in &d.sources {
                        let Source::Asset { path } = source;
                        let path = PathBuf::from(path);
                        let asset_hash = fingerprint_asset(&path)?;
                        tracing::debug!(deployment = %id, hash = %asset_hash, path = %path.display(), "fingerprinted asset");
                        deployments.push(DeploymentArtifact {
                            id: id.clone(),
                            asset_dir: format!("asset.{asset_hash}"),
                            asset_hash,
                            destination_bucket: bucket.clone(),
                            distribution: distribution.clone(),
                            invalidation_paths: d.distribution_paths.clone(),
                        });
                        asset_sources.push(path);
                    }
                }
                resource => {
                    let Some(ty) = resource.cfn_type() else { continue };
                    let properties = wiring.rewrite(&resource.properties(), &stack_name)?;
                    let depends_on: Vec<String> = node.depends_on.iter()
                        .filter(|d| wiring.stack_of.get(d.as_str()) == Some(&stack_name))
                        .filter(|d| graph.get(d).map(|n| n.resource.cfn_type().is_some()).unwrap_or(false))
                        .map(|d| d.to_string())
                        .collect();
                    let saved = SavedResource { ty: ty.to_string(), properties, depends_on };
                    wiring.template(&stack_name)?.add_resource(node.id.as_str(), saved).map_err(Error::Assembly)?;
                }
            }
        }

        for (name, output) in outputs {
            let value = wiring.rewrite(&output.value.to_value(), stack_id)?;
            wiring.template(stack_id)?
                .add_output(name, ResourceOutput { description: output.description.clone(), value })
                .map_err(Error::Assembly)?;
            if let Some(artifact) = wiring.artifacts.get_mut(stack_id) {
                artifact.outputs.push(name.clone());
            }
        }

        let stacks = deploy_order(wiring.artifacts)?;
        let mut templates = IndexMap::new();
        for stack in &stacks {
            if let Some(template) = wiring.templates.swap_remove(&stack.stack_name) {
                templates.insert(stack.stack_name.clone(), template);
            }
        }
        tracing::info!(stacks = stacks.len(), deployments = deployments.len(), "assembled");
        Ok(Self {
            manifest: Manifest { version: MANIFEST_VERSION.to_string(), stacks, deployments },
            templates,
            graph: graph.clone(),
            asset_sources,
        })
    }

    pub fn write(&self, dir: &Path, format: TemplateFormat) -> Result<Manifest> {
        std::fs::create_dir_all(dir)?;
        let mut manifest = self.manifest.clone();
        for stack in manifest.stacks.iter_mut() {
            let template = self.templates.get(&stack.stack_name)
                .ok_or_else(|| Error::Assembly(format!("No template for stack {}", stack.stack_name)))?;
            stack.template_file = template_file(&stack.stack_name, format);
            let body = match format {
                TemplateFormat::Json => template.to_json().map_err(Error::Template)?,
                TemplateFormat::Yaml => serde_yaml::to_string(template)?,
            };
            std::fs::write(dir.join(&stack.template_file), body)?;
            tracing::debug!(file = %stack.template_file, "wrote template");
        }
        for (deployment, source) in manifest.deployments.iter_mut().zip(&self.asset_sources) {
            let staged = stage_asset(source, dir)?;
            if staged.hash != deployment.asset_hash {
                tracing::warn!(deployment = %deployment.id, "asset changed since synthesis, using the staged copy");
            }
            deployment.asset_hash = staged.hash;
            deployment.asset_dir = staged.dir_name;
        }
        std::fs::write(dir.join(GRAPH_FILE), serde_json::to_string_pretty(&self.graph)?)?;
        std::fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        tracing::info!(dir = %dir.display(), "wrote cloud assembly");
        Ok(manifest)
    }
}

pub fn template_file(stack_name: &str, format: TemplateFormat) -> String {
    format!("{stack_name}.template.{}", format.extension())
}

#[derive(Default)]
struct Wiring {
    /// logical id -> owning stack
    stack_of: HashMap<String, String>,
    templates: IndexMap<String, SavedTemplate>,
    artifacts: IndexMap<String, StackArtifact>,
}

impl Wiring {
    fn stack_name(&self, logical_id: &str) -> Result<String> {
        self.stack_of.get(logical_id).cloned()
            .ok_or_else(|| Error::Assembly(format!("{logical_id:?} is not part of any stack")))
    }

    fn template(&mut self, stack_name: &str) -> Result<&mut SavedTemplate> {
        self.templates.get_mut(stack_name)
            .ok_or_else(|| Error::Assembly(format!("No template for stack {stack_name}")))
    }

    /// Adds `value` as an output of the stack that owns `value`'s reference
    /// (or `owner`'s stack for literals). Exporting twice is a no-op.
    fn export(&mut self, name: &str, owner: &str, value: Value) -> Result<OutputRef> {
        let target = reference_target(&value).map(str::to_string).unwrap_or_else(|| owner.to_string());
        let stack = self.stack_name(&target)?;
        let template = self.template(&stack)?;
        if !template.outputs.contains_key(name) {
            let output = ResourceOutput { description: None, value };
            template.add_output(name, output).map_err(Error::Assembly)?;
        }
        Ok(OutputRef { stack, output: name.to_string() })
    }

    fn import(&mut self, consumer: &str, name: &str, from: OutputRef) -> Result<()> {
        let description = format!("{} from {}", from.output, from.stack);
        self.template(consumer)?.add_parameter(name, Some(description)).map_err(Error::Assembly)?;
        let artifact = self.artifacts.get_mut(consumer)
            .ok_or_else(|| Error::Assembly(format!("No artifact for stack {consumer}")))?;
        if !artifact.dependencies.contains(&from.stack) {
            artifact.dependencies.push(from.stack.clone());
        }
        artifact.parameters.insert(name.to_string(), from);
        Ok(())
    }

    /// Copy of `value` as `consumer` sees it: references to resources in
    /// other stacks are swapped for parameters.
    fn rewrite(&mut self, value: &Value, consumer: &str) -> Result<Value> {
        match value {
            Value::Object(map) => {
                if let Some(target) = reference_target(value) {
                    let producer = self.stack_name(target)?;
                    if producer == consumer {
                        return Ok(value.clone());
                    }
                    let name = cross_stack_name(value, target);
                    let from = self.export(&name, target, value.clone())?;
                    self.import(consumer, &name, from)?;
                    tracing::debug!(%producer, %consumer, parameter = %name, "wired cross-stack reference");
                    return Ok(json!({ "Ref": name }));
                }
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.rewrite(v, consumer)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let items = items.iter().map(|v| self.rewrite(v, consumer)).collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(items))
            }
            other => Ok(other.clone()),
        }
    }
}

/// the logical id of a `{"Ref": ..}` or `{"Fn::GetAtt": [..]}` value.
fn reference_target(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    if let Some(id) = map.get("Ref").and_then(Value::as_str) {
        return if id.starts_with("AWS::") { None } else { Some(id) };
    }
    map.get("Fn::GetAtt")?.as_array()?.first()?.as_str()
}

/// `<id>Ref` for a Ref, `<id><Attribute>` for a GetAtt.
fn cross_stack_name(value: &Value, target: &str) -> String {
    let attr = value.get("Fn::GetAtt")
        .and_then(|v| v.get(1))
        .and_then(Value::as_str)
        .map(|a| a.chars().filter(char::is_ascii_alphanumeric).collect::<String>());
    match attr {
        Some(attr) => format!("{target}{attr}"),
        None => format!("{target}Ref"),
    }
}

/// stacks whose dependencies are all placed, repeatedly, keeping first-seen order on ties.
fn deploy_order(artifacts: IndexMap<String, StackArtifact>) -> Result<Vec<StackArtifact>> {
    let mut pending: Vec<StackArtifact> = artifacts.into_values().collect();
    let mut out: Vec<StackArtifact> = vec![];
    while !pending.is_empty() {
        let ready = pending.iter().position(|s| {
            s.dependencies.iter().all(|d| out.iter().any(|placed| &placed.stack_name == d))
        });
        match ready {
            Some(i) => out.push(pending.remove(i)),
            None => {
                let names: Vec<&str> = pending.iter().map(|s| s.stack_name.as_str()).collect();
                return Err(Error::Assembly(format!("Cyclic references between stacks {names:?}")));
            }
        }
    }
    Ok(out)
}
