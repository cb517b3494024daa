use std::collections::HashMap;

use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::{
    config::Region,
    error::DisplayErrorContext,
    types::{Capability, OnFailure, Parameter, Stack, StackStatus},
    Client,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, TemplateParameter>,
    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, ResourceOutput>,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: None,
            parameters: Default::default(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    pub fn add_resource(&mut self, name: &str, resource: SavedResource) -> Result<(), String> {
        verify_resource_name(name)?;
        if self.resources.contains_key(name) || self.parameters.contains_key(name) {
            return Err(format!("Duplicate logical id {:?} in template", name));
        }
        self.resources.insert(name.to_string(), resource);
        Ok(())
    }

    /// adds a String parameter. adding the same parameter twice is a no-op.
    pub fn add_parameter(&mut self, name: &str, description: Option<String>) -> Result<(), String> {
        verify_resource_name(name)?;
        if self.resources.contains_key(name) {
            return Err(format!("Parameter {:?} collides with a resource of the same name", name));
        }
        self.parameters.entry(name.to_string()).or_insert(TemplateParameter {
            ty: "String".to_string(),
            description,
        });
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, output: ResourceOutput) -> Result<(), String> {
        verify_resource_name(name)?;
        if self.outputs.contains_key(name) {
            return Err(format!("Duplicate output {:?} in template", name));
        }
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    // pretty so that the template is readable in the Cfn console
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize template\n{:#?}", e))
    }
}

pub fn verify_resource_name(resource_name: &str) -> Result<(), String> {
    if resource_name.len() > 255 {
        return Err(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name));
    }
    if resource_name.is_empty() {
        return Err(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name));
    }
    Ok(())
}

pub fn validate_stack_name(stack_name: &str) -> Result<String, String> {
    let stack_name = stack_name.replace('_', "-");
    // A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
    // It must start with an alphabetical character and can't be longer than 128 characters.
    let restriction = "Must only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.";
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(format!("Invalid stack name {:?}\n{}", stack_name, restriction)),
    }
    if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("Invalid stack name {:?}\n{}", stack_name, restriction));
    }
    if stack_name.len() > 128 {
        return Err(format!("Invalid stack name {:?}\n{}", stack_name, restriction));
    }
    Ok(stack_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackProgress {
    Done,
    InProgress,
    Failed,
}

/// the rollback states count as failures: they mean the change we
/// just submitted did not go through.
pub fn classify_status(status: &StackStatus) -> StackProgress {
    match status {
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => StackProgress::Done,

        StackStatus::CreateInProgress |
        StackStatus::DeleteInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => StackProgress::InProgress,

        _ => StackProgress::Failed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackChange {
    Created,
    Updated,
    Unchanged,
}

pub async fn client_for_region(region: &str) -> Client {
    let shared_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await;
    Client::new(&shared_config)
}

pub async fn does_stack_exist(client: &Client, name: &str) -> Result<bool, String> {
    match client.describe_stacks().stack_name(name).send().await {
        Ok(_) => Ok(true),
        Err(e) => {
            let e_str = format!("{}", DisplayErrorContext(&e));
            if e_str.contains("does not exist") {
                return Ok(false);
            }
            Err(e_str)
        }
    }
}

async fn find_stack(client: &Client, name: &str) -> Result<Stack, String> {
    let out = client.describe_stacks().stack_name(name).send().await
        .map_err(|e| format!("{}", DisplayErrorContext(&e)))?;
    out.stacks().first().cloned().ok_or_else(|| format!("Stack {name} not found"))
}

/// returns None while the stack is still changing.
pub async fn describe_stack(client: &Client, name: &str) -> Result<Option<Stack>, String> {
    let stack = find_stack(client, name).await?;
    let status = stack.stack_status().ok_or_else(|| format!("Stack {name} not found"))?;
    match classify_status(status) {
        StackProgress::Done => Ok(Some(stack)),
        StackProgress::InProgress => Ok(None),
        StackProgress::Failed => Err(format!(
            "Stack {name} ended in {}: {}",
            status.as_str(),
            stack.stack_status_reason().unwrap_or("Failed to get stack failure reason"),
        )),
    }
}

pub fn collect_outputs(stack: &Stack) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for output in stack.outputs() {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}

pub async fn wait_for_output(client: &Client, name: &str) -> Result<HashMap<String, String>, String> {
    loop {
        let dur = tokio::time::Duration::from_millis(700);
        tokio::time::sleep(dur).await;
        match describe_stack(client, name).await? {
            Some(stack) => return Ok(collect_outputs(&stack)),
            None => tracing::debug!(stack = name, "still waiting"),
        }
    }
}

fn to_parameters(parameters: &IndexMap<String, String>) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|(key, value)| Parameter::builder().parameter_key(key).parameter_value(value).build())
        .collect()
}

pub async fn create_or_update_stack(
    client: &Client,
    name: &str,
    body: &str,
    parameters: &IndexMap<String, String>,
) -> Result<StackChange, String> {
    let exists = does_stack_exist(client, name).await?;
    if exists {
        tracing::info!(stack = name, "updating stack");
        let res = client
            .update_stack()
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(to_parameters(parameters)))
            .send()
            .await;
        if let Err(e) = res {
            let e_str = format!("{}", DisplayErrorContext(&e));
            if e_str.contains("No updates are to be performed") {
                return Ok(StackChange::Unchanged);
            }
            return Err(e_str);
        }
        Ok(StackChange::Updated)
    } else {
        tracing::info!(stack = name, "creating stack");
        client
            .create_stack()
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(to_parameters(parameters)))
            .send()
            .await
            .map_err(|e| format!("{}", DisplayErrorContext(&e)))?;
        Ok(StackChange::Created)
    }
}

/// creates or updates the stack and returns its outputs once it settles.
pub async fn deploy_stack(
    client: &Client,
    name: &str,
    body: &str,
    parameters: &IndexMap<String, String>,
) -> Result<HashMap<String, String>, String> {
    match create_or_update_stack(client, name, body, parameters).await? {
        StackChange::Unchanged => {
            tracing::info!(stack = name, "no changes");
            let stack = find_stack(client, name).await?;
            Ok(collect_outputs(&stack))
        }
        StackChange::Created | StackChange::Updated => wait_for_output(client, name).await,
    }
}
