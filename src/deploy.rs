use std::collections::HashMap;
use std::path::Path;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream};
use indexmap::IndexMap;

use crate::assembly::{DeploymentArtifact, Manifest, OutputRef, StackArtifact};
use crate::error::{Error, Result};
use crate::resources::collect_asset_files;
use crate::variables::Environment;

/// outputs of every deployed stack, by stack name.
pub type StackOutputs = IndexMap<String, HashMap<String, String>>;

async fn sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

/// every stack needs a concrete account and region before anything is sent to AWS.
pub fn check_environment(manifest: &Manifest) -> Result<()> {
    if manifest.stacks.is_empty() {
        return Err(Error::Assembly("Manifest contains no stacks".into()));
    }
    for stack in &manifest.stacks {
        let env = Environment::new(&stack.account, &stack.region);
        env.require(&stack.stack_name, "deploy")?;
        env.validate()?;
    }
    Ok(())
}

pub fn output_value(outputs: &StackOutputs, output: &OutputRef) -> Result<String> {
    outputs.get(&output.stack)
        .and_then(|o| o.get(&output.output))
        .cloned()
        .ok_or_else(|| Error::Deploy(format!("Stack {} has no output {}", output.stack, output.output)))
}

pub fn resolve_parameters(stack: &StackArtifact, outputs: &StackOutputs) -> Result<IndexMap<String, String>> {
    let mut out = IndexMap::new();
    for (name, from) in &stack.parameters {
        out.insert(name.clone(), output_value(outputs, from)?);
    }
    Ok(out)
}

pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "webmanifest" => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

async fn verify_caller_account(stack: &StackArtifact) -> Result<()> {
    let config = sdk_config(&stack.region).await;
    let identity = aws_sdk_sts::Client::new(&config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| Error::Deploy(format!("Failed to get caller identity: {}", DisplayErrorContext(&e))))?;
    let caller = identity.account().unwrap_or_default();
    if caller != stack.account {
        return Err(Error::Deploy(format!(
            "Credentials are for account {caller}, but stack {} targets {}", stack.stack_name, stack.account,
        )));
    }
    Ok(())
}

/// Applies the assembly in `dir`: stacks in manifest order, then every deployment.
pub async fn deploy_assembly(dir: &Path, manifest: &Manifest) -> Result<StackOutputs> {
    check_environment(manifest)?;
    let mut checked_accounts: Vec<&str> = vec![];
    for stack in &manifest.stacks {
        if !checked_accounts.contains(&stack.account.as_str()) {
            verify_caller_account(stack).await?;
            checked_accounts.push(&stack.account);
        }
    }

    let mut outputs = StackOutputs::new();
    for stack in &manifest.stacks {
        let body = std::fs::read_to_string(dir.join(&stack.template_file))?;
        let parameters = resolve_parameters(stack, &outputs)?;
        tracing::info!(stack = %stack.stack_name, region = %stack.region, "deploying stack");
        let client = aws_cfn_stack::client_for_region(&stack.region).await;
        let stack_outputs = aws_cfn_stack::deploy_stack(&client, &stack.stack_name, &body, &parameters)
            .await
            .map_err(|e| Error::Deploy(format!("Stack {}: {e}", stack.stack_name)))?;
        outputs.insert(stack.stack_name.clone(), stack_outputs);
    }

    for deployment in &manifest.deployments {
        run_deployment(dir, manifest, deployment, &outputs).await?;
    }
    Ok(outputs)
}

async fn run_deployment(
    dir: &Path,
    manifest: &Manifest,
    deployment: &DeploymentArtifact,
    outputs: &StackOutputs,
) -> Result<()> {
    let bucket = output_value(outputs, &deployment.destination_bucket)?;
    let region = manifest.stack(&deployment.destination_bucket.stack)
        .map(|s| s.region.clone())
        .ok_or_else(|| Error::Deploy(format!("Unknown stack {}", deployment.destination_bucket.stack)))?;
    let config = sdk_config(&region).await;

    let s3 = aws_sdk_s3::Client::new(&config);
    let files = collect_asset_files(&dir.join(&deployment.asset_dir))?;
    tracing::info!(deployment = %deployment.id, %bucket, files = files.len(), "uploading asset");
    for file in &files {
        let body = ByteStream::from_path(&file.path)
            .await
            .map_err(|e| Error::Asset { path: file.path.display().to_string(), message: e.to_string() })?;
        s3.put_object()
            .bucket(&bucket)
            .key(&file.key)
            .content_type(content_type_for(&file.key))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Deploy(format!("Failed to upload {}: {}", file.key, DisplayErrorContext(&e))))?;
        tracing::debug!(key = %file.key, "uploaded");
    }

    let Some(distribution) = &deployment.distribution else {
        return Ok(());
    };
    if deployment.invalidation_paths.is_empty() {
        return Ok(());
    }
    let distribution_id = output_value(outputs, distribution)?;
    let paths = Paths::builder()
        .quantity(deployment.invalidation_paths.len() as i32)
        .set_items(Some(deployment.invalidation_paths.clone()))
        .build()
        .map_err(|e| Error::Deploy(e.to_string()))?;
    let batch = InvalidationBatch::builder()
        .paths(paths)
        .caller_reference(format!("{}-{}", deployment.id, deployment.asset_hash))
        .build()
        .map_err(|e| Error::Deploy(e.to_string()))?;
    let resp = aws_sdk_cloudfront::Client::new(&config)
        .create_invalidation()
        .distribution_id(&distribution_id)
        .invalidation_batch(batch)
        .send()
        .await
        .map_err(|e| Error::Deploy(format!("Failed to invalidate {distribution_id}: {}", DisplayErrorContext(&e))))?;
    let invalidation = resp.invalidation().map(|i| i.id().to_string()).unwrap_or_default();
    tracing::info!(%distribution_id, %invalidation, paths = ?deployment.invalidation_paths, "created invalidation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::MANIFEST_VERSION;
    use pretty_assertions::assert_eq;

    fn artifact(name: &str, account: &str, region: &str) -> StackArtifact {
        StackArtifact {
            stack_name: name.into(),
            account: account.into(),
            region: region.into(),
            template_file: format!("{name}.template.json"),
            dependencies: vec![],
            parameters: IndexMap::new(),
            outputs: vec![],
        }
    }

    fn manifest(stacks: Vec<StackArtifact>) -> Manifest {
        Manifest { version: MANIFEST_VERSION.into(), stacks, deployments: vec![] }
    }

    #[test]
    fn agnostic_stacks_are_refused() {
        let m = manifest(vec![
            artifact("S3AngularStack-us-east-1", "123456789012", "us-east-1"),
            artifact("S3AngularStack", "", "eu-west-1"),
        ]);
        let err = check_environment(&m).unwrap_err();
        assert!(matches!(err, Error::EnvironmentRequired { stack, action: "deploy", .. } if stack == "S3AngularStack"));
        assert!(check_environment(&manifest(vec![])).is_err());
        check_environment(&manifest(vec![artifact("S3AngularStack", "123456789012", "eu-west-1")])).unwrap();
    }

    #[test]
    fn parameters_come_from_earlier_outputs() {
        let mut stack = artifact("S3AngularStack", "123456789012", "eu-west-1");
        let from = OutputRef { stack: "S3AngularStack-us-east-1".into(), output: "MySiteCertificateRef".into() };
        stack.parameters.insert("MySiteCertificateRef".into(), from);

        let mut outputs = StackOutputs::new();
        assert!(matches!(resolve_parameters(&stack, &outputs), Err(Error::Deploy(_))));

        let arn = "arn:aws:acm:us-east-1:123456789012:certificate/abc";
        outputs.insert("S3AngularStack-us-east-1".into(), HashMap::from([("MySiteCertificateRef".to_string(), arn.to_string())]));
        let params = resolve_parameters(&stack, &outputs).unwrap();
        assert_eq!(params["MySiteCertificateRef"], arn);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("main.3f2a.JS"), "application/javascript");
        assert_eq!(content_type_for("assets/logo.svg"), "image/svg+xml");
        assert_eq!(content_type_for("3rdpartylicenses"), "application/octet-stream");
    }
}
