use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// a local directory, uploaded verbatim.
    Asset { path: String },
}

impl Source {
    pub fn asset<P: AsRef<Path>>(path: P) -> Self {
        Source::Asset { path: path.as_ref().to_string_lossy().into_owned() }
    }
}

/// Copies sources into a bucket after the stacks are up, then optionally
/// invalidates a distribution. Carried out by the deploy runtime, so it never
/// shows up as a CloudFormation resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub sources: Vec<Source>,
    pub destination_bucket: Handle<Bucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Handle<Distribution>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distribution_paths: Vec<String>,
}

impl Deployment {
    pub fn new(sources: Vec<Source>, destination_bucket: &Handle<Bucket>) -> Self {
        Self {
            sources,
            destination_bucket: destination_bucket.clone(),
            distribution: None,
            distribution_paths: vec![],
        }
    }

    pub fn with_invalidation(mut self, distribution: &Handle<Distribution>, paths: &[&str]) -> Self {
        self.distribution = Some(distribution.clone());
        self.distribution_paths = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn dependencies(&self) -> Vec<LogicalId> {
        let mut out = vec![self.destination_bucket.id().clone()];
        if let Some(distr) = &self.distribution {
            out.push(distr.id().clone());
        }
        out
    }
}

/// one file of an asset directory. `key` is the `/` separated path relative
/// to the asset root, which is also the object key it gets uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub key: String,
    pub path: PathBuf,
}

pub fn collect_asset_files(dir: &Path) -> Result<Vec<AssetFile>> {
    let asset_err = |message: String| Error::Asset { path: dir.display().to_string(), message };
    if !dir.is_dir() {
        return Err(asset_err("Not a directory".into()));
    }
    let mut files = vec![];
    for entry in walkdir::WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| asset_err(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).map_err(|e| asset_err(e.to_string()))?;
        let key: Vec<String> = relative.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(AssetFile { key: key.join("/"), path: entry.path().to_path_buf() });
    }
    Ok(files)
}

/// SHA-256 over every file's key, length and contents, in key order.
/// Identical trees give identical fingerprints wherever they live.
pub fn fingerprint_asset(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for file in collect_asset_files(dir)? {
        let contents = std::fs::read(&file.path)?;
        hasher.update(file.key.as_bytes());
        hasher.update([0u8]);
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedAsset {
    pub hash: String,
    /// relative to the assembly directory.
    pub dir_name: String,
    pub file_count: usize,
}

/// copies `source` into `<out_dir>/asset.<hash>/`. A staged copy is only
/// reused when its own fingerprint still matches, otherwise it is replaced.
/// Files land in a `.partial` sibling first and are renamed into place.
pub fn stage_asset(source: &Path, out_dir: &Path) -> Result<StagedAsset> {
    let files = collect_asset_files(source)?;
    if files.is_empty() {
        tracing::warn!(path = %source.display(), "asset directory is empty, nothing will be uploaded");
    }
    let hash = fingerprint_asset(source)?;
    let dir_name = format!("asset.{hash}");
    let staged = out_dir.join(&dir_name);
    let asset = StagedAsset { hash, dir_name, file_count: files.len() };

    if staged.is_dir() {
        if fingerprint_asset(&staged)? == asset.hash {
            tracing::debug!(dir = %staged.display(), "asset already staged");
            return Ok(asset);
        }
        tracing::warn!(dir = %staged.display(), "staged asset does not match its source, staging again");
        std::fs::remove_dir_all(&staged)?;
    }

    let partial = out_dir.join(format!("{}.partial", asset.dir_name));
    if partial.exists() {
        std::fs::remove_dir_all(&partial)?;
    }
    std::fs::create_dir_all(&partial)?;
    for file in &files {
        let dest = partial.join(&file.key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&file.path, &dest)?;
    }
    std::fs::rename(&partial, &staged)?;
    tracing::info!(files = files.len(), dir = %staged.display(), "staged asset");
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_site(dir: &Path) {
        std::fs::create_dir_all(dir.join("assets")).unwrap();
        std::fs::write(dir.join("index.html"), "<app-root></app-root>").unwrap();
        std::fs::write(dir.join("assets/logo.svg"), "<svg/>").unwrap();
        std::fs::write(dir.join("main.js"), "console.log(1)").unwrap();
    }

    #[test]
    fn files_are_keyed_relative_to_the_root_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_site(tmp.path());
        let keys: Vec<String> = collect_asset_files(tmp.path()).unwrap().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["assets/logo.svg", "index.html", "main.js"]);
    }

    #[test]
    fn fingerprint_depends_on_content_not_location() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_site(a.path());
        write_site(b.path());
        let hash = fingerprint_asset(a.path()).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, fingerprint_asset(b.path()).unwrap());

        std::fs::write(b.path().join("main.js"), "console.log(2)").unwrap();
        assert_ne!(hash, fingerprint_asset(b.path()).unwrap());
    }

    #[test]
    fn stages_a_copy() {
        let site = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_site(site.path());
        let staged = stage_asset(site.path(), out.path()).unwrap();
        assert_eq!(staged.file_count, 3);
        assert_eq!(staged.dir_name, format!("asset.{}", staged.hash));
        let copied = std::fs::read_to_string(out.path().join(&staged.dir_name).join("assets/logo.svg")).unwrap();
        assert_eq!(copied, "<svg/>");
        // same content, same directory
        assert_eq!(stage_asset(site.path(), out.path()).unwrap(), staged);
    }

    #[test]
    fn same_length_edits_are_staged_again() {
        let site = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(site.path().join("main.js"), "version=131").unwrap();
        let first = stage_asset(site.path(), out.path()).unwrap();

        std::fs::write(site.path().join("main.js"), "version=212").unwrap();
        let second = stage_asset(site.path(), out.path()).unwrap();
        assert_ne!(first.hash, second.hash);
        let copied = std::fs::read_to_string(out.path().join(&second.dir_name).join("main.js")).unwrap();
        assert_eq!(copied, "version=212");
    }

    #[test]
    fn incomplete_staged_copy_is_replaced() {
        let site = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(site.path().join("index.html"), "<app-root></app-root>").unwrap();
        std::fs::write(site.path().join("main.js"), "bootstrap()").unwrap();
        let hash = fingerprint_asset(site.path()).unwrap();
        // left behind by an interrupted run
        std::fs::create_dir_all(out.path().join(format!("asset.{hash}"))).unwrap();
        let partial = out.path().join(format!("asset.{hash}.partial"));
        std::fs::create_dir_all(&partial).unwrap();
        std::fs::write(partial.join("index.html"), "<app-").unwrap();

        let staged = stage_asset(site.path(), out.path()).unwrap();
        let on_disk = collect_asset_files(&out.path().join(&staged.dir_name)).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(staged.file_count, on_disk.len());
        assert!(!out.path().join(format!("{}.partial", staged.dir_name)).exists());
    }

    #[test]
    fn missing_directory_is_an_asset_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = collect_asset_files(&tmp.path().join("dist")).unwrap_err();
        assert!(matches!(err, Error::Asset { .. }));
    }

    #[test]
    fn deployment_depends_on_bucket_and_distribution() {
        let bucket: Handle<Bucket> = Handle::new(LogicalId::new("Bucket").unwrap());
        let distr: Handle<Distribution> = Handle::new(LogicalId::new("Distr").unwrap());
        let deployment = Deployment::new(vec![Source::asset("./dist")], &bucket)
            .with_invalidation(&distr, &["/*"]);
        assert_eq!(deployment.dependencies(), vec![bucket.id().clone(), distr.id().clone()]);
        assert_eq!(deployment.distribution_paths, vec!["/*"]);
        assert_eq!(Resource::from(deployment).cfn_type(), None);
    }
}
