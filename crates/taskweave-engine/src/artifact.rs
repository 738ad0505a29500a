//! Artifact store — run-scoped blob tree
//!
//! Layout: `{artifacts_root}/{run_id}/{node_id}/{filename}`. URIs carry only
//! node and filename (`artifact://{node_id}/{filename}`); resolution is
//! always against a run, so runs stay self-contained on disk.

use std::path::{Path, PathBuf};
use taskweave_core::{ArtifactRef, Error, Result};
use tracing::debug;

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, run_id: &str, art: &ArtifactRef) -> Result<PathBuf> {
        // URIs come from tool output; refuse anything that could escape the tree.
        let bad = |s: &str| s.is_empty() || s.contains("..");
        if bad(run_id)
            || bad(&art.node)
            || art.node.contains('/')
            || bad(&art.filename)
            || Path::new(&art.filename).is_absolute()
        {
            return Err(Error::MissingArtifact(format!("invalid artifact path `{art}`")));
        }
        Ok(self.root.join(run_id).join(&art.node).join(&art.filename))
    }

    /// Write bytes for `(run, node, filename)` and return the reference.
    pub async fn put(
        &self,
        run_id: &str,
        node_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef> {
        let art = ArtifactRef {
            node: node_id.to_string(),
            filename: filename.to_string(),
        };
        let path = self.blob_path(run_id, &art)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(run_id, uri = %art, bytes = bytes.len(), "artifact written");
        Ok(art)
    }

    /// Resolve a reference to bytes within a run's scope.
    pub async fn read(&self, run_id: &str, art: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.blob_path(run_id, art)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| Error::MissingArtifact(format!("{art} (run {run_id})")))
    }

    pub async fn exists(&self, run_id: &str, art: &ArtifactRef) -> bool {
        match self.blob_path(run_id, art) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Copy one artifact between run scopes. Used when an idempotency-cache
    /// hit adopts a prior run's output: the bytes move into the new run so
    /// its URIs resolve locally for the run's whole lifetime.
    pub async fn copy_between_runs(
        &self,
        from_run: &str,
        to_run: &str,
        art: &ArtifactRef,
    ) -> Result<()> {
        let bytes = self.read(from_run, art).await?;
        self.put(to_run, &art.node, &art.filename, &bytes).await?;
        Ok(())
    }

    /// Every artifact URI present under a run, sorted.
    pub async fn list_run(&self, run_id: &str) -> Result<Vec<String>> {
        let run_dir = self.root.join(run_id);
        let mut uris = Vec::new();
        let mut nodes = match tokio::fs::read_dir(&run_dir).await {
            Ok(dir) => dir,
            Err(_) => return Ok(uris),
        };
        while let Some(node_entry) = nodes.next_entry().await? {
            if !node_entry.file_type().await?.is_dir() {
                continue;
            }
            let node_name = node_entry.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(node_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let file_name = file_entry.file_name().to_string_lossy().into_owned();
                uris.push(format!("artifact://{node_name}/{file_name}"));
            }
        }
        uris.sort();
        Ok(uris)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let art = store.put("run-1", "plotly_render", "plot.png", b"png-bytes").await.unwrap();
        assert_eq!(art.to_string(), "artifact://plotly_render/plot.png");
        let bytes = store.read("run-1", &art).await.unwrap();
        assert_eq!(bytes, b"png-bytes");
    }

    #[tokio::test]
    async fn missing_blob_is_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let art = ArtifactRef {
            node: "sql".into(),
            filename: "rows.csv".into(),
        };
        let err = store.read("run-1", &art).await.unwrap_err();
        assert_eq!(err.kind(), "MissingArtifact");
        assert!(!store.exists("run-1", &art).await);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let art = ArtifactRef {
            node: "sql".into(),
            filename: "../../etc/passwd".into(),
        };
        assert!(store.read("run-1", &art).await.is_err());
    }

    #[tokio::test]
    async fn copy_between_runs_rescopes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let art = store.put("run-1", "sql", "rows.csv", b"a,b").await.unwrap();
        store.copy_between_runs("run-1", "run-2", &art).await.unwrap();
        assert!(store.exists("run-2", &art).await);
        assert_eq!(store.read("run-2", &art).await.unwrap(), b"a,b");
    }

    #[tokio::test]
    async fn list_run_collects_uris() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        store.put("run-1", "sql", "rows.csv", b"x").await.unwrap();
        store.put("run-1", "plotly_render", "plot.png", b"y").await.unwrap();
        let uris = store.list_run("run-1").await.unwrap();
        assert_eq!(
            uris,
            vec![
                "artifact://plotly_render/plot.png",
                "artifact://sql/rows.csv",
            ]
        );
        assert!(store.list_run("run-2").await.unwrap().is_empty());
    }
}
