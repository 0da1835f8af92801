//! Publishing synthesized audio to a public object store.

use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::synth::waveform::Waveform;
use async_trait::async_trait;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A waveform written locally and uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArtifact {
    pub local_path: PathBuf,
    pub bucket: String,
    pub object_key: String,
    pub public_url: String,
}

/// Put-object store returning a publicly resolvable URL.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Bucket or namespace objects land in.
    fn bucket(&self) -> &str;

    /// Upload `local` as `key` and return its public URL.
    async fn put_object(&self, local: &Path, key: &str) -> Result<String>;
}

#[async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for Box<T> {
    fn bucket(&self) -> &str {
        (**self).bucket()
    }

    async fn put_object(&self, local: &Path, key: &str) -> Result<String> {
        (**self).put_object(local, key).await
    }
}

/// S3-style store: `PUT {endpoint}/{bucket}/{key}` with a public-read ACL.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
}

#[cfg(feature = "http")]
impl HttpArtifactStore {
    /// Without `public_base_url`, URLs take the `https://{bucket}.s3.amazonaws.com` form.
    pub fn new(endpoint: &str, bucket: &str, public_base_url: Option<&str>) -> Self {
        let public_base_url = match public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{bucket}.s3.amazonaws.com"),
        };
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            public_base_url,
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, local: &Path, key: &str) -> Result<String> {
        let body = tokio::fs::read(local).await?;
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let response = self
            .client
            .put(&url)
            .header("x-amz-acl", "public-read")
            .header("content-type", "audio/wav")
            .body(body)
            .send()
            .await
            .map_err(|e| EchovoxError::Publish {
                message: format!("{url}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(EchovoxError::Publish {
                message: format!("{url} returned status {}", response.status()),
            });
        }
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

/// Store that copies objects into a served directory.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    directory: PathBuf,
    public_base_url: Option<String>,
}

impl DirectoryArtifactStore {
    /// URLs are `{public_base_url}/{key}`, or `file://` paths when none is set.
    pub fn new(directory: impl Into<PathBuf>, public_base_url: Option<&str>) -> Self {
        Self {
            directory: directory.into(),
            public_base_url: public_base_url.map(|b| b.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl ArtifactStore for DirectoryArtifactStore {
    fn bucket(&self) -> &str {
        self.directory.to_str().unwrap_or("")
    }

    async fn put_object(&self, local: &Path, key: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let target = self.directory.join(key);
        tokio::fs::copy(local, &target).await?;
        Ok(match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("file://{}", target.display()),
        })
    }
}

/// Mock artifact store for testing
#[derive(Debug, Default)]
pub struct MockArtifactStore {
    uploads: Mutex<Vec<String>>,
    should_fail: bool,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upload
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Object keys uploaded so far
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    fn bucket(&self) -> &str {
        "mock-bucket"
    }

    async fn put_object(&self, local: &Path, key: &str) -> Result<String> {
        if self.should_fail {
            return Err(EchovoxError::Publish {
                message: "mock upload failure".to_string(),
            });
        }
        if !local.is_file() {
            return Err(EchovoxError::Publish {
                message: format!("{} was not written", local.display()),
            });
        }
        self.uploads
            .lock()
            .map_err(|_| EchovoxError::Other("mock uploads lock poisoned".to_string()))?
            .push(key.to_string());
        Ok(format!("https://mock-bucket.example/{key}"))
    }
}

const NAME_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random `[A-Z0-9]{7}.wav` object name.
pub fn artifact_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let stem: String = (0..defaults::ARTIFACT_NAME_LEN)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect();
    format!("{stem}.wav")
}

/// Writes waveforms to a scratch directory and uploads them.
pub struct Publisher<A> {
    store: A,
    output_dir: PathBuf,
}

impl<A: ArtifactStore> Publisher<A> {
    pub fn new(store: A, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
        }
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    /// Write, upload, then remove the local copy.
    ///
    /// # Errors
    /// Any write or upload failure is reported as `EchovoxError::Publish`.
    pub async fn publish(&self, waveform: &Waveform) -> Result<UploadArtifact> {
        let object_key = artifact_name(&mut rand::thread_rng());
        let local_path = self.output_dir.join(&object_key);

        fs::create_dir_all(&self.output_dir).map_err(|e| publish_error(&local_path, &e.to_string()))?;
        waveform
            .write_wav(&local_path)
            .map_err(|e| publish_error(&local_path, &e.to_string()))?;

        let public_url = match self.store.put_object(&local_path, &object_key).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(path = %local_path.display(), "Upload failed, keeping local file");
                return Err(match e {
                    EchovoxError::Publish { .. } => e,
                    other => publish_error(&local_path, &other.to_string()),
                });
            }
        };

        if let Err(e) = fs::remove_file(&local_path) {
            tracing::warn!(path = %local_path.display(), error = %e, "Failed to remove uploaded file");
        }

        Ok(UploadArtifact {
            local_path,
            bucket: self.store.bucket().to_string(),
            object_key,
            public_url,
        })
    }
}

fn publish_error(path: &Path, message: &str) -> EchovoxError {
    EchovoxError::Publish {
        message: format!("{}: {}", path.display(), message),
    }
}
