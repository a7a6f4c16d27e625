//! `object_store` backed transfer client.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::path::Path as ObjectPath;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::archive;
use crate::error::TransferError;
use crate::reference::{Descriptor, ObjectRef};
use crate::traits::Transfer;

/// S3 connection settings.
///
/// Credentials are never part of this configuration; the AWS backend reads
/// them from the standard `AWS_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Region override.
    pub region: Option<String>,
    /// Allow plain HTTP endpoints.
    pub allow_http: bool,
}

/// Size of the parts an upload is buffered and sent in.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

type Connector = dyn Fn(&str) -> Result<Arc<dyn ObjectStore>, TransferError> + Send + Sync;

/// Transfer client that opens one object store per bucket.
///
/// Archives are streamed in both directions; at most one upload part is
/// held in memory at a time.
pub struct StoreTransfer {
    connect: Box<Connector>,
    chunk_size: usize,
}

impl StoreTransfer {
    /// Create a client for Amazon S3 or an S3-compatible store.
    #[must_use]
    pub fn s3(config: TransferConfig) -> Self {
        Self::with_connector(move |bucket| {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_allow_http(config.allow_http);
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            let store = builder.build().map_err(|e| TransferError::Config {
                message: format!("failed to set up S3 transfer for bucket '{bucket}': {e}"),
            })?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        })
    }

    /// Create a client from a function that opens the store for a bucket.
    pub fn with_connector<F>(connect: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn ObjectStore>, TransferError> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the upload part size. S3 requires at least 5 MiB.
    #[must_use]
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    fn location(reference: &ObjectRef) -> ObjectPath {
        ObjectPath::from(reference.key.as_str())
    }
}

impl std::fmt::Debug for StoreTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransfer")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

/// Counts and hashes everything written through it.
struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        let digest = format!("sha256:{}", hex::encode(self.hasher.finalize()));
        (self.written, digest)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn join_error(path: &Path, err: tokio::task::JoinError) -> TransferError {
    TransferError::archive(path, std::io::Error::other(err))
}

#[async_trait]
impl Transfer for StoreTransfer {
    async fn download(&self, reference: &ObjectRef, dest: &Path) -> Result<(), TransferError> {
        let store = (self.connect)(&reference.bucket)?;

        tracing::debug!(%reference, dest = %dest.display(), "Downloading dataset");

        let result = store
            .get(&Self::location(reference))
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => TransferError::NotFound {
                    bucket: reference.bucket.clone(),
                    key: reference.key.clone(),
                },
                other => TransferError::Store(other),
            })?;
        let size = result.meta.size;

        // The archive codec is blocking; feed it from the response stream on
        // the blocking pool.
        let source = SyncIoBridge::new(StreamReader::new(result.into_stream()));
        let root = dest.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack(source, &root))
            .await
            .map_err(|e| join_error(dest, e))??;

        tracing::info!(%reference, size, "Dataset downloaded");
        Ok(())
    }

    async fn upload(
        &self,
        reference: &ObjectRef,
        src: &Path,
    ) -> Result<Descriptor, TransferError> {
        let store = (self.connect)(&reference.bucket)?;
        let location = Self::location(reference);

        tracing::debug!(%reference, src = %src.display(), "Uploading dataset");

        let writer = BufWriter::with_capacity(Arc::clone(&store), location.clone(), self.chunk_size);
        let sink = DigestWriter::new(SyncIoBridge::new(writer));
        let root = src.to_path_buf();
        let (size, digest) = tokio::task::spawn_blocking(move || {
            let mut sink = archive::pack(&root, sink)?;
            sink.inner
                .shutdown()
                .map_err(|e| TransferError::archive(&root, e))?;
            Ok::<_, TransferError>(sink.finish())
        })
        .await
        .map_err(|e| join_error(src, e))??;

        let meta = store.head(&location).await?;

        tracing::info!(%reference, size, %digest, "Dataset uploaded");
        Ok(Descriptor {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            size,
            digest,
            e_tag: meta.e_tag,
        })
    }
}
