//! Playground flow: one client instruction per connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Buckets, Completion, JobContext, JobService, LOG_TARGET, Phase, record};
use crate::backend::{Backend, BlobStore, RecordStore, SourceResolver};
use crate::error::{JobError, JobResult};
use crate::path::normalize_path;
use crate::protocol::{
    DeployFile, DeployFileType, DeployQuery, DeployQueryResponse, Message, Share, SourceTree,
};
use crate::upload::{ArtifactHash, UploadItem, Uploader, mime};

/// Serialized form of a shared playground snapshot.
#[derive(Serialize)]
struct SharePack<'a> {
    version: u32,
    source: &'a SourceTree,
    tags: &'a [String],
}

impl SharePack<'_> {
    /// Encode as existing share objects were written: compact JSON with
    /// HTML-significant characters escaped, followed by a newline. The
    /// object name is the hash of exactly these bytes.
    fn encode(&self) -> serde_json::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, HtmlSafeFormatter);
        self.serialize(&mut serializer)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

/// Compact formatter that writes `<`, `>`, `&`, U+2028 and U+2029 inside
/// strings as `\uXXXX` escapes.
struct HtmlSafeFormatter;

impl serde_json::ser::Formatter for HtmlSafeFormatter {
    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (index, ch) in fragment.char_indices() {
            let escaped = match ch {
                '<' => "\\u003c",
                '>' => "\\u003e",
                '&' => "\\u0026",
                '\u{2028}' => "\\u2028",
                '\u{2029}' => "\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..index].as_bytes())?;
            writer.write_all(escaped.as_bytes())?;
            start = index + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Where a deploy file lives: bucket, object name, MIME type.
fn deploy_target<'b>(
    file_type: DeployFileType,
    hash: &ArtifactHash,
    buckets: &'b Buckets,
) -> (&'b str, String, &'static str) {
    match file_type {
        DeployFileType::Index => (buckets.index.as_str(), hash.to_string(), mime::HTML),
        DeployFileType::Loader => (buckets.pkg.as_str(), format!("{hash}.js"), mime::JS),
        DeployFileType::Wasm => (buckets.pkg.as_str(), format!("{hash}.wasm"), mime::WASM),
    }
}

fn parse_hash(hash: &str) -> JobResult<ArtifactHash> {
    ArtifactHash::parse(hash).ok_or_else(|| JobError::protocol(format!("invalid hash {hash:?}")))
}

impl<B: Backend> JobService<B> {
    pub(super) async fn playground(
        &self,
        job: &mut JobContext<'_>,
        inbound: &mut mpsc::Receiver<Message>,
    ) -> JobResult<Completion> {
        let timeout = Some(self.settings().instruction_timeout);
        let instruction =
            Self::next_instruction(job, inbound, timeout, "instruction from client").await?;
        debug!(
            target: LOG_TARGET,
            "Playground instruction {} for {}",
            instruction.kind(),
            job.request.path
        );

        match instruction {
            Message::PlaygroundCompile(compile) => {
                self.build_and_publish(job, &compile.source).await
            }
            Message::Get(get) => self.fetch_source(job, &get.path).await,
            Message::Share(share) => self.share(job, share).await,
            Message::DeployQuery(query) => self.deploy(job, inbound, query).await,
            other => Err(JobError::protocol(format!(
                "unexpected {} instruction",
                other.kind()
            ))),
        }
    }

    /// Wait for the next client message, optionally bounded by `timeout`.
    async fn next_instruction(
        job: &JobContext<'_>,
        inbound: &mut mpsc::Receiver<Message>,
        timeout: Option<Duration>,
        what: &'static str,
    ) -> JobResult<Message> {
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, job.cancellable(inbound.recv()))
                .await
                .map_err(|_| JobError::PhaseTimeout { what })??,
            None => job.cancellable(inbound.recv()).await?,
        };
        // The inbound pump only closes its channel when the connection ends.
        received.ok_or(JobError::Cancelled)
    }

    async fn fetch_source(&self, job: &mut JobContext<'_>, path: &str) -> JobResult<Completion> {
        let path = normalize_path(path);
        job.advance(Phase::Downloading)?;
        job.send(Message::download_starting()).await?;
        let source = job
            .cancellable(self.backend().resolver().resolve(&path, job.sender))
            .await??;
        job.send(Message::download_done()).await?;
        job.advance(Phase::Complete)?;
        Ok(Completion::Fetched(source))
    }

    async fn share(&self, job: &mut JobContext<'_>, share: Share) -> JobResult<Completion> {
        job.advance(Phase::Storing)?;
        job.send(Message::store_starting()).await?;

        let pack = SharePack {
            version: 0,
            source: &share.source,
            tags: &share.tags,
        }
        .encode()
        .map_err(|e| JobError::internal(format!("encoding share pack: {e}")))?;
        let hash = ArtifactHash::of(&pack);
        let files = share.source.values().map(|files| files.len()).sum();

        let uploader = Uploader::new(
            Arc::clone(self.backend().blobs()),
            self.settings().concurrent_uploads,
            job.token.clone(),
            Some(job.sender.clone()),
        );
        uploader
            .add(UploadItem::immutable(
                &self.settings().buckets.src,
                format!("{hash}.json"),
                pack,
                mime::JSON,
            ))
            .await?;
        uploader.wait().await?;
        job.send(Message::store_done()).await?;

        self.backend()
            .records()
            .save(record::share_record(job.request, files, hash.as_str()))
            .await?;
        job.advance(Phase::Complete)?;
        Ok(Completion::Shared(hash))
    }

    /// Two-step deploy: report which files are missing, then accept and
    /// publish exactly those.
    async fn deploy(
        &self,
        job: &mut JobContext<'_>,
        inbound: &mut mpsc::Receiver<Message>,
        query: DeployQuery,
    ) -> JobResult<Completion> {
        let buckets = &self.settings().buckets;
        let blobs = self.backend().blobs();

        let checks = query.files.iter().map(|file| async move {
            let hash = parse_hash(&file.hash)?;
            let (bucket, name, _) = deploy_target(file.file_type, &hash, buckets);
            let exists = blobs
                .exists(bucket, &name)
                .await
                .map_err(|source| JobError::Upload { name, source })?;
            Ok::<_, JobError>((!exists).then(|| file.clone()))
        });
        let required: Vec<DeployFile> = job
            .cancellable(try_join_all(checks))
            .await??
            .into_iter()
            .flatten()
            .collect();

        job.send(Message::DeployQueryResponse(DeployQueryResponse {
            required: required.clone(),
        }))
        .await?;

        job.advance(Phase::Storing)?;
        if required.is_empty() {
            job.advance(Phase::Complete)?;
            return Ok(Completion::Deployed);
        }

        let payload = match Self::next_instruction(job, inbound, None, "deploy payload").await? {
            Message::DeployPayload(payload) => payload,
            other => {
                return Err(JobError::protocol(format!(
                    "expected DeployPayload, got {}",
                    other.kind()
                )));
            }
        };

        job.send(Message::store_starting()).await?;
        let uploader = Uploader::new(
            Arc::clone(blobs),
            self.settings().concurrent_uploads,
            job.token.clone(),
            Some(job.sender.clone()),
        );
        let mut stored = Vec::with_capacity(payload.files.len());
        for file in payload.files {
            let hash = parse_hash(&file.hash)?;
            let (bucket, name, content_type) = deploy_target(file.file_type, &hash, buckets);
            stored.push(DeployFile {
                file_type: file.file_type,
                hash: file.hash.clone(),
            });
            uploader
                .add(
                    UploadItem::immutable(bucket, name, file.contents, content_type)
                        .with_declared_hash(file.hash),
                )
                .await?;
        }
        uploader.wait().await?;
        job.send(Message::store_done()).await?;

        self.backend()
            .records()
            .save(record::deploy_record(job.request, stored))
            .await?;
        job.advance(Phase::Complete)?;
        Ok(Completion::Deployed)
    }
}
