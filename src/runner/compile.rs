//! Standard compile flow: download, compile, publish.

use std::sync::Arc;

use serde::Serialize;

use super::{Buckets, Completion, JobContext, JobService, Phase, record};
use crate::backend::{
    Backend, CompileOutput, CompiledContents, CompiledProgram, Compiler, PackageRecord,
    RecordStore, SourceResolver,
};
use crate::error::{JobError, JobResult};
use crate::path::short_name;
use crate::protocol::{Complete, Message, SourceTree};
use crate::upload::{ArtifactHash, UploadItem, Uploader, mime};

/// Hashes and upload items for one compiled flavor.
struct Flavor {
    main_hash: ArtifactHash,
    contents: CompiledContents,
    items: Vec<UploadItem>,
}

#[derive(Serialize)]
struct IndexManifest<'a> {
    path: &'a str,
    main: &'a str,
    packages: &'a [PackageRecord],
}

impl Flavor {
    /// `suffix` distinguishes the index manifest of the unminified flavor.
    fn new(
        path: &str,
        program: &CompiledProgram,
        suffix: &str,
        buckets: &Buckets,
    ) -> JobResult<Self> {
        let main_hash = ArtifactHash::of(&program.main);
        let mut items = vec![
            UploadItem::immutable(
                &buckets.pkg,
                format!("{path}.{main_hash}.js"),
                program.main.clone(),
                mime::JS,
            ),
        ];

        let mut packages = Vec::with_capacity(program.packages.len());
        for package in &program.packages {
            let hash = ArtifactHash::of(&package.contents);
            items.push(UploadItem::immutable(
                &buckets.pkg,
                format!("{}.{hash}.js", package.path),
                package.contents.clone(),
                mime::JS,
            ));
            packages.push(PackageRecord {
                path: package.path.clone(),
                hash: hash.to_string(),
                standard: package.standard,
            });
        }

        let manifest = serde_json::to_vec(&IndexManifest {
            path,
            main: main_hash.as_str(),
            packages: &packages,
        })
        .map_err(|e| JobError::internal(format!("encoding manifest: {e}")))?;
        items.push(UploadItem::mutable(
            &buckets.index,
            format!("{path}{suffix}.json"),
            manifest,
            mime::JSON,
        ));

        Ok(Self {
            contents: CompiledContents {
                main: main_hash.to_string(),
                packages,
            },
            main_hash,
            items,
        })
    }
}

impl<B: Backend> JobService<B> {
    pub(super) async fn compile_package(&self, job: &mut JobContext<'_>) -> JobResult<Completion> {
        job.advance(Phase::Downloading)?;
        job.send(Message::download_starting()).await?;
        let source = job
            .cancellable(
                self.backend()
                    .resolver()
                    .resolve(&job.request.path, job.sender),
            )
            .await??;
        job.send(Message::download_done()).await?;

        self.build_and_publish(job, &source).await
    }

    /// Compile `source` and publish both flavors.
    pub(super) async fn build_and_publish(
        &self,
        job: &mut JobContext<'_>,
        source: &SourceTree,
    ) -> JobResult<Completion> {
        let request = job.request;
        let path = request.path.as_str();

        job.advance(Phase::Compiling)?;
        job.send(Message::compile_starting()).await?;
        let output: CompileOutput = job
            .cancellable(self.backend().compiler().compile(path, source, job.sender))
            .await??;
        job.send(Message::compile_done()).await?;

        job.advance(Phase::Storing)?;
        job.send(Message::store_starting()).await?;
        let buckets = &self.settings().buckets;
        let min = Flavor::new(path, &output.min, "", buckets)?;
        let max = Flavor::new(path, &output.max, "$max", buckets)?;

        let uploader = Uploader::new(
            Arc::clone(self.backend().blobs()),
            self.settings().concurrent_uploads,
            job.token.clone(),
            Some(job.sender.clone()),
        );
        for item in min.items.into_iter().chain(max.items) {
            uploader.add(item).await?;
        }
        uploader.wait().await?;
        job.send(Message::store_done()).await?;

        let complete = Complete {
            path: path.to_string(),
            short: short_name(path).to_string(),
            hash_min: min.main_hash.to_string(),
            hash_max: max.main_hash.to_string(),
        };
        self.backend()
            .records()
            .save(record::compile_record(request, min.contents, max.contents))
            .await?;
        job.advance(Phase::Complete)?;

        Ok(Completion::Compiled(complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompiledPackage;

    #[test]
    fn flavor_names_artifacts_by_content_hash() {
        let program = CompiledProgram {
            main: b"main()".to_vec(),
            packages: vec![CompiledPackage {
                path: "fmt".into(),
                contents: b"fmt archive".to_vec(),
                standard: true,
            }],
        };
        let flavor = Flavor::new("github.com/a/b", &program, "$max", &Buckets::default()).unwrap();

        let main_hash = ArtifactHash::of(b"main()");
        let fmt_hash = ArtifactHash::of(b"fmt archive");
        let names: Vec<_> = flavor
            .items
            .iter()
            .map(|item| (item.bucket.as_str(), item.name.clone(), item.immutable))
            .collect();
        assert_eq!(names, vec![
            ("pkg", format!("github.com/a/b.{main_hash}.js"), true),
            ("pkg", format!("fmt.{fmt_hash}.js"), true),
            ("index", "github.com/a/b$max.json".to_string(), false),
        ]);
        assert_eq!(flavor.contents.main, main_hash.to_string());
        assert!(flavor.contents.packages[0].standard);
    }
}
