//! Scripted stand-ins for the external resolver and compiler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use buildfarm::Message;
use buildfarm::backend::{
    CompileError, CompileOutput, CompiledPackage, CompiledProgram, Compiler, ResolveError,
    SourceResolver,
};
use buildfarm::connection::MessageSender;
use buildfarm::protocol::SourceTree;
use tokio::sync::Semaphore;

/// Build a source tree from `(package, file, contents)` triples.
pub fn source(files: &[(&str, &str, &str)]) -> SourceTree {
    let mut tree = SourceTree::new();
    for (package, file, contents) in files {
        tree.entry(package.to_string())
            .or_default()
            .insert(file.to_string(), contents.to_string());
    }
    tree
}

/// Resolver answering from a fixed map of package path to source tree.
#[derive(Default)]
pub struct StaticResolver {
    packages: HashMap<String, SourceTree>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, path: &str) -> Self {
        let tree = source(&[(path, "main.go", "package main")]);
        self.packages.insert(path.to_string(), tree);
        self
    }
}

impl SourceResolver for StaticResolver {
    async fn resolve(
        &self,
        path: &str,
        progress: &MessageSender,
    ) -> Result<SourceTree, ResolveError> {
        let _ = progress.try_send(Message::download_message(path));
        self.packages
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                path: path.to_string(),
            })
    }
}

/// What the scripted compiler does for a path.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(String),
    Panic(String),
}

/// Compiler whose outcome is scripted per path and which can be held at a
/// gate until the test releases it.
#[derive(Default)]
pub struct ScriptedCompiler {
    scripts: Mutex<HashMap<String, Script>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl ScriptedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every compile until a permit is added to `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn script(self, path: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Deterministic output for a compiled tree.
pub fn compiled(path: &str, source: &SourceTree) -> CompileOutput {
    let files: usize = source.values().map(|files| files.len()).sum();
    let flavor = |name: &str| CompiledProgram {
        main: format!("{name}:{path}:{files}").into_bytes(),
        packages: vec![CompiledPackage {
            path: "fmt".into(),
            contents: format!("{name}:fmt").into_bytes(),
            standard: true,
        }],
    };
    CompileOutput {
        min: flavor("min"),
        max: flavor("max"),
    }
}

impl Compiler for ScriptedCompiler {
    async fn compile(
        &self,
        path: &str,
        source: &SourceTree,
        progress: &MessageSender,
    ) -> Result<CompileOutput, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let _ = progress.try_send(Message::compile_message(format!("compiling {path}")));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or(Script::Succeed);
        match script {
            Script::Succeed => Ok(compiled(path, source)),
            Script::Fail(output) => Err(CompileError::Failed {
                status: "exit status: 1".into(),
                output,
            }),
            Script::Panic(message) => panic!("{message}"),
        }
    }
}
