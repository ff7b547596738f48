//! Compiler adapter that shells out to an external build command.
//!
//! The source tree is written to a scratch directory and the command is run
//! once per flavor with `BUILDFARM_PACKAGE` and `BUILDFARM_MINIFY` in its
//! environment. Its stdout is the compiled main script; each stderr line is
//! forwarded to the client as a Compile message.

use std::path::Path;
use std::process::Stdio;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{CompileError, CompileOutput, CompiledProgram, Compiler, is_safe_relative};
use crate::connection::MessageSender;
use crate::protocol::{Message, SourceTree};

const LOG_TARGET: &str = "buildfarm::backend::command";

/// Stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: Vec<String>,
}

impl CommandCompiler {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    async fn write_tree(root: &Path, source: &SourceTree) -> Result<(), CompileError> {
        for (package, files) in source {
            if !is_safe_relative(package) {
                return Err(CompileError::InvalidSource {
                    name: package.clone(),
                });
            }
            let dir = root.join(package);
            tokio::fs::create_dir_all(&dir).await?;
            for (name, contents) in files {
                if !is_safe_relative(name) || name.contains('/') {
                    return Err(CompileError::InvalidSource { name: name.clone() });
                }
                tokio::fs::write(dir.join(name), contents).await?;
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        workdir: &Path,
        path: &str,
        minify: bool,
        progress: &MessageSender,
    ) -> Result<Vec<u8>, CompileError> {
        let (program, args) = self.command.split_first().ok_or(CompileError::NotConfigured)?;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .env("BUILDFARM_PACKAGE", path)
            .env("BUILDFARM_MINIFY", if minify { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CompileError::Spawn {
                command: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            let mut out = Vec::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_end(&mut out).await?;
            }
            Ok::<_, std::io::Error>(out)
        };
        let read_stderr = async {
            let mut tail = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(line) = lines.next_line().await? {
                    // Diagnostics are advisory; a full buffer drops them.
                    let _ = progress.try_send(Message::compile_message(line.clone()));
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }
            Ok::<_, std::io::Error>(tail)
        };

        let (out, tail) = tokio::try_join!(read_stdout, read_stderr)?;
        let status = child.wait().await?;
        debug!(
            target: LOG_TARGET,
            "Compiler for {} (minify={}) exited with {}",
            path,
            minify,
            status
        );
        if !status.success() {
            return Err(CompileError::Failed {
                status: status.to_string(),
                output: tail.join("\n"),
            });
        }
        Ok(out)
    }
}

impl Compiler for CommandCompiler {
    async fn compile(
        &self,
        path: &str,
        source: &SourceTree,
        progress: &MessageSender,
    ) -> Result<CompileOutput, CompileError> {
        let workdir = tempfile::tempdir()?;
        Self::write_tree(workdir.path(), source).await?;

        let min = self.run(workdir.path(), path, true, progress).await?;
        let max = self.run(workdir.path(), path, false, progress).await?;

        Ok(CompileOutput {
            min: CompiledProgram {
                main: min,
                packages: Vec::new(),
            },
            max: CompiledProgram {
                main: max,
                packages: Vec::new(),
            },
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn progress() -> (MessageSender, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(64);
        (MessageSender::new(tx, CancellationToken::new()), rx)
    }

    fn source() -> SourceTree {
        let mut tree = SourceTree::new();
        tree.entry("main".into())
            .or_default()
            .insert("main.go".into(), "package main".into());
        tree
    }

    /// Stdout becomes the artifact; the minify flag reaches the command.
    #[tokio::test]
    async fn stdout_is_the_compiled_script() {
        let compiler = CommandCompiler::new(vec![
            "sh".into(),
            "-c".into(),
            "printf 'pkg=%s min=%s' \"$BUILDFARM_PACKAGE\" \"$BUILDFARM_MINIFY\"".into(),
        ]);
        let (sender, _rx) = progress();

        let output = compiler.compile("main", &source(), &sender).await.unwrap();
        assert_eq!(output.min.main, b"pkg=main min=1");
        assert_eq!(output.max.main, b"pkg=main min=0");
    }

    /// A failing command reports its stderr and forwards it as progress.
    #[tokio::test]
    async fn nonzero_exit_is_a_compile_error() {
        let compiler = CommandCompiler::new(vec![
            "sh".into(),
            "-c".into(),
            "echo 'main.go:1: syntax error' >&2; exit 2".into(),
        ]);
        let (sender, mut rx) = progress();

        let result = compiler.compile("main", &source(), &sender).await;
        match result {
            Err(CompileError::Failed { output, .. }) => {
                assert!(output.contains("syntax error"), "{output}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(
            rx.recv().await,
            Some(Message::compile_message("main.go:1: syntax error"))
        );
    }

    #[tokio::test]
    async fn source_file_names_cannot_escape_workdir() {
        let compiler = CommandCompiler::new(vec!["true".into()]);
        let mut tree = SourceTree::new();
        tree.entry("main".into())
            .or_default()
            .insert("../evil.go".into(), String::new());
        let (sender, _rx) = progress();

        let result = compiler.compile("main", &tree, &sender).await;
        assert!(matches!(result, Err(CompileError::InvalidSource { .. })));
    }

    #[tokio::test]
    async fn empty_command_is_not_configured() {
        let compiler = CommandCompiler::new(Vec::new());
        let (sender, _rx) = progress();
        let result = compiler.compile("main", &source(), &sender).await;
        assert!(matches!(result, Err(CompileError::NotConfigured)));
    }
}
