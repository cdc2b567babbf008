//! Thin async façade over the local `git` binary.
//!
//! Every operation shells out to a `git` child process, the same way git's
//! own remote helpers do: the helper is launched by git with `GIT_DIR` set
//! and the repository as working directory, so the child processes inherit
//! the right context. Tests point the adapter at scratch repositories via
//! [`Git::new_in`].
//!
//! Exit-status conventions: `cat-file -e`, `merge-base --is-ancestor`,
//! `config --get` and `rev-list` (for history probing) use nonzero exits as
//! boolean answers; everything else treats a nonzero exit as fatal and
//! surfaces the child's stderr.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::codec::{self, ObjectType};
use crate::errors::HelperError;
use crate::hash::ObjectId;

/// Adapter over one local repository.
#[derive(Clone, Debug, Default)]
pub struct Git {
    dir: Option<PathBuf>,
}

impl Git {
    /// Adapter for the repository of the current process (the normal case
    /// when git launches the helper).
    pub fn new() -> Git {
        Git { dir: None }
    }

    /// Adapter for the repository at `dir`.
    pub fn new_in(dir: impl Into<PathBuf>) -> Git {
        Git {
            dir: Some(dir.into()),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output, HelperError> {
        tracing::debug!("git {}", args.join(" "));
        self.command(args).output().await.map_err(HelperError::from)
    }

    /// Run git, requiring a zero exit; returns raw stdout.
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, HelperError> {
        let out = self.output(args).await?;
        if !out.status.success() {
            return Err(HelperError::Git(format!(
                "`git {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }

    /// Run git with `input` on stdin, requiring a zero exit.
    async fn run_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>, HelperError> {
        tracing::debug!("git {} (with {} bytes on stdin)", args.join(" "), input.len());
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }
        let out = child.wait_with_output().await?;
        if !out.status.success() {
            return Err(HelperError::Git(format!(
                "`git {}` failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }

    /// Run git as a string result, trimming the trailing newline.
    async fn run_line(&self, args: &[&str]) -> Result<String, HelperError> {
        let out = self.run(args).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Enumerate every object reachable from `tip` but not from any of the
    /// `present` tips, in `git rev-list --objects` order (referrers before
    /// the objects they reference). The transfer engine iterates the list in
    /// reverse to schedule dependencies first.
    ///
    /// Tips in `present` that do not exist locally are skipped rather than
    /// passed to `--not`: after an unrelated rewrite of remote history the
    /// old tip may be unknown here, and the push must still enumerate its
    /// objects and fail later at the ref update, not at the walk.
    pub async fn list_objects(
        &self,
        tip: &str,
        present: &[ObjectId],
    ) -> Result<Vec<ObjectId>, HelperError> {
        let mut args: Vec<String> = vec!["rev-list".into(), "--objects".into(), tip.into()];
        let mut excluded = 0usize;
        for id in present {
            if self.object_exists(id).await? {
                if excluded == 0 {
                    args.push("--not".into());
                }
                excluded += 1;
                args.push(id.to_string());
            } else {
                tracing::debug!("skipping unknown remote tip {id} in object walk");
            }
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run(&arg_refs).await?;

        let text = String::from_utf8_lossy(&out);
        let mut objects = Vec::new();
        for line in text.lines() {
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };
            objects.push(ObjectId::from_str(token)?);
        }
        Ok(objects)
    }

    /// Type of the object, from `git cat-file -t`.
    pub async fn object_type(&self, id: &ObjectId) -> Result<ObjectType, HelperError> {
        self.run_line(&["cat-file", "-t", &id.to_string()])
            .await?
            .parse()
    }

    /// Read the object and wrap it in its loose-object header:
    /// `<type> SP <len> NUL <body>`. Dependency keys are appended by the
    /// transfer engine, not here.
    pub async fn encode_object(&self, id: &ObjectId) -> Result<Vec<u8>, HelperError> {
        let obj_type = self.object_type(id).await?;
        let body = self
            .run(&["cat-file", obj_type.as_str(), &id.to_string()])
            .await?;
        Ok(codec::with_header(obj_type, &body))
    }

    /// Write a raw object body into the local object store and return the id
    /// git computed for it.
    pub async fn decode_object_raw(
        &self,
        obj_type: ObjectType,
        body: &[u8],
    ) -> Result<ObjectId, HelperError> {
        let out = self
            .run_with_stdin(
                &["hash-object", "-w", "-t", obj_type.as_str(), "--stdin"],
                body,
            )
            .await?;
        ObjectId::from_str(String::from_utf8_lossy(&out).trim())
    }

    /// Objects directly referenced by `id`, in the stable order used both at
    /// encode and decode time: a commit yields its tree then its parents, a
    /// tree yields its entries in tree order, a tag yields the tagged object,
    /// a blob yields nothing.
    pub async fn referenced_objects(&self, id: &ObjectId) -> Result<Vec<ObjectId>, HelperError> {
        let obj_type = self.object_type(id).await?;
        match obj_type {
            ObjectType::Blob => Ok(Vec::new()),
            ObjectType::Commit => {
                let out = self.run(&["cat-file", "commit", &id.to_string()]).await?;
                let text = String::from_utf8_lossy(&out);
                let mut refs = Vec::new();
                for line in text.lines() {
                    // Header ends at the first blank line.
                    if line.is_empty() {
                        break;
                    }
                    if let Some(tree) = line.strip_prefix("tree ") {
                        refs.push(ObjectId::from_str(tree.trim())?);
                    } else if let Some(parent) = line.strip_prefix("parent ") {
                        refs.push(ObjectId::from_str(parent.trim())?);
                    }
                }
                Ok(refs)
            }
            ObjectType::Tree => {
                let out = self.run(&["cat-file", "-p", &id.to_string()]).await?;
                let text = String::from_utf8_lossy(&out);
                let mut refs = Vec::new();
                for line in text.lines() {
                    // `<mode> SP <type> SP <id> TAB <name>`
                    let meta = line.split('\t').next().unwrap_or(line);
                    let Some(token) = meta.split_whitespace().nth(2) else {
                        return Err(HelperError::Git(format!(
                            "unexpected tree entry `{line}` in {id}"
                        )));
                    };
                    refs.push(ObjectId::from_str(token)?);
                }
                Ok(refs)
            }
            ObjectType::Tag => {
                let out = self.run(&["cat-file", "tag", &id.to_string()]).await?;
                let text = String::from_utf8_lossy(&out);
                for line in text.lines() {
                    if let Some(target) = line.strip_prefix("object ") {
                        return Ok(vec![ObjectId::from_str(target.trim())?]);
                    }
                }
                Err(HelperError::Git(format!("tag {id} has no object header")))
            }
        }
    }

    /// Whether the object itself is present locally.
    pub async fn object_exists(&self, id: &ObjectId) -> Result<bool, HelperError> {
        let out = self.output(&["cat-file", "-e", &id.to_string()]).await?;
        Ok(out.status.success())
    }

    /// Whether the object and its full transitive subgraph are present
    /// locally. A failing walk (including walks rooted at a blob) reports
    /// false, which makes an interrupted fetch resume by re-enqueueing the
    /// object's references.
    pub async fn history_exists(&self, id: &ObjectId) -> Result<bool, HelperError> {
        let out = self
            .output(&["rev-list", "--objects", &id.to_string()])
            .await?;
        Ok(out.status.success())
    }

    /// Strict fast-forward test: is `ancestor` an ancestor of `descendant`?
    pub async fn is_ancestor(
        &self,
        ancestor: &ObjectId,
        descendant: &ObjectId,
    ) -> Result<bool, HelperError> {
        let out = self
            .output(&[
                "merge-base",
                "--is-ancestor",
                &ancestor.to_string(),
                &descendant.to_string(),
            ])
            .await?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(HelperError::Git(format!(
                "`git merge-base --is-ancestor` failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
        }
    }

    /// Resolve a local ref to an object id.
    pub async fn ref_value(&self, refname: &str) -> Result<ObjectId, HelperError> {
        ObjectId::from_str(&self.run_line(&["rev-parse", refname]).await?)
    }

    /// Resolve a symbolic ref such as `HEAD`; `None` when detached.
    pub async fn symbolic_ref(&self, name: &str) -> Result<Option<String>, HelperError> {
        let out = self.output(&["symbolic-ref", name]).await?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
        ))
    }

    /// Read a git config value; `None` when the key is unset.
    pub async fn config_value(&self, key: &str) -> Result<Option<String>, HelperError> {
        let out = self.output(&["config", "--get", key]).await?;
        match out.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&out.stdout).trim().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(HelperError::Git(format!(
                "`git config --get {key}` failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
        }
    }
}
