use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

const AGENT_DIR: &str = ".browser-agent";

/// Path prefixes the model sees as absolute but which live under the sandbox root.
pub const VIRTUAL_PREFIXES: &[&str] = &["/artifacts", "/memory", "/skills", "/checkpoints", "/traces"];

const AGENTS_MD: &str = "# Browser Agent Memory

Last updated: (auto-updated on reflection)

## Learned Best Practices

## Domain-Specific Patterns

## Common Failure Patterns

## Skill Prerequisites
";

const USER_PREFERENCES_MD: &str = "# User Preferences

## UI Preferences

(User's preferred browser settings, viewport size, etc.)

## Workflow Preferences

(Common workflows and patterns)
";

const GITIGNORE: &str = "# Ignore sensitive and generated files
traces/
checkpoints/*.db
checkpoints/*.db-*

# Keep directory structure
!.gitkeep
";

/// The sandbox root and the fixed layout beneath it.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    /// `.browser-agent` under the enclosing git checkout, or under the cwd.
    pub fn new() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let root = cwd
            .ancestors()
            .find(|dir| dir.join(".git").exists())
            .map(Path::to_path_buf)
            .unwrap_or(cwd);
        Self {
            base: root.join(AGENT_DIR),
        }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.base.join("checkpoints")
    }

    pub fn checkpoint_db(&self) -> PathBuf {
        self.checkpoints_dir().join("browser_agent.db")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.base.join("memory")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.base.join("skills")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.base.join("artifacts")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.artifacts_dir().join("screenshots")
    }

    pub fn file_outputs_dir(&self) -> PathBuf {
        self.artifacts_dir().join("file_outputs")
    }

    pub fn tool_outputs_dir(&self) -> PathBuf {
        self.artifacts_dir().join("tool_outputs")
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.base.join("traces")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.base.join("audit")
    }

    // Memory files
    pub fn agents_md(&self) -> PathBuf {
        self.memory_dir().join("AGENTS.md")
    }

    pub fn user_preferences_md(&self) -> PathBuf {
        self.memory_dir().join("USER_PREFERENCES.md")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.base.clone(),
            self.checkpoints_dir(),
            self.memory_dir(),
            self.skills_dir(),
            self.screenshots_dir(),
            self.file_outputs_dir(),
            self.tool_outputs_dir(),
            self.traces_dir(),
            self.audit_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }

        for (path, content) in [
            (self.agents_md(), AGENTS_MD),
            (self.user_preferences_md(), USER_PREFERENCES_MD),
            (self.base.join(".gitignore"), GITIGNORE),
        ] {
            if !path.exists() {
                std::fs::write(path, content)?;
            }
        }
        Ok(())
    }

    /// Resolve a tool-supplied path against the sandbox root.
    ///
    /// Leading slashes are stripped so `/artifacts/x` and `artifacts/x` name
    /// the same file. `..` segments are folded lexically and may never climb
    /// above the root. The deepest existing ancestor is canonicalised and
    /// checked again so a symlink cannot point outside, even for files that
    /// do not exist yet.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf> {
        let trimmed = user_path.trim().trim_start_matches(['/', '\\']);
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(Error::PermissionDenied(format!(
                            "path escapes sandbox: {}",
                            user_path
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::PermissionDenied(format!(
                        "absolute path outside sandbox: {}",
                        user_path
                    )));
                }
            }
        }

        let resolved = parts
            .iter()
            .fold(self.base.clone(), |acc, part| acc.join(part));

        // deepest part of the path already on disk, symlinks included
        let existing = resolved
            .ancestors()
            .take_while(|p| p.starts_with(&self.base))
            .find(|p| std::fs::symlink_metadata(p).is_ok());
        if let Some(existing) = existing {
            let root = self.base.canonicalize()?;
            let inside = existing
                .canonicalize()
                .map(|real| real.starts_with(&root))
                .unwrap_or(false);
            if !inside {
                return Err(Error::PermissionDenied(format!(
                    "path resolves outside sandbox: {}",
                    user_path
                )));
            }
        }
        Ok(resolved)
    }

    /// Path relative to the sandbox root, for display to the model.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.base)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
