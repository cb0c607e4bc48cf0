//! Materialize bundle files into a directory.
//!
//! Planning compares every listed file with what is already on disk.
//! Exclude patterns drop paths before anything else happens. An existing
//! file with different content is only overwritten with `force`, `yes`, or a
//! positive answer from the [`Confirm`] hook. A dry run stops after planning.
//!
//! Writes happen in manifest order. The first failed write aborts the run
//! and reports the files already written; nothing is rolled back.

use crate::bundle::Bundle;
use crate::digest::file_checksum;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Overwrite differing files without asking.
    pub force: bool,
    /// Answer yes to every confirmation.
    pub yes: bool,
    pub dry_run: bool,
    /// Glob patterns matched against bundle paths.
    pub exclude: Vec<String>,
}

/// Asked before an existing file with different content is replaced.
pub trait Confirm {
    fn confirm_overwrite(&mut self, path: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm_overwrite(&mut self, path: &str) -> bool {
        self(path)
    }
}

/// Declines every overwrite; for non-interactive callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclineAll;

impl Confirm for DeclineAll {
    fn confirm_overwrite(&mut self, _path: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Create,
    Overwrite,
    Unchanged,
    /// Overwrite declined.
    Skip,
    Excluded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    pub path: String,
    pub action: ApplyAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub target: PathBuf,
    pub dry_run: bool,
    pub files: Vec<PlannedFile>,
    /// Paths written, in order.
    pub applied: Vec<String>,
}

impl ApplyReport {
    pub fn count(&self, action: ApplyAction) -> usize {
        self.files.iter().filter(|f| f.action == action).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("refusing to write '{path}': {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("bundle content for '{path}' does not match the manifest")]
    Integrity { path: String },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing '{path}' failed after {} file(s) were applied: {source}", applied.len())]
    WriteFailed {
        path: String,
        applied: Vec<String>,
        #[source]
        source: std::io::Error,
    },
}

pub struct Extractor<'a> {
    bundle: &'a Bundle,
}

impl<'a> Extractor<'a> {
    pub fn new(bundle: &'a Bundle) -> Self {
        Self { bundle }
    }

    /// Plan without prompting or writing.
    pub fn plan(
        &self,
        target: &Path,
        options: &ApplyOptions,
    ) -> Result<Vec<PlannedFile>, ApplyError> {
        let excludes = build_excludes(&options.exclude)?;
        let mut planned = Vec::with_capacity(self.bundle.manifest().files.len());

        for (entry, bytes) in self.bundle.files() {
            if excludes.is_match(&entry.path) {
                planned.push(PlannedFile {
                    path: entry.path.clone(),
                    action: ApplyAction::Excluded,
                });
                continue;
            }
            let bytes = bytes.ok_or_else(|| ApplyError::Integrity {
                path: entry.path.clone(),
            })?;
            if file_checksum(bytes) != entry.checksum {
                return Err(ApplyError::Integrity {
                    path: entry.path.clone(),
                });
            }

            let dest = destination(target, &entry.path)?;
            let action = match std::fs::symlink_metadata(&dest) {
                Ok(meta) if meta.is_file() => {
                    let existing = std::fs::read(&dest).map_err(|source| ApplyError::Io {
                        path: dest.clone(),
                        source,
                    })?;
                    if existing == bytes {
                        ApplyAction::Unchanged
                    } else {
                        ApplyAction::Overwrite
                    }
                }
                // a directory in the way fails at write time
                Ok(_) => ApplyAction::Overwrite,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => ApplyAction::Create,
                Err(source) => return Err(ApplyError::Io { path: dest, source }),
            };
            planned.push(PlannedFile {
                path: entry.path.clone(),
                action,
            });
        }
        Ok(planned)
    }

    pub fn apply(
        &self,
        target: &Path,
        options: &ApplyOptions,
        confirm: &mut dyn Confirm,
    ) -> Result<ApplyReport, ApplyError> {
        let mut files = self.plan(target, options)?;

        if options.dry_run {
            tracing::info!(
                dir = %target.display(),
                files = files.len(),
                "dry run, nothing written"
            );
            return Ok(ApplyReport {
                target: target.to_path_buf(),
                dry_run: true,
                files,
                applied: Vec::new(),
            });
        }

        for file in files.iter_mut() {
            if file.action == ApplyAction::Overwrite
                && !(options.force || options.yes)
                && !confirm.confirm_overwrite(&file.path)
            {
                file.action = ApplyAction::Skip;
            }
        }

        let mut applied = Vec::new();
        for file in &files {
            if !matches!(file.action, ApplyAction::Create | ApplyAction::Overwrite) {
                continue;
            }
            let bytes = self.bundle.file_bytes(&file.path).unwrap_or_default();
            if let Err(source) = write_file(target, &file.path, bytes) {
                tracing::warn!(
                    path = %file.path,
                    applied = applied.len(),
                    error = %source,
                    "apply aborted"
                );
                return Err(ApplyError::WriteFailed {
                    path: file.path.clone(),
                    applied,
                    source,
                });
            }
            tracing::debug!(path = %file.path, action = ?file.action, "applied");
            applied.push(file.path.clone());
        }

        tracing::info!(dir = %target.display(), applied = applied.len(), "bundle applied");
        Ok(ApplyReport {
            target: target.to_path_buf(),
            dry_run: false,
            files,
            applied,
        })
    }
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet, ApplyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ApplyError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ApplyError::InvalidPattern {
        pattern: patterns.join(","),
        source,
    })
}

/// Join a bundle path onto `target`, refusing anything that could escape it.
/// No existing component below `target` may be a symlink.
fn destination(target: &Path, rel: &str) -> Result<PathBuf, ApplyError> {
    let rel_path = Path::new(rel);
    if rel.is_empty() || !rel_path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ApplyError::UnsafePath {
            path: rel.to_string(),
            reason: "not a plain relative path".to_string(),
        });
    }
    let dest = target.join(rel_path);
    match symlinked_component(target, rel_path) {
        Ok(None) => Ok(dest),
        Ok(Some(link)) => Err(ApplyError::UnsafePath {
            path: rel.to_string(),
            reason: format!("{} is a symlink", link.display()),
        }),
        Err(source) => Err(ApplyError::Io { path: dest, source }),
    }
}

/// First existing path between `target` (exclusive) and `target/rel` that is
/// a symlink. Stops at the first component that does not exist yet.
fn symlinked_component(target: &Path, rel: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut current = target.to_path_buf();
    for component in rel.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(Some(current)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

fn write_file(target: &Path, rel: &str, bytes: &[u8]) -> std::io::Result<()> {
    let dest = target.join(rel);
    let parent = dest.parent().unwrap_or(target);

    // the tree may have changed since planning
    if let Some(link) = symlinked_component(target, Path::new(rel))? {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("'{rel}' passes through symlink {}", link.display()),
        ));
    }
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{build, BuildOptions};
    use chrono::{TimeZone, Utc};

    fn fixture(dir: &Path) -> Bundle {
        let src = dir.join("src");
        std::fs::create_dir_all(src.join("docs")).unwrap();
        std::fs::write(src.join("spec.yaml"), "spec: 1\n").unwrap();
        std::fs::write(src.join("docs/readme.md"), "# hi\n").unwrap();
        std::fs::write(src.join("docs/notes.txt"), "n\n").unwrap();
        let options = BuildOptions::new(src.join("spec.yaml"), dir.join("out.tar.gz"))
            .with_include("docs")
            .with_created(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
        build(&options, None).unwrap().bundle
    }

    #[test]
    fn creates_files_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        let extractor = Extractor::new(&bundle);

        let report = extractor
            .apply(&target, &ApplyOptions::default(), &mut DeclineAll)
            .unwrap();
        assert_eq!(report.count(ApplyAction::Create), 3);
        assert_eq!(report.applied.len(), 3);
        assert_eq!(
            std::fs::read_to_string(target.join("docs/readme.md")).unwrap(),
            "# hi\n"
        );

        let again = extractor
            .apply(&target, &ApplyOptions::default(), &mut DeclineAll)
            .unwrap();
        assert_eq!(again.count(ApplyAction::Unchanged), 3);
        assert!(again.applied.is_empty());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        let options = ApplyOptions {
            dry_run: true,
            ..ApplyOptions::default()
        };
        let report = Extractor::new(&bundle)
            .apply(&target, &options, &mut |_: &str| -> bool { panic!("prompted") })
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.count(ApplyAction::Create), 3);
        assert!(!target.exists());
    }

    #[test]
    fn conflicts_ask_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("spec.yaml"), "local edit\n").unwrap();

        let mut asked = Vec::new();
        let report = Extractor::new(&bundle)
            .apply(&target, &ApplyOptions::default(), &mut |p: &str| {
                asked.push(p.to_string());
                false
            })
            .unwrap();
        assert_eq!(asked, vec!["spec.yaml"]);
        assert_eq!(report.count(ApplyAction::Skip), 1);
        assert_eq!(
            std::fs::read_to_string(target.join("spec.yaml")).unwrap(),
            "local edit\n"
        );

        let forced = ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        };
        let report = Extractor::new(&bundle)
            .apply(&target, &forced, &mut DeclineAll)
            .unwrap();
        assert_eq!(report.applied, vec!["spec.yaml"]);
        assert_eq!(
            std::fs::read_to_string(target.join("spec.yaml")).unwrap(),
            "spec: 1\n"
        );
    }

    #[test]
    fn excludes_apply_before_prompting() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        std::fs::create_dir_all(target.join("docs")).unwrap();
        std::fs::write(target.join("docs/notes.txt"), "mine\n").unwrap();

        let options = ApplyOptions {
            exclude: vec!["docs/*.txt".into()],
            ..ApplyOptions::default()
        };
        let report = Extractor::new(&bundle)
            .apply(&target, &options, &mut |_: &str| -> bool { panic!("prompted") })
            .unwrap();
        assert_eq!(report.count(ApplyAction::Excluded), 1);
        assert_eq!(
            std::fs::read_to_string(target.join("docs/notes.txt")).unwrap(),
            "mine\n"
        );
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let options = ApplyOptions {
            exclude: vec!["[".into()],
            ..ApplyOptions::default()
        };
        let err = Extractor::new(&bundle)
            .plan(&dir.path().join("t"), &options)
            .unwrap_err();
        assert!(matches!(err, ApplyError::InvalidPattern { .. }));
    }

    #[test]
    fn write_failure_reports_applied_files() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        // a directory where spec.yaml should go; it sorts after docs/
        std::fs::create_dir_all(target.join("spec.yaml")).unwrap();

        let options = ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        };
        let err = Extractor::new(&bundle)
            .apply(&target, &options, &mut DeclineAll)
            .unwrap_err();
        match err {
            ApplyError::WriteFailed { path, applied, .. } => {
                assert_eq!(path, "spec.yaml");
                assert_eq!(applied, vec!["docs/notes.txt", "docs/readme.md"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(target.join("docs/readme.md").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("readme.md"), "theirs\n").unwrap();
        std::os::unix::fs::symlink(&outside, target.join("docs")).unwrap();

        let options = ApplyOptions {
            force: true,
            ..ApplyOptions::default()
        };
        let err = Extractor::new(&bundle)
            .apply(&target, &options, &mut DeclineAll)
            .unwrap_err();
        assert!(
            matches!(err, ApplyError::UnsafePath { ref path, .. } if path.starts_with("docs/"))
        );
        assert_eq!(
            std::fs::read_to_string(outside.join("readme.md")).unwrap(),
            "theirs\n"
        );
        assert_eq!(std::fs::read_dir(&outside).unwrap().count(), 1);
        assert!(!target.join("spec.yaml").exists(), "nothing is written");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fixture(dir.path());
        let target = dir.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        std::os::unix::fs::symlink(dir.path().join("elsewhere"), target.join("spec.yaml")).unwrap();

        let err = Extractor::new(&bundle)
            .plan(&target, &ApplyOptions::default())
            .unwrap_err();
        assert!(matches!(err, ApplyError::UnsafePath { .. }));
    }

    #[test]
    fn destination_rejects_traversal() {
        let target = Path::new("/tmp/t");
        assert!(destination(target, "../etc/passwd").is_err());
        assert!(destination(target, "/abs").is_err());
        assert!(destination(target, "a/./b").is_ok());
        assert!(destination(target, "a/b").is_ok());
    }
}
