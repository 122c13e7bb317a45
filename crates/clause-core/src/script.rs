//! Script repository — logic source fragments and their compiled output
//!
//! Fragments are kept in insertion order. Only fragments with the logic
//! extension take part in compilation; anything else is stored untouched.

use tracing::debug;

use crate::compiler::{CompiledOutput, LogicCompiler, Target};
use crate::model::ModelManager;
use crate::Result;

/// Extension of compilable logic fragments
pub const LOGIC_EXTENSION: &str = "clause";

/// One logic source fragment, identified by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicFile {
    pub name: String,
    pub extension: String,
    pub content: String,
}

impl LogicFile {
    pub fn new(content: &str, name: &str) -> Self {
        LogicFile {
            name: name.to_string(),
            extension: extension_of(name),
            content: content.to_string(),
        }
    }

    pub fn is_logic(&self) -> bool {
        self.extension == LOGIC_EXTENSION
    }
}

/// Suffix after the last `.` of the file name, or the logic extension
fn extension_of(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_string(),
        _ => LOGIC_EXTENSION.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct ScriptRepository {
    files: Vec<LogicFile>,
    compiled: Option<CompiledOutput>,
}

impl ScriptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logic_files(&self) -> &[LogicFile] {
        &self.files
    }

    pub fn logic_file(&self, name: &str) -> Option<&LogicFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Insert or replace a fragment; returns whether anything changed
    ///
    /// Identical content leaves the repository (and its compiled output)
    /// untouched.
    pub fn update_logic_file(&mut self, content: &str, name: &str) -> bool {
        match self.files.iter_mut().find(|f| f.name == name) {
            Some(existing) if existing.content == content => {
                debug!(name, "logic unchanged");
                false
            }
            Some(existing) => {
                existing.content = content.to_string();
                self.compiled = None;
                debug!(name, "logic updated");
                true
            }
            None => {
                self.files.push(LogicFile::new(content, name));
                self.compiled = None;
                debug!(name, "logic added");
                true
            }
        }
    }

    pub fn delete_logic_file(&mut self, name: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        let removed = self.files.len() != before;
        if removed {
            self.compiled = None;
        }
        removed
    }

    pub fn compiled(&self) -> Option<&CompiledOutput> {
        self.compiled.as_ref()
    }

    /// Forget the compiled output so the next compilation starts afresh
    pub fn mark_stale(&mut self) {
        self.compiled = None;
    }

    /// Combine every logic fragment and compile it for `target`
    pub fn compile(
        &mut self,
        compiler: &dyn LogicCompiler,
        models: &ModelManager,
        target: Target,
    ) -> Result<&CompiledOutput> {
        let sources: Vec<&LogicFile> = self
            .files
            .iter()
            .filter(|f| {
                if !f.is_logic() {
                    debug!(name = %f.name, extension = %f.extension, "skipping non-logic file");
                }
                f.is_logic()
            })
            .collect();

        let output = compiler.compile(&sources, models, target)?;
        Ok(self.compiled.insert(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_defaults_to_logic() {
        assert_eq!(LogicFile::new("", "logic.clause").extension, "clause");
        assert_eq!(LogicFile::new("", "notes.txt").extension, "txt");
        assert_eq!(LogicFile::new("", "logic").extension, "clause");
        assert_eq!(LogicFile::new("", "dir.v2/logic").extension, "clause");
        assert_eq!(LogicFile::new("", ".hidden").extension, "clause");
    }

    #[test]
    fn test_update_reports_changes_only() {
        let mut repo = ScriptRepository::new();
        assert!(repo.update_logic_file("a", "one.clause"));
        assert!(!repo.update_logic_file("a", "one.clause"));
        assert!(repo.update_logic_file("b", "one.clause"));
        assert_eq!(repo.logic_files().len(), 1);
        assert_eq!(repo.logic_file("one.clause").map(|f| f.content.as_str()), Some("b"));
    }

    #[test]
    fn test_delete() {
        let mut repo = ScriptRepository::new();
        repo.update_logic_file("a", "one.clause");
        assert!(repo.delete_logic_file("one.clause"));
        assert!(!repo.delete_logic_file("one.clause"));
        assert!(repo.logic_files().is_empty());
    }
}
