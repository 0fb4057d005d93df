//! In-memory [`ClassManager`]/[`DexBuilder`] implementation (§4.4, §1
//! Non-goals: parsing the real DEX/APK wire format is explicitly out of
//! scope). Doubles as the CLI's concrete collaborator: the launcher loads a
//! JSON description of classes/methods into [`InMemoryClassManager`] and
//! writes the accumulated edits back out through [`InMemoryDexBuilder`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::classmanager::{ClassManager, DexBuilder, MethodEdit};
use crate::errors::{EngineError, EngineResult};
use crate::ir::Class;

/// A [`ClassManager`] backed by a plain map, populated either directly by
/// tests or by deserializing a JSON class dump via [`InMemoryClassManager::load`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryClassManager {
    classes: BTreeMap<String, Class>,
}

impl InMemoryClassManager {
    pub fn new(classes: Vec<Class>) -> Self {
        InMemoryClassManager {
            classes: classes.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn insert(&mut self, class: Class) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Loads a `{"classes": [...]}` document using [`Class`]'s `serde`
    /// shape, the JSON stand-in for a real DEX codec's output (§1).
    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = fs::read_to_string(path)?;
        let deserializer = &mut serde_json::Deserializer::from_str(&raw);
        let document: ClassDocument = serde_path_to_error::deserialize(deserializer)
            .map_err(|err| EngineError::Config(format!("{path:?}: {err}")))?;
        Ok(InMemoryClassManager::new(document.classes))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }
}

#[derive(Debug, Deserialize)]
struct ClassDocument {
    classes: Vec<Class>,
}

impl ClassManager for InMemoryClassManager {
    fn local_class(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    fn local_class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}

/// Accumulates [`MethodEdit`]s per method without re-encoding anything;
/// `finish` is a no-op here, since turning edits back into DEX bytes is the
/// job of a real codec this engine does not implement.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDexBuilder {
    edits: BTreeMap<String, Vec<MethodEdit>>,
    finished: bool,
}

impl InMemoryDexBuilder {
    pub fn edits_for(&self, owner: &str, method_name: &str, descriptor: &str) -> &[MethodEdit] {
        self.edits
            .get(&method_key(owner, method_name, descriptor))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_edits(&self) -> usize {
        self.edits.values().map(Vec::len).sum()
    }
}

fn method_key(owner: &str, method_name: &str, descriptor: &str) -> String {
    format!("{owner}->{method_name}{descriptor}")
}

impl DexBuilder for InMemoryDexBuilder {
    fn apply(&mut self, owner: &str, method_name: &str, descriptor: &str, edits: Vec<MethodEdit>) {
        self.edits
            .entry(method_key(owner, method_name, descriptor))
            .or_default()
            .extend(edits);
    }

    fn finish(&mut self) -> EngineResult<()> {
        self.finished = true;
        Ok(())
    }
}
