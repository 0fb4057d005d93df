//! External collaborator contracts (§4.4, §1): the DEX/APK codec is out of
//! scope, so the engine depends only on these traits to read and rewrite
//! classes. Production callers back them with a real DEX library; tests
//! and examples back them with [`crate::test_support::InMemoryClassManager`].

use crate::ir::{Class, Method};

/// Read-only view over the classes available to the analysis run.
///
/// A "local" class (per the glossary) is one defined within the DEX/APK
/// under analysis, as opposed to a platform class resolved only by name.
pub trait ClassManager {
    fn local_class(&self, name: &str) -> Option<&Class>;

    fn local_class_names(&self) -> Vec<String>;

    fn method(&self, owner: &str, name: &str, descriptor: &str) -> Option<&Method> {
        self.local_class(owner)?
            .methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Whether `name` refers to a class the analysis can see the body of,
    /// as opposed to an opaque platform/library class.
    fn is_local(&self, name: &str) -> bool {
        self.local_class(name).is_some()
    }
}

/// A single rewrite the optimizer pipeline wants applied to a method's
/// code, expressed independently of any particular bytecode writer so the
/// optimizer passes stay decoupled from the DEX encoder (§4.3, §4.6).
#[derive(Clone, Debug, PartialEq)]
pub enum MethodEdit {
    ReplaceInstruction { offset: u32, replacement: crate::ir::Instruction },
    RemoveInstruction { offset: u32 },
    /// Redirects a branch's target, used by the unreachable-branch and
    /// instruction-reordering passes.
    RetargetBranch { offset: u32, new_target: u32 },
}

/// Write side of the external collaborator contract: accumulates edits and
/// is responsible for re-encoding them back into DEX/APK form. The engine
/// itself never touches bytes; it only ever calls `apply`.
pub trait DexBuilder {
    fn apply(&mut self, owner: &str, method_name: &str, descriptor: &str, edits: Vec<MethodEdit>);

    /// Finalizes all accumulated edits. Implementations backed by a real
    /// DEX writer perform the actual re-encoding here; the in-memory test
    /// double just freezes its edit log for assertions.
    fn finish(&mut self) -> Result<(), crate::errors::EngineError>;
}
