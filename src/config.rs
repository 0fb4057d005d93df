//! Run configuration: resource bounds, include/exclude filters, and the
//! safe-list of side-effect-free library methods (§4.5, §6).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::errors::{EngineError, EngineResult};

/// Resource bounds enforced by the driver (§5). Each field mirrors one of
/// the spec's named bounds one-to-one.
#[derive(Clone, Copy, Debug)]
pub struct ResourceBounds {
    pub max_address_visits: u32,
    pub max_call_depth: u32,
    pub max_method_visits: u32,
    pub max_execution_time: std::time::Duration,
    pub max_optimization_passes: u32,
}

impl Default for ResourceBounds {
    fn default() -> Self {
        ResourceBounds {
            max_address_visits: 10_000,
            max_call_depth: 64,
            max_method_visits: 50_000,
            max_execution_time: std::time::Duration::from_secs(120),
            max_optimization_passes: 16,
        }
    }
}

/// A library method known to be free of observable side effects, loaded
/// either from a user-supplied JSON file or the small built-in default
/// table (§4.5).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct SafeListEntry {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, Deserialize)]
struct SafeListFile {
    methods: Vec<SafeListEntry>,
}

/// Side-effect-free methods the interpreter may fold through without
/// treating the call as opaque.
#[derive(Clone, Debug, Default)]
pub struct SafeList {
    entries: BTreeSet<SafeListEntry>,
}

impl SafeList {
    pub fn contains(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.entries.iter().any(|entry| {
            entry.owner == owner && entry.name == name && entry.descriptor == descriptor
        })
    }

    pub fn default_table() -> Self {
        let raw = [
            ("Ljava/lang/Math;", "abs", "(I)I"),
            ("Ljava/lang/Math;", "abs", "(J)J"),
            ("Ljava/lang/Math;", "max", "(II)I"),
            ("Ljava/lang/Math;", "min", "(II)I"),
            ("Ljava/lang/String;", "length", "()I"),
            ("Ljava/lang/String;", "charAt", "(I)C"),
            ("Ljava/lang/String;", "equals", "(Ljava/lang/Object;)Z"),
            ("Ljava/lang/String;", "hashCode", "()I"),
            ("Ljava/lang/Integer;", "valueOf", "(I)Ljava/lang/Integer;"),
            ("Ljava/lang/Boolean;", "valueOf", "(Z)Ljava/lang/Boolean;"),
            ("Ljava/util/Objects;", "equals", "(Ljava/lang/Object;Ljava/lang/Object;)Z"),
        ];
        SafeList {
            entries: raw
                .into_iter()
                .map(|(owner, name, descriptor)| SafeListEntry {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
                .collect(),
        }
    }

    /// Loads a safe list from a JSON file, reporting precise
    /// path-annotated parse errors via `serde_path_to_error`, the same
    /// pattern used for SARIF-schema diagnostics upstream.
    pub fn load(path: &Path) -> EngineResult<SafeList> {
        let raw = fs::read_to_string(path)?;
        let deserializer = &mut serde_json::Deserializer::from_str(&raw);
        let parsed: SafeListFile = serde_path_to_error::deserialize(deserializer)
            .map_err(|err| EngineError::Config(format!("{path:?}: {err}")))?;
        Ok(SafeList {
            entries: parsed.methods.into_iter().collect(),
        })
    }

    pub fn merge(mut self, other: SafeList) -> SafeList {
        self.entries.extend(other.entries);
        self
    }
}

/// Filtering of which local classes and methods are analyzed (§6
/// `--include-filter`/`--exclude-filter`/`--include-support-library`).
///
/// `--include-support-library` gates a class-level skip (an entire support
/// package is either in scope or not); `--include-filter`/`--exclude-filter`
/// are, per §6, *method-signature* filters and so are matched against each
/// method's full `owner->name(descriptor)` signature, not the owning
/// class's name — a filter targeting one method (e.g. `->m\(\)V`) would
/// never match anything if it were applied to the class name alone.
#[derive(Clone, Debug)]
pub struct ClassFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    include_support_library: bool,
}

const SUPPORT_LIBRARY_PATTERN: &str = r"^L(android/support/(annotation|v\d+)|androidx)/";

impl ClassFilter {
    pub fn new(
        include: Option<&str>,
        exclude: Option<&str>,
        include_support_library: bool,
    ) -> EngineResult<ClassFilter> {
        let compile = |pattern: Option<&str>| -> EngineResult<Option<Regex>> {
            pattern
                .map(|p| Regex::new(p).map_err(|err| EngineError::Config(err.to_string())))
                .transpose()
        };
        Ok(ClassFilter {
            include: compile(include)?,
            exclude: compile(exclude)?,
            include_support_library,
        })
    }

    /// Whether `class_name` is in scope at all: the default support
    /// -library skip, applied before any method in the class is even
    /// enumerated. Does not consult `--include-filter`/`--exclude-filter`;
    /// those are method-signature filters, see [`ClassFilter::admits_method`].
    pub fn admits_class(&self, class_name: &str) -> bool {
        if !self.include_support_library {
            if let Ok(support) = Regex::new(SUPPORT_LIBRARY_PATTERN) {
                if support.is_match(class_name) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether `signature` (a method's full `owner->name(descriptor)`
    /// string, §6) is admitted by `--include-filter`/`--exclude-filter`.
    pub fn admits_method(&self, signature: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(signature) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(signature),
            None => true,
        }
    }
}

impl Default for ClassFilter {
    fn default() -> Self {
        ClassFilter {
            include: None,
            exclude: None,
            include_support_library: false,
        }
    }
}

/// Classes whose `<clinit>`/constructors are known side-effect-free enough
/// that `new-instance` need not conservatively report STRONG (§4.1
/// "new-instance", §6 "Config predicates" `isSafe(className)`).
#[derive(Clone, Debug, Default)]
pub struct SafeClasses {
    names: BTreeSet<String>,
}

impl SafeClasses {
    pub fn contains(&self, class_name: &str) -> bool {
        self.names.contains(class_name)
    }

    pub fn default_table() -> Self {
        SafeClasses {
            names: [
                "Ljava/lang/Object;",
                "Ljava/lang/StringBuilder;",
                "Ljava/lang/String;",
                "Ljava/util/ArrayList;",
                "Ljava/util/HashMap;",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

/// Full run configuration assembled from CLI flags (§6).
#[derive(Clone, Debug)]
pub struct Config {
    pub bounds: ResourceBounds,
    pub filter: ClassFilter,
    pub safe_list: SafeList,
    pub safe_classes: SafeClasses,
    pub output_api_level: u32,
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bounds: ResourceBounds::default(),
            filter: ClassFilter::default(),
            safe_list: SafeList::default_table(),
            safe_classes: SafeClasses::default_table(),
            output_api_level: 21,
            jobs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_safe_list_contains_math_abs() {
        let safe_list = SafeList::default_table();
        assert!(safe_list.contains("Ljava/lang/Math;", "abs", "(I)I"));
        assert!(!safe_list.contains("Ljava/lang/Math;", "abs", "(F)F"));
    }

    #[test]
    fn filter_excludes_support_library_by_default() {
        let filter = ClassFilter::new(None, None, false).unwrap();
        assert!(!filter.admits_class("Landroidx/core/app/NotificationCompat;"));
        assert!(filter.admits_class("Lcom/example/Foo;"));
    }

    #[test]
    fn filter_can_opt_into_support_library() {
        let filter = ClassFilter::new(None, None, true).unwrap();
        assert!(filter.admits_class("Landroidx/core/app/NotificationCompat;"));
    }

    #[test]
    fn include_filter_narrows_to_matching_method_signatures() {
        let filter = ClassFilter::new(Some(r"^Lcom/example/"), None, false).unwrap();
        assert!(filter.admits_method("Lcom/example/Foo;->m()V"));
        assert!(!filter.admits_method("Lcom/other/Bar;->n()V"));
    }

    #[test]
    fn exclude_filter_wins_over_include() {
        let filter = ClassFilter::new(Some(r"^Lcom/"), Some(r"Generated"), false).unwrap();
        assert!(!filter.admits_method("Lcom/example/FooGenerated;->m()V"));
    }

    #[test]
    fn method_filters_do_not_affect_class_admission() {
        let filter = ClassFilter::new(Some(r"->m\(\)V$"), None, false).unwrap();
        assert!(filter.admits_class("Lcom/example/Foo;"));
    }
}
