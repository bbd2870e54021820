//! Layered macro and PCD scopes
//!
//! Macro lookup walks five layers in priority order:
//! command-line overrides > process-global defines > current
//! (section, name, arch) scope > the enclosing Common scope > platform
//! defines. `SET` bindings form a single flat PCD table visible everywhere.
//!
//! All state is owned by the per-run [`crate::session::CompileSession`];
//! there are no process-wide statics.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

pub const COMMON_ARCH: &str = "COMMON";

/// Which kind of FDF section a scope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SectionKind {
    Defines,
    Fd,
    Fv,
    Capsule,
    Rule,
    OptionRom,
    FmpPayload,
}

impl SectionKind {
    /// Relative order sections must appear in.
    pub fn rank(self) -> u8 {
        match self {
            SectionKind::Defines => 0,
            SectionKind::Fd => 1,
            SectionKind::Fv => 2,
            SectionKind::Capsule => 3,
            SectionKind::Rule => 4,
            SectionKind::OptionRom => 5,
            SectionKind::FmpPayload => 6,
        }
    }
}

/// Key of one macro scope: the section kind, the section's name
/// (sub-section), and the architecture it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub section: SectionKind,
    pub name: String,
    pub arch: String,
}

impl ScopeKey {
    pub fn new(section: SectionKind, name: &str, arch: &str) -> Self {
        Self {
            section,
            name: name.to_ascii_uppercase(),
            arch: arch.to_ascii_uppercase(),
        }
    }

    fn common(&self) -> Self {
        Self {
            section: self.section,
            name: self.name.clone(),
            arch: COMMON_ARCH.to_string(),
        }
    }
}

/// The layered macro table plus the flat PCD binding table.
#[derive(Debug, Clone, Default)]
pub struct MacroScope {
    cli: HashMap<String, String>,
    global: HashMap<String, String>,
    scoped: HashMap<ScopeKey, HashMap<String, String>>,
    platform: HashMap<String, String>,
    pcds: BTreeMap<String, String>,
    current: Option<ScopeKey>,
}

impl MacroScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a command-line `-D` override. Highest priority.
    pub fn define_cli(&mut self, name: &str, value: &str) {
        self.cli.insert(name.to_string(), value.to_string());
    }

    /// Install a platform define. Lowest priority.
    pub fn define_platform(&mut self, name: &str, value: &str) {
        self.platform.insert(name.to_string(), value.to_string());
    }

    /// Enter a section scope; subsequent `DEFINE`s land there.
    pub fn enter(&mut self, key: ScopeKey) {
        self.current = Some(key);
    }

    /// Capture a `DEFINE name = value`. In `[Defines]` (or before any
    /// section) the value is a process-global define; otherwise it lands in
    /// the current section scope.
    pub fn define(&mut self, name: &str, value: &str) {
        match &self.current {
            Some(key) if key.section != SectionKind::Defines => {
                self.scoped
                    .entry(key.clone())
                    .or_default()
                    .insert(name.to_string(), value.to_string());
            }
            _ => {
                self.global.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Capture a `SET space.name = value` PCD binding. Globally visible.
    pub fn set_pcd(&mut self, qualified_name: &str, value: &str) {
        self.pcds
            .insert(qualified_name.to_string(), value.to_string());
    }

    pub fn pcd(&self, qualified_name: &str) -> Option<&str> {
        self.pcds.get(qualified_name).map(String::as_str)
    }

    pub fn pcds(&self) -> &BTreeMap<String, String> {
        &self.pcds
    }

    /// Priority-ordered lookup.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.cli.get(name) {
            return Some(v);
        }
        if let Some(v) = self.global.get(name) {
            return Some(v);
        }
        if let Some(key) = &self.current {
            if let Some(v) = self.scoped.get(key).and_then(|m| m.get(name)) {
                return Some(v);
            }
            if let Some(v) = self.scoped.get(&key.common()).and_then(|m| m.get(name)) {
                return Some(v);
            }
        }
        self.platform.get(name).map(String::as_str)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some() || self.pcd(name).is_some()
    }

    /// Substitute every `$(NAME)` occurrence in `text`. Returns `Err` with
    /// the first undefined macro name.
    pub fn substitute(&self, text: &str) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find(')') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = &after[..end];
            match self.lookup(name) {
                Some(value) => out.push_str(value),
                None => return Err(name.to_string()),
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
