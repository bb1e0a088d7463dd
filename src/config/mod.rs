//! Back-end configuration: `rangec.toml`.
//!
//! Two sections are recognised:
//!
//! ```toml
//! [codegen]
//! worklist_capacity = 200
//!
//! [vm]
//! memory_size = 1048576
//! heap_size = 524288
//! step_limit = 50000000
//! ```
//!
//! Every key is optional; missing keys keep their defaults.

use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::runtime::refcount::MAX_WORKLIST_CAPACITY;
use crate::span::Span;

/// Name of the configuration file looked up by [`Config::discover`].
pub const CONFIG_FILE: &str = "rangec.toml";

/// Settings that change the emitted program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenConfig {
    /// Slots in the deferred-decrement worklist. Pushing more records than
    /// this between two drains is a fatal runtime error.
    pub worklist_capacity: u32,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            worklist_capacity: 200,
        }
    }
}

/// Settings of the bundled simulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Total bytes of addressable memory. `Memtop` returns this value.
    pub memory_size: u32,
    /// Bytes handed to the memory manager, placed right after the data segment.
    pub heap_size: u32,
    /// Instructions executed before the run is aborted.
    pub step_limit: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_size: 1 << 20,
            heap_size: 1 << 19,
            step_limit: 50_000_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub codegen: CodegenConfig,
    pub vm: VmConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    /// Find `rangec.toml` in `dir` or any of its ancestors.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        let mut current = Some(dir);
        while let Some(d) = current {
            let candidate = d.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            current = d.parent();
        }
        None
    }

    /// Load the nearest `rangec.toml`, or the defaults when there is none.
    pub fn discover(dir: &Path) -> Result<Self, Diagnostic> {
        match Self::find(dir) {
            Some(path) => {
                log::debug!("using config {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err =
            |msg: String| Diagnostic::error(format!("{}: {}", path.display(), msg), Span::dummy());

        let mut config = Config::default();
        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                if section != "codegen" && section != "vm" {
                    return Err(err(format!("unknown section [{}]", section)));
                }
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(err(format!("expected `key = value`, found '{}'", trimmed)));
            };
            let key = key.trim();
            // Trailing comments and digit separators are accepted.
            let value = value.split('#').next().unwrap_or("").trim();
            let digits = value.replace('_', "");

            match (section.as_str(), key) {
                ("codegen", "worklist_capacity") => {
                    config.codegen.worklist_capacity = digits
                        .parse()
                        .map_err(|_| err(format!("invalid codegen.worklist_capacity: {}", value)))?;
                }
                ("vm", "memory_size") => {
                    config.vm.memory_size = digits
                        .parse()
                        .map_err(|_| err(format!("invalid vm.memory_size: {}", value)))?;
                }
                ("vm", "heap_size") => {
                    config.vm.heap_size = digits
                        .parse()
                        .map_err(|_| err(format!("invalid vm.heap_size: {}", value)))?;
                }
                ("vm", "step_limit") => {
                    config.vm.step_limit = digits
                        .parse()
                        .map_err(|_| err(format!("invalid vm.step_limit: {}", value)))?;
                }
                ("", _) => {
                    return Err(err(format!("key '{}' outside of a section", key)));
                }
                _ => {
                    return Err(err(format!("unknown key {}.{}", section, key)));
                }
            }
        }

        config.validate().map_err(err)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.codegen.worklist_capacity == 0 {
            return Err("codegen.worklist_capacity must be > 0".to_string());
        }
        if self.codegen.worklist_capacity > MAX_WORKLIST_CAPACITY {
            return Err(format!(
                "codegen.worklist_capacity ({}) must be at most {}",
                self.codegen.worklist_capacity, MAX_WORKLIST_CAPACITY
            ));
        }
        if self.vm.step_limit == 0 {
            return Err("vm.step_limit must be > 0".to_string());
        }
        if self.vm.heap_size >= self.vm.memory_size {
            return Err(format!(
                "vm.heap_size ({}) must be smaller than vm.memory_size ({})",
                self.vm.heap_size, self.vm.memory_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
