//! Module loaders
//!
//! Both loaders go through Lua's own `require`, so a user module can
//! `require` its siblings and a successful import is cached in
//! `package.loaded` like any other Lua module.

use mlua::{Function, Lua, Table, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Finds and imports the user policy module
pub trait ModuleLoader {
    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Import `name` and return the module value
    fn load<'lua>(&self, lua: &'lua Lua, name: &str) -> mlua::Result<Value<'lua>>;
}

fn require<'lua>(lua: &'lua Lua, name: &str) -> mlua::Result<Value<'lua>> {
    let require: Function = lua.globals().get("require")?;
    require.call::<_, Value>(name)
}

fn package_table(lua: &Lua) -> mlua::Result<Table<'_>> {
    lua.globals().get("package")
}

/// Loads modules from directories on `package.path`
#[derive(Debug, Clone, Default)]
pub struct SearchPathLoader {
    dirs: Vec<PathBuf>,
}

impl SearchPathLoader {
    /// Search the given directories, first match wins
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// `package.path` entries for the configured directories
    fn path_prefix(&self) -> String {
        self.dirs
            .iter()
            .map(|dir| {
                let dir = dir.display();
                format!("{dir}/?.lua;{dir}/?/init.lua;")
            })
            .collect()
    }
}

impl ModuleLoader for SearchPathLoader {
    fn describe(&self) -> String {
        let dirs: Vec<String> = self.dirs.iter().map(|d| d.display().to_string()).collect();
        format!("search path [{}]", dirs.join(", "))
    }

    fn load<'lua>(&self, lua: &'lua Lua, name: &str) -> mlua::Result<Value<'lua>> {
        let prefix = self.path_prefix();
        if !prefix.is_empty() {
            let package = package_table(lua)?;
            let current: String = package.get("path")?;
            if !current.starts_with(&prefix) {
                package.set("path", format!("{prefix}{current}"))?;
            }
        }

        require(lua, name)
    }
}

/// Loads modules from source text held in memory
#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    sources: HashMap<String, String>,
}

impl SourceLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Register module source under `name`
    pub fn with_module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    /// Register the contents of `path` under `name`
    pub fn with_file(self, name: impl Into<String>, path: &Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.with_module(name, source))
    }
}

impl ModuleLoader for SourceLoader {
    fn describe(&self) -> String {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        format!("in-memory sources [{}]", names.join(", "))
    }

    fn load<'lua>(&self, lua: &'lua Lua, name: &str) -> mlua::Result<Value<'lua>> {
        let preload: Table = package_table(lua)?.get("preload")?;

        for (module, source) in &self.sources {
            if preload.contains_key(module.as_str())? {
                continue;
            }
            let chunk = lua.load(source.as_str()).set_name(module.as_str()).into_function()?;
            preload.set(module.as_str(), chunk)?;
        }

        require(lua, name)
    }
}
