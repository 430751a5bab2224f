//! Scripting runtime lifecycle
//!
//! Holds the process-lifetime Lua state and the two handles the bridge
//! caches across scans: the builtin module table and the imported user
//! module. Each is created at most once; a failed user module import
//! leaves its slot empty so the next scan tries again.

mod loader;

pub use loader::{ModuleLoader, SearchPathLoader, SourceLoader};

use crate::error::BridgeError;
use crate::marshal::register_capabilities;
use mlua::{Lua, RegistryKey, Table, Value};
use std::cell::OnceCell;
use tracing::{debug, info, warn};

/// Process-lifetime scripting state
pub struct ScriptRuntime {
    lua: OnceCell<Lua>,
    builtin: OnceCell<RegistryKey>,
    user_module: OnceCell<RegistryKey>,
    builtin_name: String,
    user_module_name: String,
    loader: Box<dyn ModuleLoader>,
}

impl ScriptRuntime {
    /// Create a runtime; nothing is initialized until the first scan
    pub fn new(
        builtin_name: impl Into<String>,
        user_module_name: impl Into<String>,
        loader: Box<dyn ModuleLoader>,
    ) -> Self {
        Self {
            lua: OnceCell::new(),
            builtin: OnceCell::new(),
            user_module: OnceCell::new(),
            builtin_name: builtin_name.into(),
            user_module_name: user_module_name.into(),
            loader,
        }
    }

    /// Adopt a Lua state some other component already initialized.
    ///
    /// Handles cached from a previous state belong to that state and are
    /// dropped.
    pub fn with_lua(self, lua: Lua) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(lua);
        Self {
            lua: cell,
            builtin: OnceCell::new(),
            user_module: OnceCell::new(),
            ..self
        }
    }

    /// Whether the Lua state exists yet
    pub fn is_initialized(&self) -> bool {
        self.lua.get().is_some()
    }

    /// Whether the user module has been imported successfully
    pub fn is_module_loaded(&self) -> bool {
        self.user_module.get().is_some()
    }

    /// Initialize the Lua state unless it already exists
    pub fn ensure_runtime_ready(&self) -> &Lua {
        self.lua.get_or_init(|| {
            info!("Initializing Lua runtime");
            Lua::new()
        })
    }

    /// Register the builtin module table once and return it.
    ///
    /// The table is published both as `package.loaded[<builtin>]` and as a
    /// global of the same name, with the capability functions installed.
    /// A table another component registered under that name is reused.
    pub fn ensure_builtin_capabilities_registered(&self) -> Result<Table<'_>, BridgeError> {
        let lua = self.ensure_runtime_ready();
        if let Some(key) = self.builtin.get() {
            return Ok(lua.registry_value(key)?);
        }

        let package: Table = lua.globals().get("package")?;
        let loaded: Table = package.get("loaded")?;

        let table = match loaded.get::<_, Value>(self.builtin_name.as_str())? {
            Value::Table(existing) => {
                debug!(module = %self.builtin_name, "Reusing registered builtin module");
                existing
            }
            _ => {
                let table = lua.create_table()?;
                loaded.set(self.builtin_name.as_str(), table.clone())?;
                table
            }
        };
        lua.globals().set(self.builtin_name.as_str(), table.clone())?;
        register_capabilities(lua, &table)?;

        let key = lua.create_registry_value(table.clone())?;
        let _ = self.builtin.set(key);
        info!(module = %self.builtin_name, "Builtin module registered");

        Ok(table)
    }

    /// Import the user module unless a previous import succeeded
    pub fn ensure_user_module_loaded(&self) -> Result<Value<'_>, BridgeError> {
        let lua = self.ensure_runtime_ready();
        if let Some(key) = self.user_module.get() {
            return Ok(lua.registry_value(key)?);
        }

        let module = self
            .loader
            .load(lua, &self.user_module_name)
            .map_err(|err| {
                warn!(
                    module = %self.user_module_name,
                    loader = %self.loader.describe(),
                    error = %err,
                    "User module import failed"
                );
                BridgeError::ModuleLoad {
                    module: self.user_module_name.clone(),
                    reason: err.to_string(),
                }
            })?;

        let key = lua.create_registry_value(module.clone())?;
        let _ = self.user_module.set(key);
        info!(
            module = %self.user_module_name,
            loader = %self.loader.describe(),
            "User module loaded"
        );

        Ok(module)
    }
}
