//! Local scan bridge
//!
//! Runs one scan per message: makes sure the runtime and builtin module
//! are ready, marshals the message into the builtin table, imports the
//! user module if no earlier import succeeded, calls the entry point,
//! reconciles recipients and decodes the result.
//!
//! The import runs inside the per-call scope, after the snapshot and the
//! capability bindings are installed, so module-level code can already
//! read the session and call `log` or `expand` for the first message.
//!
//! Every failure inside the bridge ends in the configured fallback
//! disposition with a reject-log entry; nothing escapes to the caller.

use crate::decode::{decode_result, DispositionOutcome};
use crate::error::BridgeError;
use crate::host::Host;
use crate::marshal::{bind_capabilities, install_snapshot, CallGuard, SessionSnapshot, SharedHost};
use crate::reconcile::{read_working, RecipientPlan};
use crate::runtime::{ModuleLoader, ScriptRuntime, SearchPathLoader};
use crate::sanitize::sanitize;
use mlua::{Function, Lua, MultiValue, Scope, Table, Value};
use scanbridge_common::config::BridgeConfig;
use scanbridge_common::types::{LogSelector, ScanResult};
use std::cell::RefCell;
use tracing::{debug, error, info, info_span};

/// Bridge between the MTA's local scan hook and a Lua policy module
pub struct LocalScanBridge {
    config: BridgeConfig,
    runtime: ScriptRuntime,
}

impl LocalScanBridge {
    /// Create a bridge that searches `script_paths` for the user module
    pub fn new(config: BridgeConfig) -> Self {
        let loader = SearchPathLoader::new(config.script_paths.iter().cloned());
        Self::with_loader(config, Box::new(loader))
    }

    /// Create a bridge with a custom module loader
    pub fn with_loader(config: BridgeConfig, loader: Box<dyn ModuleLoader>) -> Self {
        let runtime = ScriptRuntime::new(
            config.builtin_module.clone(),
            config.user_module.clone(),
            loader,
        );
        Self::with_runtime(config, runtime)
    }

    /// Create a bridge around an existing runtime
    pub fn with_runtime(config: BridgeConfig, runtime: ScriptRuntime) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Scan one message.
    ///
    /// `fd` is the spool file descriptor handed over by the host; it is
    /// only passed through to the script.
    pub fn scan(&self, host: &mut dyn Host, fd: i32) -> ScanResult {
        let span = info_span!("local_scan", fd, module = %self.config.user_module);
        let _enter = span.enter();

        match self.try_scan(&mut *host, fd) {
            Ok(result) => {
                info!(code = result.code, text = ?result.return_text, "Scan complete");
                result
            }
            Err(err) => self.fail(host, err),
        }
    }

    fn try_scan(&self, host: &mut dyn Host, fd: i32) -> Result<ScanResult, BridgeError> {
        let lua = self.runtime.ensure_runtime_ready();
        let builtin = self.runtime.ensure_builtin_capabilities_registered()?;

        let snapshot = SessionSnapshot::capture(&*host, fd);
        let shared: SharedHost<'_> = RefCell::new(host);

        lua.scope(|scope| Ok(self.invoke(lua, scope, &builtin, &shared, &snapshot)))?
    }

    fn invoke<'lua, 'scope, 'h>(
        &self,
        lua: &'lua Lua,
        scope: &Scope<'lua, 'scope>,
        builtin: &Table<'lua>,
        host: &'scope SharedHost<'h>,
        snapshot: &SessionSnapshot,
    ) -> Result<ScanResult, BridgeError>
    where
        'lua: 'scope,
        'h: 'scope,
    {
        let _guard = CallGuard::new(lua, builtin.clone());

        bind_capabilities(lua, scope, host)?;
        install_snapshot(lua, builtin, snapshot)?;

        let module = self.runtime.ensure_user_module_loaded()?;
        let entry = self.entry_point(lua, module)?;

        debug!(function = %self.config.entry_point, "Calling entry point");
        let called = entry.call::<_, MultiValue>(());

        // Recipients are reconciled whether or not the call raised
        let reconciled = self.reconcile(builtin, host, &snapshot.recipients);

        let values = called.map_err(|err| BridgeError::Invocation {
            function: self.config.entry_point.clone(),
            reason: err.to_string(),
        })?;
        reconciled?;

        match decode_result(lua, values, &self.config.entry_point)? {
            DispositionOutcome::Code(code) => Ok(ScanResult::code(code)),
            DispositionOutcome::CodeWithText(code, text) => Ok(ScanResult::with_text(code, text)),
            DispositionOutcome::Failure(err) => Err(err),
        }
    }

    /// Find the entry point on the module table, or among the globals
    /// when the module did not return a table
    fn entry_point<'lua>(
        &self,
        lua: &'lua Lua,
        module: Value<'lua>,
    ) -> Result<Function<'lua>, BridgeError> {
        let name = self.config.entry_point.as_str();
        let candidate = match module {
            Value::Table(table) => table.get::<_, Value>(name)?,
            _ => lua.globals().get::<_, Value>(name)?,
        };

        match candidate {
            Value::Function(function) => Ok(function),
            _ => Err(BridgeError::FunctionMissing {
                module: self.config.user_module.clone(),
                function: name.to_string(),
            }),
        }
    }

    fn reconcile(
        &self,
        builtin: &Table<'_>,
        host: &SharedHost<'_>,
        original: &[String],
    ) -> Result<(), BridgeError> {
        let working = read_working(builtin)?;
        let plan = RecipientPlan::plan(original, &working);

        let mut host = host
            .try_borrow_mut()
            .map_err(|err| BridgeError::Runtime(mlua::Error::external(err)))?;
        plan.apply(&mut **host);
        Ok(())
    }

    fn fail(&self, host: &mut dyn Host, err: BridgeError) -> ScanResult {
        let mut message = err.log_message();
        if self.config.log_script_errors {
            if let Some(detail) = err.detail() {
                message = format!("{}: {}", message, detail);
            }
        }

        error!(error = %err, "{}", message);
        host.log_write(LogSelector::REJECT, &sanitize(&message, false));

        ScanResult::with_text(self.config.failure_disposition, err.return_text())
    }
}
