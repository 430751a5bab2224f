//! Context marshaling
//!
//! Copies the message's session attributes, headers and recipients into
//! the builtin module table for the duration of one scan.
//!
//! `expand`, `log` and `add_header` are registered once, next to the
//! constants, and stay valid for the life of the process so a module may
//! keep its own reference to them. Each one forwards to a function bound
//! for the current scan only; outside a scan they raise an error.

use crate::error::ExpansionError;
use crate::host::{Host, HostServices, MessageAccess};
use crate::sanitize::sanitize;
use mlua::{Function, Lua, MultiValue, Scope, Table, Value};
use scanbridge_common::types::{HeaderLine, HeaderType, LocalScanCode, LogSelector, SessionInfo};
use std::cell::RefCell;
use tracing::debug;

/// Name of the Working recipient sequence in the builtin table
pub const RECIPIENTS_KEY: &str = "recipients";

/// Name of the header sequence in the builtin table
pub const HEADERS_KEY: &str = "headers";

const SCALAR_KEYS: [&str; 9] = [
    "sender_address",
    "interface_address",
    "interface_port",
    "received_protocol",
    "sender_host_address",
    "sender_host_authenticated",
    "sender_host_name",
    "sender_host_port",
    "fd",
];

const CAPABILITY_KEYS: [&str; 3] = ["expand", "log", "add_header"];

/// Registry slot holding the current scan's capability bindings
const BINDINGS_REGISTRY_KEY: &str = "scanbridge.scan_bindings";

/// The host as capability functions see it during a scan
pub type SharedHost<'h> = RefCell<&'h mut dyn Host>;

/// Everything read from the host at call start.
///
/// `recipients` is the Original recipient list; it stays on the Rust side
/// so nothing the script does can change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: SessionInfo,
    pub fd: i32,
    pub headers: Vec<HeaderLine>,
    pub recipients: Vec<String>,
}

impl SessionSnapshot {
    /// Read the message state from the host
    pub fn capture<H: MessageAccess + ?Sized>(host: &H, fd: i32) -> Self {
        Self {
            session: host.session(),
            fd,
            headers: host.headers(),
            recipients: host.recipients(),
        }
    }
}

/// Install the process-lifetime `expand`, `log` and `add_header`
/// functions into the builtin table
pub fn register_capabilities<'lua>(lua: &'lua Lua, builtin: &Table<'lua>) -> mlua::Result<()> {
    for name in CAPABILITY_KEYS {
        let forward = lua.create_function(move |lua, args: MultiValue| {
            let bindings: Option<Table> = lua.named_registry_value(BINDINGS_REGISTRY_KEY)?;
            let target = match bindings {
                Some(bindings) => bindings.raw_get::<_, Option<Function>>(name)?,
                None => None,
            };

            match target {
                Some(target) => target.call::<_, MultiValue>(args),
                None => Err(mlua::Error::RuntimeError(format!(
                    "'{}' called with no scan in progress",
                    name
                ))),
            }
        })?;
        builtin.raw_set(name, forward)?;
    }
    Ok(())
}

/// Bind the current scan's host behind the registered capability
/// functions.
///
/// The bindings borrow the host and stop working once `scope` ends;
/// [`CallGuard`] removes them before that.
pub fn bind_capabilities<'lua, 'scope, 'h: 'scope>(
    lua: &'lua Lua,
    scope: &Scope<'lua, 'scope>,
    host: &'scope SharedHost<'h>,
) -> mlua::Result<()> {
    let expand = scope.create_function(move |_, text: mlua::String| {
        let text = text.to_string_lossy();
        let expanded = host
            .try_borrow()
            .map_err(mlua::Error::external)?
            .expand(&text);
        expanded.ok_or_else(|| {
            mlua::Error::external(ExpansionError {
                input: text.into_owned(),
            })
        })
    })?;

    let log = scope.create_function(move |_, (text, selector): (mlua::String, Option<i64>)| {
        let selector = match selector {
            Some(bits) => u32::try_from(bits)
                .map(LogSelector::from_bits)
                .map_err(|_| mlua::Error::RuntimeError(format!("invalid log selector {}", bits)))?,
            None => LogSelector::default(),
        };
        host.try_borrow_mut()
            .map_err(mlua::Error::external)?
            .log_write(selector, &sanitize(&text.to_string_lossy(), false));
        Ok(())
    })?;

    let add_header = scope.create_function(move |_, text: mlua::String| {
        host.try_borrow_mut()
            .map_err(mlua::Error::external)?
            .header_add(HeaderType::Other, &sanitize(&text.to_string_lossy(), true));
        Ok(())
    })?;

    let bindings = lua.create_table()?;
    bindings.raw_set("expand", expand)?;
    bindings.raw_set("log", log)?;
    bindings.raw_set("add_header", add_header)?;
    lua.set_named_registry_value(BINDINGS_REGISTRY_KEY, bindings)
}

/// Copy the snapshot, the constants and a fresh Working recipient list
/// into the builtin table
pub fn install_snapshot<'lua>(
    lua: &'lua Lua,
    builtin: &Table<'lua>,
    snapshot: &SessionSnapshot,
) -> mlua::Result<()> {
    let session = &snapshot.session;

    builtin.raw_set("sender_address", session.sender_address.as_deref())?;
    builtin.raw_set("interface_address", session.interface_address.as_deref())?;
    builtin.raw_set("interface_port", session.interface_port)?;
    builtin.raw_set("received_protocol", session.received_protocol.as_deref())?;
    builtin.raw_set("sender_host_address", session.sender_host_address.as_deref())?;
    builtin.raw_set(
        "sender_host_authenticated",
        session.sender_host_authenticated.as_deref(),
    )?;
    builtin.raw_set("sender_host_name", session.sender_host_name.as_deref())?;
    builtin.raw_set("sender_host_port", session.sender_host_port)?;
    builtin.raw_set("fd", snapshot.fd)?;

    for (name, selector) in LogSelector::NAMED {
        builtin.raw_set(name, selector.bits())?;
    }
    for code in LocalScanCode::ALL {
        builtin.raw_set(code.constant_name(), code.code())?;
    }

    builtin.raw_set(HEADERS_KEY, header_sequence(lua, &snapshot.headers)?)?;

    let working = lua.create_sequence_from(snapshot.recipients.iter().map(String::as_str))?;
    builtin.raw_set(RECIPIENTS_KEY, working)?;

    debug!(
        headers = snapshot.headers.len(),
        recipients = snapshot.recipients.len(),
        "Snapshot installed"
    );
    Ok(())
}

/// Build `{ {text, type}, ... }`; each pair is also reachable as
/// `.text` and `.type`
fn header_sequence<'lua>(lua: &'lua Lua, headers: &[HeaderLine]) -> mlua::Result<Table<'lua>> {
    let sequence = lua.create_table()?;

    for (index, header) in headers.iter().enumerate() {
        let tag = header.header_type.as_char().to_string();
        let pair = lua.create_table()?;
        pair.raw_set(1, header.text.as_str())?;
        pair.raw_set(2, tag.as_str())?;
        pair.raw_set("text", header.text.as_str())?;
        pair.raw_set("type", tag.as_str())?;
        sequence.raw_set(index + 1, pair)?;
    }

    Ok(sequence)
}

/// Clears every per-call entry from the builtin table and the current
/// scan's capability bindings when dropped.
///
/// Constants and the registered capability functions survive.
pub struct CallGuard<'lua> {
    lua: &'lua Lua,
    builtin: Table<'lua>,
}

impl<'lua> CallGuard<'lua> {
    pub fn new(lua: &'lua Lua, builtin: Table<'lua>) -> Self {
        Self { lua, builtin }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let keys = SCALAR_KEYS.iter().chain(&[HEADERS_KEY, RECIPIENTS_KEY]);

        for key in keys {
            if let Err(err) = self.builtin.raw_set(*key, Value::Nil) {
                debug!(key = %key, error = %err, "Failed to release per-call value");
            }
        }

        if let Err(err) = self.lua.set_named_registry_value(BINDINGS_REGISTRY_KEY, Value::Nil) {
            debug!(error = %err, "Failed to release capability bindings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use pretty_assertions::assert_eq;

    fn create_test_host() -> MemoryHost {
        MemoryHost::new(SessionInfo {
            sender_address: Some("sender@example.com".to_string()),
            interface_address: Some("192.0.2.1".to_string()),
            interface_port: 25,
            received_protocol: Some("esmtp".to_string()),
            sender_host_address: Some("198.51.100.7".to_string()),
            sender_host_authenticated: None,
            sender_host_name: None,
            sender_host_port: 41234,
        })
        .with_header(HeaderLine::classified("From: sender@example.com\n"))
        .with_header(HeaderLine::classified("Subject: hi\n"))
        .with_recipients(["a@example.org", "b@example.org"])
        .with_variable("primary_hostname", "mx.local")
    }

    #[test]
    fn test_install_snapshot_scalars_and_constants() {
        let lua = Lua::new();
        let builtin = lua.create_table().unwrap();
        let host = create_test_host();
        let snapshot = SessionSnapshot::capture(&host, 5);

        install_snapshot(&lua, &builtin, &snapshot).unwrap();

        assert_eq!(builtin.get::<_, String>("sender_address").unwrap(), "sender@example.com");
        assert_eq!(builtin.get::<_, i64>("interface_port").unwrap(), 25);
        assert_eq!(builtin.get::<_, i64>("fd").unwrap(), 5);
        assert!(builtin.get::<_, Value>("sender_host_name").unwrap().is_nil());
        assert!(builtin.get::<_, Value>("sender_host_authenticated").unwrap().is_nil());

        assert_eq!(builtin.get::<_, i64>("LOCAL_SCAN_ACCEPT").unwrap(), 0);
        assert_eq!(builtin.get::<_, i64>("LOCAL_SCAN_REJECT").unwrap(), 7);
        assert_eq!(builtin.get::<_, i64>("LOCAL_SCAN_TEMPREJECT").unwrap(), 9);
        assert_eq!(builtin.get::<_, i64>("LOG_REJECT").unwrap(), 16);
    }

    #[test]
    fn test_install_snapshot_headers_and_recipients() {
        let lua = Lua::new();
        let builtin = lua.create_table().unwrap();
        let host = create_test_host();
        let snapshot = SessionSnapshot::capture(&host, 0);

        install_snapshot(&lua, &builtin, &snapshot).unwrap();
        lua.globals().set("exim", builtin).unwrap();

        let (text, tag, named): (String, String, String) = lua
            .load("local h = exim.headers[1]\nreturn h[1], h[2], exim.headers[2].text")
            .eval()
            .unwrap();
        assert_eq!(text, "From: sender@example.com\n");
        assert_eq!(tag, "F");
        assert_eq!(named, "Subject: hi\n");

        let recipients: Vec<String> = lua.load("return exim.recipients").eval().unwrap();
        assert_eq!(recipients, snapshot.recipients);
    }

    #[test]
    fn test_empty_headers_are_an_empty_sequence() {
        let lua = Lua::new();
        let builtin = lua.create_table().unwrap();
        let snapshot = SessionSnapshot::capture(&MemoryHost::default(), 0);

        install_snapshot(&lua, &builtin, &snapshot).unwrap();

        let headers: Table = builtin.get(HEADERS_KEY).unwrap();
        assert_eq!(headers.raw_len(), 0);
    }

    fn create_builtin(lua: &Lua) -> Table<'_> {
        let builtin = lua.create_table().unwrap();
        register_capabilities(lua, &builtin).unwrap();
        lua.globals().set("exim", builtin.clone()).unwrap();
        builtin
    }

    #[test]
    fn test_capabilities_reach_the_host() {
        let lua = Lua::new();
        create_builtin(&lua);

        let mut host = create_test_host();
        {
            let shared: SharedHost = RefCell::new(&mut host);
            lua.scope(|scope| {
                bind_capabilities(&lua, scope, &shared)?;
                lua.load(
                    r#"
                    exim.log("100% done")
                    exim.log("to reject", 16)
                    exim.add_header("X-Host: " .. exim.expand("$primary_hostname"))
                    "#,
                )
                .exec()
            })
            .unwrap_or_else(|err| panic!("script failed: {err}"));
        }

        let records = host.log_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "100%% done");
        assert_eq!(records[0].selector, LogSelector::MAIN);
        assert_eq!(records[1].selector, LogSelector::REJECT);
        assert_eq!(host.header_lines().last().unwrap().text, "X-Host: mx.local\n");
        assert_eq!(host.header_lines().last().unwrap().header_type, HeaderType::Other);
    }

    #[test]
    fn test_kept_reference_works_across_scans() {
        let lua = Lua::new();
        create_builtin(&lua);
        lua.load("saved_log = exim.log").exec().unwrap();

        let mut host = create_test_host();
        for round in 1..=2 {
            let shared: SharedHost = RefCell::new(&mut host);
            lua.scope(|scope| {
                let _guard = CallGuard::new(&lua, lua.create_table()?);
                bind_capabilities(&lua, scope, &shared)?;
                lua.load(format!("saved_log('round {}')", round)).exec()
            })
            .unwrap_or_else(|err| panic!("round {round} failed: {err}"));
        }

        let texts: Vec<&str> = host.log_records().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["round 1", "round 2"]);
    }

    #[test]
    fn test_capabilities_outside_scan_raise() {
        let lua = Lua::new();
        create_builtin(&lua);

        let message: String = lua
            .load("local ok, err = pcall(exim.log, 'late')\nassert(not ok)\nreturn tostring(err)")
            .eval()
            .unwrap();
        assert!(message.contains("'log' called with no scan in progress"), "{message}");
    }

    #[test]
    fn test_non_utf8_text_is_accepted() {
        let lua = Lua::new();
        create_builtin(&lua);

        let mut host = create_test_host();
        {
            let shared: SharedHost = RefCell::new(&mut host);
            lua.scope(|scope| {
                bind_capabilities(&lua, scope, &shared)?;
                lua.load(r#"exim.log("Subject: caf\xe9") exim.add_header("X-Name: caf\xe9")"#)
                    .exec()
            })
            .unwrap_or_else(|err| panic!("script failed: {err}"));
        }

        assert_eq!(host.log_records()[0].text, "Subject: caf\u{FFFD}");
        assert_eq!(host.header_lines().last().unwrap().text, "X-Name: caf\u{FFFD}\n");
    }

    #[test]
    fn test_expand_failure_is_catchable() {
        let lua = Lua::new();
        create_builtin(&lua);

        let mut host = create_test_host();
        let shared: SharedHost = RefCell::new(&mut host);
        let message: String = lua
            .scope(|scope| {
                bind_capabilities(&lua, scope, &shared)?;
                lua.load(
                    r#"
                    local ok, err = pcall(exim.expand, "$no_such_variable")
                    assert(not ok)
                    return tostring(err)
                    "#,
                )
                .eval()
            })
            .unwrap();

        assert!(message.contains("expansion of [$no_such_variable] failed"), "{message}");
    }

    #[test]
    fn test_invalid_log_selector_raises() {
        let lua = Lua::new();
        create_builtin(&lua);

        let mut host = MemoryHost::default();
        let shared: SharedHost = RefCell::new(&mut host);
        let result = lua.scope(|scope| {
            bind_capabilities(&lua, scope, &shared)?;
            lua.load("exim.log('x', -1)").exec()
        });

        assert!(result.is_err());
    }

    #[test]
    fn test_call_guard_releases_per_call_values() {
        let lua = Lua::new();
        let builtin = create_builtin(&lua);
        let snapshot = SessionSnapshot::capture(&create_test_host(), 3);

        let mut host = create_test_host();
        let shared: SharedHost = RefCell::new(&mut host);
        lua.scope(|scope| {
            let _guard = CallGuard::new(&lua, builtin.clone());
            bind_capabilities(&lua, scope, &shared)?;
            install_snapshot(&lua, &builtin, &snapshot)?;
            assert!(builtin.contains_key(RECIPIENTS_KEY)?);
            lua.load("exim.log('inside')").exec()
        })
        .unwrap();

        assert!(!builtin.contains_key(RECIPIENTS_KEY).unwrap());
        assert!(!builtin.contains_key(HEADERS_KEY).unwrap());
        assert!(!builtin.contains_key("fd").unwrap());
        assert_eq!(builtin.get::<_, i64>("LOCAL_SCAN_REJECT").unwrap(), 7);
        assert!(builtin.contains_key("log").unwrap());

        let late: bool = lua.load("return (pcall(exim.log, 'late'))").eval().unwrap();
        assert!(!late);

        drop(shared);
        assert_eq!(host.log_records().len(), 1);
    }
}
