//! Two-tier function lookup: a plugin hook checked first, the evaluator's
//! built-in dispatch table checked second.
//!
//! Distinct from [`crate::ast_executor::ProcedureRegistry`], which resolves
//! `CALL`-style procedures rather than expression-level function calls — the
//! teacher already keeps these two concepts separate (`Procedure` trait vs.
//! `evaluate_function`); this module only generalizes the function side.

use crate::ast_executor::Value;
use std::sync::RwLock;

/// A plugin-supplied function implementation: name-resolved arguments in,
/// one [`Value`] out. Must be thread-safe, since the hook is read
/// concurrently by every evaluating query.
pub type FunctionHook = std::sync::Arc<dyn Fn(&str, &[Value]) -> Option<Value> + Send + Sync>;

static PLUGIN_HOOK: RwLock<Option<FunctionHook>> = RwLock::new(None);

/// Installs the process-wide plugin function hook.
///
/// Non-reentrant: a second call is rejected (logged, not panicking, since a
/// misbehaving embedder should not be able to bring the process down over a
/// double-install).
pub fn install_once(hook: FunctionHook) {
    let mut slot = PLUGIN_HOOK.write().unwrap();
    if slot.is_some() {
        log::warn!("nornicdb: function plugin hook already installed, ignoring re-install");
        return;
    }
    *slot = Some(hook);
}

/// Removes the installed hook. Test-only: production code installs once and
/// never uninstalls.
#[cfg(test)]
pub fn uninstall_for_test() {
    *PLUGIN_HOOK.write().unwrap() = None;
}

/// Tier 1 of the two-tier dispatch: consults the plugin hook, if any.
/// Returns `None` when no hook is installed or the hook doesn't recognize
/// `name`, in which case the caller falls through to the built-in table.
pub fn lookup_plugin(name: &str, args: &[Value]) -> Option<Value> {
    let guard = PLUGIN_HOOK.read().unwrap();
    guard.as_ref().and_then(|hook| hook(name, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    // `PLUGIN_HOOK` is process-global, so this single test exercises the
    // unset/installed/re-install cases in one body rather than racing across
    // parallel test threads.
    #[test]
    fn plugin_hook_lifecycle() {
        uninstall_for_test();
        assert_eq!(lookup_plugin("double", &[Value::Int(2)]), None);

        install_once(std::sync::Arc::new(|name, args| match (name, args) {
            ("double", [Value::Int(n)]) => Some(Value::Int(n * 2)),
            _ => None,
        }));
        assert_eq!(
            lookup_plugin("double", &[Value::Int(21)]),
            Some(Value::Int(42))
        );
        assert_eq!(lookup_plugin("unknown", &[]), None);

        // A second install is ignored, so the first hook (which only knows
        // "double") is still the one consulted.
        install_once(std::sync::Arc::new(|_, _| Some(Value::Bool(false))));
        assert_eq!(lookup_plugin("anything", &[]), None);

        uninstall_for_test();
    }
}
