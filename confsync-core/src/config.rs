//! Engine configuration and observer hooks.
//!
//! [`Config`] is immutable once the processor starts. Observer hooks are
//! fire-and-forget: a panicking hook is contained and logged, never
//! propagated into the processing loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Observer hook around check/reload command execution:
/// `(resource name, rendered command, outcome)`.
pub type CommandHook = Arc<dyn Fn(&str, &str, Option<&dyn std::error::Error>) + Send + Sync>;

/// Observer hook for per-resource processing failures.
pub type ErrorHook = Arc<dyn Fn(&str, &dyn std::error::Error) + Send + Sync>;

/// Rewrites an absolute key before it reaches a watcher.
pub type AbsKeyAdjuster = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Mutates the template engine after the built-in environment is registered.
pub type FuncMapUpdater = Arc<dyn Fn(&mut tera::Tera) + Send + Sync>;

/// Default seconds between interval-mode cycles.
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Static engine configuration.
///
/// Mode priority when the processor starts: `onetime`, `interval_mode`,
/// `watch_mode`, then the client's watch capability decides.
#[derive(Clone, Default)]
pub struct Config {
    /// Run every resource once and stop.
    pub onetime: bool,
    /// Force interval mode.
    pub interval_mode: bool,
    /// Force watch mode.
    pub watch_mode: bool,
    /// Seconds between interval cycles; clamped to a 1 second floor.
    pub interval_secs: Option<u64>,
    /// Overrides every resource's key prefix.
    pub prefix: Option<String>,
    /// Directory holding template resource descriptors (`*.toml`).
    pub conf_dir: PathBuf,
    /// Directory holding source templates.
    pub template_dir: PathBuf,
    /// Retain stage files after a successful run.
    pub keep_stage_file: bool,
    /// Render and compare, but never write the destination.
    pub noop: bool,
    /// Skip check and reload commands.
    pub sync_only: bool,
    /// OpenPGP private key; enables the `c*` template functions.
    pub pgp_private_key: Option<Vec<u8>>,
    /// Extra template functions registered under their given names.
    pub func_map: Vec<(String, Arc<dyn tera::Function>)>,
    /// Engine mutators applied after every built-in registration.
    pub func_map_updaters: Vec<FuncMapUpdater>,
    pub hooks: Hooks,
}

impl Config {
    pub fn with_onetime(mut self) -> Self {
        self.onetime = true;
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_mode = true;
        self.interval_secs = Some(secs);
        self
    }

    pub fn with_watch(mut self) -> Self {
        self.watch_mode = true;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_func(mut self, name: impl Into<String>, func: impl tera::Function + 'static) -> Self {
        self.func_map.push((name.into(), Arc::new(func)));
        self
    }

    pub fn with_func_map_updater(
        mut self,
        updater: impl Fn(&mut tera::Tera) + Send + Sync + 'static,
    ) -> Self {
        self.func_map_updaters.push(Arc::new(updater));
        self
    }

    pub fn with_abs_key_adjuster(
        mut self,
        adjuster: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.hooks.abs_key_adjuster = Some(Arc::new(adjuster));
        self
    }

    pub fn with_error_hook(
        mut self,
        hook: impl Fn(&str, &dyn std::error::Error) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.error = Some(Arc::new(hook));
        self
    }

    /// Effective interval between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS).max(1))
    }
}

/// Observer callbacks invoked around command execution and on failures.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_check_cmd: Option<CommandHook>,
    pub after_check_cmd: Option<CommandHook>,
    pub before_reload_cmd: Option<CommandHook>,
    pub after_reload_cmd: Option<CommandHook>,
    pub error: Option<ErrorHook>,
    pub abs_key_adjuster: Option<AbsKeyAdjuster>,
}

impl Hooks {
    pub fn fire_before_check(&self, resource: &str, cmd: &str) {
        fire("before_check_cmd", &self.before_check_cmd, resource, cmd, None);
    }

    pub fn fire_after_check(
        &self,
        resource: &str,
        cmd: &str,
        err: Option<&dyn std::error::Error>,
    ) {
        fire("after_check_cmd", &self.after_check_cmd, resource, cmd, err);
    }

    pub fn fire_before_reload(&self, resource: &str, cmd: &str) {
        fire("before_reload_cmd", &self.before_reload_cmd, resource, cmd, None);
    }

    pub fn fire_after_reload(
        &self,
        resource: &str,
        cmd: &str,
        err: Option<&dyn std::error::Error>,
    ) {
        fire("after_reload_cmd", &self.after_reload_cmd, resource, cmd, err);
    }

    pub fn fire_error(&self, resource: &str, err: &dyn std::error::Error) {
        if let Some(hook) = &self.error {
            if catch_unwind(AssertUnwindSafe(|| hook(resource, err))).is_err() {
                tracing::error!(hook = "error", resource, "hook panicked");
            }
        }
    }

    /// Apply the configured adjuster to an absolute key.
    pub fn adjust_abs_key(&self, key: String) -> String {
        match &self.abs_key_adjuster {
            Some(adjuster) => adjuster(&key),
            None => key,
        }
    }
}

fn fire(
    name: &'static str,
    hook: &Option<CommandHook>,
    resource: &str,
    cmd: &str,
    err: Option<&dyn std::error::Error>,
) {
    if let Some(hook) = hook {
        if catch_unwind(AssertUnwindSafe(|| hook(resource, cmd, err))).is_err() {
            tracing::error!(hook = name, resource, "hook panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn interval_defaults_and_clamps() {
        assert_eq!(Config::default().interval(), Duration::from_secs(600));
        assert_eq!(
            Config::default().with_interval(30).interval(),
            Duration::from_secs(30)
        );
        assert_eq!(
            Config::default().with_interval(0).interval(),
            Duration::from_secs(1),
            "zero must never mean busy-loop"
        );
    }

    #[test]
    fn mode_setters_compose() {
        let config = Config::default().with_watch().with_prefix("app");
        assert!(config.watch_mode);
        assert_eq!(config.prefix.as_deref(), Some("app"));
    }

    #[test]
    fn command_hooks_observe_outcomes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let mut hooks = Hooks::default();
        hooks.after_check_cmd = Some(Arc::new(move |_, _, err| {
            if err.is_some() {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let failure = std::io::Error::other("boom");
        hooks.fire_after_check("web", "true", Some(&failure));
        hooks.fire_after_check("web", "true", None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_hook_is_contained() {
        let config = Config::default().with_error_hook(|_, _| panic!("hook bug"));
        let failure = std::io::Error::other("boom");
        config.hooks.fire_error("web", &failure);
    }

    #[test]
    fn abs_key_adjuster_rewrites_keys() {
        let config = Config::default().with_abs_key_adjuster(|key| format!("/v2{key}"));
        assert_eq!(
            config.hooks.adjust_abs_key("/app/port".to_string()),
            "/v2/app/port"
        );

        let plain = Hooks::default();
        assert_eq!(plain.adjust_abs_key("/app/port".to_string()), "/app/port");
    }
}
