//! The per-resource render pipeline.
//!
//! A [`TemplateResource`] owns one destination file. `process()` runs the
//! full pipeline: resolve the file mode, pull the watched keys into the
//! snapshot, render the template into a stage file beside the
//! destination, compare, validate with `check_cmd`, swap with an atomic
//! rename (falling back to an in-place write when the destination is a
//! busy mount), and finally run `reload_cmd`. The stage file never
//! survives a failed render.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use confsync_core::{
    append_prefix, parse_file_mode, Config, KvStore, StoreClient, TemplateResourceConfig,
};
use confsync_renderer::{SharedStore, TemplateEngine};

use crate::command;
use crate::error::{io_err, SyncError};

/// One template resource and its runtime state.
pub struct TemplateResource {
    /// Descriptor file stem; identifies the resource in logs and hooks.
    pub name: String,
    /// Absolute path to the source template.
    pub src: PathBuf,
    /// Destination path published to.
    pub dest: PathBuf,
    /// Watched keys, relative to `prefix`.
    pub keys: Vec<String>,
    /// Backend key prefix (leading `/` guaranteed).
    pub prefix: String,

    mode: Option<String>,
    uid: u32,
    gid: u32,
    check_cmd: Option<String>,
    reload_cmd: Option<String>,

    file_mode: u32,
    last_index: u64,
    stage_path: Option<PathBuf>,

    store: SharedStore,
    engine: TemplateEngine,
    client: Arc<dyn StoreClient>,
    config: Arc<Config>,
}

impl std::fmt::Debug for TemplateResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateResource")
            .field("name", &self.name)
            .field("src", &self.src)
            .field("dest", &self.dest)
            .field("keys", &self.keys)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TemplateResource {
    /// Load the descriptor at `path` and bind it to `client`.
    pub fn load(
        path: &Path,
        config: Arc<Config>,
        client: Arc<dyn StoreClient>,
    ) -> Result<Self, SyncError> {
        let descriptor = TemplateResourceConfig::load(path)?.template;

        let mut prefix = match &config.prefix {
            Some(prefix) => prefix.clone(),
            None => descriptor.prefix.clone(),
        };
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }

        let (effective_uid, effective_gid) = effective_ids();
        let uid = descriptor.uid.unwrap_or(effective_uid);
        let gid = descriptor.gid.unwrap_or(effective_gid);

        let store: SharedStore = Arc::new(RwLock::new(KvStore::new()));
        let engine = TemplateEngine::new(store.clone(), &config);

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("template")
            .to_string();

        Ok(Self {
            name,
            src: config.template_dir.join(&descriptor.src),
            dest: descriptor.dest,
            keys: descriptor.keys,
            prefix,
            mode: descriptor.mode,
            uid,
            gid,
            check_cmd: descriptor.check_cmd,
            reload_cmd: descriptor.reload_cmd,
            file_mode: 0o644,
            last_index: 0,
            stage_path: None,
            store,
            engine,
            client,
            config,
        })
    }

    /// Load every `*.toml` descriptor in the configured conf dir, sorted
    /// by file name.
    pub fn load_all(
        config: &Arc<Config>,
        client: &Arc<dyn StoreClient>,
    ) -> Result<Vec<Self>, SyncError> {
        let dir = &config.conf_dir;
        let entries = std::fs::read_dir(dir).map_err(|err| io_err(dir, err))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_err(dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .iter()
            .map(|path| Self::load(path, config.clone(), client.clone()))
            .collect()
    }

    /// Opaque cursor of the last observed backend change; `0` before the
    /// first watch round.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Absolute keys this resource watches: `prefix` + key, run through
    /// the configured adjuster.
    pub fn abs_keys(&self) -> Vec<String> {
        append_prefix(&self.prefix, &self.keys)
            .into_iter()
            .map(|key| self.config.hooks.adjust_abs_key(key))
            .collect()
    }

    /// Block until the backend reports a change under this resource's
    /// prefix, recording the new watch index.
    pub async fn watch(&mut self, stop: &mut broadcast::Receiver<()>) -> Result<(), SyncError> {
        let keys = self.abs_keys();
        let index = self
            .client
            .watch_prefix(&self.prefix, &keys, self.last_index, stop)
            .await?;
        self.last_index = index;
        Ok(())
    }

    /// Run the full render pipeline once.
    pub async fn process(&mut self) -> Result<(), SyncError> {
        self.set_file_mode()?;
        self.set_vars().await?;
        let result = self.render_and_sync().await;
        self.cleanup_stage(result.is_err());
        result
    }

    async fn render_and_sync(&mut self) -> Result<(), SyncError> {
        let stage = self.create_stage_file()?;
        self.sync(&stage).await
    }

    /// Resolve the destination file mode: explicit descriptor mode, the
    /// existing destination's mode, or `0644`.
    fn set_file_mode(&mut self) -> Result<(), SyncError> {
        match &self.mode {
            Some(mode) => self.file_mode = parse_file_mode(mode)?,
            None => match std::fs::metadata(&self.dest) {
                Ok(meta) => self.file_mode = file_mode_of(&meta),
                Err(err) if err.kind() == ErrorKind::NotFound => self.file_mode = 0o644,
                Err(err) => return Err(io_err(&self.dest, err)),
            },
        }
        Ok(())
    }

    /// Pull the watched keys and rebuild the snapshot under prefix-relative
    /// names.
    async fn set_vars(&mut self) -> Result<(), SyncError> {
        tracing::debug!(resource = %self.name, prefix = %self.prefix, "retrieving keys from store");
        let keys = append_prefix(&self.prefix, &self.keys);
        let values = self.client.get_values(&keys).await?;
        tracing::debug!(resource = %self.name, count = values.len(), "got values from store");

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.purge();
        for (key, value) in values {
            let relative = key.strip_prefix(&self.prefix).unwrap_or(&key);
            store.set(relative, value);
        }
        Ok(())
    }

    /// Render the template into a fresh stage file in the destination
    /// directory, with the destination's mode and ownership already
    /// applied.
    fn create_stage_file(&mut self) -> Result<PathBuf, SyncError> {
        tracing::debug!(resource = %self.name, src = %self.src.display(), "compiling source template");
        let rendered = self.engine.render_file(&self.src)?;

        let dest_dir = self.dest.parent().ok_or_else(|| {
            io_err(
                &self.dest,
                std::io::Error::new(ErrorKind::InvalidInput, "destination has no parent directory"),
            )
        })?;
        let dest_name = self
            .dest
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("config");

        // Staged in the destination directory so the final rename never
        // crosses a filesystem boundary.
        let staged = tempfile::Builder::new()
            .prefix(&format!(".{dest_name}"))
            .tempfile_in(dest_dir)
            .map_err(|err| io_err(dest_dir, err))?;
        let (mut file, path) = staged
            .keep()
            .map_err(|err| io_err(dest_dir, err.error))?;
        self.stage_path = Some(path.clone());

        file.write_all(rendered.as_bytes())
            .map_err(|err| io_err(&path, err))?;

        // Mode and ownership go on now so the comparison sees the final
        // file identity. chown requires privilege; a refusal is not fatal.
        apply_file_mode(&path, self.file_mode).map_err(|err| io_err(&path, err))?;
        apply_owner(&path, self.uid, self.gid);
        Ok(path)
    }

    /// Compare the staged file with the destination and publish if they
    /// differ.
    async fn sync(&mut self, stage: &Path) -> Result<(), SyncError> {
        tracing::debug!(resource = %self.name, dest = %self.dest.display(), "comparing candidate config");
        let in_sync = same_config(stage, &self.dest)?;

        if self.config.noop {
            tracing::warn!(
                "Noop mode enabled. {} will not be modified",
                self.dest.display()
            );
            return Ok(());
        }

        if in_sync {
            tracing::debug!(resource = %self.name, dest = %self.dest.display(), "target config in sync");
            return Ok(());
        }

        tracing::info!(resource = %self.name, dest = %self.dest.display(), "target config out of sync");

        if !self.config.sync_only {
            if let Some(cmd) = self.check_cmd.clone() {
                self.check(&cmd, stage).await?;
            }
        }

        if let Err(err) = std::fs::rename(stage, &self.dest) {
            if !is_resource_busy(&err) {
                return Err(io_err(&self.dest, err));
            }
            // Rename fails with EBUSY when the destination is a bind
            // mount; write through the destination inode instead.
            tracing::debug!(
                resource = %self.name,
                dest = %self.dest.display(),
                "rename failed, destination is likely a mount; writing instead"
            );
            let contents = std::fs::read(stage).map_err(|err| io_err(stage, err))?;
            std::fs::write(&self.dest, contents).map_err(|err| io_err(&self.dest, err))?;
            apply_file_mode(&self.dest, self.file_mode).map_err(|err| io_err(&self.dest, err))?;
            apply_owner(&self.dest, self.uid, self.gid);
        }

        if !self.config.sync_only {
            if let Some(cmd) = self.reload_cmd.clone() {
                self.reload(&cmd).await?;
            }
        }

        tracing::info!(resource = %self.name, dest = %self.dest.display(), "target config has been updated");
        Ok(())
    }

    /// Validate the staged file: render `check_cmd` over the stage path
    /// and run it through the before/after hooks.
    async fn check(&self, cmd: &str, stage: &Path) -> Result<(), SyncError> {
        let rendered = TemplateEngine::render_command(cmd, stage)?;
        let hooks = &self.config.hooks;

        hooks.fire_before_check(&self.name, &rendered);
        match command::run_command(&rendered).await {
            Ok(_) => {
                hooks.fire_after_check(&self.name, &rendered, None);
                Ok(())
            }
            Err(err) => {
                hooks.fire_after_check(&self.name, &rendered, Some(&err));
                Err(SyncError::CheckFailed(err))
            }
        }
    }

    async fn reload(&self, cmd: &str) -> Result<(), SyncError> {
        let hooks = &self.config.hooks;

        hooks.fire_before_reload(&self.name, cmd);
        match command::run_command(cmd).await {
            Ok(_) => {
                hooks.fire_after_reload(&self.name, cmd, None);
                Ok(())
            }
            Err(err) => {
                hooks.fire_after_reload(&self.name, cmd, Some(&err));
                Err(SyncError::ReloadFailed(err))
            }
        }
    }

    /// Remove the stage file: always on failure, on success unless
    /// `keep_stage_file`.
    fn cleanup_stage(&mut self, failed: bool) {
        if let Some(stage) = self.stage_path.take() {
            if failed || !self.config.keep_stage_file {
                let _ = std::fs::remove_file(&stage);
            } else if stage.exists() {
                tracing::info!(stage = %stage.display(), "keeping staged file");
            }
        }
    }
}

/// Byte equality of `stage` and `dest`; a missing destination always
/// differs.
fn same_config(stage: &Path, dest: &Path) -> Result<bool, SyncError> {
    let staged = std::fs::read(stage).map_err(|err| io_err(stage, err))?;
    match std::fs::read(dest) {
        Ok(existing) => Ok(existing == staged),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(dest, err)),
    }
}

// ---------------------------------------------------------------------------
// Platform helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn effective_ids() -> (u32, u32) {
    (
        nix::unistd::geteuid().as_raw(),
        nix::unistd::getegid().as_raw(),
    )
}

#[cfg(not(unix))]
fn effective_ids() -> (u32, u32) {
    (0, 0)
}

#[cfg(unix)]
fn file_mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode_of(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn apply_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn apply_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn apply_owner(path: &Path, uid: u32, gid: u32) {
    use nix::unistd::{chown, Gid, Uid};
    if let Err(err) = chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
        tracing::debug!(path = %path.display(), %err, "chown skipped");
    }
}

#[cfg(not(unix))]
fn apply_owner(_path: &Path, _uid: u32, _gid: u32) {}

#[cfg(unix)]
fn is_resource_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::EBUSY)
}

#[cfg(not(unix))]
fn is_resource_busy(_err: &std::io::Error) -> bool {
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
