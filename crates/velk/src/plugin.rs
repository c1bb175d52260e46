//! Plugin model and registry: lifecycle, dependency checking, and the
//! shared-library entry point.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::interface::{interface_ptr_cast, Interface, InterfaceId};
use crate::memory::SharedPtr;
use crate::runtime::{UpdateInfo, Velk};
use crate::util::lock;
use crate::{format_version, ReturnValue, Uid};

/// Shared pointer to a plugin.
pub type PluginPtr = SharedPtr<dyn Plugin>;

/// A dependency declared by a plugin.
#[derive(Clone, Copy, Debug)]
pub struct PluginDep {
    /// UID of the required plugin.
    pub uid: Uid,
    /// Minimum acceptable packed version; 0 accepts any.
    pub min_version: u32,
}

/// Configuration a plugin fills in during `initialize`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PluginConfig {
    /// Receive `update` notifications each tick.
    pub enable_update: bool,
    /// Keep this plugin's registered types when it unloads.
    pub retain_types_on_unload: bool,
}

/// A loadable feature module.
pub trait Plugin: Interface {
    /// Packed plugin version (see [`crate::pack_version`]).
    fn version(&self) -> u32;

    /// Plugins that must be loaded before this one.
    fn dependencies(&self) -> &[PluginDep];

    /// Called once after the plugin is inserted into the registry. A
    /// failure removes the plugin again.
    fn initialize(&self, velk: &Velk, config: &mut PluginConfig) -> ReturnValue;

    /// Called when the plugin is unloaded.
    fn shutdown(&self, velk: &Velk) -> ReturnValue;

    /// Tick notification; only delivered after opting in through
    /// [`PluginConfig::enable_update`].
    fn update(&self, info: &UpdateInfo) {
        let _ = info;
    }
}

impl InterfaceId for dyn Plugin {
    const UID: Uid = Uid::parse("6f3c1b8e-4dd5-49c9-9a0f-19f64b5bd601");
    const NAME: &'static str = "IPlugin";
}

/// Static plugin descriptor exported by a plugin shared library.
///
/// `factory` creates the plugin object without the loader knowing its
/// concrete type; `uid` must match the created object's class UID so
/// duplicate and dependency checks can run before instantiation.
#[derive(Debug)]
pub struct PluginInfo {
    /// Class UID of the plugin.
    pub uid: Uid,
    /// Plugin name.
    pub name: &'static str,
    /// Packed plugin version.
    pub version: u32,
    /// Dependency declarations.
    pub dependencies: &'static [PluginDep],
    /// Creates the plugin instance.
    pub factory: fn() -> Option<SharedPtr<dyn Interface>>,
}

/// Signature of the `velk_plugin_info` symbol exported by plugin
/// libraries.
pub type PluginInfoFn = unsafe extern "C" fn() -> *const PluginInfo;

/// Exports the `velk_plugin_info` entry point for a plugin shared
/// library. Takes the path of a `static PluginInfo`.
#[macro_export]
macro_rules! plugin_entry {
    ($info:path) => {
        #[no_mangle]
        pub extern "C" fn velk_plugin_info() -> *const $crate::PluginInfo {
            &$info
        }
    };
}

/// Internal failure cases of the dynamic loader, folded into
/// [`ReturnValue::Fail`] at the registry boundary.
#[derive(Debug, Error)]
enum PluginLoadError {
    #[error("failed to open library {path}: {source}")]
    Open {
        path: String,
        source: libloading::Error,
    },
    #[error("library {path} does not export velk_plugin_info")]
    MissingEntryPoint {
        path: String,
        source: libloading::Error,
    },
    #[error("factory of plugin '{name}' returned no instance")]
    FactoryFailed { name: &'static str },
}

struct PluginEntry {
    uid: Uid,
    plugin: PluginPtr,
    /// Present when the plugin came from a shared library; closed after
    /// the plugin object is gone, because its vtable lives in the library.
    library: Option<libloading::Library>,
    config: PluginConfig,
}

/// Registry of loaded plugins, sorted by UID.
pub struct PluginRegistry {
    plugins: Mutex<Vec<PluginEntry>>,
    update_list: Mutex<Vec<PluginPtr>>,
}

impl PluginRegistry {
    pub(crate) fn new() -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            update_list: Mutex::new(Vec::new()),
        }
    }

    fn check_dependencies(
        &self,
        name: &str,
        dependencies: &[PluginDep],
    ) -> ReturnValue {
        let plugins = lock(&self.plugins);
        for dep in dependencies {
            let Some(entry) = plugins.iter().find(|e| e.uid == dep.uid) else {
                log::error!("Plugin '{}' has unmet dependency: {}", name, dep.uid);
                return ReturnValue::Fail;
            };
            if dep.min_version != 0 && entry.plugin.version() < dep.min_version {
                log::error!(
                    "Plugin '{}' requires version {} of {}, got {}",
                    name,
                    format_version(dep.min_version),
                    dep.uid,
                    format_version(entry.plugin.version())
                );
                return ReturnValue::Fail;
            }
        }
        ReturnValue::Success
    }

    /// Loads an in-process plugin instance.
    pub(crate) fn load_plugin(&self, velk: &Velk, plugin: PluginPtr) -> ReturnValue {
        let uid = (*plugin).as_interface().class_uid();
        let name = (*plugin).as_interface().class_name();
        {
            let plugins = lock(&self.plugins);
            if plugins.iter().any(|e| e.uid == uid) {
                return ReturnValue::NothingToDo;
            }
        }
        let deps: Vec<PluginDep> = plugin.dependencies().to_vec();
        let rv = self.check_dependencies(name, &deps);
        if rv.failed() {
            return rv;
        }
        {
            let mut plugins = lock(&self.plugins);
            let index = plugins
                .binary_search_by(|e| e.uid.cmp(&uid))
                .unwrap_or_else(|i| i);
            plugins.insert(
                index,
                PluginEntry {
                    uid,
                    plugin: plugin.clone(),
                    library: None,
                    config: PluginConfig::default(),
                },
            );
        }

        // Stamp registrations made during initialize with the plugin's UID
        // so they can be swept on unload.
        let mut config = PluginConfig::default();
        velk.type_registry().set_owner(uid);
        let rv = plugin.initialize(velk, &mut config);
        velk.type_registry().set_owner(Uid::NIL);

        let mut plugins = lock(&self.plugins);
        let Ok(index) = plugins.binary_search_by(|e| e.uid.cmp(&uid)) else {
            return ReturnValue::Fail;
        };
        if rv.failed() {
            log::error!("Plugin '{name}' failed to initialize: {rv}");
            plugins.remove(index);
            return rv;
        }
        plugins[index].config = config;
        drop(plugins);

        if config.enable_update {
            lock(&self.update_list).push(plugin);
        }
        ReturnValue::Success
    }

    /// Loads a plugin from a shared library exporting `velk_plugin_info`.
    pub(crate) fn load_plugin_from_path(&self, velk: &Velk, path: &str) -> ReturnValue {
        if path.is_empty() {
            return ReturnValue::InvalidArgument;
        }
        match self.try_load_from_path(velk, path) {
            Ok(rv) => rv,
            Err(err) => {
                log::error!("{err}");
                ReturnValue::Fail
            }
        }
    }

    fn try_load_from_path(
        &self,
        velk: &Velk,
        path: &str,
    ) -> Result<ReturnValue, PluginLoadError> {
        // SAFETY: loading a plugin library runs its initialisers; the
        // entry-point contract in `plugin_entry!` is the trusted surface.
        let library = unsafe {
            libloading::Library::new(path).map_err(|source| PluginLoadError::Open {
                path: path.to_owned(),
                source,
            })?
        };
        let info: &PluginInfo = unsafe {
            let entry = library
                .get::<PluginInfoFn>(b"velk_plugin_info\0")
                .map_err(|source| PluginLoadError::MissingEntryPoint {
                    path: path.to_owned(),
                    source,
                })?;
            &*entry()
        };

        // Duplicate and dependency checks before instantiating anything.
        {
            let plugins = lock(&self.plugins);
            if plugins.iter().any(|e| e.uid == info.uid) {
                return Ok(ReturnValue::NothingToDo);
            }
        }
        let rv = self.check_dependencies(info.name, info.dependencies);
        if rv.failed() {
            return Ok(rv);
        }

        let instance = (info.factory)()
            .ok_or(PluginLoadError::FactoryFailed { name: info.name })?;
        let plugin = interface_ptr_cast::<dyn Plugin, _>(&instance)
            .ok_or(PluginLoadError::FactoryFailed { name: info.name })?;

        let uid = info.uid;
        let rv = self.load_plugin(velk, plugin);
        if rv.succeeded() {
            let mut plugins = lock(&self.plugins);
            if let Ok(index) = plugins.binary_search_by(|e| e.uid.cmp(&uid)) {
                plugins[index].library = Some(library);
            }
        }
        Ok(rv)
    }

    /// Unloads a plugin, rejecting while other loaded plugins depend on
    /// it. Types it registered are swept unless it opted to retain them.
    pub(crate) fn unload_plugin(&self, velk: &Velk, uid: Uid) -> ReturnValue {
        let (plugin, config) = {
            let plugins = lock(&self.plugins);
            let Some(entry) = plugins.iter().find(|e| e.uid == uid) else {
                return ReturnValue::InvalidArgument;
            };
            for other in plugins.iter().filter(|e| e.uid != uid) {
                if other.plugin.dependencies().iter().any(|d| d.uid == uid) {
                    log::error!(
                        "Cannot unload plugin '{}': plugin '{}' depends on it",
                        (*entry.plugin).as_interface().class_name(),
                        (*other.plugin).as_interface().class_name()
                    );
                    return ReturnValue::Fail;
                }
            }
            (entry.plugin.clone(), entry.config)
        };

        plugin.shutdown(velk);
        lock(&self.update_list).retain(|p| !SharedPtr::ptr_eq(p, &plugin));
        if !config.retain_types_on_unload {
            velk.type_registry().sweep_owner(uid);
        }

        // Take the entry out, drop the plugin pointer, then close the
        // library. Order matters: the plugin's vtable lives in the library.
        let library = {
            let mut plugins = lock(&self.plugins);
            match plugins.binary_search_by(|e| e.uid.cmp(&uid)) {
                Ok(index) => {
                    let entry = plugins.remove(index);
                    entry.library
                }
                Err(_) => None,
            }
        };
        drop(plugin);
        drop(library);
        ReturnValue::Success
    }

    /// The loaded plugin registered under `uid`.
    pub fn find_plugin(&self, uid: Uid) -> Option<PluginPtr> {
        let plugins = lock(&self.plugins);
        plugins
            .iter()
            .find(|e| e.uid == uid)
            .map(|e| e.plugin.clone())
    }

    /// Number of loaded plugins.
    pub fn plugin_count(&self) -> usize {
        lock(&self.plugins).len()
    }

    /// Unloads every plugin in reverse insertion order, so dependents shut
    /// down before their dependencies.
    pub(crate) fn shutdown_all(&self, velk: &Velk) {
        lock(&self.update_list).clear();
        loop {
            let entry = {
                let mut plugins = lock(&self.plugins);
                match plugins.pop() {
                    Some(entry) => entry,
                    None => break,
                }
            };
            entry.plugin.shutdown(velk);
            if !entry.config.retain_types_on_unload {
                velk.type_registry().sweep_owner(entry.uid);
            }
            let library = entry.library;
            drop(entry.plugin);
            drop(library);
        }
    }

    /// Delivers the tick notification to opted-in plugins.
    pub(crate) fn notify_plugins(&self, info: &UpdateInfo) {
        let plugins = lock(&self.update_list).clone();
        for plugin in &plugins {
            plugin.update(info);
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_count())
            .finish()
    }
}
