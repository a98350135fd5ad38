//! Loaded extensions and plugin registries
//!
//! Extensions are unloaded in reverse registration order. Each may carry a
//! terminate hook that runs before its library is unloaded. Plugins
//! (collators, compressors, data sources, encryptors, extractors) are
//! released one kind at a time during shutdown; a failing plugin does not
//! stop the others.

use strata_core::{FirstError, StrataError, StrataResult};
use tracing::warn;

use crate::session::Session;
use crate::shared::ConnectionShared;

/// Terminate hook run before an extension is unloaded.
pub trait Terminate: Send {
    /// Release whatever the extension registered with the connection.
    fn terminate(&mut self, conn: &ConnectionShared) -> StrataResult<()>;
}

/// The loaded code of an extension.
pub trait Unload: Send {
    /// Unload the library.
    fn unload(self: Box<Self>) -> StrataResult<()>;
}

/// One registered extension.
pub struct LoadedExtension {
    name: String,
    terminate: Option<Box<dyn Terminate>>,
    library: Box<dyn Unload>,
}

impl LoadedExtension {
    /// An extension without a terminate hook.
    pub fn new(name: impl Into<String>, library: Box<dyn Unload>) -> Self {
        Self {
            name: name.into(),
            terminate: None,
            library,
        }
    }

    /// Attach a terminate hook.
    pub fn with_terminate(mut self, terminate: Box<dyn Terminate>) -> Self {
        self.terminate = Some(terminate);
        self
    }

    /// Extension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the terminate hook, if any, then unload.
    ///
    /// Unload runs even when terminate fails; the first error is returned.
    pub fn shutdown(self, conn: &ConnectionShared) -> StrataResult<()> {
        let mut first = FirstError::new();
        if let Some(mut hook) = self.terminate {
            first.record("extension terminate", hook.terminate(conn));
        }
        first.record("extension unload", self.library.unload());
        first.into_result()
    }
}

/// Extensions in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    loaded: Vec<LoadedExtension>,
}

impl ExtensionRegistry {
    /// Register an extension.
    pub fn push(&mut self, ext: LoadedExtension) {
        self.loaded.push(ext);
    }

    /// Remove the most recently registered extension.
    pub fn pop(&mut self) -> Option<LoadedExtension> {
        self.loaded.pop()
    }

    /// Number of loaded extensions.
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// True if nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.loaded.iter().map(|e| e.name()).collect()
    }
}

/// Kinds of plugin a connection can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Key ordering
    Collator,
    /// Block compression
    Compressor,
    /// Custom data source
    DataSource,
    /// Block encryption
    Encryptor,
    /// Index key extraction
    Extractor,
}

impl PluginKind {
    /// Order in which shutdown releases plugin kinds.
    pub const TEARDOWN_ORDER: [PluginKind; 5] = [
        PluginKind::Collator,
        PluginKind::Compressor,
        PluginKind::DataSource,
        PluginKind::Encryptor,
        PluginKind::Extractor,
    ];

    /// Name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Collator => "collator",
            PluginKind::Compressor => "compressor",
            PluginKind::DataSource => "data source",
            PluginKind::Encryptor => "encryptor",
            PluginKind::Extractor => "extractor",
        }
    }
}

/// A registered plugin.
pub trait Plugin: Send {
    /// Release the plugin's resources.
    fn terminate(&mut self, _session: &Session) -> StrataResult<()> {
        Ok(())
    }
}

struct RegisteredPlugin {
    kind: PluginKind,
    name: String,
    plugin: Box<dyn Plugin>,
}

/// Plugins of every kind, in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<RegisteredPlugin>,
}

impl PluginRegistry {
    /// Register `plugin` under `name`. Names are unique per kind.
    pub fn add(
        &mut self,
        kind: PluginKind,
        name: impl Into<String>,
        plugin: Box<dyn Plugin>,
    ) -> StrataResult<()> {
        let name = name.into();
        if self.entries.iter().any(|e| e.kind == kind && e.name == name) {
            return Err(StrataError::config(format!(
                "{} '{}' is already registered",
                kind.as_str(),
                name
            )));
        }
        self.entries.push(RegisteredPlugin { kind, name, plugin });
        Ok(())
    }

    /// Plugins registered of `kind`.
    pub fn count(&self, kind: PluginKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Terminate and drop every plugin of `kind`.
    ///
    /// Each plugin is terminated regardless of earlier failures; the first
    /// error is returned.
    pub fn remove_kind(&mut self, kind: PluginKind, session: &Session) -> StrataResult<()> {
        let (matching, rest): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.kind == kind);
        self.entries = rest;

        let mut first = FirstError::new();
        for mut entry in matching {
            first.record_with(
                kind.as_str(),
                entry.plugin.terminate(session),
                |step, e| {
                    warn!(target: "strata::conn", plugin = %entry.name, kind = step, error = %e, "Plugin terminate failed");
                },
            );
        }
        first.into_result()
    }
}
