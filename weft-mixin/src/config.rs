//! Mixin config documents and the config registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::env::{Environment, Phase, Side};
use crate::error::{ErrorAction, ErrorHandler, Result, TransformError};
use crate::info::{ClassInfoCache, ClassSource};
use crate::mixin::MixinInfo;
use crate::refmap::RefMap;

/// Host-supplied companion invoked around config lifecycle events.
///
/// Plugins are registered on the transformer by class name; a config names
/// its plugin in the `plugin` field.
pub trait MixinConfigPlugin: Send + Sync {
    /// Called once when the owning config is prepared.
    fn on_load(&self, mixin_package: &str) {
        let _ = mixin_package;
    }

    /// Veto hook consulted before each mixin/target application.
    fn should_apply(&self, target: &str, mixin: &str) -> bool {
        let _ = (target, mixin);
        true
    }

    /// Cross-config veto hook; receives this config's targets and the union
    /// of every other config's targets.
    fn accept_targets(&self, own: &[String], others: &[String]) {
        let _ = (own, others);
    }
}

fn default_priority() -> i32 {
    1000
}

#[derive(Debug, Deserialize)]
struct ConfigDoc {
    package: String,
    #[serde(default)]
    mixins: Vec<String>,
    #[serde(default)]
    client: Vec<String>,
    #[serde(default)]
    server: Vec<String>,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default, rename = "minVersion")]
    min_version: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    refmap: Option<String>,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    token: HashMap<String, i64>,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

/// One parsed config document plus its prepared mixins.
pub struct MixinConfig {
    /// Resource name the document was loaded from.
    pub name: String,
    /// Package every declared mixin lives under, dotted form.
    pub package: String,
    /// Default priority for the config's mixins.
    pub priority: i32,
    /// Phase the config becomes eligible in.
    pub phase: Phase,
    /// Flag whether any failure in this config aborts the load.
    pub required: bool,
    /// Flag whether expectation failures escalate.
    pub verbose: bool,
    /// Engine version floor declared by the document.
    pub min_version: Option<String>,
    /// Resource name of the reference map.
    pub refmap_name: Option<String>,
    /// The loaded reference map; empty when none was declared or found.
    pub refmap: Arc<RefMap>,
    /// Context bucket consulted first during refmap lookups; set by the
    /// host for obfuscated runtime environments.
    pub refmap_context: Option<String>,
    /// Plugin class name, resolved against the transformer's plugin table.
    pub plugin: Option<String>,
    /// Named integer tokens exposed to point argument parsing.
    pub tokens: HashMap<String, i64>,
    /// Registration ordinal; the stable config id used for sorting.
    pub ordinal: usize,
    declared: Vec<(String, Side)>,
    mixins: Vec<Arc<MixinInfo>>,
    prepared: bool,
}

impl MixinConfig {
    /// Parse a JSON config document. Unknown fields warn and are ignored.
    pub fn parse(name: &str, json: &str) -> Result<Self> {
        let doc: ConfigDoc =
            serde_json::from_str(json).map_err(|e| TransformError::BadConfig {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        for key in doc.unknown.keys() {
            warn!(config = name, field = key.as_str(), "ignoring unknown config field");
        }
        let phase = match doc.phase.as_deref() {
            Some(raw) => Phase::parse(raw).ok_or_else(|| TransformError::BadConfig {
                name: name.to_string(),
                reason: format!("unknown phase {raw:?}"),
            })?,
            None => Phase::Default,
        };
        let mut declared: Vec<(String, Side)> = Vec::new();
        declared.extend(doc.mixins.into_iter().map(|m| (m, Side::Both)));
        declared.extend(doc.client.into_iter().map(|m| (m, Side::Client)));
        declared.extend(doc.server.into_iter().map(|m| (m, Side::Server)));
        Ok(Self {
            name: name.to_string(),
            package: doc.package,
            priority: doc.priority,
            phase,
            required: doc.required,
            verbose: doc.verbose,
            min_version: doc.min_version,
            refmap_name: doc.refmap,
            refmap: Arc::new(RefMap::new()),
            refmap_context: None,
            plugin: doc.plugin,
            tokens: doc.token,
            ordinal: 0,
            declared,
            mixins: Vec::new(),
            prepared: false,
        })
    }

    /// Slashed form of the mixin package prefix.
    pub fn package_path(&self) -> String {
        self.package.replace('.', "/")
    }

    /// Resolve a declared name, possibly dotted into a subpackage, to an
    /// internal class name.
    fn resolve_name(&self, simple: &str) -> String {
        format!("{}/{}", self.package_path(), simple.replace('.', "/"))
    }

    /// Flag whether `class_name` (internal form) lives inside this config's
    /// package.
    pub fn owns_class(&self, class_name: &str) -> bool {
        class_name.starts_with(&format!("{}/", self.package_path()))
    }

    /// The prepared mixins.
    pub fn mixins(&self) -> &[Arc<MixinInfo>] {
        &self.mixins
    }

    /// Union of all prepared mixins' targets.
    pub fn targets(&self) -> HashSet<String> {
        self.mixins
            .iter()
            .flat_map(|m| m.targets.iter().cloned())
            .collect()
    }

    /// Resolve declared mixin classes into [`MixinInfo`]s.
    ///
    /// A failing mixin aborts the whole config only when the config is
    /// `required`; otherwise the error-handler chain decides between
    /// ignoring and escalating, defaulting to a warning.
    pub(crate) fn prepare(
        &mut self,
        env: &Environment,
        source: &dyn ClassSource,
        cache: &mut ClassInfoCache,
        handlers: &[Box<dyn ErrorHandler>],
    ) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.prepared = true;
        debug!(config = self.name.as_str(), phase = %self.phase, "preparing config");
        for (simple, side) in self.declared.clone() {
            if !env.side.accepts(side) {
                continue;
            }
            let class_name = self.resolve_name(&simple);
            match self.prepare_mixin(&class_name, source, cache) {
                Ok(info) => self.mixins.push(Arc::new(info)),
                Err(error) => {
                    if self.required || escalate(handlers, &self.name, &error) {
                        return Err(error);
                    }
                    warn!(
                        config = self.name.as_str(),
                        mixin = class_name.as_str(),
                        %error,
                        "skipping mixin that failed to prepare"
                    );
                }
            }
        }
        Ok(())
    }

    fn prepare_mixin(
        &self,
        class_name: &str,
        source: &dyn ClassSource,
        cache: &mut ClassInfoCache,
    ) -> Result<MixinInfo> {
        let bytes = source.class_bytes(class_name).ok_or_else(|| {
            TransformError::prepare(class_name, "class bytes not available")
        })?;
        MixinInfo::parse(self, class_name, &bytes, cache, source)
    }
}

fn escalate(handlers: &[Box<dyn ErrorHandler>], config: &str, error: &TransformError) -> bool {
    let mut action = ErrorAction::Warn;
    for handler in handlers {
        match handler.on_prepare_error(config, error) {
            ErrorAction::Error => action = ErrorAction::Error,
            ErrorAction::Ignore if action == ErrorAction::Warn => action = ErrorAction::Ignore,
            _ => {}
        }
    }
    action == ErrorAction::Error
}

/// The set of registered configs and the target index derived from them.
#[derive(Default)]
pub(crate) struct Registry {
    configs: Vec<MixinConfig>,
    pending: Vec<MixinConfig>,
    by_target: HashMap<String, Vec<Arc<MixinInfo>>>,
    next_ordinal: usize,
}

impl Registry {
    pub(crate) fn add(&mut self, mut config: MixinConfig) {
        config.ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.pending.push(config);
    }

    /// Move configs whose phase has arrived out of `pending`, prepare them,
    /// and rebuild the target index.
    pub(crate) fn select(
        &mut self,
        env: &Environment,
        source: &dyn ClassSource,
        cache: &mut ClassInfoCache,
        handlers: &[Box<dyn ErrorHandler>],
    ) -> Result<()> {
        if !self.pending.iter().any(|c| c.phase <= env.phase) {
            return Ok(());
        }
        let (ready, pending): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|c| c.phase <= env.phase);
        self.pending = pending;
        for mut config in ready {
            config.prepare(env, source, cache, handlers)?;
            self.configs.push(config);
        }
        self.configs.sort_by_key(|c| (c.priority, c.ordinal));
        self.rebuild_index();
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.by_target.clear();
        for config in &self.configs {
            for mixin in &config.mixins {
                for target in &mixin.targets {
                    self.by_target
                        .entry(target.clone())
                        .or_default()
                        .push(Arc::clone(mixin));
                }
            }
        }
        for mixins in self.by_target.values_mut() {
            let sorted: Vec<_> = mixins
                .iter()
                .cloned()
                .sorted_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then(a.config_ordinal.cmp(&b.config_ordinal))
                        .then(a.name.cmp(&b.name))
                })
                .collect();
            *mixins = sorted;
        }
    }

    /// Mixins for a target, already in application order.
    pub(crate) fn mixins_for(&self, target: &str) -> Vec<Arc<MixinInfo>> {
        self.by_target.get(target).cloned().unwrap_or_default()
    }

    /// Every target any prepared mixin declares.
    pub(crate) fn all_targets(&self) -> HashSet<String> {
        self.by_target.keys().cloned().collect()
    }

    pub(crate) fn configs(&self) -> &[MixinConfig] {
        &self.configs
    }

    /// Mutable access to a config by resource name, selected or pending.
    pub(crate) fn config_mut(&mut self, name: &str) -> Option<&mut MixinConfig> {
        self.configs
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|c| c.name == name)
    }

    /// Flag whether `class_name` lives inside any config's mixin package.
    pub(crate) fn is_mixin_class(&self, class_name: &str) -> bool {
        self.configs
            .iter()
            .chain(self.pending.iter())
            .any(|c| c.owns_class(class_name))
    }

    /// Slashed package prefixes of every config, pending included.
    pub(crate) fn package_paths(&self) -> Vec<String> {
        self.configs
            .iter()
            .chain(self.pending.iter())
            .map(|c| c.package_path())
            .collect()
    }

    /// Re-parse one mixin class from fresh bytes; returns the targets that
    /// must be re-transformed.
    pub(crate) fn reload_mixin(
        &mut self,
        class_name: &str,
        bytes: &[u8],
        source: &dyn ClassSource,
        cache: &mut ClassInfoCache,
    ) -> Result<Vec<String>> {
        let found = self.configs.iter().enumerate().find_map(|(ci, config)| {
            config
                .mixins
                .iter()
                .position(|m| m.name == class_name)
                .map(|mi| (ci, mi))
        });
        let Some((ci, mi)) = found else {
            return Err(TransformError::prepare(class_name, "not a registered mixin"));
        };
        let fresh = MixinInfo::parse(&self.configs[ci], class_name, bytes, cache, source)?;
        if fresh.targets != self.configs[ci].mixins[mi].targets {
            return Err(TransformError::prepare(
                class_name,
                "hot-swapped mixin may not change its target set",
            ));
        }
        let targets = fresh.targets.clone();
        self.configs[ci].mixins[mi] = Arc::new(fresh);
        self.rebuild_index();
        Ok(targets)
    }
}
