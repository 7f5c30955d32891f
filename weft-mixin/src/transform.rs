//! Transformer driver: the classloader-facing entry point.
//!
//! One [`Transformer`] is attached per host process. All shared state (the
//! config registry, the class-info cache, the profiler, registered
//! collaborators) lives behind a single coarse lock; per-call state is a
//! [`TargetClassContext`] local to the `transform` invocation. Re-entrance
//! is tracked per thread: pass-through loads may nest freely, applying
//! mixins may not.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use weft_asm::classfile::{decode, encode, ClassNode};

use crate::apply;
use crate::config::{MixinConfig, MixinConfigPlugin, Registry};
use crate::context::TargetClassContext;
use crate::env::{Environment, Phase, Side};
use crate::error::{ErrorHandler, Result, TransformError};
use crate::inject::{GroupCounters, InjectionInfo};
use crate::info::{ClassInfo, ClassInfoCache, ClassSource};
use crate::mixin::MixinInfo;
use crate::point::InjectionPointStrategy;
use crate::profiler::Profiler;
use crate::refmap::RefMap;

/// Engine tunables, fixed at construction.
#[derive(Debug, Clone)]
pub struct TransformerOptions {
    /// Write post-application class bytes to [`Self::export_dir`].
    pub debug_export: bool,
    /// Debug-export directory.
    pub export_dir: PathBuf,
    /// Escalate `expect` shortfalls instead of warning.
    pub debug_injectors: bool,
    /// Allow [`Transformer::hot_swap`].
    pub hot_swap: bool,
}

impl Default for TransformerOptions {
    fn default() -> Self {
        Self {
            debug_export: false,
            export_dir: PathBuf::from(".weft.out/class"),
            debug_injectors: false,
            hot_swap: false,
        }
    }
}

/// Host hook invoked around the application of mixins to each target.
pub trait Extension: Send + Sync {
    /// Called after decode, before any mixin is merged.
    fn pre_apply(&self, ctx: &mut TargetClassContext) {
        let _ = ctx;
    }

    /// Called after all injections, before encoding.
    fn post_apply(&self, ctx: &mut TargetClassContext) {
        let _ = ctx;
    }
}

/// Host hook producing synthetic classes when the loader requests unknown
/// names with no bytes.
pub trait ClassGenerator: Send + Sync {
    /// The synthesized tree, if this generator owns the name.
    fn generate(&self, name: &str) -> Option<ClassNode>;
}

/// Optional decompiler invoked on debug-exported classes.
pub trait Decompiler: Send + Sync {
    /// Called with the exported class name and bytes.
    fn decompile(&self, name: &str, bytes: &[u8]);
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> (Self, usize) {
        let depth = DEPTH.with(|d| {
            d.set(d.get() + 1);
            d.get()
        });
        (Self, depth)
    }

    fn current() -> usize {
        DEPTH.with(Cell::get)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Read-only snapshot of the target index, rebuilt whenever the registry
/// changes.
///
/// Nested same-thread `transform` calls consult only this snapshot: the
/// engine's coarse lock is already held by the outer call, so the
/// re-entrant path must never touch it or the documented pass-through
/// contract would deadlock instead.
#[derive(Default)]
struct TargetIndex {
    /// Slashed mixin-package prefixes of every config, pending included.
    packages: Vec<String>,
    /// Target name to its sorted mixins, each with its resolved plugin.
    mixins: HashMap<String, Vec<(Arc<MixinInfo>, Option<Arc<dyn MixinConfigPlugin>>)>>,
}

struct State {
    registry: Registry,
    cache: ClassInfoCache,
    env: Environment,
    profiler: Profiler,
    /// Every name the loader hook has seen, pass-throughs included.
    seen: HashSet<String>,
    transformed: HashSet<String>,
    generated: HashMap<String, ClassNode>,
    plugins: HashMap<String, Arc<dyn MixinConfigPlugin>>,
    custom_points: HashMap<String, Arc<dyn InjectionPointStrategy>>,
    error_handlers: Vec<Box<dyn ErrorHandler>>,
    extensions: Vec<Box<dyn Extension>>,
    generators: Vec<Box<dyn ClassGenerator>>,
    decompiler: Option<Box<dyn Decompiler>>,
    accepted: HashSet<String>,
}

/// The engine handle.
pub struct Transformer {
    source: Box<dyn ClassSource>,
    options: TransformerOptions,
    session_id: String,
    state: Mutex<State>,
    index: RwLock<TargetIndex>,
}

impl Transformer {
    /// Engine over a class source, with a fresh random session id.
    pub fn new(source: impl ClassSource + 'static, options: TransformerOptions) -> Self {
        let session_id = format!("{:016x}", rand::random::<u64>());
        Self {
            source: Box::new(source),
            options,
            session_id,
            state: Mutex::new(State {
                registry: Registry::default(),
                cache: ClassInfoCache::new(),
                env: Environment::default(),
                profiler: Profiler::new(),
                seen: HashSet::new(),
                transformed: HashSet::new(),
                generated: HashMap::new(),
                plugins: HashMap::new(),
                custom_points: HashMap::new(),
                error_handlers: Vec::new(),
                extensions: Vec::new(),
                generators: Vec::new(),
                decompiler: None,
                accepted: HashSet::new(),
            }),
            index: RwLock::new(TargetIndex::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild the re-entrancy snapshot from the registry. Called with the
    /// state lock held; readers only ever take the snapshot lock, so the
    /// ordering is acyclic.
    fn refresh_index(&self, state: &State) {
        let mut index = TargetIndex {
            packages: state.registry.package_paths(),
            mixins: HashMap::new(),
        };
        for target in state.registry.all_targets() {
            let entries = state
                .registry
                .mixins_for(&target)
                .into_iter()
                .map(|mixin| {
                    let plugin = state
                        .registry
                        .configs()
                        .iter()
                        .find(|c| c.name == mixin.config_name)
                        .and_then(|c| c.plugin.as_ref())
                        .and_then(|n| state.plugins.get(n))
                        .cloned();
                    (mixin, plugin)
                })
                .collect();
            index.mixins.insert(target, entries);
        }
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    /// The per-process session tag stamped into merged members.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register a config document. The config stays pending until its phase
    /// is reached.
    pub fn add_config(&self, name: &str, json: &str) -> Result<()> {
        let config = MixinConfig::parse(name, json)?;
        if let Some(min_version) = &config.min_version {
            if version_newer(min_version, env!("CARGO_PKG_VERSION")) {
                return Err(TransformError::BadConfig {
                    name: name.to_string(),
                    reason: format!(
                        "requires engine {min_version}, this is {}",
                        env!("CARGO_PKG_VERSION")
                    ),
                });
            }
        }
        info!(config = name, package = config.package.as_str(), "registered config");
        let mut state = self.lock();
        state.registry.add(config);
        self.refresh_index(&state);
        Ok(())
    }

    /// Attach a reference-map document to a registered config.
    pub fn add_refmap(&self, config_name: &str, json: &str) -> Result<()> {
        let refmap = Arc::new(RefMap::parse(config_name, json)?);
        let mut state = self.lock();
        let config = state.registry.config_mut(config_name).ok_or_else(|| {
            TransformError::BadConfig {
                name: config_name.to_string(),
                reason: "no such config".to_string(),
            }
        })?;
        config.refmap = refmap;
        Ok(())
    }

    /// Select the refmap context bucket for a registered config.
    pub fn set_refmap_context(&self, config_name: &str, context: &str) -> Result<()> {
        let mut state = self.lock();
        let config = state.registry.config_mut(config_name).ok_or_else(|| {
            TransformError::BadConfig {
                name: config_name.to_string(),
                reason: "no such config".to_string(),
            }
        })?;
        config.refmap_context = Some(context.to_string());
        Ok(())
    }

    /// Register a plugin instance under the class name configs refer to.
    pub fn register_plugin(&self, class_name: &str, plugin: Arc<dyn MixinConfigPlugin>) {
        self.lock().plugins.insert(class_name.to_string(), plugin);
    }

    /// Register a custom injection-point strategy under a dotted at-code.
    pub fn register_injection_point(
        &self,
        id: &str,
        strategy: Arc<dyn InjectionPointStrategy>,
    ) {
        self.lock().custom_points.insert(id.to_string(), strategy);
    }

    /// Register an error handler consulted for non-required mixin failures.
    pub fn register_error_handler(&self, handler: Box<dyn ErrorHandler>) {
        self.lock().error_handlers.push(handler);
    }

    /// Register a pre/post apply extension.
    pub fn register_extension(&self, extension: Box<dyn Extension>) {
        self.lock().extensions.push(extension);
    }

    /// Register a synthetic-class generator.
    pub fn register_generator(&self, generator: Box<dyn ClassGenerator>) {
        self.lock().generators.push(generator);
    }

    /// Install the debug-export decompiler hook.
    pub fn set_decompiler(&self, decompiler: Box<dyn Decompiler>) {
        self.lock().decompiler = Some(decompiler);
    }

    /// Current environment snapshot.
    pub fn environment(&self) -> Environment {
        self.lock().env.clone()
    }

    /// Set the distribution side.
    pub fn set_side(&self, side: Side) {
        self.lock().env.side = side;
    }

    /// Advance the phase: rolls the profiler slice and selects configs that
    /// became eligible.
    pub fn mark_phase(&self, phase: Phase) -> Result<()> {
        let mut state = self.lock();
        info!(%phase, "phase transition");
        state.env.phase = phase;
        state.profiler.mark(&phase.to_string());
        self.select_locked(&mut state)
    }

    fn select_locked(&self, state: &mut State) -> Result<()> {
        let env = state.env.clone();
        let State {
            registry,
            cache,
            error_handlers,
            ..
        } = &mut *state;
        registry.select(&env, &*self.source, cache, error_handlers)?;

        // a target already fed through the hook before its config was
        // prepared can no longer be transformed; the audit reports it
        for target in state.registry.all_targets() {
            if state.seen.contains(&target) && !state.transformed.contains(&target) {
                let error = TransformError::ClassAlreadyLoaded { target };
                warn!(%error, "mixin target escaped transformation");
            }
        }

        // first-selection plugin hooks: on_load, then cross-config veto
        let snapshot: Vec<(String, String, Option<String>, Vec<String>)> = state
            .registry
            .configs()
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    c.package.clone(),
                    c.plugin.clone(),
                    c.targets().into_iter().collect(),
                )
            })
            .collect();
        for (config_name, package, plugin_name, own) in &snapshot {
            if !state.accepted.insert(config_name.clone()) {
                continue;
            }
            let Some(plugin) = plugin_name
                .as_ref()
                .and_then(|n| state.plugins.get(n))
            else {
                continue;
            };
            plugin.on_load(package);
            let others: Vec<String> = snapshot
                .iter()
                .filter(|(other, ..)| other != config_name)
                .flat_map(|(.., targets)| targets.iter().cloned())
                .collect();
            plugin.accept_targets(own, &others);
        }
        self.refresh_index(state);
        Ok(())
    }

    /// The classloader hook: transform `transformed_name` as defined by the
    /// selected configs.
    ///
    /// `None` bytes request a synthetic class from the generator table.
    /// Classes with no matching mixins pass through unchanged, bytewise.
    /// A nested call on the same thread (the host classloader re-entering
    /// the hook while a transformation is in flight) never touches the
    /// engine lock: pass-through still works, applying mixins is a hard
    /// error.
    pub fn transform(
        &self,
        name: &str,
        transformed_name: &str,
        bytes: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let _ = name;
        let Some(bytes) = bytes else {
            return self.generate(transformed_name);
        };

        let (_guard, depth) = DepthGuard::enter();
        if depth > 1 {
            return self.transform_reentrant(transformed_name, bytes, depth);
        }

        let mut state = self.lock();
        self.select_locked(&mut state)?;
        state.seen.insert(transformed_name.to_string());

        if state.registry.is_mixin_class(transformed_name) {
            return Err(TransformError::MixinClassLoaded {
                name: transformed_name.to_string(),
            });
        }

        let mixins = self.selectable_mixins(&state, transformed_name);
        if mixins.is_empty() {
            // pass-through mutates nothing and may nest freely
            return Ok(bytes.to_vec());
        }

        state.profiler.begin("transform");
        let result =
            self.apply_pipeline(&mut state, transformed_name, bytes, mixins);
        state.profiler.end();
        result
    }

    /// Nested call on a thread whose outer `transform` still holds the
    /// engine lock. Decided entirely from the re-entrancy snapshot.
    fn transform_reentrant(&self, name: &str, bytes: &[u8], depth: usize) -> Result<Vec<u8>> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        if index
            .packages
            .iter()
            .any(|package| name.starts_with(&format!("{package}/")))
        {
            return Err(TransformError::MixinClassLoaded {
                name: name.to_string(),
            });
        }
        let matched = index
            .mixins
            .get(name)
            .map(|entries| {
                entries.iter().any(|(mixin, plugin)| match plugin {
                    Some(plugin) => plugin.should_apply(name, &mixin.name),
                    None => true,
                })
            })
            .unwrap_or(false);
        if matched {
            warn!(target = name, depth, "re-entrant class transformation detected");
            return Err(TransformError::ReEntrance {
                target: name.to_string(),
                depth,
            });
        }
        // pass-through mutates nothing and may nest freely
        Ok(bytes.to_vec())
    }

    fn selectable_mixins(&self, state: &State, target: &str) -> Vec<Arc<MixinInfo>> {
        state
            .registry
            .mixins_for(target)
            .into_iter()
            .filter(|mixin| {
                let plugin = state
                    .registry
                    .configs()
                    .iter()
                    .find(|c| c.name == mixin.config_name)
                    .and_then(|c| c.plugin.as_ref())
                    .and_then(|n| state.plugins.get(n));
                match plugin {
                    Some(plugin) => {
                        let keep = plugin.should_apply(target, &mixin.name);
                        if !keep {
                            debug!(
                                mixin = mixin.name.as_str(),
                                target, "plugin vetoed mixin application"
                            );
                        }
                        keep
                    }
                    None => true,
                }
            })
            .collect()
    }

    fn apply_pipeline(
        &self,
        state: &mut State,
        target: &str,
        bytes: &[u8],
        mixins: Vec<Arc<MixinInfo>>,
    ) -> Result<Vec<u8>> {
        debug!(target, mixins = mixins.len(), "transforming");
        let node = decode(bytes)?;
        let mut ctx =
            TargetClassContext::new(target, node, mixins, self.session_id.clone());

        for extension in &state.extensions {
            extension.pre_apply(&mut ctx);
        }

        state.profiler.begin("apply");
        let applied = {
            let State {
                cache,
                error_handlers,
                ..
            } = &mut *state;
            apply::apply_mixins(&mut ctx, cache, &*self.source, error_handlers)
        };
        state.profiler.end();
        applied?;

        state.profiler.begin("inject");
        let injected = Self::run_injections(state, &mut ctx, self.options.debug_injectors);
        state.profiler.end();
        injected?;

        for extension in &state.extensions {
            extension.post_apply(&mut ctx);
        }

        let (node, generated) = ctx.into_node();
        state.cache.register(ClassInfo::from_node(&node, false));
        state.transformed.insert(target.to_string());
        let out = encode(&node)?;
        for synthetic in generated {
            state.cache.register(ClassInfo::from_node(&synthetic, false));
            state.generated.insert(synthetic.name.clone(), synthetic);
        }

        if self.options.debug_export {
            self.export(state, target, &out);
        }
        Ok(out)
    }

    fn run_injections(
        state: &mut State,
        ctx: &mut TargetClassContext,
        debug_injectors: bool,
    ) -> Result<()> {
        let mut infos: Vec<InjectionInfo> = Vec::new();
        let lookup = |id: &str| state.custom_points.get(id).cloned();
        for mixin in ctx.mixins().to_vec() {
            for def in &mixin.members.injectors {
                infos.push(InjectionInfo::parse(Arc::clone(&mixin), def, &lookup)?);
            }
        }
        for injection in &mut infos {
            injection.prepare(ctx.node())?;
        }
        let mut generated = Vec::new();
        let mut groups = GroupCounters::default();
        for injection in &mut infos {
            injection.inject(ctx, &mut generated)?;
            injection.post_inject(debug_injectors)?;
            groups.record(injection);
        }
        groups.validate(&ctx.name)?;
        for synthetic in generated {
            ctx.add_generated(synthetic);
        }
        Ok(())
    }

    fn generate(&self, name: &str) -> Result<Vec<u8>> {
        let state = self.lock();
        if let Some(node) = state.generated.get(name) {
            return Ok(encode(node)?);
        }
        for generator in &state.generators {
            if let Some(node) = generator.generate(name) {
                return Ok(encode(&node)?);
            }
        }
        Err(TransformError::NoGenerator {
            name: name.to_string(),
        })
    }

    fn export(&self, state: &State, name: &str, bytes: &[u8]) {
        let path = self.options.export_dir.join(format!("{name}.class"));
        if let Some(parent) = path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                warn!(%error, "cannot create debug-export directory");
                return;
            }
        }
        match fs::write(&path, bytes) {
            Ok(()) => {
                if let Some(decompiler) = &state.decompiler {
                    decompiler.decompile(name, bytes);
                }
            }
            Err(error) => warn!(%error, class = name, "debug export failed"),
        }
    }

    /// Force-load every declared target that was never transformed, then
    /// report (and warn about) the ones still unhandled.
    pub fn audit(&self) -> Vec<String> {
        let unhandled: Vec<String> = {
            let mut state = self.lock();
            if let Err(error) = self.select_locked(&mut state) {
                warn!(%error, "config selection failed during audit");
            }
            let mut pending: Vec<String> = state
                .registry
                .all_targets()
                .difference(&state.transformed)
                .cloned()
                .collect();
            pending.sort();
            pending
        };
        for target in &unhandled {
            match self.source.class_bytes(target) {
                Some(bytes) => {
                    if let Err(error) = self.transform(target, target, Some(&bytes)) {
                        warn!(target = target.as_str(), %error, "audit transformation failed");
                    }
                }
                None => warn!(target = target.as_str(), "audit cannot load target"),
            }
        }

        let state = self.lock();
        let mut remaining: Vec<String> = state
            .registry
            .all_targets()
            .difference(&state.transformed)
            .cloned()
            .collect();
        remaining.sort();
        for target in &remaining {
            warn!(target = target.as_str(), "mixin target was never transformed");
        }
        remaining
    }

    /// Replace a mixin class with fresh bytes; returns the targets that
    /// must be re-transformed. Refused while a transformation is on this
    /// thread's stack.
    pub fn hot_swap(&self, mixin_name: &str, bytes: &[u8]) -> Result<Vec<String>> {
        if !self.options.hot_swap {
            return Err(TransformError::prepare(
                mixin_name,
                "hot swapping is not enabled",
            ));
        }
        let depth = DepthGuard::current();
        if depth > 0 {
            return Err(TransformError::ReEntrance {
                target: mixin_name.to_string(),
                depth,
            });
        }
        let mut state = self.lock();
        let State {
            registry, cache, ..
        } = &mut *state;
        let targets = registry.reload_mixin(mixin_name, bytes, &*self.source, cache)?;
        for target in &targets {
            state.transformed.remove(target);
            state.cache.invalidate(target);
        }
        self.refresh_index(&state);
        info!(
            mixin = mixin_name,
            targets = targets.len(),
            "hot-swapped mixin"
        );
        Ok(targets)
    }

    /// Render the profiler report.
    pub fn profiler_report(&self, include_fine: bool) -> String {
        self.lock().profiler.report(include_fine)
    }
}

/// Dotted-numeric version comparison: does `wanted` exceed `have`?
fn version_newer(wanted: &str, have: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    parse(wanted) > parse(have)
}
