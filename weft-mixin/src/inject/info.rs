//! Injection lifecycle: parse, prepare, inject, post-inject.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use weft_asm::classfile::{ClassNode, CodeBody, CTOR_NAME};
use weft_asm::insn::InsnId;

use crate::annotations::{
    ConstantMatcher, GroupRecord, InjectorCommon, InjectorKind, MemberInfo,
};
use crate::context::{InjectorMeta, TargetClassContext};
use crate::error::{Result, TransformError};
use crate::inject::modify_variable::LocalDiscriminator;
use crate::inject::{callback, modify_arg, modify_constant, modify_variable, redirect};
use crate::inject::{Handler, InjectSite};
use crate::mixin::{InjectorDef, MixinInfo};
use crate::point::{delegate_call, FindContext, InjectionPoint, InjectionPointStrategy};

/// Per-kind annotation payload.
enum KindRecord {
    Inject { cancellable: bool, capture: bool },
    ModifyArg { index: Option<usize> },
    ModifyArgs,
    Redirect,
    ModifyConstant,
    ModifyVariable { disc: LocalDiscriminator },
}

struct Candidate {
    method_name: String,
    method_desc: String,
    nodes: Vec<InsnId>,
}

/// One injector handler method, driven through its lifecycle by the
/// transformer.
pub struct InjectionInfo {
    mixin: Arc<MixinInfo>,
    kind: InjectorKind,
    handler_declared: String,
    handler_merged: String,
    handler_desc: String,
    handler_static: bool,
    is_final: bool,
    common: InjectorCommon,
    record: KindRecord,
    points: Vec<InjectionPoint>,
    point_slices: Vec<String>,
    group: Option<GroupRecord>,
    candidates: Vec<Candidate>,
    injected: usize,
}

impl InjectionInfo {
    /// Parse one handler's injector annotation.
    pub fn parse(
        mixin: Arc<MixinInfo>,
        def: &InjectorDef,
        custom_points: &dyn Fn(&str) -> Option<Arc<dyn InjectionPointStrategy>>,
    ) -> Result<Self> {
        let common = InjectorCommon::from_annotation(&mixin.name, &def.annotation)?;
        let mut points = Vec::new();
        let mut point_slices = Vec::new();
        for at in &common.ats {
            points.push(InjectionPoint::parse(&mixin.name, at, custom_points)?);
            point_slices.push(at.slice.clone());
        }

        let record = match def.kind {
            InjectorKind::Inject => KindRecord::Inject {
                cancellable: def.annotation.get_bool("cancellable", false),
                capture: def
                    .annotation
                    .enum_value("locals")
                    .map(|v| v.starts_with("CAPTURE"))
                    .unwrap_or(false),
            },
            InjectorKind::ModifyArg => KindRecord::ModifyArg {
                index: def
                    .annotation
                    .get_int("index")
                    .and_then(|i| usize::try_from(i).ok()),
            },
            InjectorKind::ModifyArgs => KindRecord::ModifyArgs,
            InjectorKind::Redirect => KindRecord::Redirect,
            InjectorKind::ModifyConstant => {
                let mut matcher = ConstantMatcher::from_annotation(&def.annotation);
                if let Some(nested) = def.annotation.nested("constant") {
                    matcher = ConstantMatcher::from_annotation(nested);
                }
                points.push(InjectionPoint::BeforeConstant {
                    matcher,
                    ordinal: def.annotation.get_int("ordinal"),
                });
                point_slices.push(String::new());
                KindRecord::ModifyConstant
            }
            InjectorKind::ModifyVariable => KindRecord::ModifyVariable {
                disc: LocalDiscriminator {
                    index: def
                        .annotation
                        .get_int("index")
                        .and_then(|i| u16::try_from(i).ok()),
                    names: def.annotation.get_str_array("name"),
                    ordinal: def.annotation.get_int("ordinal"),
                },
            },
        };

        if points.is_empty() {
            return Err(TransformError::injection(
                &mixin.name,
                &def.method.name,
                "no injection points declared",
            ));
        }
        if common.methods.is_empty() {
            return Err(TransformError::injection(
                &mixin.name,
                &def.method.name,
                "no target method declared",
            ));
        }

        let handler_merged = mixin.merged_name(&def.method.name, &def.method.desc);
        Ok(Self {
            is_final: def.annotation.get_bool("final", false),
            handler_declared: def.method.name.clone(),
            handler_merged,
            handler_desc: def.method.desc.clone(),
            handler_static: def.is_static,
            kind: def.kind,
            group: def.group.clone(),
            common,
            record,
            points,
            point_slices,
            candidates: Vec::new(),
            injected: 0,
            mixin,
        })
    }

    /// Group membership, for aggregate counting.
    pub fn group(&self) -> Option<&GroupRecord> {
        self.group.as_ref()
    }

    /// Which injector annotation drives this info.
    pub fn kind(&self) -> InjectorKind {
        self.kind
    }

    /// Injection priority, inherited from the owning mixin.
    pub fn priority(&self) -> i32 {
        self.mixin.priority
    }

    /// Successful injections so far.
    pub fn injected_count(&self) -> usize {
        self.injected
    }

    /// Resolve target methods and run the injection points over their
    /// instruction lists.
    pub fn prepare(&mut self, target: &ClassNode) -> Result<()> {
        self.candidates.clear();
        for method in &target.methods {
            let Some(code) = &method.code else { continue };
            if !self.matches_target(target, &method.name, &method.desc) {
                continue;
            }
            let ctx = FindContext {
                owner: &target.name,
                superclass: target.superclass.as_deref(),
                method_name: &method.name,
                method_desc: &method.desc,
                insns: &code.insns,
            };
            let all_ids = code.insns.ids();
            let mut nodes: Vec<InsnId> = Vec::new();
            for (point, slice_id) in self.points.iter().zip(&self.point_slices) {
                let window = self.slice_window(&ctx, &all_ids, slice_id)?;
                for id in point.find(&ctx, &window) {
                    if !nodes.contains(&id) {
                        nodes.push(id);
                    }
                }
            }
            if !nodes.is_empty() {
                self.candidates.push(Candidate {
                    method_name: method.name.clone(),
                    method_desc: method.desc.clone(),
                    nodes,
                });
            }
        }
        debug!(
            mixin = self.mixin.name.as_str(),
            handler = self.handler_declared.as_str(),
            candidates = self.candidates.iter().map(|c| c.nodes.len()).sum::<usize>(),
            "prepared injection"
        );
        Ok(())
    }

    fn matches_target(&self, target: &ClassNode, name: &str, desc: &str) -> bool {
        self.common.methods.iter().any(|member| {
            if member.match_all && member.name.is_none() {
                return name != CTOR_NAME && name != "<clinit>";
            }
            if member.matches_method(name, desc) {
                return true;
            }
            // retry through the refmap: the annotation names the source
            // symbol, the class carries the runtime one
            let remapped = self.remap_member(target, member);
            remapped.matches_method(name, desc)
        })
    }

    fn remap_member(&self, target: &ClassNode, member: &MemberInfo) -> MemberInfo {
        let Some(name) = &member.name else {
            return member.clone();
        };
        let symbol = match &member.desc {
            Some(desc) => format!("{name}{desc}"),
            None => name.clone(),
        };
        let mapped = self
            .mixin
            .refmap
            .remap(None, Some(&target.name), &symbol);
        let mut out = member.clone();
        match mapped.split_once('(') {
            Some((mapped_name, rest)) => {
                out.name = Some(mapped_name.to_string());
                out.desc = Some(format!("({rest}"));
            }
            None => out.name = Some(mapped),
        }
        out
    }

    fn slice_window(
        &self,
        ctx: &FindContext<'_>,
        all_ids: &[InsnId],
        slice_id: &str,
    ) -> Result<Vec<InsnId>> {
        if all_ids.is_empty() {
            return Ok(Vec::new());
        }
        let Some(slice) = self.common.slice(slice_id) else {
            if slice_id.is_empty() {
                return Ok(all_ids.to_vec());
            }
            return Err(TransformError::injection(
                &self.mixin.name,
                &self.handler_declared,
                format!("no slice declared with id {slice_id:?}"),
            ));
        };
        let resolve = |at: &Option<crate::annotations::AtRecord>, default: usize| -> Result<usize> {
            match at {
                None => Ok(default),
                Some(at) => {
                    let point = InjectionPoint::parse(&self.mixin.name, at, &|_| None)?;
                    let hits = point.find(ctx, all_ids);
                    match hits.first().and_then(|id| all_ids.iter().position(|i| i == id)) {
                        Some(pos) => Ok(pos),
                        None => Ok(default),
                    }
                }
            }
        };
        let from = resolve(&slice.from, 0)?;
        let to = resolve(&slice.to, all_ids.len().saturating_sub(1))?;
        if from > to {
            warn!(
                mixin = self.mixin.name.as_str(),
                handler = self.handler_declared.as_str(),
                slice = slice_id,
                "slice bounds are inverted; the window is empty"
            );
            return Ok(Vec::new());
        }
        Ok(all_ids[from..=to].to_vec())
    }

    /// Drive the injector over the prepared candidates.
    pub fn inject(
        &mut self,
        ctx: &mut TargetClassContext,
        generated: &mut Vec<ClassNode>,
    ) -> Result<()> {
        let owner = ctx.name.clone();
        let superclass = ctx.node().superclass.clone();
        for candidate_idx in 0..self.candidates.len() {
            let (method_name, method_desc, nodes) = {
                let c = &self.candidates[candidate_idx];
                (c.method_name.clone(), c.method_desc.clone(), c.nodes.clone())
            };
            let method_key = format!("{method_name}{method_desc}");
            let Some(position) = ctx
                .node()
                .methods
                .iter()
                .position(|m| m.name == method_name && m.desc == method_desc)
            else {
                warn!(
                    target = owner.as_str(),
                    method = method_key.as_str(),
                    "target method vanished between prepare and inject"
                );
                continue;
            };
            let method_static = ctx.node().methods[position].is_static();
            let Some(mut code) = ctx.node_mut().methods[position].code.take() else {
                continue;
            };

            for node in nodes {
                if !code.insns.contains(node) {
                    warn!(
                        target = owner.as_str(),
                        method = method_key.as_str(),
                        "candidate instruction was removed by an earlier injection"
                    );
                    continue;
                }
                match self.claim(ctx, &method_key, node) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => {
                        ctx.node_mut().methods[position].code = Some(code);
                        return Err(error);
                    }
                }
                let outcome = self.inject_at(
                    &owner,
                    superclass.as_deref(),
                    &method_name,
                    &method_desc,
                    method_static,
                    &mut code,
                    node,
                    generated,
                );
                match outcome {
                    Ok(()) => self.injected += 1,
                    Err(error) => {
                        ctx.node_mut().methods[position].code = Some(code);
                        return Err(error);
                    }
                }
            }
            ctx.node_mut().methods[position].code = Some(code);
        }
        Ok(())
    }

    /// Conflict resolution against existing decorations. `Ok(true)` means
    /// proceed; `Ok(false)` means skip with a warning.
    fn claim(
        &self,
        ctx: &mut TargetClassContext,
        method_key: &str,
        node: InsnId,
    ) -> Result<bool> {
        if let Some(existing) = ctx.decoration(method_key, node) {
            if existing.priority >= self.priority() {
                warn!(
                    mixin = self.mixin.name.as_str(),
                    handler = self.handler_declared.as_str(),
                    owner = existing.mixin.as_str(),
                    "skipping injection: the instruction is already claimed at priority {}",
                    existing.priority
                );
                return Ok(false);
            }
            if existing.is_final {
                return Err(TransformError::RedirectConflict {
                    mixin: self.mixin.name.clone(),
                    handler: self.handler_declared.clone(),
                    owner: existing.mixin.clone(),
                    target: method_key.to_string(),
                });
            }
        }
        ctx.decorate(
            method_key,
            node,
            InjectorMeta {
                mixin: self.mixin.name.clone(),
                handler: self.handler_merged.clone(),
                desc: self.handler_desc.clone(),
                priority: self.priority(),
                is_final: self.is_final,
            },
        );
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn inject_at(
        &self,
        owner: &str,
        superclass: Option<&str>,
        method_name: &str,
        method_desc: &str,
        method_static: bool,
        code: &mut CodeBody,
        node: InsnId,
        generated: &mut Vec<ClassNode>,
    ) -> Result<()> {
        let handler = Handler {
            owner,
            name: &self.handler_merged,
            desc: &self.handler_desc,
            is_static: self.handler_static,
            mixin: &self.mixin.name,
        };
        let mut site = InjectSite {
            owner,
            method_name,
            method_desc,
            method_static,
            code,
        };
        self.check_staticness(&site, superclass, node, &handler)?;
        match &self.record {
            KindRecord::Inject {
                cancellable,
                capture,
            } => callback::inject(&mut site, node, &handler, *cancellable, *capture),
            KindRecord::ModifyArg { index } => {
                modify_arg::inject_single(&mut site, node, &handler, *index)
            }
            KindRecord::ModifyArgs => {
                modify_arg::inject_multi(&mut site, generated, node, &handler)
            }
            KindRecord::Redirect => redirect::inject(&mut site, node, &handler),
            KindRecord::ModifyConstant => modify_constant::inject(&mut site, node, &handler),
            KindRecord::ModifyVariable { disc } => {
                modify_variable::inject(&mut site, node, &handler, disc)
            }
        }
    }

    /// Handler static-ness must match the target's, except before the
    /// delegate call of a constructor where only static handlers may run.
    fn check_staticness(
        &self,
        site: &InjectSite<'_>,
        superclass: Option<&str>,
        node: InsnId,
        handler: &Handler<'_>,
    ) -> Result<()> {
        if site.method_name == CTOR_NAME {
            let ctx = FindContext {
                owner: site.owner,
                superclass,
                method_name: site.method_name,
                method_desc: site.method_desc,
                insns: &site.code.insns,
            };
            let before_delegate = match delegate_call(&ctx) {
                Some(delegate) => {
                    let pos = |id| site.code.insns.index_of(id).unwrap_or(usize::MAX);
                    pos(node) <= pos(delegate)
                }
                None => true,
            };
            if before_delegate && !handler.is_static {
                return Err(handler.error(
                    "injections before the delegate constructor call require a static handler",
                ));
            }
            if before_delegate {
                return Ok(());
            }
        }
        if handler.is_static != site.method_static {
            return Err(handler.error(format!(
                "handler is {} but the target method is {}",
                if handler.is_static { "static" } else { "an instance method" },
                if site.method_static { "static" } else { "an instance method" },
            )));
        }
        Ok(())
    }

    /// Enforce `require`, and `expect` when the engine runs with injector
    /// debugging (or the owning config is verbose).
    pub fn post_inject(&self, debug_injectors: bool) -> Result<()> {
        if self.injected < self.common.require {
            return Err(TransformError::InjectionCount {
                mixin: self.mixin.name.clone(),
                handler: self.handler_declared.clone(),
                count: self.injected,
                required: self.common.require,
            });
        }
        if self.injected < self.common.expect {
            if debug_injectors || self.mixin.verbose {
                return Err(TransformError::InjectionCount {
                    mixin: self.mixin.name.clone(),
                    handler: self.handler_declared.clone(),
                    count: self.injected,
                    required: self.common.expect,
                });
            }
            warn!(
                mixin = self.mixin.name.as_str(),
                handler = self.handler_declared.as_str(),
                injected = self.injected,
                expected = self.common.expect,
                "injection count below expectation"
            );
        }
        Ok(())
    }
}

/// Aggregated injection counts per named group.
#[derive(Debug, Default)]
pub struct GroupCounters {
    groups: HashMap<String, (usize, usize)>,
}

impl GroupCounters {
    /// Fold one injector's result into its group.
    pub fn record(&mut self, info: &InjectionInfo) {
        if let Some(group) = info.group() {
            let entry = self.groups.entry(group.name.clone()).or_insert((0, 0));
            entry.0 = entry.0.max(group.min);
            entry.1 += info.injected_count();
        }
    }

    /// A group's `min` applies to the sum of its members' counts.
    pub fn validate(&self, target: &str) -> Result<()> {
        for (name, (min, count)) in &self.groups {
            if count < min {
                return Err(TransformError::InjectionCount {
                    mixin: format!("group {name}"),
                    handler: target.to_string(),
                    count: *count,
                    required: *min,
                });
            }
        }
        Ok(())
    }
}
