//! Injection points: stateless strategies that locate instructions.
//!
//! Built-in points are variants of one enum; composites own their children;
//! user-registered strategies hide behind a trait object and are addressed
//! by dotted at-codes. Every strategy returns node ids in forward list
//! order and holds no state between calls.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use weft_asm::classfile::CTOR_NAME;
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;
use weft_asm::pool::PoolConstant;

use crate::annotations::{AtRecord, ConstantMatcher, MemberInfo, Shift};
use crate::error::{Result, TransformError};

/// Everything a point may inspect while searching.
pub struct FindContext<'a> {
    /// Target class internal name.
    pub owner: &'a str,
    /// Target class's superclass, for delegate-call detection.
    pub superclass: Option<&'a str>,
    /// Target method name.
    pub method_name: &'a str,
    /// Target method descriptor.
    pub method_desc: &'a str,
    /// The instruction list being searched.
    pub insns: &'a InsnList,
}

impl FindContext<'_> {
    /// Flag whether the method under search is a constructor.
    pub fn is_ctor(&self) -> bool {
        self.method_name == CTOR_NAME
    }
}

/// User-registered injection-point strategy.
pub trait InjectionPointStrategy: Send + Sync {
    /// Matching node ids, in forward order, restricted to `window`.
    fn find(&self, ctx: &FindContext<'_>, window: &[InsnId]) -> Vec<InsnId>;
}

/// Constructor-head anchoring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CtorEnforce {
    /// Directly after the delegate constructor call.
    PostDelegate,
    /// After the field initializers that follow the delegate call.
    #[default]
    PostInit,
    /// At the first instruction of the constructor body proper; anchors the
    /// same node as [`CtorEnforce::PostInit`].
    PreBody,
}

/// One injection-point strategy.
pub enum InjectionPoint {
    /// First real instruction of the method.
    MethodHead,
    /// Every return instruction, or the `ordinal`-th.
    BeforeReturn {
        /// Match selector; `None`/`-1` selects all.
        ordinal: Option<i32>,
    },
    /// Only the last return instruction.
    BeforeFinalReturn,
    /// Method invocations matching a member reference.
    BeforeInvoke {
        /// The invoked member to match.
        target: MemberInfo,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// The instruction after a matching non-void invocation, skipping an
    /// intervening store.
    AfterInvoke {
        /// The invoked member to match.
        target: MemberInfo,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Invocations preceded by a specific string constant.
    BeforeStringInvoke {
        /// Required string payload.
        payload: String,
        /// The invoked member to match.
        target: MemberInfo,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Field accesses matching a member reference.
    BeforeFieldAccess {
        /// The accessed field to match.
        target: MemberInfo,
        /// Restrict to one access opcode.
        opcode: Option<Opcode>,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// `new T` allocations.
    BeforeNew {
        /// Allocated class to match; `None` matches every allocation.
        class: Option<String>,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Jump instructions.
    JumpInsn {
        /// Restrict to one jump opcode.
        opcode: Option<Opcode>,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Constant loads.
    BeforeConstant {
        /// Which constants match.
        matcher: ConstantMatcher,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Local-variable loads.
    BeforeLoadLocal {
        /// Restrict to one slot.
        slot: Option<u16>,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// The instruction after local-variable stores.
    AfterStoreLocal {
        /// Restrict to one slot.
        slot: Option<u16>,
        /// Match selector.
        ordinal: Option<i32>,
    },
    /// Constructor-head position selected by enforce mode.
    ConstructorHead {
        /// Anchoring mode.
        enforce: CtorEnforce,
    },
    /// Intersection of children, ordered by the first child.
    And(Vec<InjectionPoint>),
    /// Union of children in first-seen order.
    Or(Vec<InjectionPoint>),
    /// Children's results shifted by a fixed offset.
    Shift {
        /// The wrapped point.
        base: Box<InjectionPoint>,
        /// Offset in instructions; negative walks backward.
        by: i32,
    },
    /// Host-registered strategy.
    Custom {
        /// Dotted at-code the strategy was registered under.
        id: String,
        /// The strategy.
        strategy: Arc<dyn InjectionPointStrategy>,
    },
}

impl InjectionPoint {
    /// Resolve an `At` record against the built-ins and the custom registry.
    pub fn parse(
        mixin: &str,
        at: &AtRecord,
        custom: &dyn Fn(&str) -> Option<Arc<dyn InjectionPointStrategy>>,
    ) -> Result<Self> {
        let invalid = |reason: &str| TransformError::InvalidInjectionPoint {
            mixin: mixin.to_string(),
            at: at.code.clone(),
            reason: reason.to_string(),
        };
        let target = || at.target.clone().unwrap_or_default();
        let opcode = match at.opcode {
            Some(raw) => Some(
                u8::try_from(raw)
                    .ok()
                    .and_then(|b| Opcode::try_from(b).ok())
                    .ok_or_else(|| invalid("opcode filter is not a known opcode"))?,
            ),
            None => None,
        };
        let slot = match at.arg("index") {
            Some(raw) => Some(raw.parse::<u16>().map_err(|_| invalid("bad index argument"))?),
            None => None,
        };
        let base = match at.code.as_str() {
            "HEAD" => InjectionPoint::MethodHead,
            "RETURN" => InjectionPoint::BeforeReturn { ordinal: at.ordinal },
            "TAIL" => InjectionPoint::BeforeFinalReturn,
            "INVOKE" => InjectionPoint::BeforeInvoke {
                target: target(),
                ordinal: at.ordinal,
            },
            "INVOKE_ASSIGN" => InjectionPoint::AfterInvoke {
                target: target(),
                ordinal: at.ordinal,
            },
            "INVOKE_STRING" => InjectionPoint::BeforeStringInvoke {
                payload: at
                    .arg("ldc")
                    .ok_or_else(|| invalid("missing ldc argument"))?
                    .to_string(),
                target: target(),
                ordinal: at.ordinal,
            },
            "FIELD" => InjectionPoint::BeforeFieldAccess {
                target: target(),
                opcode,
                ordinal: at.ordinal,
            },
            "NEW" => InjectionPoint::BeforeNew {
                class: at
                    .arg("class")
                    .map(str::to_string)
                    .or_else(|| at.target.as_ref().and_then(|t| t.owner.clone())),
                ordinal: at.ordinal,
            },
            "JUMP" => InjectionPoint::JumpInsn {
                opcode,
                ordinal: at.ordinal,
            },
            "CONSTANT" => InjectionPoint::BeforeConstant {
                matcher: ConstantMatcher::from_point_args(&at.args),
                ordinal: at.ordinal,
            },
            "LOAD" => InjectionPoint::BeforeLoadLocal {
                slot,
                ordinal: at.ordinal,
            },
            "STORE" => InjectionPoint::AfterStoreLocal {
                slot,
                ordinal: at.ordinal,
            },
            "CTOR_HEAD" => {
                let enforce = match at.arg("enforce") {
                    Some("POST_DELEGATE") => CtorEnforce::PostDelegate,
                    Some("POST_INIT") | None => CtorEnforce::PostInit,
                    Some("PRE_BODY") => CtorEnforce::PreBody,
                    Some(other) => return Err(invalid(&format!("unknown enforce mode {other}"))),
                };
                debug!(mixin, enforce = ?enforce, "constructor-head anchoring mode");
                InjectionPoint::ConstructorHead { enforce }
            }
            dotted if dotted.contains('.') => InjectionPoint::Custom {
                id: dotted.to_string(),
                strategy: custom(dotted)
                    .ok_or_else(|| invalid("no strategy registered under this id"))?,
            },
            _ => return Err(invalid("unknown at-code")),
        };
        Ok(match at.shift {
            Shift::None => base,
            Shift::Before => InjectionPoint::Shift {
                base: Box::new(base),
                by: -1,
            },
            Shift::After => InjectionPoint::Shift {
                base: Box::new(base),
                by: 1,
            },
            Shift::By => InjectionPoint::Shift {
                base: Box::new(base),
                by: at.by,
            },
        })
    }

    /// Matching node ids in forward order, restricted to `window`.
    pub fn find(&self, ctx: &FindContext<'_>, window: &[InsnId]) -> Vec<InsnId> {
        match self {
            InjectionPoint::MethodHead => window
                .iter()
                .copied()
                .find(|id| !ctx.insns.get(*id).is_marker())
                .into_iter()
                .collect(),
            InjectionPoint::BeforeReturn { ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| {
                        ctx.insns
                            .get(*id)
                            .opcode()
                            .map(Opcode::is_return)
                            .unwrap_or(false)
                    })
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::BeforeFinalReturn => window
                .iter()
                .copied()
                .filter(|id| {
                    ctx.insns
                        .get(*id)
                        .opcode()
                        .map(Opcode::is_return)
                        .unwrap_or(false)
                })
                .last()
                .into_iter()
                .collect(),
            InjectionPoint::BeforeInvoke { target, ordinal } => {
                select(invokes(ctx, window, target), *ordinal)
            }
            InjectionPoint::AfterInvoke { target, ordinal } => {
                let hits = select(
                    invokes(ctx, window, target)
                        .into_iter()
                        .filter(|id| match ctx.insns.get(*id) {
                            Insn::Method { desc, .. } => !desc.ends_with(")V"),
                            _ => false,
                        })
                        .collect(),
                    *ordinal,
                );
                hits.into_iter()
                    .filter_map(|id| after_skipping_store(ctx.insns, id))
                    .collect()
            }
            InjectionPoint::BeforeStringInvoke {
                payload,
                target,
                ordinal,
            } => select(
                invokes(ctx, window, target)
                    .into_iter()
                    .filter(|id| preceded_by_string(ctx.insns, *id, payload))
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::BeforeFieldAccess {
                target,
                opcode,
                ordinal,
            } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| match ctx.insns.get(*id) {
                        Insn::Field {
                            op, owner, name, desc,
                        } => {
                            opcode.map(|f| f == *op).unwrap_or(true)
                                && target.matches_owner(owner)
                                && target.matches_field(name, desc)
                        }
                        _ => false,
                    })
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::BeforeNew { class, ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| match ctx.insns.get(*id) {
                        Insn::Type {
                            op: Opcode::NEW,
                            ty,
                        } => class.as_deref().map(|c| c == ty).unwrap_or(true),
                        _ => false,
                    })
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::JumpInsn { opcode, ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| match ctx.insns.get(*id) {
                        Insn::Jump(op, _) => opcode.map(|f| f == *op).unwrap_or(true),
                        _ => false,
                    })
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::BeforeConstant { matcher, ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| matcher.matches(ctx.insns.get(*id)))
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::BeforeLoadLocal { slot, ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| match ctx.insns.get(*id) {
                        Insn::Var(op, s) => {
                            op.is_local_load() && slot.map(|w| w == *s).unwrap_or(true)
                        }
                        _ => false,
                    })
                    .collect(),
                *ordinal,
            ),
            InjectionPoint::AfterStoreLocal { slot, ordinal } => select(
                window
                    .iter()
                    .copied()
                    .filter(|id| match ctx.insns.get(*id) {
                        Insn::Var(op, s) => {
                            op.is_local_store() && slot.map(|w| w == *s).unwrap_or(true)
                        }
                        _ => false,
                    })
                    .collect(),
                *ordinal,
            )
            .into_iter()
            .filter_map(|id| next_real(ctx.insns, id))
            .collect(),
            InjectionPoint::ConstructorHead { enforce } => {
                ctor_head(ctx, *enforce).into_iter().collect()
            }
            InjectionPoint::And(children) => {
                let sets: Vec<HashSet<InsnId>> = children
                    .iter()
                    .skip(1)
                    .map(|c| c.find(ctx, window).into_iter().collect())
                    .collect();
                match children.first() {
                    Some(first) => first
                        .find(ctx, window)
                        .into_iter()
                        .filter(|id| sets.iter().all(|s| s.contains(id)))
                        .collect(),
                    None => Vec::new(),
                }
            }
            InjectionPoint::Or(children) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for child in children {
                    for id in child.find(ctx, window) {
                        if seen.insert(id) {
                            out.push(id);
                        }
                    }
                }
                out
            }
            InjectionPoint::Shift { base, by } => base
                .find(ctx, window)
                .into_iter()
                .filter_map(|id| ctx.insns.offset_from(id, *by))
                .collect(),
            InjectionPoint::Custom { strategy, .. } => strategy.find(ctx, window),
        }
    }
}

/// Apply ordinal selection: `n ≥ 0` keeps the n-th match, `-1`/`None` keeps
/// all.
fn select(matches: Vec<InsnId>, ordinal: Option<i32>) -> Vec<InsnId> {
    match ordinal {
        Some(n) if n >= 0 => matches.into_iter().nth(n as usize).into_iter().collect(),
        _ => matches,
    }
}

fn invokes(ctx: &FindContext<'_>, window: &[InsnId], target: &MemberInfo) -> Vec<InsnId> {
    window
        .iter()
        .copied()
        .filter(|id| match ctx.insns.get(*id) {
            Insn::Method {
                owner, name, desc, ..
            } => target.matches_owner(owner) && target.matches_method(name, desc),
            _ => false,
        })
        .collect()
}

fn next_real(insns: &InsnList, id: InsnId) -> Option<InsnId> {
    let mut cursor = insns.next(id);
    while let Some(current) = cursor {
        if !insns.get(current).is_marker() {
            return Some(current);
        }
        cursor = insns.next(current);
    }
    None
}

fn after_skipping_store(insns: &InsnList, invoke: InsnId) -> Option<InsnId> {
    let after = next_real(insns, invoke)?;
    match insns.get(after) {
        Insn::Var(op, _) if op.is_local_store() => next_real(insns, after),
        _ => Some(after),
    }
}

fn preceded_by_string(insns: &InsnList, invoke: InsnId, payload: &str) -> bool {
    let mut cursor = insns.prev(invoke);
    while let Some(current) = cursor {
        let insn = insns.get(current);
        if !insn.is_marker() {
            return matches!(
                insn.constant_value(),
                Some(PoolConstant::Str(s)) if s == payload
            );
        }
        cursor = insns.prev(current);
    }
    false
}

/// Locate the delegate constructor call of a constructor body.
pub(crate) fn delegate_call(ctx: &FindContext<'_>) -> Option<InsnId> {
    ctx.insns.iter().find_map(|(id, insn)| match insn {
        Insn::Method {
            op: Opcode::INVOKESPECIAL,
            owner,
            name,
            ..
        } if name == CTOR_NAME
            && (Some(owner.as_str()) == ctx.superclass || owner == ctx.owner) =>
        {
            Some(id)
        }
        _ => None,
    })
}

fn ctor_head(ctx: &FindContext<'_>, enforce: CtorEnforce) -> Option<InsnId> {
    if !ctx.is_ctor() {
        return None;
    }
    let delegate = delegate_call(ctx)?;
    let post_delegate = next_real(ctx.insns, delegate)?;
    if enforce == CtorEnforce::PostDelegate {
        return Some(post_delegate);
    }
    // walk over the field-initializer units that directly follow the
    // delegate call; each unit ends with a putfield on the owner
    let mut cursor = post_delegate;
    loop {
        let mut probe = Some(cursor);
        let mut unit_end = None;
        while let Some(current) = probe {
            match ctx.insns.get(current) {
                Insn::Field {
                    op: Opcode::PUTFIELD,
                    owner,
                    ..
                } if owner == ctx.owner => {
                    unit_end = Some(current);
                    break;
                }
                Insn::Jump(..)
                | Insn::TableSwitch { .. }
                | Insn::LookupSwitch { .. }
                | Insn::Label(_) => break,
                insn if insn.opcode().map(Opcode::is_return).unwrap_or(false) => break,
                _ => probe = ctx.insns.next(current),
            }
        }
        match unit_end.and_then(|end| next_real(ctx.insns, end)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    Some(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(insns: &'a InsnList) -> FindContext<'a> {
        FindContext {
            owner: "game/Engine",
            superclass: Some("java/lang/Object"),
            method_name: "run",
            method_desc: "()V",
            insns,
        }
    }

    fn sample() -> (InsnList, Vec<InsnId>) {
        let mut insns = InsnList::new();
        insns.push_back(Insn::Line(10));
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(
            Insn::method(Opcode::INVOKEVIRTUAL, "game/Engine", "step", "()I", false).unwrap(),
        );
        insns.push_back(Insn::Var(Opcode::ISTORE, 1));
        insns.push_back(Insn::Var(Opcode::ALOAD, 0));
        insns.push_back(
            Insn::method(Opcode::INVOKEVIRTUAL, "game/Engine", "step", "()I", false).unwrap(),
        );
        insns.push_back(Insn::Simple(Opcode::POP));
        insns.push_back(Insn::Simple(Opcode::RETURN));
        let window = insns.ids();
        (insns, window)
    }

    #[test]
    fn head_skips_markers() {
        let (insns, window) = sample();
        let hits = InjectionPoint::MethodHead.find(&ctx(&insns), &window);
        assert_eq!(hits.len(), 1);
        assert!(matches!(insns.get(hits[0]), Insn::Var(Opcode::ALOAD, 0)));
    }

    #[test]
    fn ordinal_selects_nth_match() {
        let (insns, window) = sample();
        let point = InjectionPoint::BeforeInvoke {
            target: MemberInfo::named("step"),
            ordinal: Some(1),
        };
        let hits = point.find(&ctx(&insns), &window);
        assert_eq!(hits.len(), 1);
        assert_eq!(insns.index_of(hits[0]), Some(5));

        let all = InjectionPoint::BeforeInvoke {
            target: MemberInfo::named("step"),
            ordinal: Some(-1),
        };
        assert_eq!(all.find(&ctx(&insns), &window).len(), 2);
    }

    #[test]
    fn invoke_assign_skips_the_store() {
        let (insns, window) = sample();
        let point = InjectionPoint::AfterInvoke {
            target: MemberInfo::named("step"),
            ordinal: Some(0),
        };
        let hits = point.find(&ctx(&insns), &window);
        assert_eq!(hits.len(), 1);
        // first invoke's result is stored; the hit lands after the store
        assert!(matches!(insns.get(hits[0]), Insn::Var(Opcode::ALOAD, 0)));
    }

    #[test]
    fn shift_composition_laws() {
        let (insns, window) = sample();
        let fctx = ctx(&insns);
        let base = InjectionPoint::BeforeReturn { ordinal: None };

        let zero = InjectionPoint::Shift {
            base: Box::new(InjectionPoint::BeforeReturn { ordinal: None }),
            by: 0,
        };
        assert_eq!(zero.find(&fctx, &window), base.find(&fctx, &window));

        let two = InjectionPoint::Shift {
            base: Box::new(InjectionPoint::BeforeReturn { ordinal: None }),
            by: -2,
        };
        let one_one = InjectionPoint::Shift {
            base: Box::new(InjectionPoint::Shift {
                base: Box::new(InjectionPoint::BeforeReturn { ordinal: None }),
                by: -1,
            }),
            by: -1,
        };
        assert_eq!(two.find(&fctx, &window), one_one.find(&fctx, &window));
    }

    #[test]
    fn and_is_intersection_or_is_union() {
        let (insns, window) = sample();
        let fctx = ctx(&insns);

        let invokes = InjectionPoint::BeforeInvoke {
            target: MemberInfo::named("step"),
            ordinal: None,
        };
        let first = InjectionPoint::BeforeInvoke {
            target: MemberInfo::named("step"),
            ordinal: Some(0),
        };
        let and = InjectionPoint::And(vec![
            InjectionPoint::BeforeInvoke {
                target: MemberInfo::named("step"),
                ordinal: None,
            },
            InjectionPoint::BeforeInvoke {
                target: MemberInfo::named("step"),
                ordinal: Some(0),
            },
        ]);
        assert_eq!(and.find(&fctx, &window), first.find(&fctx, &window));

        let or = InjectionPoint::Or(vec![
            InjectionPoint::BeforeInvoke {
                target: MemberInfo::named("step"),
                ordinal: Some(0),
            },
            InjectionPoint::BeforeInvoke {
                target: MemberInfo::named("step"),
                ordinal: None,
            },
        ]);
        let hits = or.find(&fctx, &window);
        assert_eq!(hits, invokes.find(&fctx, &window));
    }

    #[test]
    fn constant_point_matches_matcher() {
        let mut insns = InsnList::new();
        insns.push_back(Insn::Int(Opcode::BIPUSH, 10));
        insns.push_back(Insn::Simple(Opcode::IMUL));
        insns.push_back(Insn::Simple(Opcode::IRETURN));
        let window = insns.ids();
        let point = InjectionPoint::BeforeConstant {
            matcher: ConstantMatcher {
                int_value: Some(10),
                ..ConstantMatcher::default()
            },
            ordinal: None,
        };
        assert_eq!(point.find(&ctx(&insns), &window).len(), 1);
    }
}
