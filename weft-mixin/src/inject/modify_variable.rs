//! Local-variable modifier: wraps a discriminated local in a handler call
//! at the located point.

use weft_asm::descriptor::MethodDescriptor;
use weft_asm::insn::{Insn, InsnId, InsnList};
use weft_asm::opcode::Opcode;

use crate::error::Result;
use crate::inject::frame::{coarse_match, locals_at};
use crate::inject::{Handler, InjectSite};

/// How the modified local is selected among the candidates at the point.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalDiscriminator {
    /// Explicit slot index.
    pub index: Option<u16>,
    /// Source names accepted; requires debug info.
    pub names: Vec<String>,
    /// Type-match ordinal among candidates in slot order.
    pub ordinal: Option<i32>,
}

/// Splice `local = handler(local)` before the instruction at `at`.
pub(crate) fn inject(
    site: &mut InjectSite<'_>,
    at: InsnId,
    handler: &Handler<'_>,
    disc: &LocalDiscriminator,
) -> Result<()> {
    let handler_desc = handler.parsed()?;
    if handler_desc.args.len() != 1 || handler_desc.ret != handler_desc.args[0] {
        return Err(handler.error("variable modifiers must have shape (T)T"));
    }
    let wanted = handler_desc.args[0].clone();

    let target_desc = MethodDescriptor::parse(site.method_desc)?;
    let frame = locals_at(site.owner, &target_desc, site.method_static, site.code, at);

    let slot = if let Some(index) = disc.index {
        let matches = frame
            .get(index as usize)
            .and_then(|s| s.as_ref())
            .map(|s| coarse_match(&s.ty, &wanted))
            .unwrap_or(false);
        if !matches {
            return Err(handler.error(format!("local {index} does not hold a {wanted}")));
        }
        index
    } else {
        let candidates: Vec<u16> = frame
            .iter()
            .enumerate()
            .filter_map(|(slot, info)| info.as_ref().map(|info| (slot as u16, info)))
            .filter(|(_, info)| coarse_match(&info.ty, &wanted))
            .filter(|(_, info)| {
                disc.names.is_empty()
                    || info
                        .name
                        .as_deref()
                        .map(|n| disc.names.iter().any(|w| w == n))
                        .unwrap_or(false)
            })
            .map(|(slot, _)| slot)
            .collect();
        match disc.ordinal {
            Some(n) if n >= 0 => *candidates.get(n as usize).ok_or_else(|| {
                handler.error(format!(
                    "ordinal {n} exceeds the {} matching locals",
                    candidates.len()
                ))
            })?,
            _ => match candidates.as_slice() {
                [only] => *only,
                [] => return Err(handler.error(format!("no local of type {wanted} at the point"))),
                many => {
                    return Err(handler.error(format!(
                        "{} locals of type {wanted} at the point, a discriminator is required",
                        many.len()
                    )))
                }
            },
        }
    };

    let mut seq = InsnList::new();
    if !handler.is_static {
        seq.push_back(Insn::Var(Opcode::ALOAD, 0));
    }
    seq.push_back(Insn::Var(wanted.load_op(), slot));
    seq.push_back(handler.invoke());
    seq.push_back(Insn::Var(wanted.store_op(), slot));

    site.code.insns.splice_before(Some(at), &seq);
    site.code.modified = true;
    site.grow_stack(wanted.size() + u16::from(!handler.is_static));
    Ok(())
}
