//! Class-file decoder.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::annotation::read_annotations;
use crate::bytes::ByteReader;
use crate::error::{Error, Result};
use crate::insn::{Insn, InsnList, LabelId};
use crate::opcode::Opcode;
use crate::pool::{ConstantPool, PoolEntry};
use crate::visibility::{ClassAccess, FieldAccess, MethodAccess};

use super::{
    BootstrapMethod, ClassNode, CodeBody, FieldNode, InnerClassNode, LocalVariableEntry,
    MethodNode, RawAttribute, TryCatchBlock,
};

const MAGIC: u32 = 0xcafe_babe;

/// Decode a class file into its tree form.
pub fn decode(bytes: &[u8]) -> Result<ClassNode> {
    let mut r = ByteReader::new(bytes);
    if r.u32()? != MAGIC {
        return Err(Error::bad_class("bad magic number", 0));
    }
    let minor = r.u16()?;
    let major = r.u16()?;
    let pool = ConstantPool::read(&mut r)?;

    let access = ClassAccess::from_bits_truncate(r.u16()?);
    let name = pool.class_name(r.u16()?)?.to_string();
    let super_idx = r.u16()?;
    let superclass = if super_idx == 0 {
        None
    } else {
        Some(pool.class_name(super_idx)?.to_string())
    };
    let itf_count = r.u16()? as usize;
    let mut interfaces = Vec::with_capacity(itf_count);
    for _ in 0..itf_count {
        interfaces.push(pool.class_name(r.u16()?)?.to_string());
    }

    let field_count = r.u16()? as usize;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        fields.push(read_field(&mut r, &pool)?);
    }

    let method_count = r.u16()? as usize;
    let mut methods = Vec::with_capacity(method_count);
    for _ in 0..method_count {
        methods.push(read_method(&mut r, &pool)?);
    }

    let mut node = ClassNode {
        minor,
        major,
        access,
        name,
        superclass,
        interfaces,
        signature: None,
        source_file: None,
        fields,
        methods,
        visible_annotations: Vec::new(),
        invisible_annotations: Vec::new(),
        inner_classes: Vec::new(),
        bootstrap_methods: Vec::new(),
        attrs: Vec::new(),
        orig_pool: None,
    };

    let attr_count = r.u16()? as usize;
    for _ in 0..attr_count {
        let (attr_name, data) = read_attribute(&mut r, &pool)?;
        let mut ar = ByteReader::new(&data);
        match attr_name.as_str() {
            "SourceFile" => node.source_file = Some(pool.utf8(ar.u16()?)?.to_string()),
            "Signature" => node.signature = Some(pool.utf8(ar.u16()?)?.to_string()),
            "RuntimeVisibleAnnotations" => {
                node.visible_annotations = read_annotations(&mut ar, &pool)?
            }
            "RuntimeInvisibleAnnotations" => {
                node.invisible_annotations = read_annotations(&mut ar, &pool)?
            }
            "InnerClasses" => {
                let count = ar.u16()? as usize;
                for _ in 0..count {
                    let inner = ar.u16()?;
                    let outer = ar.u16()?;
                    let inner_name = ar.u16()?;
                    let access = ar.u16()?;
                    node.inner_classes.push(InnerClassNode {
                        name: pool.class_name(inner)?.to_string(),
                        outer: if outer == 0 {
                            None
                        } else {
                            Some(pool.class_name(outer)?.to_string())
                        },
                        inner_name: if inner_name == 0 {
                            None
                        } else {
                            Some(pool.utf8(inner_name)?.to_string())
                        },
                        access,
                    });
                }
            }
            "BootstrapMethods" => {
                let count = ar.u16()? as usize;
                for _ in 0..count {
                    let handle = pool.constant(ar.u16()?)?;
                    let arg_count = ar.u16()? as usize;
                    let mut args = Vec::with_capacity(arg_count);
                    for _ in 0..arg_count {
                        args.push(pool.constant(ar.u16()?)?);
                    }
                    node.bootstrap_methods.push(BootstrapMethod { handle, args });
                }
            }
            _ => node.attrs.push(RawAttribute {
                name: attr_name.clone(),
                data,
            }),
        }
    }

    node.orig_pool = Some(pool);
    Ok(node)
}

fn read_attribute(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<(String, Vec<u8>)> {
    let name = pool.utf8(r.u16()?)?.to_string();
    let len = r.u32()? as usize;
    Ok((name, r.bytes(len)?.to_vec()))
}

fn read_field(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<FieldNode> {
    let access = FieldAccess::from_bits_truncate(r.u16()?);
    let name = pool.utf8(r.u16()?)?.to_string();
    let desc = pool.utf8(r.u16()?)?.to_string();
    let mut field = FieldNode::new(access, name, desc);
    let attr_count = r.u16()? as usize;
    for _ in 0..attr_count {
        let (attr_name, data) = read_attribute(r, pool)?;
        let mut ar = ByteReader::new(&data);
        match attr_name.as_str() {
            "ConstantValue" => field.constant = Some(pool.constant(ar.u16()?)?),
            "Signature" => field.signature = Some(pool.utf8(ar.u16()?)?.to_string()),
            "RuntimeVisibleAnnotations" => {
                field.visible_annotations = read_annotations(&mut ar, pool)?
            }
            "RuntimeInvisibleAnnotations" => {
                field.invisible_annotations = read_annotations(&mut ar, pool)?
            }
            _ => field.attrs.push(RawAttribute {
                name: attr_name.clone(),
                data,
            }),
        }
    }
    Ok(field)
}

fn read_method(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<MethodNode> {
    let access = MethodAccess::from_bits_truncate(r.u16()?);
    let name = pool.utf8(r.u16()?)?.to_string();
    let desc = pool.utf8(r.u16()?)?.to_string();
    let mut method = MethodNode::new(access, name, desc);
    let attr_count = r.u16()? as usize;
    for _ in 0..attr_count {
        let (attr_name, data) = read_attribute(r, pool)?;
        let mut ar = ByteReader::new(&data);
        match attr_name.as_str() {
            "Code" => method.code = Some(read_code(&mut ar, pool)?),
            "Exceptions" => {
                let count = ar.u16()? as usize;
                for _ in 0..count {
                    method.exceptions.push(pool.class_name(ar.u16()?)?.to_string());
                }
            }
            "Signature" => method.signature = Some(pool.utf8(ar.u16()?)?.to_string()),
            "RuntimeVisibleAnnotations" => {
                method.visible_annotations = read_annotations(&mut ar, pool)?
            }
            "RuntimeInvisibleAnnotations" => {
                method.invisible_annotations = read_annotations(&mut ar, pool)?
            }
            _ => method.attrs.push(RawAttribute {
                name: attr_name.clone(),
                data,
            }),
        }
    }
    Ok(method)
}

fn read_code(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<CodeBody> {
    let max_stack = r.u16()?;
    let max_locals = r.u16()?;
    let code_len = r.u32()? as usize;
    let code = r.bytes(code_len)?;

    let handler_count = r.u16()? as usize;
    let mut raw_handlers = Vec::with_capacity(handler_count);
    for _ in 0..handler_count {
        raw_handlers.push((r.u16()?, r.u16()?, r.u16()?, r.u16()?));
    }

    // code sub-attributes come before we can finish the instruction list,
    // since the line and local tables contribute label offsets
    let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
    let mut raw_locals: Vec<(u16, u16, String, String, u16)> = Vec::new();
    let mut raw_attrs = Vec::new();
    let attr_count = r.u16()? as usize;
    for _ in 0..attr_count {
        let (attr_name, data) = read_attribute(r, pool)?;
        let mut ar = ByteReader::new(&data);
        match attr_name.as_str() {
            "LineNumberTable" => {
                let count = ar.u16()? as usize;
                for _ in 0..count {
                    let start_pc = ar.u16()? as usize;
                    let line = ar.u16()?;
                    lines.entry(start_pc).or_default().push(line);
                }
            }
            "LocalVariableTable" => {
                let count = ar.u16()? as usize;
                for _ in 0..count {
                    let start_pc = ar.u16()?;
                    let length = ar.u16()?;
                    let name = pool.utf8(ar.u16()?)?.to_string();
                    let desc = pool.utf8(ar.u16()?)?.to_string();
                    let slot = ar.u16()?;
                    raw_locals.push((start_pc, length, name, desc, slot));
                }
            }
            _ => raw_attrs.push(RawAttribute {
                name: attr_name.clone(),
                data,
            }),
        }
    }

    // offsets that need a label: jump targets, handler boundaries, local
    // variable ranges
    let mut label_offsets: BTreeSet<usize> = BTreeSet::new();
    let mut off = 0;
    while off < code.len() {
        let (next, targets) = scan_insn(code, off)?;
        for target in targets {
            if target < 0 || target as usize > code.len() {
                return Err(Error::bad_class(
                    format!("jump target {target} outside code"),
                    off,
                ));
            }
            label_offsets.insert(target as usize);
        }
        off = next;
    }
    for (start, end, handler, _) in &raw_handlers {
        label_offsets.insert(*start as usize);
        label_offsets.insert(*end as usize);
        label_offsets.insert(*handler as usize);
    }
    for (start_pc, length, ..) in &raw_locals {
        label_offsets.insert(*start_pc as usize);
        label_offsets.insert(*start_pc as usize + *length as usize);
    }

    let mut insns = InsnList::new();
    let mut labels: HashMap<usize, LabelId> = HashMap::new();
    for offset in &label_offsets {
        let label = insns.new_label();
        labels.insert(*offset, label);
    }

    let mut off = 0;
    while off < code.len() {
        if let Some(label) = labels.get(&off) {
            insns.push_back(Insn::Label(*label));
        }
        if let Some(line_list) = lines.get(&off) {
            for line in line_list {
                insns.push_back(Insn::Line(*line));
            }
        }
        let (insn, next) = decode_insn(code, off, pool, &labels)?;
        insns.push_back(insn);
        off = next;
    }
    if let Some(label) = labels.get(&code.len()) {
        insns.push_back(Insn::Label(*label));
    }

    let mut try_catch = Vec::with_capacity(raw_handlers.len());
    for (start, end, handler, catch_idx) in raw_handlers {
        try_catch.push(TryCatchBlock {
            start: labels[&(start as usize)],
            end: labels[&(end as usize)],
            handler: labels[&(handler as usize)],
            catch_type: if catch_idx == 0 {
                None
            } else {
                Some(pool.class_name(catch_idx)?.to_string())
            },
        });
    }

    let mut locals = Vec::with_capacity(raw_locals.len());
    for (start_pc, length, name, desc, slot) in raw_locals {
        locals.push(LocalVariableEntry {
            name,
            desc,
            start: labels[&(start_pc as usize)],
            end: labels[&(start_pc as usize + length as usize)],
            slot,
        });
    }

    Ok(CodeBody {
        max_stack,
        max_locals,
        insns,
        try_catch,
        locals,
        attrs: raw_attrs,
        modified: false,
    })
}

/// Length-and-targets scan of one raw instruction, used to place labels
/// before the real decoding pass.
fn scan_insn(code: &[u8], off: usize) -> Result<(usize, Vec<i64>)> {
    let mut r = ByteReader::new(&code[off..]);
    let op = r.u8()?;
    let base = off as i64;
    let mut targets = Vec::new();
    let next = match op {
        // nop..dconst_1, array ops, stack ops, arithmetic, conversions,
        // comparisons, returns, arraylength, athrow, monitors
        0x00..=0x0f
        | 0x1a..=0x35
        | 0x3b..=0x83
        | 0x85..=0x98
        | 0xac..=0xb1
        | 0xbe
        | 0xbf
        | 0xc2
        | 0xc3 => off + 1,
        // bipush, ldc, loads/stores with u8 slot, ret, newarray
        0x10 | 0x12 | 0x15..=0x19 | 0x36..=0x3a | 0xa9 | 0xbc => off + 2,
        // sipush, ldc_w, ldc2_w, iinc, member refs, new, anewarray,
        // checkcast, instanceof
        0x11 | 0x13 | 0x14 | 0x84 | 0xb2..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1 => off + 3,
        // two-byte-offset jumps
        0x99..=0xa8 | 0xc6 | 0xc7 => {
            targets.push(base + r.i16()? as i64);
            off + 3
        }
        0xaa => {
            // tableswitch
            let pad = (4 - (off + 1) % 4) % 4;
            r.skip(pad)?;
            targets.push(base + r.i32()? as i64);
            let low = r.i32()?;
            let high = r.i32()?;
            if high < low {
                return Err(Error::bad_class("tableswitch bounds inverted", off));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            for _ in 0..count {
                targets.push(base + r.i32()? as i64);
            }
            off + 1 + pad + 12 + count * 4
        }
        0xab => {
            // lookupswitch
            let pad = (4 - (off + 1) % 4) % 4;
            r.skip(pad)?;
            targets.push(base + r.i32()? as i64);
            let npairs = r.i32()?;
            if npairs < 0 {
                return Err(Error::bad_class("negative lookupswitch pair count", off));
            }
            for _ in 0..npairs {
                r.skip(4)?;
                targets.push(base + r.i32()? as i64);
            }
            off + 1 + pad + 8 + npairs as usize * 8
        }
        // invokeinterface, invokedynamic
        0xb9 | 0xba => off + 5,
        0xc4 => {
            // wide
            let sub = r.u8()?;
            if sub == 0x84 {
                off + 6
            } else {
                off + 4
            }
        }
        0xc5 => off + 4,
        // goto_w, jsr_w
        0xc8 | 0xc9 => {
            targets.push(base + r.i32()? as i64);
            off + 5
        }
        other => return Err(Error::UnknownOpcode { op: other, offset: off }),
    };
    Ok((next, targets))
}

fn opcode_of(raw: u8, off: usize) -> Result<Opcode> {
    Opcode::try_from(raw).map_err(|_| Error::UnknownOpcode { op: raw, offset: off })
}

fn decode_insn(
    code: &[u8],
    off: usize,
    pool: &ConstantPool,
    labels: &HashMap<usize, LabelId>,
) -> Result<(Insn, usize)> {
    let mut r = ByteReader::new(&code[off..]);
    let op = r.u8()?;
    let jump_label = |rel: i64| -> Result<LabelId> {
        let target = off as i64 + rel;
        labels
            .get(&(target as usize))
            .copied()
            .ok_or_else(|| Error::bad_class(format!("unresolved jump target {target}"), off))
    };
    let insn = match op {
        0x00..=0x0f
        | 0x2e..=0x35
        | 0x4f..=0x83
        | 0x85..=0x98
        | 0xac..=0xb1
        | 0xbe
        | 0xbf
        | 0xc2
        | 0xc3 => Insn::Simple(opcode_of(op, off)?),
        0x10 => Insn::Int(Opcode::BIPUSH, r.i8()? as i32),
        0x11 => Insn::Int(Opcode::SIPUSH, r.i16()? as i32),
        0x12 => Insn::Ldc(pool.constant(r.u8()? as u16)?),
        0x13 | 0x14 => Insn::Ldc(pool.constant(r.u16()?)?),
        0x15..=0x19 | 0x36..=0x3a => Insn::Var(opcode_of(op, off)?, r.u8()? as u16),
        0x1a..=0x2d => {
            let kind = (op - 0x1a) / 4;
            let slot = ((op - 0x1a) % 4) as u16;
            Insn::Var(opcode_of(0x15 + kind, off)?, slot)
        }
        0x3b..=0x4e => {
            let kind = (op - 0x3b) / 4;
            let slot = ((op - 0x3b) % 4) as u16;
            Insn::Var(opcode_of(0x36 + kind, off)?, slot)
        }
        0x84 => Insn::Iinc {
            slot: r.u8()? as u16,
            delta: r.i8()? as i16,
        },
        0x99..=0xa8 | 0xc6 | 0xc7 => {
            let target = jump_label(r.i16()? as i64)?;
            Insn::Jump(opcode_of(op, off)?, target)
        }
        0xa9 => Insn::Var(Opcode::RET, r.u8()? as u16),
        0xaa => {
            let pad = (4 - (off + 1) % 4) % 4;
            r.skip(pad)?;
            let default = jump_label(r.i32()? as i64)?;
            let low = r.i32()?;
            let high = r.i32()?;
            let mut targets = Vec::with_capacity((high - low + 1) as usize);
            for _ in low..=high {
                targets.push(jump_label(r.i32()? as i64)?);
            }
            Insn::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        0xab => {
            let pad = (4 - (off + 1) % 4) % 4;
            r.skip(pad)?;
            let default = jump_label(r.i32()? as i64)?;
            let npairs = r.i32()?;
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = r.i32()?;
                pairs.push((key, jump_label(r.i32()? as i64)?));
            }
            Insn::LookupSwitch { default, pairs }
        }
        0xb2..=0xb5 => {
            let (owner, name, desc, _) = pool.member_ref(r.u16()?)?;
            Insn::Field {
                op: opcode_of(op, off)?,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
            }
        }
        0xb6..=0xb8 => {
            let (owner, name, desc, itf) = pool.member_ref(r.u16()?)?;
            Insn::Method {
                op: opcode_of(op, off)?,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
                itf,
            }
        }
        0xb9 => {
            let (owner, name, desc, _) = pool.member_ref(r.u16()?)?;
            r.skip(2)?;
            Insn::Method {
                op: Opcode::INVOKEINTERFACE,
                owner: owner.to_string(),
                name: name.to_string(),
                desc: desc.to_string(),
                itf: true,
            }
        }
        0xba => {
            let idx = r.u16()?;
            r.skip(2)?;
            match pool.get(idx)? {
                PoolEntry::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    let (name, desc) = pool.name_and_type(*name_and_type)?;
                    Insn::InvokeDynamic {
                        name: name.to_string(),
                        desc: desc.to_string(),
                        bootstrap: *bootstrap,
                    }
                }
                other => {
                    return Err(Error::bad_class(
                        format!("invokedynamic references {other:?}"),
                        off,
                    ))
                }
            }
        }
        0xbb | 0xbd | 0xc0 | 0xc1 => Insn::Type {
            op: opcode_of(op, off)?,
            ty: pool.class_name(r.u16()?)?.to_string(),
        },
        0xbc => Insn::Int(Opcode::NEWARRAY, r.u8()? as i32),
        0xc4 => {
            let sub = r.u8()?;
            match sub {
                0x84 => Insn::Iinc {
                    slot: r.u16()?,
                    delta: r.i16()?,
                },
                0x15..=0x19 | 0x36..=0x3a | 0xa9 => {
                    Insn::Var(opcode_of(sub, off)?, r.u16()?)
                }
                other => return Err(Error::UnknownOpcode { op: other, offset: off }),
            }
        }
        0xc5 => Insn::MultiANewArray {
            desc: pool.class_name(r.u16()?)?.to_string(),
            dims: r.u8()?,
        },
        0xc8 => Insn::Jump(Opcode::GOTO, jump_label(r.i32()? as i64)?),
        0xc9 => Insn::Jump(Opcode::JSR, jump_label(r.i32()? as i64)?),
        other => return Err(Error::UnknownOpcode { op: other, offset: off }),
    };
    Ok((insn, off + r.pos()))
}
