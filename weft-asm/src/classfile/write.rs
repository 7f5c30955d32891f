//! Class-file encoder.
//!
//! The pool is assembled last but written first: the body is encoded into a
//! side buffer while interning pool entries, then the pieces are stitched
//! together.

use std::collections::HashMap;

use crate::annotation::write_annotations;
use crate::bytes::ByteWriter;
use crate::descriptor::MethodDescriptor;
use crate::error::{Error, Result};
use crate::insn::{Insn, InsnId, LabelId};
use crate::opcode::Opcode;
use crate::pool::{PoolBuilder, PoolConstant};

use super::{ClassNode, CodeBody, FieldNode, MethodNode};

const MAGIC: u32 = 0xcafe_babe;

/// Encode a class tree back to bytes.
pub fn encode(class: &ClassNode) -> Result<Vec<u8>> {
    let mut pool = match &class.orig_pool {
        Some(orig) => PoolBuilder::from_pool(orig),
        None => PoolBuilder::new(),
    };

    let mut body = ByteWriter::new();
    body.u16(class.access.bits());
    body.u16(pool.class(&class.name)?);
    match &class.superclass {
        Some(name) => {
            let idx = pool.class(name)?;
            body.u16(idx);
        }
        None => body.u16(0),
    }
    body.u16(class.interfaces.len() as u16);
    for itf in &class.interfaces {
        let idx = pool.class(itf)?;
        body.u16(idx);
    }

    body.u16(class.fields.len() as u16);
    for field in &class.fields {
        write_field(&mut body, field, &mut pool)?;
    }

    body.u16(class.methods.len() as u16);
    for method in &class.methods {
        write_method(&mut body, method, &class.name, &mut pool)?;
    }

    let mut attrs: Vec<(String, Vec<u8>)> = Vec::new();
    if let Some(source_file) = &class.source_file {
        let mut w = ByteWriter::new();
        w.u16(pool.utf8(source_file)?);
        attrs.push(("SourceFile".to_string(), w.into_inner()));
    }
    if let Some(signature) = &class.signature {
        let mut w = ByteWriter::new();
        w.u16(pool.utf8(signature)?);
        attrs.push(("Signature".to_string(), w.into_inner()));
    }
    if !class.visible_annotations.is_empty() {
        attrs.push((
            "RuntimeVisibleAnnotations".to_string(),
            write_annotations(&class.visible_annotations, &mut pool)?,
        ));
    }
    if !class.invisible_annotations.is_empty() {
        attrs.push((
            "RuntimeInvisibleAnnotations".to_string(),
            write_annotations(&class.invisible_annotations, &mut pool)?,
        ));
    }
    if !class.inner_classes.is_empty() {
        let mut w = ByteWriter::new();
        w.u16(class.inner_classes.len() as u16);
        for inner in &class.inner_classes {
            let name = pool.class(&inner.name)?;
            w.u16(name);
            match &inner.outer {
                Some(outer) => {
                    let idx = pool.class(outer)?;
                    w.u16(idx);
                }
                None => w.u16(0),
            }
            match &inner.inner_name {
                Some(inner_name) => {
                    let idx = pool.utf8(inner_name)?;
                    w.u16(idx);
                }
                None => w.u16(0),
            }
            w.u16(inner.access);
        }
        attrs.push(("InnerClasses".to_string(), w.into_inner()));
    }
    if !class.bootstrap_methods.is_empty() {
        let mut w = ByteWriter::new();
        w.u16(class.bootstrap_methods.len() as u16);
        for bsm in &class.bootstrap_methods {
            let handle = pool.constant(&bsm.handle)?;
            w.u16(handle);
            w.u16(bsm.args.len() as u16);
            for arg in &bsm.args {
                let idx = pool.constant(arg)?;
                w.u16(idx);
            }
        }
        attrs.push(("BootstrapMethods".to_string(), w.into_inner()));
    }
    for raw in &class.attrs {
        attrs.push((raw.name.clone(), raw.data.clone()));
    }
    write_attrs(&mut body, &attrs, &mut pool)?;

    let mut out = ByteWriter::new();
    out.u32(MAGIC);
    out.u16(class.minor);
    out.u16(class.major);
    pool.write(&mut out);
    out.bytes(&body.into_inner());
    Ok(out.into_inner())
}

fn write_attrs(
    w: &mut ByteWriter,
    attrs: &[(String, Vec<u8>)],
    pool: &mut PoolBuilder,
) -> Result<()> {
    w.u16(attrs.len() as u16);
    for (name, data) in attrs {
        w.u16(pool.utf8(name)?);
        w.u32(data.len() as u32);
        w.bytes(data);
    }
    Ok(())
}

fn write_field(w: &mut ByteWriter, field: &FieldNode, pool: &mut PoolBuilder) -> Result<()> {
    w.u16(field.access.bits());
    w.u16(pool.utf8(&field.name)?);
    w.u16(pool.utf8(&field.desc)?);

    let mut attrs: Vec<(String, Vec<u8>)> = Vec::new();
    if let Some(constant) = &field.constant {
        let mut cw = ByteWriter::new();
        cw.u16(pool.constant(constant)?);
        attrs.push(("ConstantValue".to_string(), cw.into_inner()));
    }
    if let Some(signature) = &field.signature {
        let mut sw = ByteWriter::new();
        sw.u16(pool.utf8(signature)?);
        attrs.push(("Signature".to_string(), sw.into_inner()));
    }
    if !field.visible_annotations.is_empty() {
        attrs.push((
            "RuntimeVisibleAnnotations".to_string(),
            write_annotations(&field.visible_annotations, pool)?,
        ));
    }
    if !field.invisible_annotations.is_empty() {
        attrs.push((
            "RuntimeInvisibleAnnotations".to_string(),
            write_annotations(&field.invisible_annotations, pool)?,
        ));
    }
    for raw in &field.attrs {
        attrs.push((raw.name.clone(), raw.data.clone()));
    }
    write_attrs(w, &attrs, pool)
}

fn write_method(
    w: &mut ByteWriter,
    method: &MethodNode,
    owner: &str,
    pool: &mut PoolBuilder,
) -> Result<()> {
    w.u16(method.access.bits());
    w.u16(pool.utf8(&method.name)?);
    w.u16(pool.utf8(&method.desc)?);

    let mut attrs: Vec<(String, Vec<u8>)> = Vec::new();
    if let Some(code) = &method.code {
        let who = format!("{owner}.{}{}", method.name, method.desc);
        attrs.push(("Code".to_string(), encode_code(&who, code, pool)?));
    }
    if !method.exceptions.is_empty() {
        let mut ew = ByteWriter::new();
        ew.u16(method.exceptions.len() as u16);
        for exception in &method.exceptions {
            let idx = pool.class(exception)?;
            ew.u16(idx);
        }
        attrs.push(("Exceptions".to_string(), ew.into_inner()));
    }
    if let Some(signature) = &method.signature {
        let mut sw = ByteWriter::new();
        sw.u16(pool.utf8(signature)?);
        attrs.push(("Signature".to_string(), sw.into_inner()));
    }
    if !method.visible_annotations.is_empty() {
        attrs.push((
            "RuntimeVisibleAnnotations".to_string(),
            write_annotations(&method.visible_annotations, pool)?,
        ));
    }
    if !method.invisible_annotations.is_empty() {
        attrs.push((
            "RuntimeInvisibleAnnotations".to_string(),
            write_annotations(&method.invisible_annotations, pool)?,
        ));
    }
    for raw in &method.attrs {
        attrs.push((raw.name.clone(), raw.data.clone()));
    }
    write_attrs(w, &attrs, pool)
}

fn unencodable(who: &str, reason: impl Into<String>) -> Error {
    Error::Unencodable {
        method: who.to_string(),
        reason: reason.into(),
    }
}

fn encode_code(who: &str, code: &CodeBody, pool: &mut PoolBuilder) -> Result<Vec<u8>> {
    // pass 1: exact offsets; switch padding depends only on offsets before it
    let mut insn_offsets: HashMap<InsnId, usize> = HashMap::new();
    let mut label_offsets: HashMap<LabelId, usize> = HashMap::new();
    let mut line_table: Vec<(usize, u16)> = Vec::new();
    let mut off = 0usize;
    for (id, insn) in code.insns.iter() {
        match insn {
            Insn::Label(label) => {
                label_offsets.insert(*label, off);
            }
            Insn::Line(line) => line_table.push((off, *line)),
            real => {
                insn_offsets.insert(id, off);
                off += insn_size(real, off, pool)?;
            }
        }
    }
    let code_len = off;
    if code_len > u16::MAX as usize {
        // the format allows more, but offset-based sub-attributes don't
        return Err(unencodable(who, format!("code size {code_len} exceeds 65535")));
    }

    let resolve = |label: LabelId| -> Result<usize> {
        label_offsets
            .get(&label)
            .copied()
            .ok_or_else(|| unencodable(who, format!("jump references {label:?} which is not in the list")))
    };

    // pass 2: bytes
    let mut cw = ByteWriter::new();
    for (id, insn) in code.insns.iter() {
        if insn.is_marker() {
            continue;
        }
        let at = insn_offsets[&id];
        write_insn(&mut cw, who, insn, at, pool, &resolve)?;
    }
    debug_assert_eq!(cw.len(), code_len);

    let mut w = ByteWriter::new();
    w.u16(code.max_stack);
    w.u16(code.max_locals);
    w.u32(code_len as u32);
    w.bytes(&cw.into_inner());

    w.u16(code.try_catch.len() as u16);
    for handler in &code.try_catch {
        w.u16(resolve(handler.start)? as u16);
        w.u16(resolve(handler.end)? as u16);
        w.u16(resolve(handler.handler)? as u16);
        match &handler.catch_type {
            Some(ty) => {
                let idx = pool.class(ty)?;
                w.u16(idx);
            }
            None => w.u16(0),
        }
    }

    let mut attrs: Vec<(String, Vec<u8>)> = Vec::new();
    if !line_table.is_empty() {
        let mut lw = ByteWriter::new();
        lw.u16(line_table.len() as u16);
        for (pc, line) in &line_table {
            lw.u16(*pc as u16);
            lw.u16(*line);
        }
        attrs.push(("LineNumberTable".to_string(), lw.into_inner()));
    }
    if !code.locals.is_empty() {
        let mut vw = ByteWriter::new();
        vw.u16(code.locals.len() as u16);
        for entry in &code.locals {
            let start = resolve(entry.start)?;
            let end = resolve(entry.end)?;
            vw.u16(start as u16);
            vw.u16(end.saturating_sub(start) as u16);
            vw.u16(pool.utf8(&entry.name)?);
            vw.u16(pool.utf8(&entry.desc)?);
            vw.u16(entry.slot);
        }
        attrs.push(("LocalVariableTable".to_string(), vw.into_inner()));
    }
    if !code.modified {
        // offset-bearing attributes only survive when the body is untouched
        for raw in &code.attrs {
            attrs.push((raw.name.clone(), raw.data.clone()));
        }
    }
    write_attrs(&mut w, &attrs, pool)?;
    Ok(w.into_inner())
}

fn ldc_size(constant: &PoolConstant, pool: &mut PoolBuilder) -> Result<usize> {
    if constant.is_wide() {
        return Ok(3);
    }
    let idx = pool.constant(constant)?;
    Ok(if idx <= u8::MAX as u16 { 2 } else { 3 })
}

fn insn_size(insn: &Insn, off: usize, pool: &mut PoolBuilder) -> Result<usize> {
    Ok(match insn {
        Insn::Simple(_) => 1,
        Insn::Var(op, slot) => {
            if *op != Opcode::RET && *slot <= 3 {
                1
            } else if *slot <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Insn::Iinc { slot, delta } => {
            if *slot <= u8::MAX as u16 && (i8::MIN as i16..=i8::MAX as i16).contains(delta) {
                3
            } else {
                6
            }
        }
        Insn::Int(Opcode::SIPUSH, _) => 3,
        Insn::Int(..) => 2,
        Insn::Ldc(constant) => ldc_size(constant, pool)?,
        Insn::Field { .. } | Insn::Type { .. } | Insn::Jump(..) => 3,
        Insn::Method { op, .. } => {
            if *op == Opcode::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::MultiANewArray { .. } => 4,
        Insn::TableSwitch { targets, .. } => {
            let pad = (4 - (off + 1) % 4) % 4;
            1 + pad + 12 + targets.len() * 4
        }
        Insn::LookupSwitch { pairs, .. } => {
            let pad = (4 - (off + 1) % 4) % 4;
            1 + pad + 8 + pairs.len() * 8
        }
        Insn::Label(_) | Insn::Line(_) => 0,
    })
}

fn write_insn(
    w: &mut ByteWriter,
    who: &str,
    insn: &Insn,
    at: usize,
    pool: &mut PoolBuilder,
    resolve: &dyn Fn(LabelId) -> Result<usize>,
) -> Result<()> {
    match insn {
        Insn::Simple(op) => w.u8(*op as u8),
        Insn::Var(op, slot) => {
            if *op != Opcode::RET && *slot <= 3 {
                let base = if op.is_local_load() {
                    0x1a + (*op as u8 - Opcode::ILOAD as u8) * 4
                } else {
                    0x3b + (*op as u8 - Opcode::ISTORE as u8) * 4
                };
                w.u8(base + *slot as u8);
            } else if *slot <= u8::MAX as u16 {
                w.u8(*op as u8);
                w.u8(*slot as u8);
            } else {
                w.u8(0xc4);
                w.u8(*op as u8);
                w.u16(*slot);
            }
        }
        Insn::Iinc { slot, delta } => {
            if *slot <= u8::MAX as u16 && (i8::MIN as i16..=i8::MAX as i16).contains(delta) {
                w.u8(Opcode::IINC as u8);
                w.u8(*slot as u8);
                w.i8(*delta as i8);
            } else {
                w.u8(0xc4);
                w.u8(Opcode::IINC as u8);
                w.u16(*slot);
                w.i16(*delta);
            }
        }
        Insn::Int(Opcode::SIPUSH, value) => {
            w.u8(Opcode::SIPUSH as u8);
            w.i16(*value as i16);
        }
        Insn::Int(op, value) => {
            w.u8(*op as u8);
            w.i8(*value as i8);
        }
        Insn::Ldc(constant) => {
            let idx = pool.constant(constant)?;
            if constant.is_wide() {
                w.u8(0x14);
                w.u16(idx);
            } else if idx <= u8::MAX as u16 {
                w.u8(0x12);
                w.u8(idx as u8);
            } else {
                w.u8(0x13);
                w.u16(idx);
            }
        }
        Insn::Field {
            op,
            owner,
            name,
            desc,
        } => {
            w.u8(*op as u8);
            let idx = pool.field_ref(owner, name, desc)?;
            w.u16(idx);
        }
        Insn::Method {
            op,
            owner,
            name,
            desc,
            itf,
        } => {
            w.u8(*op as u8);
            let idx = pool.method_ref(owner, name, desc, *itf)?;
            w.u16(idx);
            if *op == Opcode::INVOKEINTERFACE {
                let parsed = MethodDescriptor::parse(desc)?;
                w.u8(1 + parsed.arg_slots() as u8);
                w.u8(0);
            }
        }
        Insn::InvokeDynamic {
            name,
            desc,
            bootstrap,
        } => {
            w.u8(Opcode::INVOKEDYNAMIC as u8);
            let idx = pool.dynamic(*bootstrap, name, desc, true)?;
            w.u16(idx);
            w.u16(0);
        }
        Insn::Type { op, ty } => {
            w.u8(*op as u8);
            let idx = pool.class(ty)?;
            w.u16(idx);
        }
        Insn::MultiANewArray { desc, dims } => {
            w.u8(Opcode::MULTIANEWARRAY as u8);
            let idx = pool.class(desc)?;
            w.u16(idx);
            w.u8(*dims);
        }
        Insn::Jump(op, target) => {
            let rel = resolve(*target)? as i64 - at as i64;
            if !(i16::MIN as i64..=i16::MAX as i64).contains(&rel) {
                return Err(unencodable(who, format!("jump offset {rel} exceeds 16 bits")));
            }
            w.u8(*op as u8);
            w.i16(rel as i16);
        }
        Insn::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            w.u8(Opcode::TABLESWITCH as u8);
            let pad = (4 - (at + 1) % 4) % 4;
            for _ in 0..pad {
                w.u8(0);
            }
            w.i32((resolve(*default)? as i64 - at as i64) as i32);
            w.i32(*low);
            w.i32(*high);
            for target in targets {
                w.i32((resolve(*target)? as i64 - at as i64) as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            w.u8(Opcode::LOOKUPSWITCH as u8);
            let pad = (4 - (at + 1) % 4) % 4;
            for _ in 0..pad {
                w.u8(0);
            }
            w.i32((resolve(*default)? as i64 - at as i64) as i32);
            w.i32(pairs.len() as i32);
            for (key, target) in pairs {
                w.i32(*key);
                w.i32((resolve(*target)? as i64 - at as i64) as i32);
            }
        }
        Insn::Label(_) | Insn::Line(_) => {}
    }
    Ok(())
}
