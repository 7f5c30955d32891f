//! Constant pool model, reader and deduplicating builder.
//!
//! Decoding keeps the original pool around so that opaque attributes whose
//! payload embeds pool indices stay valid; encoding seeds the builder with
//! those entries and appends anything new behind them.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{Error, Result};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// One raw pool slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEntry {
    /// Slot 0 and the shadow slot after every long/double entry.
    Unused,
    /// Modified-UTF8 string.
    Utf8(String),
    /// 32-bit integer.
    Integer(i32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit integer; occupies two slots.
    Long(i64),
    /// 64-bit float; occupies two slots.
    Double(f64),
    /// Class reference; index of the name.
    Class(u16),
    /// String literal; index of the payload.
    Str(u16),
    /// Field reference.
    FieldRef {
        /// Owning class slot.
        class: u16,
        /// Name-and-type slot.
        name_and_type: u16,
    },
    /// Class method reference.
    MethodRef {
        /// Owning class slot.
        class: u16,
        /// Name-and-type slot.
        name_and_type: u16,
    },
    /// Interface method reference.
    InterfaceMethodRef {
        /// Owning class slot.
        class: u16,
        /// Name-and-type slot.
        name_and_type: u16,
    },
    /// Name/descriptor pair.
    NameAndType {
        /// Name slot.
        name: u16,
        /// Descriptor slot.
        desc: u16,
    },
    /// Method handle.
    MethodHandle {
        /// Reference kind, 1..=9.
        kind: u8,
        /// Member-reference slot.
        reference: u16,
    },
    /// Method type; index of the descriptor.
    MethodType(u16),
    /// Dynamically-computed constant.
    Dynamic {
        /// Bootstrap-method attribute index.
        bootstrap: u16,
        /// Name-and-type slot.
        name_and_type: u16,
    },
    /// Dynamically-computed call site.
    InvokeDynamic {
        /// Bootstrap-method attribute index.
        bootstrap: u16,
        /// Name-and-type slot.
        name_and_type: u16,
    },
    /// Module reference.
    Module(u16),
    /// Package reference.
    Package(u16),
}

/// A resolved loadable constant, as carried by `ldc` and field initializers.
#[derive(Debug, Clone)]
pub enum PoolConstant {
    /// int-class constant (also covers byte/short/char/boolean initializers).
    Int(i32),
    /// long constant.
    Long(i64),
    /// float constant.
    Float(f32),
    /// double constant.
    Double(f64),
    /// String literal.
    Str(String),
    /// Class literal; internal name or array descriptor.
    Class(String),
    /// Method type literal.
    MethodType(String),
    /// Method handle literal.
    MethodHandle {
        /// Reference kind, 1..=9.
        kind: u8,
        /// Owner internal name.
        owner: String,
        /// Member name.
        name: String,
        /// Member descriptor.
        desc: String,
        /// Flag whether the member reference is an interface-method ref.
        itf: bool,
    },
    /// Dynamically-computed constant, carried opaquely.
    Dynamic {
        /// Bootstrap-method attribute index.
        bootstrap: u16,
        /// Constant name.
        name: String,
        /// Constant descriptor.
        desc: String,
    },
}

impl PartialEq for PoolConstant {
    fn eq(&self, other: &Self) -> bool {
        use PoolConstant::*;
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Class(a), Class(b)) => a == b,
            (MethodType(a), MethodType(b)) => a == b,
            (
                MethodHandle {
                    kind: ka,
                    owner: oa,
                    name: na,
                    desc: da,
                    itf: ia,
                },
                MethodHandle {
                    kind: kb,
                    owner: ob,
                    name: nb,
                    desc: db,
                    itf: ib,
                },
            ) => ka == kb && oa == ob && na == nb && da == db && ia == ib,
            (
                Dynamic {
                    bootstrap: ba,
                    name: na,
                    desc: da,
                },
                Dynamic {
                    bootstrap: bb,
                    name: nb,
                    desc: db,
                },
            ) => ba == bb && na == nb && da == db,
            _ => false,
        }
    }
}

impl Eq for PoolConstant {}

impl Hash for PoolConstant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            PoolConstant::Int(v) => v.hash(state),
            PoolConstant::Long(v) => v.hash(state),
            PoolConstant::Float(v) => v.to_bits().hash(state),
            PoolConstant::Double(v) => v.to_bits().hash(state),
            PoolConstant::Str(v) | PoolConstant::Class(v) | PoolConstant::MethodType(v) => {
                v.hash(state)
            }
            PoolConstant::MethodHandle {
                kind,
                owner,
                name,
                desc,
                itf,
            } => {
                kind.hash(state);
                owner.hash(state);
                name.hash(state);
                desc.hash(state);
                itf.hash(state);
            }
            PoolConstant::Dynamic {
                bootstrap,
                name,
                desc,
            } => {
                bootstrap.hash(state);
                name.hash(state);
                desc.hash(state);
            }
        }
    }
}

impl PoolConstant {
    /// Flag whether the constant occupies two stack slots.
    pub const fn is_wide(&self) -> bool {
        matches!(self, PoolConstant::Long(_) | PoolConstant::Double(_))
    }

    /// Field descriptor of the constant's type.
    pub fn type_desc(&self) -> String {
        match self {
            PoolConstant::Int(_) => "I".to_string(),
            PoolConstant::Long(_) => "J".to_string(),
            PoolConstant::Float(_) => "F".to_string(),
            PoolConstant::Double(_) => "D".to_string(),
            PoolConstant::Str(_) => "Ljava/lang/String;".to_string(),
            PoolConstant::Class(_) => "Ljava/lang/Class;".to_string(),
            PoolConstant::MethodType(_) => "Ljava/lang/invoke/MethodType;".to_string(),
            PoolConstant::MethodHandle { .. } => "Ljava/lang/invoke/MethodHandle;".to_string(),
            PoolConstant::Dynamic { desc, .. } => desc.clone(),
        }
    }
}

impl fmt::Display for PoolConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolConstant::Int(v) => write!(f, "{v}"),
            PoolConstant::Long(v) => write!(f, "{v}L"),
            PoolConstant::Float(v) => write!(f, "{v}f"),
            PoolConstant::Double(v) => write!(f, "{v}d"),
            PoolConstant::Str(v) => write!(f, "{v:?}"),
            PoolConstant::Class(v) => write!(f, "{v}.class"),
            PoolConstant::MethodType(v) => write!(f, "MethodType({v})"),
            PoolConstant::MethodHandle { owner, name, .. } => {
                write!(f, "MethodHandle({owner}::{name})")
            }
            PoolConstant::Dynamic { name, .. } => write!(f, "Dynamic({name})"),
        }
    }
}

/// A decoded constant pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl ConstantPool {
    /// Read `constant_pool_count` and the entries that follow it.
    pub fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(PoolEntry::Unused);
        while entries.len() < count {
            let offset = r.pos();
            let tag = r.u8()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = r.u16()? as usize;
                    let raw = r.bytes(len)?;
                    PoolEntry::Utf8(mutf8_decode(raw, offset)?)
                }
                TAG_INTEGER => PoolEntry::Integer(r.i32()?),
                TAG_FLOAT => PoolEntry::Float(f32::from_bits(r.u32()?)),
                TAG_LONG => {
                    let hi = r.u32()? as u64;
                    let lo = r.u32()? as u64;
                    PoolEntry::Long(((hi << 32) | lo) as i64)
                }
                TAG_DOUBLE => {
                    let hi = r.u32()? as u64;
                    let lo = r.u32()? as u64;
                    PoolEntry::Double(f64::from_bits((hi << 32) | lo))
                }
                TAG_CLASS => PoolEntry::Class(r.u16()?),
                TAG_STRING => PoolEntry::Str(r.u16()?),
                TAG_FIELDREF => PoolEntry::FieldRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_METHODREF => PoolEntry::MethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INTERFACE_METHODREF => PoolEntry::InterfaceMethodRef {
                    class: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_NAME_AND_TYPE => PoolEntry::NameAndType {
                    name: r.u16()?,
                    desc: r.u16()?,
                },
                TAG_METHOD_HANDLE => PoolEntry::MethodHandle {
                    kind: r.u8()?,
                    reference: r.u16()?,
                },
                TAG_METHOD_TYPE => PoolEntry::MethodType(r.u16()?),
                TAG_DYNAMIC => PoolEntry::Dynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
                    bootstrap: r.u16()?,
                    name_and_type: r.u16()?,
                },
                TAG_MODULE => PoolEntry::Module(r.u16()?),
                TAG_PACKAGE => PoolEntry::Package(r.u16()?),
                other => {
                    return Err(Error::bad_class(
                        format!("unknown constant pool tag {other}"),
                        offset,
                    ))
                }
            };
            let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(PoolEntry::Unused);
            }
        }
        Ok(Self { entries })
    }

    /// Number of slots, including slot zero.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Flag whether the pool holds no entries beyond slot zero.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Raw entry at `idx`.
    pub fn get(&self, idx: u16) -> Result<&PoolEntry> {
        self.entries
            .get(idx as usize)
            .filter(|e| !matches!(e, PoolEntry::Unused))
            .ok_or_else(|| Error::bad_class(format!("invalid constant pool index {idx}"), 0))
    }

    /// Utf8 payload at `idx`.
    pub fn utf8(&self, idx: u16) -> Result<&str> {
        match self.get(idx)? {
            PoolEntry::Utf8(s) => Ok(s),
            other => Err(Error::bad_class(
                format!("pool index {idx} is {other:?}, expected Utf8"),
                0,
            )),
        }
    }

    /// Class internal name at `idx`.
    pub fn class_name(&self, idx: u16) -> Result<&str> {
        match self.get(idx)? {
            PoolEntry::Class(name) => self.utf8(*name),
            other => Err(Error::bad_class(
                format!("pool index {idx} is {other:?}, expected Class"),
                0,
            )),
        }
    }

    /// Name/descriptor pair at `idx`.
    pub fn name_and_type(&self, idx: u16) -> Result<(&str, &str)> {
        match self.get(idx)? {
            PoolEntry::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            other => Err(Error::bad_class(
                format!("pool index {idx} is {other:?}, expected NameAndType"),
                0,
            )),
        }
    }

    /// Member reference at `idx`, resolved to `(owner, name, desc, itf)`.
    pub fn member_ref(&self, idx: u16) -> Result<(&str, &str, &str, bool)> {
        let (class, name_and_type, itf) = match self.get(idx)? {
            PoolEntry::FieldRef {
                class,
                name_and_type,
            }
            | PoolEntry::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            PoolEntry::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            other => {
                return Err(Error::bad_class(
                    format!("pool index {idx} is {other:?}, expected a member reference"),
                    0,
                ))
            }
        };
        let (name, desc) = self.name_and_type(name_and_type)?;
        Ok((self.class_name(class)?, name, desc, itf))
    }

    /// Resolve a loadable constant at `idx`.
    pub fn constant(&self, idx: u16) -> Result<PoolConstant> {
        Ok(match self.get(idx)? {
            PoolEntry::Integer(v) => PoolConstant::Int(*v),
            PoolEntry::Float(v) => PoolConstant::Float(*v),
            PoolEntry::Long(v) => PoolConstant::Long(*v),
            PoolEntry::Double(v) => PoolConstant::Double(*v),
            PoolEntry::Str(payload) => PoolConstant::Str(self.utf8(*payload)?.to_string()),
            PoolEntry::Class(name) => PoolConstant::Class(self.utf8(*name)?.to_string()),
            PoolEntry::MethodType(desc) => {
                PoolConstant::MethodType(self.utf8(*desc)?.to_string())
            }
            PoolEntry::MethodHandle { kind, reference } => {
                let (owner, name, desc, itf) = self.member_ref(*reference)?;
                PoolConstant::MethodHandle {
                    kind: *kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    itf,
                }
            }
            PoolEntry::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                let (name, desc) = self.name_and_type(*name_and_type)?;
                PoolConstant::Dynamic {
                    bootstrap: *bootstrap,
                    name: name.to_string(),
                    desc: desc.to_string(),
                }
            }
            other => {
                return Err(Error::bad_class(
                    format!("pool index {idx} is {other:?}, not a loadable constant"),
                    0,
                ))
            }
        })
    }
}

/// Deduplicating pool builder used by the encoder.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    entries: Vec<PoolEntry>,
    utf8: HashMap<String, u16>,
    integers: HashMap<i32, u16>,
    floats: HashMap<u32, u16>,
    longs: HashMap<i64, u16>,
    doubles: HashMap<u64, u16>,
    classes: HashMap<u16, u16>,
    strings: HashMap<u16, u16>,
    nats: HashMap<(u16, u16), u16>,
    field_refs: HashMap<(u16, u16), u16>,
    method_refs: HashMap<(u16, u16, bool), u16>,
    method_types: HashMap<u16, u16>,
    method_handles: HashMap<(u8, u16), u16>,
    dynamics: HashMap<(u16, u16, bool), u16>,
}

impl PoolBuilder {
    /// Builder with only the unused zero slot.
    pub fn new() -> Self {
        Self {
            entries: vec![PoolEntry::Unused],
            ..Self::default()
        }
    }

    /// Builder seeded with an existing pool, so previously-issued indices
    /// stay valid for opaque attribute payloads.
    pub fn from_pool(pool: &ConstantPool) -> Self {
        let mut this = Self {
            entries: pool.entries.clone(),
            ..Self::default()
        };
        for (idx, entry) in pool.entries.iter().enumerate() {
            let idx = idx as u16;
            match entry {
                PoolEntry::Utf8(s) => {
                    this.utf8.entry(s.clone()).or_insert(idx);
                }
                PoolEntry::Integer(v) => {
                    this.integers.entry(*v).or_insert(idx);
                }
                PoolEntry::Float(v) => {
                    this.floats.entry(v.to_bits()).or_insert(idx);
                }
                PoolEntry::Long(v) => {
                    this.longs.entry(*v).or_insert(idx);
                }
                PoolEntry::Double(v) => {
                    this.doubles.entry(v.to_bits()).or_insert(idx);
                }
                PoolEntry::Class(name) => {
                    this.classes.entry(*name).or_insert(idx);
                }
                PoolEntry::Str(payload) => {
                    this.strings.entry(*payload).or_insert(idx);
                }
                PoolEntry::NameAndType { name, desc } => {
                    this.nats.entry((*name, *desc)).or_insert(idx);
                }
                PoolEntry::FieldRef {
                    class,
                    name_and_type,
                } => {
                    this.field_refs.entry((*class, *name_and_type)).or_insert(idx);
                }
                PoolEntry::MethodRef {
                    class,
                    name_and_type,
                } => {
                    this.method_refs
                        .entry((*class, *name_and_type, false))
                        .or_insert(idx);
                }
                PoolEntry::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    this.method_refs
                        .entry((*class, *name_and_type, true))
                        .or_insert(idx);
                }
                PoolEntry::MethodType(desc) => {
                    this.method_types.entry(*desc).or_insert(idx);
                }
                PoolEntry::MethodHandle { kind, reference } => {
                    this.method_handles.entry((*kind, *reference)).or_insert(idx);
                }
                PoolEntry::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    this.dynamics
                        .entry((*bootstrap, *name_and_type, false))
                        .or_insert(idx);
                }
                PoolEntry::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    this.dynamics
                        .entry((*bootstrap, *name_and_type, true))
                        .or_insert(idx);
                }
                PoolEntry::Unused | PoolEntry::Module(_) | PoolEntry::Package(_) => {}
            }
        }
        this
    }

    fn push(&mut self, entry: PoolEntry) -> Result<u16> {
        let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
        let idx = self.entries.len();
        let slots = if wide { 2 } else { 1 };
        if idx + slots > u16::MAX as usize {
            return Err(Error::bad_class("constant pool overflow", 0));
        }
        self.entries.push(entry);
        if wide {
            self.entries.push(PoolEntry::Unused);
        }
        Ok(idx as u16)
    }

    /// Intern a Utf8 entry.
    pub fn utf8(&mut self, s: &str) -> Result<u16> {
        if let Some(idx) = self.utf8.get(s) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Utf8(s.to_string()))?;
        self.utf8.insert(s.to_string(), idx);
        Ok(idx)
    }

    /// Intern an Integer entry.
    pub fn integer(&mut self, v: i32) -> Result<u16> {
        if let Some(idx) = self.integers.get(&v) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Integer(v))?;
        self.integers.insert(v, idx);
        Ok(idx)
    }

    /// Intern a Float entry.
    pub fn float(&mut self, v: f32) -> Result<u16> {
        if let Some(idx) = self.floats.get(&v.to_bits()) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Float(v))?;
        self.floats.insert(v.to_bits(), idx);
        Ok(idx)
    }

    /// Intern a Long entry.
    pub fn long(&mut self, v: i64) -> Result<u16> {
        if let Some(idx) = self.longs.get(&v) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Long(v))?;
        self.longs.insert(v, idx);
        Ok(idx)
    }

    /// Intern a Double entry.
    pub fn double(&mut self, v: f64) -> Result<u16> {
        if let Some(idx) = self.doubles.get(&v.to_bits()) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Double(v))?;
        self.doubles.insert(v.to_bits(), idx);
        Ok(idx)
    }

    /// Intern a Class entry by internal name.
    pub fn class(&mut self, name: &str) -> Result<u16> {
        let name_idx = self.utf8(name)?;
        if let Some(idx) = self.classes.get(&name_idx) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Class(name_idx))?;
        self.classes.insert(name_idx, idx);
        Ok(idx)
    }

    /// Intern a String entry.
    pub fn string(&mut self, payload: &str) -> Result<u16> {
        let payload_idx = self.utf8(payload)?;
        if let Some(idx) = self.strings.get(&payload_idx) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::Str(payload_idx))?;
        self.strings.insert(payload_idx, idx);
        Ok(idx)
    }

    /// Intern a NameAndType entry.
    pub fn name_and_type(&mut self, name: &str, desc: &str) -> Result<u16> {
        let key = (self.utf8(name)?, self.utf8(desc)?);
        if let Some(idx) = self.nats.get(&key) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::NameAndType {
            name: key.0,
            desc: key.1,
        })?;
        self.nats.insert(key, idx);
        Ok(idx)
    }

    /// Intern a FieldRef entry.
    pub fn field_ref(&mut self, owner: &str, name: &str, desc: &str) -> Result<u16> {
        let key = (self.class(owner)?, self.name_and_type(name, desc)?);
        if let Some(idx) = self.field_refs.get(&key) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::FieldRef {
            class: key.0,
            name_and_type: key.1,
        })?;
        self.field_refs.insert(key, idx);
        Ok(idx)
    }

    /// Intern a MethodRef or InterfaceMethodRef entry.
    pub fn method_ref(&mut self, owner: &str, name: &str, desc: &str, itf: bool) -> Result<u16> {
        let key = (self.class(owner)?, self.name_and_type(name, desc)?, itf);
        if let Some(idx) = self.method_refs.get(&key) {
            return Ok(*idx);
        }
        let entry = if itf {
            PoolEntry::InterfaceMethodRef {
                class: key.0,
                name_and_type: key.1,
            }
        } else {
            PoolEntry::MethodRef {
                class: key.0,
                name_and_type: key.1,
            }
        };
        let idx = self.push(entry)?;
        self.method_refs.insert(key, idx);
        Ok(idx)
    }

    /// Intern a MethodType entry.
    pub fn method_type(&mut self, desc: &str) -> Result<u16> {
        let desc_idx = self.utf8(desc)?;
        if let Some(idx) = self.method_types.get(&desc_idx) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::MethodType(desc_idx))?;
        self.method_types.insert(desc_idx, idx);
        Ok(idx)
    }

    /// Intern a MethodHandle entry.
    pub fn method_handle(
        &mut self,
        kind: u8,
        owner: &str,
        name: &str,
        desc: &str,
        itf: bool,
    ) -> Result<u16> {
        let reference = if (1..=4).contains(&kind) {
            self.field_ref(owner, name, desc)?
        } else {
            self.method_ref(owner, name, desc, itf || kind == 9)?
        };
        let key = (kind, reference);
        if let Some(idx) = self.method_handles.get(&key) {
            return Ok(*idx);
        }
        let idx = self.push(PoolEntry::MethodHandle { kind, reference })?;
        self.method_handles.insert(key, idx);
        Ok(idx)
    }

    /// Intern a Dynamic or InvokeDynamic entry.
    pub fn dynamic(
        &mut self,
        bootstrap: u16,
        name: &str,
        desc: &str,
        call_site: bool,
    ) -> Result<u16> {
        let key = (bootstrap, self.name_and_type(name, desc)?, call_site);
        if let Some(idx) = self.dynamics.get(&key) {
            return Ok(*idx);
        }
        let entry = if call_site {
            PoolEntry::InvokeDynamic {
                bootstrap: key.0,
                name_and_type: key.1,
            }
        } else {
            PoolEntry::Dynamic {
                bootstrap: key.0,
                name_and_type: key.1,
            }
        };
        let idx = self.push(entry)?;
        self.dynamics.insert(key, idx);
        Ok(idx)
    }

    /// Intern a loadable constant.
    pub fn constant(&mut self, c: &PoolConstant) -> Result<u16> {
        match c {
            PoolConstant::Int(v) => self.integer(*v),
            PoolConstant::Long(v) => self.long(*v),
            PoolConstant::Float(v) => self.float(*v),
            PoolConstant::Double(v) => self.double(*v),
            PoolConstant::Str(v) => self.string(v),
            PoolConstant::Class(v) => self.class(v),
            PoolConstant::MethodType(v) => self.method_type(v),
            PoolConstant::MethodHandle {
                kind,
                owner,
                name,
                desc,
                itf,
            } => self.method_handle(*kind, owner, name, desc, *itf),
            PoolConstant::Dynamic {
                bootstrap,
                name,
                desc,
            } => self.dynamic(*bootstrap, name, desc, false),
        }
    }

    /// Number of slots, including slot zero.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Flag whether the builder holds no entries beyond slot zero.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Serialize `constant_pool_count` and the entries.
    pub fn write(&self, w: &mut ByteWriter) {
        w.u16(self.entries.len() as u16);
        for entry in &self.entries[1..] {
            match entry {
                PoolEntry::Unused => {}
                PoolEntry::Utf8(s) => {
                    w.u8(TAG_UTF8);
                    let raw = mutf8_encode(s);
                    w.u16(raw.len() as u16);
                    w.bytes(&raw);
                }
                PoolEntry::Integer(v) => {
                    w.u8(TAG_INTEGER);
                    w.i32(*v);
                }
                PoolEntry::Float(v) => {
                    w.u8(TAG_FLOAT);
                    w.u32(v.to_bits());
                }
                PoolEntry::Long(v) => {
                    w.u8(TAG_LONG);
                    w.u32((*v as u64 >> 32) as u32);
                    w.u32(*v as u64 as u32);
                }
                PoolEntry::Double(v) => {
                    w.u8(TAG_DOUBLE);
                    w.u32((v.to_bits() >> 32) as u32);
                    w.u32(v.to_bits() as u32);
                }
                PoolEntry::Class(name) => {
                    w.u8(TAG_CLASS);
                    w.u16(*name);
                }
                PoolEntry::Str(payload) => {
                    w.u8(TAG_STRING);
                    w.u16(*payload);
                }
                PoolEntry::FieldRef {
                    class,
                    name_and_type,
                } => {
                    w.u8(TAG_FIELDREF);
                    w.u16(*class);
                    w.u16(*name_and_type);
                }
                PoolEntry::MethodRef {
                    class,
                    name_and_type,
                } => {
                    w.u8(TAG_METHODREF);
                    w.u16(*class);
                    w.u16(*name_and_type);
                }
                PoolEntry::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    w.u8(TAG_INTERFACE_METHODREF);
                    w.u16(*class);
                    w.u16(*name_and_type);
                }
                PoolEntry::NameAndType { name, desc } => {
                    w.u8(TAG_NAME_AND_TYPE);
                    w.u16(*name);
                    w.u16(*desc);
                }
                PoolEntry::MethodHandle { kind, reference } => {
                    w.u8(TAG_METHOD_HANDLE);
                    w.u8(*kind);
                    w.u16(*reference);
                }
                PoolEntry::MethodType(desc) => {
                    w.u8(TAG_METHOD_TYPE);
                    w.u16(*desc);
                }
                PoolEntry::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    w.u8(TAG_DYNAMIC);
                    w.u16(*bootstrap);
                    w.u16(*name_and_type);
                }
                PoolEntry::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    w.u8(TAG_INVOKE_DYNAMIC);
                    w.u16(*bootstrap);
                    w.u16(*name_and_type);
                }
                PoolEntry::Module(name) => {
                    w.u8(TAG_MODULE);
                    w.u16(*name);
                }
                PoolEntry::Package(name) => {
                    w.u8(TAG_PACKAGE);
                    w.u16(*name);
                }
            }
        }
    }
}

/// Decode modified UTF-8 as used by the class format.
fn mutf8_decode(raw: &[u8], offset: usize) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut units: Vec<u16> = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let a = raw[i];
        let unit = if a & 0x80 == 0 {
            i += 1;
            a as u16
        } else if a & 0xe0 == 0xc0 {
            if i + 1 >= raw.len() {
                return Err(Error::bad_class("truncated utf8 sequence", offset + i));
            }
            let b = raw[i + 1];
            i += 2;
            (((a & 0x1f) as u16) << 6) | (b & 0x3f) as u16
        } else if a & 0xf0 == 0xe0 {
            if i + 2 >= raw.len() {
                return Err(Error::bad_class("truncated utf8 sequence", offset + i));
            }
            let b = raw[i + 1];
            let c = raw[i + 2];
            i += 3;
            (((a & 0x0f) as u16) << 12) | (((b & 0x3f) as u16) << 6) | (c & 0x3f) as u16
        } else {
            return Err(Error::bad_class(
                format!("invalid utf8 lead byte {a:#04x}"),
                offset + i,
            ));
        };
        units.push(unit);
    }
    // UTF-16 units (surrogate pairs included) to string
    let mut iter = char::decode_utf16(units.iter().copied());
    for ch in &mut iter {
        match ch {
            Ok(c) => out.push(c),
            Err(_) => {
                return Err(Error::bad_class("unpaired surrogate in utf8 entry", offset))
            }
        }
    }
    Ok(out)
}

/// Encode modified UTF-8 as used by the class format.
fn mutf8_encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}
