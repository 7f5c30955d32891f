//! Annotation records and the element-value codec.

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{Error, Result};
use crate::pool::{ConstantPool, PoolBuilder, PoolEntry};

/// One annotation with its named element values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationNode {
    /// Annotation type descriptor, e.g. `Lweft/annotation/Mixin;`.
    pub desc: String,
    /// Element name/value pairs in declaration order.
    pub values: Vec<(String, AnnotationValue)>,
}

impl AnnotationNode {
    /// Empty annotation of the given type.
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            values: Vec::new(),
        }
    }

    /// Add an element value, builder style.
    pub fn with(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.values.push((name.into(), value));
        self
    }

    /// Element value by name.
    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// String element by name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AnnotationValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer element by name.
    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            AnnotationValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean element by name, `default` when absent.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(AnnotationValue::Bool(v)) => *v,
            _ => default,
        }
    }

    /// Enum element by name, as the constant's name.
    pub fn enum_value(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AnnotationValue::Enum { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Nested annotation element by name.
    pub fn nested(&self, name: &str) -> Option<&AnnotationNode> {
        match self.get(name)? {
            AnnotationValue::Nested(node) => Some(node),
            _ => None,
        }
    }

    /// Array element by name; a scalar is treated as a one-element array the
    /// way annotation sources allow.
    pub fn get_array(&self, name: &str) -> Vec<&AnnotationValue> {
        match self.get(name) {
            Some(AnnotationValue::Array(values)) => values.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        }
    }

    /// String-array element by name, scalars promoted.
    pub fn get_str_array(&self, name: &str) -> Vec<String> {
        self.get_array(name)
            .into_iter()
            .filter_map(|v| match v {
                AnnotationValue::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn read(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self> {
        let desc = pool.utf8(r.u16()?)?.to_string();
        let count = r.u16()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let name = pool.utf8(r.u16()?)?.to_string();
            values.push((name, AnnotationValue::read(r, pool)?));
        }
        Ok(Self { desc, values })
    }

    pub(crate) fn write(&self, w: &mut ByteWriter, pool: &mut PoolBuilder) -> Result<()> {
        w.u16(pool.utf8(&self.desc)?);
        w.u16(self.values.len() as u16);
        for (name, value) in &self.values {
            w.u16(pool.utf8(name)?);
            value.write(w, pool)?;
        }
        Ok(())
    }
}

/// One element value.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    /// `B`
    Byte(i8),
    /// `C`
    Char(u16),
    /// `S`
    Short(i16),
    /// `Z`
    Bool(bool),
    /// `I`
    Int(i32),
    /// `J`
    Long(i64),
    /// `F`
    Float(f32),
    /// `D`
    Double(f64),
    /// `s`
    Str(String),
    /// `e`: enum constant as `(type descriptor, constant name)`.
    Enum {
        /// Enum type descriptor.
        desc: String,
        /// Constant name.
        value: String,
    },
    /// `c`: class literal as a descriptor.
    Class(String),
    /// `@`: nested annotation.
    Nested(AnnotationNode),
    /// `[`: array of values.
    Array(Vec<AnnotationValue>),
}

impl AnnotationValue {
    fn read(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self> {
        let offset = r.pos();
        let tag = r.u8()?;
        Ok(match tag {
            b'B' => match pool.get(r.u16()?)? {
                PoolEntry::Integer(v) => AnnotationValue::Byte(*v as i8),
                _ => return Err(Error::bad_class("byte element without Integer entry", offset)),
            },
            b'C' => match pool.get(r.u16()?)? {
                PoolEntry::Integer(v) => AnnotationValue::Char(*v as u16),
                _ => return Err(Error::bad_class("char element without Integer entry", offset)),
            },
            b'S' => match pool.get(r.u16()?)? {
                PoolEntry::Integer(v) => AnnotationValue::Short(*v as i16),
                _ => return Err(Error::bad_class("short element without Integer entry", offset)),
            },
            b'Z' => match pool.get(r.u16()?)? {
                PoolEntry::Integer(v) => AnnotationValue::Bool(*v != 0),
                _ => {
                    return Err(Error::bad_class(
                        "boolean element without Integer entry",
                        offset,
                    ))
                }
            },
            b'I' => match pool.get(r.u16()?)? {
                PoolEntry::Integer(v) => AnnotationValue::Int(*v),
                _ => return Err(Error::bad_class("int element without Integer entry", offset)),
            },
            b'J' => match pool.get(r.u16()?)? {
                PoolEntry::Long(v) => AnnotationValue::Long(*v),
                _ => return Err(Error::bad_class("long element without Long entry", offset)),
            },
            b'F' => match pool.get(r.u16()?)? {
                PoolEntry::Float(v) => AnnotationValue::Float(*v),
                _ => return Err(Error::bad_class("float element without Float entry", offset)),
            },
            b'D' => match pool.get(r.u16()?)? {
                PoolEntry::Double(v) => AnnotationValue::Double(*v),
                _ => return Err(Error::bad_class("double element without Double entry", offset)),
            },
            b's' => AnnotationValue::Str(pool.utf8(r.u16()?)?.to_string()),
            b'e' => AnnotationValue::Enum {
                desc: pool.utf8(r.u16()?)?.to_string(),
                value: pool.utf8(r.u16()?)?.to_string(),
            },
            b'c' => AnnotationValue::Class(pool.utf8(r.u16()?)?.to_string()),
            b'@' => AnnotationValue::Nested(AnnotationNode::read(r, pool)?),
            b'[' => {
                let count = r.u16()? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(AnnotationValue::read(r, pool)?);
                }
                AnnotationValue::Array(values)
            }
            other => {
                return Err(Error::bad_class(
                    format!("unknown element value tag {:?}", other as char),
                    offset,
                ))
            }
        })
    }

    fn write(&self, w: &mut ByteWriter, pool: &mut PoolBuilder) -> Result<()> {
        match self {
            AnnotationValue::Byte(v) => {
                w.u8(b'B');
                w.u16(pool.integer(*v as i32)?);
            }
            AnnotationValue::Char(v) => {
                w.u8(b'C');
                w.u16(pool.integer(*v as i32)?);
            }
            AnnotationValue::Short(v) => {
                w.u8(b'S');
                w.u16(pool.integer(*v as i32)?);
            }
            AnnotationValue::Bool(v) => {
                w.u8(b'Z');
                w.u16(pool.integer(*v as i32)?);
            }
            AnnotationValue::Int(v) => {
                w.u8(b'I');
                w.u16(pool.integer(*v)?);
            }
            AnnotationValue::Long(v) => {
                w.u8(b'J');
                w.u16(pool.long(*v)?);
            }
            AnnotationValue::Float(v) => {
                w.u8(b'F');
                w.u16(pool.float(*v)?);
            }
            AnnotationValue::Double(v) => {
                w.u8(b'D');
                w.u16(pool.double(*v)?);
            }
            AnnotationValue::Str(v) => {
                w.u8(b's');
                w.u16(pool.utf8(v)?);
            }
            AnnotationValue::Enum { desc, value } => {
                w.u8(b'e');
                w.u16(pool.utf8(desc)?);
                w.u16(pool.utf8(value)?);
            }
            AnnotationValue::Class(v) => {
                w.u8(b'c');
                w.u16(pool.utf8(v)?);
            }
            AnnotationValue::Nested(node) => {
                w.u8(b'@');
                node.write(w, pool)?;
            }
            AnnotationValue::Array(values) => {
                w.u8(b'[');
                w.u16(values.len() as u16);
                for value in values {
                    value.write(w, pool)?;
                }
            }
        }
        Ok(())
    }
}

/// Read a `Runtime(In)VisibleAnnotations` attribute payload.
pub(crate) fn read_annotations(
    r: &mut ByteReader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<AnnotationNode>> {
    let count = r.u16()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(AnnotationNode::read(r, pool)?);
    }
    Ok(out)
}

/// Write a `Runtime(In)VisibleAnnotations` attribute payload.
pub(crate) fn write_annotations(
    annotations: &[AnnotationNode],
    pool: &mut PoolBuilder,
) -> Result<Vec<u8>> {
    let mut w = ByteWriter::new();
    w.u16(annotations.len() as u16);
    for annotation in annotations {
        annotation.write(&mut w, pool)?;
    }
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::{ByteReader, ByteWriter};

    #[test]
    fn round_trip() {
        let node = AnnotationNode::new("Lweft/annotation/Mixin;")
            .with(
                "targets",
                AnnotationValue::Array(vec![AnnotationValue::Str("game/Engine".to_string())]),
            )
            .with("priority", AnnotationValue::Int(1500))
            .with("remap", AnnotationValue::Bool(false))
            .with(
                "at",
                AnnotationValue::Nested(
                    AnnotationNode::new("Lweft/annotation/At;")
                        .with("value", AnnotationValue::Str("HEAD".to_string())),
                ),
            );

        let mut pool = PoolBuilder::new();
        let mut w = ByteWriter::new();
        node.write(&mut w, &mut pool).unwrap();
        let body = w.into_inner();

        let mut pw = ByteWriter::new();
        pool.write(&mut pw);
        let pool_bytes = pw.into_inner();
        let read_pool = ConstantPool::read(&mut ByteReader::new(&pool_bytes)).unwrap();

        let read = AnnotationNode::read(&mut ByteReader::new(&body), &read_pool).unwrap();
        assert_eq!(read, node);
        assert_eq!(read.get_int("priority"), Some(1500));
        assert_eq!(read.get_str_array("targets"), vec!["game/Engine"]);
        assert!(!read.get_bool("remap", true));
    }
}
