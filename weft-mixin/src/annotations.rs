//! The annotation surface of the engine.
//!
//! Mixin classes drive the engine entirely through annotations compiled into
//! their class files. Everything is parsed up front into the typed records in
//! this module; nothing downstream touches a raw [`AnnotationNode`].

use weft_asm::annotation::{AnnotationNode, AnnotationValue};
use weft_asm::insn::Insn;
use weft_asm::opcode::Opcode;
use weft_asm::pool::PoolConstant;

use crate::error::{Result, TransformError};

/// Annotation type descriptors recognized on mixin classes and members.
pub mod descriptors {
    /// Class: marks a mixin and names its targets.
    pub const MIXIN: &str = "Lweft/annotation/Mixin;";
    /// Class: debug flags.
    pub const DEBUG: &str = "Lweft/annotation/Debug;";
    /// Member: declared here, sourced from the target.
    pub const SHADOW: &str = "Lweft/annotation/Shadow;";
    /// Method: replaces the target's body wholesale.
    pub const OVERWRITE: &str = "Lweft/annotation/Overwrite;";
    /// Member: renamed on conflict instead of merged.
    pub const UNIQUE: &str = "Lweft/annotation/Unique;";
    /// Method: merged only when the target lacks it.
    pub const INTRINSIC: &str = "Lweft/annotation/Intrinsic;";
    /// Field: shadowed final field may be written.
    pub const MUTABLE: &str = "Lweft/annotation/Mutable;";
    /// Field: shadowed field is final.
    pub const FINAL: &str = "Lweft/annotation/Final;";
    /// Method: synthesized field accessor.
    pub const ACCESSOR: &str = "Lweft/annotation/Accessor;";
    /// Method: synthesized method bridge.
    pub const INVOKER: &str = "Lweft/annotation/Invoker;";
    /// Method: callback injector.
    pub const INJECT: &str = "Lweft/annotation/Inject;";
    /// Method: single-argument modifier.
    pub const MODIFY_ARG: &str = "Lweft/annotation/ModifyArg;";
    /// Method: whole-argument-list modifier.
    pub const MODIFY_ARGS: &str = "Lweft/annotation/ModifyArgs;";
    /// Method: invoke/field-access redirector.
    pub const REDIRECT: &str = "Lweft/annotation/Redirect;";
    /// Method: constant modifier.
    pub const MODIFY_CONSTANT: &str = "Lweft/annotation/ModifyConstant;";
    /// Method: local-variable modifier.
    pub const MODIFY_VARIABLE: &str = "Lweft/annotation/ModifyVariable;";
    /// Method: injector group membership.
    pub const GROUP: &str = "Lweft/annotation/Group;";
    /// Method: marks a member resolved dynamically; suppresses strict checks.
    pub const DYNAMIC: &str = "Lweft/annotation/Dynamic;";
    /// Injection-point specifier nested inside injector annotations.
    pub const AT: &str = "Lweft/annotation/At;";
    /// Nested slice specifier.
    pub const SLICE: &str = "Lweft/annotation/Slice;";
    /// Nested constant specifier for `ModifyConstant`.
    pub const CONSTANT: &str = "Lweft/annotation/Constant;";
    /// Stamped onto every merged method.
    pub const MIXIN_MERGED: &str = "Lweft/annotation/MixinMerged;";
}

/// A symbolic reference to a target member, parsed from an annotation
/// string.
///
/// Accepted forms: `name`, `name(desc)ret`, `name:desc`,
/// `La/b/Owner;name(desc)ret` and `a/b/Owner.name(desc)ret`. A trailing `*`
/// (or the bare name `*`) matches every member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberInfo {
    /// Owner internal name, when specified.
    pub owner: Option<String>,
    /// Member name; `None` matches any name.
    pub name: Option<String>,
    /// Member descriptor; `None` matches any descriptor.
    pub desc: Option<String>,
    /// Flag whether every member matching the other fields is wanted.
    pub match_all: bool,
}

impl MemberInfo {
    /// Reference matching exactly one named member.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Parse the annotation string form.
    pub fn parse(spec: &str) -> Self {
        let mut rest = spec.trim();
        let mut info = MemberInfo::default();

        if let Some(tail) = rest.strip_prefix('L') {
            if let Some(semi) = tail.find(';') {
                info.owner = Some(tail[..semi].to_string());
                rest = &tail[semi + 1..];
            }
        } else if let Some(dot) = rest.rfind('.') {
            info.owner = Some(rest[..dot].replace('.', "/"));
            rest = &rest[dot + 1..];
        }

        let (name_part, desc) = if let Some(paren) = rest.find('(') {
            (&rest[..paren], Some(rest[paren..].to_string()))
        } else if let Some(colon) = rest.find(':') {
            (&rest[..colon], Some(rest[colon + 1..].to_string()))
        } else {
            (rest, None)
        };
        info.desc = desc;

        let mut name_part = name_part;
        if let Some(stripped) = name_part.strip_suffix('*') {
            info.match_all = true;
            name_part = stripped;
        }
        if !name_part.is_empty() {
            info.name = Some(name_part.to_string());
        }
        info
    }

    /// Flag whether a method `name`/`desc` pair satisfies this reference.
    pub fn matches_method(&self, name: &str, desc: &str) -> bool {
        self.name.as_deref().map(|n| n == name).unwrap_or(true)
            && self.desc.as_deref().map(|d| d == desc).unwrap_or(true)
    }

    /// Flag whether a field `name`/`desc` pair satisfies this reference.
    pub fn matches_field(&self, name: &str, desc: &str) -> bool {
        self.name.as_deref().map(|n| n == name).unwrap_or(true)
            && self.desc.as_deref().map(|d| d == desc).unwrap_or(true)
    }

    /// Flag whether `owner` satisfies this reference.
    pub fn matches_owner(&self, owner: &str) -> bool {
        self.owner.as_deref().map(|o| o == owner).unwrap_or(true)
    }
}

/// Shift mode of an `At` specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    /// No shift.
    #[default]
    None,
    /// One instruction before each hit.
    Before,
    /// One instruction after each hit.
    After,
    /// `by` instructions relative to each hit.
    By,
}

/// Parsed `At` specifier.
#[derive(Debug, Clone, Default)]
pub struct AtRecord {
    /// At-code, e.g. `HEAD` or a dotted custom id.
    pub code: String,
    /// Target member for member-matching points.
    pub target: Option<MemberInfo>,
    /// Raw target string before parsing, kept for refmap resolution.
    pub target_raw: Option<String>,
    /// Which match to select; `-1` or absent selects all.
    pub ordinal: Option<i32>,
    /// Opcode filter for points that accept one.
    pub opcode: Option<i32>,
    /// Named point arguments (`key=value` strings).
    pub args: Vec<(String, String)>,
    /// Slice id this point runs inside.
    pub slice: String,
    /// Shift mode.
    pub shift: Shift,
    /// Shift distance for [`Shift::By`].
    pub by: i32,
}

impl AtRecord {
    /// Point with just an at-code, as `@At("HEAD")` would produce.
    pub fn code_only(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Named argument lookup.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse from the nested annotation record.
    pub fn from_annotation(mixin: &str, node: &AnnotationNode) -> Result<Self> {
        let code = node
            .get_str("value")
            .or_else(|| node.get_str("id"))
            .ok_or_else(|| TransformError::InvalidInjectionPoint {
                mixin: mixin.to_string(),
                at: String::new(),
                reason: "missing at-code".to_string(),
            })?
            .to_string();
        let target_raw = node.get_str("target").map(str::to_string);
        let args = node
            .get_str_array("args")
            .into_iter()
            .map(|arg| match arg.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (arg, String::new()),
            })
            .collect();
        let shift = match node.get("shift") {
            Some(AnnotationValue::Enum { value, .. }) => match value.as_str() {
                "BEFORE" => Shift::Before,
                "AFTER" => Shift::After,
                "BY" => Shift::By,
                _ => Shift::None,
            },
            _ => Shift::None,
        };
        Ok(Self {
            code,
            target: target_raw.as_deref().map(MemberInfo::parse),
            target_raw,
            ordinal: node.get_int("ordinal"),
            opcode: node.get_int("opcode"),
            args,
            slice: node.get_str("slice").unwrap_or("").to_string(),
            shift,
            by: node.get_int("by").unwrap_or(0),
        })
    }
}

/// Parsed `Slice` specifier.
#[derive(Debug, Clone, Default)]
pub struct SliceRecord {
    /// Slice id referenced from `At.slice`.
    pub id: String,
    /// Start point; list head when absent.
    pub from: Option<AtRecord>,
    /// End point; list tail when absent.
    pub to: Option<AtRecord>,
}

impl SliceRecord {
    /// Parse from the nested annotation record.
    pub fn from_annotation(mixin: &str, node: &AnnotationNode) -> Result<Self> {
        let nested_at = |name: &str| -> Result<Option<AtRecord>> {
            match node.get(name) {
                Some(AnnotationValue::Nested(at)) => {
                    Ok(Some(AtRecord::from_annotation(mixin, at)?))
                }
                _ => Ok(None),
            }
        };
        Ok(Self {
            id: node.get_str("id").unwrap_or("").to_string(),
            from: nested_at("from")?,
            to: nested_at("to")?,
        })
    }
}

/// Which injector annotation a handler method carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectorKind {
    /// `Inject` callback.
    Inject,
    /// `ModifyArg`.
    ModifyArg,
    /// `ModifyArgs`.
    ModifyArgs,
    /// `Redirect`.
    Redirect,
    /// `ModifyConstant`.
    ModifyConstant,
    /// `ModifyVariable`.
    ModifyVariable,
}

impl InjectorKind {
    /// Kind for an annotation descriptor, if it is an injector annotation.
    pub fn for_descriptor(desc: &str) -> Option<Self> {
        Some(match desc {
            descriptors::INJECT => Self::Inject,
            descriptors::MODIFY_ARG => Self::ModifyArg,
            descriptors::MODIFY_ARGS => Self::ModifyArgs,
            descriptors::REDIRECT => Self::Redirect,
            descriptors::MODIFY_CONSTANT => Self::ModifyConstant,
            descriptors::MODIFY_VARIABLE => Self::ModifyVariable,
            _ => return None,
        })
    }
}

/// Fields shared by all injector annotations.
#[derive(Debug, Clone, Default)]
pub struct InjectorCommon {
    /// Target method references.
    pub methods: Vec<MemberInfo>,
    /// Raw method strings, kept for refmap resolution.
    pub methods_raw: Vec<String>,
    /// Injection points.
    pub ats: Vec<AtRecord>,
    /// Declared slices by id.
    pub slices: Vec<SliceRecord>,
    /// Minimum successful injections; failing it is an error.
    pub require: usize,
    /// Expected successful injections; failing it is an error only in
    /// debug-injectors mode.
    pub expect: usize,
}

impl InjectorCommon {
    /// Parse the shared fields out of an injector annotation.
    pub fn from_annotation(mixin: &str, node: &AnnotationNode) -> Result<Self> {
        let methods_raw: Vec<String> = node.get_str_array("method");
        let mut ats = Vec::new();
        for value in node.get_array("at") {
            if let AnnotationValue::Nested(at) = value {
                ats.push(AtRecord::from_annotation(mixin, at)?);
            }
        }
        let mut slices = Vec::new();
        for value in node.get_array("slice") {
            if let AnnotationValue::Nested(slice) = value {
                slices.push(SliceRecord::from_annotation(mixin, slice)?);
            }
        }
        Ok(Self {
            methods: methods_raw.iter().map(|m| MemberInfo::parse(m)).collect(),
            methods_raw,
            ats,
            slices,
            require: node.get_int("require").map(|r| r.max(0) as usize).unwrap_or(0),
            expect: node.get_int("expect").map(|e| e.max(0) as usize).unwrap_or(1),
        })
    }

    /// Slice record by id; the empty id is the implicit whole-method slice.
    pub fn slice(&self, id: &str) -> Option<&SliceRecord> {
        self.slices.iter().find(|s| s.id == id)
    }
}

/// Parsed `Group` annotation.
#[derive(Debug, Clone)]
pub struct GroupRecord {
    /// Group name.
    pub name: String,
    /// Minimum total injections across the group.
    pub min: usize,
}

impl GroupRecord {
    /// Parse from the annotation record.
    pub fn from_annotation(node: &AnnotationNode) -> Self {
        Self {
            name: node
                .get_str("name")
                .or_else(|| node.get_str("value"))
                .unwrap_or("default")
                .to_string(),
            min: node.get_int("min").map(|m| m.max(0) as usize).unwrap_or(0),
        }
    }
}

/// Constant matcher used by `ModifyConstant` and the `CONSTANT` point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantMatcher {
    /// Match `ACONST_NULL`.
    pub null_value: bool,
    /// Match an int-class constant with this value.
    pub int_value: Option<i32>,
    /// Match a long constant with this value.
    pub long_value: Option<i64>,
    /// Match a float constant with this value.
    pub float_value: Option<f32>,
    /// Match a double constant with this value.
    pub double_value: Option<f64>,
    /// Match a string constant with this value.
    pub string_value: Option<String>,
    /// Match a class constant with this internal name.
    pub class_value: Option<String>,
}

impl ConstantMatcher {
    /// Flag whether no criterion is set, which matches every constant load.
    pub fn is_wildcard(&self) -> bool {
        *self == Self::default()
    }

    /// Parse out of a `Constant` annotation record.
    pub fn from_annotation(node: &AnnotationNode) -> Self {
        let mut matcher = Self {
            null_value: node.get_bool("nullValue", false),
            int_value: node.get_int("intValue"),
            string_value: node.get_str("stringValue").map(str::to_string),
            class_value: match node.get("classValue") {
                Some(AnnotationValue::Class(desc)) => {
                    Some(desc.trim_start_matches('L').trim_end_matches(';').to_string())
                }
                Some(AnnotationValue::Str(name)) => Some(name.clone()),
                _ => None,
            },
            ..Self::default()
        };
        if let Some(AnnotationValue::Long(v)) = node.get("longValue") {
            matcher.long_value = Some(*v);
        }
        if let Some(AnnotationValue::Float(v)) = node.get("floatValue") {
            matcher.float_value = Some(*v);
        }
        if let Some(AnnotationValue::Double(v)) = node.get("doubleValue") {
            matcher.double_value = Some(*v);
        }
        matcher
    }

    /// Parse from `key=value` point arguments.
    pub fn from_point_args(args: &[(String, String)]) -> Self {
        let mut matcher = Self::default();
        for (key, value) in args {
            match key.as_str() {
                "nullValue" => matcher.null_value = value == "true",
                "intValue" => matcher.int_value = value.parse().ok(),
                "longValue" => matcher.long_value = value.parse().ok(),
                "floatValue" => matcher.float_value = value.parse().ok(),
                "doubleValue" => matcher.double_value = value.parse().ok(),
                "stringValue" => matcher.string_value = Some(value.clone()),
                "classValue" => matcher.class_value = Some(value.clone()),
                _ => {}
            }
        }
        matcher
    }

    /// Flag whether an instruction loads a constant this matcher accepts.
    pub fn matches(&self, insn: &Insn) -> bool {
        if matches!(insn, Insn::Simple(Opcode::ACONST_NULL)) {
            return self.null_value || self.is_wildcard();
        }
        let Some(constant) = insn.constant_value() else {
            return false;
        };
        if self.is_wildcard() {
            return true;
        }
        match constant {
            PoolConstant::Int(v) => self.int_value == Some(v),
            PoolConstant::Long(v) => self.long_value == Some(v),
            PoolConstant::Float(v) => self.float_value.map(f32::to_bits) == Some(v.to_bits()),
            PoolConstant::Double(v) => self.double_value.map(f64::to_bits) == Some(v.to_bits()),
            PoolConstant::Str(v) => self.string_value.as_deref() == Some(v.as_str()),
            PoolConstant::Class(v) => self.class_value.as_deref() == Some(v.as_str()),
            _ => false,
        }
    }

    /// Descriptor of the matched constant's type, when unambiguous.
    pub fn type_desc(&self) -> Option<&'static str> {
        if self.int_value.is_some() {
            Some("I")
        } else if self.long_value.is_some() {
            Some("J")
        } else if self.float_value.is_some() {
            Some("F")
        } else if self.double_value.is_some() {
            Some("D")
        } else if self.string_value.is_some() {
            Some("Ljava/lang/String;")
        } else if self.class_value.is_some() {
            Some("Ljava/lang/Class;")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_info_forms() {
        let bare = MemberInfo::parse("tick");
        assert_eq!(bare.name.as_deref(), Some("tick"));
        assert!(bare.owner.is_none() && bare.desc.is_none());

        let method = MemberInfo::parse("Lgame/Engine;tick()V");
        assert_eq!(method.owner.as_deref(), Some("game/Engine"));
        assert_eq!(method.name.as_deref(), Some("tick"));
        assert_eq!(method.desc.as_deref(), Some("()V"));

        let dotted = MemberInfo::parse("game/Engine.add(II)I");
        assert_eq!(dotted.owner.as_deref(), Some("game/Engine"));
        assert!(dotted.matches_method("add", "(II)I"));
        assert!(!dotted.matches_method("add", "(I)I"));

        let field = MemberInfo::parse("count:I");
        assert_eq!(field.name.as_deref(), Some("count"));
        assert_eq!(field.desc.as_deref(), Some("I"));

        let glob = MemberInfo::parse("*");
        assert!(glob.match_all);
        assert!(glob.matches_method("anything", "()V"));
    }

    #[test]
    fn constant_matcher() {
        let ten = ConstantMatcher {
            int_value: Some(10),
            ..ConstantMatcher::default()
        };
        assert!(ten.matches(&Insn::Int(Opcode::BIPUSH, 10)));
        assert!(!ten.matches(&Insn::Int(Opcode::BIPUSH, 11)));
        assert!(!ten.matches(&Insn::Simple(Opcode::ACONST_NULL)));
        assert_eq!(ten.type_desc(), Some("I"));

        let null = ConstantMatcher {
            null_value: true,
            ..ConstantMatcher::default()
        };
        assert!(null.matches(&Insn::Simple(Opcode::ACONST_NULL)));
        assert!(!null.matches(&Insn::Int(Opcode::BIPUSH, 0)));
    }

    #[test]
    fn at_args_split() {
        let at = AtRecord {
            args: vec![("enforce".to_string(), "POST_DELEGATE".to_string())],
            ..AtRecord::default()
        };
        assert_eq!(at.arg("enforce"), Some("POST_DELEGATE"));
        assert_eq!(at.arg("missing"), None);
    }
}
