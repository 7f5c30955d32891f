//! The mixin class model.
//!
//! A [`MixinInfo`] is the immutable, categorized view of one mixin class:
//! which members are shadows, overwrites, accessors or injector handlers,
//! which classes it targets, and what its handlers will be called once they
//! are merged. It is built when the owning config is prepared and lives for
//! the process; hot swapping replaces the whole record atomically.

use std::collections::HashMap;
use std::sync::Arc;

use sha3::{Digest, Keccak256};
use tracing::trace;

use weft_asm::annotation::AnnotationNode;
use weft_asm::classfile::{decode, ClassNode, MethodNode};
use weft_asm::descriptor::{JavaType, MethodDescriptor};

use crate::annotations::{descriptors, GroupRecord, InjectorKind};
use crate::config::MixinConfig;
use crate::error::{Result, TransformError};
use crate::info::{ClassInfo, ClassInfoCache, ClassSource, Traversal};
use crate::refmap::RefMap;

/// Default prefix stripped from shadow member names.
pub const SHADOW_PREFIX: &str = "shadow$";

/// A `(name, descriptor)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberSig {
    /// Member name.
    pub name: String,
    /// Member descriptor.
    pub desc: String,
}

impl MemberSig {
    fn of(name: &str, desc: &str) -> Self {
        Self {
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

/// A shadowed method.
#[derive(Debug, Clone)]
pub struct ShadowMethod {
    /// Name as it resolves in the target (prefix stripped).
    pub name: String,
    /// Method descriptor.
    pub desc: String,
    /// Declared name in the mixin, prefix included.
    pub declared_name: String,
}

/// A shadowed field with its modifier annotations.
#[derive(Debug, Clone)]
pub struct ShadowField {
    /// Name as it resolves in the target (prefix stripped).
    pub name: String,
    /// Field descriptor.
    pub desc: String,
    /// Declared name in the mixin, prefix included.
    pub declared_name: String,
    /// Flag whether `Mutable` lifts a final target field.
    pub mutable: bool,
}

/// Accessor flavor, derived from the method shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    /// `()T` reads the field.
    Getter,
    /// `(T)V` writes the field.
    Setter,
}

/// One synthesized field accessor.
#[derive(Debug, Clone)]
pub struct AccessorDef {
    /// The abstract method to materialize.
    pub method: MemberSig,
    /// Target field name.
    pub field: String,
    /// Field descriptor, from the accessor shape.
    pub field_desc: String,
    /// Getter or setter.
    pub kind: AccessorKind,
}

/// One synthesized method bridge.
#[derive(Debug, Clone)]
pub struct InvokerDef {
    /// The abstract method to materialize.
    pub method: MemberSig,
    /// Target method name.
    pub target: String,
}

/// One injector handler method.
#[derive(Debug, Clone)]
pub struct InjectorDef {
    /// Which injector annotation it carries.
    pub kind: InjectorKind,
    /// Handler method signature as declared in the mixin.
    pub method: MemberSig,
    /// Flag whether the handler is static.
    pub is_static: bool,
    /// The raw injector annotation, parsed further by the injection layer.
    pub annotation: AnnotationNode,
    /// Group membership, when annotated.
    pub group: Option<GroupRecord>,
}

/// Categorized members of a mixin class.
#[derive(Debug, Clone, Default)]
pub struct Members {
    /// Shadowed methods, type-check only.
    pub shadow_methods: Vec<ShadowMethod>,
    /// Shadowed fields.
    pub shadow_fields: Vec<ShadowField>,
    /// Wholesale method replacements.
    pub overwrites: Vec<MemberSig>,
    /// Members renamed on conflict.
    pub uniques: Vec<MemberSig>,
    /// Default-style optional overwrites.
    pub intrinsics: Vec<MemberSig>,
    /// Synthesized field accessors.
    pub accessors: Vec<AccessorDef>,
    /// Synthesized method bridges.
    pub invokers: Vec<InvokerDef>,
    /// Injector handlers.
    pub injectors: Vec<InjectorDef>,
    /// Methods merged as-is.
    pub plain_methods: Vec<MemberSig>,
    /// Fields copied into the target.
    pub plain_fields: Vec<String>,
}

/// Immutable record of one parsed mixin class.
pub struct MixinInfo {
    /// Internal name of the mixin class.
    pub name: String,
    /// Owning config resource name.
    pub config_name: String,
    /// Owning config's stable id, the secondary sort key.
    pub config_ordinal: usize,
    /// Effective priority: the class annotation's, else the config's.
    pub priority: i32,
    /// Target class internal names.
    pub targets: Vec<String>,
    /// Flag whether failures escalate unconditionally.
    pub required: bool,
    /// Flag whether expectation failures escalate.
    pub verbose: bool,
    /// Reference map shared with the owning config.
    pub refmap: Arc<RefMap>,
    /// Context bucket consulted first during refmap lookups.
    pub refmap_context: Option<String>,
    /// The parsed mixin class.
    pub tree: ClassNode,
    /// Categorized members.
    pub members: Members,
    /// Post-merge names of injector handlers.
    ///
    /// `Unique` members are not in here: whether a Unique is renamed depends
    /// on whether it collides with the target, so the applicator decides it
    /// per target at merge time.
    pub renames: HashMap<MemberSig, String>,
}

impl MixinInfo {
    /// Parse and validate one mixin class.
    pub fn parse(
        config: &MixinConfig,
        class_name: &str,
        bytes: &[u8],
        cache: &mut ClassInfoCache,
        source: &dyn ClassSource,
    ) -> Result<Self> {
        let tree = decode(bytes)
            .map_err(|e| TransformError::prepare(class_name, format!("undecodable: {e}")))?;
        if tree.name != class_name {
            return Err(TransformError::prepare(
                class_name,
                format!("declares name {}", tree.name),
            ));
        }

        let mixin_annotation = find_annotation(&tree, descriptors::MIXIN).ok_or_else(|| {
            TransformError::prepare(class_name, "missing the Mixin annotation")
        })?;
        let targets = parse_targets(mixin_annotation);
        if targets.is_empty() {
            return Err(TransformError::prepare(class_name, "declares no targets"));
        }
        let priority = mixin_annotation
            .get_int("priority")
            .unwrap_or(config.priority);

        let mut info = Self {
            name: class_name.to_string(),
            config_name: config.name.clone(),
            config_ordinal: config.ordinal,
            priority,
            targets,
            required: config.required,
            verbose: config.verbose,
            refmap: Arc::clone(&config.refmap),
            refmap_context: config.refmap_context.clone(),
            tree,
            members: Members::default(),
            renames: HashMap::new(),
        };

        info.validate_supertype(cache, source)?;
        info.categorize()?;
        info.validate_shadows(cache, source)?;
        info.compute_renames();

        cache.register(ClassInfo::from_node(&info.tree, true));
        trace!(
            mixin = info.name.as_str(),
            targets = ?info.targets,
            priority = info.priority,
            "parsed mixin"
        );
        Ok(info)
    }

    /// The mixin's supertype must be each target class or one of its
    /// superclasses, or the root class.
    fn validate_supertype(
        &self,
        cache: &mut ClassInfoCache,
        source: &dyn ClassSource,
    ) -> Result<()> {
        let Some(superclass) = self.tree.superclass.clone() else {
            return Ok(());
        };
        for target in &self.targets {
            let chain = cache.superchain(target, source);
            if !chain.iter().any(|c| c == &superclass) {
                return Err(TransformError::prepare(
                    &self.name,
                    format!(
                        "supertype {superclass} is not {target} or one of its superclasses"
                    ),
                ));
            }
        }
        Ok(())
    }

    fn categorize(&mut self) -> Result<()> {
        for method in &self.tree.methods {
            let sig = MemberSig::of(&method.name, &method.desc);
            if let Some(def) = categorize_injector(method)? {
                self.members.injectors.push(def);
            } else if let Some(shadow) = get_annotation(method, descriptors::SHADOW) {
                let prefix = shadow.get_str("prefix").unwrap_or(SHADOW_PREFIX);
                let name = method
                    .name
                    .strip_prefix(prefix)
                    .unwrap_or(&method.name)
                    .to_string();
                self.members.shadow_methods.push(ShadowMethod {
                    name,
                    desc: method.desc.clone(),
                    declared_name: method.name.clone(),
                });
            } else if has_annotation(method, descriptors::OVERWRITE) {
                self.members.overwrites.push(sig);
            } else if has_annotation(method, descriptors::UNIQUE) {
                self.members.uniques.push(sig);
            } else if has_annotation(method, descriptors::INTRINSIC) {
                self.members.intrinsics.push(sig);
            } else if let Some(accessor) = get_annotation(method, descriptors::ACCESSOR) {
                self.members.accessors.push(parse_accessor(
                    &self.name, method, accessor,
                )?);
            } else if let Some(invoker) = get_annotation(method, descriptors::INVOKER) {
                self.members.invokers.push(parse_invoker(&self.name, method, invoker)?);
            } else if !method.is_ctor() && !method.is_static_init() {
                self.members.plain_methods.push(sig);
            }
        }

        for field in &self.tree.fields {
            let annotations = field
                .visible_annotations
                .iter()
                .chain(field.invisible_annotations.iter());
            let shadow = annotations
                .clone()
                .find(|a| a.desc == descriptors::SHADOW);
            if let Some(shadow) = shadow {
                let prefix = shadow.get_str("prefix").unwrap_or(SHADOW_PREFIX);
                let name = field
                    .name
                    .strip_prefix(prefix)
                    .unwrap_or(&field.name)
                    .to_string();
                self.members.shadow_fields.push(ShadowField {
                    name,
                    desc: field.desc.clone(),
                    declared_name: field.name.clone(),
                    mutable: annotations.clone().any(|a| a.desc == descriptors::MUTABLE),
                });
            } else {
                self.members.plain_fields.push(field.name.clone());
            }
        }
        Ok(())
    }

    /// Every shadow must resolve in the target hierarchy.
    fn validate_shadows(
        &self,
        cache: &mut ClassInfoCache,
        source: &dyn ClassSource,
    ) -> Result<()> {
        for target in &self.targets {
            for shadow in &self.members.shadow_methods {
                let resolved = cache.find_method_in_hierarchy(
                    target,
                    &self.remap_method(target, &shadow.name, &shadow.desc),
                    &shadow.desc,
                    true,
                    Traversal::All,
                    source,
                );
                if resolved.is_none() {
                    return Err(TransformError::prepare(
                        &self.name,
                        format!(
                            "shadow method {}{} does not resolve in {target}",
                            shadow.name, shadow.desc
                        ),
                    ));
                }
            }
            for shadow in &self.members.shadow_fields {
                let name = self.remap_field(target, &shadow.name, &shadow.desc);
                if cache
                    .find_field_in_hierarchy(target, &name, Traversal::All, source)
                    .is_none()
                {
                    return Err(TransformError::prepare(
                        &self.name,
                        format!(
                            "shadow field {}:{} does not resolve in {target}",
                            shadow.name, shadow.desc
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn compute_renames(&mut self) {
        let mut renames = HashMap::new();
        for injector in &self.members.injectors {
            let renamed = handler_name("handler", &self.name, &injector.method);
            renames.insert(injector.method.clone(), renamed);
        }
        self.renames = renames;
    }

    /// Post-merge name of an injector handler; identity for everything
    /// else.
    pub fn merged_name(&self, name: &str, desc: &str) -> String {
        self.renames
            .get(&MemberSig::of(name, desc))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Resolve a method symbol through the refmap.
    pub fn remap_method(&self, owner: &str, name: &str, desc: &str) -> String {
        let symbol = format!("{name}{desc}");
        let context = self.refmap_context.as_deref();
        let mapped = self.refmap.remap(context, Some(owner), &symbol);
        match mapped.split_once('(') {
            Some((mapped_name, _)) => mapped_name.to_string(),
            None => mapped,
        }
    }

    /// Resolve a field symbol through the refmap.
    pub fn remap_field(&self, owner: &str, name: &str, desc: &str) -> String {
        let symbol = format!("{name}:{desc}");
        let context = self.refmap_context.as_deref();
        let mapped = self.refmap.remap(context, Some(owner), &symbol);
        match mapped.split_once(':') {
            Some((mapped_name, _)) => mapped_name.to_string(),
            None => mapped,
        }
    }

    /// Method node of this mixin by signature.
    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.tree.find_method(name, desc)
    }

    /// Flag whether a member is declared `Shadow`.
    pub fn is_shadow_method(&self, name: &str, desc: &str) -> bool {
        self.members
            .shadow_methods
            .iter()
            .any(|s| s.name == name && s.desc == desc)
            || self
                .tree
                .find_method(name, desc)
                .map(|m| has_annotation(m, descriptors::SHADOW))
                .unwrap_or(false)
    }
}

/// Deterministic post-merge handler name: a kind prefix, four hash bytes of
/// `(mixin, name, desc)`, then the original name.
pub fn handler_name(prefix: &str, mixin: &str, sig: &MemberSig) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(mixin.as_bytes());
    hasher.update([0u8]);
    hasher.update(sig.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(sig.desc.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{prefix}${:02x}{:02x}{:02x}{:02x}${}",
        digest[0], digest[1], digest[2], digest[3], sig.name
    )
}

fn find_annotation<'a>(tree: &'a ClassNode, desc: &str) -> Option<&'a AnnotationNode> {
    tree.visible_annotations
        .iter()
        .chain(tree.invisible_annotations.iter())
        .find(|a| a.desc == desc)
}

fn get_annotation<'a>(method: &'a MethodNode, desc: &str) -> Option<&'a AnnotationNode> {
    method
        .visible_annotations
        .iter()
        .chain(method.invisible_annotations.iter())
        .find(|a| a.desc == desc)
}

fn has_annotation(method: &MethodNode, desc: &str) -> bool {
    get_annotation(method, desc).is_some()
}

fn parse_targets(annotation: &AnnotationNode) -> Vec<String> {
    let mut targets = Vec::new();
    for value in annotation.get_array("value") {
        if let weft_asm::annotation::AnnotationValue::Class(desc) = value {
            targets.push(
                desc.trim_start_matches('L')
                    .trim_end_matches(';')
                    .to_string(),
            );
        }
    }
    for name in annotation.get_str_array("targets") {
        targets.push(name.replace('.', "/"));
    }
    targets
}

fn categorize_injector(method: &MethodNode) -> Result<Option<InjectorDef>> {
    let annotations = method
        .visible_annotations
        .iter()
        .chain(method.invisible_annotations.iter());
    let mut found = None;
    for annotation in annotations.clone() {
        if let Some(kind) = InjectorKind::for_descriptor(&annotation.desc) {
            found = Some((kind, annotation.clone()));
            break;
        }
    }
    let Some((kind, annotation)) = found else {
        return Ok(None);
    };
    let group = annotations
        .clone()
        .find(|a| a.desc == descriptors::GROUP)
        .map(GroupRecord::from_annotation);
    Ok(Some(InjectorDef {
        kind,
        method: MemberSig::of(&method.name, &method.desc),
        is_static: method.is_static(),
        annotation,
        group,
    }))
}

fn parse_accessor(
    mixin: &str,
    method: &MethodNode,
    annotation: &AnnotationNode,
) -> Result<AccessorDef> {
    let desc = MethodDescriptor::parse(&method.desc)?;
    let (kind, field_desc) = match (desc.args.len(), &desc.ret) {
        (0, ret) if *ret != JavaType::Void => (AccessorKind::Getter, ret.to_string()),
        (1, JavaType::Void) => (AccessorKind::Setter, desc.args[0].to_string()),
        _ => {
            return Err(TransformError::prepare(
                mixin,
                format!("accessor {} has neither getter nor setter shape", method.name),
            ))
        }
    };
    let field = match annotation.get_str("value").or_else(|| annotation.get_str("target")) {
        Some(explicit) => explicit.to_string(),
        None => infer_member_name(&method.name, &["get", "set", "is"]).ok_or_else(|| {
            TransformError::prepare(
                mixin,
                format!("accessor {} needs an explicit target", method.name),
            )
        })?,
    };
    Ok(AccessorDef {
        method: MemberSig::of(&method.name, &method.desc),
        field,
        field_desc,
        kind,
    })
}

fn parse_invoker(
    mixin: &str,
    method: &MethodNode,
    annotation: &AnnotationNode,
) -> Result<InvokerDef> {
    let target = match annotation.get_str("value").or_else(|| annotation.get_str("target")) {
        Some(explicit) => explicit.to_string(),
        None => infer_member_name(&method.name, &["call", "invoke"]).ok_or_else(|| {
            TransformError::prepare(
                mixin,
                format!("invoker {} needs an explicit target", method.name),
            )
        })?,
    };
    Ok(InvokerDef {
        method: MemberSig::of(&method.name, &method.desc),
        target,
    })
}

/// Strip a `getX`/`callX` style prefix and decapitalize the remainder.
fn infer_member_name(method_name: &str, prefixes: &[&str]) -> Option<String> {
    for prefix in prefixes {
        if let Some(rest) = method_name.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if let Some(first) = chars.next() {
                if first.is_uppercase() {
                    return Some(first.to_lowercase().collect::<String>() + chars.as_str());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_names_are_deterministic_and_distinct() {
        let sig = MemberSig::of("onTick", "(Lweft/callback/CallbackInfo;)V");
        let a = handler_name("handler", "game/mixins/EngineMixin", &sig);
        let b = handler_name("handler", "game/mixins/EngineMixin", &sig);
        assert_eq!(a, b);
        assert!(a.starts_with("handler$"));
        assert!(a.ends_with("$onTick"));

        let other = handler_name("handler", "game/mixins/OtherMixin", &sig);
        assert_ne!(a, other);
    }

    #[test]
    fn member_name_inference() {
        assert_eq!(infer_member_name("getCount", &["get", "set", "is"]), Some("count".into()));
        assert_eq!(infer_member_name("isAlive", &["get", "set", "is"]), Some("alive".into()));
        assert_eq!(infer_member_name("callTick", &["call", "invoke"]), Some("tick".into()));
        assert_eq!(infer_member_name("tick", &["get", "set", "is"]), None);
    }
}
