//! Per-transform mutable state for one target class.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use weft_asm::classfile::{ClassNode, MethodNode};
use weft_asm::insn::InsnId;

use crate::mixin::MixinInfo;

/// Decoration left on an instruction by an injector, used for conflict
/// resolution between competing injections.
#[derive(Debug, Clone)]
pub struct InjectorMeta {
    /// Mixin that owns the injection.
    pub mixin: String,
    /// Handler name as merged.
    pub handler: String,
    /// Handler descriptor.
    pub desc: String,
    /// Injection priority.
    pub priority: i32,
    /// Flag whether later injections may never displace this one.
    pub is_final: bool,
}

/// Mutable transformation state for one target class.
///
/// Created per `transform` call and discarded after the tree is encoded;
/// nothing in here is shared across targets.
pub struct TargetClassContext {
    /// Target class internal name.
    pub name: String,
    /// Per-process session tag stamped into merged-member annotations.
    pub session_id: String,
    node: ClassNode,
    mixins: Vec<Arc<MixinInfo>>,
    decorations: HashMap<String, HashMap<InsnId, InjectorMeta>>,
    merged_methods: HashSet<String>,
    generated: Vec<ClassNode>,
}

impl TargetClassContext {
    /// Context for one application run.
    pub fn new(
        name: impl Into<String>,
        node: ClassNode,
        mixins: Vec<Arc<MixinInfo>>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            session_id: session_id.into(),
            node,
            mixins,
            decorations: HashMap::new(),
            merged_methods: HashSet::new(),
            generated: Vec::new(),
        }
    }

    /// The mixins to apply, already in application order.
    pub fn mixins(&self) -> &[Arc<MixinInfo>] {
        &self.mixins
    }

    /// The class tree being transformed.
    pub fn node(&self) -> &ClassNode {
        &self.node
    }

    /// Mutable access to the class tree.
    pub fn node_mut(&mut self) -> &mut ClassNode {
        &mut self.node
    }

    /// Consume the context, yielding the transformed tree.
    pub fn into_node(self) -> (ClassNode, Vec<ClassNode>) {
        (self.node, self.generated)
    }

    /// Record that `name`+`desc` was merged from a mixin.
    pub fn mark_merged(&mut self, name: &str, desc: &str) {
        self.merged_methods.insert(format!("{name}{desc}"));
    }

    /// Flag whether `name`+`desc` came from a mixin during this run.
    pub fn is_merged(&self, name: &str, desc: &str) -> bool {
        self.merged_methods.contains(&format!("{name}{desc}"))
    }

    /// Injector decoration on an instruction of `method_key`
    /// (`name` + `desc`).
    pub fn decoration(&self, method_key: &str, insn: InsnId) -> Option<&InjectorMeta> {
        self.decorations.get(method_key)?.get(&insn)
    }

    /// Attach or replace an injector decoration.
    pub fn decorate(&mut self, method_key: &str, insn: InsnId, meta: InjectorMeta) {
        self.decorations
            .entry(method_key.to_string())
            .or_default()
            .insert(insn, meta);
    }

    /// Rename a method in place.
    pub fn rename_method(&mut self, name: &str, desc: &str, new_name: &str) {
        if let Some(method) = self.node.find_method_mut(name, desc) {
            method.name = new_name.to_string();
        }
    }

    /// Replace a method with the same signature, or add it when absent.
    pub fn replace_method(&mut self, method: MethodNode) {
        match self.node.find_method_mut(&method.name, &method.desc) {
            Some(slot) => *slot = method,
            None => self.node.methods.push(method),
        }
    }

    /// Queue a synthetic class produced during injection; the driver serves
    /// it through its class-generator table.
    pub fn add_generated(&mut self, node: ClassNode) {
        if !self.generated.iter().any(|g| g.name == node.name) {
            self.generated.push(node);
        }
    }
}
