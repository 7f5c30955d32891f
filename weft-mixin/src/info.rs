//! Class hierarchy cache.
//!
//! Nodes live in an arena and reference each other by name; handles are plain
//! indices so the inevitable hierarchy cycles (classes referencing interfaces
//! referencing classes) never turn into ownership cycles. Nodes are created
//! lazily from a [`ClassSource`] on first reference and invalidated only by
//! an explicit reload.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use weft_asm::classfile::{ClassNode, OBJECT};
use weft_asm::prelude::decode;

/// Supplies raw class bytes to the engine.
///
/// The host's classloader side of the hook; also consulted while resolving
/// hierarchies and preparing mixins.
pub trait ClassSource: Send + Sync {
    /// Bytes of the named class, if the source knows it.
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>>;
}

/// In-memory class source, primarily for tests and generated classes.
#[derive(Debug, Default)]
pub struct MemoryClassSource {
    classes: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryClassSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class.
    pub fn insert(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.classes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), bytes);
    }

    /// Encode and register a class tree.
    pub fn insert_node(&self, node: &ClassNode) -> Result<(), weft_asm::Error> {
        self.insert(node.name.clone(), weft_asm::classfile::encode(node)?);
        Ok(())
    }
}

impl ClassSource for MemoryClassSource {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.classes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl<S: ClassSource + ?Sized> ClassSource for std::sync::Arc<S> {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        (**self).class_bytes(name)
    }
}

/// Index of a class node in the cache arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(u32);

/// One method as seen by hierarchy lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub desc: String,
    /// Raw access flags.
    pub access: u16,
    /// Flag whether the method is static.
    pub is_static: bool,
    /// Class that declares it.
    pub owner: String,
    /// Original name, when the method was renamed during merging.
    pub renamed_from: Option<String>,
}

/// One field as seen by hierarchy lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    /// Field name.
    pub name: String,
    /// Field descriptor.
    pub desc: String,
    /// Raw access flags.
    pub access: u16,
    /// Flag whether the field is static.
    pub is_static: bool,
    /// Class that declares it.
    pub owner: String,
}

/// Cached facts about one class.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Internal name.
    pub name: String,
    /// Superclass internal name; `None` for the root class.
    pub superclass: Option<String>,
    /// Directly declared interfaces.
    pub interfaces: Vec<String>,
    /// Declared methods.
    pub methods: Vec<MethodDecl>,
    /// Declared fields.
    pub fields: Vec<FieldDecl>,
    /// Raw class access flags.
    pub access: u16,
    /// Flag whether this node describes a mixin class.
    pub is_mixin: bool,
    /// Flag whether real bytes backed this node; stubs are synthesized for
    /// classes the source cannot provide so hierarchy walks terminate.
    pub loaded: bool,
}

impl ClassInfo {
    /// Stub for a class the source does not know.
    fn stub(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: if name == OBJECT {
                None
            } else {
                Some(OBJECT.to_string())
            },
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            access: 0,
            is_mixin: false,
            loaded: false,
        }
    }

    /// Extract the cacheable facts from a class tree.
    pub fn from_node(node: &ClassNode, is_mixin: bool) -> Self {
        Self {
            name: node.name.clone(),
            superclass: node.superclass.clone(),
            interfaces: node.interfaces.clone(),
            methods: node
                .methods
                .iter()
                .map(|m| MethodDecl {
                    name: m.name.clone(),
                    desc: m.desc.clone(),
                    access: m.access.bits(),
                    is_static: m.is_static(),
                    owner: node.name.clone(),
                    renamed_from: None,
                })
                .collect(),
            fields: node
                .fields
                .iter()
                .map(|f| FieldDecl {
                    name: f.name.clone(),
                    desc: f.desc.clone(),
                    access: f.access.bits(),
                    is_static: f.is_static(),
                    owner: node.name.clone(),
                })
                .collect(),
            access: node.access.bits(),
            is_mixin,
            loaded: true,
        }
    }

    /// Locally declared method.
    pub fn find_method(&self, name: &str, desc: &str) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|m| (m.name == name || m.renamed_from.as_deref() == Some(name)) && m.desc == desc)
    }

    /// Locally declared field.
    pub fn find_field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Which part of the hierarchy a lookup walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Self, superclasses, then interfaces.
    All,
    /// Superclasses only, excluding self.
    SuperOnly,
    /// Interfaces only.
    InterfacesOnly,
}

/// The arena of cached class nodes.
#[derive(Debug, Default)]
pub struct ClassInfoCache {
    arena: Vec<ClassInfo>,
    by_name: HashMap<String, ClassHandle>,
}

impl ClassInfoCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `name`, decoding from `source` on first reference.
    ///
    /// Classes the source cannot provide become stub nodes so recursive
    /// walks terminate; the stub is replaced if the class is registered
    /// later.
    pub fn for_name(&mut self, name: &str, source: &dyn ClassSource) -> ClassHandle {
        if let Some(handle) = self.by_name.get(name) {
            return *handle;
        }
        let info = source
            .class_bytes(name)
            .and_then(|bytes| decode(&bytes).ok())
            .map(|node| ClassInfo::from_node(&node, false))
            .unwrap_or_else(|| ClassInfo::stub(name));
        self.insert(info)
    }

    fn insert(&mut self, info: ClassInfo) -> ClassHandle {
        let handle = ClassHandle(self.arena.len() as u32);
        self.by_name.insert(info.name.clone(), handle);
        self.arena.push(info);
        handle
    }

    /// Register (or replace) a node built from an already-decoded tree.
    pub fn register(&mut self, info: ClassInfo) -> ClassHandle {
        match self.by_name.get(&info.name) {
            Some(handle) => {
                self.arena[handle.0 as usize] = info;
                *handle
            }
            None => self.insert(info),
        }
    }

    /// Drop the node for `name`; the next reference reloads it.
    pub fn invalidate(&mut self, name: &str) {
        if let Some(handle) = self.by_name.remove(name) {
            // the arena slot stays; only the name binding is dropped
            self.arena[handle.0 as usize].loaded = false;
        }
    }

    /// Node behind a handle.
    pub fn get(&self, handle: ClassHandle) -> &ClassInfo {
        &self.arena[handle.0 as usize]
    }

    /// Mutable node behind a handle.
    pub fn get_mut(&mut self, handle: ClassHandle) -> &mut ClassInfo {
        &mut self.arena[handle.0 as usize]
    }

    /// Record that a method was renamed during merging, keeping the old name
    /// findable.
    pub fn rename_method(&mut self, class: &str, old_name: &str, desc: &str, new_name: &str) {
        if let Some(handle) = self.by_name.get(class).copied() {
            let info = self.get_mut(handle);
            if let Some(method) = info
                .methods
                .iter_mut()
                .find(|m| m.name == old_name && m.desc == desc)
            {
                method.renamed_from = Some(method.name.clone());
                method.name = new_name.to_string();
            }
        }
    }

    /// The superclass chain starting at `name`, self included.
    pub fn superchain(&mut self, name: &str, source: &dyn ClassSource) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = Some(name.to_string());
        while let Some(current) = cursor {
            if chain.contains(&current) {
                break;
            }
            let handle = self.for_name(&current, source);
            chain.push(current);
            cursor = self.get(handle).superclass.clone();
        }
        chain
    }

    /// All interfaces reachable from `name`: direct interfaces of every
    /// class in the superchain, then their superinterfaces, breadth first,
    /// deduplicated in first-seen order.
    pub fn interfaces_flat(&mut self, name: &str, source: &dyn ClassSource) -> Vec<String> {
        let mut queue: VecDeque<String> = VecDeque::new();
        for class in self.superchain(name, source) {
            let handle = self.for_name(&class, source);
            queue.extend(self.get(handle).interfaces.iter().cloned());
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        while let Some(itf) = queue.pop_front() {
            if !seen.insert(itf.clone()) {
                continue;
            }
            let handle = self.for_name(&itf, source);
            queue.extend(self.get(handle).interfaces.iter().cloned());
            out.push(itf);
        }
        out
    }

    /// Flag whether `sub` is `sup` or inherits from it.
    pub fn is_assignable_from(&mut self, sup: &str, sub: &str, source: &dyn ClassSource) -> bool {
        if sup == OBJECT {
            return true;
        }
        self.superchain(sub, source).iter().any(|c| c == sup)
            || self.interfaces_flat(sub, source).iter().any(|i| i == sup)
    }

    /// Hierarchy method lookup; self, then superclasses, then interfaces
    /// when enabled, in a reproducible order.
    pub fn find_method_in_hierarchy(
        &mut self,
        start: &str,
        name: &str,
        desc: &str,
        include_interfaces: bool,
        traversal: Traversal,
        source: &dyn ClassSource,
    ) -> Option<MethodDecl> {
        for class in self.lookup_order(start, include_interfaces, traversal, source) {
            let handle = self.for_name(&class, source);
            if let Some(decl) = self.get(handle).find_method(name, desc) {
                return Some(decl.clone());
            }
        }
        None
    }

    /// Hierarchy field lookup with the same ordering rules as methods.
    pub fn find_field_in_hierarchy(
        &mut self,
        start: &str,
        name: &str,
        traversal: Traversal,
        source: &dyn ClassSource,
    ) -> Option<FieldDecl> {
        for class in self.lookup_order(start, true, traversal, source) {
            let handle = self.for_name(&class, source);
            if let Some(decl) = self.get(handle).find_field(name) {
                return Some(decl.clone());
            }
        }
        None
    }

    fn lookup_order(
        &mut self,
        start: &str,
        include_interfaces: bool,
        traversal: Traversal,
        source: &dyn ClassSource,
    ) -> Vec<String> {
        let mut order = Vec::new();
        match traversal {
            Traversal::All => {
                order.extend(self.superchain(start, source));
                if include_interfaces {
                    order.extend(self.interfaces_flat(start, source));
                }
            }
            Traversal::SuperOnly => {
                order.extend(self.superchain(start, source).into_iter().skip(1));
            }
            Traversal::InterfacesOnly => {
                order.extend(self.interfaces_flat(start, source));
            }
        }
        order
    }
}
