//! Arena-backed instruction list.

use std::collections::HashMap;

use super::{Insn, InsnId, LabelId};

#[derive(Debug, Clone)]
struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    dead: bool,
}

/// Doubly linked instruction list with stable node identity.
///
/// Nodes live in an arena; removing a node marks its slot dead and the id is
/// never reused, so ids held elsewhere (injection-point results, decoration
/// maps) stay unambiguous. Label ids are scoped to the list that issued them.
#[derive(Debug, Clone, Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    head: Option<InsnId>,
    tail: Option<InsnId>,
    len: usize,
    next_label: u32,
}

impl InsnList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes, markers included.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Flag whether the list has no live nodes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Issue a fresh label id scoped to this list.
    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    fn node(&self, id: InsnId) -> &Node {
        let node = &self.nodes[id.0 as usize];
        assert!(!node.dead, "instruction {id:?} was removed from its list");
        node
    }

    fn alloc(&mut self, insn: Insn) -> InsnId {
        let id = InsnId(self.nodes.len() as u32);
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
            dead: false,
        });
        self.len += 1;
        id
    }

    /// First live node.
    pub const fn first(&self) -> Option<InsnId> {
        self.head
    }

    /// Last live node.
    pub const fn last(&self) -> Option<InsnId> {
        self.tail
    }

    /// Successor of `id`.
    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).next
    }

    /// Predecessor of `id`.
    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.node(id).prev
    }

    /// Flag whether `id` is still part of the list.
    pub fn contains(&self, id: InsnId) -> bool {
        self.nodes
            .get(id.0 as usize)
            .map(|n| !n.dead)
            .unwrap_or(false)
    }

    /// The instruction at `id`.
    pub fn get(&self, id: InsnId) -> &Insn {
        &self.node(id).insn
    }

    /// Mutable access to the instruction at `id`.
    pub fn get_mut(&mut self, id: InsnId) -> &mut Insn {
        let node = &mut self.nodes[id.0 as usize];
        assert!(!node.dead, "instruction {id:?} was removed from its list");
        &mut node.insn
    }

    /// Append an instruction.
    pub fn push_back(&mut self, insn: Insn) -> InsnId {
        let id = self.alloc(insn);
        match self.tail {
            Some(tail) => {
                self.nodes[tail.0 as usize].next = Some(id);
                self.nodes[id.0 as usize].prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Prepend an instruction.
    pub fn push_front(&mut self, insn: Insn) -> InsnId {
        match self.head {
            Some(head) => self.insert_before(head, insn),
            None => self.push_back(insn),
        }
    }

    /// Insert an instruction immediately before `at`.
    pub fn insert_before(&mut self, at: InsnId, insn: Insn) -> InsnId {
        assert!(self.contains(at), "insert anchor {at:?} is not in the list");
        let id = self.alloc(insn);
        let prev = self.nodes[at.0 as usize].prev;
        self.nodes[id.0 as usize].prev = prev;
        self.nodes[id.0 as usize].next = Some(at);
        self.nodes[at.0 as usize].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.0 as usize].next = Some(id),
            None => self.head = Some(id),
        }
        id
    }

    /// Insert an instruction immediately after `at`.
    pub fn insert_after(&mut self, at: InsnId, insn: Insn) -> InsnId {
        assert!(self.contains(at), "insert anchor {at:?} is not in the list");
        match self.nodes[at.0 as usize].next {
            Some(next) => self.insert_before(next, insn),
            None => self.push_back(insn),
        }
    }

    /// Remove the instruction at `id`; the id becomes permanently dead.
    pub fn remove(&mut self, id: InsnId) -> Insn {
        assert!(self.contains(id), "instruction {id:?} is not in the list");
        let (prev, next) = {
            let node = &self.nodes[id.0 as usize];
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev.0 as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next.0 as usize].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[id.0 as usize];
        node.dead = true;
        node.prev = None;
        node.next = None;
        self.len -= 1;
        std::mem::replace(&mut node.insn, Insn::Line(0))
    }

    /// Replace the instruction at `id` in place, keeping its identity.
    pub fn replace(&mut self, id: InsnId, insn: Insn) -> Insn {
        std::mem::replace(self.get_mut(id), insn)
    }

    /// Walk `offset` nodes forward (positive) or backward (negative) from
    /// `id`.
    pub fn offset_from(&self, id: InsnId, offset: i32) -> Option<InsnId> {
        let mut cur = id;
        if offset >= 0 {
            for _ in 0..offset {
                cur = self.next(cur)?;
            }
        } else {
            for _ in 0..-offset {
                cur = self.prev(cur)?;
            }
        }
        Some(cur)
    }

    /// Position of `id` counted from the head.
    pub fn index_of(&self, id: InsnId) -> Option<usize> {
        self.iter().position(|(cur, _)| cur == id)
    }

    /// Iterate live nodes in list order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.head,
        }
    }

    /// Collect the ids of all live nodes in list order.
    ///
    /// Useful when the body must be mutated while walking.
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Clone every instruction of `other` into this list before `at` (append
    /// when `at` is `None`), remapping `other`'s labels onto fresh labels of
    /// this list.
    ///
    /// Returns the label mapping so callers can resolve handler ranges that
    /// referenced the source list.
    pub fn splice_before(
        &mut self,
        at: Option<InsnId>,
        other: &InsnList,
    ) -> HashMap<LabelId, LabelId> {
        let mut labels: HashMap<LabelId, LabelId> = HashMap::new();
        // issue remapped labels up front so forward jumps resolve
        for (_, insn) in other.iter() {
            if let Insn::Label(label) = insn {
                let fresh = self.new_label();
                labels.insert(*label, fresh);
            }
        }
        let remap = |label: LabelId, list: &mut Self, labels: &mut HashMap<LabelId, LabelId>| {
            *labels.entry(label).or_insert_with(|| list.new_label())
        };
        for (_, insn) in other.iter() {
            let cloned = match insn {
                Insn::Jump(op, target) => Insn::Jump(*op, remap(*target, self, &mut labels)),
                Insn::Label(label) => Insn::Label(remap(*label, self, &mut labels)),
                Insn::TableSwitch {
                    default,
                    low,
                    high,
                    targets,
                } => Insn::TableSwitch {
                    default: remap(*default, self, &mut labels),
                    low: *low,
                    high: *high,
                    targets: targets
                        .iter()
                        .map(|t| remap(*t, self, &mut labels))
                        .collect(),
                },
                Insn::LookupSwitch { default, pairs } => Insn::LookupSwitch {
                    default: remap(*default, self, &mut labels),
                    pairs: pairs
                        .iter()
                        .map(|(k, t)| (*k, remap(*t, self, &mut labels)))
                        .collect(),
                },
                other => other.clone(),
            };
            match at {
                Some(at) => self.insert_before(at, cloned),
                None => self.push_back(cloned),
            };
        }
        labels
    }
}

impl<'a> IntoIterator for &'a InsnList {
    type Item = (InsnId, &'a Insn);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward iterator over live nodes.
pub struct Iter<'a> {
    list: &'a InsnList,
    cur: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = &self.list.nodes[id.0 as usize];
        self.cur = node.next;
        Some((id, &node.insn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn simple(op: Opcode) -> Insn {
        Insn::Simple(op)
    }

    #[test]
    fn insertion_preserves_order_and_identity() {
        let mut list = InsnList::new();
        let a = list.push_back(simple(Opcode::ICONST_0));
        let c = list.push_back(simple(Opcode::IRETURN));
        let b = list.insert_before(c, simple(Opcode::IADD));
        let z = list.push_front(simple(Opcode::NOP));

        let order: Vec<_> = list.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![z, a, b, c]);
        assert_eq!(list.len(), 4);
        assert_eq!(list.index_of(b), Some(2));
    }

    #[test]
    fn removal_kills_only_that_id() {
        let mut list = InsnList::new();
        let a = list.push_back(simple(Opcode::ICONST_0));
        let b = list.push_back(simple(Opcode::POP));
        let c = list.push_back(simple(Opcode::RETURN));

        list.remove(b);
        assert!(!list.contains(b));
        assert!(list.contains(a) && list.contains(c));
        assert_eq!(list.next(a), Some(c));
        assert_eq!(list.prev(c), Some(a));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn replace_keeps_identity() {
        let mut list = InsnList::new();
        let a = list.push_back(simple(Opcode::ICONST_0));
        let old = list.replace(a, simple(Opcode::ICONST_1));
        assert_eq!(old, simple(Opcode::ICONST_0));
        assert_eq!(list.get(a), &simple(Opcode::ICONST_1));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn offset_walks_both_directions() {
        let mut list = InsnList::new();
        let a = list.push_back(simple(Opcode::ICONST_0));
        let b = list.push_back(simple(Opcode::POP));
        let c = list.push_back(simple(Opcode::RETURN));

        assert_eq!(list.offset_from(a, 2), Some(c));
        assert_eq!(list.offset_from(c, -1), Some(b));
        assert_eq!(list.offset_from(a, 0), Some(a));
        assert_eq!(list.offset_from(c, 1), None);
    }

    #[test]
    fn splice_remaps_labels() {
        let mut src = InsnList::new();
        let target = src.new_label();
        src.push_back(Insn::Label(target));
        src.push_back(simple(Opcode::ICONST_0));
        src.push_back(Insn::Jump(Opcode::GOTO, target));

        let mut dst = InsnList::new();
        // occupy label 0 in the destination so a collision would be visible
        let own = dst.new_label();
        dst.push_back(Insn::Label(own));
        let end = dst.push_back(simple(Opcode::RETURN));

        let map = dst.splice_before(Some(end), &src);
        let remapped = map[&target];
        assert_ne!(remapped, own);

        let insns: Vec<_> = dst.iter().map(|(_, insn)| insn.clone()).collect();
        assert_eq!(insns[1], Insn::Label(remapped));
        assert_eq!(insns[3], Insn::Jump(Opcode::GOTO, remapped));
        assert_eq!(insns[4], simple(Opcode::RETURN));
    }

    #[test]
    fn clone_preserves_ids() {
        let mut list = InsnList::new();
        let a = list.push_back(simple(Opcode::ICONST_0));
        let clone = list.clone();
        assert_eq!(clone.get(a), list.get(a));
    }
}
