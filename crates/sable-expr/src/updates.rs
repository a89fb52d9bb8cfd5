//! Write histories over byte arrays: update nodes and update lists.
//!
//! An update node records one write `array[index] := value` and points at
//! the previous write. Nodes are append-only and shared: many lists may
//! point into the same suffix, and extending a list allocates exactly one
//! node.

use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::array::ArrayRef;
use crate::expr::{un_equiv_cached, un_equiv_record, ExprFlags, ExprRef, InstId, MAGIC_HASH_CONSTANT};

/// A single write plus the chain of writes before it.
#[derive(Debug)]
pub struct UpdateNode {
    pub index: ExprRef,
    pub value: ExprRef,
    pub next: Option<UpdateNodeRef>,
    hash: u64,
    /// Length of the chain ending here, including this node.
    size: u32,
    pub flags: Cell<ExprFlags>,
    pub inst: Cell<Option<InstId>>,
}

pub type UpdateNodeRef = Rc<UpdateNode>;

impl UpdateNode {
    pub fn new(next: Option<UpdateNodeRef>, index: ExprRef, value: ExprRef) -> UpdateNodeRef {
        let size = next.as_ref().map_or(0, |n| n.size) + 1;
        let mut hash = index.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
        hash = (hash << 1) ^ value.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
        if let Some(n) = &next {
            hash = (hash << 1) ^ n.hash.wrapping_mul(MAGIC_HASH_CONSTANT);
        }
        Rc::new(UpdateNode {
            index,
            value,
            next,
            hash,
            size,
            flags: Cell::new(ExprFlags::default()),
            inst: Cell::new(None),
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Structural order over update chains: hash, then length, then the
    /// index/value/next recursion. Equal pairs are cached while a
    /// [`crate::expr::CompareGuard`] is live.
    pub fn compare(&self, other: &UpdateNode) -> Ordering {
        if std::ptr::eq(self, other) {
            return Ordering::Equal;
        }
        match self.hash.cmp(&other.hash) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.size.cmp(&other.size) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let (pa, pb) = (
            self as *const _ as *const (),
            other as *const _ as *const (),
        );
        if un_equiv_cached(pa, pb) {
            return Ordering::Equal;
        }
        let ord = self
            .index
            .compare(&other.index)
            .then_with(|| self.value.compare(&other.value))
            .then_with(|| match (&self.next, &other.next) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.compare(b),
            });
        if ord == Ordering::Equal {
            un_equiv_record(pa, pb);
        }
        ord
    }

    pub fn structurally_equal(&self, other: &UpdateNode) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

/// A write history over one array: the array descriptor plus the most
/// recent update node, or none for the pristine array.
///
/// Lists are value types; copying a list copies the head pointer and shares
/// the node chain.
#[derive(Debug, Clone)]
pub struct UpdateList {
    pub root: ArrayRef,
    pub head: Option<UpdateNodeRef>,
}

impl UpdateList {
    pub fn new(root: ArrayRef, head: Option<UpdateNodeRef>) -> Self {
        Self { root, head }
    }

    pub fn fresh(root: ArrayRef) -> Self {
        Self { root, head: None }
    }

    /// Number of writes layered over the array.
    pub fn len(&self) -> u32 {
        self.head.as_ref().map_or(0, |n| n.size())
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Record a new write; allocates exactly one node.
    pub fn extend(&mut self, index: ExprRef, value: ExprRef) {
        debug_assert_eq!(index.width(), self.root.domain);
        debug_assert_eq!(value.width(), self.root.range);
        self.head = Some(UpdateNode::new(self.head.take(), index, value));
    }

    pub fn hash(&self) -> u64 {
        let mut h = self.root.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
        if let Some(head) = &self.head {
            h = (h << 1) ^ head.hash().wrapping_mul(MAGIC_HASH_CONSTANT);
        }
        h
    }

    pub fn compare(&self, other: &UpdateList) -> Ordering {
        let root_ord = if Rc::ptr_eq(&self.root, &other.root) {
            Ordering::Equal
        } else {
            self.root
                .name
                .cmp(&other.root.name)
                .then_with(|| self.root.size.cmp(&other.root.size))
                .then_with(|| self.root.hash().cmp(&other.root.hash()))
                .then_with(|| {
                    // Distinct descriptors that tie on everything else are
                    // still distinct objects; order them by address.
                    (Rc::as_ptr(&self.root) as usize).cmp(&(Rc::as_ptr(&other.root) as usize))
                })
        };
        root_ord.then_with(|| match (&self.head, &other.head) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.compare(b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayCache;
    use crate::builders;

    #[test]
    fn extend_shares_the_tail() {
        let mut cache = ArrayCache::new();
        let array = cache.make_symbolic("a", 4);
        let mut ul = UpdateList::fresh(array);
        ul.extend(builders::constant(0, 32), builders::constant(1, 8));
        let forked = ul.clone();
        ul.extend(builders::constant(1, 32), builders::constant(2, 8));
        assert_eq!(ul.len(), 2);
        assert_eq!(forked.len(), 1);
        let tail = ul.head.as_ref().unwrap().next.as_ref().unwrap();
        assert!(Rc::ptr_eq(tail, forked.head.as_ref().unwrap()));
    }

    #[test]
    fn structural_compare_and_hash_agree() {
        let mut cache = ArrayCache::new();
        let array = cache.make_symbolic("a", 4);
        let mut ul1 = UpdateList::fresh(array.clone());
        let mut ul2 = UpdateList::fresh(array);
        for ul in [&mut ul1, &mut ul2] {
            ul.extend(builders::constant(0, 32), builders::constant(7, 8));
        }
        assert_eq!(ul1.compare(&ul2), Ordering::Equal);
        assert_eq!(ul1.hash(), ul2.hash());
        let a = ul1.head.as_ref().unwrap();
        let b = ul2.head.as_ref().unwrap();
        assert!(a.structurally_equal(b));
        assert_eq!(a.hash(), b.hash());
    }
}
