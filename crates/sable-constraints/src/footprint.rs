//! Footprints: which arrays, and which bytes of them, an expression reads.
//!
//! A footprint records per-array dense byte-index sets for reads at
//! concrete offsets and a whole-object mark for reads at symbolic offsets.
//! Whole-object subsumes any per-index set for the same array. Footprints
//! also carry the expressions they were built from, so a factor of the
//! constraint partition can list its own constraints.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use sable_expr::{ArrayId, ArrayRef, ExprKind, ExprRef};

/// Dense set of byte indices within one array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteSet(BTreeSet<u32>);

impl ByteSet {
    pub fn insert(&mut self, index: u32) -> bool {
        self.0.insert(index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn intersects(&self, other: &ByteSet) -> bool {
        let (small, large) = if self.0.len() <= other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        small.iter().any(|i| large.contains(i))
    }

    /// Union in `other`; true if anything was added.
    pub fn add(&mut self, other: &ByteSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }
}

/// The independent-element set of one or more expressions.
#[derive(Debug, Clone, Default)]
pub struct Footprint {
    elements: FxHashMap<ArrayId, ByteSet>,
    whole_objects: FxHashSet<ArrayId>,
    /// The expressions this footprint was accumulated from.
    pub exprs: Vec<ExprRef>,
}

impl Footprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one expression's DAG, including update-list chains, for reads.
    pub fn from_expr(e: &ExprRef) -> Self {
        let mut fp = Footprint::new();
        fp.exprs.push(e.clone());
        let mut seen = FxHashSet::default();
        let mut stack = vec![e.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(&*node as *const _ as usize) {
                continue;
            }
            if let ExprKind::Read { updates, index } = node.kind() {
                let array = ArrayId(updates.root.clone());
                if let Some(ci) = index.as_constant() {
                    if !fp.whole_objects.contains(&array) {
                        fp.elements
                            .entry(array)
                            .or_default()
                            .insert(ci.as_u64() as u32);
                    }
                } else {
                    fp.elements.remove(&array);
                    fp.whole_objects.insert(array);
                }
                let mut un = updates.head.clone();
                while let Some(n) = un {
                    stack.push(n.index.clone());
                    stack.push(n.value.clone());
                    un = n.next.clone();
                }
            }
            stack.extend(node.kids());
        }
        fp
    }

    /// Do the two footprints touch any common array byte, with whole-object
    /// covering every byte of its array?
    pub fn intersects(&self, other: &Footprint) -> bool {
        for a in &self.whole_objects {
            if other.whole_objects.contains(a) || other.elements.contains_key(a) {
                return true;
            }
        }
        for (a, set) in &self.elements {
            if other.whole_objects.contains(a) {
                return true;
            }
            if let Some(os) = other.elements.get(a) {
                if set.intersects(os) {
                    return true;
                }
            }
        }
        false
    }

    /// Union in `other`, promoting to whole-object where either side is,
    /// and concatenate its expression list. Returns whether the array/byte
    /// coverage grew.
    pub fn add(&mut self, other: &Footprint) -> bool {
        let mut changed = false;
        for a in &other.whole_objects {
            if self.whole_objects.insert(a.clone()) {
                self.elements.remove(a);
                changed = true;
            }
        }
        for (a, os) in &other.elements {
            if self.whole_objects.contains(a) {
                continue;
            }
            changed |= self.elements.entry(a.clone()).or_default().add(os);
        }
        self.exprs.extend(other.exprs.iter().cloned());
        changed
    }

    /// Every array touched, ordered by name for deterministic queries.
    pub fn arrays(&self) -> Vec<ArrayRef> {
        let mut out: Vec<ArrayRef> = self
            .elements
            .keys()
            .chain(self.whole_objects.iter())
            .map(|a| a.0.clone())
            .collect();
        out.sort_by(|x, y| {
            x.name
                .cmp(&y.name)
                .then_with(|| (std::rc::Rc::as_ptr(x) as usize).cmp(&(std::rc::Rc::as_ptr(y) as usize)))
        });
        out
    }

    pub fn has_arrays(&self) -> bool {
        !self.elements.is_empty() || !self.whole_objects.is_empty()
    }

    /// The concrete byte indices recorded for `array`, if it is not marked
    /// whole-object.
    pub fn known_indices(&self, array: &ArrayRef) -> Option<&ByteSet> {
        self.elements.get(&ArrayId(array.clone()))
    }

    pub fn is_whole_object(&self, array: &ArrayRef) -> bool {
        self.whole_objects.contains(&ArrayId(array.clone()))
    }
}
