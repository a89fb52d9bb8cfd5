//! Byte-array descriptors and the cache that uniques them.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::{BitVecValue, Width, WIDTH_32, WIDTH_8};

/// A named symbolic or constant byte array.
///
/// Identity is by pointer: the cache hands out shared references, and two
/// descriptors with the same name from different caches are distinct. Every
/// attribute is immutable after construction.
#[derive(Debug)]
pub struct Array {
    pub name: String,
    /// Size in bytes.
    pub size: u32,
    /// How many bits an index into the array has.
    pub domain: Width,
    /// How many bits one element holds.
    pub range: Width,
    /// Frozen contents for a constant array; empty for a symbolic one.
    pub constant_values: Vec<BitVecValue>,
    hash: u64,
}

pub type ArrayRef = Rc<Array>;

impl Array {
    fn new(
        name: String,
        size: u32,
        domain: Width,
        range: Width,
        constant_values: Vec<BitVecValue>,
    ) -> Self {
        debug_assert!(
            constant_values.is_empty() || constant_values.len() == size as usize,
            "constant array contents must cover the whole array"
        );
        let hash = content_hash(&name, size, domain, range, &constant_values);
        Self {
            name,
            size,
            domain,
            range,
            constant_values,
            hash,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        self.constant_values.is_empty()
    }

    pub fn is_constant(&self) -> bool {
        !self.is_symbolic()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

fn content_hash(
    name: &str,
    size: u32,
    domain: Width,
    range: Width,
    values: &[BitVecValue],
) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    for b in name.bytes() {
        h = (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3);
    }
    h = (h ^ u64::from(size)).wrapping_mul(0x100_0000_01b3);
    h = (h ^ u64::from(domain)).wrapping_mul(0x100_0000_01b3);
    h = (h ^ u64::from(range)).wrapping_mul(0x100_0000_01b3);
    for v in values {
        h = (h ^ v.hash_value()).wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// An array reference keyed by pointer identity, for use in maps and sets.
#[derive(Debug, Clone)]
pub struct ArrayId(pub ArrayRef);

impl PartialEq for ArrayId {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ArrayId {}

impl std::hash::Hash for ArrayId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Uniques array descriptors: symbolic arrays by `(name, size)`, constant
/// arrays by their full contents.
#[derive(Debug, Default)]
pub struct ArrayCache {
    symbolic: FxHashMap<(String, u32), ArrayRef>,
    constant: FxHashMap<u64, Vec<ArrayRef>>,
}

impl ArrayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A symbolic array of `size` bytes with 32-bit indices.
    pub fn make_symbolic(&mut self, name: &str, size: u32) -> ArrayRef {
        self.make_symbolic_sized(name, size, WIDTH_32, WIDTH_8)
    }

    pub fn make_symbolic_sized(
        &mut self,
        name: &str,
        size: u32,
        domain: Width,
        range: Width,
    ) -> ArrayRef {
        self.symbolic
            .entry((name.to_owned(), size))
            .or_insert_with(|| {
                Rc::new(Array::new(name.to_owned(), size, domain, range, Vec::new()))
            })
            .clone()
    }

    /// A constant array frozen to `values`, one element per byte.
    pub fn make_constant(&mut self, name: &str, values: Vec<BitVecValue>) -> ArrayRef {
        let size = values.len() as u32;
        let hash = content_hash(name, size, WIDTH_32, WIDTH_8, &values);
        let bucket = self.constant.entry(hash).or_default();
        for existing in bucket.iter() {
            if existing.name == name && existing.constant_values == values {
                return existing.clone();
            }
        }
        let array = Rc::new(Array::new(
            name.to_owned(),
            size,
            WIDTH_32,
            WIDTH_8,
            values,
        ));
        bucket.push(array.clone());
        array
    }
}
