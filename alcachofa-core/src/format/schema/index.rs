use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{DescriptorKind, EnumType, ExternalType, ObjectRelations, Properties, SchemaBlock, TypeDescriptor};
use crate::error::{Error, Result};

/// Name lookups over the top-level descriptors of a [`SchemaBlock`].
///
/// The first descriptor of a given kind and name wins. Positive answers of
/// [`SchemaIndex::is_base_type`] are memoized.
pub struct SchemaIndex<'a> {
    block: &'a SchemaBlock,
    by_name: HashMap<(DescriptorKind, &'a str), usize>,
    base_cache: RefCell<HashSet<(String, String)>>,
}

impl<'a> SchemaIndex<'a> {
    pub fn new(block: &'a SchemaBlock) -> Self {
        let mut by_name = HashMap::new();
        for (i, descriptor) in block.descriptors.iter().enumerate() {
            if let Some(name) = descriptor.stored_name() {
                by_name.entry((descriptor.kind(), name)).or_insert(i);
            }
        }
        Self {
            block,
            by_name,
            base_cache: RefCell::new(HashSet::new()),
        }
    }

    pub fn by_name(&self, kind: DescriptorKind, name: &str) -> Option<&'a TypeDescriptor> {
        self.by_name
            .get(&(kind, name))
            .map(|&i| &self.block.descriptors[i])
    }

    /// Like [`SchemaIndex::by_name`], failing with [`Error::UnresolvedType`].
    pub fn require(&self, kind: DescriptorKind, name: &str) -> Result<&'a TypeDescriptor> {
        self.by_name(kind, name).ok_or_else(|| Error::UnresolvedType {
            kind,
            name: name.to_string(),
        })
    }

    pub fn object_relations(&self, name: &str) -> Result<&'a ObjectRelations> {
        match self.require(DescriptorKind::ObjectRelations, name)? {
            TypeDescriptor::ObjectRelations(o) => Ok(o),
            _ => unreachable!("index keyed by kind"),
        }
    }

    pub fn external_type(&self, name: &str) -> Result<&'a ExternalType> {
        match self.require(DescriptorKind::ExternalType, name)? {
            TypeDescriptor::ExternalType(e) => Ok(e),
            _ => unreachable!("index keyed by kind"),
        }
    }

    pub fn enum_type(&self, name: &str) -> Result<&'a EnumType> {
        match self.require(DescriptorKind::EnumType, name)? {
            TypeDescriptor::EnumType(e) => Ok(e),
            _ => unreachable!("index keyed by kind"),
        }
    }

    pub fn properties(&self, name: &str) -> Result<&'a Properties> {
        match self.require(DescriptorKind::Properties, name)? {
            TypeDescriptor::Properties(p) => Ok(p),
            _ => unreachable!("index keyed by kind"),
        }
    }

    /// Whether `base` is `sub` itself or reachable through declared base types.
    ///
    /// Types without an ObjectRelations entry have no bases. Cycles terminate.
    pub fn is_base_type(&self, sub: &str, base: &str) -> bool {
        if sub == base {
            return true;
        }
        let key = (sub.to_string(), base.to_string());
        if self.base_cache.borrow().contains(&key) {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(sub);
        visited.insert(sub);
        while let Some(current) = queue.pop_front() {
            let Some(TypeDescriptor::ObjectRelations(rel)) = self.by_name(DescriptorKind::ObjectRelations, current)
            else {
                continue;
            };
            for parent in &rel.base_types {
                if parent == base {
                    self.base_cache.borrow_mut().insert(key);
                    return true;
                }
                if visited.insert(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }
        false
    }

    #[cfg(test)]
    fn memoized(&self) -> usize {
        self.base_cache.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::schema::{Generation, ObjectRelations, TypeDescriptor};

    fn relations(name: &str, bases: &[&str]) -> TypeDescriptor {
        TypeDescriptor::ObjectRelations(ObjectRelations {
            name: name.to_string(),
            base_types: bases.iter().map(|b| b.to_string()).collect(),
            relations: Vec::new(),
        })
    }

    fn block(descriptors: Vec<TypeDescriptor>) -> SchemaBlock {
        SchemaBlock {
            timestamp: 0,
            generation: Generation::V3,
            descriptors,
        }
    }

    #[test]
    fn transitive_base_types() {
        let b = block(vec![relations("A", &["B"]), relations("B", &["C"]), relations("C", &[])]);
        let index = b.index();
        assert!(index.is_base_type("A", "C"));
        assert!(index.is_base_type("A", "B"));
        assert!(index.is_base_type("C", "C"));
        assert!(!index.is_base_type("C", "A"));
        assert!(!index.is_base_type("Unknown", "A"));
    }

    #[test]
    fn cycles_terminate() {
        let b = block(vec![relations("A", &["B"]), relations("B", &["A"])]);
        let index = b.index();
        assert!(index.is_base_type("A", "B"));
        assert!(!index.is_base_type("A", "Z"));
    }

    #[test]
    fn positive_answers_are_memoized() {
        let b = block(vec![relations("A", &["B"]), relations("B", &[])]);
        let index = b.index();
        assert!(index.is_base_type("A", "B"));
        assert!(index.is_base_type("A", "B"));
        assert!(!index.is_base_type("B", "A"));
        assert_eq!(index.memoized(), 1);
    }

    #[test]
    fn first_match_wins() {
        let b = block(vec![relations("A", &["First"]), relations("A", &["Second"])]);
        let index = b.index();
        let rel = index.object_relations("A").unwrap();
        assert_eq!(rel.base_types, vec!["First".to_string()]);
        assert!(matches!(
            index.enum_type("A"),
            Err(Error::UnresolvedType {
                kind: DescriptorKind::EnumType,
                ..
            })
        ));
    }
}
