use std::collections::HashMap;

use crate::error::HierarchyError;
use crate::kind::Kind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Abstract,
    Concrete,
}

#[derive(Clone, Debug)]
struct Node {
    shape: Shape,
    parent: Option<Kind>,
    children: Vec<Kind>,
}

/// Builder for the closed-world event-type hierarchy.
///
/// Register every kind once at startup, parents before children, then
/// freeze with [`HierarchyBuilder::build`]. There is no way to add kinds
/// afterwards.
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    nodes: HashMap<Kind, Node>,
    order: Vec<Kind>,
}

impl HierarchyBuilder {
    /// Registers an abstract kind, instantiable only through descendants.
    pub fn abstract_kind(
        &mut self,
        kind: Kind,
        parent: Option<Kind>,
    ) -> Result<&mut Self, HierarchyError> {
        self.insert(kind, parent, Shape::Abstract)
    }

    /// Registers a concrete, instantiable kind.
    pub fn concrete_kind(
        &mut self,
        kind: Kind,
        parent: Option<Kind>,
    ) -> Result<&mut Self, HierarchyError> {
        self.insert(kind, parent, Shape::Concrete)
    }

    fn insert(
        &mut self,
        kind: Kind,
        parent: Option<Kind>,
        shape: Shape,
    ) -> Result<&mut Self, HierarchyError> {
        if self.nodes.contains_key(&kind) {
            return Err(HierarchyError::DuplicateKind(kind));
        }
        if let Some(parent) = parent {
            let Some(node) = self.nodes.get_mut(&parent) else {
                return Err(HierarchyError::UnknownParent { kind, parent });
            };
            node.children.push(kind);
        }
        self.nodes.insert(
            kind,
            Node {
                shape,
                parent,
                children: Vec::new(),
            },
        );
        self.order.push(kind);
        Ok(self)
    }

    /// Freezes the hierarchy.
    ///
    /// Precomputes the concrete-descendant set of every node and the
    /// key-to-kind index, and rejects log-key collisions.
    pub fn build(self) -> Result<Hierarchy, HierarchyError> {
        let mut keys = HashMap::with_capacity(self.order.len());
        for kind in &self.order {
            let key = kind.key();
            if let Some(first) = keys.insert(key.clone(), *kind) {
                return Err(HierarchyError::KeyCollision {
                    first,
                    second: *kind,
                    key,
                });
            }
        }

        let mut descendants = HashMap::with_capacity(self.order.len());
        for kind in &self.order {
            let mut concrete = Vec::new();
            self.collect_concrete(*kind, &mut concrete);
            descendants.insert(*kind, concrete);
        }

        Ok(Hierarchy {
            nodes: self.nodes,
            descendants,
            keys,
        })
    }

    fn collect_concrete(&self, kind: Kind, out: &mut Vec<Kind>) {
        let node = &self.nodes[&kind];
        if node.shape == Shape::Concrete {
            out.push(kind);
        }
        for child in &node.children {
            self.collect_concrete(*child, out);
        }
    }
}

/// The frozen event-type hierarchy.
///
/// Fully populated before the first subscribe call and immutable
/// afterwards.
#[derive(Debug)]
pub struct Hierarchy {
    nodes: HashMap<Kind, Node>,
    descendants: HashMap<Kind, Vec<Kind>>,
    keys: HashMap<String, Kind>,
}

impl Hierarchy {
    /// Starts building a hierarchy.
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::default()
    }

    /// Whether the kind is registered.
    pub fn contains(&self, kind: Kind) -> bool {
        self.nodes.contains_key(&kind)
    }

    /// Whether the kind is registered and concrete.
    pub fn is_concrete(&self, kind: Kind) -> bool {
        self.nodes
            .get(&kind)
            .is_some_and(|node| node.shape == Shape::Concrete)
    }

    /// The concrete kinds reachable from `kind`, itself included when
    /// concrete. Unknown kinds yield an empty slice.
    pub fn concrete_descendants(&self, kind: Kind) -> &[Kind] {
        self.descendants.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// The chain from `kind` up to its root, `kind` first. Empty for
    /// unknown kinds.
    pub fn ancestors(&self, kind: Kind) -> Vec<Kind> {
        let mut chain = Vec::new();
        let mut cursor = self.contains(kind).then_some(kind);
        while let Some(kind) = cursor {
            chain.push(kind);
            cursor = self.nodes[&kind].parent;
        }
        chain
    }

    /// Looks a kind up by its log key.
    pub fn kind_for_key(&self, key: &str) -> Option<Kind> {
        self.keys.get(key).copied()
    }
}
