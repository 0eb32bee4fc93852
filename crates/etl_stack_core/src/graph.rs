//! Resource dependency graph.
//!
//! Nodes are resource declarations. Edges come from two places that are kept
//! apart: value references found in a node's properties, and explicit
//! ordering edges for requirements no reference expresses (a collection must
//! wait for its security policies to exist).

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::DeclarationError;
use crate::intrinsics::collect_references;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

impl DeletionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "Delete",
            Self::Retain => "Retain",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub logical_id: String,
    pub resource_type: String,
    pub properties: Value,
    pub deletion_policy: Option<DeletionPolicy>,
    explicit_dependencies: BTreeSet<String>,
}

impl ResourceNode {
    pub fn new(logical_id: &str, resource_type: &str, properties: Value) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            properties,
            deletion_policy: None,
            explicit_dependencies: BTreeSet::new(),
        }
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }

    /// Ordering edges added with [`ResourceGraph::add_dependency`].
    pub fn explicit_dependencies(&self) -> &BTreeSet<String> {
        &self.explicit_dependencies
    }

    /// Every name referenced from the properties, including template
    /// parameters.
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_references(&self.properties, &mut names);
        names
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    parameters: BTreeSet<String>,
    nodes: BTreeMap<String, ResourceNode>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names a template parameter so references to it are not taken for
    /// resource edges.
    pub fn declare_parameter(&mut self, name: &str) {
        self.parameters.insert(name.to_string());
    }

    pub fn parameters(&self) -> &BTreeSet<String> {
        &self.parameters
    }

    pub fn add_resource(&mut self, node: ResourceNode) -> Result<(), DeclarationError> {
        if self.nodes.contains_key(&node.logical_id) || self.parameters.contains(&node.logical_id)
        {
            return Err(DeclarationError::DuplicateResource(node.logical_id));
        }
        self.nodes.insert(node.logical_id.clone(), node);
        Ok(())
    }

    /// Adds an ordering edge: `dependent` is created after `prerequisite` and
    /// deleted before it.
    pub fn add_dependency(
        &mut self,
        dependent: &str,
        prerequisite: &str,
    ) -> Result<(), DeclarationError> {
        if dependent == prerequisite {
            return Err(DeclarationError::SelfDependency(dependent.to_string()));
        }
        if !self.nodes.contains_key(prerequisite) {
            return Err(DeclarationError::UnknownResource(prerequisite.to_string()));
        }
        let node = self
            .nodes
            .get_mut(dependent)
            .ok_or_else(|| DeclarationError::UnknownResource(dependent.to_string()))?;
        node.explicit_dependencies.insert(prerequisite.to_string());
        Ok(())
    }

    pub fn get(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.nodes.get(logical_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a ResourceNode> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.resource_type == resource_type)
    }

    /// Resources referenced through property values.
    pub fn reference_dependencies(&self, logical_id: &str) -> BTreeSet<String> {
        self.nodes
            .get(logical_id)
            .map(|node| {
                node.referenced_names()
                    .into_iter()
                    .filter(|name| self.nodes.contains_key(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Everything that must exist before `logical_id`: reference edges and
    /// explicit edges together.
    pub fn prerequisites(&self, logical_id: &str) -> Result<BTreeSet<String>, DeclarationError> {
        let node = self
            .nodes
            .get(logical_id)
            .ok_or_else(|| DeclarationError::UnknownResource(logical_id.to_string()))?;
        let mut prerequisites = self.reference_dependencies(logical_id);
        prerequisites.extend(node.explicit_dependencies.iter().cloned());
        Ok(prerequisites)
    }

    /// Names referenced from properties that are neither resources nor
    /// declared parameters.
    pub fn dangling_references(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut dangling = BTreeMap::new();
        for node in self.nodes.values() {
            let missing: BTreeSet<String> = node
                .referenced_names()
                .into_iter()
                .filter(|name| !self.nodes.contains_key(name) && !self.parameters.contains(name))
                .collect();
            if !missing.is_empty() {
                dangling.insert(node.logical_id.clone(), missing);
            }
        }
        dangling
    }

    /// Topological order for creation. Among resources that are ready at the
    /// same time the lexically smallest logical id goes first, so the order is
    /// stable across runs.
    pub fn creation_order(&self) -> Result<Vec<String>, DeclarationError> {
        let mut remaining: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for logical_id in self.nodes.keys() {
            let prerequisites = self.prerequisites(logical_id)?;
            for prerequisite in &prerequisites {
                dependents
                    .entry(prerequisite.clone())
                    .or_default()
                    .insert(logical_id.clone());
            }
            remaining.insert(logical_id.clone(), prerequisites);
        }

        let mut ready: BTreeSet<String> = remaining
            .iter()
            .filter(|(_, prerequisites)| prerequisites.is_empty())
            .map(|(logical_id, _)| logical_id.clone())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            remaining.remove(&next);
            if let Some(waiting) = dependents.get(&next) {
                for dependent in waiting {
                    if let Some(prerequisites) = remaining.get_mut(dependent) {
                        prerequisites.remove(&next);
                        if prerequisites.is_empty() {
                            ready.insert(dependent.clone());
                        }
                    }
                }
            }
            order.push(next);
        }

        if !remaining.is_empty() {
            return Err(DeclarationError::Cycle(remaining.into_keys().collect()));
        }
        Ok(order)
    }

    /// Teardown order: the exact reverse of [`Self::creation_order`].
    pub fn deletion_order(&self) -> Result<Vec<String>, DeclarationError> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }
}
