pub mod file;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::BlockDefinition;
use crate::definition::value::ParameterValue;

/// Identity of a placed block. Stable across parameter updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn generate() -> Self {
        BlockId(format!("block_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        BlockId(s.to_string())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A placed, parameterized occurrence of a block definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInstance {
    pub id: BlockId,
    /// May dangle if the definition was removed from the registry.
    pub definition_id: String,
    /// Keys are exactly the definition's parameter names.
    pub parameters: BTreeMap<String, ParameterValue>,
    /// Non-owning back-reference; `None` means top-level.
    pub parent_id: Option<BlockId>,
}

impl BlockInstance {
    /// A fresh instance with every parameter at its declared default.
    pub fn from_definition(definition: &BlockDefinition, parent_id: Option<BlockId>) -> Self {
        let parameters = definition
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect();
        BlockInstance {
            id: BlockId::generate(),
            definition_id: definition.id.clone(),
            parameters,
            parent_id,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.parameter(name).and_then(ParameterValue::as_number)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.parameter(name).and_then(ParameterValue::as_bool)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.parameter(name).and_then(ParameterValue::as_text)
    }

    /// A copy with one parameter replaced; the id is preserved.
    pub fn with_parameter(&self, name: &str, value: ParameterValue) -> Self {
        let mut updated = self.clone();
        updated.parameters.insert(name.to_string(), value);
        updated
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// The user's program: a forest of block instances stored as one ordered list.
///
/// Sibling order is list order. Children are only ever attached to an existing
/// block, so the parent chain of every instance is acyclic.
#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    blocks: Vec<BlockInstance>,
    /// Ids of instances whose definition owns a body slot.
    hosts: HashSet<BlockId>,
}

impl ProgramModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_top_level_block(&mut self, definition: &BlockDefinition) -> BlockInstance {
        self.insert(BlockInstance::from_definition(definition, None), definition)
    }

    /// Attach a new block to the end of `parent_id`'s body.
    ///
    /// Returns `None`, leaving the model untouched, when the parent does not
    /// exist or cannot host children.
    pub fn add_child_block(
        &mut self,
        parent_id: &BlockId,
        definition: &BlockDefinition,
    ) -> Option<BlockInstance> {
        if !self.hosts.contains(parent_id) || self.get(parent_id).is_none() {
            return None;
        }
        let instance = BlockInstance::from_definition(definition, Some(parent_id.clone()));
        Some(self.insert(instance, definition))
    }

    /// Replace one existing parameter value. Unknown block ids and parameter
    /// names the block was not created with are ignored.
    pub fn update_parameter(
        &mut self,
        block_id: &BlockId,
        name: &str,
        value: ParameterValue,
    ) -> bool {
        match self.blocks.iter_mut().find(|b| &b.id == block_id) {
            Some(block) if block.parameters.contains_key(name) => {
                *block = block.with_parameter(name, value);
                true
            }
            _ => false,
        }
    }

    /// Remove a block and, transitively, every block nested under it.
    /// Returns the removed instances in model order.
    pub fn remove_block(&mut self, block_id: &BlockId) -> Vec<BlockInstance> {
        if self.get(block_id).is_none() {
            return Vec::new();
        }
        let mut doomed = self.descendants_of(block_id);
        doomed.insert(block_id.clone());

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.blocks)
            .into_iter()
            .partition(|b| doomed.contains(&b.id));
        self.blocks = kept;
        for block in &removed {
            self.hosts.remove(&block.id);
        }
        removed
    }

    /// Ids of every block whose parent chain reaches `block_id`.
    pub fn descendants_of(&self, block_id: &BlockId) -> HashSet<BlockId> {
        descendants(&self.blocks, block_id)
    }

    pub fn children_of<'a>(&'a self, parent_id: &'a BlockId) -> impl Iterator<Item = &'a BlockInstance> {
        self.blocks
            .iter()
            .filter(move |b| b.parent_id.as_ref() == Some(parent_id))
    }

    pub fn top_level(&self) -> impl Iterator<Item = &BlockInstance> {
        self.blocks.iter().filter(|b| b.is_top_level())
    }

    pub fn get(&self, block_id: &BlockId) -> Option<&BlockInstance> {
        self.blocks.iter().find(|b| &b.id == block_id)
    }

    /// Every instance, in insertion order.
    pub fn blocks(&self) -> &[BlockInstance] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.hosts.clear();
    }

    /// Freeze the current program for execution.
    pub fn snapshot(&self) -> ProgramSnapshot {
        ProgramSnapshot {
            blocks: self.blocks.iter().cloned().collect(),
        }
    }

    fn insert(&mut self, instance: BlockInstance, definition: &BlockDefinition) -> BlockInstance {
        if definition.can_host_children() {
            self.hosts.insert(instance.id.clone());
        }
        self.blocks.push(instance.clone());
        instance
    }
}

/// An immutable copy of a program, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ProgramSnapshot {
    blocks: Arc<[BlockInstance]>,
}

impl ProgramSnapshot {
    pub fn top_level(&self) -> Vec<BlockInstance> {
        self.blocks.iter().filter(|b| b.is_top_level()).cloned().collect()
    }

    pub fn children_of(&self, parent_id: &BlockId) -> Vec<BlockInstance> {
        self.blocks
            .iter()
            .filter(|b| b.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect()
    }

    pub fn has_top_level(&self) -> bool {
        self.blocks.iter().any(BlockInstance::is_top_level)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

// Fixed-point closure over parent links. List order carries no depth information.
fn descendants(blocks: &[BlockInstance], root: &BlockId) -> HashSet<BlockId> {
    let mut found: HashSet<BlockId> = HashSet::new();
    loop {
        let before = found.len();
        for block in blocks {
            if let Some(parent) = &block.parent_id
                && (parent == root || found.contains(parent))
            {
                found.insert(block.id.clone());
            }
        }
        if found.len() == before {
            return found;
        }
    }
}
