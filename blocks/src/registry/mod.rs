pub mod standard;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::{BlockDefinition, Category};

/// A palette category, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockCategory {
    pub id: Category,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("block definition '{0}' is already registered")]
    DuplicateBlock(String),
    #[error("category '{0}' is already registered")]
    DuplicateCategory(String),
}

/// Static catalog of block definitions, indexed by id.
///
/// Lookups by id are O(1); iteration follows registration order, which is the
/// order palettes present blocks in.
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    categories: Vec<BlockCategory>,
    blocks: Vec<BlockDefinition>,
    index: HashMap<String, usize>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_category(&mut self, category: BlockCategory) -> Result<(), RegistryError> {
        if self.categories.iter().any(|c| c.id == category.id) {
            return Err(RegistryError::DuplicateCategory(category.id.to_string()));
        }
        self.categories.push(category);
        Ok(())
    }

    pub fn register(&mut self, definition: BlockDefinition) -> Result<(), RegistryError> {
        if self.index.contains_key(&definition.id) {
            return Err(RegistryError::DuplicateBlock(definition.id));
        }
        self.index.insert(definition.id.clone(), self.blocks.len());
        self.blocks.push(definition);
        Ok(())
    }

    pub fn get_block(&self, id: &str) -> Option<&BlockDefinition> {
        self.index.get(id).map(|&i| &self.blocks[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn categories(&self) -> &[BlockCategory] {
        &self.categories
    }

    pub fn blocks(&self) -> &[BlockDefinition] {
        &self.blocks
    }

    /// Definitions in one category, in registration order.
    pub fn blocks_in<'a>(
        &'a self,
        category: &'a Category,
    ) -> impl Iterator<Item = &'a BlockDefinition> + 'a {
        self.blocks.iter().filter(move |b| &b.category == category)
    }

    /// Definitions that may be placed inside a control block's body.
    pub fn child_compatible<'a>(
        &'a self,
        category: &'a Category,
    ) -> impl Iterator<Item = &'a BlockDefinition> + 'a {
        self.blocks_in(category).filter(|b| b.shape.is_stackable())
    }
}
