//! TOML program files: a nested description of a block forest.
//!
//! ```toml
//! [[blocks]]
//! definition = "repeat"
//! params = { times = 3 }
//!
//! [[blocks.children]]
//! definition = "move_joint"
//! params = { joint = "Pitch", angle = 120 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::definition::value::ParameterValue;
use crate::program::{BlockId, ProgramModel};
use crate::registry::BlockRegistry;

#[derive(Debug, Error)]
pub enum ProgramFileError {
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("invalid program file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown block definition '{0}'")]
    UnknownDefinition(String),
    #[error("block '{definition}' has no parameter '{parameter}'")]
    UnknownParameter { definition: String, parameter: String },
    #[error("block '{definition}' parameter '{parameter}' expects {expected}, got {got}")]
    ParameterType {
        definition: String,
        parameter: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("block '{0}' cannot contain other blocks")]
    NotAContainer(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgramFile {
    #[serde(default)]
    pub blocks: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockEntry {
    pub definition: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParameterValue>,
    #[serde(default)]
    pub children: Vec<BlockEntry>,
}

impl ProgramFile {
    pub fn from_toml(source: &str) -> Result<Self, ProgramFileError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProgramFileError> {
        let source = std::fs::read_to_string(path).map_err(|e| ProgramFileError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&source)
    }

    /// Build a program model through the model's own mutation operations.
    pub fn build(&self, registry: &BlockRegistry) -> Result<ProgramModel, ProgramFileError> {
        let mut model = ProgramModel::new();
        for entry in &self.blocks {
            add_entry(&mut model, registry, entry, None)?;
        }
        Ok(model)
    }
}

fn add_entry(
    model: &mut ProgramModel,
    registry: &BlockRegistry,
    entry: &BlockEntry,
    parent: Option<&BlockId>,
) -> Result<(), ProgramFileError> {
    let definition = registry
        .get_block(&entry.definition)
        .ok_or_else(|| ProgramFileError::UnknownDefinition(entry.definition.clone()))?;

    if !entry.children.is_empty() && !definition.can_host_children() {
        return Err(ProgramFileError::NotAContainer(entry.definition.clone()));
    }

    let instance = match parent {
        None => model.add_top_level_block(definition),
        // The parent was created from a container definition just above.
        Some(parent_id) => match model.add_child_block(parent_id, definition) {
            Some(instance) => instance,
            None => return Err(ProgramFileError::NotAContainer(entry.definition.clone())),
        },
    };

    for (name, value) in &entry.params {
        let Some(parameter) = definition.parameter(name) else {
            return Err(ProgramFileError::UnknownParameter {
                definition: entry.definition.clone(),
                parameter: name.clone(),
            });
        };
        if !parameter.accepts(value) {
            return Err(ProgramFileError::ParameterType {
                definition: entry.definition.clone(),
                parameter: name.clone(),
                expected: parameter.default.type_name(),
                got: value.type_name(),
            });
        }
        model.update_parameter(&instance.id, name, value.clone());
    }

    for child in &entry.children {
        add_entry(model, registry, child, Some(&instance.id))?;
    }
    Ok(())
}
