pub mod definition;
pub mod formula;
pub mod parser;
pub mod program;
pub mod registry;
pub mod robot;

pub use definition::value::ParameterValue;
pub use definition::{BlockDefinition, Category, ParameterDefinition, ParameterKind, Shape};
pub use formula::Formula;
pub use program::{BlockId, BlockInstance, ProgramModel, ProgramSnapshot};
pub use registry::{BlockCategory, BlockRegistry, RegistryError};
pub use robot::{CompoundMovement, JointId, RobotProfile};
