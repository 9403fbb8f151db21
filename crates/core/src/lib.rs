pub mod context;
pub mod conversation;
pub mod evaluation;
pub mod generator;
pub mod sequence;
pub mod state_machine;
pub mod technique;
