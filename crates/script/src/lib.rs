//! Script parsing: push-data iteration, output classification, and input address recovery.

pub mod input;
pub mod instruction;
pub mod standard;

pub use input::input_address;
pub use instruction::{push_data, Instruction, Instructions, ScriptError};
pub use standard::{classify_script_pubkey, ScriptType};
