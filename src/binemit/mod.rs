//! Binary emission (§4.D, §4.E): turning an allocated `MIRFunction` into bytes inside a
//! `crate::object::Object`.

pub mod encode;
pub mod frame;
pub mod rex;

pub use encode::emit_function;
pub use frame::{insert_frame_instructions, FrameKind};
