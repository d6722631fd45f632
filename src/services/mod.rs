//! Background services

pub mod pidfile;
pub mod rotation_loop;

pub use rotation_loop::{
    CycleMode, LoopExit, LoopState, RotationLoop, RotationLoopConfig, RotationLoopHandle,
};
