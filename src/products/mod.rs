//! Device families built on the dialog engine and state machine.

pub mod kp;
pub mod wm;
