//! Protocol module - wire formats and constants for the badge link layer.

pub mod constants;
pub mod frame;
pub mod qix;
pub mod window;

pub use frame::{Frame, FrameError, FrameFlag};
pub use qix::QixFrame;
pub use window::WindowAck;
