//! Falcon DMA sound subsystem.
//!
//! Register map and bit definitions for the sound DMA / crossbar block, the
//! [`SoundSystem`] trait the audio backend programs it through, and
//! [`SoundModel`], a deterministic software model used by tests.

pub mod model;
pub mod regs;
mod system;

pub use model::SoundModel;
pub use regs::{
    CrossbarReg, MatrixClock, MatrixDest, MatrixSource, PlaybackControl, SampleMode,
};
pub use system::{
    BiosError, CookieTag, DmaBuffer, SoundSystem, SupervisorContext, SupervisorMode,
    TimerAHandler, COOKIE_MAGX, COOKIE_MINT, COOKIE_SND,
};
