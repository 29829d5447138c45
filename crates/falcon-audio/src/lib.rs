//! Atari Falcon XBIOS audio backend.
//!
//! Detects what the machine's sound hardware can do, negotiates a replay
//! format and sample rate, programs the DMA sound registers and the
//! clock-routing crossbar, and feeds a double-buffered sample stream to the
//! DAC from the frame-end interrupt.
//!
//! The interesting part is rate negotiation: besides the internal 25.175 MHz
//! master clock, a Falcon may carry one or two external oscillators on the
//! DSP port, selectable via GPIO but not readable back. [`probe`] detects
//! them by timing a silent playback burst, [`freq`] turns the findings into
//! a candidate table, and [`crossbar`] wires the chosen clock into the DAC
//! path (working around the firmware's broken external-clock routing).

pub mod crossbar;
pub mod device;
pub mod freq;
mod playback;
pub mod probe;

pub use device::{
    AudioError, AudioSpec, DriverCaps, DriverInfo, SampleFormat, XbiosAudio, DRIVER_INFO,
};
pub use freq::{FreqCandidate, FreqTable};
