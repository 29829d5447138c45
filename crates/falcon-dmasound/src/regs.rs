//! Falcon DMA sound / crossbar register map and bit definitions.

use bitflags::bitflags;

/// Sound DMA control register (bit 0: playback running, bit 1: repeat).
pub const DMA_SOUND_CONTROL: u32 = 0x00FF_8900;
/// Crossbar source controller.
pub const CROSSBAR_SOURCE: u32 = 0x00FF_8930;
/// Crossbar destination controller.
pub const CROSSBAR_DEST: u32 = 0x00FF_8932;
/// Frequency dividers: external sync divider in the high byte, internal
/// divider in the low nibble.
pub const CROSSBAR_SYNC_DIV: u32 = 0x00FF_8934;

/// The three 16-bit crossbar registers touched by a routing sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CrossbarReg {
    SourceControl,
    DestControl,
    SyncDivider,
}

impl CrossbarReg {
    pub fn address(self) -> u32 {
        match self {
            CrossbarReg::SourceControl => CROSSBAR_SOURCE,
            CrossbarReg::DestControl => CROSSBAR_DEST,
            CrossbarReg::SyncDivider => CROSSBAR_SYNC_DIV,
        }
    }
}

bitflags! {
    /// Sound DMA control bits (the `Buffoper()` argument).
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PlaybackControl: u16 {
        const PLAY_ENABLE = 1 << 0;
        const PLAY_REPEAT = 1 << 1;
        const RECORD_ENABLE = 1 << 2;
        const RECORD_REPEAT = 1 << 3;
    }
}

bitflags! {
    /// Crossbar destination set.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MatrixDest: u16 {
        const DMA_RECORD = 1 << 0;
        const DSP_RECEIVE = 1 << 1;
        const EXTERNAL_OUT = 1 << 2;
        const DAC = 1 << 3;
    }
}

/// Crossbar signal sources (matrix rows).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MatrixSource {
    DmaPlayback = 0,
    DspTransmit = 1,
    ExternalInput = 2,
    Adc = 3,
}

/// Sample clocks routable through the matrix.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MatrixClock {
    Internal25M = 0,
    External = 1,
    Internal32M = 2,
}

/// Replay formats accepted by `Setmode()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SampleMode {
    Stereo8 = 0,
    Stereo16 = 1,
    Mono8 = 2,
}

impl SampleMode {
    pub fn frame_bytes(self) -> usize {
        match self {
            SampleMode::Stereo8 => 2,
            SampleMode::Stereo16 => 4,
            SampleMode::Mono8 => 1,
        }
    }
}

// `_SND` cookie capability bits.
pub const SND_PSG: u32 = 1 << 0;
pub const SND_8BIT: u32 = 1 << 1;
pub const SND_16BIT: u32 = 1 << 2;
pub const SND_DSP: u32 = 1 << 3;
pub const SND_MATRIX: u32 = 1 << 4;

/// MFP timer input clock.
pub const MFP_TIMER_HZ: u32 = 2_457_600;
/// Timer A control value: delay mode, /64 prescale.
pub const TIMER_A_DELAY_DIV64: u8 = 5;
/// Timer A control value: event-count mode. Bound to playback, the counter
/// decrements once per frame end.
pub const TIMER_A_EVENT_COUNT: u8 = 8;
