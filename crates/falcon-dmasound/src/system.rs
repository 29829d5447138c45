//! The sound system as the driver sees it: cookies, the XBIOS-level sound
//! calls, raw crossbar access, and supervisor-mode elevation.
//!
//! Keeping this behind a trait lets the backend run unchanged against real
//! hardware or against [`SoundModel`](crate::model::SoundModel) in tests.

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use thiserror::Error;

use crate::regs::{CrossbarReg, PlaybackControl, SampleMode};

/// Four-character cookie-jar tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CookieTag(pub [u8; 4]);

/// System/sound capability cookie.
pub const COOKIE_SND: CookieTag = CookieTag(*b"_SND");
/// Present when the machine runs MagiC.
pub const COOKIE_MAGX: CookieTag = CookieTag(*b"MagX");
/// Present when the machine runs MiNT.
pub const COOKIE_MINT: CookieTag = CookieTag(*b"MiNT");

/// Negative BIOS return code from a sound call.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("XBIOS sound call failed (code {0})")]
pub struct BiosError(pub i16);

/// Handle to a block of DMA-capable (ST-RAM) memory.
///
/// Not `Clone`: [`SoundSystem::free_dma`] consumes the handle, so a block can
/// be freed at most once.
#[derive(Debug)]
pub struct DmaBuffer {
    addr: u32,
    len: usize,
}

impl DmaBuffer {
    /// Normally only created by `SoundSystem` implementations.
    pub fn new(addr: u32, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte, as passed to the region registers.
    pub fn end(&self) -> u32 {
        self.addr + self.len as u32
    }
}

/// Saved processor context returned by [`SoundSystem::super_enter`].
///
/// Consumed by `super_exit`; the pairing is normally handled by
/// [`SupervisorMode`].
#[derive(Debug)]
pub struct SupervisorContext(pub u32);

/// Timer A interrupt handler. Runs with the hardware borrowed mutably, the
/// way an interrupt routine owns the machine while it runs.
pub type TimerAHandler = Rc<dyn Fn(&mut dyn SoundSystem)>;

/// Everything the audio backend consumes from the machine.
pub trait SoundSystem {
    /// Look up a cookie-jar entry.
    fn cookie(&self, tag: CookieTag) -> Option<u32>;

    /// Claim exclusive ownership of the sound system (`Locksnd()`).
    fn lock_sound(&mut self) -> Result<(), BiosError>;
    fn unlock_sound(&mut self);

    /// Write the sound DMA control bits (`Buffoper()`).
    fn set_playback(&mut self, control: PlaybackControl);
    /// Whether the DMA engine is currently fetching samples
    /// (`Buffoper(-1)` bit 0).
    fn playback_active(&self) -> bool;

    fn set_tracks(&mut self, playback: u8, record: u8) -> Result<(), BiosError>;
    fn set_monitor_track(&mut self, track: u8) -> Result<(), BiosError>;
    fn set_sample_mode(&mut self, mode: SampleMode) -> Result<(), BiosError>;
    /// Program the playback region (`Setbuffer()`); `end` is one past the
    /// last byte.
    fn set_playback_region(&mut self, start: u32, end: u32) -> Result<(), BiosError>;

    /// DSP port GPIO direction register (bits 0-2, 1 = output).
    fn gpio_set_direction(&mut self, mask: u8);
    /// DSP port GPIO data register.
    fn gpio_write(&mut self, value: u8);

    /// Program timer A (`Xbtimer()`): control/data plus the interrupt
    /// handler, replacing any previous handler. Does not unmask the
    /// interrupt.
    fn program_timer_a(&mut self, control: u8, data: u8, handler: TimerAHandler);
    fn enable_timer_a(&mut self);
    fn disable_timer_a(&mut self);
    /// Tie timer A to playback frame-end events
    /// (`Setinterrupt(SI_TIMERA, SI_PLAY)`).
    fn bind_timer_a_to_playback(&mut self) -> Result<(), BiosError>;

    /// Allocate DMA-capable memory. `None` when no block is available.
    fn alloc_dma(&mut self, len: usize) -> Option<DmaBuffer>;
    fn free_dma(&mut self, buffer: DmaBuffer);
    /// Access the bytes behind an allocated block. An unknown range yields
    /// an empty slice.
    fn dma_mut(&mut self, addr: u32, len: usize) -> &mut [u8];

    /// Enter supervisor mode, returning the context to restore.
    fn super_enter(&mut self) -> SupervisorContext;
    fn super_exit(&mut self, ctx: SupervisorContext);
    /// Crossbar register access. Only valid in supervisor mode.
    fn crossbar_read(&self, reg: CrossbarReg) -> u16;
    fn crossbar_write(&mut self, reg: CrossbarReg, value: u16);

    /// Coarse real-time sleep.
    fn sleep_ms(&mut self, ms: u32);
}

/// Scoped supervisor-mode elevation.
///
/// The previous context is restored when the guard drops, so every exit path
/// of a register sequence, early returns included, leaves the processor as it
/// was found.
pub struct SupervisorMode<'a> {
    hw: &'a mut dyn SoundSystem,
    saved: Option<SupervisorContext>,
}

impl<'a> SupervisorMode<'a> {
    pub fn enter(hw: &'a mut dyn SoundSystem) -> Self {
        let saved = hw.super_enter();
        Self {
            hw,
            saved: Some(saved),
        }
    }
}

impl<'a> Deref for SupervisorMode<'a> {
    type Target = dyn SoundSystem + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.hw
    }
}

impl<'a> DerefMut for SupervisorMode<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.hw
    }
}

impl Drop for SupervisorMode<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.saved.take() {
            self.hw.super_exit(ctx);
        }
    }
}
