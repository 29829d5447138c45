//! Deterministic software model of the Falcon DMA sound subsystem.
//!
//! Tests drive the audio backend against this model instead of real
//! hardware. DMA progress, the delay-mode timer-A tick and frame-end events
//! all advance inside [`SoundSystem::sleep_ms`], so a measurement run is
//! reproducible down to the tick count.

use std::collections::BTreeMap;

use crate::regs::{
    CrossbarReg, PlaybackControl, SampleMode, SND_16BIT, SND_8BIT, SND_DSP, SND_MATRIX, SND_PSG,
    TIMER_A_EVENT_COUNT,
};
use crate::system::{
    BiosError, CookieTag, DmaBuffer, SoundSystem, SupervisorContext, TimerAHandler, COOKIE_SND,
};

/// Internal 25.175 MHz master clock feeding the codec.
const INTERNAL_CLOCK_HZ: u64 = 25_175_000;
/// Fixed /256 stage between a master clock and the programmable divider.
const CODEC_PREDIV: u64 = 256;

/// Byte written into freshly allocated ST-RAM, so a missing zero-fill shows
/// up in tests.
const ALLOC_JUNK: u8 = 0xA5;

/// A Falcon with the full `_SND` capability set, no external oscillators
/// fitted, and an empty ST-RAM arena.
pub struct SoundModel {
    cookies: Vec<(CookieTag, u32)>,
    locked: bool,
    super_depth: u32,

    control: PlaybackControl,
    active: bool,
    tracks: (u8, u8),
    monitor: u8,
    mode: SampleMode,
    mode_error: Option<BiosError>,

    source_ctl: u16,
    dest_ctl: u16,
    sync_div: u16,
    crossbar_writes: u32,

    gpio_dir: u8,
    gpio_out: u8,
    oscillators: BTreeMap<u8, u32>,

    region: Option<(u32, u32)>,
    /// Playback progress through the region, in byte-milliseconds.
    progress: u64,

    timer_control: u8,
    timer_data: u8,
    timer_enabled: bool,
    timer_bound: bool,
    timer_handler: Option<TimerAHandler>,
    event_countdown: u8,

    ram: BTreeMap<u32, Vec<u8>>,
    next_addr: u32,
    alloc_limit: Option<u32>,
    dma_allocs: u32,
    dma_frees: u32,

    elapsed_ms: u64,
}

impl Default for SoundModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundModel {
    pub fn new() -> Self {
        Self {
            cookies: vec![(
                COOKIE_SND,
                SND_PSG | SND_8BIT | SND_16BIT | SND_DSP | SND_MATRIX,
            )],
            locked: false,
            super_depth: 0,
            control: PlaybackControl::empty(),
            active: false,
            tracks: (0, 0),
            monitor: 0,
            mode: SampleMode::Stereo8,
            mode_error: None,
            source_ctl: 0,
            dest_ctl: 0,
            sync_div: 0,
            crossbar_writes: 0,
            gpio_dir: 0,
            gpio_out: 0,
            oscillators: BTreeMap::new(),
            region: None,
            progress: 0,
            timer_control: 0,
            timer_data: 0,
            timer_enabled: false,
            timer_bound: false,
            timer_handler: None,
            event_countdown: 0,
            ram: BTreeMap::new(),
            next_addr: 0x0010_0000,
            alloc_limit: None,
            dma_allocs: 0,
            dma_frees: 0,
            elapsed_ms: 0,
        }
    }

    /// Fit an external oscillator behind a DSP GPIO select value.
    pub fn with_external_oscillator(mut self, select: u8, hz: u32) -> Self {
        self.oscillators.insert(select, hz);
        self
    }

    pub fn with_cookie(mut self, tag: CookieTag, value: u32) -> Self {
        if let Some(entry) = self.cookies.iter_mut().find(|(t, _)| *t == tag) {
            entry.1 = value;
        } else {
            self.cookies.push((tag, value));
        }
        self
    }

    pub fn without_cookie(mut self, tag: CookieTag) -> Self {
        self.cookies.retain(|(t, _)| *t != tag);
        self
    }

    /// Refuse DMA allocations once `n` more have succeeded.
    pub fn with_dma_alloc_limit(mut self, n: u32) -> Self {
        self.alloc_limit = Some(n);
        self
    }

    /// Make the next `set_sample_mode` call fail with `err`.
    pub fn inject_sample_mode_error(&mut self, err: BiosError) {
        self.mode_error = Some(err);
    }

    pub fn crossbar_regs(&self) -> [u16; 3] {
        [self.source_ctl, self.dest_ctl, self.sync_div]
    }

    pub fn crossbar_write_count(&self) -> u32 {
        self.crossbar_writes
    }

    pub fn dma_allocs(&self) -> u32 {
        self.dma_allocs
    }

    pub fn dma_frees(&self) -> u32 {
        self.dma_frees
    }

    /// Live ST-RAM blocks.
    pub fn outstanding_dma(&self) -> usize {
        self.ram.len()
    }

    pub fn sound_locked(&self) -> bool {
        self.locked
    }

    /// Current supervisor nesting depth; zero means user mode.
    pub fn supervisor_depth(&self) -> u32 {
        self.super_depth
    }

    pub fn tracks(&self) -> (u8, u8) {
        self.tracks
    }

    pub fn monitor_track(&self) -> u8 {
        self.monitor
    }

    /// (direction, data) of the DSP GPIO port.
    pub fn gpio_state(&self) -> (u8, u8) {
        (self.gpio_dir, self.gpio_out)
    }

    pub fn playback(&self) -> PlaybackControl {
        self.control
    }

    pub fn playback_region(&self) -> Option<(u32, u32)> {
        self.region
    }

    pub fn sample_mode(&self) -> SampleMode {
        self.mode
    }

    pub fn timer_a_enabled(&self) -> bool {
        self.timer_enabled
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Read-only view of allocated ST-RAM, for asserting buffer contents.
    pub fn ram_at(&self, addr: u32, len: usize) -> &[u8] {
        if let Some((&base, block)) = self.ram.range(..=addr).next_back() {
            let off = (addr - base) as usize;
            if off + len <= block.len() {
                return &block[off..off + len];
            }
        }
        &[]
    }

    /// Bytes per second the DMA engine fetches, as selected by the crossbar
    /// registers, the GPIO oscillator select, and the sample mode.
    fn playback_byte_rate(&self) -> u64 {
        let samples_per_sec = match self.source_ctl & 0xF {
            // Internal 25.175 MHz clock, divider in the low nibble.
            1 => {
                let prediv = u64::from(self.sync_div & 0xF);
                INTERNAL_CLOCK_HZ / (CODEC_PREDIV * (prediv + 1))
            }
            // External clock, divider in the high byte. No oscillator on
            // the selected GPIO value means no sample clock at all.
            3 => {
                let prediv = u64::from((self.sync_div >> 8) & 0xF);
                match self.oscillators.get(&self.gpio_out) {
                    Some(&hz) => u64::from(hz) / (CODEC_PREDIV * (prediv + 1)),
                    None => 0,
                }
            }
            _ => 0,
        };
        samples_per_sec * self.mode.frame_bytes() as u64
    }

    fn region_len(&self) -> u64 {
        self.region
            .map(|(start, end)| u64::from(end.saturating_sub(start)))
            .unwrap_or(0)
    }

    fn fire_timer_a(&mut self) {
        if !self.timer_enabled {
            return;
        }
        let Some(handler) = self.timer_handler.clone() else {
            return;
        };
        handler(self);
    }

    fn frame_event(&mut self) {
        if self.timer_control != TIMER_A_EVENT_COUNT || !self.timer_bound || !self.timer_enabled {
            return;
        }
        self.event_countdown = self.event_countdown.saturating_sub(1);
        if self.event_countdown == 0 {
            self.event_countdown = self.timer_data.max(1);
            self.fire_timer_a();
        }
    }

    fn step_ms(&mut self) {
        self.elapsed_ms += 1;

        // Delay-mode tick. With the /64 prescale and data 38 the driver
        // uses, the real rate is ~1.01 kHz; the model rounds to one tick per
        // millisecond.
        if self.timer_control != 0 && self.timer_control != TIMER_A_EVENT_COUNT {
            self.fire_timer_a();
        }

        if !self.active {
            return;
        }
        let rate = self.playback_byte_rate();
        if rate == 0 {
            return;
        }
        let mut len_milli = self.region_len() * 1000;
        if len_milli == 0 {
            return;
        }
        self.progress += rate;
        while self.progress >= len_milli {
            self.progress -= len_milli;
            if self.control.contains(PlaybackControl::PLAY_REPEAT) {
                self.frame_event();
                // The frame handler may have moved the region.
                len_milli = self.region_len() * 1000;
                if len_milli == 0 {
                    break;
                }
            } else {
                self.active = false;
                self.progress = 0;
                self.frame_event();
                break;
            }
        }
    }
}

impl SoundSystem for SoundModel {
    fn cookie(&self, tag: CookieTag) -> Option<u32> {
        self.cookies
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|&(_, value)| value)
    }

    fn lock_sound(&mut self) -> Result<(), BiosError> {
        if self.locked {
            return Err(BiosError(-128));
        }
        self.locked = true;
        Ok(())
    }

    fn unlock_sound(&mut self) {
        self.locked = false;
    }

    fn set_playback(&mut self, control: PlaybackControl) {
        self.control = control;
        if control.contains(PlaybackControl::PLAY_ENABLE) {
            if !self.active {
                self.active = true;
                self.progress = 0;
            }
        } else {
            self.active = false;
            self.progress = 0;
        }
    }

    fn playback_active(&self) -> bool {
        self.active
    }

    fn set_tracks(&mut self, playback: u8, record: u8) -> Result<(), BiosError> {
        self.tracks = (playback, record);
        Ok(())
    }

    fn set_monitor_track(&mut self, track: u8) -> Result<(), BiosError> {
        self.monitor = track;
        Ok(())
    }

    fn set_sample_mode(&mut self, mode: SampleMode) -> Result<(), BiosError> {
        if let Some(err) = self.mode_error.take() {
            return Err(err);
        }
        self.mode = mode;
        Ok(())
    }

    fn set_playback_region(&mut self, start: u32, end: u32) -> Result<(), BiosError> {
        if end < start {
            return Err(BiosError(-1));
        }
        self.region = Some((start, end));
        Ok(())
    }

    fn gpio_set_direction(&mut self, mask: u8) {
        self.gpio_dir = mask & 0x7;
    }

    fn gpio_write(&mut self, value: u8) {
        // Only pins configured as outputs take the written value.
        self.gpio_out = value & self.gpio_dir;
    }

    fn program_timer_a(&mut self, control: u8, data: u8, handler: TimerAHandler) {
        self.timer_control = control;
        self.timer_data = data;
        self.timer_handler = Some(handler);
        self.event_countdown = data.max(1);
    }

    fn enable_timer_a(&mut self) {
        self.timer_enabled = true;
    }

    fn disable_timer_a(&mut self) {
        self.timer_enabled = false;
    }

    fn bind_timer_a_to_playback(&mut self) -> Result<(), BiosError> {
        self.timer_bound = true;
        Ok(())
    }

    fn alloc_dma(&mut self, len: usize) -> Option<DmaBuffer> {
        if len == 0 {
            return None;
        }
        if let Some(remaining) = self.alloc_limit.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let addr = self.next_addr;
        self.next_addr += (len as u32 + 1) & !1;
        self.ram.insert(addr, vec![ALLOC_JUNK; len]);
        self.dma_allocs += 1;
        Some(DmaBuffer::new(addr, len))
    }

    fn free_dma(&mut self, buffer: DmaBuffer) {
        let removed = self.ram.remove(&buffer.addr());
        assert!(
            removed.is_some(),
            "free of unknown DMA block at {:#x}",
            buffer.addr()
        );
        self.dma_frees += 1;
    }

    fn dma_mut(&mut self, addr: u32, len: usize) -> &mut [u8] {
        if let Some((&base, block)) = self.ram.range_mut(..=addr).next_back() {
            let off = (addr - base) as usize;
            if off + len <= block.len() {
                return &mut block[off..off + len];
            }
        }
        &mut []
    }

    fn super_enter(&mut self) -> SupervisorContext {
        self.super_depth += 1;
        SupervisorContext(self.super_depth)
    }

    fn super_exit(&mut self, ctx: SupervisorContext) {
        assert_eq!(ctx.0, self.super_depth, "unbalanced supervisor exit");
        self.super_depth -= 1;
    }

    fn crossbar_read(&self, reg: CrossbarReg) -> u16 {
        assert!(self.super_depth > 0, "crossbar read in user mode");
        match reg {
            CrossbarReg::SourceControl => self.source_ctl,
            CrossbarReg::DestControl => self.dest_ctl,
            CrossbarReg::SyncDivider => self.sync_div,
        }
    }

    fn crossbar_write(&mut self, reg: CrossbarReg, value: u16) {
        assert!(self.super_depth > 0, "crossbar write in user mode");
        self.crossbar_writes += 1;
        match reg {
            CrossbarReg::SourceControl => self.source_ctl = value,
            CrossbarReg::DestControl => self.dest_ctl = value,
            CrossbarReg::SyncDivider => self.sync_div = value,
        }
    }

    fn sleep_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.step_ms();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::system::SupervisorMode;

    fn route_external(model: &mut SoundModel, prediv: u16) {
        let mut sup = SupervisorMode::enter(model);
        sup.crossbar_write(CrossbarReg::SourceControl, 3);
        sup.crossbar_write(CrossbarReg::SyncDivider, prediv << 8);
    }

    #[test]
    fn non_repeating_burst_finishes_after_one_buffer() {
        let mut model = SoundModel::new().with_external_oscillator(2, 22_579_200);
        model.gpio_set_direction(7);
        model.gpio_write(2);
        route_external(&mut model, 1); // 44.1 kHz
        model.set_sample_mode(SampleMode::Mono8).unwrap();
        model.set_playback_region(0x8000, 0x8000 + 4410).unwrap();

        model.set_playback(PlaybackControl::PLAY_ENABLE);
        model.sleep_ms(99);
        assert!(model.playback_active());
        model.sleep_ms(1);
        assert!(!model.playback_active());
    }

    #[test]
    fn playback_stalls_without_a_fitted_oscillator() {
        let mut model = SoundModel::new();
        model.gpio_set_direction(7);
        model.gpio_write(2);
        route_external(&mut model, 1);
        model.set_sample_mode(SampleMode::Mono8).unwrap();
        model.set_playback_region(0x8000, 0x8000 + 4410).unwrap();

        model.set_playback(PlaybackControl::PLAY_ENABLE);
        model.sleep_ms(1000);
        assert!(model.playback_active());
    }

    #[test]
    fn delay_mode_timer_fires_only_while_enabled() {
        let mut model = SoundModel::new();
        let ticks = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&ticks);
        let handler: TimerAHandler = Rc::new(move |_| counter.set(counter.get() + 1));
        model.program_timer_a(5, 38, handler);

        model.sleep_ms(10);
        assert_eq!(ticks.get(), 0);

        model.enable_timer_a();
        model.sleep_ms(10);
        assert_eq!(ticks.get(), 10);

        model.disable_timer_a();
        model.sleep_ms(5);
        assert_eq!(ticks.get(), 10);
    }

    #[test]
    fn alloc_junk_and_counters() {
        let mut model = SoundModel::new().with_dma_alloc_limit(1);
        let buf = model.alloc_dma(16).expect("first allocation succeeds");
        assert_eq!(model.ram_at(buf.addr(), 16), &[ALLOC_JUNK; 16]);
        assert!(model.alloc_dma(16).is_none());

        model.dma_mut(buf.addr(), 16).fill(0);
        assert_eq!(model.ram_at(buf.addr(), 16), &[0u8; 16]);

        model.free_dma(buf);
        assert_eq!(model.dma_allocs(), 1);
        assert_eq!(model.dma_frees(), 1);
        assert_eq!(model.outstanding_dma(), 0);
    }

    #[test]
    fn gpio_output_masking() {
        let mut model = SoundModel::new();
        model.gpio_set_direction(0b011);
        model.gpio_write(0b111);
        assert_eq!(model.gpio_state(), (0b011, 0b011));
    }

    #[test]
    #[should_panic(expected = "user mode")]
    fn crossbar_write_requires_supervisor_mode() {
        let mut model = SoundModel::new();
        model.crossbar_write(CrossbarReg::SourceControl, 1);
    }
}
