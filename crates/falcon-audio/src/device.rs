//! Device lifecycle: capability checks, format and frequency negotiation,
//! and replay start/stop.

use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use falcon_dmasound::regs::{SND_16BIT, SND_PSG, TIMER_A_EVENT_COUNT};
use falcon_dmasound::{
    DmaBuffer, MatrixClock, MatrixDest, MatrixSource, PlaybackControl, SampleMode, SoundSystem,
    COOKIE_MAGX, COOKIE_SND,
};

use crate::crossbar;
use crate::freq::FreqTable;
use crate::playback::{swap_handler, DoubleBuffer};
use crate::probe::{probe_external_clocks, GPIO_ALL_OUTPUT};

/// Backend registration record.
#[derive(Debug, Clone, Copy)]
pub struct DriverInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const DRIVER_INFO: DriverInfo = DriverInfo {
    name: "mint_xbios",
    description: "MiNT XBIOS audio driver",
};

/// Capabilities this backend reports to the surrounding audio layer.
#[derive(Debug, Clone, Copy)]
pub struct DriverCaps {
    /// A single fixed output device; no enumeration.
    pub only_default_output_device: bool,
    /// Replay is driven by the backend's own frame interrupt, not a generic
    /// pull thread.
    pub provides_own_callback: bool,
    /// The backend does its own exclusion, the generic mixer lock can be
    /// skipped.
    pub skip_mixer_lock: bool,
}

/// Sample formats as requested by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S8,
    S16Le,
    S16Be,
    S32,
    F32,
}

impl SampleFormat {
    pub fn bits(self) -> u8 {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 8,
            SampleFormat::S16Le | SampleFormat::S16Be => 16,
            SampleFormat::S32 | SampleFormat::F32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        usize::from(self.bits()) / 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub freq: u32,
    pub format: SampleFormat,
    pub channels: u8,
    /// Frames per buffer half.
    pub samples: u16,
}

impl AudioSpec {
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * usize::from(self.channels)
    }

    /// Bytes in one buffer half.
    pub fn buffer_bytes(&self) -> usize {
        usize::from(self.samples) * self.frame_bytes()
    }
}

/// What the codec can actually replay, given a request.
///
/// Replay is always signed; 16-bit and wider collapse to signed 16-bit
/// big-endian stereo, 8-bit keeps its channel count clamped to stereo.
fn negotiated(request: AudioSpec) -> AudioSpec {
    let mut spec = request;
    if spec.format.bits() >= 16 {
        spec.format = SampleFormat::S16Be;
        spec.channels = 2;
    } else {
        spec.format = SampleFormat::S8;
        spec.channels = spec.channels.min(2);
    }
    spec
}

#[derive(Debug, Error)]
pub enum AudioError {
    /// XBIOS cannot be used from interrupt context under MagiC.
    #[error("host environment incompatible with direct XBIOS audio (MagiC present)")]
    IncompatibleHost,
    #[error("no 16-bit sound hardware")]
    No16BitAudio,
    #[error("audio system already in use")]
    SoundBusy,
    #[error("not enough DMA-capable memory")]
    OutOfMemory,
}

struct OpenState {
    spec: AudioSpec,
    table: FreqTable,
    selected: usize,
    buffer: DmaBuffer,
    swap: Rc<DoubleBuffer>,
}

/// The XBIOS audio device.
///
/// [`XbiosAudio::new`] performs the environment and capability checks;
/// [`XbiosAudio::open`] negotiates a format/rate, programs the hardware and
/// starts replay. Closing (explicitly or on drop) releases everything.
pub struct XbiosAudio<H: SoundSystem> {
    hw: H,
    snd: u32,
    open: Option<OpenState>,
}

impl<H: SoundSystem> XbiosAudio<H> {
    /// Check that this machine can run the backend at all.
    pub fn new(mut hw: H) -> Result<Self, AudioError> {
        if hw.cookie(COOKIE_MAGX).is_some() {
            return Err(AudioError::IncompatibleHost);
        }

        // No `_SND` cookie: assume a plain ST with only the PSG.
        let snd = hw.cookie(COOKIE_SND).unwrap_or(SND_PSG);
        if snd & SND_16BIT == 0 {
            return Err(AudioError::No16BitAudio);
        }

        // Verify the sound system is actually lockable before reporting the
        // backend as available.
        hw.lock_sound().map_err(|_| AudioError::SoundBusy)?;
        hw.unlock_sound();

        Ok(Self {
            hw,
            snd,
            open: None,
        })
    }

    pub fn caps(&self) -> DriverCaps {
        DriverCaps {
            only_default_output_device: true,
            provides_own_callback: true,
            skip_mixer_lock: true,
        }
    }

    /// `_SND` capability bits this machine reported.
    pub fn snd_cookie(&self) -> u32 {
        self.snd
    }

    /// Open the device: negotiate `request` against the hardware, program
    /// the clock routing, and start replay. `fill` is invoked from the
    /// frame-end interrupt with the buffer half to refill.
    pub fn open(
        &mut self,
        request: AudioSpec,
        fill: impl FnMut(&mut [u8]) + 'static,
    ) -> Result<AudioSpec, AudioError> {
        self.hw.lock_sound().map_err(|_| AudioError::SoundBusy)?;

        let (spec, table, selected) = self.check_audio(request);

        let half = spec.buffer_bytes();
        let Some(buffer) = self.hw.alloc_dma(half * 2) else {
            self.hw.unlock_sound();
            return Err(AudioError::OutOfMemory);
        };
        // Both halves start as silence (replay is signed).
        self.hw.dma_mut(buffer.addr(), buffer.len()).fill(0);

        let swap = Rc::new(DoubleBuffer::new(buffer.addr(), half, fill));
        self.init_replay(&table, selected, &spec, &buffer, &swap);

        self.open = Some(OpenState {
            spec,
            table,
            selected,
            buffer,
            swap,
        });
        Ok(spec)
    }

    /// Negotiate the format and rebuild the frequency table.
    ///
    /// The table and selection are check-scoped: cleared and rebuilt here,
    /// published only once complete.
    fn check_audio(&mut self, request: AudioSpec) -> (AudioSpec, FreqTable, usize) {
        let mut spec = negotiated(request);

        let mut table = FreqTable::new();
        probe_external_clocks(&mut self.hw, &mut table);
        table.add_internal_clocks();

        let selected = table
            .closest(spec.freq)
            .expect("table holds the internal clock entries");
        spec.freq = table.get(selected).expect("selected index is in range").frequency;
        (spec, table, selected)
    }

    /// Program the hardware for the negotiated spec and start replay.
    fn init_replay(
        &mut self,
        table: &FreqTable,
        selected: usize,
        spec: &AudioSpec,
        buffer: &DmaBuffer,
        swap: &Rc<DoubleBuffer>,
    ) {
        let hw = &mut self.hw;

        hw.set_playback(PlaybackControl::empty());
        let _ = hw.set_tracks(0, 0);
        let _ = hw.set_monitor_track(0);

        let mode = match (spec.format, spec.channels) {
            (SampleFormat::S8, 2) => SampleMode::Stereo8,
            (SampleFormat::S8, _) => SampleMode::Mono8,
            _ => SampleMode::Stereo16,
        };
        if let Err(err) = hw.set_sample_mode(mode) {
            debug!(%err, "set_sample_mode failed");
        }

        let entry = table.get(selected).expect("selected index is in range");
        if let Some(select) = entry.gpio {
            hw.gpio_set_direction(GPIO_ALL_OUTPUT);
            hw.gpio_write(select);
            crossbar::connect(
                &mut *hw,
                MatrixSource::DmaPlayback,
                MatrixDest::DAC | MatrixDest::EXTERNAL_OUT,
                MatrixClock::External,
                entry.predivisor,
            );
        } else {
            crossbar::connect(
                &mut *hw,
                MatrixSource::DmaPlayback,
                MatrixDest::DAC,
                MatrixClock::Internal25M,
                entry.predivisor,
            );
        }

        let half = spec.buffer_bytes() as u32;
        if let Err(err) = hw.set_playback_region(buffer.addr(), buffer.addr() + half) {
            debug!(%err, "set_playback_region failed");
        }

        // Frame-end interrupt drives the double-buffer swap.
        hw.disable_timer_a();
        hw.program_timer_a(TIMER_A_EVENT_COUNT, 1, swap_handler(Rc::clone(swap)));
        hw.enable_timer_a();
        if let Err(err) = hw.bind_timer_a_to_playback() {
            debug!(%err, "binding timer A to playback failed");
        }

        hw.set_playback(PlaybackControl::PLAY_ENABLE | PlaybackControl::PLAY_REPEAT);
    }

    /// Halt replay while the caller touches shared stream state.
    pub fn lock(&mut self) {
        self.hw.set_playback(PlaybackControl::empty());
    }

    /// Restart replay after [`XbiosAudio::lock`].
    pub fn unlock(&mut self) {
        self.hw
            .set_playback(PlaybackControl::PLAY_ENABLE | PlaybackControl::PLAY_REPEAT);
    }

    /// Stop replay and release the hardware. Idempotent.
    pub fn close(&mut self) {
        let Some(state) = self.open.take() else {
            return;
        };
        self.hw.set_playback(PlaybackControl::empty());
        self.hw.disable_timer_a();
        self.hw.free_dma(state.buffer);
        self.hw.unlock_sound();
    }

    /// Negotiated spec of the open device.
    pub fn spec(&self) -> Option<&AudioSpec> {
        self.open.as_ref().map(|state| &state.spec)
    }

    /// Frequency table built by the last open.
    pub fn freq_table(&self) -> Option<&FreqTable> {
        self.open.as_ref().map(|state| &state.table)
    }

    /// Selected frequency table index.
    pub fn selected(&self) -> Option<usize> {
        self.open.as_ref().map(|state| state.selected)
    }

    /// Buffer half currently programmed for replay.
    pub fn buffer_index(&self) -> Option<usize> {
        self.open.as_ref().map(|state| state.swap.index())
    }

    pub fn system(&self) -> &H {
        &self.hw
    }

    pub fn system_mut(&mut self) -> &mut H {
        &mut self.hw
    }
}

impl<H: SoundSystem> Drop for XbiosAudio<H> {
    fn drop(&mut self) {
        self.close();
    }
}
