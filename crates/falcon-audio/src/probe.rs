//! External-clock detection on the DSP GPIO port.
//!
//! Two oscillator sockets hang off the DSP port, selected through the GPIO
//! data register. Neither their presence nor their frequency can be read
//! back, so the probe plays a short silent burst against each candidate and
//! measures how long the DMA engine takes: a ~1 kHz timer ticks while the
//! playback-active bit is set, and the tick count over a known buffer length
//! gives the sample rate, hence the oscillator family.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, trace};

use falcon_dmasound::regs::{SND_DSP, TIMER_A_DELAY_DIV64};
use falcon_dmasound::{
    MatrixClock, MatrixDest, MatrixSource, PlaybackControl, SampleMode, SoundSystem,
    TimerAHandler, COOKIE_SND,
};

use crate::crossbar;
use crate::freq::{FreqCandidate, FreqTable, CODEC_PREDIV, EXTERNAL_CLOCK_44K_HZ, EXTERNAL_CLOCK_48K_HZ};

/// Silent measurement burst: 1/10 s of mono 8-bit at 44.1 kHz.
pub const MEASURE_BUFFER_LEN: usize = 44_100 / 10;
/// Wall-clock window. Longer than one full buffer at either candidate rate,
/// so a clocked burst is guaranteed to finish inside it.
pub const MEASURE_WINDOW_MS: u32 = 110;

/// Timer A data value: 2.4576 MHz / 64 / 38 is ~1 kHz.
const MEASURE_TIMER_DATA: u8 = 38;
/// External predivisor for the burst (divide by 2: 44.1 or 48 kHz).
const MEASURE_PREDIV: u16 = 1;
/// All three DSP port pins driven as outputs.
pub(crate) const GPIO_ALL_OUTPUT: u8 = 7;
/// GPIO data values selecting the two oscillator sockets.
const GPIO_OSC_SELECT: [u8; 2] = [2, 3];

/// Estimated clock family in kHz from a burst of `samples` played against
/// `ticks` ~1 ms timer ticks, rounded up to an even count. `ticks` must be
/// nonzero.
pub fn estimate_khz(samples: u32, ticks: u32) -> u32 {
    ((samples / ticks) + 1) & !1
}

/// Probe both oscillator selects and register the usable rates of any
/// detected clock into `table`.
///
/// Best-effort by design: without a DSP GPIO port, or when the measurement
/// buffer cannot be allocated, the table is simply left to the internal
/// clocks.
pub fn probe_external_clocks(hw: &mut dyn SoundSystem, table: &mut FreqTable) {
    let Some(snd) = hw.cookie(COOKIE_SND) else {
        return;
    };
    if snd & SND_DSP == 0 {
        return;
    }

    let Some(buffer) = hw.alloc_dma(MEASURE_BUFFER_LEN) else {
        debug!("external clock probe skipped: no DMA-capable memory");
        return;
    };
    hw.dma_mut(buffer.addr(), buffer.len()).fill(0);

    hw.set_playback(PlaybackControl::empty());
    let _ = hw.set_tracks(0, 0);
    let _ = hw.set_monitor_track(0);
    let _ = hw.set_sample_mode(SampleMode::Mono8);
    hw.disable_timer_a();

    let ticks = Rc::new(Cell::new(0u32));

    for select in GPIO_OSC_SELECT {
        hw.gpio_set_direction(GPIO_ALL_OUTPUT);
        hw.gpio_write(select);
        crossbar::connect(
            hw,
            MatrixSource::DmaPlayback,
            MatrixDest::DAC,
            MatrixClock::External,
            MEASURE_PREDIV,
        );
        let _ = hw.set_playback_region(buffer.addr(), buffer.end());

        let handler: TimerAHandler = {
            let ticks = Rc::clone(&ticks);
            Rc::new(move |hw: &mut dyn SoundSystem| {
                // Count only while the DMA engine is fetching samples; the
                // tick total then measures the burst duration, not the
                // sleep below.
                if hw.playback_active() {
                    ticks.set(ticks.get() + 1);
                }
            })
        };
        hw.program_timer_a(TIMER_A_DELAY_DIV64, MEASURE_TIMER_DATA, handler);
        hw.enable_timer_a();
        ticks.set(0);

        hw.set_playback(PlaybackControl::PLAY_ENABLE);
        hw.sleep_ms(MEASURE_WINDOW_MS);

        if hw.playback_active() {
            // The burst should have finished well inside the window; a
            // still-running engine means nothing clocked the DMA.
            trace!(select, "no DMA clock on this oscillator select");
        } else if ticks.get() == 0 {
            trace!(select, "no timer ticks during measurement");
        } else {
            let khz = estimate_khz(MEASURE_BUFFER_LEN as u32, ticks.get());
            trace!(select, khz, "measured external clock");
            // Only the two known families are accepted; a misread clock
            // would mis-tune every later replay, so anything else is
            // treated as noise and dropped.
            let masterclock = match khz {
                44 => Some(EXTERNAL_CLOCK_44K_HZ),
                48 => Some(EXTERNAL_CLOCK_48K_HZ),
                _ => None,
            };
            if let Some(clock) = masterclock {
                for k in 1..4u32 {
                    table.add(FreqCandidate {
                        frequency: clock / (CODEC_PREDIV << k),
                        masterclock: clock,
                        predivisor: (1u16 << k) - 1,
                        gpio: Some(select),
                    });
                }
            }
        }

        hw.set_playback(PlaybackControl::empty());
        hw.disable_timer_a();
    }

    hw.free_dma(buffer);
}
