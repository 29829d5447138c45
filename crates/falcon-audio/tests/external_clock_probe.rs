//! Probe scenarios against the DMA sound model: which oscillators end up in
//! the frequency table, and how the measurement resources are handled.

use falcon_audio::freq::{FreqTable, EXTERNAL_CLOCK_44K_HZ, EXTERNAL_CLOCK_48K_HZ};
use falcon_audio::probe::probe_external_clocks;
use falcon_dmasound::regs::{SND_16BIT, SND_8BIT, SND_PSG};
use falcon_dmasound::{SoundModel, SoundSystem, COOKIE_SND};

/// The full capability check: probe, then the internal clocks.
fn check(model: &mut SoundModel) -> FreqTable {
    let mut table = FreqTable::new();
    probe_external_clocks(&mut *model, &mut table);
    table.add_internal_clocks();
    table
}

#[test]
fn no_dsp_capability_yields_internal_rates_only() {
    let mut model =
        SoundModel::new().with_cookie(COOKIE_SND, SND_PSG | SND_8BIT | SND_16BIT);

    let table = check(&mut model);

    assert_eq!(table.len(), 8);
    assert!(table.entries().iter().all(|c| c.gpio.is_none()));
    // Without a DSP port the probe must not even allocate.
    assert_eq!(model.dma_allocs(), 0);
    assert_eq!(model.elapsed_ms(), 0);
}

#[test]
fn detected_44k_oscillator_adds_three_tagged_rates() {
    let mut model = SoundModel::new().with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ);

    let table = check(&mut model);

    assert_eq!(table.len(), 11);
    let external: Vec<_> = table.entries().iter().take(3).collect();
    assert_eq!(
        external.iter().map(|c| c.frequency).collect::<Vec<_>>(),
        [44100, 22050, 11025]
    );
    assert_eq!(
        external.iter().map(|c| c.predivisor).collect::<Vec<_>>(),
        [1, 3, 7]
    );
    assert!(external.iter().all(|c| c.gpio == Some(2)));
    assert!(external
        .iter()
        .all(|c| c.masterclock == EXTERNAL_CLOCK_44K_HZ));
    // The second oscillator select found nothing.
    assert!(table.entries()[3..].iter().all(|c| c.gpio.is_none()));
}

#[test]
fn both_oscillators_detected() {
    let mut model = SoundModel::new()
        .with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ)
        .with_external_oscillator(3, EXTERNAL_CLOCK_48K_HZ);

    let table = check(&mut model);

    assert_eq!(table.len(), 14);
    let freqs: Vec<u32> = table.entries().iter().take(6).map(|c| c.frequency).collect();
    assert_eq!(freqs, [44100, 22050, 11025, 48000, 24000, 12000]);
    assert!(table.entries()[3..6].iter().all(|c| c.gpio == Some(3)));
}

#[test]
fn external_entries_precede_internal_entries() {
    let mut model = SoundModel::new()
        .with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ)
        .with_external_oscillator(3, EXTERNAL_CLOCK_48K_HZ);

    let table = check(&mut model);

    let first_internal = table
        .entries()
        .iter()
        .position(|c| c.gpio.is_none())
        .unwrap();
    assert!(table.entries()[..first_internal]
        .iter()
        .all(|c| c.gpio.is_some()));
    assert!(table.entries()[first_internal..]
        .iter()
        .all(|c| c.gpio.is_none()));
}

#[test]
fn no_entry_ever_uses_a_broken_divider_code() {
    let mut model = SoundModel::new()
        .with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ)
        .with_external_oscillator(3, EXTERNAL_CLOCK_48K_HZ);

    let table = check(&mut model);

    for candidate in table.entries() {
        assert!(![6, 8, 10].contains(&candidate.predivisor));
    }
}

#[test]
fn one_alloc_and_one_free_regardless_of_detections() {
    // 0, 1 and 2 detections all use exactly one measurement buffer.
    let fitted: [&[(u8, u32)]; 3] = [
        &[],
        &[(2, EXTERNAL_CLOCK_44K_HZ)],
        &[(2, EXTERNAL_CLOCK_44K_HZ), (3, EXTERNAL_CLOCK_48K_HZ)],
    ];
    for oscillators in fitted {
        let mut model = SoundModel::new();
        for &(select, hz) in oscillators {
            model = model.with_external_oscillator(select, hz);
        }

        check(&mut model);

        assert_eq!(model.dma_allocs(), 1);
        assert_eq!(model.dma_frees(), 1);
        assert_eq!(model.outstanding_dma(), 0);
    }
}

#[test]
fn allocation_failure_degrades_to_internal_clocks() {
    let mut model = SoundModel::new()
        .with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ)
        .with_dma_alloc_limit(0);

    let table = check(&mut model);

    assert_eq!(table.len(), 8);
    assert!(table.entries().iter().all(|c| c.gpio.is_none()));
    assert_eq!(model.outstanding_dma(), 0);
}

#[test]
fn off_family_oscillator_is_rejected_as_noise() {
    // 25.6 MHz clocks the burst at 50 kHz; the estimate lands on 50 and the
    // candidate is dropped rather than mis-tuning later replay.
    let mut model = SoundModel::new().with_external_oscillator(2, 25_600_000);

    let table = check(&mut model);

    assert_eq!(table.len(), 8);
    assert!(table.entries().iter().all(|c| c.gpio.is_none()));
    // The buffer is still released exactly once.
    assert_eq!(model.dma_allocs(), 1);
    assert_eq!(model.dma_frees(), 1);
}

#[test]
fn stalled_engine_counts_as_no_clock() {
    // DSP port present but no oscillator fitted: the burst never finishes,
    // both measurement windows run to completion, nothing is added.
    let mut model = SoundModel::new();

    let table = check(&mut model);

    assert_eq!(table.len(), 8);
    assert_eq!(model.elapsed_ms(), 220);
    assert!(!model.playback_active());
}
