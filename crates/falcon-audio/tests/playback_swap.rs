//! The frame-end interrupt's double-buffer swap, observed through the model.

use std::cell::Cell;
use std::rc::Rc;

use falcon_audio::freq::EXTERNAL_CLOCK_44K_HZ;
use falcon_audio::{AudioSpec, SampleFormat, XbiosAudio};
use falcon_dmasound::{SoundModel, SoundSystem};

#[test]
fn frame_end_flips_halves_and_refills_the_retired_one() {
    let model = SoundModel::new().with_external_oscillator(2, EXTERNAL_CLOCK_44K_HZ);
    let mut device = XbiosAudio::new(model).unwrap();

    let fills = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&fills);
    let request = AudioSpec {
        freq: 44_100,
        format: SampleFormat::S16Be,
        channels: 2,
        // 441 frames: one buffer half is exactly 10 ms at 44.1 kHz.
        samples: 441,
    };
    device
        .open(request, move |buf| {
            counter.set(counter.get() + 1);
            buf.fill(0x11);
        })
        .unwrap();

    let half = 441 * 4;
    let (base, end) = device.system().playback_region().unwrap();
    assert_eq!(end - base, half as u32);
    assert_eq!(device.buffer_index(), Some(0));
    assert_eq!(fills.get(), 0);

    // First frame end: replay moves to half 1, half 0 is refilled.
    device.system_mut().sleep_ms(10);
    assert_eq!(device.buffer_index(), Some(1));
    assert_eq!(fills.get(), 1);
    let model = device.system();
    assert_eq!(
        model.playback_region().unwrap(),
        (base + half as u32, base + 2 * half as u32)
    );
    assert_eq!(model.ram_at(base, half), vec![0x11u8; half].as_slice());
    // The half now playing is still silence.
    assert_eq!(
        model.ram_at(base + half as u32, half),
        vec![0u8; half].as_slice()
    );

    // Second frame end: back to half 0.
    device.system_mut().sleep_ms(10);
    assert_eq!(device.buffer_index(), Some(0));
    assert_eq!(fills.get(), 2);
    assert!(device.system().playback_active());
}
