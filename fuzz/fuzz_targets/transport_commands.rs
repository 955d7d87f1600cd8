#![no_main]

use libfuzzer_sys::fuzz_target;
use retune::audio::NullEngine;
use retune::clock::ManualClock;
use retune::config::MemoryStore;
use retune::core::{RadioCore, RadioParts, StartupOptions};
use retune::display::SharedScreen;
use retune::model::{Settings, SwitchTuning, Track};
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    let Some((&first, rest)) = data.split_first() else {
        return;
    };
    let clock = ManualClock::new(1_000_000);
    let Ok(mut core) = RadioCore::new(
        RadioParts {
            engines: [
                Box::new(NullEngine::new().with_default_duration(Duration::from_secs(90))),
                Box::new(NullEngine::new().with_default_duration(Duration::from_secs(200))),
            ],
            store: Box::new(MemoryStore::new(Settings {
                tuning: SwitchTuning::immediate(),
                ..Settings::default()
            })),
            clock: Box::new(clock.clone()),
            display: Box::new(SharedScreen::default()),
        },
        &StartupOptions::default(),
    ) else {
        return;
    };

    let stations = usize::from(first % 24);
    core.load_tracks(
        (0..stations)
            .map(|idx| Track::new(format!("/radio/station_{idx}.mp3")))
            .collect(),
    );

    for byte in rest {
        match byte % 9 {
            0 => core.play_pause(),
            1 => core.next(),
            2 => core.previous(),
            3 => core.select_station(usize::from(byte / 9)),
            4 => core.set_volume(*byte),
            5 => core.toggle_mute(),
            6 => core.reset_broadcast_clock(),
            7 => clock.advance(Duration::from_millis(u64::from(*byte) * 1_000)),
            _ => core.pump(),
        }
        assert!(core.switcher().active_count() <= 1);
        if core.controls_enabled() {
            assert_eq!(core.switcher().active_count(), 1);
        }
    }
});
