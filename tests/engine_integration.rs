//! StreamingEngine end to end: allocation of voices, mixing and metrics.

#[path = "helpers/mod.rs"]
mod helpers;

use approx::assert_relative_eq;
use helpers::*;
use sostenuto::prelude::*;
use sostenuto::SampleFormat;
use tempfile::TempDir;

fn engine(voices: usize, config: StreamingConfig) -> StreamingEngine {
    let mut engine = StreamingEngine::builder()
        .config(config)
        .voices(voices)
        .build()
        .unwrap();
    engine.prepare_to_play(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE).unwrap();
    engine
}

#[test]
fn test_two_notes_are_summed() {
    let dir = TempDir::new().unwrap();
    let a = sawtooth(16_384);
    let b = noise(16_384, 2);
    let (path_a, _) = write_codec_file(&dir, "a.lac", &[&a]);
    let (path_b, _) = write_codec_file(&dir, "b.lac", &[&b]);

    let config = fixed_config().with_preload_size(2048).with_buffer_size(4096);
    let sounds = SoundPool::new(config);
    let sound_a = sounds.load(FileReference::file(&path_a)).unwrap();
    let sound_b = sounds.load(FileReference::file(&path_b)).unwrap();

    let mut engine = engine(4, config);
    assert_eq!(engine.note_on(&sound_a, 60, 60, 1.0), Some(0));
    assert_eq!(engine.note_on(&sound_b, 60, 60, 1.0), Some(1));
    assert_eq!(engine.active_voices(), 2);

    let mut left = vec![0.0f32; TEST_BLOCK_SIZE];
    let mut right = vec![0.0f32; TEST_BLOCK_SIZE];
    for block in 0..40 {
        engine.render(&mut [left.as_mut_slice(), right.as_mut_slice()], 0, TEST_BLOCK_SIZE);
        for i in 0..TEST_BLOCK_SIZE {
            let pos = block * TEST_BLOCK_SIZE + i;
            let expected = (a[pos] as f32 + b[pos] as f32) / 32768.0;
            assert_relative_eq!(left[i], expected, epsilon = 1e-5);
            assert_relative_eq!(right[i], expected, epsilon = 1e-5);
        }
    }

    let metrics = engine.metrics();
    assert!(metrics.refills > 0);
    assert_eq!(metrics.voices_killed, 0);
}

#[test]
fn test_voice_stealing_is_not_done() {
    let dir = TempDir::new().unwrap();
    let data = sawtooth(8192);
    let (path, _) = write_codec_file(&dir, "s.lac", &[&data]);
    let config = fixed_config();
    let sound = load_sound(&path, &config);

    let mut engine = engine(2, config);
    assert_eq!(engine.note_on(&sound, 60, 60, 1.0), Some(0));
    assert_eq!(engine.note_on(&sound, 62, 60, 1.0), Some(1));
    assert_eq!(engine.note_on(&sound, 64, 60, 1.0), None);
    assert_eq!(sound.reader().voice_count(), 2);

    engine.note_off(0);
    assert_eq!(engine.active_voices(), 1);
    assert_eq!(engine.note_on(&sound, 64, 60, 1.0), Some(0));
    assert_relative_eq!(
        engine.voice(0).unwrap().uptime_delta(),
        2f64.powf(4.0 / 12.0),
        epsilon = 1e-9
    );

    engine.all_notes_off();
    assert_eq!(engine.active_voices(), 0);
    assert_eq!(sound.reader().voice_count(), 0);
}

#[test]
fn test_notes_end_with_the_sample() {
    let dir = TempDir::new().unwrap();
    let data = vec![4096i16; 4096];
    let (path, _) = write_codec_file(&dir, "short.lac", &[&data]);
    let config = fixed_config();
    let sound = load_sound(&path, &config);

    let mut engine = engine(1, config);
    engine.note_on(&sound, 60, 60, 1.0).unwrap();
    let mut out = vec![0.0f32; TEST_BLOCK_SIZE];
    for _ in 0..(4096 / TEST_BLOCK_SIZE) {
        engine.render(&mut [out.as_mut_slice()], 0, TEST_BLOCK_SIZE);
        assert!(out.iter().all(|s| *s == 0.125));
    }
    assert_eq!(engine.active_voices(), 0);

    engine.render(&mut [out.as_mut_slice()], 0, TEST_BLOCK_SIZE);
    assert!(out.iter().all(|s| *s == 0.0));
}

#[test]
fn test_background_engine_reports_disk_usage() {
    let dir = TempDir::new().unwrap();
    let data = noise(65_536, 4);
    let (path, _) = write_codec_file(&dir, "long.lac", &[&data]);
    let config = StreamingConfig::default()
        .with_preload_size(2048)
        .with_buffer_size(4096)
        .with_buffer_format(SampleFormat::Fixed16);
    let sound = load_sound(&path, &config);

    let mut engine = engine(8, config);
    for _ in 0..8 {
        assert!(engine.note_on(&sound, 60, 60, 1.0).is_some());
    }
    let mut out = vec![0.0f32; TEST_BLOCK_SIZE];
    for _ in 0..64 {
        engine.render(&mut [out.as_mut_slice()], 0, TEST_BLOCK_SIZE);
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    let usage = engine.disk_usage();
    assert!((0.0..=1.0).contains(&usage));
    assert!(engine.metrics().refills > 0);

    engine.all_notes_off();
    assert!(engine.pool().wait_until_idle(std::time::Duration::from_secs(5)));
    assert_eq!(sound.reader().voice_count(), 0);
}
