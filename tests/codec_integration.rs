//! Codec files on disk: round trips, random access and the monolith fallback.

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::{noise, sawtooth, write_codec_file, write_codec_to, write_monolith, TEST_SAMPLE_RATE};
use proptest::prelude::*;
use sostenuto::{CompressorOptions, LacReader, SampleBuffer, SampleFormat, COMPRESSION_BLOCK_SIZE};
use std::fs::File;
use std::io::{BufReader, Cursor};
use tempfile::TempDir;

fn open(path: &std::path::Path) -> LacReader<BufReader<File>> {
    LacReader::new(BufReader::new(File::open(path).unwrap())).unwrap()
}

fn read_fixed(reader: &mut LacReader<BufReader<File>>, channels: usize, start: u64, num: usize) -> Vec<Vec<i16>> {
    let mut dest = SampleBuffer::new(SampleFormat::Fixed16, channels, num).unwrap();
    reader.read(&mut dest, 0, start, num).unwrap();
    (0..channels)
        .map(|c| dest.channel_fixed(c).unwrap().to_vec())
        .collect()
}

#[test]
fn test_stereo_file_round_trips() {
    let dir = TempDir::new().unwrap();
    let left = noise(3 * COMPRESSION_BLOCK_SIZE + 17, 1);
    let right = sawtooth(left.len());
    let (path, header) = write_codec_file(&dir, "stereo.lac", &[&left, &right]);
    assert_eq!(header.num_channels, 2);
    assert_eq!(header.block_amount(), 4);

    let mut reader = open(&path);
    assert_eq!(reader.sample_rate(), TEST_SAMPLE_RATE as u32);
    // the last block is padded to a whole block
    assert_eq!(reader.length_in_samples(), 4 * COMPRESSION_BLOCK_SIZE as u64);

    let decoded = read_fixed(&mut reader, 2, 0, left.len());
    assert_eq!(decoded[0], left);
    assert_eq!(decoded[1], right);
}

#[test]
fn test_random_access_matches_sequential_read() {
    let dir = TempDir::new().unwrap();
    let data = noise(5 * COMPRESSION_BLOCK_SIZE, 7);
    let (path, _) = write_codec_file(&dir, "mono.lac", &[&data]);
    let mut reader = open(&path);

    for (start, num) in [(0u64, 10usize), (4090, 20), (8192, 4096), (12_000, 5000), (20_000, 480)] {
        let chunk = read_fixed(&mut reader, 1, start, num);
        assert_eq!(chunk[0], &data[start as usize..start as usize + num], "start {start}");
    }
}

#[test]
fn test_read_past_end_is_silence() {
    let dir = TempDir::new().unwrap();
    let data = vec![1234i16; COMPRESSION_BLOCK_SIZE];
    let (path, _) = write_codec_file(&dir, "short.lac", &[&data]);
    let mut reader = open(&path);
    let chunk = read_fixed(&mut reader, 1, 4000, 200);
    assert!(chunk[0][..96].iter().all(|s| *s == 1234));
    assert!(chunk[0][96..].iter().all(|s| *s == 0));
}

#[test]
fn test_block_offsets_increase() {
    let dir = TempDir::new().unwrap();
    let data = noise(8 * COMPRESSION_BLOCK_SIZE, 3);
    let (_, header) = write_codec_file(&dir, "offsets.lac", &[&data]);

    let mut previous = 0;
    for pos in (0..data.len() as u64).step_by(1000) {
        let offset = header.offset_for_read_position(pos);
        assert!(offset >= previous, "offset for {pos} went backwards");
        assert!(offset >= header.header_size());
        previous = offset;
    }
    assert_eq!(header.offset_for_read_position(data.len() as u64 * 2), 0);
}

#[test]
fn test_max_level() {
    let dir = TempDir::new().unwrap();
    let mut data = vec![0i16; 2 * COMPRESSION_BLOCK_SIZE];
    data[5000] = -16384;
    let (path, _) = write_codec_file(&dir, "peak.lac", &[&data]);
    let mut reader = open(&path);
    assert_eq!(reader.read_max_level(0, 4096).unwrap(), 0.0);
    assert!((reader.read_max_level(0, 8192).unwrap() - 0.5).abs() < 1e-6);
}

#[test]
fn test_uncompressed_writer_produces_monolith() {
    let dir = TempDir::new().unwrap();
    let data = sawtooth(1000);
    let path = dir.path().join("raw.lac");
    write_codec_to(&path, &[&data], CompressorOptions::uncompressed());

    let mut reader = open(&path).with_sample_rate(48000);
    assert!(reader.is_monolith());
    assert_eq!(reader.sample_rate(), 48000);
    assert_eq!(reader.length_in_samples(), 1000);
    assert_eq!(read_fixed(&mut reader, 1, 10, 100)[0], &data[10..110]);
}

#[test]
fn test_monolith_container_entries() {
    let dir = TempDir::new().unwrap();
    let a = sawtooth(3000);
    let b = noise(1500, 9);
    let info = write_monolith(&dir, "bank.mono", &[&a, &b]);

    assert_eq!(info.entries.len(), 2);
    assert_eq!(info.index_of("sample1"), Some(1));
    let first = info.entry(0).unwrap();
    let second = info.entry(1).unwrap();
    assert_eq!(first.length, 3000);
    assert_eq!(second.length, 1500);
    assert_eq!(first.offset, 0);
    assert_eq!(second.offset, 3000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_signal_round_trips(
        data in prop::collection::vec(any::<i16>(), 1..3 * COMPRESSION_BLOCK_SIZE),
        stereo in any::<bool>(),
    ) {
        let right: Vec<i16> = data.iter().rev().copied().collect();
        let channels: Vec<&[i16]> = if stereo { vec![&data, &right] } else { vec![&data] };

        let mut bytes = Vec::new();
        {
            let mut writer = sostenuto::LacWriter::new(
                Cursor::new(&mut bytes),
                channels.len(),
                44100,
                CompressorOptions::diff(),
            )
            .unwrap();
            writer.write_fixed(&channels).unwrap();
            writer.finish().unwrap();
        }

        let mut reader = LacReader::new(Cursor::new(bytes)).unwrap();
        let mut dest = SampleBuffer::new(SampleFormat::Fixed16, channels.len(), data.len()).unwrap();
        reader.read(&mut dest, 0, 0, data.len()).unwrap();
        for (c, expected) in channels.iter().enumerate() {
            prop_assert_eq!(dest.channel_fixed(c).unwrap(), *expected);
        }
    }
}
