use std::io::Write;
use std::path::{Path, PathBuf};

use psrio::metadata::BeamFlip;
use psrio::mjd::offset_mjd;
use psrio::{
    Band, BoundedName, Error, Format, ObservationMetadata, SampleDepth, SplitOptions, Splitter,
    codec_for,
};

/// 15 s samples, so that one minute sections hold exactly four of them.
const TSAMP_MS: f64 = 15000.0;

fn series_meta(samples: u64) -> ObservationMetadata {
    ObservationMetadata {
        site: BoundedName::new("Effelsberg").unwrap(),
        source_name: BoundedName::new("J1713+0747").unwrap(),
        start_mjd: 58000.25,
        sampling_interval_ms: TSAMP_MS,
        band: Band::from_first_channel(1360.0, 1.0, 1),
        num_channels: 1,
        num_good_channels: 1,
        num_ifs: 1,
        depth: SampleDepth::Bits32,
        time_samples: samples,
        data_size_bytes: samples * 4,
        header_len: 0,
        beam_flip: BeamFlip::default(),
        num_bad_times: 0,
    }
}

/// Writes sample `i` as the float `i`, so every output sample tells where it came from.
fn write_series(path: &Path, format: Format, samples: u64) {
    let codec = codec_for(format);
    codec.write(path, &series_meta(samples)).unwrap();
    let mut file = codec.open_payload(path).unwrap();
    for i in 0..samples {
        file.write_all(&(i as f32).to_le_bytes()).unwrap();
    }
}

fn read_samples(path: &Path, format: Format) -> (ObservationMetadata, Vec<f32>) {
    let meta = codec_for(format).read(path).unwrap();
    let bytes = std::fs::read(path).unwrap();
    let samples = bytes[meta.header_len as usize..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    (meta, samples)
}

fn split(input: &Path, out: &Path, block_samples: u64) -> psrio::Result<psrio::SplitReport> {
    Splitter::new(SplitOptions {
        minutes: 1.0,
        block_samples,
        output_dir: Some(out.to_path_buf()),
        ..Default::default()
    })?
    .split(input)
}

fn range(from: u32, to: u32) -> Vec<f32> {
    (from..to).map(|i| i as f32).collect()
}

#[test]
fn final_section_overlaps_when_not_a_multiple() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("obs.tim");
    write_series(&input, Format::PrestoTim, 10);

    let report = split(&input, dir.path(), 3).unwrap();
    assert_eq!(report.plan.section_samples, 4);
    assert_eq!(report.plan.num_sections, 3);
    assert!(report.rewound);
    assert_eq!(report.sections.len(), 3);
    assert_eq!(report.samples_written(), 12);

    let expected = [range(0, 4), range(4, 8), range(6, 10)];
    for (index, section) in report.sections.iter().enumerate() {
        assert_eq!(
            section.path,
            dir.path().join(format!("obs.t{index}.tim"))
        );
        let (meta, samples) = read_samples(&section.path, Format::PrestoTim);
        assert_eq!(samples, expected[index]);
        assert_eq!(meta.time_samples, 4);
        assert_eq!(section.samples_written, 4);
        assert_eq!(meta.source_name.as_str(), "J1713+0747");
        let start = offset_mjd(58000.25, index as u64 * 4, TSAMP_MS);
        assert_eq!(section.start_mjd, start);
        assert_eq!(meta.start_mjd, start);
    }
}

#[test]
fn exact_multiple_rewinds_without_repeating() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("obs.tim");
    write_series(&input, Format::PrestoTim, 8);

    let report = split(&input, dir.path(), 3).unwrap();
    assert!(report.rewound);
    assert_eq!(report.plan.overlap_samples(), 0);
    assert_eq!(report.samples_written(), 8);

    let (_, first) = read_samples(&report.sections[0].path, Format::PrestoTim);
    let (_, last) = read_samples(&report.sections[1].path, Format::PrestoTim);
    assert_eq!(first, range(0, 4));
    assert_eq!(last, range(4, 8));
}

#[test]
fn short_observation_is_one_section() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("short.tim");
    write_series(&input, Format::PrestoTim, 3);

    let report = split(&input, dir.path(), 65536).unwrap();
    assert!(!report.rewound);
    assert_eq!(report.sections.len(), 1);
    let (meta, samples) = read_samples(&report.sections[0].path, Format::PrestoTim);
    assert_eq!(meta.time_samples, 3);
    assert_eq!(samples, range(0, 3));
}

#[test]
fn presto_sections_get_their_own_inf() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("obs.dat");
    write_series(&input, Format::PrestoDat, 9);

    let report = split(&input, dir.path(), 2).unwrap();
    assert_eq!(report.sections.len(), 3);
    for (index, section) in report.sections.iter().enumerate() {
        assert!(dir.path().join(format!("obs.t{index}.inf")).is_file());
        let (meta, samples) = read_samples(&section.path, Format::PrestoDat);
        assert_eq!(meta.time_samples, 4);
        assert_eq!(samples.len(), 4);
    }
    let (_, last) = read_samples(&report.sections[2].path, Format::PrestoDat);
    assert_eq!(last, range(5, 9));
}

#[test]
fn filterbank_sections() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("obs.fil");
    let channels = 16u32;
    let samples = 6u64;
    let meta = ObservationMetadata {
        num_channels: channels,
        num_good_channels: channels,
        depth: SampleDepth::Bits8,
        band: Band::from_first_channel(1500.0, -2.0, channels),
        data_size_bytes: samples * channels as u64,
        ..series_meta(samples)
    };
    let codec = codec_for(Format::Filterbank);
    codec.write(&input, &meta).unwrap();
    let payload: Vec<u8> = (0..samples * channels as u64).map(|i| i as u8).collect();
    codec.open_payload(&input).unwrap().write_all(&payload).unwrap();

    let report = split(&input, dir.path(), 1).unwrap();
    assert_eq!(report.sections.len(), 2);
    let last = &report.sections[1].path;
    let read = codec.read(last).unwrap();
    assert_eq!(read.time_samples, 4);
    assert_eq!(read.band, meta.band);
    let bytes = std::fs::read(last).unwrap();
    assert_eq!(&bytes[read.header_len as usize..], &payload[2 * 16..]);
}

#[test]
fn psrfits_must_be_converted_first() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("obs.fits");
    let meta = ObservationMetadata {
        band: Band::from_centre(1360.0, 1.0, 1, false),
        ..series_meta(2048)
    };
    let codec = codec_for(Format::PsrFits);
    codec.write(&input, &meta).unwrap();
    codec
        .open_payload(&input)
        .unwrap()
        .write_all(&vec![0u8; 2048 * 4])
        .unwrap();

    let err = split(&input, dir.path(), 64).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn unknown_input() {
    let dir = tempfile::tempdir().unwrap();
    let input: PathBuf = dir.path().join("notes.txt");
    std::fs::write(&input, "observing log").unwrap();
    assert!(matches!(
        split(&input, dir.path(), 64),
        Err(Error::UnknownFormat(_))
    ));
}
