use std::io::Write;
use std::path::{Path, PathBuf};

use psrio::convert::{self, fits_to_fil};
use psrio::metadata::BeamFlip;
use psrio::psrfits::{PsrFitsCodec, padding};
use psrio::{
    Band, BoundedName, Error, Format, MetadataCodec, ObservationMetadata, RawCopier,
    SampleDepth, codec_for, detect,
};

const NSBLK: u32 = 4;

fn search_meta(channels: u32, samples: u64, start_mjd: f64) -> ObservationMetadata {
    let depth = SampleDepth::Bits16;
    ObservationMetadata {
        site: BoundedName::new("Arecibo").unwrap(),
        source_name: BoundedName::new("B1937+21").unwrap(),
        start_mjd,
        sampling_interval_ms: 0.5,
        band: Band::from_centre(430.0, -1.5, channels, true),
        num_channels: channels,
        num_good_channels: channels,
        num_ifs: 1,
        depth,
        time_samples: samples,
        data_size_bytes: depth.payload_bytes(samples, channels).unwrap(),
        header_len: 0,
        beam_flip: BeamFlip::default(),
        num_bad_times: 0,
    }
}

/// A PSRFITS file whose values count up from `first`, stored big-endian.
fn write_fits(path: &Path, meta: &ObservationMetadata, first: u16) {
    let codec = PsrFitsCodec::with_nsblk(NSBLK);
    let header_len = codec.write(path, meta).unwrap();
    let values = meta.time_samples * meta.num_channels as u64;
    let mut file = codec.open_payload(path).unwrap();
    for v in 0..values as u16 {
        file.write_all(&(first + v).to_be_bytes()).unwrap();
    }
    let payload = values * 2;
    file.write_all(&vec![0; padding(header_len + payload) as usize])
        .unwrap();
}

fn fil_values(path: &Path) -> (ObservationMetadata, Vec<u16>) {
    let meta = codec_for(Format::Filterbank).read(path).unwrap();
    let bytes = std::fs::read(path).unwrap();
    let values = bytes[meta.header_len as usize..]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    (meta, values)
}

#[test]
fn fits_files_are_joined_and_byte_swapped() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("obs_0001.fits");
    let second = dir.path().join("obs_0002.fits");
    write_fits(&first, &search_meta(2, 8, 59000.5), 0);
    write_fits(&second, &search_meta(2, 8, 59000.6), 16);
    let output = dir.path().join("obs.fil");

    let report = fits_to_fil(&[first.clone(), second.clone()], &output).unwrap();
    assert_eq!(report.converted, vec![first, second]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.time_samples, 16);

    let (meta, values) = fil_values(&output);
    assert_eq!(values, (0..32).collect::<Vec<u16>>());
    assert_eq!(meta.time_samples, 16);
    assert_eq!(meta.num_channels, 2);
    assert_eq!(meta.depth, SampleDepth::Bits16);
    assert_eq!(meta.source_name.as_str(), "B1937+21");
    assert!((meta.start_mjd - 59000.5).abs() < 1e-9);
    assert!(meta.band.flipped);
}

#[test]
fn unreadable_leading_input_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.fits");
    std::fs::write(&broken, b"SIMPLE  =                    T").unwrap();
    let good = dir.path().join("good.fits");
    write_fits(&good, &search_meta(4, 4, 59000.5), 100);
    let output = dir.path().join("good.fil");

    let report = fits_to_fil(&[broken.clone(), good.clone()], &output).unwrap();
    assert_eq!(report.converted, vec![good]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, broken);

    let (_, values) = fil_values(&output);
    assert_eq!(values, (100..116).collect::<Vec<u16>>());
}

#[test]
fn mismatched_later_input_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.fits");
    let second = dir.path().join("b.fits");
    write_fits(&first, &search_meta(2, 4, 59000.5), 0);
    write_fits(&second, &search_meta(4, 4, 59000.6), 0);

    let err = fits_to_fil(&[first, second], &dir.path().join("ab.fil")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn no_readable_input() {
    let dir = tempfile::tempdir().unwrap();
    let tim = dir.path().join("obs.tim");
    std::fs::write(&tim, b"not a header").unwrap();
    assert!(fits_to_fil(&[tim], &dir.path().join("obs.fil")).is_err());
}

#[test]
fn time_series_conversions_keep_samples() {
    let dir = tempfile::tempdir().unwrap();
    let tim = dir.path().join("series.tim");
    let meta = ObservationMetadata {
        depth: SampleDepth::Bits32,
        band: Band::from_first_channel(430.0, 1.5, 1),
        num_channels: 1,
        num_good_channels: 1,
        data_size_bytes: 5 * 4,
        ..search_meta(1, 5, 59000.5)
    };
    let codec = codec_for(Format::PrestoTim);
    codec.write(&tim, &meta).unwrap();
    let samples: Vec<u8> = [1.5f32, -2.0, 0.25, 8.0, 3.0]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    codec.open_payload(&tim).unwrap().write_all(&samples).unwrap();

    let mut copier = RawCopier::new(3).unwrap();
    let dat = convert::tim_to_dat(&tim, &mut copier).unwrap();
    assert_eq!(dat, dir.path().join("series.dat"));
    assert_eq!(detect(&dat).unwrap(), Format::PrestoDat);
    assert_eq!(std::fs::read(&dat).unwrap(), samples);

    std::fs::remove_file(&tim).unwrap();
    let back = convert::dat_to_tim(&dir.path().join("series.inf"), &mut copier).unwrap();
    assert_eq!(back, tim);
    let read = codec.read(&back).unwrap();
    assert_eq!(read.time_samples, 5);
    assert_eq!(read.source_name.as_str(), "B1937+21");
    let bytes = std::fs::read(&back).unwrap();
    assert_eq!(&bytes[read.header_len as usize..], samples.as_slice());
}

#[test]
fn batch_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let missing: PathBuf = dir.path().join("missing.tim");
    let text = dir.path().join("notes.tim");
    std::fs::write(&text, "seeing was poor").unwrap();

    let mut copier = RawCopier::new(1024).unwrap();
    let report = convert::for_each_file(&[missing, text], |input| {
        convert::tim_to_dat(input, &mut copier).map(|_| ())
    });
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed.len(), 2);
    assert!(!report.interrupted());
}
