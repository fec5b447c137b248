//! Sets the process wide abort flag, so it lives in a test binary of its own.

use std::io::Write;

use psrio::convert;
use psrio::metadata::BeamFlip;
use psrio::session::{abort_requested, request_abort, reset_abort};
use psrio::{
    Band, BoundedName, Error, Format, ObservationMetadata, RawCopier, SampleDepth, SplitOptions,
    Splitter, codec_for,
};

fn write_tim(path: &std::path::Path, samples: u64) {
    let meta = ObservationMetadata {
        site: BoundedName::new("Jodrell Bank").unwrap(),
        source_name: BoundedName::new("B0531+21").unwrap(),
        start_mjd: 57000.0,
        sampling_interval_ms: 15000.0,
        band: Band::from_first_channel(1400.0, 1.0, 1),
        num_channels: 1,
        num_good_channels: 1,
        num_ifs: 1,
        depth: SampleDepth::Bits32,
        time_samples: samples,
        data_size_bytes: samples * 4,
        header_len: 0,
        beam_flip: BeamFlip::default(),
        num_bad_times: 0,
    };
    let codec = codec_for(Format::PrestoTim);
    codec.write(path, &meta).unwrap();
    codec
        .open_payload(path)
        .unwrap()
        .write_all(&vec![0u8; samples as usize * 4])
        .unwrap();
}

#[test]
fn requested_abort_stops_every_operation() {
    let dir = tempfile::tempdir().unwrap();
    let tim = dir.path().join("crab.tim");
    write_tim(&tim, 10);

    request_abort();
    assert!(abort_requested());

    let splitter = Splitter::new(SplitOptions {
        minutes: 1.0,
        block_samples: 2,
        output_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(splitter.split(&tim), Err(Error::Interrupted)));

    let mut copier = RawCopier::new(16).unwrap();
    let second = dir.path().join("second.tim");
    write_tim(&second, 4);
    let report = convert::for_each_file(&[tim.clone(), second], |input| {
        convert::tim_to_dat(input, &mut copier).map(|_| ())
    });
    assert!(report.interrupted());
    assert_eq!(report.failed.len(), 1);

    reset_abort();
    assert!(!abort_requested());
    let report = splitter.split(&tim).unwrap();
    assert_eq!(report.sections.len(), 3);
}
