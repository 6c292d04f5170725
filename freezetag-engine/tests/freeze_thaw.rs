//! End-to-end freeze/thaw/shave scenarios, mirroring the numbered cases
//! in the specification's testable-properties section.

use freezetag_engine::{freeze, shave, thaw, FreezeOptions, FreezeOutcome, ThawOptions};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

const FLAC_MAGIC: &[u8] = b"fLaC";

fn write_flac_block(out: &mut Vec<u8>, last: bool, block_type: u8, data: &[u8]) {
    let first = ((last as u8) << 7) | block_type;
    out.push(first);
    let size = data.len() as u32;
    out.extend_from_slice(&size.to_be_bytes()[1..]);
    out.extend_from_slice(data);
}

fn sample_flac(comment: &[u8], audio: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(FLAC_MAGIC);
    write_flac_block(&mut bytes, comment.is_empty(), 0, &[0u8; 34]);
    if !comment.is_empty() {
        write_flac_block(&mut bytes, true, 4, comment);
    }
    bytes.extend_from_slice(audio);
    bytes
}

fn encode_syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7f) as u8,
        ((value >> 14) & 0x7f) as u8,
        ((value >> 7) & 0x7f) as u8,
        (value & 0x7f) as u8,
    ]
}

fn sample_mp3(tag_body: &[u8], audio: &[u8], with_v1: bool) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"ID3");
    bytes.push(3);
    bytes.push(0);
    bytes.push(0);
    bytes.extend_from_slice(&encode_syncsafe(tag_body.len() as u32));
    bytes.extend_from_slice(tag_body);
    bytes.extend_from_slice(audio);
    if with_v1 {
        let mut v1 = [0u8; 128];
        v1[0..3].copy_from_slice(b"TAG");
        bytes.extend_from_slice(&v1);
    }
    bytes
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = fs::File::create(path).unwrap();
    f.write_all(bytes).unwrap();
}

/// Scenario 1: freeze a single FLAC, thaw into an empty destination,
/// and get the original bytes back.
#[test]
fn freeze_then_thaw_into_empty_destination() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("root");
    let original = sample_flac(b"title=X", b"audiobytesaudiobytes");
    write_file(&root.join("a.flac"), &original);

    let outcome = freeze(&root, &FreezeOptions::default()).unwrap();
    let (ftag_path, freezetag) = match outcome {
        FreezeOutcome::Written { path, freezetag } => (path, freezetag),
        other => panic!("expected Written, got {other:?}"),
    };
    let id = freezetag.get_id().unwrap();
    assert!(id.starts_with('F'));
    assert_eq!(id.matches('-').count(), 2);

    let dst = work.path().join("dst");
    fs::create_dir_all(&dst).unwrap();
    let options = ThawOptions {
        to: Some(dst.clone()),
        ftag: Some(ftag_path),
        skip_checks: false,
    };
    let thawed_root = thaw(&root, &options, |_| true).unwrap();

    assert_eq!(thawed_root, dst.join("root"));
    let restored = fs::read(thawed_root.join("a.flac")).unwrap();
    assert_eq!(restored, original);
}

/// Scenario 2: freeze, retag on disk without touching audio, thaw in
/// place, and recover the original tag. Re-freezing after that still
/// shares the first ID segment with the original freeze.
#[test]
fn thaw_in_place_restores_retagged_file() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("root");
    let original = sample_flac(b"title=X", b"sameaudiobytes");
    write_file(&root.join("a.flac"), &original);

    let outcome = freeze(&root, &FreezeOptions::default()).unwrap();
    let (ftag_path, freezetag) = match outcome {
        FreezeOutcome::Written { path, freezetag } => (path, freezetag),
        other => panic!("expected Written, got {other:?}"),
    };
    let first_id = freezetag.get_id().unwrap();

    let retagged = sample_flac(b"title=Y", b"sameaudiobytes");
    write_file(&root.join("a.flac"), &retagged);

    let options = ThawOptions {
        to: None,
        ftag: Some(ftag_path),
        skip_checks: false,
    };
    let thawed_root = thaw(&root, &options, |_| true).unwrap();
    let restored = fs::read(thawed_root.join("a.flac")).unwrap();
    assert_eq!(restored, original);

    let refrozen = freeze(&thawed_root, &FreezeOptions::default()).unwrap();
    let refrozen_id = match refrozen {
        FreezeOutcome::Written { freezetag, .. } => freezetag.get_id().unwrap(),
        other => panic!("expected Written, got {other:?}"),
    };
    assert_eq!(
        first_id.split('-').next(),
        refrozen_id.split('-').next(),
        "re-freezing a restored file must keep the same audio checksum"
    );
}

/// Scenario 3: two FLACs share audio but carry distinct tags. Deleting
/// one before thaw still restores both, each with its own metadata.
#[test]
fn thaw_recovers_duplicate_audio_from_surviving_copy() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("root");
    let a = sample_flac(b"title=A", b"duplicatedaudio");
    let b = sample_flac(b"title=B", b"duplicatedaudio");
    write_file(&root.join("a.flac"), &a);
    write_file(&root.join("b.flac"), &b);

    let outcome = freeze(&root, &FreezeOptions::default()).unwrap();
    let ftag_path = match outcome {
        FreezeOutcome::Written { path, .. } => path,
        other => panic!("expected Written, got {other:?}"),
    };

    fs::remove_file(root.join("b.flac")).unwrap();

    let options = ThawOptions {
        to: None,
        ftag: Some(ftag_path),
        skip_checks: true,
    };
    let thawed_root = thaw(&root, &options, |_| true).unwrap();

    assert_eq!(fs::read(thawed_root.join("a.flac")).unwrap(), a);
    assert_eq!(fs::read(thawed_root.join("b.flac")).unwrap(), b);
}

/// Scenario 4: repeated backup-freezes with no changes report "no
/// changes" and skip rehashing files whose stat is unchanged.
#[test]
fn backup_freeze_skips_unchanged_files() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("root");
    write_file(&root.join("a.flac"), &sample_flac(b"title=X", b"audio"));

    let now = SystemTime::now();
    let options = FreezeOptions {
        backup: true,
        ftag: None,
        now,
    };
    let first = freeze(&root, &options).unwrap();
    assert!(matches!(first, FreezeOutcome::Written { .. }));

    let later = now + std::time::Duration::from_secs(1);
    let options_again = FreezeOptions {
        backup: true,
        ftag: None,
        now: later,
    };
    let second = freeze(&root, &options_again).unwrap();
    match second {
        FreezeOutcome::NoChanges { .. } => {}
        other => panic!("expected NoChanges on an unmodified backup, got {other:?}"),
    }
}

/// Scenario 5: an MP3 with an ID3v2.3 head and an ID3v1 trailer
/// round-trips byte-for-byte through freeze, shave, and thaw, and its
/// audio checksum survives the shave.
#[test]
fn mp3_round_trips_through_shave_and_thaw() {
    let work = tempfile::tempdir().unwrap();
    let root = work.path().join("root");
    let original = sample_mp3(b"tagframe00", b"mp3audioframes", true);
    write_file(&root.join("song.mp3"), &original);

    let outcome = freeze(&root, &FreezeOptions::default()).unwrap();
    let (ftag_path, freezetag) = match outcome {
        FreezeOutcome::Written { path, freezetag } => (path, freezetag),
        other => panic!("expected Written, got {other:?}"),
    };
    let id_before_shave = freezetag.get_id().unwrap();

    shave(&root).unwrap();
    let stripped = fs::read(root.join("song.mp3")).unwrap();
    assert_ne!(stripped, original);

    // Shaving must not perturb the audio checksum: re-hashing the
    // now-stripped file from scratch still yields the same freezetag ID.
    let reread = freezetag_format::ParsedFile::open(root.join("song.mp3"));
    reread.strip().unwrap();
    let checksum_after_shave = reread.checksum().unwrap();
    assert_eq!(checksum_after_shave, freezetag.frozen.files[0].checksum);
    assert!(id_before_shave.starts_with('F'));

    let options = ThawOptions {
        to: None,
        ftag: Some(ftag_path),
        skip_checks: true,
    };
    let thawed_root = thaw(&root, &options, |_| true).unwrap();
    let restored = fs::read(thawed_root.join("song.mp3")).unwrap();
    assert_eq!(restored, original);
}
