//! Hostile-input behavior: truncations, oversized declared lengths, and
//! corrupt container payloads must produce clean errors, never panics or
//! pathological allocations.

mod common;

use common::Db;
use rdbkit::{read_value, RecordType, SnapshotError, Writer, SUPPORTED_VERSION};

fn sample_list_dump() -> Vec<u8> {
    let mut w = Writer::new();
    w.write_type(RecordType::List).unwrap();
    w.write_list(&[b"alpha".as_slice(), b"beta", b"gamma"]).unwrap();
    w.into_bytes()
}

#[test]
fn every_truncation_of_a_list_dump_errors() {
    let dump = sample_list_dump();

    for cut in 0..dump.len() {
        let mut db = Db::new();
        let result = read_value(b"k", &dump[..cut], &mut db);
        assert!(result.is_err(), "truncation at {cut} decoded successfully");
    }

    let mut db = Db::new();
    read_value(b"k", &dump, &mut db).unwrap();
}

#[test]
fn every_truncation_of_a_stream_dump_errors() {
    let stream = rdbkit::Stream {
        last_id: rdbkit::StreamId { millis: 9, seq: 1 },
        length: 1,
        entries: vec![rdbkit::StreamEntry {
            id: rdbkit::StreamId { millis: 9, seq: 1 },
            fields: vec![(b"f".to_vec(), b"v".to_vec())],
        }],
        groups: vec![],
    };

    let mut w = Writer::new();
    w.write_type(RecordType::StreamListpacks3).unwrap();
    w.write_stream(&stream).unwrap();
    let dump = w.into_bytes();

    for cut in 0..dump.len() {
        let mut db = Db::new();
        assert!(
            read_value(b"k", &dump[..cut], &mut db).is_err(),
            "truncation at {cut} decoded successfully"
        );
    }
}

#[test]
fn huge_declared_list_length_fails_without_allocating() {
    // A list claiming u64::MAX entries backed by three bytes.
    let payload = [
        RecordType::List as u8,
        0x81,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        0xFF,
        1,
        b'x',
    ];

    let mut db = Db::new();
    assert!(matches!(
        read_value(b"k", &payload, &mut db),
        Err(SnapshotError::UnexpectedEof)
    ));
}

#[test]
fn huge_compressed_length_fails_without_allocating() {
    // Compressed string declaring a 4 GiB output with a 2-byte input.
    let mut payload = vec![RecordType::String as u8, 0xC3];
    payload.push(2); // compressed length
    payload.extend_from_slice(&[0x80, 0xFF, 0xFF, 0xFF, 0xFF]); // uncompressed length
    payload.extend_from_slice(&[0, b'a']);

    let mut db = Db::new();
    assert!(read_value(b"k", &payload, &mut db).is_err());
}

#[test]
fn ziplist_with_missing_end_marker() {
    // zlbytes + zltail + zllen(1) + one entry, then garbage where the end
    // marker belongs.
    let mut zl = Vec::new();
    zl.extend_from_slice(&0u32.to_le_bytes());
    zl.extend_from_slice(&0u32.to_le_bytes());
    zl.extend_from_slice(&1u16.to_le_bytes());
    zl.extend_from_slice(&[0, 1, b'q']);
    zl.push(0x42);

    let mut payload = vec![RecordType::ListZiplist as u8, zl.len() as u8];
    payload.extend_from_slice(&zl);

    let mut db = Db::new();
    assert!(matches!(
        read_value(b"k", &payload, &mut db),
        Err(SnapshotError::Malformed(_))
    ));
}

#[test]
fn listpack_set_with_bogus_encoding() {
    // 0xF5 is not a valid listpack encoding byte.
    let mut lp = Vec::new();
    lp.extend_from_slice(&0u32.to_le_bytes());
    lp.extend_from_slice(&1u16.to_le_bytes());
    lp.push(0xF5);
    lp.push(0xFF);

    let mut payload = vec![RecordType::SetListpack as u8, lp.len() as u8];
    payload.extend_from_slice(&lp);

    let mut db = Db::new();
    assert!(matches!(
        read_value(b"k", &payload, &mut db),
        Err(SnapshotError::Malformed(_))
    ));
}

#[test]
fn unknown_record_type_is_rejected() {
    let mut db = Db::new();
    assert!(matches!(
        read_value(b"k", &[6, 0], &mut db),
        Err(SnapshotError::UnknownRecordType(6))
    ));
    assert!(matches!(
        read_value(b"k", &[22, 0], &mut db),
        Err(SnapshotError::Unsupported(_))
    ));
}

#[test]
fn handler_errors_abort_decoding() {
    struct Aborting;

    impl rdbkit::SnapshotHandler for Aborting {
        fn on_list_entry(&mut self, _key: &[u8], _elem: Vec<u8>) -> rdbkit::Result<()> {
            Err(SnapshotError::Handler("stop".into()))
        }
    }

    let dump = sample_list_dump();
    let mut handler = Aborting;
    assert!(matches!(
        read_value(b"k", &dump, &mut handler),
        Err(SnapshotError::Handler(_))
    ));
}

#[test]
fn corrupt_value_checksum_variants() {
    let mut w = Writer::new();
    w.write_type(RecordType::String).unwrap();
    w.write_string(b"payload").unwrap();
    w.write_checksum(SUPPORTED_VERSION).unwrap();
    let dump = w.into_bytes();

    rdbkit::verify_value_checksum(&dump).unwrap();

    // Any flipped content byte breaks the checksum.
    let mut bad = dump.clone();
    bad[2] ^= 0x01;
    assert!(matches!(
        rdbkit::verify_value_checksum(&bad),
        Err(SnapshotError::BadCrc { .. })
    ));

    // A future version is rejected before the CRC is considered.
    let mut future = dump.clone();
    let at = future.len() - 10;
    future[at] = 99;
    assert!(matches!(
        rdbkit::verify_value_checksum(&future),
        Err(SnapshotError::UnsupportedVersion(99))
    ));
}
