//! End-to-end tests against the fixtures under `tests/data/`.
//!
//! The fixtures are synthetic `authroot.stl` files signed by the test PKI
//! whose root is the crate's embedded anchor; `tests/data/generate.py`
//! rebuilds them. The signing certificate is deliberately expired, so the
//! valid fixture only parses because chain verification anchors its clock
//! inside the signer's validity window.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use authroot_stl::{
    parse, parse_file, parse_reader, CertificateTrustList, CtlError, EKU_CLIENT_AUTHENTICATION,
    EKU_CODE_SIGNING, EKU_SERVER_AUTHENTICATION,
};
use hex_literal::hex;
use rand::RngCore;

const MS_ROOT_SHA1: &str = "CDD4EEAE6000AC7F40C3802C171E30148030C072";

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

fn fixture(name: &str) -> Vec<u8> {
    fs::read(fixture_path(name)).unwrap()
}

#[test]
fn test_parse() {
    let subjects = parse(&fixture("ctl.stl")).unwrap();
    assert!(subjects.len() >= 400, "only {} subjects", subjects.len());

    let subject = subjects
        .iter()
        .find(|subject| subject.sha1_fingerprint == MS_ROOT_SHA1)
        .expect("fixture lost its Microsoft Root Certificate Authority entry");

    assert_eq!(subject.friendly_name, "Microsoft Root Certificate Authority");
    assert_eq!(
        subject.sha256_fingerprint,
        "885DE64C340E3EA70658F01E1145F957FCDA27AABEEA1AB9FAA9FDB0102D4077"
    );
    assert_eq!(subject.subject_name_md5, "F0C402F0404EA9ADBF25A03DDF2CA6FA");
    assert_eq!(subject.key_id, "0EAC826040562797E52513FC2AE10A539559E4A4");
    assert_eq!(subject.microsoft_extended_key_usage, 0);
    assert_eq!(
        subject.disabled_date.unwrap().to_rfc3339(),
        "2021-08-01T00:00:00+00:00"
    );
    assert_eq!(
        subject.not_before.unwrap().to_rfc3339(),
        "2017-04-30T00:00:00+00:00"
    );
}

#[test]
fn test_parse_invariants() {
    let subjects = parse(&fixture("ctl.stl")).unwrap();

    for subject in &subjects {
        assert!(!subject.friendly_name.is_empty());
        assert_eq!(subject.sha1_fingerprint.len(), 40);
        assert_eq!(subject.sha256_fingerprint.len(), 64);
        for fingerprint in [&subject.sha1_fingerprint, &subject.sha256_fingerprint] {
            assert!(fingerprint
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }
}

#[test]
fn test_parse_preserves_list_order() {
    let subjects = parse(&fixture("ctl.stl")).unwrap();

    assert_eq!(subjects[0].sha1_fingerprint, MS_ROOT_SHA1);
    assert_eq!(subjects[1].friendly_name, "EKU Sample Root");
    assert_eq!(subjects[2].friendly_name, "Test Root 000");
    assert_eq!(subjects.last().unwrap().friendly_name, "Test Root 399");
}

#[test]
fn test_parse_is_deterministic() {
    let data = fixture("ctl.stl");
    assert_eq!(parse(&data).unwrap(), parse(&data).unwrap());
}

#[test]
fn test_eku_masks() {
    let subjects = parse(&fixture("ctl.stl")).unwrap();
    let sample = &subjects[1];

    assert_eq!(
        sample.microsoft_extended_key_usage,
        EKU_SERVER_AUTHENTICATION | EKU_CLIENT_AUTHENTICATION
    );
    assert_eq!(sample.not_before_eku, EKU_CODE_SIGNING);
    assert_eq!(
        sample.not_before.unwrap().to_rfc3339(),
        "2017-08-01T00:00:00+00:00"
    );
    // The fixture's disabled-date value is 7 bytes, not a FILETIME.
    assert_eq!(sample.disabled_date, None);
}

#[test]
fn test_sha1_fingerprint_mirrors_identifier() {
    let ctl = CertificateTrustList::from_der(File::open(fixture_path("ctl.stl")).unwrap()).unwrap();
    let subjects = parse(&fixture("ctl.stl")).unwrap();

    let entries = ctl.trusted_subjects.as_deref().unwrap();
    assert_eq!(entries.len(), subjects.len());
    for (entry, subject) in entries.iter().zip(&subjects) {
        assert_eq!(
            subject.sha1_fingerprint.to_lowercase(),
            hex::encode(entry.cert_id())
        );
    }
}

#[test]
fn test_raw_extended_key_usages() {
    let ctl = CertificateTrustList::from_der(File::open(fixture_path("ctl.stl")).unwrap()).unwrap();
    let sample = &ctl.trusted_subjects.as_deref().unwrap()[1];

    let ekus: Vec<String> = sample
        .extended_key_usages()
        .map(|eku| eku.unwrap().to_string())
        .collect();
    // The raw iterator reports every listed OID, recognized or not.
    assert_eq!(
        ekus,
        ["1.3.6.1.5.5.7.3.1", "1.3.6.1.5.5.7.3.2", "1.3.6.1.4.1.311.94.1.1"]
    );
}

#[test]
fn test_entry_point_wrappers() {
    let subjects = parse(&fixture("ctl.stl")).unwrap();
    assert_eq!(parse_file(fixture_path("ctl.stl")).unwrap(), subjects);
    assert_eq!(
        parse_reader(File::open(fixture_path("ctl.stl")).unwrap()).unwrap(),
        subjects
    );
}

#[test]
fn test_parse_unsigned() {
    match parse(&fixture("ctl_no_signers.stl")) {
        Err(CtlError::SignerCount(0)) => {}
        other => panic!("expected SignerCount(0), got {other:?}"),
    }
}

#[test]
fn test_parse_two_signers() {
    // Either the DER layer balks at the duplicate SET entries or the
    // single-signer rule does; both are rejections.
    match parse(&fixture("ctl_two_signers.stl")) {
        Err(CtlError::SignerCount(2)) | Err(CtlError::Der(_)) => {}
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn test_parse_wrong_content_type() {
    assert!(matches!(
        parse(&fixture("ctl_wrong_content_type.stl")),
        Err(CtlError::Content(_))
    ));
}

#[test]
fn test_parse_trailing_data() {
    for garbage in [&[0x00][..], &[0xDE, 0xAD, 0xBE, 0xEF][..]] {
        let mut data = fixture("ctl.stl");
        data.extend_from_slice(garbage);
        assert!(matches!(parse(&data), Err(CtlError::Der(_))));
    }
}

#[test]
fn test_parse_truncated() {
    let data = fixture("ctl.stl");
    assert!(parse(&data[..data.len() / 2]).is_err());
    assert!(parse(&[]).is_err());
}

#[test]
fn test_parse_random_bytes() {
    let mut rng = rand::thread_rng();
    for _ in 0..16 {
        let mut data = [0u8; 256];
        rng.fill_bytes(&mut data);
        assert!(parse(&data).is_err());
    }
}

#[test]
fn test_parse_tampered_signature() {
    assert!(matches!(
        parse(&fixture("ctl_tampered_signature.stl")),
        Err(CtlError::Signature(_))
    ));
}

#[test]
fn test_parse_tampered_payload() {
    assert!(matches!(
        parse(&fixture("ctl_tampered_payload.stl")),
        Err(CtlError::DigestMismatch)
    ));
}

#[test]
fn test_payload_bit_flips_always_fail() {
    // Flip single bytes inside a subject attribute of the signed payload.
    let data = fixture("ctl.stl");
    let needle = hex!("885DE64C340E3EA70658F01E1145F957FCDA27AABEEA1AB9FAA9FDB0102D4077");
    let offset = data
        .windows(needle.len())
        .position(|window| window == needle)
        .unwrap();

    for i in 0..4 {
        let mut mutated = data.clone();
        mutated[offset + i] ^= 0x01;
        assert!(parse(&mutated).is_err(), "flip at +{i} went unnoticed");
    }
}

#[test]
fn test_parse_this_update_outside_signer_validity() {
    match parse(&fixture("ctl_bad_this_update.stl")) {
        Err(err @ CtlError::ThisUpdate { .. }) => {
            // The diagnostic names both bounds of the signer's window.
            let message = err.to_string();
            assert!(message.contains("2020-01-01"), "{message}");
            assert!(message.contains("2022-01-01"), "{message}");
        }
        other => panic!("expected ThisUpdate, got {other:?}"),
    }
}

#[test]
fn test_parse_names_failing_subject() {
    match parse(&fixture("ctl_missing_friendly_name.stl")) {
        Err(CtlError::Subject { index: 1, .. }) => {}
        other => panic!("expected Subject {{ index: 1 }}, got {other:?}"),
    }
}
