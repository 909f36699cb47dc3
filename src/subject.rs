//! Decoded trust-program metadata for a single trust list entry.
//!
//! Windows attaches its root-program metadata to each [`TrustedSubject`] as
//! OID-tagged attributes whose values use a grab-bag of encodings: UTF-16LE
//! strings, raw hash bytes, nested DER OID sequences, and Windows FILETIME
//! timestamps. [`Subject`] is the decoded, caller-facing record.

use chrono::{DateTime, Utc};
use der::asn1::{Any, ObjectIdentifier, OctetStringRef};
use der::{Decode, Tag, Tagged};
use thiserror::Error;
use x509_cert::attr::Attribute;

use crate::ctl::{MetaEku, TrustedSubject};

/// The OID for an attribute containing the subject's friendly name.
pub const MS_CERT_PROP_ID_FRIENDLY_NAME_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.11");

/// The OID for an attribute containing the subject's key identifier.
pub const MS_CERT_PROP_ID_KEY_IDENTIFIER_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.20");

/// The OID for an attribute containing an MD5 hash of the subject's name.
pub const MS_CERT_PROP_ID_SUBJECT_NAME_MD5_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.29");

/// The OID for an attribute containing the certificate's SHA-256 fingerprint.
pub const MS_CERT_PROP_ID_SHA256_HASH_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.98");

/// The OID for an attribute containing `ExtendedKeyUsage` identifiers.
pub const MS_CERT_PROP_ID_METAEKUS_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.9");

/// The OID for an attribute containing the EKUs that apply after the
/// subject's activation date.
pub const MS_CERT_PROP_ID_NOT_BEFORE_EKUS_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.127");

/// The OID for an attribute containing the date the subject was distrusted.
pub const MS_CERT_PROP_ID_DISABLED_DATE_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.104");

/// The OID for an attribute containing the subject's activation date.
pub const MS_CERT_PROP_ID_NOT_BEFORE_DATE_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.11.126");

/// Client authentication (`1.3.6.1.5.5.7.3.2`).
pub const EKU_CLIENT_AUTHENTICATION: u16 = 1 << 0;
/// Code signing (`1.3.6.1.5.5.7.3.3`).
pub const EKU_CODE_SIGNING: u16 = 1 << 1;
/// Document signing (`1.3.6.1.4.1.311.10.3.12`).
pub const EKU_DOCUMENT_SIGNING: u16 = 1 << 2;
/// Encrypting file system (`1.3.6.1.4.1.311.10.3.4`).
pub const EKU_ENCRYPTING_FILE_SYSTEM: u16 = 1 << 3;
/// IPSec end system (`1.3.6.1.5.5.7.3.5`).
pub const EKU_IPSEC_END_SYSTEM: u16 = 1 << 4;
/// IPSec IKE intermediate (`1.3.6.1.5.5.8.2.2`).
pub const EKU_IPSEC_IKE_INTERMEDIATE: u16 = 1 << 5;
/// IPSec tunnel termination (`1.3.6.1.5.5.7.3.6`).
pub const EKU_IPSEC_TUNNEL_TERMINATION: u16 = 1 << 6;
/// IPSec user (`1.3.6.1.5.5.7.3.7`).
pub const EKU_IPSEC_USER: u16 = 1 << 7;
/// OCSP signing (`1.3.6.1.5.5.7.3.9`).
pub const EKU_OCSP_SIGNING: u16 = 1 << 8;
/// Secure email (`1.3.6.1.5.5.7.3.4`).
pub const EKU_SECURE_EMAIL: u16 = 1 << 9;
/// Server authentication (`1.3.6.1.5.5.7.3.1`).
pub const EKU_SERVER_AUTHENTICATION: u16 = 1 << 10;
/// Time stamping (`1.3.6.1.5.5.7.3.8`).
pub const EKU_TIME_STAMPING: u16 = 1 << 11;

/// Microsoft extended key usage designators and their bit assignments.
///
/// The bit positions are stable: values round-trip across releases.
const EKU_BITS: [(ObjectIdentifier, u16); 12] = [
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.2"),
        EKU_CLIENT_AUTHENTICATION,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3"),
        EKU_CODE_SIGNING,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.3.12"),
        EKU_DOCUMENT_SIGNING,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.3.4"),
        EKU_ENCRYPTING_FILE_SYSTEM,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.5"),
        EKU_IPSEC_END_SYSTEM,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.8.2.2"),
        EKU_IPSEC_IKE_INTERMEDIATE,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.6"),
        EKU_IPSEC_TUNNEL_TERMINATION,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.7"),
        EKU_IPSEC_USER,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.9"),
        EKU_OCSP_SIGNING,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.4"),
        EKU_SECURE_EMAIL,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.1"),
        EKU_SERVER_AUTHENTICATION,
    ),
    (
        ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.8"),
        EKU_TIME_STAMPING,
    ),
];

/// Number of 100-ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

/// Possible errors while decoding a single trust list entry.
#[derive(Debug, Error)]
pub enum SubjectError {
    /// The entry carries no friendly name.
    #[error("no friendly name")]
    MissingFriendlyName,

    /// The entry carries no SHA-256 fingerprint.
    #[error("no sha256 fingerprint")]
    MissingSha256Fingerprint,

    /// The entry's subject identifier is empty.
    #[error("no sha1 fingerprint")]
    MissingSha1Fingerprint,

    /// An extended key usage attribute held something other than a DER
    /// sequence of OIDs.
    #[error("invalid attribute value for key usage attribute")]
    KeyUsage(#[source] der::Error),
}

/// Describes a participant in the Microsoft trusted root program.
///
/// Note that a `Subject` does not contain the root certificate itself, but
/// instead provides information as to how the certificate could be used. A
/// subject may be distrusted or expired.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Subject {
    /// A friendly name for this subject. This may differ from the subject
    /// name of the certificate.
    pub friendly_name: String,

    /// The SHA-256 fingerprint of the certificate in uppercase hex.
    pub sha256_fingerprint: String,

    /// The SHA-1 fingerprint of the certificate in uppercase hex.
    pub sha1_fingerprint: String,

    /// An MD5 hash of the certificate's subject name in uppercase hex. Note
    /// that this is NOT a hash of the certificate.
    pub subject_name_md5: String,

    /// The key ID of the certificate in uppercase hex.
    pub key_id: String,

    /// Key usages accepted for this subject, as a bitmask of `EKU_*` bits.
    /// These typically aren't present on the certificate itself.
    pub microsoft_extended_key_usage: u16,

    /// If this subject has been distrusted by Microsoft then this field
    /// contains the date of when that occurred.
    pub disabled_date: Option<DateTime<Utc>>,

    /// An optional date used to restrict certificates under this subject
    /// after the given date.
    pub not_before: Option<DateTime<Utc>>,

    /// If a value is present in `not_before` then this field may contain
    /// key usages that further restrict the use of certificates under this
    /// subject, as a bitmask of `EKU_*` bits.
    pub not_before_eku: u16,
}

impl TryFrom<&TrustedSubject> for Subject {
    type Error = SubjectError;

    fn try_from(entry: &TrustedSubject) -> Result<Self, SubjectError> {
        let mut subject = Subject {
            sha1_fingerprint: hex::encode_upper(entry.cert_id()),
            ..Subject::default()
        };

        for attribute in entry.attributes.iter().flat_map(|attrs| attrs.iter()) {
            apply_attribute(&mut subject, attribute)?;
        }

        if subject.friendly_name.is_empty() {
            return Err(SubjectError::MissingFriendlyName);
        }
        if subject.sha256_fingerprint.is_empty() {
            return Err(SubjectError::MissingSha256Fingerprint);
        }
        if subject.sha1_fingerprint.is_empty() {
            return Err(SubjectError::MissingSha1Fingerprint);
        }

        Ok(subject)
    }
}

/// Dispatch one OID-tagged attribute into the record being built.
///
/// Only the first value of each attribute is meaningful; Windows never emits
/// more than one.
fn apply_attribute(subject: &mut Subject, attribute: &Attribute) -> Result<(), SubjectError> {
    let Some(value) = attribute.values.iter().next() else {
        return Ok(());
    };

    if attribute.oid == MS_CERT_PROP_ID_FRIENDLY_NAME_OID {
        if let Some(octets) = value_octets(value) {
            subject.friendly_name = decode_utf16_le(octets);
        }
    } else if attribute.oid == MS_CERT_PROP_ID_KEY_IDENTIFIER_OID {
        if let Some(octets) = value_octets(value) {
            subject.key_id = hex::encode_upper(octets);
        }
    } else if attribute.oid == MS_CERT_PROP_ID_SUBJECT_NAME_MD5_OID {
        if let Some(octets) = value_octets(value) {
            subject.subject_name_md5 = hex::encode_upper(octets);
        }
    } else if attribute.oid == MS_CERT_PROP_ID_SHA256_HASH_OID {
        if let Some(octets) = value_octets(value) {
            subject.sha256_fingerprint = hex::encode_upper(octets);
        }
    } else if attribute.oid == MS_CERT_PROP_ID_METAEKUS_OID {
        subject.microsoft_extended_key_usage |= decode_eku_mask(value)?;
    } else if attribute.oid == MS_CERT_PROP_ID_NOT_BEFORE_EKUS_OID {
        subject.not_before_eku |= decode_eku_mask(value)?;
    } else if attribute.oid == MS_CERT_PROP_ID_DISABLED_DATE_OID {
        if let Some(date) = decode_filetime(value) {
            subject.disabled_date = Some(date);
        }
    } else if attribute.oid == MS_CERT_PROP_ID_NOT_BEFORE_DATE_OID {
        if let Some(date) = decode_filetime(value) {
            subject.not_before = Some(date);
        }
    } else {
        log::debug!("ignoring unknown subject attribute {}", attribute.oid);
    }

    Ok(())
}

/// The contents of an attribute value, provided it is an OCTET STRING.
fn value_octets(value: &Any) -> Option<&[u8]> {
    (value.tag() == Tag::OctetString).then(|| value.value())
}

/// Decode an EKU attribute value (an OCTET STRING wrapping a `MetaEku`)
/// into its bitmask. OIDs outside the recognized set are skipped.
fn decode_eku_mask(value: &Any) -> Result<u16, SubjectError> {
    let octets = value
        .decode_as::<OctetStringRef<'_>>()
        .map_err(SubjectError::KeyUsage)?;
    let ekus = MetaEku::from_der(octets.as_bytes()).map_err(SubjectError::KeyUsage)?;

    let mut mask = 0;
    for eku in &ekus {
        match eku_bit(eku) {
            Some(bit) => mask |= bit,
            None => log::debug!("unknown extended key usage OID {eku}"),
        }
    }

    Ok(mask)
}

fn eku_bit(oid: &ObjectIdentifier) -> Option<u16> {
    EKU_BITS
        .iter()
        .find(|(known, _)| known == oid)
        .map(|(_, bit)| *bit)
}

fn decode_filetime(value: &Any) -> Option<DateTime<Utc>> {
    let octets = value_octets(value)?;
    let decoded = filetime_to_datetime(octets);
    if decoded.is_none() {
        log::debug!("ignoring FILETIME attribute of {} bytes", octets.len());
    }
    decoded
}

/// Decode a Windows FILETIME: a little-endian 64-bit count of 100-ns
/// intervals since 1601-01-01 UTC. Anything that isn't exactly 8 bytes, or
/// that lands outside the nanosecond-representable range, yields `None`.
fn filetime_to_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    let raw: [u8; 8] = raw.try_into().ok()?;
    let intervals = u64::from_le_bytes(raw);

    let nanos = (i128::from(intervals) - FILETIME_UNIX_EPOCH) * 100;
    let nanos = i64::try_from(nanos).ok()?;

    Some(DateTime::from_timestamp_nanos(nanos))
}

/// Decode UTF-16LE code units, stripping the trailing NUL terminator when
/// present. Malformed surrogate halves become U+FFFD.
fn decode_utf16_le(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    if units.last() == Some(&0) {
        units.pop();
    }

    String::from_utf16_lossy(&units)
}
