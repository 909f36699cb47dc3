//! A crate for parsing and validating Microsoft's `authroot.stl` file.
//!
//! `authroot.stl` is the signed Certificate Trust List (CTL) that Windows
//! downloads to bootstrap its root certificate store. Every entry names a
//! root CA participating in the Microsoft Trusted Root Program, along with
//! metadata restricting how that root may be used: permitted extended key
//! usages, a disablement date, an activation date, and EKU restrictions
//! that apply after activation.
//!
//! [`parse`] decodes the PKCS#7 envelope, authenticates it against a pinned
//! CA certificate compiled into the crate, and returns one [`Subject`] per
//! trusted root. The raw, unauthenticated ASN.1 layer is also exposed as
//! [`CertificateTrustList`] for callers that want the undecoded entries.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]
#![allow(clippy::redundant_field_names)]
#![forbid(unsafe_code)]

mod ctl;
mod subject;
mod verify;

use std::io::Read;
use std::path::Path;

use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use const_oid::db::rfc6268;
use der::asn1::ObjectIdentifier;
use der::Decode;
use thiserror::Error;

pub use crate::ctl::{
    CertificateTrustList, CtlVersion, ListIdentifier, MetaEku, SubjectIdentifier, SubjectUsage,
    TrustedSubject, TrustedSubjects,
};
pub use crate::subject::{
    Subject, SubjectError, EKU_CLIENT_AUTHENTICATION, EKU_CODE_SIGNING, EKU_DOCUMENT_SIGNING,
    EKU_ENCRYPTING_FILE_SYSTEM, EKU_IPSEC_END_SYSTEM, EKU_IPSEC_IKE_INTERMEDIATE,
    EKU_IPSEC_TUNNEL_TERMINATION, EKU_IPSEC_USER, EKU_OCSP_SIGNING, EKU_SECURE_EMAIL,
    EKU_SERVER_AUTHENTICATION, EKU_TIME_STAMPING, MS_CERT_PROP_ID_DISABLED_DATE_OID,
    MS_CERT_PROP_ID_FRIENDLY_NAME_OID, MS_CERT_PROP_ID_KEY_IDENTIFIER_OID,
    MS_CERT_PROP_ID_METAEKUS_OID, MS_CERT_PROP_ID_NOT_BEFORE_DATE_OID,
    MS_CERT_PROP_ID_NOT_BEFORE_EKUS_OID, MS_CERT_PROP_ID_SHA256_HASH_OID,
    MS_CERT_PROP_ID_SUBJECT_NAME_MD5_OID,
};
pub use crate::verify::ChainError;

/// The object identifier for [`CertificateTrustList`].
pub const MS_CERT_TRUST_LIST_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.10.1");

/// Possible errors while parsing and validating a certificate trust list.
#[derive(Debug, Error)]
pub enum CtlError {
    /// I/O errors.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid DER, including trailing data after a top-level element.
    #[error("bad DER encoding")]
    Der(#[from] der::Error),

    /// Valid PKCS#7, but the wrong `content-type`.
    #[error("bad PKCS#7 content-type: expected SignedData, got {0}")]
    ContentType(ObjectIdentifier),

    /// Valid PKCS#7 with `signed-data`, but not a `CertificateTrustList`.
    #[error("bad SignedData content-type: expected {MS_CERT_TRUST_LIST_OID}, got {0}")]
    Content(ObjectIdentifier),

    /// Valid PKCS#7 that claims to have a `CertificateTrustList`, but not present.
    #[error("missing SignedData inner content")]
    MissingSignedDataContent,

    /// The envelope carries no certificates, so the signer cannot be recovered.
    #[error("missing SignedData certificates")]
    MissingCertificates,

    /// The envelope must carry exactly one signer.
    #[error("expected exactly one SignerInfo, got {0}")]
    SignerCount(usize),

    /// No embedded certificate matches the signer's issuer and serial number.
    #[error("no certificate for signer")]
    SignerNotFound,

    /// The signer carries no authenticated attributes.
    #[error("no authenticated attributes")]
    NoAuthenticatedAttributes,

    /// The authenticated attributes carry no message-digest attribute.
    #[error("no message-digest attribute")]
    MissingDigestAttribute,

    /// The message-digest attribute does not match the trust list content.
    #[error("message digest does not match content")]
    DigestMismatch,

    /// The signer's public key could not be read.
    #[error("bad signer public key")]
    SignerKey(#[source] spki::Error),

    /// The signing chain could not be validated against the pinned root.
    #[error("failed to verify certificate chain: {0}")]
    Chain(#[from] ChainError),

    /// The signature over the authenticated attributes is invalid.
    #[error("signature verification failed")]
    Signature(#[source] rsa::Error),

    /// The trust list's release time falls outside the signing certificate's
    /// validity window.
    #[error("thisUpdate {this_update} outside signer validity {not_before} to {not_after}")]
    ThisUpdate {
        /// When the CTL claims to have been released.
        this_update: String,
        /// Start of the signing certificate's validity window.
        not_before: String,
        /// End of the signing certificate's validity window.
        not_after: String,
    },

    /// A trusted subject could not be decoded.
    #[error("subject {index}: {source}")]
    Subject {
        /// Position of the offending entry within the trust list.
        index: usize,
        /// What went wrong while decoding it.
        #[source]
        source: SubjectError,
    },
}

/// Parse and validate an `authroot.stl` file from the given bytes.
///
/// The input must be a DER-encoded PKCS#7 `SignedData` whose encapsulated
/// content is a Microsoft certificate trust list. The envelope's signature
/// is authenticated against the CA certificate compiled into this crate
/// before any subject is decoded; on success the subjects are returned in
/// the order they appear in the list.
pub fn parse(data: &[u8]) -> Result<Vec<Subject>, CtlError> {
    let signed_data = decode_envelope(data)?;

    // Authenticate before decoding: the chain's leaf also bounds the
    // trust list's release time below.
    let chain = verify::verify_signed_data(&signed_data)?;

    let content = signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .ok_or(CtlError::MissingSignedDataContent)?;
    let ctl: CertificateTrustList = content.decode_as()?;

    verify::check_update_window(ctl.this_update, &chain[0])?;

    let mut subjects = Vec::new();
    for (index, entry) in ctl.trusted_subjects.iter().flatten().enumerate() {
        let subject = Subject::try_from(entry)
            .map_err(|source| CtlError::Subject { index, source })?;
        subjects.push(subject);
    }

    Ok(subjects)
}

/// Parse and validate an `authroot.stl` file at the given path.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Subject>, CtlError> {
    parse(&std::fs::read(path)?)
}

/// Parse and validate `authroot.stl` data from the given reader.
pub fn parse_reader<R: Read>(mut reader: R) -> Result<Vec<Subject>, CtlError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    parse(&data)
}

/// Parse and validate an `authroot.stl` file out of the
/// [Cabinet Format](https://learn.microsoft.com/en-us/windows/win32/msi/cabinet-files)
/// archive Microsoft distributes it in.
///
/// The STL is expected at `authroot.stl` inside the cabinet, and nowhere else.
#[cfg(feature = "cab")]
pub fn parse_cab<R: Read + std::io::Seek>(source: R) -> Result<Vec<Subject>, CtlError> {
    let mut cabinet = cab::Cabinet::new(source)?;
    let mut data = Vec::new();
    cabinet.read_file("authroot.stl")?.read_to_end(&mut data)?;
    parse(&data)
}

/// Decode the two outer layers of the envelope: `ContentInfo`, then the
/// `SignedData` it wraps. Checks content types on the way down but performs
/// no authentication.
pub(crate) fn decode_envelope(data: &[u8]) -> Result<SignedData, CtlError> {
    let body = ContentInfo::from_der(data)?;
    if body.content_type != rfc6268::ID_SIGNED_DATA {
        return Err(CtlError::ContentType(body.content_type));
    }

    let signed_data: SignedData = body.content.decode_as()?;

    // Our actual SignedData content should be a MS-specific `certTrustList`.
    if signed_data.encap_content_info.econtent_type != MS_CERT_TRUST_LIST_OID {
        return Err(CtlError::Content(
            signed_data.encap_content_info.econtent_type,
        ));
    }

    Ok(signed_data)
}
