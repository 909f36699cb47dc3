//! Cryptographic authentication of the trust list's PKCS#7 envelope.
//!
//! The envelope's single signer is resolved to a certificate embedded in the
//! envelope itself, its chain is validated against the pinned CA certificate
//! compiled into the crate, and its RSA signature is checked over the
//! canonical re-encoding of the authenticated attributes.

use std::sync::LazyLock;
use std::time::Duration;

use cms::cert::CertificateChoices;
use cms::signed_data::{SignedAttributes, SignedData, SignerIdentifier, SignerInfo};
use const_oid::db::{rfc5912, rfc6268};
use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::{Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::CtlError;

/// DER bytes of the CA certificate anchoring the trust list's signing chain.
///
/// Swapping this certificate is a release event: the crate ships its trust
/// anchor rather than consulting any OS store.
static CA_CERT_DER: &[u8] = include_bytes!("ca.der");

/// The pinned trust anchor, decoded once. Malformed embedded bytes mean the
/// build itself is broken, so this aborts rather than returning an error.
static PINNED_ROOT: LazyLock<Certificate> = LazyLock::new(|| {
    Certificate::from_der(CA_CERT_DER).expect("embedded CA certificate is malformed")
});

/// How far inside the leaf's validity window the chain is evaluated.
const CHAIN_SKEW: Duration = Duration::from_secs(86_400);

/// Possible failures while building the signing chain to the pinned root.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No embedded certificate or pinned root matches an issuer name.
    #[error("no issuer certificate for {0}")]
    IssuerNotFound(String),

    /// A chain certificate is not valid at the verification time.
    #[error("certificate {0} outside its validity window")]
    Expired(String),

    /// An issuer's public key could not be read.
    #[error("bad public key on {0}")]
    Key(String),

    /// An issuer's signature over a chain certificate does not verify.
    #[error("bad signature on {0}")]
    Signature(String),

    /// A chain certificate is signed with something other than
    /// sha256WithRSAEncryption.
    #[error("unsupported signature algorithm {0}")]
    Algorithm(ObjectIdentifier),

    /// Issuer resolution looped without reaching the pinned root.
    #[error("maximum chain depth exceeded")]
    DepthExceeded,
}

/// Authenticate the envelope and return the signing chain, leaf first and
/// pinned root last.
pub(crate) fn verify_signed_data(signed_data: &SignedData) -> Result<Vec<Certificate>, CtlError> {
    let certificates = embedded_certificates(signed_data)?;

    let content = signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .ok_or(CtlError::MissingSignedDataContent)?;

    let signers = &signed_data.signer_infos.0;
    if signers.len() != 1 {
        return Err(CtlError::SignerCount(signers.len()));
    }
    let signer = &signers.as_slice()[0];

    // The digest is computed over the content octets of the encapsulated
    // value, not its full tag-length-value encoding.
    verify_signature(content.value(), &certificates, signer)
}

/// The trust list's release time must fall inside the signing certificate's
/// own validity window, independently of the chain clock used above.
pub(crate) fn check_update_window(this_update: Time, leaf: &Certificate) -> Result<(), CtlError> {
    let validity = &leaf.tbs_certificate.validity;
    let at = this_update.to_unix_duration();

    if at < validity.not_before.to_unix_duration() || at > validity.not_after.to_unix_duration() {
        return Err(CtlError::ThisUpdate {
            this_update: time_string(&this_update),
            not_before: time_string(&validity.not_before),
            not_after: time_string(&validity.not_after),
        });
    }

    Ok(())
}

fn embedded_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>, CtlError> {
    let Some(certificates) = &signed_data.certificates else {
        return Err(CtlError::MissingCertificates);
    };

    Ok(certificates
        .0
        .iter()
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(certificate) => Some(certificate.clone()),
            _ => None,
        })
        .collect())
}

fn verify_signature(
    content: &[u8],
    certificates: &[Certificate],
    signer: &SignerInfo,
) -> Result<Vec<Certificate>, CtlError> {
    let SignerIdentifier::IssuerAndSerialNumber(ias) = &signer.sid else {
        return Err(CtlError::SignerNotFound);
    };
    let leaf = certificates
        .iter()
        .find(|certificate| {
            certificate.tbs_certificate.serial_number == ias.serial_number
                && certificate.tbs_certificate.issuer == ias.issuer
        })
        .ok_or(CtlError::SignerNotFound)?;

    let signed_attrs = match &signer.signed_attrs {
        Some(attrs) if !attrs.is_empty() => attrs,
        _ => return Err(CtlError::NoAuthenticatedAttributes),
    };

    let expected = message_digest(signed_attrs)?;
    let computed = Sha256::digest(content);
    if !bool::from(expected.as_slice().ct_eq(computed.as_slice())) {
        return Err(CtlError::DigestMismatch);
    }

    // The signature covers the attributes re-encoded as a plain SET OF, not
    // the IMPLICIT [0] bytes that appear on the wire.
    let message = signed_attrs.to_der()?;

    let chain = build_chain(leaf, certificates)?;

    let spki = leaf.tbs_certificate.subject_public_key_info.to_der()?;
    let key = RsaPublicKey::from_public_key_der(&spki).map_err(CtlError::SignerKey)?;
    key.verify(
        Pkcs1v15Sign::new::<Sha256>(),
        &Sha256::digest(&message),
        signer.signature.as_bytes(),
    )
    .map_err(CtlError::Signature)?;

    Ok(chain)
}

/// Pull the SHA-256 digest out of the message-digest authenticated attribute.
fn message_digest(signed_attrs: &SignedAttributes) -> Result<Vec<u8>, CtlError> {
    let attribute = signed_attrs
        .iter()
        .find(|attribute| attribute.oid == rfc6268::ID_MESSAGE_DIGEST)
        .ok_or(CtlError::MissingDigestAttribute)?;
    let value = attribute
        .values
        .iter()
        .next()
        .ok_or(CtlError::MissingDigestAttribute)?;

    Ok(value.decode_as::<OctetStringRef<'_>>()?.as_bytes().to_vec())
}

/// Build and verify the path from the leaf to the pinned root.
///
/// Microsoft ships CTLs whose signing certificate has already expired, and
/// `certutil.exe` still accepts them. The chain is therefore evaluated one
/// day inside the end of the leaf's validity window, never at the wall
/// clock.
fn build_chain(leaf: &Certificate, pool: &[Certificate]) -> Result<Vec<Certificate>, CtlError> {
    let root = &*PINNED_ROOT;

    let not_after = leaf.tbs_certificate.validity.not_after.to_unix_duration();
    let at = not_after.checked_sub(CHAIN_SKEW).unwrap_or(Duration::ZERO);

    check_validity(leaf, at)?;

    let mut chain = vec![leaf.clone()];
    let mut current = leaf.clone();
    for _ in 0..=pool.len() {
        if current.tbs_certificate.issuer == root.tbs_certificate.subject {
            check_validity(root, at)?;
            verify_issued(root, &current)?;
            chain.push(root.clone());
            return Ok(chain);
        }

        let issuer = pool
            .iter()
            .find(|candidate| {
                candidate.tbs_certificate.subject == current.tbs_certificate.issuer
                    && !chain.iter().any(|seen| seen == *candidate)
            })
            .ok_or_else(|| ChainError::IssuerNotFound(current.tbs_certificate.issuer.to_string()))?;

        check_validity(issuer, at)?;
        verify_issued(issuer, &current)?;
        chain.push(issuer.clone());
        current = issuer.clone();
    }

    Err(ChainError::DepthExceeded.into())
}

fn check_validity(certificate: &Certificate, at: Duration) -> Result<(), ChainError> {
    let validity = &certificate.tbs_certificate.validity;
    if at < validity.not_before.to_unix_duration() || at > validity.not_after.to_unix_duration() {
        return Err(ChainError::Expired(
            certificate.tbs_certificate.subject.to_string(),
        ));
    }
    Ok(())
}

/// Check the issuer's RSA signature over `certificate`'s TBS bytes.
fn verify_issued(issuer: &Certificate, certificate: &Certificate) -> Result<(), CtlError> {
    if certificate.signature_algorithm.oid != rfc5912::SHA_256_WITH_RSA_ENCRYPTION {
        return Err(ChainError::Algorithm(certificate.signature_algorithm.oid).into());
    }

    let tbs = certificate.tbs_certificate.to_der()?;
    let spki = issuer.tbs_certificate.subject_public_key_info.to_der()?;
    let key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|_| ChainError::Key(issuer.tbs_certificate.subject.to_string()))?;

    key.verify(
        Pkcs1v15Sign::new::<Sha256>(),
        &Sha256::digest(&tbs),
        certificate.signature.raw_bytes(),
    )
    .map_err(|_| ChainError::Signature(certificate.tbs_certificate.subject.to_string()))?;

    Ok(())
}

fn time_string(time: &Time) -> String {
    match time {
        Time::UtcTime(t) => t.to_date_time().to_string(),
        Time::GeneralTime(t) => t.to_date_time().to_string(),
    }
}
