//! CMS SignedData envelope for the login ticket request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use der::{Any, Encode, Tag};
use rsa::signature::{Keypair, Signer};
use sha2::Sha256;
use x509_cert::Certificate;
use x509_cert::spki::{
    AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, EncodePublicKey,
    SignatureBitStringEncoding,
};

use crate::credential::CredentialBundle;
use crate::error::SignError;
use crate::key::KeyPair;

/// Signs `tra_xml` with the bundle's key and returns the DER-encoded
/// `ContentInfo(SignedData)` as unwrapped base64.
///
/// The TRA is embedded in the envelope, the digest is SHA-256 and the signing
/// certificate is attached. Failures are configuration faults and must not be
/// retried.
pub fn sign(tra_xml: &[u8], bundle: &CredentialBundle) -> Result<String, SignError> {
    let content = EncapsulatedContentInfo {
        econtent_type: const_oid::db::rfc5911::ID_DATA,
        econtent: Some(
            Any::new(Tag::OctetString, tra_xml)
                .map_err(|e| SignError::SigningFailed(e.to_string()))?,
        ),
    };

    let content_info = match bundle.key() {
        KeyPair::Rsa { private, .. } => {
            let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private.as_ref().clone());
            build_signed_data::<_, rsa::pkcs1v15::Signature>(
                &signer,
                &content,
                bundle.certificate(),
            )?
        }
        KeyPair::EcdsaP256 { signing_key, .. } => {
            build_signed_data::<_, p256::ecdsa::DerSignature>(
                signing_key,
                &content,
                bundle.certificate(),
            )?
        }
    };

    let der = content_info
        .to_der()
        .map_err(|e| SignError::SigningFailed(e.to_string()))?;
    Ok(STANDARD.encode(der))
}

fn build_signed_data<S, Sig>(
    signer: &S,
    content: &EncapsulatedContentInfo,
    certificate: &Certificate,
) -> Result<ContentInfo, SignError>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc5912::ID_SHA_256,
        parameters: None,
    };
    let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: certificate.tbs_certificate.issuer.clone(),
        serial_number: certificate.tbs_certificate.serial_number.clone(),
    });

    let signer_info = SignerInfoBuilder::new(signer, sid, digest_algorithm.clone(), content, None)
        .map_err(|e| SignError::SigningFailed(e.to_string()))?;

    let failed = |e: cms::builder::Error| SignError::SigningFailed(e.to_string());
    let mut builder = SignedDataBuilder::new(content);
    builder.add_digest_algorithm(digest_algorithm).map_err(failed)?;
    builder
        .add_certificate(CertificateChoices::Certificate(certificate.clone()))
        .map_err(failed)?;
    builder
        .add_signer_info::<S, Sig>(signer_info)
        .map_err(failed)?;
    builder.build().map_err(failed)
}
