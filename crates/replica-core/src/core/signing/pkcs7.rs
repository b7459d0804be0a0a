//! Detached PKCS#7 SignedData for JAR signature block files.

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use der::asn1::{Null, ObjectIdentifier, OctetString, SetOfVec};
use der::{Any, Decode, Encode};
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use super::keys::{SignatureAlgorithm, ID_SHA256};
use super::{Credential, SigningError};

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// Signs `content` and wraps the signature with the signer's certificate.
/// No signed attributes are emitted, so the signature covers `content` itself.
pub(crate) fn sign_detached(content: &[u8], credential: &Credential) -> Result<Vec<u8>, SigningError> {
    let certificate = Certificate::from_der(credential.certificate_der())?;
    let algorithm = credential.key().algorithm();
    let signature = credential.key().sign(content)?;

    let signature_params = match algorithm {
        SignatureAlgorithm::RsaPkcs1v15Sha256 => Some(Any::encode_from(&Null)?),
        SignatureAlgorithm::EcdsaSha256 => None,
    };
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    };
    let signer = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: certificate.tbs_certificate.issuer.clone(),
            serial_number: certificate.tbs_certificate.serial_number.clone(),
        }),
        digest_alg: digest_algorithm.clone(),
        signed_attrs: None,
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: algorithm.cms_oid(),
            parameters: signature_params,
        },
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };
    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![digest_algorithm])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(vec![
            CertificateChoices::Certificate(certificate),
        ])?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer])?),
    };
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };
    Ok(content_info.to_der()?)
}

/// Checks a detached signature block against `content`. Returns the DER of
/// the signing certificate on success.
pub(crate) fn verify_detached(block: &[u8], content: &[u8]) -> Result<Vec<u8>, String> {
    let content_info =
        ContentInfo::from_der(block).map_err(|err| format!("signature block is not PKCS#7: {err}"))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err("signature block does not hold SignedData".to_string());
    }
    let encoded = content_info
        .content
        .to_der()
        .map_err(|err| format!("signature block is not PKCS#7: {err}"))?;
    let signed_data =
        SignedData::from_der(&encoded).map_err(|err| format!("malformed SignedData: {err}"))?;
    let signer = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| "signature block has no signer".to_string())?;
    if signer.signed_attrs.is_some() {
        return Err("signed attributes are not supported".to_string());
    }
    let SignerIdentifier::IssuerAndSerialNumber(sid) = &signer.sid else {
        return Err("signer is not identified by issuer and serial number".to_string());
    };
    let algorithm = SignatureAlgorithm::from_cms_oid(&signer.signature_algorithm.oid)
        .ok_or_else(|| format!("unsupported signature algorithm {}", signer.signature_algorithm.oid))?;

    let certificates = signed_data
        .certificates
        .as_ref()
        .ok_or_else(|| "signature block carries no certificate".to_string())?;
    let certificate = certificates
        .0
        .iter()
        .find_map(|choice| match choice {
            CertificateChoices::Certificate(cert)
                if cert.tbs_certificate.issuer == sid.issuer
                    && cert.tbs_certificate.serial_number == sid.serial_number =>
            {
                Some(cert)
            }
            _ => None,
        })
        .ok_or_else(|| "signer certificate is missing".to_string())?;
    let public_key = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|err| format!("invalid certificate key: {err}"))?;
    algorithm.verify(&public_key, content, signer.signature.as_bytes())?;
    certificate
        .to_der()
        .map_err(|err| format!("invalid certificate: {err}"))
}
