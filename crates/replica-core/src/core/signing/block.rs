//! APK Signing Block: v2 and v3 signer records over the chunked content digest.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use super::keys::SignatureAlgorithm;
use super::{Credential, SigningError};

pub(crate) const BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
pub(crate) const V2_BLOCK_ID: u32 = 0x7109_871a;
pub(crate) const V3_BLOCK_ID: u32 = 0xf053_68c0;
/// v2 signed-data attribute telling verifiers a v3 block must be present.
pub(crate) const STRIPPING_PROTECTION_ID: u32 = 0xbeef_f00d;
const STRIPPING_PROTECTION_V3: u32 = 3;

pub(crate) const V3_MIN_SDK: u32 = 28;
pub(crate) const V3_MAX_SDK: u32 = 0x7fff_ffff;

const CHUNK_SIZE: usize = 1024 * 1024;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_MIN_SIZE: usize = 22;
const EOCD_CD_OFFSET: usize = 16;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_SIZE: usize = 46;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_SIZE: usize = 30;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const DATA_DESCRIPTOR_FLAG: u16 = 0x0008;
/// Trailing size field plus magic; the smallest value a block's size can hold.
const BLOCK_FOOTER_SIZE: usize = 8 + BLOCK_MAGIC.len();

/// Offsets of the regions a signing block sits between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ZipSections {
    /// End of the entry data; start of the signing block when one exists.
    pub(crate) entries_end: usize,
    pub(crate) cd_offset: usize,
    pub(crate) eocd_offset: usize,
}

impl ZipSections {
    pub(crate) fn locate(bytes: &[u8]) -> Result<Self, SigningError> {
        let malformed = |reason: &str| SigningError::MalformedContainer(reason.to_string());
        if bytes.len() < EOCD_MIN_SIZE {
            return Err(malformed("too short to hold an end of central directory"));
        }
        if u32::try_from(bytes.len()).is_err() {
            return Err(SigningError::TooLarge);
        }
        let earliest = bytes.len().saturating_sub(EOCD_MIN_SIZE + usize::from(u16::MAX));
        let eocd_offset = (earliest..=bytes.len() - EOCD_MIN_SIZE)
            .rev()
            .find(|&offset| {
                let record = &bytes[offset..];
                read_u32(record, 0) == Some(EOCD_SIGNATURE)
                    && read_u16(record, 20)
                        .is_some_and(|comment| offset + EOCD_MIN_SIZE + usize::from(comment) == bytes.len())
            })
            .ok_or_else(|| malformed("end of central directory not found"))?;

        let cd_size = read_u32(bytes, eocd_offset + 12).unwrap_or_default() as usize;
        let cd_offset = read_u32(bytes, eocd_offset + EOCD_CD_OFFSET).unwrap_or_default() as usize;
        if cd_offset + cd_size != eocd_offset {
            return Err(malformed("central directory does not end at the end record"));
        }
        // A block only counts when it fills the gap between the last entry
        // and the central directory; entry data that merely ends in a
        // block-shaped footer stays entry data.
        let entries_end = match existing_block(bytes, cd_offset) {
            Some(block)
                if last_entry_end(bytes, cd_offset, cd_size) == Some(block.start)
                    && block_pairs(block.pairs).is_ok() =>
            {
                block.start
            }
            _ => cd_offset,
        };
        Ok(Self {
            entries_end,
            cd_offset,
            eocd_offset,
        })
    }

    /// The signing block accepted by [`ZipSections::locate`], if any.
    pub(crate) fn signing_block<'a>(&self, bytes: &'a [u8]) -> Option<BlockExtent<'a>> {
        if self.entries_end == self.cd_offset {
            return None;
        }
        existing_block(bytes, self.cd_offset)
    }
}

/// Offset just past the data of the entry stored last in the file, read
/// from the central directory. `None` when a record is malformed.
fn last_entry_end(bytes: &[u8], cd_offset: usize, cd_size: usize) -> Option<usize> {
    let directory = bytes.get(cd_offset..cd_offset.checked_add(cd_size)?)?;
    let mut end = 0;
    let mut at = 0;
    while at < directory.len() {
        if read_u32(directory, at)? != CENTRAL_HEADER_SIGNATURE {
            return None;
        }
        let compressed = read_u32(directory, at + 20)? as usize;
        let name_len = usize::from(read_u16(directory, at + 28)?);
        let extra_len = usize::from(read_u16(directory, at + 30)?);
        let comment_len = usize::from(read_u16(directory, at + 32)?);
        let local_offset = read_u32(directory, at + 42)? as usize;
        end = end.max(local_entry_end(bytes, local_offset, compressed)?);
        at += CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
    }
    Some(end)
}

fn local_entry_end(bytes: &[u8], offset: usize, compressed: usize) -> Option<usize> {
    if read_u32(bytes, offset)? != LOCAL_HEADER_SIGNATURE {
        return None;
    }
    let flags = read_u16(bytes, offset + 6)?;
    let name_len = usize::from(read_u16(bytes, offset + 26)?);
    let extra_len = usize::from(read_u16(bytes, offset + 28)?);
    let data_end = offset
        .checked_add(LOCAL_HEADER_SIZE + name_len + extra_len)?
        .checked_add(compressed)?;
    if flags & DATA_DESCRIPTOR_FLAG == 0 {
        Some(data_end)
    } else if read_u32(bytes, data_end) == Some(DATA_DESCRIPTOR_SIGNATURE) {
        data_end.checked_add(16)
    } else {
        data_end.checked_add(12)
    }
}

/// Extent and payload of a signing block already present in a container.
pub(crate) struct BlockExtent<'a> {
    pub(crate) start: usize,
    /// The id-value pairs between the two size fields.
    pub(crate) pairs: &'a [u8],
}

pub(crate) fn existing_block(bytes: &[u8], cd_offset: usize) -> Option<BlockExtent<'_>> {
    if cd_offset < BLOCK_FOOTER_SIZE || cd_offset > bytes.len() {
        return None;
    }
    if bytes[cd_offset - 16..cd_offset] != BLOCK_MAGIC[..] {
        return None;
    }
    let size = usize::try_from(read_u64(bytes, cd_offset - BLOCK_FOOTER_SIZE)?).ok()?;
    if size < BLOCK_FOOTER_SIZE {
        return None;
    }
    let start = cd_offset.checked_sub(size.checked_add(8)?)?;
    if read_u64(bytes, start)? != size as u64 {
        return None;
    }
    Some(BlockExtent {
        start,
        pairs: bytes.get(start + 8..cd_offset - BLOCK_FOOTER_SIZE)?,
    })
}

/// Iterates `(id, value)` pairs of a signing block.
pub(crate) fn block_pairs(mut pairs: &[u8]) -> Result<Vec<(u32, &[u8])>, String> {
    let mut out = Vec::new();
    while !pairs.is_empty() {
        let len = pairs
            .read_u64::<LittleEndian>()
            .map_err(|_| "truncated signing block pair".to_string())?;
        let len = usize::try_from(len).map_err(|_| "oversized signing block pair".to_string())?;
        if len < 4 || len > pairs.len() {
            return Err("signing block pair length out of range".to_string());
        }
        let (pair, rest) = pairs.split_at(len);
        let id = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
        out.push((id, &pair[4..]));
        pairs = rest;
    }
    Ok(out)
}

/// Chunked SHA-256 content digest over entries, central directory and end
/// record, with the end record's directory offset pointing at `entries_end`.
pub(crate) fn content_digest(bytes: &[u8], sections: &ZipSections) -> [u8; 32] {
    let mut eocd = bytes[sections.eocd_offset..].to_vec();
    let offset = u32::try_from(sections.entries_end).unwrap_or(u32::MAX).to_le_bytes();
    eocd[EOCD_CD_OFFSET..EOCD_CD_OFFSET + 4].copy_from_slice(&offset);

    let regions: [&[u8]; 3] = [
        &bytes[..sections.entries_end],
        &bytes[sections.cd_offset..sections.eocd_offset],
        &eocd,
    ];
    let mut chunk_digests = Vec::new();
    for region in regions {
        for chunk in region.chunks(CHUNK_SIZE) {
            let mut hasher = Sha256::new();
            hasher.update([0xa5u8]);
            hasher.update((chunk.len() as u32).to_le_bytes());
            hasher.update(chunk);
            chunk_digests.push(hasher.finalize());
        }
    }
    let mut hasher = Sha256::new();
    hasher.update([0x5au8]);
    hasher.update((chunk_digests.len() as u32).to_le_bytes());
    for digest in &chunk_digests {
        hasher.update(digest);
    }
    hasher.finalize().into()
}

/// Which block scheme a signer record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockScheme {
    V2 { v3_also: bool },
    V3,
}

impl BlockScheme {
    pub(crate) fn id(self) -> u32 {
        match self {
            Self::V2 { .. } => V2_BLOCK_ID,
            Self::V3 => V3_BLOCK_ID,
        }
    }
}

/// Encodes one scheme's block value holding a single signer.
pub(crate) fn scheme_value(
    scheme: BlockScheme,
    digest: &[u8; 32],
    credential: &Credential,
) -> Result<Vec<u8>, SigningError> {
    let algorithm = credential.key().algorithm();

    let mut digests = Vec::new();
    let mut record = Vec::new();
    record.write_u32::<LittleEndian>(algorithm.id())?;
    put_prefixed(&mut record, digest)?;
    put_prefixed(&mut digests, &record)?;

    let mut certificates = Vec::new();
    put_prefixed(&mut certificates, credential.certificate_der())?;

    let mut attributes = Vec::new();
    if let BlockScheme::V2 { v3_also: true } = scheme {
        let mut attribute = Vec::new();
        attribute.write_u32::<LittleEndian>(STRIPPING_PROTECTION_ID)?;
        attribute.write_u32::<LittleEndian>(STRIPPING_PROTECTION_V3)?;
        put_prefixed(&mut attributes, &attribute)?;
    }

    let mut signed_data = Vec::new();
    put_prefixed(&mut signed_data, &digests)?;
    put_prefixed(&mut signed_data, &certificates)?;
    if scheme == BlockScheme::V3 {
        signed_data.write_u32::<LittleEndian>(V3_MIN_SDK)?;
        signed_data.write_u32::<LittleEndian>(V3_MAX_SDK)?;
    }
    put_prefixed(&mut signed_data, &attributes)?;

    let mut signature = Vec::new();
    signature.write_u32::<LittleEndian>(algorithm.id())?;
    put_prefixed(&mut signature, &credential.key().sign(&signed_data)?)?;
    let mut signatures = Vec::new();
    put_prefixed(&mut signatures, &signature)?;

    let mut signer = Vec::new();
    put_prefixed(&mut signer, &signed_data)?;
    if scheme == BlockScheme::V3 {
        signer.write_u32::<LittleEndian>(V3_MIN_SDK)?;
        signer.write_u32::<LittleEndian>(V3_MAX_SDK)?;
    }
    put_prefixed(&mut signer, &signatures)?;
    put_prefixed(&mut signer, credential.public_key_der())?;

    let mut signers = Vec::new();
    put_prefixed(&mut signers, &signer)?;
    let mut value = Vec::new();
    put_prefixed(&mut value, &signers)?;
    Ok(value)
}

/// Wraps `(id, value)` pairs into a complete signing block.
pub(crate) fn encode_block(pairs: &[(u32, Vec<u8>)]) -> Result<Vec<u8>, SigningError> {
    let body: usize = pairs.iter().map(|(_, value)| 8 + 4 + value.len()).sum();
    let size = (body + 8 + BLOCK_MAGIC.len()) as u64;
    let mut block = Vec::with_capacity(body + 32);
    block.write_u64::<LittleEndian>(size)?;
    for (id, value) in pairs {
        block.write_u64::<LittleEndian>((4 + value.len()) as u64)?;
        block.write_u32::<LittleEndian>(*id)?;
        block.extend_from_slice(value);
    }
    block.write_u64::<LittleEndian>(size)?;
    block.extend_from_slice(BLOCK_MAGIC);
    Ok(block)
}

/// Replaces any existing signing block in `bytes` with a freshly signed one.
pub(crate) fn insert_block(
    bytes: &[u8],
    credential: &Credential,
    v2: bool,
    v3: bool,
) -> Result<Vec<u8>, SigningError> {
    let sections = ZipSections::locate(bytes)?;
    let digest = content_digest(bytes, &sections);

    let mut pairs = Vec::new();
    if v2 {
        let scheme = BlockScheme::V2 { v3_also: v3 };
        pairs.push((scheme.id(), scheme_value(scheme, &digest, credential)?));
    }
    if v3 {
        pairs.push((V3_BLOCK_ID, scheme_value(BlockScheme::V3, &digest, credential)?));
    }
    let block = encode_block(&pairs)?;

    let new_cd_offset = sections.entries_end + block.len();
    let new_cd_offset = u32::try_from(new_cd_offset).map_err(|_| SigningError::TooLarge)?;
    let mut out = Vec::with_capacity(bytes.len() + block.len());
    out.extend_from_slice(&bytes[..sections.entries_end]);
    out.extend_from_slice(&block);
    out.extend_from_slice(&bytes[sections.cd_offset..sections.eocd_offset]);
    let eocd_start = out.len();
    out.extend_from_slice(&bytes[sections.eocd_offset..]);
    out[eocd_start + EOCD_CD_OFFSET..eocd_start + EOCD_CD_OFFSET + 4]
        .copy_from_slice(&new_cd_offset.to_le_bytes());
    Ok(out)
}

/// One signer record decoded from a v2 or v3 block value.
#[derive(Debug)]
pub(crate) struct SignerRecord<'a> {
    pub(crate) signed_data: &'a [u8],
    pub(crate) sdk_bounds: Option<(u32, u32)>,
    pub(crate) signatures: Vec<(u32, &'a [u8])>,
    pub(crate) public_key: &'a [u8],
}

/// Fields of a signer's signed data.
#[derive(Debug)]
pub(crate) struct SignedDataRecord<'a> {
    pub(crate) digests: Vec<(u32, &'a [u8])>,
    pub(crate) certificates: Vec<&'a [u8]>,
    pub(crate) sdk_bounds: Option<(u32, u32)>,
    pub(crate) attributes: Vec<(u32, &'a [u8])>,
}

pub(crate) fn parse_signers(value: &[u8], v3: bool) -> Result<Vec<SignerRecord<'_>>, String> {
    let mut outer = value;
    let mut signers_seq = take_prefixed(&mut outer)?;
    let mut signers = Vec::new();
    while !signers_seq.is_empty() {
        let mut signer = take_prefixed(&mut signers_seq)?;
        let signed_data = take_prefixed(&mut signer)?;
        let sdk_bounds = if v3 {
            Some((take_u32(&mut signer)?, take_u32(&mut signer)?))
        } else {
            None
        };
        let mut sigs_seq = take_prefixed(&mut signer)?;
        let mut signatures = Vec::new();
        while !sigs_seq.is_empty() {
            let mut record = take_prefixed(&mut sigs_seq)?;
            let algorithm = take_u32(&mut record)?;
            signatures.push((algorithm, take_prefixed(&mut record)?));
        }
        let public_key = take_prefixed(&mut signer)?;
        signers.push(SignerRecord {
            signed_data,
            sdk_bounds,
            signatures,
            public_key,
        });
    }
    Ok(signers)
}

pub(crate) fn parse_signed_data(mut data: &[u8], v3: bool) -> Result<SignedDataRecord<'_>, String> {
    let mut digests_seq = take_prefixed(&mut data)?;
    let mut digests = Vec::new();
    while !digests_seq.is_empty() {
        let mut record = take_prefixed(&mut digests_seq)?;
        let algorithm = take_u32(&mut record)?;
        digests.push((algorithm, take_prefixed(&mut record)?));
    }
    let mut certs_seq = take_prefixed(&mut data)?;
    let mut certificates = Vec::new();
    while !certs_seq.is_empty() {
        certificates.push(take_prefixed(&mut certs_seq)?);
    }
    let sdk_bounds = if v3 {
        Some((take_u32(&mut data)?, take_u32(&mut data)?))
    } else {
        None
    };
    let mut attrs_seq = take_prefixed(&mut data)?;
    let mut attributes = Vec::new();
    while !attrs_seq.is_empty() {
        let mut record = take_prefixed(&mut attrs_seq)?;
        let id = take_u32(&mut record)?;
        attributes.push((id, record));
    }
    Ok(SignedDataRecord {
        digests,
        certificates,
        sdk_bounds,
        attributes,
    })
}

/// Checks one signer against the recomputed content digest.
pub(crate) fn check_signer(
    signer: &SignerRecord<'_>,
    v3: bool,
    digest: &[u8; 32],
) -> Result<(), String> {
    let supported: Vec<_> = signer
        .signatures
        .iter()
        .filter_map(|(id, sig)| SignatureAlgorithm::from_id(*id).map(|alg| (alg, *sig)))
        .collect();
    if supported.is_empty() {
        return Err("no signature with a supported algorithm".to_string());
    }
    for (algorithm, signature) in &supported {
        algorithm.verify(signer.public_key, signer.signed_data, signature)?;
    }

    let data = parse_signed_data(signer.signed_data, v3)?;
    if v3 && data.sdk_bounds != signer.sdk_bounds {
        return Err("signer SDK bounds differ from signed data".to_string());
    }
    for (algorithm, _) in &supported {
        let recorded = data
            .digests
            .iter()
            .find(|(id, _)| *id == algorithm.id())
            .ok_or_else(|| "signed data lacks a digest for the signature algorithm".to_string())?;
        if recorded.1 != digest.as_slice() {
            return Err("content digest does not match".to_string());
        }
    }
    let certificate = data
        .certificates
        .first()
        .ok_or_else(|| "signed data carries no certificate".to_string())?;
    let certificate_key = certificate_public_key(certificate)?;
    if certificate_key != signer.public_key {
        return Err("certificate does not match the signer public key".to_string());
    }
    Ok(())
}

fn certificate_public_key(certificate: &[u8]) -> Result<Vec<u8>, String> {
    use der::{Decode, Encode};
    let parsed = x509_cert::Certificate::from_der(certificate)
        .map_err(|err| format!("invalid certificate: {err}"))?;
    parsed
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|err| format!("invalid certificate key: {err}"))
}

fn put_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SigningError> {
    let len = u32::try_from(bytes.len()).map_err(|_| SigningError::TooLarge)?;
    out.write_u32::<LittleEndian>(len)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, String> {
    buf.read_u32::<LittleEndian>()
        .map_err(|_| "truncated signer record".to_string())
}

fn take_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], String> {
    let len = take_u32(buf)? as usize;
    if len > buf.len() {
        return Err("length prefix exceeds record".to_string());
    }
    let (head, rest) = buf.split_at(len);
    *buf = rest;
    Ok(head)
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}
