//! Fixtures shared by the unit tests: containers and signing credentials.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use replica_domain::{classify, CompressionPolicy};

use crate::core::signing::{Credential, SigningKey};

/// Self-signed RSA-2048 "Android Debug" certificate.
const RSA_CERTIFICATE: &str = "
MIIDeTCCAmGgAwIBAgIUCymsKTowQdR5TEv+vKSVjAWmYBowDQYJKoZIhvcNAQEL
BQAwTDELMAkGA1UEBhMCVVMxEzARBgNVBAgMClNvbWUtU3RhdGUxEDAOBgNVBAoM
B0FuZHJvaWQxFjAUBgNVBAMMDUFuZHJvaWQgRGVidWcwHhcNMjIwMTI4MTUyNjQ5
WhcNMzIwMTI2MTUyNjQ5WjBMMQswCQYDVQQGEwJVUzETMBEGA1UECAwKU29tZS1T
dGF0ZTEQMA4GA1UECgwHQW5kcm9pZDEWMBQGA1UEAwwNQW5kcm9pZCBEZWJ1ZzCC
ASIwDQYJKoZIhvcNAQEBBQADggEPADCCAQoCggEBANdFY1F564A3MzuCaTUGluti
pqLWr1o515BC8o42fIClqBWPcz3Hb4C56A6FLVq50gmFz+mMNGBqrgkT9RKICk+O
OV8hl0O/DzXM4COdfSdWZ1ZaNkFL1lboIAmfmTckWEymFj67gwqqpPy6dujteIn6
S28AbdHs2FAr1R+ciMoQ7ijxLSMq/JyYNSu/ldcvdzaevxiYMpcDZ6SMDTNn3eHs
D9w9iSkupVloUWx7ophdR0U2k2CFH3uEyDHC6L65K8aP+SQaN20IlmWftkwoRyum
cfzW/b9i77XnaT8PlrX1yjZ2ubeD7c/JyEVj2gd5B+OnkTmC+Mi0I+6Eke5vFVMC
AwEAAaNTMFEwHQYDVR0OBBYEFFVRccNTaUP2O9T8yrguVH4+CCSWMB8GA1UdIwQY
MBaAFFVRccNTaUP2O9T8yrguVH4+CCSWMA8GA1UdEwEB/wQFMAMBAf8wDQYJKoZI
hvcNAQELBQADggEBANbpPG3teQt/Z1ALsaIrsXOqpPKqVPCRp3w+hNzl/rleEpgm
zDIlyrLVDRzQyUFHhl9j1oJKPHzpE/1hy46rOZ509dqGqdfcDCTXjLi1O8JJ54wA
PdJ0h/8YPzh1md+GibZZYFimnFNoG9i6jQuEb4l5HIZLjJj02u+e4gpTD85LdOvw
S4jS/30KnuZVcr7TilrgOMMeP6GRzbBJ+/hXcfY2biSAu5pdEht2NV9SSKlIO3DD
ulXXz0+BJJ+PdVqTpPgHvbXbHktOD58srszwmLHHZJl5IfcBwJO0TNvad5lALBYI
kdxygt2CwyNOJUVd/nfQJ1O3YiwRkoVJ6on9Mnk=
";

/// PKCS#8 private key matching [`RSA_CERTIFICATE`].
const RSA_PRIVATE_KEY: &str = "
MIIEvwIBADANBgkqhkiG9w0BAQEFAASCBKkwggSlAgEAAoIBAQDXRWNReeuANzM7
gmk1BpbrYqai1q9aOdeQQvKONnyApagVj3M9x2+AuegOhS1audIJhc/pjDRgaq4J
E/USiApPjjlfIZdDvw81zOAjnX0nVmdWWjZBS9ZW6CAJn5k3JFhMphY+u4MKqqT8
unbo7XiJ+ktvAG3R7NhQK9UfnIjKEO4o8S0jKvycmDUrv5XXL3c2nr8YmDKXA2ek
jA0zZ93h7A/cPYkpLqVZaFFse6KYXUdFNpNghR97hMgxwui+uSvGj/kkGjdtCJZl
n7ZMKEcrpnH81v2/Yu+152k/D5a19co2drm3g+3PychFY9oHeQfjp5E5gvjItCPu
hJHubxVTAgMBAAECggEBAMAD45A0WOy30Bn/vAoRQ6LYDtzm8+hd+bpzDNnvHeS+
XoxEtT1g3EOND8GL5yWq4/+cfRTL+5gY7/2m8I3EDLZjnScO1lcWX+HUSgVan9zr
xCcRNp3NoHVKffE3i7nU0HImH2d7aGqmRZ4sUI5562/fc1OipVJ/mX8BagvVW2oo
RpThTUYC37T/X/kD0U/06pJzWmF3RAAhANk6+Z9VVX1kNsPEMBzoWTmhqb6dxiAc
Ayce8AslF8E0CmyMQ9HK7GwHCprENS7cIUMPG+vgrO5yFbGkIo4DrNTs2naA4f4S
iQvpNpGfRAfTdi4gV3YZoxfOOOhAh8A9RsAFrT8t6dECgYEA9hVWXHru1jlY1uiV
misILoSux+iE25HGqOdHuqF5vR5Ji1Z4iFE1UNAOtKaSbTDm0IccEBpTOkzL8A5f
BgRJRy+TjdE/ynzPgLLD/QnvGfdYarmr6H1xLKOlUY9vgUP2WAC4Zou9Jf/Ylbpg
BpfkXw0ebfhu1LGRXDj1sgqXAbsCgYEA3/Iuuq0YZy8msyc0Ap53mQgPjdqE2neo
xx7JHuXBGvVeCJ+zEzSg/rqWPNN4qpuHCc2ICb1nI5lkxJqimY30Em/Prpp9jMIK
wpeT/bPfOzITXyAOUIxRGqioTIv+ckyt+2t4x5qU+fWHBqWYTZb7EF3oJuipz9aZ
IoDwaKxd1UkCgYEArYNKC5daxI5XB+Gjarsg37wKiUZ4N2HIU9wQBZZKAoFSlf74
qhWopDyvwc0ZvggXF73MmcYWHSt9ONzJP7LSAHGZdwuuERaEMVjbPJY+k26GV2pn
vlyE6lbRAHtEwj6rek23uAab7ilCDAEIKF39VtAnPp9Hdo1l00MOauVwqHUCgYB9
FSsuj1ILCBYIiMQPFm3cptjxNXVxBNbbaQGS5WdHZHdCP9joyEOII7WYgdFrEXWK
byclsYmzI5FaErjxJY2G4rbQYm/vt84ExF8fnGD6Ek0pm6EDMmx2hG+EWckkFFo1
DOEoM9o0BwSFHOcFp2fRy3HIkbmPYeCkmfotrOC4KQKBgQC0OEniLk9PPhcaHO6/
Oo2xwWUq+TEN72jW5AV77xpykkAw3T4TeY5w84BZfCjOa4bYsvjvbjtn/DhtoDBj
TySd4PKKWF9XalNpbXmVQYtPU8huw1iwg+dV5llQG2pksFWDD2rglAEb2TEpwEvL
hmBjxp0mRtma4r/6hMJJzPdUmQ==
";

/// Container bytes holding `entries` in order. Names ending in '/' become
/// directories; stored formats are written uncompressed.
pub(crate) fn container_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, FileOptions::default()).unwrap();
            continue;
        }
        let method = match classify(name) {
            CompressionPolicy::Stored => CompressionMethod::Stored,
            CompressionPolicy::Deflated => CompressionMethod::Deflated,
        };
        zip.start_file(*name, FileOptions::default().compression_method(method))
            .unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub(crate) fn write_container(path: &Path, entries: &[(&str, &[u8])]) {
    fs::write(path, container_bytes(entries)).unwrap();
}

/// Every file entry of a container as (name, bytes), in archive order.
pub(crate) fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        entries.push((entry.name().to_string(), bytes));
    }
    entries
}

fn generated_ec_parts() -> (Vec<u8>, Vec<u8>) {
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["replica.test".to_string()]).unwrap();
    let certificate = params.self_signed(&key_pair).unwrap();
    (certificate.der().to_vec(), key_pair.serialize_der())
}

/// Fresh ECDSA P-256 credential with alias `key0`.
pub(crate) fn ec_test_credential() -> Credential {
    let (certificate, key) = generated_ec_parts();
    let key = SigningKey::from_pkcs8_der(&key).unwrap();
    Credential::from_parts("key0", key, certificate).unwrap()
}

/// RSA credential with alias `key0`.
pub(crate) fn rsa_test_credential() -> Credential {
    let certificate = decode_pem_body(RSA_CERTIFICATE);
    let key = SigningKey::from_pkcs8_der(&decode_pem_body(RSA_PRIVATE_KEY)).unwrap();
    Credential::from_parts("key0", key, certificate).unwrap()
}

/// Writes a PKCS#12 store with one EC key under `alias` and returns its path.
pub(crate) fn write_test_keystore(dir: &Path, password: &str, alias: &str) -> PathBuf {
    let (certificate, key) = generated_ec_parts();
    let pfx = p12::PFX::new(&certificate, &key, None, password, alias).unwrap();
    let path = dir.join("debug.p12");
    fs::write(&path, pfx.to_der()).unwrap();
    path
}

fn decode_pem_body(pem: &str) -> Vec<u8> {
    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    STANDARD.decode(body).unwrap()
}
