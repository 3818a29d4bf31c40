//! Shared RSA key material for unit tests. Generating 2048-bit keys is slow,
//! so each key is created once per test binary.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;
use serde_json::Value;

pub(crate) struct TestKey {
    pub encoding: EncodingKey,
    pub public_pem: String,
}

fn generate() -> TestKey {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("private pem");
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("public pem");

    TestKey {
        encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
        public_pem,
    }
}

pub(crate) static KEY_A: Lazy<TestKey> = Lazy::new(generate);
pub(crate) static KEY_B: Lazy<TestKey> = Lazy::new(generate);

pub(crate) fn issue_token(encoding: &EncodingKey, claims: Value) -> String {
    encode(&Header::new(Algorithm::RS256), &claims, encoding).expect("sign token")
}
