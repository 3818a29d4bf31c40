#![allow(dead_code)]

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;
use serde_json::json;

pub struct IssuerKey {
    pub encoding: EncodingKey,
    pub public_pem: String,
}

fn generate() -> IssuerKey {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("key generation");
    let private_pem = private_key.to_pkcs1_pem(LineEnding::LF).expect("private pem");
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("public pem");
    IssuerKey {
        encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
        public_pem,
    }
}

pub static APP_ONE: Lazy<IssuerKey> = Lazy::new(generate);
pub static APP_TWO: Lazy<IssuerKey> = Lazy::new(generate);

pub fn sign(key: &IssuerKey, issuer: &str, exp: i64) -> String {
    encode(
        &Header::new(Algorithm::RS256),
        &json!({ "iss": issuer, "exp": exp, "iat": chrono::Utc::now().timestamp() }),
        &key.encoding,
    )
    .expect("sign token")
}
