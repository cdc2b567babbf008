//! Nostr key material: parsing `nsec`/`npub` bech32 encodings and hex
//! secrets, deriving the x-only public key, and schnorr signing.
//!
//! Hex secrets shorter than 64 characters are left-padded with zeros, so
//! `git config nostr.sec 1` is a perfectly valid throwaway key for testing.

use bech32::FromBase32;
use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, SECP256K1, SecretKey, XOnlyPublicKey};

use crate::errors::HelperError;

fn bech32_payload(input: &str, expected_hrp: &str) -> Result<[u8; 32], HelperError> {
    let (hrp, data, _variant) =
        bech32::decode(input).map_err(|e| HelperError::Key(format!("bech32: {e}")))?;
    if hrp != expected_hrp {
        return Err(HelperError::Key(format!(
            "expected a {expected_hrp}1... string, got hrp `{hrp}`"
        )));
    }
    let bytes =
        Vec::<u8>::from_base32(&data).map_err(|e| HelperError::Key(format!("bech32: {e}")))?;
    if bytes.len() != 32 {
        return Err(HelperError::Key(format!(
            "{expected_hrp} payload must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Decode an `npub1...` string into the owner public key as lowercase hex.
pub fn decode_npub(npub: &str) -> Result<String, HelperError> {
    Ok(hex::encode(bech32_payload(npub, "npub")?))
}

/// An owner keypair parsed from git config.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public: XOnlyPublicKey,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("Keys")
            .field("public", &self.public_key_hex())
            .finish()
    }
}

impl Keys {
    /// Parse `nsec1...` (bech32) or a hex secret key, left-padded to 64
    /// characters when shorter.
    pub fn parse(input: &str) -> Result<Keys, HelperError> {
        let secret = if input.starts_with("nsec1") {
            bech32_payload(input, "nsec")?
        } else {
            let padded = format!("{input:0>64}");
            let bytes = hex::decode(&padded)
                .map_err(|_| HelperError::Key("secret key is not valid hex".to_string()))?;
            if bytes.len() != 32 {
                return Err(HelperError::Key(format!(
                    "secret key must be at most 64 hex characters, got {}",
                    input.len()
                )));
            }
            let mut out = [0u8; 32];
            out.copy_from_slice(&bytes);
            out
        };
        Keys::from_secret_bytes(secret)
    }

    /// Build a keypair from raw secret bytes.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Keys, HelperError> {
        let secret_key = SecretKey::from_slice(&secret)
            .map_err(|e| HelperError::Key(format!("secret key: {e}")))?;
        let keypair = Keypair::from_secret_key(SECP256K1, &secret_key);
        let (public, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        Ok(Keys { keypair, public })
    }

    /// The x-only public key in lowercase hex, as used in event `pubkey`
    /// fields and compared against the remote URL's npub.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// BIP-340 schnorr signature over a 32-byte digest, hex encoded.
    pub fn sign(&self, digest: [u8; 32]) -> String {
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&Message::from_digest(digest), &self.keypair);
        hex::encode(sig.serialize())
    }
}

/// Verify a hex schnorr signature over `digest` against a hex x-only pubkey.
pub fn verify(digest: [u8; 32], sig_hex: &str, pubkey_hex: &str) -> Result<bool, HelperError> {
    let sig_bytes =
        hex::decode(sig_hex).map_err(|_| HelperError::Key("signature is not hex".to_string()))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| HelperError::Key(format!("signature: {e}")))?;
    let pk_bytes = hex::decode(pubkey_hex)
        .map_err(|_| HelperError::Key("pubkey is not hex".to_string()))?;
    let public = XOnlyPublicKey::from_slice(&pk_bytes)
        .map_err(|e| HelperError::Key(format!("pubkey: {e}")))?;
    Ok(SECP256K1
        .verify_schnorr(&sig, &Message::from_digest(digest), &public)
        .is_ok())
}
