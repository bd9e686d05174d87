//! Cryptographic operations for the profile download session.
//!
//! This module provides the primitives behind session establishment and
//! bound profile package protection: elliptic-curve key agreement on
//! NIST P-256, the X9.63 one-step key derivation function, per-segment
//! ICV derivation and the forward CMAC chain.

use aes::cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, Iv, IvSizeUser, Key, KeyInit, KeyIvInit,
    KeySizeUser,
    block_padding::Iso7816,
    typenum::U16,
};
use bytes::{Bytes, BytesMut};
use cipher::block_padding::UnpadError;
use cmac::{Cmac, Mac};
use generic_array::GenericArray;
use p256::{
    EncodedPoint, PublicKey, SecretKey,
    ecdh::{SharedSecret, diffie_hellman},
    elliptic_curve::sec1::FromEncodedPoint,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Length in bytes of the truncated per-segment authentication tag.
pub const MAC_TAG_LEN: usize = 8;

/// Key derivation index for the session encryption key.
pub(crate) const KEY_INDEX_ENC: u8 = 0x01;
/// Key derivation index for the command (outbound) MAC key.
pub(crate) const KEY_INDEX_CMAC: u8 = 0x02;
/// Key derivation index for the response (inbound) MAC key.
pub(crate) const KEY_INDEX_RMAC: u8 = 0x03;

pub(crate) type Encryptor = cbc::Encryptor<aes::Aes128>;
pub(crate) type Decryptor = cbc::Decryptor<aes::Aes128>;

/// Running MAC chaining value carried from one segment to the next.
pub(crate) type MacChainValue = GenericArray<u8, U16>;

/// Cipher parameters of the bound profile package protection scheme.
///
/// AES-128 in CBC mode with a 16-byte ICV derived from the block counter.
#[allow(missing_debug_implementations)]
pub struct Bsp;

impl KeySizeUser for Bsp {
    type KeySize = U16;
}

impl IvSizeUser for Bsp {
    type IvSize = U16;
}

/// Perform elliptic-curve key agreement with the remote party.
///
/// The remote public key is supplied in SEC1 encoding and is fully
/// validated before use: the encoding must parse, the point must not be
/// the identity element and it must satisfy the curve equation. Anything
/// else fails with [`Error::InvalidPublicKey`] without distinguishing the
/// rejection reason.
///
/// The returned shared secret is the x-coordinate of the computed point.
pub fn derive_shared_secret(private: &SecretKey, remote: &[u8]) -> Result<SharedSecret> {
    let point = EncodedPoint::from_bytes(remote).map_err(|_| Error::InvalidPublicKey)?;
    if point.is_identity() {
        return Err(Error::InvalidPublicKey);
    }
    let public =
        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point)).ok_or(Error::InvalidPublicKey)?;

    Ok(diffie_hellman(private.to_nonzero_scalar(), public.as_affine()))
}

/// ANSI X9.63 one-step KDF over SHA-256.
///
/// Output is the concatenation of `SHA-256(Z || counter || shared_info)`
/// for a big-endian 32-bit counter starting at 1, truncated to `len`.
fn kdf_x963(z: &[u8], shared_info: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut okm = Zeroizing::new(Vec::with_capacity(len.next_multiple_of(32)));
    let mut counter: u32 = 1;
    while okm.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(z);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        okm.extend_from_slice(hasher.finalize().as_slice());
        counter += 1;
    }
    okm.truncate(len);
    okm
}

/// Derive one session key from the shared secret.
///
/// `context` is the session-scoped domain separation string; `index`
/// distinguishes the key being derived so that the encryption and MAC
/// keys are independent even though they share one secret.
pub(crate) fn derive_key(shared_secret: &SharedSecret, context: &[u8], index: u8) -> Key<Bsp> {
    let mut shared_info = Zeroizing::new(Vec::with_capacity(context.len() + 1));
    shared_info.extend_from_slice(context);
    shared_info.push(index);

    let okm = kdf_x963(shared_secret.raw_secret_bytes().as_slice(), &shared_info, 16);
    Key::<Bsp>::clone_from_slice(&okm)
}

/// Derive the ICV for one segment from the current block counter.
///
/// The counter is encoded as a 16-byte big-endian block and encrypted
/// with AES in ECB mode under the session encryption key. The counter is
/// never reused; the chain advances it by exactly one per segment.
pub(crate) fn derive_icv(enc_key: &Key<Bsp>, block_nr: u64) -> Iv<Bsp> {
    let mut block = Iv::<Bsp>::default();
    block[8..].copy_from_slice(&block_nr.to_be_bytes());
    aes::Aes128::new(enc_key).encrypt_block(&mut block);
    block
}

/// Compute the initial MAC chaining value for a fresh chain.
pub(crate) fn initial_mac_chain(rmac_key: &Key<Bsp>) -> MacChainValue {
    let mut mac = <Cmac<aes::Aes128> as Mac>::new(rmac_key);
    mac.update(&[0u8; 16]);
    mac.finalize().into_bytes()
}

/// Advance the MAC chain by one segment.
///
/// The full 16-byte CMAC over the previous chaining value, the segment's
/// framing tag and its ciphertext becomes the next chaining value; the
/// transmitted tag is its first [`MAC_TAG_LEN`] bytes.
pub(crate) fn mac_step(
    rmac_key: &Key<Bsp>,
    chain: &MacChainValue,
    kind_tag: &[u8],
    ciphertext: &[u8],
) -> MacChainValue {
    let mut mac = <Cmac<aes::Aes128> as Mac>::new(rmac_key);
    mac.update(chain.as_slice());
    mac.update(kind_tag);
    mac.update(ciphertext);
    mac.finalize().into_bytes()
}

/// Compare a carried segment tag against a freshly computed chaining
/// value in constant time.
pub(crate) fn verify_segment_tag(chain: &MacChainValue, carried: &[u8]) -> bool {
    bool::from(chain[..MAC_TAG_LEN].ct_eq(carried))
}

/// Encrypt data using the provided key and IV, padding it in ISO 7816 format.
pub(crate) fn encrypt_data(data: &mut BytesMut, enc_key: &Key<Bsp>, iv: &Iv<Bsp>) -> Bytes {
    let msg_len = prepare_padding(data);
    // SAFETY: The data is padded to a multiple of 16 bytes, so it is safe to use with the Encryptor.
    let encrypted = Encryptor::new(enc_key, iv)
        .encrypt_padded_mut::<Iso7816>(data, msg_len)
        .unwrap();
    Bytes::copy_from_slice(encrypted)
}

/// Decrypt data using the provided key and IV assuming the data is padded
/// in ISO 7816 format.
pub(crate) fn decrypt_data(
    data: &mut BytesMut,
    enc_key: &Key<Bsp>,
    iv: &Iv<Bsp>,
) -> std::result::Result<Bytes, UnpadError> {
    let decrypted = Decryptor::new(enc_key, iv).decrypt_padded_mut::<Iso7816>(data)?;

    Ok(BytesMut::from(decrypted).into())
}

// A utility function to ensure that the data is padded to a multiple of 16 bytes.
fn prepare_padding(data: &mut BytesMut) -> usize {
    let len = data.len();
    data.resize(len + 16 - len % 16, 0);

    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_ecdh() {
        // Generate two ephemeral key pairs
        let sk1 = SecretKey::random(&mut rand_v8::thread_rng());
        let sk2 = SecretKey::random(&mut rand_v8::thread_rng());

        let pub1 = sk1.public_key().to_sec1_bytes();
        let pub2 = sk2.public_key().to_sec1_bytes();

        // Both directions must agree on the same secret
        let shared1 = derive_shared_secret(&sk1, &pub2).unwrap();
        let shared2 = derive_shared_secret(&sk2, &pub1).unwrap();

        assert_eq!(shared1.raw_secret_bytes(), shared2.raw_secret_bytes());
    }

    #[test]
    fn test_ecdh_known_answer() {
        // GSMA mode 51 test vector: one-time eUICC/SM-DP+ key pair
        let euicc_otpk = hex!(
            "0400f7b8d71403f21d84b00cd9e561178d737d3f4d065e62fee279271298dd4f07"
            "4794ab791b9939d4461296efe388aa26731064263af988b7d2c4d77da44801b5"
        );
        let smdp_otsk = hex!("fb68a38ccedb69e15cbe03c256228998ac398587e5dc7117f948145c839d61a4");
        let expected = hex!("c9a993dd4879a8f7161f2085410edd4f9652f1df37be097ba96ba2ca6be528fe");

        let private = SecretKey::from_slice(&smdp_otsk).unwrap();
        let shared = derive_shared_secret(&private, &euicc_otpk).unwrap();

        assert_eq!(shared.raw_secret_bytes().as_slice(), expected);
    }

    #[test]
    fn test_rejects_point_off_curve() {
        let private = SecretKey::random(&mut rand_v8::thread_rng());

        // (1, 1) does not satisfy the P-256 curve equation
        let mut bogus = [0u8; 65];
        bogus[0] = 0x04;
        bogus[32] = 0x01;
        bogus[64] = 0x01;

        assert!(matches!(
            derive_shared_secret(&private, &bogus),
            Err(Error::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_rejects_identity_point() {
        let private = SecretKey::random(&mut rand_v8::thread_rng());

        assert!(matches!(
            derive_shared_secret(&private, &[0x00]),
            Err(Error::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_rejects_truncated_encoding() {
        let private = SecretKey::random(&mut rand_v8::thread_rng());
        let public = private.public_key().to_sec1_bytes();

        assert!(matches!(
            derive_shared_secret(&private, &public[..public.len() - 1]),
            Err(Error::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_derive_key_deterministic() {
        let secret = hex!("c9a993dd4879a8f7161f2085410edd4f9652f1df37be097ba96ba2ca6be528fe");
        let shared = SharedSecret::from(GenericArray::from(secret));

        let once = derive_key(&shared, b"test-session", KEY_INDEX_ENC);
        let twice = derive_key(&shared, b"test-session", KEY_INDEX_ENC);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_derive_key_indices_independent() {
        let secret = hex!("c9a993dd4879a8f7161f2085410edd4f9652f1df37be097ba96ba2ca6be528fe");
        let shared = SharedSecret::from(GenericArray::from(secret));

        let enc = derive_key(&shared, b"test-session", KEY_INDEX_ENC);
        let cmac = derive_key(&shared, b"test-session", KEY_INDEX_CMAC);
        let rmac = derive_key(&shared, b"test-session", KEY_INDEX_RMAC);

        assert_ne!(enc, cmac);
        assert_ne!(cmac, rmac);
        assert_ne!(enc, rmac);

        // A different context must shift every key
        assert_ne!(enc, derive_key(&shared, b"other-session", KEY_INDEX_ENC));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key_bytes = hex!("404142434445464748494a4b4c4d4e4f");
        let key = Key::<Bsp>::from_slice(&key_bytes);
        let iv = derive_icv(key, 1);

        let plaintext = b"profile element payload";
        let ciphertext = encrypt_data(&mut BytesMut::from(&plaintext[..]), key, &iv);
        assert_eq!(ciphertext.len() % 16, 0);

        let mut buf = BytesMut::from(&ciphertext[..]);
        let decrypted = decrypt_data(&mut buf, key, &iv).unwrap();
        assert_eq!(&decrypted[..], plaintext);
    }

    #[test]
    fn test_icv_advances_with_counter() {
        let key_bytes = hex!("404142434445464748494a4b4c4d4e4f");
        let key = Key::<Bsp>::from_slice(&key_bytes);

        assert_ne!(derive_icv(key, 1), derive_icv(key, 2));
        assert_eq!(derive_icv(key, 7), derive_icv(key, 7));
    }

    #[test]
    fn test_mac_chain_depends_on_history() {
        let key_bytes = hex!("000102030405060708090a0b0c0d0e0f");
        let key = Key::<Bsp>::from_slice(&key_bytes);

        let chain0 = initial_mac_chain(key);
        let chain1 = mac_step(key, &chain0, &[0xa0], b"first ciphertext");
        let chain2 = mac_step(key, &chain1, &[0xa1], b"second ciphertext");

        // Same data folded through a different chain value yields a different MAC
        let reordered = mac_step(key, &chain0, &[0xa1], b"second ciphertext");
        assert_ne!(chain2, reordered);

        // The segment tag is bound into the chain as well
        let retagged = mac_step(key, &chain0, &[0xa1], b"first ciphertext");
        assert_ne!(chain1, retagged);

        assert!(verify_segment_tag(&chain1, &chain1[..MAC_TAG_LEN]));
        assert!(!verify_segment_tag(&chain2, &chain1[..MAC_TAG_LEN]));
    }
}
