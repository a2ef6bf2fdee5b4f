use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result, anyhow, bail};
use bech32::{Bech32, Hrp};
use k256::PublicKey;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub const MAINNET_HRP: &str = "avax";
pub const TESTNET_HRP: &str = "fuji";

/// Bech32 human-readable part for the given Avalanche network name
/// (`mainnet` / `fuji`, as resolved by the wallet store).
pub fn hrp_for_network(network_name: &str) -> Result<&'static str> {
    match network_name {
        "mainnet" => Ok(MAINNET_HRP),
        "fuji" | "testnet" => Ok(TESTNET_HRP),
        other => Err(anyhow!("unknown avalanche network: {other}")),
    }
}

pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey> {
    let raw = hex::decode(strip_0x(public_key_hex.trim())).context("public key is not valid hex")?;
    if raw.len() != 33 && raw.len() != 65 {
        bail!("public key must be 33 or 65 bytes, got {}", raw.len());
    }
    PublicKey::from_sec1_bytes(&raw).map_err(|_| anyhow!("public key is not a secp256k1 point"))
}

pub fn compress_public_key(public_key_hex: &str) -> Result<[u8; 33]> {
    let key = parse_public_key(public_key_hex)?;
    let point = key.to_encoded_point(true);
    let mut compressed = [0_u8; 33];
    compressed.copy_from_slice(point.as_bytes());
    Ok(compressed)
}

/// ripemd160(sha256(compressed point)), the 20-byte short id behind every
/// P-Chain and X-Chain address.
pub fn avalanche_address_bytes(public_key_hex: &str) -> Result<[u8; 20]> {
    let compressed = compress_public_key(public_key_hex)?;
    let sha = Sha256::digest(compressed);
    let short_id = Ripemd160::digest(sha);
    let mut out = [0_u8; 20];
    out.copy_from_slice(&short_id);
    Ok(out)
}

pub fn p_chain_address(public_key_hex: &str, hrp: &str) -> Result<String> {
    Ok(format!("P-{}", bech32_address(public_key_hex, hrp)?))
}

/// Core wallet's bech32 view of the C-Chain account (`C-fuji1...`).
pub fn core_eth_address(public_key_hex: &str, hrp: &str) -> Result<String> {
    Ok(format!("C-{}", bech32_address(public_key_hex, hrp)?))
}

fn bech32_address(public_key_hex: &str, hrp: &str) -> Result<String> {
    let short_id = avalanche_address_bytes(public_key_hex)?;
    let hrp = Hrp::parse(hrp).map_err(|err| anyhow!("invalid bech32 hrp {hrp}: {err}"))?;
    bech32::encode::<Bech32>(hrp, &short_id).map_err(|err| anyhow!("bech32 encode failed: {err}"))
}

/// Validates a `P-<hrp>1...` address and returns its 20-byte short id.
pub fn decode_p_chain_address(address: &str, expected_hrp: &str) -> Result<[u8; 20]> {
    let encoded = address
        .trim()
        .strip_prefix("P-")
        .ok_or_else(|| anyhow!("P-Chain address must start with P-"))?;

    let (hrp, data) =
        bech32::decode(encoded).map_err(|err| anyhow!("invalid bech32 address: {err}"))?;
    let expected = Hrp::parse(expected_hrp).map_err(|err| anyhow!("invalid bech32 hrp: {err}"))?;
    if hrp != expected {
        bail!("address belongs to another network (expected {expected_hrp})");
    }
    if data.len() != 20 {
        bail!("P-Chain address payload must be 20 bytes, got {}", data.len());
    }

    let mut out = [0_u8; 20];
    out.copy_from_slice(&data);
    Ok(out)
}

pub fn evm_address(public_key: &PublicKey) -> String {
    let point = public_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

pub fn evm_address_from_hex(public_key_hex: &str) -> Result<String> {
    Ok(evm_address(&parse_public_key(public_key_hex)?))
}

/// `0x` followed by exactly 40 hex digits. Checksums are not enforced.
pub fn is_evm_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(body) => body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn parse_evm_address(address: &str) -> Result<[u8; 20]> {
    if !is_evm_address(address) {
        bail!("invalid EVM address: {address}");
    }
    let raw = hex::decode(&address[2..])?;
    let mut out = [0_u8; 20];
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Hot key that funds faucet drips on the C-Chain, the L1s and the P-Chain.
pub struct FaucetSigner {
    signer: PrivateKeySigner,
}

impl FaucetSigner {
    pub fn from_hex(secret_key_hex: &str) -> Result<Self> {
        let raw = Zeroizing::new(
            hex::decode(strip_0x(secret_key_hex.trim())).context("faucet key is not valid hex")?,
        );
        if raw.len() != 32 {
            bail!("faucet key must be 32 bytes");
        }
        let signer =
            PrivateKeySigner::from_slice(&raw).map_err(|_| anyhow!("faucet key is not a valid scalar"))?;
        Ok(Self { signer })
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            signer: PrivateKeySigner::from_signing_key(signing_key),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.signer.credential().verifying_key())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_encoded_point(true).as_bytes())
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn evm_address(&self) -> String {
        evm_address(&self.public_key())
    }

    pub fn p_chain_address(&self, hrp: &str) -> Result<String> {
        p_chain_address(&self.public_key_hex(), hrp)
    }

    pub fn short_id(&self) -> Result<[u8; 20]> {
        avalanche_address_bytes(&self.public_key_hex())
    }

    /// Signs an EIP-155 legacy transaction and returns the raw envelope
    /// ready for `eth_sendRawTransaction`.
    pub fn sign_legacy(&self, tx: TxLegacy) -> Result<Vec<u8>> {
        let signature = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .context("signing failed")?;
        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(envelope.encoded_2718())
    }

    /// `r || s || recovery id` over sha256 of an Avalanche unsigned tx, the
    /// layout of a secp256k1fx credential signature.
    pub fn sign_avalanche(&self, unsigned_tx: &[u8]) -> Result<[u8; 65]> {
        let digest = Sha256::digest(unsigned_tx);
        let (signature, recovery_id) = self
            .signer
            .credential()
            .sign_prehash_recoverable(&digest)
            .map_err(|err| anyhow!("signing failed: {err}"))?;

        let mut out = [0_u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, TxKind, U256};
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use rand::rngs::OsRng;

    // Generator point: the public key of secret scalar 1.
    const G_COMPRESSED: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G_UNCOMPRESSED: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

    #[test]
    fn compressed_and_uncompressed_keys_agree() {
        let from_compressed = compress_public_key(G_COMPRESSED).expect("compressed");
        let from_uncompressed = compress_public_key(&format!("0x{G_UNCOMPRESSED}")).expect("uncompressed");
        assert_eq!(from_compressed, from_uncompressed);
        assert_eq!(hex::encode(from_compressed), G_COMPRESSED);
    }

    #[test]
    fn rejects_malformed_public_keys() {
        assert!(compress_public_key("0x1234").is_err());
        assert!(compress_public_key("zz").is_err());
        assert!(compress_public_key(&"00".repeat(33)).is_err());
    }

    #[test]
    fn p_chain_address_roundtrips_through_decoder() {
        let address = p_chain_address(G_COMPRESSED, TESTNET_HRP).expect("address");
        assert!(address.starts_with("P-fuji1"), "{address}");

        let short_id = decode_p_chain_address(&address, TESTNET_HRP).expect("decode");
        assert_eq!(short_id, avalanche_address_bytes(G_COMPRESSED).expect("short id"));

        assert!(decode_p_chain_address(&address, MAINNET_HRP).is_err());
    }

    #[test]
    fn core_eth_address_shares_the_p_chain_payload() {
        let p_chain = p_chain_address(G_UNCOMPRESSED, MAINNET_HRP).expect("p");
        let core_eth = core_eth_address(G_UNCOMPRESSED, MAINNET_HRP).expect("c");
        assert!(core_eth.starts_with("C-avax1"));
        assert_eq!(p_chain[2..], core_eth[2..]);
    }

    #[test]
    fn decode_rejects_missing_prefix_and_bad_checksum() {
        let address = p_chain_address(G_COMPRESSED, TESTNET_HRP).expect("address");
        assert!(decode_p_chain_address(&address[2..], TESTNET_HRP).is_err());

        let mut tampered = address.clone();
        let last = tampered.pop().expect("non-empty");
        tampered.push(if last == 'q' { 'p' } else { 'q' });
        assert!(decode_p_chain_address(&tampered, TESTNET_HRP).is_err());
    }

    #[test]
    fn evm_address_of_generator_point() {
        assert_eq!(
            evm_address_from_hex(G_COMPRESSED).expect("address"),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn evm_address_validation() {
        assert!(is_evm_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
        assert!(!is_evm_address("7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
        assert!(!is_evm_address("0x7e5f4552091a69125d5dfcb7b8c2659029395bd"));
        assert!(!is_evm_address("0xZZ5f4552091a69125d5dfcb7b8c2659029395bdf"));
    }

    #[test]
    fn hrp_lookup_by_network_name() {
        assert_eq!(hrp_for_network("fuji").expect("fuji"), "fuji");
        assert_eq!(hrp_for_network("mainnet").expect("mainnet"), "avax");
        assert!(hrp_for_network("devnet").is_err());
    }

    #[test]
    fn faucet_signer_address_matches_known_key() {
        let signer = FaucetSigner::from_hex(&format!("0x{}", "46".repeat(32))).expect("signer");
        assert_eq!(signer.evm_address(), "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f");
        assert!(FaucetSigner::from_hex("0x01").is_err());
    }

    fn eip155_reference_transfer() -> TxLegacy {
        TxLegacy {
            chain_id: Some(1),
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x35)),
            value: U256::from(1_000_000_000_000_000_000_u128),
            input: Bytes::new(),
        }
    }

    #[test]
    fn eip155_signing_hash_matches_reference() {
        assert_eq!(
            hex::encode(eip155_reference_transfer().signature_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn signed_transfer_matches_eip155_reference_envelope() {
        let signer = FaucetSigner::from_hex(&"46".repeat(32)).expect("signer");
        let raw = signer.sign_legacy(eip155_reference_transfer()).expect("sign");
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn signed_transfer_recovers_to_faucet_address() {
        let signer = FaucetSigner::from_signing_key(SigningKey::random(&mut OsRng));
        let tx = TxLegacy {
            chain_id: Some(43113),
            nonce: 3,
            gas_price: 25_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::from(2_000_000_000_000_000_000_u128),
            input: Bytes::new(),
        };

        let raw = signer.sign_legacy(tx.clone()).expect("sign");
        // long-list header: the envelope is always over 55 bytes
        assert_eq!(raw[0], 0xf8);

        let signature = signer.signer.sign_hash_sync(&tx.signature_hash()).expect("sign");
        let recovered = signature
            .recover_address_from_prehash(&tx.signature_hash())
            .expect("recover");
        assert_eq!(recovered, signer.address());
        assert_eq!(format!("{recovered:#x}"), signer.evm_address());
    }

    #[test]
    fn avalanche_signature_recovers_to_faucet_key() {
        let signer = FaucetSigner::from_signing_key(SigningKey::random(&mut OsRng));
        let unsigned = b"unsigned base tx";
        let signature = signer.sign_avalanche(unsigned).expect("sign");

        let digest = Sha256::digest(unsigned);
        let recovery_id = RecoveryId::from_byte(signature[64]).expect("recovery id");
        let parsed = Signature::from_slice(&signature[..64]).expect("signature");
        let recovered = VerifyingKey::recover_from_prehash(&digest, &parsed, recovery_id).expect("recover");
        assert_eq!(PublicKey::from(&recovered), signer.public_key());
        assert_eq!(
            signer.p_chain_address(TESTNET_HRP).expect("address"),
            p_chain_address(&signer.public_key_hex(), TESTNET_HRP).expect("address")
        );
    }
}
