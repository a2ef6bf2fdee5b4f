//! Avalanche linear codec, limited to what a P-Chain `BaseTx` transfer
//! between secp256k1fx owners needs.

use anyhow::{Context, Result, anyhow, bail, ensure};
use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

pub const CODEC_VERSION: u16 = 0;
pub const BASE_TX_TYPE_ID: u32 = 0x22;
pub const TRANSFER_INPUT_TYPE_ID: u32 = 5;
pub const TRANSFER_OUTPUT_TYPE_ID: u32 = 7;
pub const CREDENTIAL_TYPE_ID: u32 = 9;

pub const FUJI_NETWORK_ID: u32 = 5;
pub const MAINNET_NETWORK_ID: u32 = 1;
/// The P-Chain's blockchain id is all zeroes.
pub const P_CHAIN_BLOCKCHAIN_ID: [u8; 32] = [0; 32];

const CHECKSUM_LEN: usize = 4;

pub type UtxoId = ([u8; 32], u32);

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = Sha256::digest(payload);
    let mut out = [0_u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash[32 - CHECKSUM_LEN..]);
    out
}

fn split_checksum(raw: &[u8]) -> Result<&[u8]> {
    ensure!(raw.len() >= CHECKSUM_LEN, "payload shorter than its checksum");
    let (payload, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    ensure!(checksum(payload) == sum, "checksum mismatch");
    Ok(payload)
}

/// `0x`-prefixed hex with the 4-byte sha256 checksum avalanchego appends.
pub fn encode_hex_with_checksum(payload: &[u8]) -> String {
    format!("0x{}{}", hex::encode(payload), hex::encode(checksum(payload)))
}

pub fn decode_hex_with_checksum(encoded: &str) -> Result<Vec<u8>> {
    let digits = encoded.trim().trim_start_matches("0x");
    let raw = hex::decode(digits).context("not hex")?;
    Ok(split_checksum(&raw)?.to_vec())
}

pub fn encode_cb58(payload: &[u8]) -> String {
    let mut raw = payload.to_vec();
    raw.extend_from_slice(&checksum(payload));
    bs58::encode(raw).into_string()
}

pub fn decode_cb58_id(encoded: &str) -> Result<[u8; 32]> {
    let raw = bs58::decode(encoded.trim())
        .into_vec()
        .with_context(|| format!("{encoded} is not base58"))?;
    let payload = split_checksum(&raw).with_context(|| format!("{encoded} is not cb58"))?;
    payload
        .try_into()
        .map_err(|_| anyhow!("{encoded} is not a 32-byte id"))
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, len: usize) -> Result<()> {
        ensure!(self.buf.remaining() >= len, "truncated: need {len} more bytes");
        Ok(())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0_u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }
}

/// A secp256k1fx transfer output the faucet can spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub tx_id: [u8; 32],
    pub output_index: u32,
    pub asset_id: [u8; 32],
    pub amount: u64,
    pub locktime: u64,
    pub threshold: u32,
    pub addresses: Vec<[u8; 20]>,
}

impl Utxo {
    pub fn id(&self) -> UtxoId {
        (self.tx_id, self.output_index)
    }

    /// `None` for outputs other than a plain secp256k1fx transfer output,
    /// such as stakeable locks.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        let mut reader = Reader { buf: payload };
        let version = reader.u16()?;
        ensure!(version == CODEC_VERSION, "unsupported codec version {version}");
        let tx_id = reader.array()?;
        let output_index = reader.u32()?;
        let asset_id = reader.array()?;
        if reader.u32()? != TRANSFER_OUTPUT_TYPE_ID {
            return Ok(None);
        }
        let amount = reader.u64()?;
        let locktime = reader.u64()?;
        let threshold = reader.u32()?;
        let count = reader.u32()?;
        let mut addresses = Vec::new();
        for _ in 0..count {
            addresses.push(reader.array()?);
        }
        Ok(Some(Self {
            tx_id,
            output_index,
            asset_id,
            amount,
            locktime,
            threshold,
            addresses,
        }))
    }

    /// Position of `owner` in the output's address list when it can spend
    /// the output alone.
    pub fn signer_index(&self, owner: &[u8; 20], now_secs: u64) -> Option<u32> {
        if self.threshold != 1 || self.locktime > now_secs {
            return None;
        }
        let index = self.addresses.iter().position(|address| address == owner)?;
        u32::try_from(index).ok()
    }

    #[cfg(test)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(CODEC_VERSION);
        out.put_slice(&self.tx_id);
        out.put_u32(self.output_index);
        out.put_slice(&self.asset_id);
        out.put_u32(TRANSFER_OUTPUT_TYPE_ID);
        out.put_u64(self.amount);
        out.put_u64(self.locktime);
        out.put_u32(self.threshold);
        out.put_u32(self.addresses.len() as u32);
        for address in &self.addresses {
            out.put_slice(address);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct TransferInput {
    pub utxo: UtxoId,
    pub asset_id: [u8; 32],
    pub amount: u64,
    pub signer_index: u32,
}

#[derive(Debug, Clone)]
pub struct TransferOutput {
    pub asset_id: [u8; 32],
    pub amount: u64,
    pub owner: [u8; 20],
}

impl TransferOutput {
    fn write(&self, out: &mut Vec<u8>) {
        out.put_slice(&self.asset_id);
        out.put_u32(TRANSFER_OUTPUT_TYPE_ID);
        out.put_u64(self.amount);
        out.put_u64(0);
        out.put_u32(1);
        out.put_u32(1);
        out.put_slice(&self.owner);
    }
}

/// Unsigned P-Chain `BaseTx`. Inputs and outputs are written in the
/// canonical order avalanchego verifies.
#[derive(Debug, Clone)]
pub struct BaseTx {
    pub network_id: u32,
    pub inputs: Vec<TransferInput>,
    pub outputs: Vec<TransferOutput>,
}

impl BaseTx {
    fn sorted_inputs(&self) -> Vec<&TransferInput> {
        let mut inputs: Vec<_> = self.inputs.iter().collect();
        inputs.sort_by_key(|input| input.utxo);
        inputs
    }

    pub fn unsigned_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u16(CODEC_VERSION);
        out.put_u32(BASE_TX_TYPE_ID);
        out.put_u32(self.network_id);
        out.put_slice(&P_CHAIN_BLOCKCHAIN_ID);

        let mut outputs: Vec<Vec<u8>> = self
            .outputs
            .iter()
            .map(|output| {
                let mut bytes = Vec::new();
                output.write(&mut bytes);
                bytes
            })
            .collect();
        outputs.sort();
        out.put_u32(u32::try_from(outputs.len()).context("too many outputs")?);
        for output in &outputs {
            out.put_slice(output);
        }

        let inputs = self.sorted_inputs();
        out.put_u32(u32::try_from(inputs.len()).context("too many inputs")?);
        for input in inputs {
            out.put_slice(&input.utxo.0);
            out.put_u32(input.utxo.1);
            out.put_slice(&input.asset_id);
            out.put_u32(TRANSFER_INPUT_TYPE_ID);
            out.put_u64(input.amount);
            out.put_u32(1);
            out.put_u32(input.signer_index);
        }

        // empty memo
        out.put_u32(0);
        Ok(out)
    }

    /// Appends one single-signature credential per input. `sign` receives the
    /// unsigned bytes and returns a 65-byte recoverable signature.
    pub fn sign<F>(&self, sign: F) -> Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> Result<[u8; 65]>,
    {
        if self.inputs.is_empty() {
            bail!("transaction has no inputs");
        }
        let mut signed = self.unsigned_bytes()?;
        let signature = sign(&signed)?;

        signed.put_u32(u32::try_from(self.inputs.len()).context("too many credentials")?);
        for _ in &self.inputs {
            signed.put_u32(CREDENTIAL_TYPE_ID);
            signed.put_u32(1);
            signed.put_slice(&signature);
        }
        Ok(signed)
    }
}

/// Transaction id: cb58 of sha256 over the signed bytes.
pub fn tx_id(signed: &[u8]) -> String {
    encode_cb58(&Sha256::digest(signed))
}
