//! Asset Script Codec
//!
//! Asset payloads ride inside locking scripts. Ledger code only needs three
//! answers from a script: what kind of asset payload it carries (and where),
//! the decoded payload, and the address that controls it. [`AssetScriptCodec`]
//! is that capability; [`StandardAssetScript`] implements the layout below.
//!
//! ```text
//! OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ASSET <push: "ast" | kind | bincode body> OP_DROP
//! ```

use serde::de::DeserializeOwned;

use lib_types::{Address, Amount};

use crate::asset::{AssetDescriptor, AssetTransfer, ReissueAsset, OWNER_ASSET_AMOUNT};
use crate::errors::{TokenError, TokenResult};

// ============================================================================
// OPCODES
// ============================================================================

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_DROP: u8 = 0x75;
pub const OP_ASSET: u8 = 0xc0;

/// Marker at the start of every asset push
pub const ASSET_MAGIC: &[u8; 3] = b"ast";

const P2PKH_LEN: usize = 25;
const MAX_DIRECT_PUSH: usize = 0x4b;

// ============================================================================
// PAYLOADS
// ============================================================================

/// Kind of asset payload a script carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetScriptKind {
    Issue,
    Reissue,
    Transfer,
    Owner,
}

impl AssetScriptKind {
    pub fn tag(self) -> u8 {
        match self {
            AssetScriptKind::Issue => b'q',
            AssetScriptKind::Reissue => b'r',
            AssetScriptKind::Transfer => b't',
            AssetScriptKind::Owner => b'o',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'q' => Some(AssetScriptKind::Issue),
            b'r' => Some(AssetScriptKind::Reissue),
            b't' => Some(AssetScriptKind::Transfer),
            b'o' => Some(AssetScriptKind::Owner),
            _ => None,
        }
    }
}

/// Result of classifying a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetScriptInfo {
    pub kind: AssetScriptKind,
    /// Byte offset of the encoded payload body
    pub offset: usize,
    /// Length of the encoded payload body
    pub len: usize,
}

/// Decoded asset payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetPayload {
    Issue(AssetDescriptor),
    Reissue(ReissueAsset),
    Transfer(AssetTransfer),
    /// Owner token creation, carrying the `NAME!` name
    Owner(String),
}

impl AssetPayload {
    pub fn kind(&self) -> AssetScriptKind {
        match self {
            AssetPayload::Issue(_) => AssetScriptKind::Issue,
            AssetPayload::Reissue(_) => AssetScriptKind::Reissue,
            AssetPayload::Transfer(_) => AssetScriptKind::Transfer,
            AssetPayload::Owner(_) => AssetScriptKind::Owner,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AssetPayload::Issue(asset) => &asset.name,
            AssetPayload::Reissue(reissue) => &reissue.name,
            AssetPayload::Transfer(transfer) => &transfer.name,
            AssetPayload::Owner(name) => name,
        }
    }

    /// Amount of the asset held by the output carrying this payload
    pub fn amount(&self) -> Amount {
        match self {
            AssetPayload::Issue(asset) => asset.amount,
            AssetPayload::Reissue(reissue) => reissue.amount,
            AssetPayload::Transfer(transfer) => transfer.credited_amount(),
            AssetPayload::Owner(_) => OWNER_ASSET_AMOUNT,
        }
    }

    pub fn time_lock(&self) -> u32 {
        match self {
            AssetPayload::Transfer(transfer) => transfer.time_lock,
            _ => 0,
        }
    }

    fn encode_body(&self) -> TokenResult<Vec<u8>> {
        let body = match self {
            AssetPayload::Issue(asset) => bincode::serialize(asset),
            AssetPayload::Reissue(reissue) => bincode::serialize(reissue),
            AssetPayload::Transfer(transfer) => bincode::serialize(transfer),
            AssetPayload::Owner(name) => bincode::serialize(name),
        };
        body.map_err(|e| TokenError::InvalidPayload(e.to_string()))
    }
}

// ============================================================================
// CODEC CAPABILITY
// ============================================================================

/// Classifier/decoder for asset-carrying scripts
pub trait AssetScriptCodec: Send + Sync {
    /// Identify an asset script, `None` for plain scripts
    fn classify(&self, script: &[u8]) -> Option<AssetScriptInfo>;

    /// Decode the payload located by `classify`
    fn decode(&self, script: &[u8], info: &AssetScriptInfo) -> TokenResult<AssetPayload>;

    /// Address controlling the output
    fn destination(&self, script: &[u8]) -> Option<Address>;

    /// Classify, decode and resolve the holder in one step
    fn decode_script(&self, script: &[u8]) -> TokenResult<Option<(AssetPayload, Address)>> {
        let Some(info) = self.classify(script) else {
            return Ok(None);
        };
        let payload = self.decode(script, &info)?;
        let holder = self.destination(script).ok_or(TokenError::MissingDestination)?;
        Ok(Some((payload, holder)))
    }
}

/// Pay-to-pubkey-hash scripts with an appended asset push
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardAssetScript;

impl StandardAssetScript {
    /// Plain pay-to-pubkey-hash locking script
    pub fn p2pkh(address: &Address) -> Vec<u8> {
        let mut script = Vec::with_capacity(P2PKH_LEN);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, Address::LEN as u8]);
        script.extend_from_slice(address.as_bytes());
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    /// Locking script paying `address` and carrying `payload`
    pub fn build(address: &Address, payload: &AssetPayload) -> TokenResult<Vec<u8>> {
        let body = payload.encode_body()?;
        let mut data = Vec::with_capacity(ASSET_MAGIC.len() + 1 + body.len());
        data.extend_from_slice(ASSET_MAGIC);
        data.push(payload.kind().tag());
        data.extend_from_slice(&body);

        let mut script = Self::p2pkh(address);
        script.push(OP_ASSET);
        match data.len() {
            n if n <= MAX_DIRECT_PUSH => script.push(n as u8),
            n if n <= u8::MAX as usize => script.extend_from_slice(&[OP_PUSHDATA1, n as u8]),
            n if n <= u16::MAX as usize => {
                script.push(OP_PUSHDATA2);
                script.extend_from_slice(&(n as u16).to_le_bytes());
            }
            n => return Err(TokenError::InvalidPayload(format!("payload of {n} bytes"))),
        }
        script.extend_from_slice(&data);
        script.push(OP_DROP);
        Ok(script)
    }

    fn is_p2pkh_prefix(script: &[u8]) -> bool {
        script.len() >= P2PKH_LEN
            && script[0] == OP_DUP
            && script[1] == OP_HASH160
            && script[2] == Address::LEN as u8
            && script[23] == OP_EQUALVERIFY
            && script[24] == OP_CHECKSIG
    }

    /// Parse a push opcode at `pos`, answering (data start, data length)
    fn read_push(script: &[u8], pos: usize) -> Option<(usize, usize)> {
        let op = *script.get(pos)?;
        match op {
            0x01..=0x4b => Some((pos + 1, op as usize)),
            OP_PUSHDATA1 => Some((pos + 2, *script.get(pos + 1)? as usize)),
            OP_PUSHDATA2 => {
                let raw = script.get(pos + 1..pos + 3)?;
                Some((pos + 3, u16::from_le_bytes([raw[0], raw[1]]) as usize))
            }
            _ => None,
        }
    }

    fn decode_body<T: DeserializeOwned>(body: &[u8]) -> TokenResult<T> {
        bincode::deserialize(body).map_err(|e| TokenError::InvalidPayload(e.to_string()))
    }
}

impl AssetScriptCodec for StandardAssetScript {
    fn classify(&self, script: &[u8]) -> Option<AssetScriptInfo> {
        if !Self::is_p2pkh_prefix(script) || script.get(P2PKH_LEN) != Some(&OP_ASSET) {
            return None;
        }
        let (start, len) = Self::read_push(script, P2PKH_LEN + 1)?;
        let end = start.checked_add(len)?;
        if end + 1 != script.len() || script[end] != OP_DROP {
            return None;
        }
        let data = &script[start..end];
        if data.len() <= ASSET_MAGIC.len() || &data[..ASSET_MAGIC.len()] != ASSET_MAGIC {
            return None;
        }
        let kind = AssetScriptKind::from_tag(data[ASSET_MAGIC.len()])?;
        let header = ASSET_MAGIC.len() + 1;
        Some(AssetScriptInfo {
            kind,
            offset: start + header,
            len: len - header,
        })
    }

    fn decode(&self, script: &[u8], info: &AssetScriptInfo) -> TokenResult<AssetPayload> {
        let body = script
            .get(info.offset..info.offset + info.len)
            .ok_or_else(|| TokenError::InvalidPayload("payload out of bounds".to_string()))?;
        Ok(match info.kind {
            AssetScriptKind::Issue => AssetPayload::Issue(Self::decode_body(body)?),
            AssetScriptKind::Reissue => AssetPayload::Reissue(Self::decode_body(body)?),
            AssetScriptKind::Transfer => AssetPayload::Transfer(Self::decode_body(body)?),
            AssetScriptKind::Owner => AssetPayload::Owner(Self::decode_body(body)?),
        })
    }

    fn destination(&self, script: &[u8]) -> Option<Address> {
        if !Self::is_p2pkh_prefix(script) {
            return None;
        }
        Address::from_slice(&script[3..23])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_types::COIN;

    fn holder() -> Address {
        Address::new([7u8; 20])
    }

    #[test]
    fn test_plain_script_is_not_an_asset() {
        let codec = StandardAssetScript;
        let script = StandardAssetScript::p2pkh(&holder());
        assert!(codec.classify(&script).is_none());
        assert_eq!(codec.destination(&script), Some(holder()));
        assert!(codec.decode_script(&script).unwrap().is_none());
    }

    #[test]
    fn test_classify_reports_kind_and_offset() {
        let codec = StandardAssetScript;
        let payload = AssetPayload::Transfer(AssetTransfer::new("GOLD", 5 * COIN));
        let script = StandardAssetScript::build(&holder(), &payload).unwrap();

        let info = codec.classify(&script).unwrap();
        assert_eq!(info.kind, AssetScriptKind::Transfer);
        // prefix, OP_ASSET, one-byte push, magic and kind tag
        assert_eq!(info.offset, P2PKH_LEN + 2 + 4);
        assert_eq!(info.offset + info.len + 1, script.len());

        let (decoded, to) = codec.decode_script(&script).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(to, holder());
    }

    #[test]
    fn test_long_payload_uses_pushdata() {
        let codec = StandardAssetScript;
        let asset = AssetDescriptor::new("GOLD", 1000 * COIN, 0, true).with_ipfs_hash(vec![0xee; 120]);
        let payload = AssetPayload::Issue(asset);
        let script = StandardAssetScript::build(&holder(), &payload).unwrap();

        assert_eq!(script[P2PKH_LEN + 1], OP_PUSHDATA1);
        let info = codec.classify(&script).unwrap();
        assert_eq!(codec.decode(&script, &info).unwrap(), payload);
    }

    #[test]
    fn test_truncated_or_foreign_scripts() {
        let codec = StandardAssetScript;
        let payload = AssetPayload::Owner("GOLD!".to_string());
        let mut script = StandardAssetScript::build(&holder(), &payload).unwrap();

        let mut truncated = script.clone();
        truncated.truncate(script.len() - 3);
        assert!(codec.classify(&truncated).is_none());

        let magic_at = P2PKH_LEN + 2;
        script[magic_at] = b'x';
        assert!(codec.classify(&script).is_none());
    }

    #[test]
    fn test_corrupt_body_is_an_error() {
        let codec = StandardAssetScript;
        let payload = AssetPayload::Reissue(ReissueAsset::new("GOLD", COIN));
        let script = StandardAssetScript::build(&holder(), &payload).unwrap();
        let info = codec.classify(&script).unwrap();

        let short = AssetScriptInfo { len: 2, ..info };
        assert!(matches!(
            codec.decode(&script, &short),
            Err(TokenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_payload_amounts() {
        assert_eq!(AssetPayload::Owner("GOLD!".into()).amount(), OWNER_ASSET_AMOUNT);
        let owner_transfer = AssetPayload::Transfer(AssetTransfer::new("GOLD!", 3 * COIN));
        assert_eq!(owner_transfer.amount(), OWNER_ASSET_AMOUNT);
    }
}
