//! Canonical binary serialization primitives of the XRP Ledger.
//!
//! Fields are written in ascending `(type code, field code)` order, each
//! preceded by a one to three byte header.

use crate::error::XrpError;

/// Serialized type codes.
pub mod type_code {
    pub const UINT16: u8 = 1;
    pub const UINT32: u8 = 2;
    pub const AMOUNT: u8 = 6;
    pub const BLOB: u8 = 7;
    pub const ACCOUNT_ID: u8 = 8;
    pub const OBJECT: u8 = 14;
    pub const ARRAY: u8 = 15;
}

/// A field identifier: serialized type plus field code within that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId {
    pub type_code: u8,
    pub field_code: u8,
}

const fn field(type_code: u8, field_code: u8) -> FieldId {
    FieldId {
        type_code,
        field_code,
    }
}

pub const TRANSACTION_TYPE: FieldId = field(type_code::UINT16, 2);
pub const FLAGS: FieldId = field(type_code::UINT32, 2);
pub const SEQUENCE: FieldId = field(type_code::UINT32, 4);
pub const DESTINATION_TAG: FieldId = field(type_code::UINT32, 14);
pub const LAST_LEDGER_SEQUENCE: FieldId = field(type_code::UINT32, 27);
pub const AMOUNT: FieldId = field(type_code::AMOUNT, 1);
pub const FEE: FieldId = field(type_code::AMOUNT, 8);
pub const SIGNING_PUB_KEY: FieldId = field(type_code::BLOB, 3);
pub const TXN_SIGNATURE: FieldId = field(type_code::BLOB, 4);
pub const MEMO_TYPE: FieldId = field(type_code::BLOB, 12);
pub const MEMO_DATA: FieldId = field(type_code::BLOB, 13);
pub const ACCOUNT: FieldId = field(type_code::ACCOUNT_ID, 1);
pub const DESTINATION: FieldId = field(type_code::ACCOUNT_ID, 3);
pub const OBJECT_END: FieldId = field(type_code::OBJECT, 1);
pub const MEMO: FieldId = field(type_code::OBJECT, 10);
pub const ARRAY_END: FieldId = field(type_code::ARRAY, 1);
pub const MEMOS: FieldId = field(type_code::ARRAY, 9);

/// Largest XRP amount representable on the ledger, in drops (100 billion XRP).
pub const MAX_DROPS: u64 = 100_000_000_000_000_000;

const XRP_POSITIVE_BIT: u64 = 0x4000_0000_0000_0000;
const NOT_XRP_BIT: u64 = 0x8000_0000_0000_0000;

/// Encode a field header.
pub fn encode_field_id(id: FieldId, out: &mut Vec<u8>) {
    let (t, f) = (id.type_code, id.field_code);
    match (t < 16, f < 16) {
        (true, true) => out.push((t << 4) | f),
        (true, false) => out.extend_from_slice(&[t << 4, f]),
        (false, true) => out.extend_from_slice(&[f, t]),
        (false, false) => out.extend_from_slice(&[0, t, f]),
    }
}

/// Encode a variable-length prefix.
pub fn encode_vl_length(len: usize, out: &mut Vec<u8>) -> Result<(), XrpError> {
    match len {
        0..=192 => out.push(len as u8),
        193..=12_480 => {
            let l = len - 193;
            out.push(193 + (l >> 8) as u8);
            out.push((l & 0xff) as u8);
        }
        12_481..=918_744 => {
            let l = len - 12_481;
            out.push(241 + (l >> 16) as u8);
            out.push(((l >> 8) & 0xff) as u8);
            out.push((l & 0xff) as u8);
        }
        _ => {
            return Err(XrpError::EncodingError(format!(
                "variable-length field of {len} bytes is too long"
            )))
        }
    }
    Ok(())
}

/// Encode a native XRP amount.
pub fn encode_xrp_amount(drops: u64) -> Result<[u8; 8], XrpError> {
    if drops > MAX_DROPS {
        return Err(XrpError::InvalidAmount(format!("{drops} drops exceeds supply")));
    }
    Ok((drops | XRP_POSITIVE_BIT).to_be_bytes())
}

/// Cursor over serialized fields.
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], XrpError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| XrpError::DecodeError(format!("truncated at byte {}", self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, XrpError> {
        Ok(self.take(1)?[0])
    }

    pub fn field_id(&mut self) -> Result<FieldId, XrpError> {
        let first = self.byte()?;
        let (mut t, mut f) = (first >> 4, first & 0x0f);
        if t == 0 {
            t = self.byte()?;
        }
        if f == 0 {
            f = self.byte()?;
        }
        Ok(field(t, f))
    }

    pub fn u16(&mut self) -> Result<u16, XrpError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, XrpError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn xrp_amount(&mut self) -> Result<u64, XrpError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        let value = u64::from_be_bytes(raw);
        if value & NOT_XRP_BIT != 0 {
            return Err(XrpError::DecodeError("issued-currency amounts are not supported".into()));
        }
        if value & XRP_POSITIVE_BIT == 0 {
            return Err(XrpError::DecodeError("negative XRP amount".into()));
        }
        Ok(value & !XRP_POSITIVE_BIT)
    }

    pub fn vl_bytes(&mut self) -> Result<&'a [u8], XrpError> {
        let b0 = self.byte()? as usize;
        let len = match b0 {
            0..=192 => b0,
            193..=240 => 193 + ((b0 - 193) << 8) + self.byte()? as usize,
            241..=254 => {
                let b1 = self.byte()? as usize;
                let b2 = self.byte()? as usize;
                12_481 + ((b0 - 241) << 16) + (b1 << 8) + b2
            }
            _ => return Err(XrpError::DecodeError("invalid length prefix".into())),
        };
        self.take(len)
    }

    pub fn account_id(&mut self) -> Result<[u8; 20], XrpError> {
        let bytes = self.vl_bytes()?;
        bytes
            .try_into()
            .map_err(|_| XrpError::DecodeError(format!("account id of {} bytes", bytes.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: FieldId) -> Vec<u8> {
        let mut out = Vec::new();
        encode_field_id(id, &mut out);
        out
    }

    #[test]
    fn field_headers_match_ledger_encoding() {
        assert_eq!(header(TRANSACTION_TYPE), vec![0x12]);
        assert_eq!(header(FLAGS), vec![0x22]);
        assert_eq!(header(SEQUENCE), vec![0x24]);
        assert_eq!(header(DESTINATION_TAG), vec![0x2E]);
        assert_eq!(header(LAST_LEDGER_SEQUENCE), vec![0x20, 0x1B]);
        assert_eq!(header(AMOUNT), vec![0x61]);
        assert_eq!(header(FEE), vec![0x68]);
        assert_eq!(header(SIGNING_PUB_KEY), vec![0x73]);
        assert_eq!(header(TXN_SIGNATURE), vec![0x74]);
        assert_eq!(header(ACCOUNT), vec![0x81]);
        assert_eq!(header(DESTINATION), vec![0x83]);
        assert_eq!(header(MEMOS), vec![0xF9]);
        assert_eq!(header(MEMO), vec![0xEA]);
        assert_eq!(header(MEMO_DATA), vec![0x7D]);
        assert_eq!(header(OBJECT_END), vec![0xE1]);
        assert_eq!(header(ARRAY_END), vec![0xF1]);
    }

    #[test]
    fn field_headers_parse_back() {
        for id in [TRANSACTION_TYPE, LAST_LEDGER_SEQUENCE, DESTINATION, field(16, 3), field(17, 20)] {
            let bytes = header(id);
            assert_eq!(FieldReader::new(&bytes).field_id().unwrap(), id);
        }
    }

    #[test]
    fn vl_length_boundaries() {
        for (len, prefix) in [
            (0usize, vec![0u8]),
            (192, vec![192]),
            (193, vec![193, 0]),
            (12_480, vec![240, 255]),
            (12_481, vec![241, 0, 0]),
        ] {
            let mut out = Vec::new();
            encode_vl_length(len, &mut out).unwrap();
            assert_eq!(out, prefix, "length {len}");

            let mut data = out.clone();
            data.extend(std::iter::repeat(0xAB).take(len));
            assert_eq!(FieldReader::new(&data).vl_bytes().unwrap().len(), len);
        }
        assert!(encode_vl_length(918_745, &mut Vec::new()).is_err());
    }

    #[test]
    fn xrp_amount_sets_positive_bit() {
        assert_eq!(
            encode_xrp_amount(1_000_000).unwrap(),
            [0x40, 0, 0, 0, 0, 0x0F, 0x42, 0x40]
        );
        assert!(encode_xrp_amount(MAX_DROPS + 1).is_err());

        let bytes = encode_xrp_amount(12).unwrap();
        assert_eq!(FieldReader::new(&bytes).xrp_amount().unwrap(), 12);
    }

    #[test]
    fn issued_currency_amount_is_refused() {
        let bytes = 0xD4C3_8D7E_A4C6_8000u64.to_be_bytes();
        assert!(FieldReader::new(&bytes).xrp_amount().is_err());
    }
}
