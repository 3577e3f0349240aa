//! EMV data elements: tag constants, owned TLV storage, field formats.
//!
//! All data elements are defined in EMV Book 3, Annex A; the dictionary
//! below is the subset this terminal core recognises. Tags are `u32`s
//! holding the raw tag bytes, matching [`crate::ber`].

/// Application Identifier (AID) as reported by the card.
pub const TAG_4F_APPLICATION_IDENTIFIER: u32 = 0x4F;
/// Application Label (ans, 1-16 bytes).
pub const TAG_50_APPLICATION_LABEL: u32 = 0x50;
/// Track 2 Equivalent Data.
pub const TAG_57_TRACK2_EQUIVALENT_DATA: u32 = 0x57;
/// Application Template; one entry of a PSE directory record.
pub const TAG_61_APPLICATION_TEMPLATE: u32 = 0x61;
/// File Control Information (FCI) Template; the SELECT response.
pub const TAG_6F_FCI_TEMPLATE: u32 = 0x6F;
/// Data template wrapping the records of an Application Elementary File.
pub const TAG_70_AEF_DATA_TEMPLATE: u32 = 0x70;
/// Directory Discretionary Template inside an Application Template.
pub const TAG_73_DIRECTORY_DISCRETIONARY_TEMPLATE: u32 = 0x73;
/// Amount, Authorised (Binary).
pub const TAG_81_AMOUNT_AUTHORISED_BINARY: u32 = 0x81;
/// Dedicated File (DF) Name; for payment applications, equal to the AID.
pub const TAG_84_DF_NAME: u32 = 0x84;
/// Application Priority Indicator (b1, low nibble priority, bit 8 confirmation).
pub const TAG_87_APPLICATION_PRIORITY_INDICATOR: u32 = 0x87;
/// Short File Identifier (SFI) of the Directory Elementary File (1-30).
pub const TAG_88_SFI: u32 = 0x88;
/// Transaction Date (n6, YYMMDD).
pub const TAG_9A_TRANSACTION_DATE: u32 = 0x9A;
/// Transaction Type (n2, per ISO 8583:1987 Processing Code).
pub const TAG_9C_TRANSACTION_TYPE: u32 = 0x9C;
/// FCI Proprietary Template.
pub const TAG_A5_FCI_PROPRIETARY_TEMPLATE: u32 = 0xA5;
/// Transaction Currency Code (n3, ISO 4217).
pub const TAG_5F2A_TRANSACTION_CURRENCY_CODE: u32 = 0x5F2A;
/// Language Preference (an2, 2-8 bytes of 2-character codes, eg "enfr").
pub const TAG_5F2D_LANGUAGE_PREFERENCE: u32 = 0x5F2D;
/// Transaction Currency Exponent (n1).
pub const TAG_5F36_TRANSACTION_CURRENCY_EXPONENT: u32 = 0x5F36;
/// Amount, Authorised (Numeric).
pub const TAG_9F02_AMOUNT_AUTHORISED_NUMERIC: u32 = 0x9F02;
/// Amount, Other (Numeric).
pub const TAG_9F03_AMOUNT_OTHER_NUMERIC: u32 = 0x9F03;
/// Amount, Other (Binary).
pub const TAG_9F04_AMOUNT_OTHER_BINARY: u32 = 0x9F04;
/// Application Identifier (AID) as configured in the terminal.
pub const TAG_9F06_AID_TERMINAL: u32 = 0x9F06;
/// Application Selection Registered Proprietary Data.
pub const TAG_9F0A_ASRPD: u32 = 0x9F0A;
/// Issuer Code Table Index (n2, ISO 8859 part for the preferred name).
pub const TAG_9F11_ISSUER_CODE_TABLE_INDEX: u32 = 0x9F11;
/// Application Preferred Name (ans, 1-16 bytes in the issuer code table).
pub const TAG_9F12_APPLICATION_PREFERRED_NAME: u32 = 0x9F12;
/// Transaction Time (n6, HHMMSS).
pub const TAG_9F21_TRANSACTION_TIME: u32 = 0x9F21;
/// Transaction Sequence Counter (n8).
pub const TAG_9F41_TRANSACTION_SEQUENCE_COUNTER: u32 = 0x9F41;
/// Log Entry (SFI and record count of the transaction log).
pub const TAG_9F4D_LOG_ENTRY: u32 = 0x9F4D;
/// Available Offline Spending Amount.
pub const TAG_9F5D_AVAILABLE_OFFLINE_SPENDING_AMOUNT: u32 = 0x9F5D;
/// FCI Issuer Discretionary Data.
pub const TAG_BF0C_FCI_ISSUER_DISCRETIONARY_DATA: u32 = 0xBF0C;

/// An owned tag-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u32,
    pub value: Vec<u8>,
}

/// An ordered list of owned TLVs.
///
/// Used for terminal configuration, transaction parameters and accumulated
/// ICC data; append and find-by-tag are all the access the core needs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TlvList(Vec<Tlv>);

impl TlvList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: u32, value: impl Into<Vec<u8>>) {
        self.0.push(Tlv {
            tag,
            value: value.into(),
        });
    }

    /// Finds the first element with the given tag.
    pub fn find(&self, tag: u32) -> Option<&Tlv> {
        self.0.iter().find(|tlv| tlv.tag == tag)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tlv> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl IntoIterator for TlvList {
    type Item = Tlv;
    type IntoIter = std::vec::IntoIter<Tlv>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TlvList {
    type Item = &'a Tlv;
    type IntoIter = std::slice::Iter<'a, Tlv>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Encodes an unsigned integer as EMV format "n": right-justified packed
/// BCD, zero-padded to `len` bytes.
///
/// See EMV Book 3, 4.3. Digits beyond `len` bytes' worth are truncated on
/// the left, as the original big-endian BCD packing implies.
pub fn encode_numeric(value: u32, len: usize) -> Vec<u8> {
    let mut out = vec![0; len];
    let mut value = value;
    for byte in out.iter_mut().rev() {
        *byte = (((value / 10 % 10) << 4) | (value % 10)) as u8;
        value /= 100;
    }
    out
}

/// Encodes an unsigned integer as EMV format "b": big-endian binary.
pub fn encode_binary(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}
