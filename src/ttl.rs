//! EMV Terminal Transport Layer (TTL).
//!
//! The TTL exchanges Command/Response APDUs (ISO 7816-4) with a card
//! reader and hides the T=0 procedure-byte dances from the layers above:
//! when the card answers SW1=61 the available bytes are fetched with GET
//! RESPONSE, SW1=6C re-issues the command with the corrected Le, and a
//! warning status (SW1=62/63) on a command that expected data triggers a
//! GET RESPONSE whose payload is returned under the original warning
//! status word.
//!
//! Typical PC/SC readers operate on whole APDUs; TPDU-mode readers would
//! need T=0 frame assembly, which no supported reader requires.

use std::fmt;

use tracing::{trace, trace_span, warn};

/// Card reader framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    /// The reader exchanges whole APDUs (PC/SC and friends).
    Apdu,
    /// The reader exchanges raw T=0 TPDU frames.
    Tpdu,
}

/// A card reader failure. Always session-terminating.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("card reader failure: {0}")]
    Failure(String),
    #[cfg(feature = "pcsc")]
    #[error(transparent)]
    Pcsc(#[from] pcsc::Error),
}

/// The reader capability the TTL drives: one blocking request/response
/// exchange at a time.
pub trait CardReader {
    fn mode(&self) -> ReaderMode;

    /// Sends a raw C-APDU and returns the raw R-APDU (data + SW1 SW2).
    fn transceive(&mut self, c_apdu: &[u8]) -> Result<Vec<u8>, ReaderError>;
}

/// A transport-layer failure. Always session-terminating; the session
/// boundary maps these to a "card error" outcome.
#[derive(Debug, thiserror::Error)]
pub enum TtlError {
    #[error("card reader failure")]
    Reader(#[from] ReaderError),
    #[error("card response is shorter than a status word")]
    InvalidResponse,
    #[error("card reader is in TPDU mode, which is not supported")]
    UnsupportedMode,
    #[error("card exchange limit exceeded")]
    ExchangeLimit,
}

/// A status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sw(pub u16);

impl Sw {
    /// Normal processing.
    pub const OK: Sw = Sw(0x9000);
    /// Selected file deactivated; EMV reads this as "blocked".
    pub const SELECTED_FILE_DEACTIVATED: Sw = Sw(0x6283);
    /// Function not supported; an EMV card answers this when blocked.
    pub const FUNCTION_NOT_SUPPORTED: Sw = Sw(0x6A81);
    /// File or application not found.
    pub const FILE_NOT_FOUND: Sw = Sw(0x6A82);
    /// Record not found; ends record iteration.
    pub const RECORD_NOT_FOUND: Sw = Sw(0x6A83);

    pub fn from_bytes(sw1: u8, sw2: u8) -> Sw {
        Sw((sw1 as u16) << 8 | sw2 as u16)
    }

    pub fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for Sw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// A command APDU (ISO 7816-4 cases 1 to 4, short form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; 0x00 means 256 ("give me everything").
    /// None omits the Le field entirely.
    pub le: Option<u8>,
}

impl CApdu {
    /// SELECT by DF name, first occurrence.
    pub fn select(name: &[u8]) -> CApdu {
        CApdu {
            cla: 0x00,
            ins: 0xA4,
            p1: 0x04, // by name
            p2: 0x00, // first or only occurrence
            data: name.to_vec(),
            le: Some(0x00),
        }
    }

    /// SELECT by DF name, next occurrence. Used to enumerate every
    /// application matching a partial AID.
    pub fn select_next(name: &[u8]) -> CApdu {
        CApdu {
            p2: 0x02,
            ..CApdu::select(name)
        }
    }

    /// READ RECORD by record number from the file named by a short file
    /// identifier.
    pub fn read_record(sfi: u8, record: u8) -> CApdu {
        CApdu {
            cla: 0x00,
            ins: 0xB2,
            p1: record,
            p2: (sfi << 3) | 0x04, // P1 is a record number
            data: Vec::new(),
            le: Some(0x00),
        }
    }

    /// GET RESPONSE, fetching `le` bytes the card holds for us.
    pub fn get_response(le: u8) -> CApdu {
        CApdu {
            cla: 0x00,
            ins: 0xC0,
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
            le: Some(le),
        }
    }

    /// Wire image of the command.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= 255, "short APDUs only");
        let mut raw = Vec::with_capacity(6 + self.data.len());
        raw.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            raw.push(self.data.len() as u8);
            raw.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            raw.push(le);
        }
        raw
    }
}

/// A response APDU, split into body and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RApdu {
    pub data: Vec<u8>,
    pub sw: Sw,
}

/// Upper bound on physical exchanges per logical command; a card that
/// keeps answering with procedure bytes past this is broken.
const MAX_EXCHANGES: usize = 8;

/// The transport layer proper. Borrows the reader exclusively for the
/// session's lifetime.
pub struct Ttl<'a> {
    reader: &'a mut dyn CardReader,
    exchanges: usize,
}

impl<'a> Ttl<'a> {
    pub fn new(reader: &'a mut dyn CardReader) -> Self {
        Self {
            reader,
            exchanges: 0,
        }
    }

    /// Number of completed physical exchanges so far. The TAL uses this to
    /// recognise the first command of a session.
    pub fn exchange_count(&self) -> usize {
        self.exchanges
    }

    /// Sends a command and returns the card's final response, having
    /// performed any GET RESPONSE / Le-correction loops along the way.
    pub fn trx(&mut self, c_apdu: &CApdu) -> Result<RApdu, TtlError> {
        match self.reader.mode() {
            ReaderMode::Apdu => self.trx_apdu(c_apdu),
            ReaderMode::Tpdu => Err(TtlError::UnsupportedMode),
        }
    }

    fn trx_apdu(&mut self, c_apdu: &CApdu) -> Result<RApdu, TtlError> {
        let span = trace_span!("trx");
        let _enter = span.enter();

        let mut current = c_apdu.clone();
        let mut body = Vec::new();
        let mut warning_sw: Option<Sw> = None;

        for _ in 0..MAX_EXCHANGES {
            let req = current.encode();
            trace!(req = ?req, ">> TX");
            let rsp = self.reader.transceive(&req)?;
            trace!(rsp = ?rsp, "<< RX");
            self.exchanges += 1;

            if rsp.len() < 2 {
                return Err(TtlError::InvalidResponse);
            }
            let (data, sw_bytes) = rsp.split_at(rsp.len() - 2);
            let sw = Sw::from_bytes(sw_bytes[0], sw_bytes[1]);
            body.extend_from_slice(data);

            match sw.sw1() {
                // Response bytes available: collect them.
                0x61 => current = CApdu::get_response(sw.sw2()),
                // Wrong Le: re-issue with the length the card wants.
                0x6C => current.le = Some(sw.sw2()),
                // Warning status on a command that expected data but got
                // none: the data is still retrievable with GET RESPONSE,
                // and the caller sees the original warning status.
                0x62 | 0x63 if data.is_empty() && warning_sw.is_none() && c_apdu.le.is_some() => {
                    warning_sw = Some(sw);
                    current = CApdu::get_response(0x00);
                }
                _ => {
                    return Ok(RApdu {
                        data: body,
                        sw: warning_sw.unwrap_or(sw),
                    })
                }
            }
        }

        warn!("card keeps asking for another exchange; giving up");
        Err(TtlError::ExchangeLimit)
    }
}
