//! Scripted card-reader emulator for tests.
//!
//! A script is the exact sequence of exchanges a test expects: each entry
//! pairs the C-APDU the code under test must send with the canned R-APDU
//! the "card" answers. Any deviation from the script fails the test, and
//! [`EmulReader::done`] asserts the whole interaction ran to completion.

use crate::ttl::{CardReader, ReaderError, ReaderMode};

pub struct Xpdu {
    pub c_apdu: Vec<u8>,
    pub r_apdu: Vec<u8>,
}

pub fn xpdu(c_apdu: &[u8], r_apdu: &[u8]) -> Xpdu {
    Xpdu {
        c_apdu: c_apdu.to_vec(),
        r_apdu: r_apdu.to_vec(),
    }
}

pub struct EmulReader {
    script: Vec<Xpdu>,
    cursor: usize,
}

impl EmulReader {
    pub fn new(script: Vec<Xpdu>) -> Self {
        Self { script, cursor: 0 }
    }

    /// True when every scripted exchange has been consumed.
    pub fn done(&self) -> bool {
        self.cursor == self.script.len()
    }
}

impl CardReader for EmulReader {
    fn mode(&self) -> ReaderMode {
        ReaderMode::Apdu
    }

    fn transceive(&mut self, c_apdu: &[u8]) -> Result<Vec<u8>, ReaderError> {
        let Some(next) = self.script.get(self.cursor) else {
            panic!("unscripted exchange: {}", hex::encode_upper(c_apdu));
        };
        assert_eq!(
            hex::encode_upper(c_apdu),
            hex::encode_upper(&next.c_apdu),
            "C-APDU {} deviates from the script",
            self.cursor,
        );
        self.cursor += 1;
        Ok(next.r_apdu.clone())
    }
}

/// A reader whose card is gone.
pub struct FailingReader;

impl CardReader for FailingReader {
    fn mode(&self) -> ReaderMode {
        ReaderMode::Apdu
    }

    fn transceive(&mut self, _c_apdu: &[u8]) -> Result<Vec<u8>, ReaderError> {
        Err(ReaderError::Failure("card removed".into()))
    }
}

/// A reader stuck in TPDU mode.
pub struct TpduReader;

impl CardReader for TpduReader {
    fn mode(&self) -> ReaderMode {
        ReaderMode::Tpdu
    }

    fn transceive(&mut self, _c_apdu: &[u8]) -> Result<Vec<u8>, ReaderError> {
        unreachable!("the TTL never drives a TPDU reader");
    }
}
