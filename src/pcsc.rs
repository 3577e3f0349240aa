//! PC/SC card reader adapter.
//!
//! PC/SC readers speak whole APDUs, so this is a thin shim: transmit the
//! C-APDU, hand back whatever the card answered. The ATR is available as
//! a reader attribute and feeds [`crate::session::Session::validate_atr`].

use crate::ttl::{CardReader, ReaderError, ReaderMode};

pub struct PcscReader {
    card: pcsc::Card,
}

impl PcscReader {
    pub fn new(card: pcsc::Card) -> Self {
        Self { card }
    }

    /// The ATR the card answered on activation, as recorded by the reader.
    pub fn atr(&self) -> Result<Vec<u8>, ReaderError> {
        Ok(self.card.get_attribute_owned(pcsc::Attribute::AtrString)?)
    }

    pub fn into_card(self) -> pcsc::Card {
        self.card
    }
}

impl CardReader for PcscReader {
    fn mode(&self) -> ReaderMode {
        ReaderMode::Apdu
    }

    fn transceive(&mut self, c_apdu: &[u8]) -> Result<Vec<u8>, ReaderError> {
        let mut rbuf = [0; pcsc::MAX_BUFFER_SIZE];
        let rsp = self.card.transmit(c_apdu, &mut rbuf)?;
        Ok(rsp.to_vec())
    }
}
