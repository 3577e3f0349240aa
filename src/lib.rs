//! Contact EMV terminal core.
//!
//! This crate prepares a smart card for transaction processing: it validates
//! the Answer-to-Reset (ATR), discovers which payment applications the card
//! and the terminal mutually support (via the Payment System Environment
//! directory, falling back to a list-of-AIDs probe), and selects one
//! application, parsing its File Control Information (FCI).
//!
//! The EMV specifications are freely available from EMVCo's website; module
//! docs cite the relevant book and section. Everything downstream of
//! application selection (processing options, authentication, cryptograms)
//! is out of scope.

pub mod app;
pub mod atr;
pub mod ber;
pub mod session;
pub mod tal;
pub mod tlv;
pub mod ttl;

#[cfg(feature = "pcsc")]
pub mod pcsc;

#[cfg(test)]
pub(crate) mod emul;

pub use app::{App, Asi, CandidateList, SupportedAid};
pub use session::{Outcome, Session, State, TransactionParams};
pub use ttl::{CardReader, ReaderError, ReaderMode};
