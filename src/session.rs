//! High-level EMV session orchestration.
//!
//! A [`Session`] owns the terminal-side state for one card: configuration
//! and transaction parameter TLVs, the supported-AIDs list, accumulated
//! ICC data, and the selected application. It composes the ATR decoder,
//! the transport and the application layer into the session flow, and is
//! the single place where the lower layers' error band is mapped onto the
//! caller-facing [`Outcome`].
//!
//! The flow is: [`Session::validate_atr`] on card activation, then
//! [`Session::build_candidate_list`], then [`Session::select_application`]
//! (repeatedly, while it answers [`Outcome::TryAgain`]).

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::{debug, info, trace_span, warn};

use crate::app::{App, CandidateList, SupportedAid};
use crate::atr::{self, AtrInfo};
use crate::tal::{self, PseStatus, Selection, TalError};
use crate::tlv::{self, TlvList};
use crate::ttl::{CardReader, Ttl};

/// Outcome of a session step, as surfaced to the terminal application.
///
/// The first four map onto the cardholder messages of EMV Book 4, 11.2;
/// the last two are programmer faults and never reach a cardholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Outcome {
    /// Terminate the session; something card-side is broken. (Message 06)
    #[error("card error")]
    CardError,
    /// Terminate the session; the card is blocked. (Not in the EMV spec.)
    #[error("card blocked")]
    CardBlocked,
    /// Terminate the session; nothing on this card is mutually supported.
    /// (Message 0C)
    #[error("not accepted")]
    NotAccepted,
    /// Re-enter application selection with the remaining candidates.
    /// (Message 13)
    #[error("try again")]
    TryAgain,
    #[error("internal error")]
    InternalError,
    #[error("invalid parameter")]
    InvalidParameter,
}

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AtrValidated,
    CandidateListBuilt,
    ApplicationSelected,
    /// Ended with [`Outcome::CardError`] or [`Outcome::CardBlocked`].
    Terminated(Outcome),
    NotAccepted,
}

/// Terminal transaction parameters, loaded into the params list before
/// processing starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    /// Transaction Sequence Counter (9F41).
    pub sequence_counter: u32,
    /// Transaction Type (9C), per ISO 8583:1987 Processing Code.
    pub transaction_type: u8,
    /// Amount, Authorised (81 / 9F02), without decimal separator.
    pub amount: u32,
    /// Amount, Other (9F04 / 9F03); non-zero only for cashback.
    pub amount_other: u32,
    /// Transaction Currency Code (5F2A), ISO 4217 numeric.
    pub currency_code: u16,
    /// Transaction Currency Exponent (5F36).
    pub currency_exponent: u8,
    /// Local date and time of the transaction (9A / 9F21).
    pub at: NaiveDateTime,
}

fn bcd(value: u32) -> u8 {
    (((value / 10) % 10) << 4 | (value % 10)) as u8
}

/// The terminal side of one card session.
pub struct Session<'a> {
    ttl: Ttl<'a>,
    /// Terminal configuration data elements (capabilities, identifiers).
    pub config: TlvList,
    /// AIDs this terminal supports, in probe order.
    pub supported_aids: Vec<SupportedAid>,
    /// Current transaction parameters.
    pub params: TlvList,
    /// Data accumulated from the card.
    pub icc: TlvList,
    /// The application a successful selection produced.
    pub selected_app: Option<App>,
    state: State,
}

impl<'a> Session<'a> {
    /// Starts a session over a reader, holding it exclusively until the
    /// session is dropped.
    pub fn new(reader: &'a mut dyn CardReader) -> Self {
        Self {
            ttl: Ttl::new(reader),
            config: TlvList::new(),
            supported_aids: Vec::new(),
            params: TlvList::new(),
            icc: TlvList::new(),
            selected_app: None,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Loads the transaction parameters into [`Session::params`].
    pub fn load_params(&mut self, txn: &TransactionParams) {
        self.params.push(
            tlv::TAG_9F41_TRANSACTION_SEQUENCE_COUNTER,
            tlv::encode_numeric(txn.sequence_counter, 4),
        );

        let (date, time) = (txn.at.date(), txn.at.time());
        self.params.push(
            tlv::TAG_9A_TRANSACTION_DATE,
            vec![
                bcd(date.year().rem_euclid(100) as u32),
                bcd(date.month()),
                bcd(date.day()),
            ],
        );
        self.params.push(
            tlv::TAG_9F21_TRANSACTION_TIME,
            vec![bcd(time.hour()), bcd(time.minute()), bcd(time.second())],
        );

        self.params.push(
            tlv::TAG_5F2A_TRANSACTION_CURRENCY_CODE,
            tlv::encode_numeric(txn.currency_code as u32, 2),
        );
        self.params
            .push(tlv::TAG_5F36_TRANSACTION_CURRENCY_EXPONENT, vec![txn.currency_exponent]);

        self.params.push(tlv::TAG_9C_TRANSACTION_TYPE, vec![txn.transaction_type]);
        self.params
            .push(tlv::TAG_9F02_AMOUNT_AUTHORISED_NUMERIC, tlv::encode_numeric(txn.amount, 6));
        self.params
            .push(tlv::TAG_81_AMOUNT_AUTHORISED_BINARY, tlv::encode_binary(txn.amount).to_vec());
        self.params
            .push(tlv::TAG_9F03_AMOUNT_OTHER_NUMERIC, tlv::encode_numeric(txn.amount_other, 6));
        self.params
            .push(tlv::TAG_9F04_AMOUNT_OTHER_BINARY, tlv::encode_binary(txn.amount_other).to_vec());
    }

    /// Validates the ATR the card answered on activation.
    ///
    /// Any ISO 7816-3 or EMV Level 1 violation is a card-side defect and
    /// terminates the session with [`Outcome::CardError`].
    pub fn validate_atr(&mut self, data: &[u8]) -> Result<AtrInfo, Outcome> {
        if data.is_empty() {
            return Err(Outcome::InvalidParameter);
        }

        let info = match atr::parse(data) {
            Ok(info) => info,
            Err(err) => {
                warn!(%err, "failed to parse ATR; terminate session");
                self.state = State::Terminated(Outcome::CardError);
                return Err(Outcome::CardError);
            }
        };
        if let Err(err) = info.validate_emv() {
            warn!(%err, "ATR is not allowed by EMV; terminate session");
            self.state = State::Terminated(Outcome::CardError);
            return Err(Outcome::CardError);
        }

        self.state = State::AtrValidated;
        Ok(info)
    }

    /// Builds the candidate application list: PSE first, the list-of-AIDs
    /// probe when the PSE yields nothing, then the priority sort.
    ///
    /// See EMV Book 1, 12.3.
    pub fn build_candidate_list(&mut self) -> Result<CandidateList, Outcome> {
        let span = trace_span!("build_candidate_list");
        let _enter = span.enter();

        let mut list = CandidateList::new();

        info!("SELECT Payment System Environment (PSE)");
        match tal::read_pse(&mut self.ttl, &self.supported_aids, &mut list) {
            Ok(PseStatus::Read) => {}
            Ok(status) => debug!(?status, "couldn't process PSE; continue session"),
            Err(err) => return Err(self.terminate(err, "failed to read PSE")),
        }

        // If the PSE failed or listed nothing usable, probe the supported
        // AIDs one by one. See EMV Book 1, 12.3.2, step 5.
        if list.is_empty() {
            info!("discover list of AIDs");
            if let Err(err) = tal::find_supported_apps(&mut self.ttl, &self.supported_aids, &mut list) {
                return Err(self.terminate(err, "failed to find supported AIDs"));
            }
        }

        // No mutually supported applications; the card is not accepted.
        // See EMV Book 1, 12.4, step 1.
        if list.is_empty() {
            info!("candidate list empty");
            self.state = State::NotAccepted;
            return Err(Outcome::NotAccepted);
        }

        // See EMV Book 1, 12.4, step 4.
        list.sort_by_priority();
        self.state = State::CandidateListBuilt;
        Ok(list)
    }

    /// Selects the candidate at `index`, removing it from the list either
    /// way. On success the application built from the returned FCI becomes
    /// [`Session::selected_app`] and the FCI's issuer discretionary data
    /// lands in [`Session::icc`].
    ///
    /// [`Outcome::TryAgain`] sends the cardholder back to the remaining
    /// candidates; it is promoted to [`Outcome::NotAccepted`] once the
    /// list is exhausted. See EMV Book 1, 12.4 and Book 4, 11.3.
    pub fn select_application(&mut self, list: &mut CandidateList, index: usize) -> Result<&App, Outcome> {
        let span = trace_span!("select_application");
        let _enter = span.enter();

        let Some(candidate) = list.remove(index) else {
            return Err(Outcome::InvalidParameter);
        };
        // Only the AID survives; the selected application is rebuilt from
        // the FCI the card answers with.
        let aid = candidate.aid;

        match tal::select_app(&mut self.ttl, &aid) {
            Ok(Selection::Selected { app, fci_data }) => {
                for tlv in fci_data {
                    self.icc.push(tlv.tag, tlv.value);
                }
                self.state = State::ApplicationSelected;
                Ok(&*self.selected_app.insert(app))
            }
            Ok(selection) => {
                debug!(?selection, "failed to select application; continue session");
                if list.is_empty() {
                    info!("candidate list empty");
                    self.state = State::NotAccepted;
                    Err(Outcome::NotAccepted)
                } else {
                    self.state = State::CandidateListBuilt;
                    Err(Outcome::TryAgain)
                }
            }
            Err(err) => Err(self.terminate(err, "error during application selection")),
        }
    }

    fn terminate(&mut self, err: TalError, context: &str) -> Outcome {
        warn!(%err, "{}; terminate session", context);
        let outcome = match err {
            TalError::CardBlocked => Outcome::CardBlocked,
            TalError::Ttl(_) => Outcome::CardError,
            TalError::Internal => Outcome::InternalError,
        };
        if matches!(outcome, Outcome::CardError | Outcome::CardBlocked) {
            self.state = State::Terminated(outcome);
        }
        outcome
    }
}
