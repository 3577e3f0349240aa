//! EMV Terminal Application Layer (TAL).
//!
//! Builds the candidate application list (PSE directory first, the
//! list-of-AIDs probe as fallback) and selects applications, classifying
//! every status word the card can answer with.
//!
//! Failures come in two disjoint bands. [`TalError`] is the error band:
//! the session must terminate. The result band ([`PseStatus`],
//! [`Selection`]) reports why an operation did not succeed while the
//! session may continue; the orchestrator decides the next step.
//!
//! See EMV Book 1, 12.3 (candidate list) and 12.4 (selection).

use tracing::{debug, info, trace_span, warn};

use crate::app::{App, Asi, CandidateList, SupportedAid};
use crate::ber;
use crate::tlv;
use crate::ttl::{CApdu, Sw, Ttl, TtlError};

/// DF name of the Payment System Environment directory.
pub const PSE_NAME: &[u8] = b"1PAY.SYS.DDF01";

/// Defensive bound on P2=02 "next occurrence" enumeration per partial AID.
const MAX_OCCURRENCES: usize = 16;

/// Session-terminating TAL failures.
#[derive(Debug, thiserror::Error)]
pub enum TalError {
    #[error("internal error")]
    Internal,
    #[error("terminal transport layer failure")]
    Ttl(#[from] TtlError),
    #[error("card blocked")]
    CardBlocked,
}

/// Why PSE processing stopped, when the session may still continue with
/// the list-of-AIDs probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseStatus {
    /// The directory was read; matching applications (possibly none) were
    /// appended to the candidate list.
    Read,
    /// No PSE on this card.
    NotFound,
    /// The PSE exists but is deactivated.
    Blocked,
    /// SELECT answered an unexpected status word.
    SelectFailed,
    /// The PSE FCI didn't decode.
    FciParseFailed,
    /// The FCI carries no usable directory SFI.
    SfiNotFound,
}

/// Outcome of selecting one application.
#[derive(Debug)]
pub enum Selection {
    Selected {
        app: App,
        /// Flattened FCI Issuer Discretionary Data (BF0C children).
        fci_data: tlv::TlvList,
    },
    /// 6A81/6A82: the application is gone.
    NotFound,
    /// 6283: the application is blocked.
    Blocked,
    /// Unexpected status word.
    Failed,
    /// The FCI didn't decode or validate.
    FciParseFailed,
}

/// The PSE's own FCI: the handle to the directory file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Pse {
    /// 0x88: SFI of the Directory Elementary File. (Values 1-30.)
    pub sfi: u8,
    /// 0x5F2D: Language Preference. (an2, 2-8 bytes)
    /// List of 2-character language codes, eg. "enfr" (English, French).
    pub lang_prefs: Option<String>,
}

/// Why the PSE's FCI was unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PseFciError {
    #[error("PSE FCI didn't parse")]
    Malformed,
    #[error("PSE FCI has no usable directory SFI")]
    Sfi,
}

impl TryFrom<&[u8]> for Pse {
    type Error = PseFciError;

    fn try_from(data: &[u8]) -> Result<Self, PseFciError> {
        let fci = ber::find(data, tlv::TAG_6F_FCI_TEMPLATE).ok_or(PseFciError::Malformed)?;
        let pt = ber::find(fci.value, tlv::TAG_A5_FCI_PROPRIETARY_TEMPLATE).ok_or(PseFciError::Malformed)?;

        let mut pse = Self::default();
        for tlv in ber::iter(pt.value).flatten() {
            match tlv.tag {
                tlv::TAG_88_SFI => pse.sfi = tlv.value.first().copied().unwrap_or(0),
                tlv::TAG_5F2D_LANGUAGE_PREFERENCE => {
                    pse.lang_prefs = Some(String::from_utf8_lossy(tlv.value).into_owned());
                }
                _ => {}
            }
        }

        if !(1..=30).contains(&pse.sfi) {
            return Err(PseFciError::Sfi);
        }
        Ok(pse)
    }
}

/// Reads the Payment System Environment and appends every mutually
/// supported application to the candidate list.
///
/// See EMV Book 1, 12.3.2.
pub fn read_pse(
    ttl: &mut Ttl<'_>,
    supported_aids: &[SupportedAid],
    list: &mut CandidateList,
) -> Result<PseStatus, TalError> {
    let span = trace_span!("read_pse");
    let _enter = span.enter();

    let first_command = ttl.exchange_count() == 0;
    let rsp = ttl.trx(&CApdu::select(PSE_NAME))?;
    match rsp.sw {
        Sw::OK => {}
        // "Function not supported" from a card that has answered nothing
        // else yet is how blocked cards present themselves.
        Sw::FUNCTION_NOT_SUPPORTED if first_command => return Err(TalError::CardBlocked),
        Sw::FUNCTION_NOT_SUPPORTED | Sw::FILE_NOT_FOUND => return Ok(PseStatus::NotFound),
        Sw::SELECTED_FILE_DEACTIVATED => return Ok(PseStatus::Blocked),
        sw => {
            warn!(%sw, "PSE selection failed");
            return Ok(PseStatus::SelectFailed);
        }
    }

    let pse = match Pse::try_from(rsp.data.as_slice()) {
        Ok(pse) => pse,
        Err(PseFciError::Malformed) => {
            warn!("PSE FCI didn't parse");
            return Ok(PseStatus::FciParseFailed);
        }
        Err(PseFciError::Sfi) => {
            warn!("PSE FCI has no usable directory SFI");
            return Ok(PseStatus::SfiNotFound);
        }
    };
    debug!(sfi = pse.sfi, lang_prefs = ?pse.lang_prefs, "PSE selected");

    // Walk the directory records until the card reports end of file.
    for record in 1..=u8::MAX {
        let rsp = ttl.trx(&CApdu::read_record(pse.sfi, record))?;
        match rsp.sw {
            Sw::OK => {}
            Sw::RECORD_NOT_FOUND => break,
            sw => {
                warn!(record, %sw, "couldn't read PSE record; skipping it");
                continue;
            }
        }

        // Each record is an AEF Data Template (70) holding one or more
        // Application Templates (61).
        let Some(aef) = ber::find(&rsp.data, tlv::TAG_70_AEF_DATA_TEMPLATE) else {
            warn!(record, "PSE record is not an AEF; skipping it");
            continue;
        };
        for entry in ber::iter(aef.value) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(record, %err, "malformed PSE record; skipping the rest of it");
                    break;
                }
            };
            if entry.tag != tlv::TAG_61_APPLICATION_TEMPLATE {
                continue;
            }
            match App::from_pse_entry(entry.value) {
                Ok(app) => {
                    if supported_aids.iter().any(|entry| entry.matches(&app.aid)) {
                        info!(%app, "found mutually supported application");
                        list.push(app);
                    } else {
                        debug!(%app, "application is not supported by this terminal");
                    }
                }
                Err(err) => warn!(record, %err, "skipping malformed application template"),
            }
        }
    }

    Ok(PseStatus::Read)
}

/// Probes the terminal's supported AIDs in configuration order and appends
/// every application the card admits to.
///
/// See EMV Book 1, 12.3.3.
pub fn find_supported_apps(
    ttl: &mut Ttl<'_>,
    supported_aids: &[SupportedAid],
    list: &mut CandidateList,
) -> Result<(), TalError> {
    let span = trace_span!("find_supported_apps");
    let _enter = span.enter();

    for entry in supported_aids {
        for occurrence in 0..MAX_OCCURRENCES {
            let cmd = if occurrence == 0 {
                CApdu::select(&entry.aid)
            } else {
                CApdu::select_next(&entry.aid)
            };
            let rsp = ttl.trx(&cmd)?;
            match rsp.sw {
                Sw::OK => match App::from_fci(&rsp.data) {
                    Ok((app, _)) => {
                        info!(%app, "found mutually supported application");
                        list.push(app);
                    }
                    Err(err) => {
                        warn!(aid = %hex::encode_upper(&entry.aid), %err, "skipping application with malformed FCI");
                    }
                },
                // A blocked card answers 6A81 to the first SELECT of an
                // AID; once the AID has answered something else, 6A81
                // merely ends its enumeration.
                Sw::FUNCTION_NOT_SUPPORTED if occurrence == 0 => return Err(TalError::CardBlocked),
                Sw::FUNCTION_NOT_SUPPORTED | Sw::FILE_NOT_FOUND => break,
                Sw::SELECTED_FILE_DEACTIVATED => {
                    warn!(aid = %hex::encode_upper(&entry.aid), "application is blocked");
                    break;
                }
                sw => {
                    warn!(aid = %hex::encode_upper(&entry.aid), %sw, "application selection failed");
                    break;
                }
            }

            // Only partial matches can name several card applications.
            if entry.asi == Asi::Exact {
                break;
            }
        }
    }

    Ok(())
}

/// Selects one application by AID and validates its FCI.
///
/// See EMV Book 1, 12.4.
pub fn select_app(ttl: &mut Ttl<'_>, aid: &[u8]) -> Result<Selection, TalError> {
    let span = trace_span!("select_app");
    let _enter = span.enter();

    if !(5..=16).contains(&aid.len()) {
        return Err(TalError::Internal);
    }

    let rsp = ttl.trx(&CApdu::select(aid))?;
    match rsp.sw {
        Sw::OK => {}
        Sw::SELECTED_FILE_DEACTIVATED => {
            warn!(aid = %hex::encode_upper(aid), "application is blocked");
            return Ok(Selection::Blocked);
        }
        Sw::FUNCTION_NOT_SUPPORTED | Sw::FILE_NOT_FOUND => {
            debug!(aid = %hex::encode_upper(aid), "application not found");
            return Ok(Selection::NotFound);
        }
        sw => {
            warn!(aid = %hex::encode_upper(aid), %sw, "application selection failed");
            return Ok(Selection::Failed);
        }
    }

    match App::from_fci(&rsp.data) {
        Ok((app, fci_data)) => {
            info!(%app, "application selected");
            Ok(Selection::Selected { app, fci_data })
        }
        Err(err) => {
            warn!(aid = %hex::encode_upper(aid), %err, "selected application has a malformed FCI");
            Ok(Selection::FciParseFailed)
        }
    }
}
