//! EMV applications and the candidate application list.
//!
//! Applications surface twice during selection: as Application Templates
//! (tag 61) inside PSE directory records, and as the FCI (tag 6F) a
//! successful SELECT returns. Both decode into an [`App`]; the candidate
//! list collects the ones the terminal also supports, ordered by the
//! card's Application Priority Indicator.
//!
//! See EMV Book 1, 12.2-12.4.

use tracing::trace;

use crate::ber;
use crate::tlv::{self, TlvList};

/// Application Selection Indicator: how a terminal AID matches card AIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asi {
    /// The card AID must equal the terminal AID.
    Exact,
    /// The terminal AID must be a prefix of the card AID.
    Partial,
}

/// One entry of the terminal's supported-AIDs configuration (field 9F06
/// plus its ASI flag). Read-only during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedAid {
    pub aid: Vec<u8>,
    pub asi: Asi,
}

impl SupportedAid {
    pub fn exact(aid: impl Into<Vec<u8>>) -> Self {
        Self {
            aid: aid.into(),
            asi: Asi::Exact,
        }
    }

    pub fn partial(aid: impl Into<Vec<u8>>) -> Self {
        Self {
            aid: aid.into(),
            asi: Asi::Partial,
        }
    }

    /// Whether a card application is mutually supported under this entry.
    pub fn matches(&self, card_aid: &[u8]) -> bool {
        match self.asi {
            Asi::Exact => self.aid == card_aid,
            Asi::Partial => card_aid.starts_with(&self.aid),
        }
    }
}

/// An application template or FCI that doesn't decode into an [`App`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("application template has no AID")]
    MissingAid,
    #[error("AID must be 5 to 16 bytes")]
    BadAid,
    #[error("select response carries no FCI template")]
    MissingFci,
    #[error("FCI template has no DF name")]
    MissingDfName,
    #[error(transparent)]
    Ber(#[from] ber::Error),
}

/// A candidate (or selected) card application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// AID as reported by the card (tag 4F in the PSE, the DF name for a
    /// selected application).
    pub aid: Vec<u8>,
    /// Application Label (tag 50).
    pub label: Option<String>,
    /// Application Preferred Name (tag 9F12), raw bytes in the issuer's
    /// code table.
    pub preferred_name: Option<Vec<u8>>,
    /// Issuer Code Table Index (tag 9F11): the ISO 8859 part the preferred
    /// name is encoded in.
    pub issuer_code_table: Option<u8>,
    /// Priority from the low nibble of tag 87; 1 is first, 0 means the
    /// card expressed no priority.
    pub priority: u8,
    /// Bit 8 of tag 87: cardholder confirmation is required even for a
    /// lone candidate.
    pub confirmation_required: bool,
    /// Language Preference (tag 5F2D), only present on a selected
    /// application's FCI.
    pub lang_prefs: Option<String>,
    /// What a cardholder display should call this application.
    pub display_name: String,
}

/// Maps an Issuer Code Table Index to a character encoding.
///
/// EMV names ISO 8859 parts; encoding_rs offers the windows supersets for
/// parts 1, 9 and 11, which decode identically for the code points cards
/// actually use.
fn code_table(index: u8) -> Option<&'static encoding_rs::Encoding> {
    match index {
        1 => Some(encoding_rs::WINDOWS_1252),
        2 => Some(encoding_rs::ISO_8859_2),
        3 => Some(encoding_rs::ISO_8859_3),
        4 => Some(encoding_rs::ISO_8859_4),
        5 => Some(encoding_rs::ISO_8859_5),
        6 => Some(encoding_rs::ISO_8859_6),
        7 => Some(encoding_rs::ISO_8859_7),
        8 => Some(encoding_rs::ISO_8859_8),
        9 => Some(encoding_rs::WINDOWS_1254),
        10 => Some(encoding_rs::ISO_8859_10),
        11 => Some(encoding_rs::WINDOWS_874),
        13 => Some(encoding_rs::ISO_8859_13),
        14 => Some(encoding_rs::ISO_8859_14),
        15 => Some(encoding_rs::ISO_8859_15),
        16 => Some(encoding_rs::ISO_8859_16),
        _ => None,
    }
}

struct Fields {
    aid: Option<Vec<u8>>,
    label: Option<String>,
    preferred_name: Option<Vec<u8>>,
    issuer_code_table: Option<u8>,
    priority_indicator: u8,
    lang_prefs: Option<String>,
}

impl Fields {
    fn new() -> Self {
        Self {
            aid: None,
            label: None,
            preferred_name: None,
            issuer_code_table: None,
            priority_indicator: 0,
            lang_prefs: None,
        }
    }

    fn collect(&mut self, tlv: &ber::Tlv<'_>) {
        match tlv.tag {
            tlv::TAG_50_APPLICATION_LABEL => {
                self.label = Some(String::from_utf8_lossy(tlv.value).into_owned());
            }
            tlv::TAG_87_APPLICATION_PRIORITY_INDICATOR => {
                self.priority_indicator = tlv.value.first().copied().unwrap_or(0);
            }
            tlv::TAG_9F11_ISSUER_CODE_TABLE_INDEX => {
                self.issuer_code_table = tlv.value.first().copied();
            }
            tlv::TAG_9F12_APPLICATION_PREFERRED_NAME => {
                self.preferred_name = Some(tlv.value.to_vec());
            }
            tlv::TAG_5F2D_LANGUAGE_PREFERENCE => {
                self.lang_prefs = Some(String::from_utf8_lossy(tlv.value).into_owned());
            }
            _ => trace!(tag = format_args!("{:X}", tlv.tag), "ignoring field"),
        }
    }

    fn into_app(self) -> Result<App, AppError> {
        let aid = self.aid.ok_or(AppError::MissingAid)?;
        if !(5..=16).contains(&aid.len()) {
            return Err(AppError::BadAid);
        }

        // Prefer the issuer's own name when we can decode it, fall back to
        // the plain label, and as a last resort show the AID itself.
        let display_name = match (&self.preferred_name, self.issuer_code_table.and_then(code_table)) {
            (Some(name), Some(encoding)) => {
                let (name, _, _) = encoding.decode(name);
                name.into_owned()
            }
            _ => match &self.label {
                Some(label) => label.clone(),
                None => hex::encode_upper(&aid),
            },
        };

        Ok(App {
            aid,
            label: self.label,
            preferred_name: self.preferred_name,
            issuer_code_table: self.issuer_code_table,
            priority: self.priority_indicator & 0x0F,
            confirmation_required: self.priority_indicator & 0x80 != 0,
            lang_prefs: self.lang_prefs,
            display_name,
        })
    }
}

impl App {
    /// Decodes the contents of a PSE Application Template (tag 61).
    ///
    /// See EMV Book 1, 12.2.3.
    pub fn from_pse_entry(template: &[u8]) -> Result<App, AppError> {
        let mut fields = Fields::new();
        for tlv in ber::iter(template) {
            let tlv = tlv?;
            if tlv.tag == tlv::TAG_4F_APPLICATION_IDENTIFIER {
                fields.aid = Some(tlv.value.to_vec());
            } else {
                fields.collect(&tlv);
            }
        }
        fields.into_app()
    }

    /// Decodes a SELECT response into an application, plus the flattened
    /// children of the FCI Issuer Discretionary Data template (BF0C),
    /// which the session accumulates as ICC data.
    ///
    /// See EMV Book 1, 12.3.4 (PSE FCI) and 12.4 (ADF FCI).
    pub fn from_fci(data: &[u8]) -> Result<(App, TlvList), AppError> {
        let fci = ber::find(data, tlv::TAG_6F_FCI_TEMPLATE).ok_or(AppError::MissingFci)?;
        let df_name = ber::find(fci.value, tlv::TAG_84_DF_NAME).ok_or(AppError::MissingDfName)?;

        let mut fields = Fields::new();
        fields.aid = Some(df_name.value.to_vec());
        let mut discretionary = TlvList::new();

        if let Some(pt) = ber::find(fci.value, tlv::TAG_A5_FCI_PROPRIETARY_TEMPLATE) {
            for tlv in ber::iter(pt.value) {
                let tlv = tlv?;
                if tlv.tag == tlv::TAG_BF0C_FCI_ISSUER_DISCRETIONARY_DATA {
                    for child in ber::iter(tlv.value) {
                        let child = child?;
                        discretionary.push(child.tag, child.value);
                    }
                } else {
                    fields.collect(&tlv);
                }
            }
        }

        Ok((fields.into_app()?, discretionary))
    }
}

impl std::fmt::Display for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, hex::encode_upper(&self.aid))?;
        if self.priority != 0 {
            write!(f, ", priority {}", self.priority)?;
        }
        Ok(())
    }
}

/// The candidate application list: every mutually supported application
/// found on the card, in priority order after [`CandidateList::sort_by_priority`].
#[derive(Debug, Default)]
pub struct CandidateList {
    apps: Vec<App>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, app: App) {
        self.apps.push(app);
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&App> {
        self.apps.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, App> {
        self.apps.iter()
    }

    /// Removes the entry at `index`, transferring ownership to the caller.
    pub fn remove(&mut self, index: usize) -> Option<App> {
        if index < self.apps.len() {
            Some(self.apps.remove(index))
        } else {
            None
        }
    }

    /// Sorts candidates by the card's priority indicator: 1 to 15 in
    /// ascending order, then the entries without a priority in discovery
    /// order. Stable, so equal priorities keep their discovery order too.
    ///
    /// See EMV Book 1, 12.4, step 4.
    pub fn sort_by_priority(&mut self) {
        self.apps.sort_by_key(|app| match app.priority {
            0 => 0x10,
            priority => priority,
        });
    }

    /// Whether the cardholder has to pick or confirm: more than one
    /// candidate, or a lone candidate demanding explicit confirmation.
    ///
    /// See EMV Book 1, 12.4 and Book 4, 11.3.
    pub fn selection_is_required(&self) -> bool {
        match self.apps.as_slice() {
            [] => false,
            [only] => only.confirmation_required,
            _ => true,
        }
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a App;
    type IntoIter = std::slice::Iter<'a, App>;

    fn into_iter(self) -> Self::IntoIter {
        self.apps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str, priority: u8) -> App {
        App {
            aid: vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10],
            label: Some(name.into()),
            preferred_name: None,
            issuer_code_table: None,
            priority,
            confirmation_required: false,
            lang_prefs: None,
            display_name: name.into(),
        }
    }

    #[test]
    fn test_supported_aid_matching() {
        let visa = SupportedAid::partial(vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10]);
        assert!(visa.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10]));
        assert!(visa.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]));
        assert!(!visa.matches(&[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10]));
        assert!(!visa.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03]));

        let electron = SupportedAid::exact(vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10]);
        assert!(electron.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10]));
        assert!(!electron.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20]));
        assert!(!electron.matches(&[0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x10, 0x01]));
    }

    #[test]
    fn test_from_pse_entry() {
        // Application Template from a PSE directory record: VISA CREDIT
        // with priority 1 and a preferred name.
        let app = App::from_pse_entry(&[
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x50, 0x0B, 0x56, 0x49, 0x53,
            0x41, 0x20, 0x43, 0x52, 0x45, 0x44, 0x49, 0x54, 0x87, 0x01, 0x01, 0x9F, 0x12, 0x0B,
            0x56, 0x49, 0x53, 0x41, 0x20, 0x43, 0x52, 0x45, 0x44, 0x49, 0x54,
        ])
        .expect("couldn't decode application template");
        assert_eq!(app.aid, vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]);
        assert_eq!(app.label.as_deref(), Some("VISA CREDIT"));
        assert_eq!(app.preferred_name.as_deref(), Some(&b"VISA CREDIT"[..]));
        assert_eq!(app.priority, 1);
        assert!(!app.confirmation_required);
        // No issuer code table, so the label wins.
        assert_eq!(app.display_name, "VISA CREDIT");
    }

    #[test]
    fn test_from_pse_entry_confirmation_bit() {
        let app = App::from_pse_entry(&[
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x87, 0x01, 0x81,
        ])
        .expect("couldn't decode application template");
        assert_eq!(app.priority, 1);
        assert!(app.confirmation_required);
        // Neither name nor label: fall back to the AID.
        assert_eq!(app.display_name, "A0000000031010");
    }

    #[test]
    fn test_from_pse_entry_missing_aid() {
        assert_eq!(
            App::from_pse_entry(&[0x50, 0x04, 0x56, 0x49, 0x53, 0x41]),
            Err(AppError::MissingAid)
        );
    }

    #[test]
    fn test_from_pse_entry_bad_aid() {
        assert_eq!(
            App::from_pse_entry(&[0x4F, 0x04, 0xA0, 0x00, 0x00, 0x00]),
            Err(AppError::BadAid)
        );
    }

    #[test]
    fn test_display_name_code_table() {
        // Preferred name in ISO 8859-15, with the euro sign at 0xA4.
        let app = App::from_pse_entry(&[
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x50, 0x04, 0x43, 0x41, 0x46,
            0x45, 0x9F, 0x11, 0x01, 0x0F, 0x9F, 0x12, 0x05, 0x43, 0x61, 0x66, 0xE9, 0xA4,
        ])
        .expect("couldn't decode application template");
        assert_eq!(app.issuer_code_table, Some(15));
        assert_eq!(app.display_name, "Café€");

        // An unknown code table falls back to the label.
        let app = App::from_pse_entry(&[
            0x4F, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10, 0x50, 0x04, 0x43, 0x41, 0x46,
            0x45, 0x9F, 0x11, 0x01, 0x63, 0x9F, 0x12, 0x05, 0x43, 0x61, 0x66, 0xE9, 0xA4,
        ])
        .expect("couldn't decode application template");
        assert_eq!(app.display_name, "CAFE");
    }

    #[test]
    fn test_from_fci() {
        // SELECT response for V Pay, with discretionary data to flatten.
        let (app, discretionary) = App::from_fci(&[
            0x6F, 0x2F, 0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x20, 0xA5, 0x24, 0x50,
            0x05, 0x56, 0x20, 0x50, 0x41, 0x59, 0x87, 0x01, 0x01, 0x5F, 0x2D, 0x04, 0x6E, 0x6C,
            0x65, 0x6E, 0xBF, 0x0C, 0x10, 0x9F, 0x4D, 0x02, 0x0B, 0x05, 0x9F, 0x0A, 0x08, 0x00,
            0x01, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00,
        ])
        .expect("couldn't decode FCI");
        assert_eq!(app.aid, vec![0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x20]);
        assert_eq!(app.label.as_deref(), Some("V PAY"));
        assert_eq!(app.priority, 1);
        assert_eq!(app.lang_prefs.as_deref(), Some("nlen"));
        assert_eq!(app.display_name, "V PAY");

        assert_eq!(discretionary.len(), 2);
        assert_eq!(
            discretionary.find(tlv::TAG_9F4D_LOG_ENTRY).map(|t| t.value.as_slice()),
            Some(&[0x0B, 0x05][..])
        );
        assert_eq!(
            discretionary.find(tlv::TAG_9F0A_ASRPD).map(|t| t.value.as_slice()),
            Some(&[0x00, 0x01, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00][..])
        );
    }

    #[test]
    fn test_from_fci_malformed() {
        assert_eq!(App::from_fci(&[0x84, 0x00]), Err(AppError::MissingFci));
        assert_eq!(
            App::from_fci(&[0x6F, 0x03, 0xA5, 0x01, 0x00]),
            Err(AppError::MissingDfName)
        );
        // Truncated field inside the proprietary template.
        assert_eq!(
            App::from_fci(&[
                0x6F, 0x0D, 0x84, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x03, 0x20, 0x20, 0xA5, 0x02,
                0x50, 0x05
            ]),
            Err(AppError::Ber(ber::Error::TruncatedValue))
        );
    }

    #[test]
    fn test_sort_by_priority() {
        // Priorities 1..15 ascending, no-priority entries last, stable
        // within equal keys.
        let mut list = CandidateList::new();
        list.push(app("APP 5", 5));
        list.push(app("APP 3", 4));
        list.push(app("APP 7", 0));
        list.push(app("APP 1", 1));
        list.push(app("APP 6", 7));
        list.push(app("APP 2", 1));
        list.push(app("APP 4", 4));

        list.sort_by_priority();
        let order: Vec<_> = list.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(order, ["APP 1", "APP 2", "APP 3", "APP 4", "APP 5", "APP 6", "APP 7"]);
    }

    #[test]
    fn test_selection_is_required() {
        let mut list = CandidateList::new();
        assert!(!list.selection_is_required());

        list.push(app("ONLY", 1));
        assert!(!list.selection_is_required());

        // A lone app demanding confirmation still needs the cardholder.
        let mut confirm = CandidateList::new();
        let mut entry = app("CONFIRM", 1);
        entry.confirmation_required = true;
        confirm.push(entry);
        assert!(confirm.selection_is_required());

        list.push(app("SECOND", 2));
        assert!(list.selection_is_required());
    }

    #[test]
    fn test_remove_transfers_ownership() {
        let mut list = CandidateList::new();
        list.push(app("A", 1));
        list.push(app("B", 2));

        let removed = list.remove(0).expect("couldn't remove");
        assert_eq!(removed.display_name, "A");
        assert_eq!(list.len(), 1);
        assert!(list.remove(5).is_none());
    }
}
