//! ATR (Answer-to-Reset) parser and EMV Level 1 validation.
//!
//! Aside from ISO 7816-3, this is covered by the EMV L1 Contact Interface
//! Specification, Section 8: "Answer to Reset", which is freely available
//! from EMVCo's website. [`parse`] implements the ISO layer (structure,
//! closed code tables, TCK); [`AtrInfo::validate_emv`] applies the stricter
//! EMV rules on top. Both layers reject card-side violations; the session
//! maps either failure to a "card error" outcome.
//!
//! Useful online ATR parser: https://smartcard-atr.apdu.fr/

use nom::combinator::cond;
use nom::number::complete::be_u8;
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use tracing::{trace, trace_span};

pub type IResult<'a, T> = nom::IResult<&'a [u8], T>;

/// Minimum ATR length: TS and T0.
pub const MIN_SIZE: usize = 2;
/// Maximum ATR length per ISO 7816-3.
pub const MAX_SIZE: usize = 33;

/// Initial character TS, a known bit pattern telling the electrical
/// transmission convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Convention {
    /// Direct convention, 1 is high - (H)LHHLHHHLLH.
    Direct = 0x3B,
    /// Inverse convention, 1 is low - (H)LHHLLLLLLH.
    /// Relatively rare, and EMV (but not ISO 7816) has deprecated it.
    Inverse = 0x3F,
}

/// A transmission protocol, as announced in the low nibble of a TD byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Protocol {
    T0 = 0,
    T1 = 1,
    /// T=15 is not a protocol: it flags the following interface bytes as
    /// global (card classes, clock stop, SPU).
    Global = 15,
    #[num_enum(catch_all)]
    Other(u8) = 0xFF,
}

/// One quadruple of interface bytes (TAi, TBi, TCi, TDi), each
/// present-or-absent per the preceding Y nibble.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceBytes {
    pub ta: Option<u8>,
    pub tb: Option<u8>,
    pub tc: Option<u8>,
    pub td: Option<u8>,
}

/// Clock stop support, from global TA (i >= 3) under T=15.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClockStop {
    #[default]
    NotSupported,
    StateL,
    StateH,
    NoPreference,
}

/// Standard or proprietary use contact (SPU / C6) usage, from global TB
/// (i >= 3) under T=15.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Spu {
    #[default]
    NotUsed,
    Standard,
    Proprietary,
}

/// Error detection code for protocol T=1, from TC (i >= 3).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetectionCode {
    /// Longitudinal Redundancy Check (the default).
    #[default]
    Lrc,
    /// Cyclic Redundancy Check.
    Crc,
}

/// Global interface parameters, decoded from TA1/TB1/TB2/TC1/TD1/TA2 and
/// the T=15 interface bytes. Defaults per ISO 7816-3 apply when the
/// corresponding interface byte is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalParams {
    /// Clock rate conversion factor.
    pub fi: u16,
    /// Baud rate adjustment factor.
    pub di: u8,
    /// Maximum clock frequency in MHz.
    pub fmax: f32,
    /// Whether Vpp is connected to C6. If not, ignore Vpp and Ipp.
    pub vpp_connected: bool,
    /// Programming voltage in mV; deprecated since ISO 7816-3:2006.
    pub vpp: u32,
    /// Coarse programming voltage in mV, from TB1 only.
    pub vpp_coarse: u32,
    /// Maximum programming current in mA; deprecated.
    pub ipp: u32,
    /// Extra guard time integer N as encoded; 0xFF is protocol specific.
    pub n: u8,
    /// Guard time in etu.
    pub gt: u16,
    /// Preferred protocol, from TD1.
    pub protocol: Protocol,
    /// Whether specific mode is available (TA2 present).
    pub specific_mode: bool,
    /// Required protocol when in specific mode.
    pub specific_mode_protocol: Protocol,
    /// Whether the etu duration is implicitly known by the reader instead
    /// of defined by TA1.
    pub etu_is_implicit: bool,
    /// Whether specific/negotiable mode may change (eg after a warm ATR).
    pub specific_mode_may_change: bool,
    /// Bitfield of supported card class supply voltages.
    pub card_classes: u8,
    pub clock_stop: ClockStop,
    pub spu: Spu,
}

impl Default for GlobalParams {
    fn default() -> Self {
        // ISO 7816-3 defaults, equivalent to TA1=0x11, TB1=0x25, TC1=0x00
        // and TD1=0x00.
        Self {
            fi: 372,
            di: 1,
            fmax: 5.0,
            vpp_connected: true,
            vpp: 5000,
            vpp_coarse: 5000,
            ipp: 50,
            n: 0,
            gt: 12,
            protocol: Protocol::T0,
            specific_mode: false,
            specific_mode_protocol: Protocol::T0,
            etu_is_implicit: false,
            specific_mode_may_change: false,
            card_classes: 0,
            clock_stop: ClockStop::NotSupported,
            spu: Spu::NotUsed,
        }
    }
}

/// Parameters specific to protocol T=1, from the interface bytes following
/// a TD that announced T=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolT1 {
    /// Information Field Size Integer.
    pub ifsi: u8,
    /// Character Waiting Time Integer.
    pub cwi: u8,
    /// Character Waiting Time in etu.
    pub cwt: u32,
    /// Block Waiting Time Integer.
    pub bwi: u8,
    /// Block Waiting Time in etu.
    pub bwt: u32,
    pub error_detection_code: ErrorDetectionCode,
}

impl Default for ProtocolT1 {
    fn default() -> Self {
        // IFSI=32, CWI=13 and BWI=4 per ISO 7816-3:2006, 11.4.2-11.4.3.
        Self {
            ifsi: 32,
            cwi: 13,
            cwt: 11 + (1 << 13),
            bwi: 4,
            bwt: 11 + 960 * (1 << 4),
            error_detection_code: ErrorDetectionCode::Lrc,
        }
    }
}

/// Status indicator from the historical bytes, present when the category
/// indicator is 0x00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusIndicator {
    /// Card life cycle status.
    pub lcs: u8,
    pub sw1: u8,
    pub sw2: u8,
}

/// A parsed and decoded ATR.
#[derive(Debug, Clone, PartialEq)]
pub struct AtrInfo {
    /// Electrical transmission convention (hi=1 or lo=1).
    pub ts: Convention,
    /// Format byte: Y1 presence nibble and historical byte count K.
    pub t0: u8,
    /// Interface byte quadruples; `interface[0]` holds TA1..TD1.
    pub interface: [InterfaceBytes; 4],
    /// Historical bytes, category indicator included (0 to 15 bytes).
    pub historical_bytes: Vec<u8>,
    /// Status indicator, when the historical bytes carry one explicitly.
    pub status_indicator: Option<StatusIndicator>,
    /// Check character. Absent when T=0 is the only announced protocol;
    /// otherwise mandatory, with XOR(T0..TCK) = 0.
    pub tck: Option<u8>,
    pub global: GlobalParams,
    pub t1: ProtocolT1,
}

impl AtrInfo {
    /// Interface byte TAi for i in 1..=4.
    pub fn ta(&self, i: usize) -> Option<u8> {
        self.interface.get(i.wrapping_sub(1)).and_then(|x| x.ta)
    }

    /// Interface byte TBi for i in 1..=4.
    pub fn tb(&self, i: usize) -> Option<u8> {
        self.interface.get(i.wrapping_sub(1)).and_then(|x| x.tb)
    }

    /// Interface byte TCi for i in 1..=4.
    pub fn tc(&self, i: usize) -> Option<u8> {
        self.interface.get(i.wrapping_sub(1)).and_then(|x| x.tc)
    }

    /// Interface byte TDi for i in 1..=4.
    pub fn td(&self, i: usize) -> Option<u8> {
        self.interface.get(i.wrapping_sub(1)).and_then(|x| x.td)
    }

    /// Protocol announced by TDi, or None when TDi is absent.
    fn td_protocol(&self, i: usize) -> Option<Protocol> {
        self.td(i).map(|td| Protocol::from(td & 0x0F))
    }
}

/// An ATR that violates ISO 7816-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("ATR must be 2 to 33 bytes")]
    BadLength,
    #[error("TS is not a known convention")]
    BadConvention,
    #[error("ATR truncated within the interface bytes")]
    TruncatedInterface,
    #[error("ATR truncated within the historical bytes")]
    TruncatedHistorical,
    #[error("TA1 encodes a reserved Di")]
    ReservedDi,
    #[error("TA1 encodes a reserved Fi/fmax")]
    ReservedFi,
    #[error("TB1 programming voltage out of range")]
    BadVpp,
    #[error("TB1 encodes a reserved Ipp")]
    ReservedIpp,
    #[error("TB2 present but TB1 indicates Vpp is not connected")]
    UnexpectedTb2,
    #[error("TB2 programming voltage out of range")]
    BadVpp2,
    #[error("TD1 announces an unsupported protocol")]
    BadProtocol,
    #[error("TA for T=1 encodes a reserved IFSI")]
    ReservedIfsi,
    #[error("TCK is mandatory but absent")]
    MissingTck,
    #[error("TCK checksum mismatch")]
    BadTck,
}

/// An ATR that parses under ISO 7816-3 but violates the EMV Level 1
/// Contact Interface rules (v1.0, 8.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EmvViolation {
    #[error("TA2 indicates specific mode but TA1 is outside 0x11-0x13")]
    SpecificModeTa1,
    #[error("negotiable mode requires fmax of at least 5 MHz")]
    NegotiableFmax,
    #[error("negotiable mode requires Di of at least 4")]
    NegotiableDi,
    #[error("TC1 must be 0x00 or 0xFF")]
    ExtraGuardTime,
    #[error("TA2 protocol differs from TD1 protocol")]
    SpecificModeProtocol,
    #[error("TA2 implicit mode is not allowed")]
    ImplicitMode,
    #[error("TC2 is only allowed for T=0")]
    WorkWaitingTimeProtocol,
    #[error("TC2 for T=0 must be 0x0A")]
    WorkWaitingTime,
    #[error("TD2 announces an invalid protocol")]
    Td2Protocol,
    #[error("TD2 is mandatory for T=1")]
    Td2Missing,
    #[error("TA3 for T=1 must be at least 0x10")]
    Ifsi,
    #[error("TB3 is mandatory for T=1")]
    Tb3Missing,
    #[error("TB3 for T=1 has invalid BWI")]
    Bwi,
    #[error("TB3 for T=1 has invalid CWI")]
    Cwi,
    #[error("2^CWI < N+1 is not allowed for T=1")]
    CwiGuardTime,
    #[error("TC3 for T=1 must be 0x00")]
    ErrorDetection,
}

fn take_interface_bytes(data: &[u8], y: u8) -> IResult<InterfaceBytes> {
    let (data, ta) = cond(y & (1 << 0) != 0, be_u8)(data)?;
    let (data, tb) = cond(y & (1 << 1) != 0, be_u8)(data)?;
    let (data, tc) = cond(y & (1 << 2) != 0, be_u8)(data)?;
    let (data, td) = cond(y & (1 << 3) != 0, be_u8)(data)?;
    Ok((data, InterfaceBytes { ta, tb, tc, td }))
}

fn parse_ta1(ta1: u8, global: &mut GlobalParams) -> Result<(), ParseError> {
    // Bit rate adjustment factor Di according to ISO 7816-3:2006, 8.3, table 8.
    global.di = match ta1 & 0x0F {
        0x01 => 1,
        0x02 => 2,
        0x03 => 4,
        0x04 => 8,
        0x05 => 16,
        0x06 => 32,
        0x07 => 64,
        0x08 => 12,
        0x09 => 20,
        _ => return Err(ParseError::ReservedDi),
    };

    // Clock rate conversion factor Fi and maximum clock frequency fmax
    // according to ISO 7816-3:2006, 8.3, table 7.
    (global.fi, global.fmax) = match ta1 & 0xF0 {
        0x00 => (372, 4.0),
        0x10 => (372, 5.0),
        0x20 => (558, 6.0),
        0x30 => (744, 8.0),
        0x40 => (1116, 12.0),
        0x50 => (1488, 16.0),
        0x60 => (1860, 20.0),
        0x90 => (512, 5.0),
        0xA0 => (768, 7.5),
        0xB0 => (1024, 10.0),
        0xC0 => (1536, 15.0),
        0xD0 => (2048, 20.0),
        _ => return Err(ParseError::ReservedFi),
    };

    Ok(())
}

fn parse_tb1(tb1: u8, global: &mut GlobalParams) -> Result<(), ParseError> {
    // TB1 == 0x00 indicates that Vpp is not connected to C6.
    if tb1 == 0x00 {
        global.vpp_connected = false;
        return Ok(());
    }
    global.vpp_connected = true;

    // Programming voltage per ISO 7816-3:1997; deprecated in 2006 but still
    // decoded, since EMV requires TB1 itself to be well formed.
    let pi1 = tb1 & 0x1F;
    if !(5..=25).contains(&pi1) {
        return Err(ParseError::BadVpp);
    }
    global.vpp_coarse = pi1 as u32 * 1000;
    // TB2 may override this with a precise value later.
    global.vpp = global.vpp_coarse;

    global.ipp = match tb1 & 0x60 {
        0x00 => 25,
        0x20 => 50,
        0x40 => 100,
        _ => return Err(ParseError::ReservedIpp),
    };

    Ok(())
}

fn parse_tc1(tc1: u8, global: &mut GlobalParams) {
    global.n = tc1;
    if tc1 != 0xFF {
        // GT = 12 etu + R x N/f, and with T=15 absent R = F/D, so this
        // collapses to 12 + N etu. See ISO 7816-3:2006, 8.3.
        global.gt = 12 + tc1 as u16;
    }
    // N=255 is protocol specific and resolved when TD1 is parsed:
    // T=0 keeps GT at 12 etu, T=1 shortens it to 11 etu.
}

fn parse_td1(td1: u8, global: &mut GlobalParams) -> Result<(), ParseError> {
    let protocol = Protocol::from(td1 & 0x0F);
    if protocol != Protocol::T0 && protocol != Protocol::T1 {
        return Err(ParseError::BadProtocol);
    }
    global.protocol = protocol;

    if global.n == 0xFF {
        global.gt = match protocol {
            Protocol::T1 => 11,
            _ => 12,
        };
    }

    Ok(())
}

fn parse_ta2(ta2: u8, global: &mut GlobalParams) {
    // TA2 present means specific mode; absent means negotiable mode only.
    global.specific_mode = true;
    global.specific_mode_protocol = Protocol::from(ta2 & 0x0F);
    global.etu_is_implicit = ta2 & 0x10 != 0;
    global.specific_mode_may_change = ta2 & 0x80 != 0;
}

fn parse_tb2(tb2: u8, global: &mut GlobalParams) -> Result<(), ParseError> {
    // TB2 refines Vpp, so TB1 must have indicated Vpp in the first place.
    if !global.vpp_connected {
        return Err(ParseError::UnexpectedTb2);
    }
    if !(50..=250).contains(&tb2) {
        return Err(ParseError::BadVpp2);
    }
    // PI2 is in multiples of 100 mV.
    global.vpp = tb2 as u32 * 100;
    Ok(())
}

/// Parses an ATR under ISO 7816-3.
pub fn parse(atr: &[u8]) -> Result<AtrInfo, ParseError> {
    let span = trace_span!("atr");
    let _enter = span.enter();

    if atr.len() < MIN_SIZE || atr.len() > MAX_SIZE {
        return Err(ParseError::BadLength);
    }

    let ts = Convention::try_from(atr[0]).map_err(|_| ParseError::BadConvention)?;
    let t0 = atr[1];

    let mut info = AtrInfo {
        ts,
        t0,
        interface: Default::default(),
        historical_bytes: Vec::new(),
        status_indicator: None,
        tck: None,
        global: GlobalParams::default(),
        t1: ProtocolT1::default(),
    };

    // Walk the interface bytes; T0's high nibble announces the first
    // quadruple, each TDi's high nibble the next.
    let mut rest = &atr[2..];
    let mut y = t0 >> 4;
    let mut tck_mandatory = false;
    for i in 1..=4usize {
        let (r, bytes) = take_interface_bytes(rest, y).map_err(|_| ParseError::TruncatedInterface)?;
        rest = r;
        info.interface[i - 1] = bytes;
        trace!(i, ?bytes, "interface bytes");

        if let Some(ta) = bytes.ta {
            match i {
                1 => parse_ta1(ta, &mut info.global)?,
                2 => parse_ta2(ta, &mut info.global),
                _ => {}
            }
        }
        if let Some(tb) = bytes.tb {
            match i {
                1 => parse_tb1(tb, &mut info.global)?,
                2 => parse_tb2(tb, &mut info.global)?,
                _ => {}
            }
        }
        if let Some(tc) = bytes.tc {
            if i == 1 {
                parse_tc1(tc, &mut info.global);
            }
        }
        match bytes.td {
            Some(td) => {
                if i == 1 {
                    parse_td1(td, &mut info.global)?;
                }
                // TCK is absent when T=0 is the only announced protocol,
                // mandatory otherwise. T=15 is a global indicator, not a
                // protocol. See ISO 7816-3:2006, 8.2.5.
                let protocol = Protocol::from(td & 0x0F);
                if protocol != Protocol::T0 && protocol != Protocol::Global {
                    tck_mandatory = true;
                }
                y = td >> 4;
            }
            None => break,
        }
    }

    // Interface bytes from the third quadruple on are specific to the
    // protocol announced by the preceding TD.
    for i in 3..=4usize {
        let Some(context) = info.td_protocol(i - 1) else {
            break;
        };
        let bytes = info.interface[i - 1];
        match context {
            Protocol::T1 => {
                if let Some(ta) = bytes.ta {
                    if ta == 0xFF {
                        return Err(ParseError::ReservedIfsi);
                    }
                    info.t1.ifsi = ta;
                }
                if let Some(tb) = bytes.tb {
                    info.t1.cwi = tb & 0x0F;
                    info.t1.bwi = tb >> 4;
                    info.t1.cwt = 11 + (1u32 << info.t1.cwi);
                    info.t1.bwt = 11 + 960 * (1u32 << info.t1.bwi);
                }
                if let Some(tc) = bytes.tc {
                    info.t1.error_detection_code = if tc & 0x01 != 0 {
                        ErrorDetectionCode::Crc
                    } else {
                        ErrorDetectionCode::Lrc
                    };
                }
            }
            Protocol::Global => {
                if let Some(ta) = bytes.ta {
                    info.global.card_classes = ta & 0x3F;
                    info.global.clock_stop = match ta >> 6 {
                        0 => ClockStop::NotSupported,
                        1 => ClockStop::StateL,
                        2 => ClockStop::StateH,
                        _ => ClockStop::NoPreference,
                    };
                }
                if let Some(tb) = bytes.tb {
                    info.global.spu = if tb == 0 {
                        Spu::NotUsed
                    } else if tb & 0x80 != 0 {
                        Spu::Proprietary
                    } else {
                        Spu::Standard
                    };
                }
            }
            _ => {}
        }
    }

    // Historical bytes.
    let k = (t0 & 0x0F) as usize;
    if rest.len() < k {
        return Err(ParseError::TruncatedHistorical);
    }
    let (historical, r) = rest.split_at(k);
    rest = r;
    info.historical_bytes = historical.to_vec();
    // Category indicator 0x00 reserves the trailing three bytes as an
    // explicit status indicator.
    if k >= 4 && historical[0] == 0x00 {
        let si = &historical[k - 3..];
        info.status_indicator = Some(StatusIndicator {
            lcs: si[0],
            sw1: si[1],
            sw2: si[2],
        });
    }

    // Extract and verify TCK, if mandatory.
    if tck_mandatory {
        let (&tck, r) = rest.split_first().ok_or(ParseError::MissingTck)?;
        info.tck = Some(tck);
        let consumed = atr.len() - r.len();
        let verify = atr[1..consumed].iter().fold(0u8, |acc, b| acc ^ b);
        if verify != 0 {
            return Err(ParseError::BadTck);
        }
    }

    Ok(info)
}

impl AtrInfo {
    /// Validates the ATR against EMV Level 1 Contact Interface v1.0, 8.3.
    ///
    /// The ISO layer has already enforced the structural rules; this pass
    /// applies the EMV restrictions, byte by byte, in ATR order.
    pub fn validate_emv(&self) -> Result<(), EmvViolation> {
        // Default is T=0 when TD1 is absent.
        let td1_protocol = self.td_protocol(1).unwrap_or(Protocol::T0);

        // TA1: constrained by the mode the card will end up in.
        if let Some(ta1) = self.ta(1) {
            match self.ta(2) {
                // Specific mode (implicit-etu bit clear) pins TA1 to the
                // default-compatible range.
                Some(ta2) if ta2 & 0x10 == 0 && !(0x11..=0x13).contains(&ta1) => {
                    return Err(EmvViolation::SpecificModeTa1);
                }
                Some(_) => {}
                // Negotiable mode: fmax at least 5 MHz, Di at least 4.
                None => {
                    if ta1 & 0xF0 == 0 {
                        return Err(EmvViolation::NegotiableFmax);
                    }
                    if ta1 & 0x0F < 3 {
                        return Err(EmvViolation::NegotiableDi);
                    }
                }
            }
        }

        // TC1: no extra guard time, except the protocol-specific marker.
        if let Some(tc1) = self.tc(1) {
            if tc1 != 0x00 && tc1 != 0xFF {
                return Err(EmvViolation::ExtraGuardTime);
            }
        }

        // TA2: specific mode must name the first indicated protocol and
        // must not rely on an implicitly known etu.
        if let Some(ta2) = self.ta(2) {
            if Protocol::from(ta2 & 0x0F) != td1_protocol {
                return Err(EmvViolation::SpecificModeProtocol);
            }
            if ta2 & 0x10 != 0 {
                return Err(EmvViolation::ImplicitMode);
            }
        }

        // TC2: work waiting time, T=0 only, fixed at 10.
        if let Some(tc2) = self.tc(2) {
            if td1_protocol != Protocol::T0 {
                return Err(EmvViolation::WorkWaitingTimeProtocol);
            }
            if tc2 != 0x0A {
                return Err(EmvViolation::WorkWaitingTime);
            }
        }

        // TD2: T=15 after T=0, T=1 after T=1 (and mandatory for T=1, since
        // TB3 must follow).
        let mut td2_protocol = Protocol::T0;
        match self.td_protocol(2) {
            Some(protocol) => {
                if td1_protocol == Protocol::T0 && protocol != Protocol::Global {
                    return Err(EmvViolation::Td2Protocol);
                }
                if td1_protocol == Protocol::T1 && protocol != Protocol::T1 {
                    return Err(EmvViolation::Td2Protocol);
                }
                td2_protocol = protocol;
            }
            None => {
                if td1_protocol == Protocol::T1 {
                    return Err(EmvViolation::Td2Missing);
                }
            }
        }

        // T=1 interface characters.
        if td2_protocol == Protocol::T1 {
            if let Some(ta3) = self.ta(3) {
                // The ISO layer already rejected 0xFF.
                if ta3 < 0x10 {
                    return Err(EmvViolation::Ifsi);
                }
            }
            if self.tb(3).is_none() {
                return Err(EmvViolation::Tb3Missing);
            }
            if self.t1.bwi > 4 {
                return Err(EmvViolation::Bwi);
            }
            if self.t1.cwi > 5 {
                return Err(EmvViolation::Cwi);
            }
            // Reject 2^CWI < N+1, with N=0xFF read as -1 and N=0 forcing
            // CWI to 1. See EMV Level 1 Contact Interface v1.0, 8.3.3.1.
            let n = if self.global.n != 0xFF { self.global.n as i32 } else { -1 };
            let cwi = if self.global.n != 0 { self.t1.cwi } else { 1 };
            if (1i32 << cwi) < n + 1 {
                return Err(EmvViolation::CwiGuardTime);
            }
            if let Some(tc3) = self.tc(3) {
                if tc3 != 0x00 {
                    return Err(EmvViolation::ErrorDetection);
                }
            }
        }

        Ok(())
    }
}
