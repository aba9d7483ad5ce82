//! Scan events: how each scan was acquired.
//!
//! A scan event carries the acquisition settings (polarity, MS level,
//! ionization, analyzer), the fragmentation reaction for dependent scans,
//! and the calibration that maps profile bin indices onto the m/z axis.
//! Events are variable-length and live in the trailer region, which can only
//! be read sequentially.

use std::fmt;

use crate::error::{RawFileError, Result};
use crate::stream::{t, FieldTemplate, Record, Stream, Ty};

const MAX_COEFFICIENTS: u32 = 16;
const MAX_UNUSED_WORDS: u32 = 1 << 20;

/// Whether the spectrum was acquired in positive or negative mode.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Negative = 0,
    Positive = 1,
    Any = 2,
}

impl From<u16> for Polarity {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Negative,
            1 => Self::Positive,
            _ => Self::Any,
        }
    }
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negative => "-",
            Self::Positive => "+",
            Self::Any => "any",
        }
    }
}

/// This enum mirrors the ionization modes the instrument family reports.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IonizationMode {
    ElectronImpact = 0,
    ChemicalIonization = 1,
    FastAtomBombardment = 2,
    ElectroSpray = 3,
    AtmosphericPressureChemicalIonization = 4,
    NanoSpray = 5,
    Unknown = 999,
}

impl From<u16> for IonizationMode {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::ElectronImpact,
            1 => Self::ChemicalIonization,
            2 => Self::FastAtomBombardment,
            3 => Self::ElectroSpray,
            4 => Self::AtmosphericPressureChemicalIonization,
            5 => Self::NanoSpray,
            _ => Self::Unknown,
        }
    }
}

impl IonizationMode {
    pub fn abbrev(&self) -> &'static str {
        match self {
            Self::ElectronImpact => "EI",
            Self::ChemicalIonization => "CI",
            Self::FastAtomBombardment => "FAB",
            Self::ElectroSpray => "ESI",
            Self::AtmosphericPressureChemicalIonization => "APCI",
            Self::NanoSpray => "NSI",
            Self::Unknown => "?",
        }
    }
}

/// The mass analyzer a scan was measured with.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Analyzer {
    Unknown = 0,
    Itms = 1,
    Tqms = 2,
    Sqms = 3,
    Tofms = 4,
    Ftms = 5,
    Sector = 6,
}

impl From<u16> for Analyzer {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::Itms,
            2 => Self::Tqms,
            3 => Self::Sqms,
            4 => Self::Tofms,
            5 => Self::Ftms,
            6 => Self::Sector,
            _ => Self::Unknown,
        }
    }
}

impl Analyzer {
    pub fn abbrev(&self) -> &'static str {
        match self {
            Self::Unknown => "?",
            Self::Itms => "ITMS",
            Self::Tqms => "TQMS",
            Self::Sqms => "SQMS",
            Self::Tofms => "TOFMS",
            Self::Ftms => "FTMS",
            Self::Sector => "Sector",
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Detector {
    Unspecified = 0,
    Specified = 1,
    Unknown = 999,
}

impl From<u16> for Detector {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unspecified,
            1 => Self::Specified,
            _ => Self::Unknown,
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanType {
    Full = 0,
    Sim = 1,
    Zoom = 2,
    Srm = 3,
    Unknown = 999,
}

impl From<u16> for ScanType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Full,
            1 => Self::Sim,
            2 => Self::Zoom,
            3 => Self::Srm,
            _ => Self::Unknown,
        }
    }
}

impl ScanType {
    pub fn abbrev(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Sim => "SIM",
            Self::Zoom => "Z",
            Self::Srm => "SRM",
            Self::Unknown => "?",
        }
    }
}

/// How a precursor was fragmented.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationMethod {
    Cid = 0,
    Etd = 1,
    Hcd = 2,
    Ecd = 3,
    Ptr = 4,
    Unknown = 999,
}

impl From<u32> for ActivationMethod {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Cid,
            1 => Self::Etd,
            2 => Self::Hcd,
            3 => Self::Ecd,
            4 => Self::Ptr,
            _ => Self::Unknown,
        }
    }
}

impl ActivationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cid => "cid",
            Self::Etd => "etd",
            Self::Hcd => "hcd",
            Self::Ecd => "ecd",
            Self::Ptr => "ptr",
            Self::Unknown => "?",
        }
    }
}

// The preamble is a block of u16 slots; later schema versions append
// reserved slots without moving the named ones.
const PREAMBLE_FIELDS: &[FieldTemplate] = &[
    t("unknown0", Ty::U16, "reserved"),
    t("polarity", Ty::U16, "scan polarity"),
    t("ms_power", Ty::U16, "MS exponentiation level"),
    t("scan_type", Ty::U16, "scan type"),
    t("dependent", Ty::U16, "dependent scan flag"),
    t("wideband", Ty::U16, "wideband activation flag"),
    t("ionization", Ty::U16, "ionization mode"),
    t("detector", Ty::U16, "detector"),
    t("analyzer", Ty::U16, "mass analyzer"),
    t("reserved0", Ty::U16, "reserved"),
    t("reserved1", Ty::U16, "reserved"),
    t("reserved2", Ty::U16, "reserved"),
    t("reserved3", Ty::U16, "reserved"),
    t("reserved4", Ty::U16, "reserved"),
    t("reserved5", Ty::U16, "reserved"),
    t("reserved6", Ty::U16, "reserved"),
    t("reserved7", Ty::U16, "reserved"),
    t("reserved8", Ty::U16, "reserved"),
    t("reserved9", Ty::U16, "reserved"),
    t("reserved10", Ty::U16, "reserved"),
    t("reserved11", Ty::U16, "reserved"),
    t("reserved12", Ty::U16, "reserved"),
    t("reserved13", Ty::U16, "reserved"),
    t("reserved14", Ty::U16, "reserved"),
];

pub(crate) fn preamble_slot_count(version: u32) -> usize {
    match version {
        v if v >= 64 => 24,
        63 => 20,
        62 => 16,
        _ => 12,
    }
}

fn preamble_templates(version: u32) -> &'static [FieldTemplate] {
    &PREAMBLE_FIELDS[..preamble_slot_count(version)]
}

/// The fixed head of a scan event.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEventPreamble {
    pub polarity: Polarity,
    /// MS exponentiation level: 1 for a primary scan, 2 for a fragment scan.
    pub ms_power: u16,
    pub scan_type: ScanType,
    /// Whether the scan's precursor was selected from the preceding survey
    /// scan.
    pub dependent: bool,
    pub wideband: bool,
    pub ionization: IonizationMode,
    pub detector: Detector,
    pub analyzer: Analyzer,
}

impl ScanEventPreamble {
    fn from_record(rec: &Record) -> Result<Self> {
        let ms_power = rec.u16("ms_power")?;
        if !(1..=10).contains(&ms_power) {
            return Err(RawFileError::format(
                "scan_event.preamble.ms_power",
                format!("impossible MS level {ms_power}"),
            ));
        }
        Ok(Self {
            polarity: rec.u16("polarity")?.into(),
            ms_power,
            scan_type: rec.u16("scan_type")?.into(),
            dependent: rec.u16("dependent")? != 0,
            wideband: rec.u16("wideband")? != 0,
            ionization: rec.u16("ionization")?.into(),
            detector: rec.u16("detector")?.into(),
            analyzer: rec.u16("analyzer")?.into(),
        })
    }
}

const REACTION: &[FieldTemplate] = &[
    t("precursor_mz", Ty::F64, "precursor m/z"),
    t("isolation_width", Ty::F64, "isolation width"),
    t("energy", Ty::F64, "collision energy"),
    t("activation", Ty::U32, "activation method"),
    t("reserved", Ty::U32, "reserved"),
];

/// The fragmentation step of a dependent scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub precursor_mz: f64,
    pub isolation_width: f64,
    pub energy: f64,
    pub activation: ActivationMethod,
}

impl Reaction {
    fn from_record(rec: &Record) -> Result<Self> {
        Ok(Self {
            precursor_mz: rec.f64("precursor_mz")?,
            isolation_width: rec.f64("isolation_width")?,
            energy: rec.f64("energy")?,
            activation: rec.u32("activation")?.into(),
        })
    }
}

/// The per-event m/z calibration: a pure function of the bin index and its
/// inverse. Stored as plain coefficients, never as callables.
#[derive(Debug, Clone, PartialEq)]
pub enum Converter {
    /// `mz(k) = c0 + c1·k + c2·k² + …`
    Polynomial { coeffs: Vec<f64> },
    /// Frequency-domain calibration: `f(k) = f0 + step·k`,
    /// `mz(k) = a + b/f² + c/f⁴`.
    Frequency {
        f0: f64,
        step: f64,
        a: f64,
        b: f64,
        c: f64,
    },
}

impl Converter {
    pub(crate) fn from_parts(kind: u32, coeffs: Vec<f64>) -> Result<Self> {
        match kind {
            0 => {
                if coeffs.is_empty() {
                    return Err(RawFileError::format(
                        "scan_event.calibration",
                        "polynomial calibration with no coefficients",
                    ));
                }
                Ok(Self::Polynomial { coeffs })
            }
            1 => {
                if coeffs.len() != 5 {
                    return Err(RawFileError::format(
                        "scan_event.calibration",
                        format!(
                            "frequency calibration takes 5 coefficients, found {}",
                            coeffs.len()
                        ),
                    ));
                }
                Ok(Self::Frequency {
                    f0: coeffs[0],
                    step: coeffs[1],
                    a: coeffs[2],
                    b: coeffs[3],
                    c: coeffs[4],
                })
            }
            other => Err(RawFileError::format(
                "scan_event.calibration",
                format!("unknown calibration kind {other}"),
            )),
        }
    }

    /// The m/z of profile bin `bin`. Monotonically non-decreasing in `bin`.
    pub fn convert(&self, bin: f64) -> f64 {
        match self {
            Self::Polynomial { coeffs } => {
                coeffs.iter().rev().fold(0.0, |acc, c| acc * bin + c)
            }
            Self::Frequency { f0, step, a, b, c } => {
                let f = f0 + step * bin;
                let f2 = f * f;
                a + b / f2 + c / (f2 * f2)
            }
        }
    }

    /// The (fractional) bin index whose m/z is nearest to `mz`. Uses the
    /// closed form for degree-1 polynomials and bounded bisection otherwise,
    /// relying on monotonicity.
    pub fn inverse(&self, mz: f64) -> f64 {
        match self {
            Self::Polynomial { coeffs } if coeffs.len() == 1 => 0.0,
            Self::Polynomial { coeffs } if coeffs.len() == 2 => {
                if coeffs[1] != 0.0 {
                    (mz - coeffs[0]) / coeffs[1]
                } else {
                    0.0
                }
            }
            _ => self.bisect(mz),
        }
    }

    fn bisect(&self, mz: f64) -> f64 {
        const MAX_BIN: f64 = 4_294_967_296.0;
        let mut lo = 0.0_f64;
        let mut hi = 1.0_f64;
        while self.convert(hi) < mz && hi < MAX_BIN {
            hi *= 2.0;
        }
        for _ in 0..64 {
            let mid = 0.5 * (lo + hi);
            if self.convert(mid) < mz {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }
}

/// One trailer record: the full description of how a scan was acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    pub preamble: ScanEventPreamble,
    /// Present when `preamble.ms_power >= 2`.
    pub reaction: Option<Reaction>,
    pub converter: Converter,
    pub low_mz: f64,
    pub high_mz: f64,
}

impl ScanEvent {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("scan_event.preamble", preamble_templates(version), version)?;
        let preamble = ScanEventPreamble::from_record(&rec)?;
        let reaction = if preamble.ms_power >= 2 {
            let rec = s.read_record("scan_event.reaction", REACTION, version)?;
            Some(Reaction::from_record(&rec)?)
        } else {
            None
        };
        let kind = s.read_u32("scan_event.calibration.kind")?;
        let ncoeff = s.read_count("scan_event.calibration.ncoeff", MAX_COEFFICIENTS)?;
        let mut coeffs = Vec::with_capacity(ncoeff as usize);
        for _ in 0..ncoeff {
            coeffs.push(s.read_f64("scan_event.calibration.coeff")?);
        }
        let converter = Converter::from_parts(kind, coeffs)?;
        let low_mz = s.read_f64("scan_event.low_mz")?;
        let high_mz = s.read_f64("scan_event.high_mz")?;
        // transient working copies appended by the instrument; skipped, never
        // retained
        let nunused = s.read_count("scan_event.nunused", MAX_UNUSED_WORDS)?;
        s.skip(4 * u64::from(nunused))?;
        Ok(Self {
            preamble,
            reaction,
            converter,
            low_mz,
            high_mz,
        })
    }
}

/// Renders the event the way instrument software prints scan filters,
/// e.g. `FTMS + ESI Full ms2 445.1200@cid35.00 [100.00-2000.00]`.
impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.preamble;
        if p.analyzer != Analyzer::Unknown {
            write!(f, "{} ", p.analyzer.abbrev())?;
        }
        match p.polarity {
            Polarity::Positive => write!(f, "+ ")?,
            Polarity::Negative => write!(f, "- ")?,
            Polarity::Any => {}
        }
        write!(f, "{} ", p.ionization.abbrev())?;
        if p.wideband {
            write!(f, "w ")?;
        }
        write!(f, "{}", p.scan_type.abbrev())?;
        if p.ms_power <= 1 {
            write!(f, " ms")?;
        } else {
            write!(f, " ms{}", p.ms_power)?;
            if let Some(r) = &self.reaction {
                write!(
                    f,
                    " {:.4}@{}{:.2}",
                    r.precursor_mz,
                    r.activation.as_str(),
                    r.energy
                )?;
            }
        }
        write!(f, " [{:.2}-{:.2}]", self.low_mz, self.high_mz)
    }
}

/// A scan-event template from the hierarchy section. Templates describe the
/// segments of the acquisition method; they are decoded only to advance the
/// stream to the parameter-stream header.
pub(crate) struct ScanEventTemplate;

impl ScanEventTemplate {
    pub(crate) fn skip(s: &mut Stream<'_>, version: u32) -> Result<()> {
        s.read_record(
            "scan_event_template.preamble",
            preamble_templates(version),
            version,
        )?;
        let _kind = s.read_u32("scan_event_template.calibration.kind")?;
        let ncoeff = s.read_count("scan_event_template.calibration.ncoeff", MAX_COEFFICIENTS)?;
        s.skip(8 * u64::from(ncoeff))?;
        s.read_f64("scan_event_template.low_mz")?;
        s.read_f64("scan_event_template.high_mz")?;
        Ok(())
    }
}
