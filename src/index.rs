//! The per-scan lookup tables: the scan index, the scan-event trailer, the
//! instrument error log, and the self-describing scan-parameters stream.
//!
//! All of these are decoded eagerly when a file is opened; only the scan
//! payloads themselves are read on demand.

use log::{debug, warn};

use crate::error::{InstrumentError, RawFileError, Result};
use crate::event::{ScanEvent, ScanEventTemplate};
use crate::header::wide_addresses;
use crate::stream::{t, FieldTemplate, Record, Stream, Ty};

const MAX_RECORDS: u32 = 1 << 24;
const MAX_GENERIC_FIELDS: u32 = 1 << 12;

fn scan_index_templates(version: u32) -> &'static [FieldTemplate] {
    const NARROW: &[FieldTemplate] = &[
        t("offset", Ty::U32, "offset into the data region"),
        t("index", Ty::U32, "zero-based scan index"),
        t("scan_event", Ty::U16, "scan event number"),
        t("scan_segment", Ty::U16, "scan segment number"),
        t("next", Ty::U32, "next entry link"),
        t("unknown", Ty::U32, "reserved"),
        t("data_size", Ty::U32, "scan data size"),
        t("start_time", Ty::F64, "retention time, minutes"),
        t("total_current", Ty::F64, "total ion current"),
        t("base_intensity", Ty::F64, "base peak intensity"),
        t("base_mz", Ty::F64, "base peak m/z"),
        t("low_mz", Ty::F64, "lowest m/z"),
        t("high_mz", Ty::F64, "highest m/z"),
    ];
    const WIDE: &[FieldTemplate] = &[
        t("offset", Ty::U64, "offset into the data region"),
        t("index", Ty::U32, "zero-based scan index"),
        t("scan_event", Ty::U16, "scan event number"),
        t("scan_segment", Ty::U16, "scan segment number"),
        t("next", Ty::U32, "next entry link"),
        t("unknown", Ty::U32, "reserved"),
        t("data_size", Ty::U32, "scan data size"),
        t("start_time", Ty::F64, "retention time, minutes"),
        t("total_current", Ty::F64, "total ion current"),
        t("base_intensity", Ty::F64, "base peak intensity"),
        t("base_mz", Ty::F64, "base peak m/z"),
        t("low_mz", Ty::F64, "lowest m/z"),
        t("high_mz", Ty::F64, "highest m/z"),
    ];
    if wide_addresses(version) {
        WIDE
    } else {
        NARROW
    }
}

/// One fixed-size scan index entry.
///
/// Entries carry `index`/`next` link fields, but the linked-list structure is
/// unverified in practice; entries are laid out physically sequentially and
/// this decoder relies on that, ignoring the links.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanIndexEntry {
    /// Byte offset of the scan's data packet, relative to the run header's
    /// `data_addr`.
    pub offset: u64,
    pub index: u32,
    pub scan_event: u16,
    pub scan_segment: u16,
    pub next: u32,
    pub data_size: u32,
    /// Retention time in minutes.
    pub start_time: f64,
    pub total_current: f64,
    pub base_intensity: f64,
    pub base_mz: f64,
    pub low_mz: f64,
    pub high_mz: f64,
}

impl ScanIndexEntry {
    fn from_record(rec: &Record) -> Result<Self> {
        Ok(Self {
            offset: rec.addr("offset")?,
            index: rec.u32("index")?,
            scan_event: rec.u16("scan_event")?,
            scan_segment: rec.u16("scan_segment")?,
            next: rec.u32("next")?,
            data_size: rec.u32("data_size")?,
            start_time: rec.f64("start_time")?,
            total_current: rec.f64("total_current")?,
            base_intensity: rec.f64("base_intensity")?,
            base_mz: rec.f64("base_mz")?,
            low_mz: rec.f64("low_mz")?,
            high_mz: rec.f64("high_mz")?,
        })
    }
}

/// The scan index: one fixed-size entry per scan, keyed here by the 1-based
/// scan number and stored as a 0-based table.
#[derive(Debug, Clone)]
pub struct ScanIndex {
    first_scan: u32,
    entries: Vec<ScanIndexEntry>,
}

impl ScanIndex {
    /// Decode entries for scans `[from, to]` (1-based, inclusive). The first
    /// entry is probed once to learn the record size, then the stream seeks
    /// back to the requested window and decodes it in bulk.
    pub fn decode(
        s: &mut Stream<'_>,
        scan_index_addr: u64,
        version: u32,
        first_scan: u32,
        from: u32,
        to: u32,
    ) -> Result<Self> {
        let templates = scan_index_templates(version);
        s.seek(scan_index_addr)?;
        let probe = s.read_record("scan_index_entry", templates, version)?;
        let record_size = probe.size;
        debug!("scan index entries are {record_size} bytes");
        s.seek(scan_index_addr + u64::from(from - first_scan) * record_size)?;
        let recs = s.read_records(to - from + 1, "scan_index_entry", templates, version)?;
        let entries = recs
            .iter()
            .map(ScanIndexEntry::from_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            first_scan: from,
            entries,
        })
    }

    /// Look up the entry for a 1-based scan number.
    pub fn get(&self, number: u32) -> Option<&ScanIndexEntry> {
        number
            .checked_sub(self.first_scan)
            .and_then(|i| self.entries.get(i as usize))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanIndexEntry> {
        self.entries.iter()
    }
}

/// Read the trailer: a counted list of variable-length scan events, strictly
/// sequential. Events for scans before `from` are decoded and dropped; the
/// read stops at `to`.
pub fn decode_trailer(
    s: &mut Stream<'_>,
    trailer_addr: u64,
    version: u32,
    first_scan: u32,
    from: u32,
    to: u32,
) -> Result<Vec<ScanEvent>> {
    s.seek(trailer_addr)?;
    let count = s.read_count("trailer.count", MAX_RECORDS)?;
    let needed = to - first_scan + 1;
    if count < needed {
        return Err(RawFileError::format(
            "trailer.count",
            format!("{count} events in the trailer, but scan {to} was requested"),
        ));
    }
    let mut events = Vec::with_capacity((to - from + 1) as usize);
    for i in 0..needed {
        let event = ScanEvent::decode(s, version)?;
        if first_scan + i >= from {
            events.push(event);
        }
    }
    if let Some(first_event) = events.first() {
        if first_event.preamble.dependent {
            return Err(RawFileError::Range {
                from,
                to,
                reason: format!("cannot form valid output starting with dependent scan {from}"),
            });
        }
    }
    Ok(events)
}

/// Read the instrument error log. Each entry is handed to `handler`; when
/// the handler returns `false` the entry is also logged at `warn` level.
/// Entries never abort the decode.
pub fn decode_error_log(
    s: &mut Stream<'_>,
    error_log_addr: u64,
    handler: &mut dyn FnMut(&InstrumentError) -> bool,
) -> Result<Vec<InstrumentError>> {
    s.seek(error_log_addr)?;
    let count = s.read_count("error_log.count", MAX_RECORDS)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let time = s.read_f64("error_log.time")?;
        let message = s.read_utf16("error_log.message")?;
        let entry = InstrumentError { time, message };
        if !handler(&entry) {
            warn!("instrument error at {:.4} min: {}", entry.time, entry.message);
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Consume the scan-event hierarchy that sits between the error log and the
/// parameter-stream header. Nothing in it is retained; it only positions the
/// stream.
pub fn skip_hierarchy(s: &mut Stream<'_>, version: u32) -> Result<()> {
    let nsegs = s.read_count("hierarchy.nsegs", MAX_RECORDS)?;
    for _ in 0..nsegs {
        let nevents = s.read_count("hierarchy.nevents", MAX_RECORDS)?;
        for _ in 0..nevents {
            ScanEventTemplate::skip(s, version)?;
        }
    }
    Ok(())
}

/// Type codes of the self-describing parameter schema. These are distinct
/// from the primitive template codes; the widths of the string kinds come
/// from the field's `length`, not the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericType {
    /// A section label; consumes no record bytes.
    Label,
    Char,
    TrueFalse,
    YesNo,
    OnOff,
    UChar,
    Short,
    UShort,
    Long,
    ULong,
    Float,
    Double,
    /// Fixed-width ASCII, `length` bytes.
    AsciiString,
    /// Fixed-width UTF-16, `length` characters.
    WideString,
}

impl GenericType {
    fn from_code(code: u32, path: &str) -> Result<Self> {
        Ok(match code {
            0x0 => Self::Label,
            0x1 => Self::Char,
            0x2 => Self::TrueFalse,
            0x3 => Self::YesNo,
            0x4 => Self::OnOff,
            0x5 => Self::UChar,
            0x6 => Self::Short,
            0x7 => Self::UShort,
            0x8 => Self::Long,
            0x9 => Self::ULong,
            0xA => Self::Float,
            0xB => Self::Double,
            0xC => Self::AsciiString,
            0xD => Self::WideString,
            other => {
                return Err(RawFileError::format(
                    path,
                    format!("unknown generic type code {other:#x}"),
                ))
            }
        })
    }
}

/// One field template of the parameters stream.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericField {
    pub ty: GenericType,
    pub length: u32,
    pub label: String,
}

/// A value decoded against a [`GenericField`].
#[derive(Debug, Clone, PartialEq)]
pub enum GenericValue {
    Label,
    Bool(bool),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    Text(String),
}

impl GenericValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U8(v) => Some(u32::from(*v)),
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            Self::I16(v) if *v >= 0 => Some(*v as u32),
            Self::I32(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl GenericField {
    fn decode_value(&self, s: &mut Stream<'_>) -> Result<GenericValue> {
        let path = "scan_parameters";
        Ok(match self.ty {
            GenericType::Label => GenericValue::Label,
            GenericType::Char | GenericType::UChar => GenericValue::U8(s.read_u8(path)?),
            GenericType::TrueFalse | GenericType::YesNo | GenericType::OnOff => {
                GenericValue::Bool(s.read_u8(path)? != 0)
            }
            GenericType::Short => GenericValue::I16(s.read_i16(path)?),
            GenericType::UShort => GenericValue::U16(s.read_u16(path)?),
            GenericType::Long => GenericValue::I32(s.read_i32(path)?),
            GenericType::ULong => GenericValue::U32(s.read_u32(path)?),
            GenericType::Float => GenericValue::F32(s.read_f32(path)?),
            GenericType::Double => GenericValue::F64(s.read_f64(path)?),
            GenericType::AsciiString => {
                let bytes = s.read_bytes(path, self.length as usize)?;
                GenericValue::Text(
                    String::from_utf8_lossy(&bytes)
                        .trim_end_matches('\0')
                        .to_string(),
                )
            }
            GenericType::WideString => {
                GenericValue::Text(s.read_utf16_fixed(path, self.length as usize)?)
            }
        })
    }
}

/// The runtime schema of the parameters stream: an ordered field-template
/// list read from the file itself.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericDataHeader {
    pub fields: Vec<GenericField>,
}

impl GenericDataHeader {
    pub fn decode(s: &mut Stream<'_>) -> Result<Self> {
        let nfields = s.read_count("generic_data_header.nfields", MAX_GENERIC_FIELDS)?;
        let mut fields = Vec::with_capacity(nfields as usize);
        for _ in 0..nfields {
            let code = s.read_u32("generic_data_header.type")?;
            let ty = GenericType::from_code(code, "generic_data_header.type")?;
            let length = s.read_u32("generic_data_header.length")?;
            let label = s.read_utf16("generic_data_header.label")?;
            fields.push(GenericField { ty, length, label });
        }
        Ok(Self { fields })
    }
}

/// One scan's parameter record, decoded against a [`GenericDataHeader`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParameters {
    values: Vec<(String, GenericValue)>,
}

impl ScanParameters {
    pub fn decode(s: &mut Stream<'_>, header: &GenericDataHeader) -> Result<Self> {
        let mut values = Vec::with_capacity(header.fields.len());
        for field in &header.fields {
            let value = field.decode_value(s)?;
            values.push((field.label.clone(), value));
        }
        Ok(Self { values })
    }

    /// Find a value by its label, ignoring the trailing colon the instrument
    /// appends to labels.
    pub fn get(&self, label: &str) -> Option<&GenericValue> {
        self.values
            .iter()
            .find(|(l, _)| l.trim_end().trim_end_matches(':') == label)
            .map(|(_, v)| v)
    }

    /// The charge state recorded for the scan; 0 when the instrument did not
    /// assign one.
    pub fn charge_state(&self) -> u32 {
        self.get("Charge State")
            .and_then(GenericValue::as_u32)
            .unwrap_or(0)
    }

    /// The ion injection time in milliseconds, when the instrument recorded
    /// one.
    pub fn injection_time(&self) -> Option<f64> {
        self.get("Ion Injection Time (ms)")
            .and_then(GenericValue::as_f64)
    }
}

/// Decode one parameters record per scan starting at `params_addr`.
pub fn decode_scan_parameters(
    s: &mut Stream<'_>,
    params_addr: u64,
    header: &GenericDataHeader,
    nscans: usize,
) -> Result<Vec<ScanParameters>> {
    s.seek(params_addr)?;
    (0..nscans).map(|_| ScanParameters::decode(s, header)).collect()
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::header::HeaderChain;
    use crate::synthetic::{FileBuilder, SynthScan};

    fn open_chain(bytes: Vec<u8>) -> (Cursor<Vec<u8>>, HeaderChain) {
        let mut src = Cursor::new(bytes);
        let chain = {
            let mut s = Stream::new(&mut src).unwrap();
            HeaderChain::decode(&mut s).unwrap()
        };
        (src, chain)
    }

    #[test]
    fn test_scan_index_record_size_probe() -> Result<()> {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0, 2.0]))
            .scan(SynthScan::ms1_profile(vec![3.0, 4.0]))
            .build();
        let (mut src, chain) = open_chain(bytes);
        let mut s = Stream::new(&mut src)?;
        let rh = &chain.run_header;
        let index = ScanIndex::decode(&mut s, rh.scan_index_addr, 57, 1, 1, 2)?;
        assert_eq!(index.len(), 2);
        // narrow entries: 7 leading integer fields plus six doubles
        assert_eq!(index.get(1).unwrap().offset, 0);
        assert!(index.get(2).unwrap().offset > 0);
        assert_eq!(index.get(3), None);
        Ok(())
    }

    #[test]
    fn test_trailer_requires_enough_events() {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .trailer_count(1)
            .build();
        let (mut src, chain) = open_chain(bytes);
        let mut s = Stream::new(&mut src).unwrap();
        let rh = &chain.run_header;
        let err = decode_trailer(&mut s, rh.trailer_addr, 57, 1, 1, 2).unwrap_err();
        assert!(matches!(err, RawFileError::Format { .. }));
    }

    #[test]
    fn test_trailer_window_retention() -> Result<()> {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .scan(SynthScan::ms1_profile(vec![2.0]))
            .scan(SynthScan::ms2_centroid(150.0, vec![(151.0, 9.0)]))
            .build();
        let (mut src, chain) = open_chain(bytes);
        let mut s = Stream::new(&mut src)?;
        let rh = &chain.run_header;
        let events = decode_trailer(&mut s, rh.trailer_addr, 57, 1, 2, 3)?;
        assert_eq!(events.len(), 2);
        assert!(!events[0].preamble.dependent);
        assert!(events[1].preamble.dependent);
        // a window opening on the dependent scan cannot be served
        let err = decode_trailer(&mut s, rh.trailer_addr, 57, 1, 3, 3).unwrap_err();
        match err {
            RawFileError::Range { reason, .. } => {
                assert_eq!(reason, "cannot form valid output starting with dependent scan 3");
            }
            other => panic!("expected Range error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_generic_parameters_and_charge_state() -> Result<()> {
        let mut scan = SynthScan::ms1_profile(vec![1.0]);
        scan.charge = 2;
        let bytes = FileBuilder::new(57).scan(scan).build();
        let (mut src, chain) = open_chain(bytes);
        let mut s = Stream::new(&mut src)?;
        let rh = &chain.run_header;

        let mut handler = |_: &InstrumentError| true;
        decode_error_log(&mut s, rh.error_log_addr, &mut handler)?;
        skip_hierarchy(&mut s, 57)?;
        let header = GenericDataHeader::decode(&mut s)?;
        assert_eq!(header.fields.len(), 3);
        assert_eq!(header.fields[0].ty, GenericType::Label);

        let params = decode_scan_parameters(&mut s, rh.params_addr, &header, 1)?;
        assert_eq!(params[0].charge_state(), 2);
        assert_eq!(params[0].injection_time(), Some(12.5));
        assert_eq!(params[0].get("No Such Label"), None);
        Ok(())
    }

    #[test]
    fn test_error_log_entries_surface_through_handler() -> Result<()> {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .error(1.23, "foo")
            .error(4.56, "bar")
            .build();
        let (mut src, chain) = open_chain(bytes);
        let mut s = Stream::new(&mut src)?;
        let mut seen = Vec::new();
        let mut handler = |e: &InstrumentError| {
            seen.push(e.clone());
            true
        };
        let entries = decode_error_log(&mut s, chain.run_header.error_log_addr, &mut handler)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], InstrumentError { time: 1.23, message: "foo".into() });
        Ok(())
    }
}
