//! The front matter of a RAW file.
//!
//! Decoding starts at offset 0 and walks `FileHeader → SeqRow → ASInfo →
//! RawFileInfo`, then seeks to each acquisition stream's `RunHeader` and
//! resolves which one is authoritative. Several of these records gain or
//! widen fields with the file schema version, so their template lists are
//! selected from per-version tables rather than branching inside the
//! decoders.

use log::debug;

use crate::error::{RawFileError, Result};
use crate::stream::{t, FieldTemplate, Record, Stream, Ty};

pub const MAGIC: u16 = 0xA101;
pub const SIGNATURE: &str = "Finnigan";

/// File schema versions this decoder knows the layouts for.
pub const SUPPORTED_VERSIONS: &[u32] = &[57, 62, 63, 64, 66];

/// Offsets widen from 32 to 64 bits at version 64.
pub(crate) fn wide_addresses(version: u32) -> bool {
    version >= 64
}

const FILE_HEADER: &[FieldTemplate] = &[
    t("magic", Ty::U16, "file magic"),
    t("signature", Ty::Utf16Counted, "format signature"),
    t("version", Ty::U32, "file schema version"),
    t("run_date", Ty::F64, "acquisition timestamp"),
    t("comment", Ty::Utf16Counted, "operator comment"),
];

/// The self-describing head of the file. Every later record layout is
/// parameterized by the `version` carried here.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub version: u32,
    pub run_date: f64,
    pub comment: String,
}

impl FileHeader {
    pub fn decode(s: &mut Stream<'_>) -> Result<Self> {
        let rec = s.read_record("file_header", FILE_HEADER, 0)?;
        let magic = rec.u16("magic")?;
        if magic != MAGIC {
            return Err(RawFileError::format(
                "file_header.magic",
                format!("expected {MAGIC:#06x}, found {magic:#06x}"),
            ));
        }
        let signature = rec.text("signature")?;
        if signature != SIGNATURE {
            return Err(RawFileError::format(
                "file_header.signature",
                format!("expected {SIGNATURE:?}, found {signature:?}"),
            ));
        }
        let version = rec.u32("version")?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(RawFileError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            run_date: rec.f64("run_date")?,
            comment: rec.text("comment")?.to_string(),
        })
    }
}

const SEQ_ROW_FIELDS: &[FieldTemplate] = &[
    t("row", Ty::U32, "sequence row number"),
    t("sample_name", Ty::Utf16Counted, "sample name"),
    t("sample_id", Ty::Utf16Counted, "sample id"),
    t("comment", Ty::Utf16Counted, "sample comment"),
    t("vial", Ty::Utf16Counted, "vial label"),
    t("inlet_method", Ty::Utf16Counted, "inlet method"),
];

fn seq_row_templates(version: u32) -> &'static [FieldTemplate] {
    if version >= 62 {
        SEQ_ROW_FIELDS
    } else {
        &SEQ_ROW_FIELDS[..4]
    }
}

/// One row of the acquisition sequence: where the sample came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqRow {
    pub row: u32,
    pub sample_name: String,
    pub sample_id: String,
    pub comment: String,
    pub vial: Option<String>,
    pub inlet_method: Option<String>,
}

impl SeqRow {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("seq_row", seq_row_templates(version), version)?;
        let (vial, inlet_method) = if version >= 62 {
            (
                Some(rec.text("vial")?.to_string()),
                Some(rec.text("inlet_method")?.to_string()),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            row: rec.u32("row")?,
            sample_name: rec.text("sample_name")?.to_string(),
            sample_id: rec.text("sample_id")?.to_string(),
            comment: rec.text("comment")?.to_string(),
            vial,
            inlet_method,
        })
    }
}

const AS_INFO: &[FieldTemplate] = &[
    t("flags", Ty::U32, "autosampler flags"),
    t("text", Ty::Utf16Counted, "autosampler text"),
];

/// Autosampler information. Carried through for completeness; nothing in the
/// scan path depends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ASInfo {
    pub flags: u32,
    pub text: String,
}

impl ASInfo {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("as_info", AS_INFO, version)?;
        Ok(Self {
            flags: rec.u32("flags")?,
            text: rec.text("text")?.to_string(),
        })
    }
}

fn decode_raw_file_info_preamble(s: &mut Stream<'_>, version: u32) -> Result<Record> {
    const NARROW: &[FieldTemplate] = &[
        t("year", Ty::U16, "acquisition year"),
        t("month", Ty::U16, "acquisition month"),
        t("weekday", Ty::U16, "acquisition weekday"),
        t("day", Ty::U16, "acquisition day"),
        t("hour", Ty::U16, "acquisition hour"),
        t("minute", Ty::U16, "acquisition minute"),
        t("second", Ty::U16, "acquisition second"),
        t("millisecond", Ty::U16, "acquisition millisecond"),
        t("run_header_addr0", Ty::U32, "run header address, stream 0"),
        t("run_header_addr1", Ty::U32, "run header address, stream 1"),
    ];
    const WIDE: &[FieldTemplate] = &[
        t("year", Ty::U16, "acquisition year"),
        t("month", Ty::U16, "acquisition month"),
        t("weekday", Ty::U16, "acquisition weekday"),
        t("day", Ty::U16, "acquisition day"),
        t("hour", Ty::U16, "acquisition hour"),
        t("minute", Ty::U16, "acquisition minute"),
        t("second", Ty::U16, "acquisition second"),
        t("millisecond", Ty::U16, "acquisition millisecond"),
        t("run_header_addr0", Ty::U64, "run header address, stream 0"),
        t("run_header_addr1", Ty::U64, "run header address, stream 1"),
    ];
    let templates = if wide_addresses(version) { WIDE } else { NARROW };
    s.read_record("raw_file_info.preamble", templates, version)
}

const RAW_FILE_INFO: &[FieldTemplate] = &[
    t("preamble", Ty::Struct(decode_raw_file_info_preamble), "preamble"),
    t("heading1", Ty::Utf16Counted, "heading"),
    t("heading2", Ty::Utf16Counted, "heading"),
];

/// Points at the acquisition streams. A file carries up to two run headers;
/// the second address is zero when there is only one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFileInfo {
    pub run_header_addr: [u64; 2],
    pub heading1: String,
    pub heading2: String,
}

impl RawFileInfo {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("raw_file_info", RAW_FILE_INFO, version)?;
        let preamble = rec.record("preamble")?;
        Ok(Self {
            run_header_addr: [
                preamble.addr("run_header_addr0")?,
                preamble.addr("run_header_addr1")?,
            ],
            heading1: rec.text("heading1")?.to_string(),
            heading2: rec.text("heading2")?.to_string(),
        })
    }
}

fn decode_sample_info(s: &mut Stream<'_>, version: u32) -> Result<Record> {
    const SAMPLE_INFO: &[FieldTemplate] = &[
        t("first_scan", Ty::U32, "first scan number"),
        t("last_scan", Ty::U32, "last scan number"),
        t("low_mz", Ty::F64, "lowest m/z acquired"),
        t("high_mz", Ty::F64, "highest m/z acquired"),
        t("start_time", Ty::F64, "run start time"),
        t("end_time", Ty::F64, "run end time"),
        t("max_ion_current", Ty::F64, "maximum ion current"),
    ];
    s.read_record("run_header.sample_info", SAMPLE_INFO, version)
}

fn run_header_templates(version: u32) -> &'static [FieldTemplate] {
    const NARROW: &[FieldTemplate] = &[
        t("sample_info", Ty::Struct(decode_sample_info), "sample info"),
        t("data_addr", Ty::U32, "scan data address"),
        t("scan_index_addr", Ty::U32, "scan index address"),
        t("trailer_addr", Ty::U32, "scan event trailer address"),
        t("params_addr", Ty::U32, "scan parameters address"),
        t("error_log_addr", Ty::U32, "error log address"),
        t("ntrailer", Ty::U32, "trailer event count"),
        t("tag", Ty::Utf16Counted, "stream tag"),
    ];
    const WIDE: &[FieldTemplate] = &[
        t("sample_info", Ty::Struct(decode_sample_info), "sample info"),
        t("data_addr", Ty::U64, "scan data address"),
        t("scan_index_addr", Ty::U64, "scan index address"),
        t("trailer_addr", Ty::U64, "scan event trailer address"),
        t("params_addr", Ty::U64, "scan parameters address"),
        t("error_log_addr", Ty::U64, "error log address"),
        t("ntrailer", Ty::U32, "trailer event count"),
        t("tag", Ty::Utf16Counted, "stream tag"),
    ];
    if wide_addresses(version) {
        WIDE
    } else {
        NARROW
    }
}

/// The acquired scan range and the global statistics of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    /// First scan number, 1-based, inclusive.
    pub first_scan: u32,
    /// Last scan number, 1-based, inclusive.
    pub last_scan: u32,
    pub low_mz: f64,
    pub high_mz: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub max_ion_current: f64,
}

/// One acquisition stream's directory: where every region of the stream
/// lives in the file. All addresses are absolute byte offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub sample_info: SampleInfo,
    pub data_addr: u64,
    pub scan_index_addr: u64,
    pub trailer_addr: u64,
    pub params_addr: u64,
    pub error_log_addr: u64,
    pub ntrailer: u32,
    pub tag: String,
}

impl RunHeader {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("run_header", run_header_templates(version), version)?;
        let si = rec.record("sample_info")?;
        let sample_info = SampleInfo {
            first_scan: si.u32("first_scan")?,
            last_scan: si.u32("last_scan")?,
            low_mz: si.f64("low_mz")?,
            high_mz: si.f64("high_mz")?,
            start_time: si.f64("start_time")?,
            end_time: si.f64("end_time")?,
            max_ion_current: si.f64("max_ion_current")?,
        };
        if sample_info.last_scan < sample_info.first_scan || sample_info.first_scan == 0 {
            return Err(RawFileError::format(
                "run_header.sample_info",
                format!(
                    "impossible scan bounds [{}, {}]",
                    sample_info.first_scan, sample_info.last_scan
                ),
            ));
        }
        Ok(Self {
            sample_info,
            data_addr: rec.addr("data_addr")?,
            scan_index_addr: rec.addr("scan_index_addr")?,
            trailer_addr: rec.addr("trailer_addr")?,
            params_addr: rec.addr("params_addr")?,
            error_log_addr: rec.addr("error_log_addr")?,
            ntrailer: rec.u32("ntrailer")?,
            tag: rec.text("tag")?.to_string(),
        })
    }
}

const INST_ID: &[FieldTemplate] = &[
    t("flags", Ty::U32, "instrument flags"),
    t("model", Ty::Utf16Counted, "instrument model"),
    t("name", Ty::Utf16Counted, "instrument name"),
    t("serial_number", Ty::Utf16Counted, "serial number"),
    t("software_version", Ty::Utf16Counted, "software version"),
];

/// A description of the instrument hardware and control software, stored
/// immediately after the authoritative run header.
#[derive(Debug, Clone, PartialEq)]
pub struct InstID {
    pub model: String,
    pub name: String,
    pub serial_number: String,
    pub software_version: String,
}

impl InstID {
    pub fn decode(s: &mut Stream<'_>, version: u32) -> Result<Self> {
        let rec = s.read_record("inst_id", INST_ID, version)?;
        Ok(Self {
            model: rec.text("model")?.to_string(),
            name: rec.text("name")?.to_string(),
            serial_number: rec.text("serial_number")?.to_string(),
            software_version: rec.text("software_version")?.to_string(),
        })
    }
}

/// The fully traversed front matter, with the authoritative run header
/// already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderChain {
    pub file_header: FileHeader,
    pub seq_row: SeqRow,
    pub as_info: ASInfo,
    pub raw_file_info: RawFileInfo,
    pub run_header: RunHeader,
    pub inst_id: InstID,
}

impl HeaderChain {
    /// Walk the front matter from offset 0 and pick the acquisition stream
    /// that carries trailer events. Exactly one stream may do so; a file
    /// where both or neither claim events is malformed.
    pub fn decode(s: &mut Stream<'_>) -> Result<Self> {
        s.seek(0)?;
        let file_header = FileHeader::decode(s)?;
        let version = file_header.version;
        debug!("file schema version {version}");
        let seq_row = SeqRow::decode(s, version)?;
        let as_info = ASInfo::decode(s, version)?;
        let raw_file_info = RawFileInfo::decode(s, version)?;

        s.seek(raw_file_info.run_header_addr[0])?;
        let first = RunHeader::decode(s, version)?;
        let first_end = s.position();
        let second = if raw_file_info.run_header_addr[1] != 0 {
            s.seek(raw_file_info.run_header_addr[1])?;
            let rh = RunHeader::decode(s, version)?;
            Some((rh, s.position()))
        } else {
            None
        };

        let second_ntrailer = second.as_ref().map(|(rh, _)| rh.ntrailer).unwrap_or(0);
        if first.ntrailer > 0 && second_ntrailer > 0 {
            return Err(RawFileError::AmbiguousRunHeader(
                first.ntrailer,
                second_ntrailer,
            ));
        }
        if first.ntrailer == 0 && second_ntrailer == 0 {
            return Err(RawFileError::MissingRunHeader(0, 0));
        }
        let (run_header, end) = if first.ntrailer > 0 {
            (first, first_end)
        } else {
            second.unwrap_or((first, first_end))
        };
        debug!(
            "stream `{}`: scans [{}, {}], data at {:#x}, index at {:#x}",
            run_header.tag,
            run_header.sample_info.first_scan,
            run_header.sample_info.last_scan,
            run_header.data_addr,
            run_header.scan_index_addr,
        );

        s.seek(end)?;
        let inst_id = InstID::decode(s, version)?;
        Ok(Self {
            file_header,
            seq_row,
            as_info,
            raw_file_info,
            run_header,
            inst_id,
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::synthetic::{FileBuilder, SynthScan};

    #[test]
    fn test_chain_decodes_v57() -> Result<()> {
        let bytes = FileBuilder::new(57).scan(SynthScan::ms1_profile(vec![10.0; 4])).build();
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src)?;
        let chain = HeaderChain::decode(&mut s)?;
        assert_eq!(chain.file_header.version, 57);
        assert_eq!(chain.seq_row.vial, None);
        assert_eq!(chain.run_header.sample_info.first_scan, 1);
        assert_eq!(chain.run_header.sample_info.last_scan, 1);
        assert_eq!(chain.inst_id.model, "LTQ FT");
        Ok(())
    }

    #[test]
    fn test_chain_decodes_v64_wide_addresses() -> Result<()> {
        let bytes = FileBuilder::new(64).scan(SynthScan::ms1_profile(vec![10.0; 4])).build();
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src)?;
        let chain = HeaderChain::decode(&mut s)?;
        assert_eq!(chain.file_header.version, 64);
        assert_eq!(chain.seq_row.vial.as_deref(), Some("V1"));
        assert!(chain.run_header.data_addr > 0);
        Ok(())
    }

    #[test]
    fn test_run_header_round_trip() -> Result<()> {
        let bytes = FileBuilder::new(57).scan(SynthScan::ms1_profile(vec![1.0; 2])).build();
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src)?;
        let chain = HeaderChain::decode(&mut s)?;
        s.seek(chain.raw_file_info.run_header_addr[0])?;
        let again = RunHeader::decode(&mut s, 57)?;
        assert_eq!(again, chain.run_header);
        Ok(())
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut bytes = FileBuilder::new(57).scan(SynthScan::ms1_profile(vec![1.0])).build();
        bytes[0] = 0xFF;
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src).unwrap();
        let err = HeaderChain::decode(&mut s).unwrap_err();
        assert!(matches!(err, RawFileError::Format { .. }));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let builder = FileBuilder::new(57).scan(SynthScan::ms1_profile(vec![1.0]));
        let mut bytes = builder.build();
        // version sits right after the magic and the counted signature
        let version_at = 2 + 4 + 2 * SIGNATURE.len();
        bytes[version_at..version_at + 4].copy_from_slice(&59u32.to_le_bytes());
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src).unwrap();
        let err = HeaderChain::decode(&mut s).unwrap_err();
        assert!(matches!(err, RawFileError::UnsupportedVersion(59)));
    }

    #[test]
    fn test_ambiguous_run_headers() {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .ntrailer_pair(3, 42)
            .build();
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src).unwrap();
        let err = HeaderChain::decode(&mut s).unwrap_err();
        assert!(matches!(err, RawFileError::AmbiguousRunHeader(3, 42)));
    }

    #[test]
    fn test_missing_run_headers() {
        let bytes = FileBuilder::new(57)
            .scan(SynthScan::ms1_profile(vec![1.0]))
            .ntrailer_pair(0, 0)
            .build();
        let mut src = Cursor::new(bytes);
        let mut s = Stream::new(&mut src).unwrap();
        let err = HeaderChain::decode(&mut s).unwrap_err();
        assert!(matches!(err, RawFileError::MissingRunHeader(0, 0)));
    }
}
