//! Read Thermo/Finnigan RAW files with a native, pure-Rust decoder.
//!
//! The main access point is [`RawFileReader`], via [`RawFileReader::open`].
//!
//! ```no_run
//! use finnigan::RawFileReader;
//!
//! fn example() -> finnigan::Result<()> {
//!     let mut reader = RawFileReader::open("sample.RAW")?;
//!     println!("instrument: {}", reader.instrument().model);
//!     for scan in reader.iter()? {
//!         let scan = scan?;
//!         println!(
//!             "scan {} (ms{}): {} peaks",
//!             scan.metadata.num,
//!             scan.metadata.ms_level,
//!             scan.peaks().len()
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # What gets decoded when
//!
//! Opening a file traverses the front matter (`FileHeader → SeqRow → ASInfo
//! → RawFileInfo → RunHeader → InstID`) and eagerly decodes every per-scan
//! table: the scan index, the scan-event trailer, the instrument error log
//! and the self-describing parameters stream. Those streams are sequential
//! by construction, so they are read once, up front. Scan payloads (the
//! gap-compressed profile and the centroid list) are only read when a scan
//! is requested.
//!
//! # Limitations
//!
//! The decoder understands file schema versions 57, 62, 63, 64 and 66 and
//! fails fast on anything else. It reads acquisition data only; writing RAW
//! files, centroiding profile spectra, and chemistry-level analysis are out
//! of scope.

pub(crate) mod error;
pub(crate) mod event;
pub(crate) mod header;
pub(crate) mod index;
pub(crate) mod reader;
pub(crate) mod scan;
pub(crate) mod stream;

#[cfg(test)]
pub(crate) mod synthetic;

pub use crate::error::{InstrumentError, RawFileError, Result};
pub use crate::event::{
    ActivationMethod, Analyzer, Converter, Detector, IonizationMode, Polarity, Reaction,
    ScanEvent, ScanEventPreamble, ScanType,
};
pub use crate::header::{
    ASInfo, FileHeader, HeaderChain, InstID, RawFileInfo, RunHeader, SampleInfo, SeqRow,
    SUPPORTED_VERSIONS,
};
pub use crate::index::{
    GenericDataHeader, GenericField, GenericType, GenericValue, ScanIndex, ScanIndexEntry,
    ScanParameters,
};
pub use crate::reader::{
    DecoderOptions, InstrumentErrorHandler, PeakMode, RawFileReader, Scan, ScanIter,
    ScanMetadata,
};
pub use crate::scan::{
    find_peak_intensity, CentroidList, Profile, ProfileChunk, ScanHeader,
    DEFAULT_BOOKEND_WIDTH, PRECURSOR_MZ_TOLERANCE,
};
pub use crate::stream::{FieldTemplate, Record, Stream, Ty, Value};
