//! The public reading interface.
//!
//! [`RawFileReader::open`] traverses the front matter and decodes every
//! lookup table eagerly; scan payloads are then read on demand, either one
//! at a time with [`RawFileReader::get`] or in order through
//! [`RawFileReader::scans`]. The reader owns the byte source for its whole
//! lifetime and releases it when dropped.

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::RangeInclusive;
use std::path::PathBuf;

use log::debug;

use crate::error::{InstrumentError, RawFileError, Result};
use crate::event::{ActivationMethod, Converter, Polarity, ScanEvent, ScanType};
use crate::header::{HeaderChain, InstID, SampleInfo};
use crate::index::{
    decode_error_log, decode_scan_parameters, decode_trailer, skip_hierarchy, GenericDataHeader,
    ScanIndex, ScanParameters,
};
use crate::scan::{
    find_peak_intensity, read_scan_payload, CentroidList, Profile, ScanPayload,
    DEFAULT_BOOKEND_WIDTH,
};
use crate::stream::{ReadSeek, Stream};

/// Which stored representation a scan's peak list is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakMode {
    /// Use the profile. A scan that stores only a centroid list fails with
    /// [`RawFileError::NoProfile`].
    #[default]
    Profile,
    /// Prefer the centroid list, falling back to the profile when a scan
    /// stores none.
    Centroid,
}

/// A callback deciding what to do with entries of the instrument's error
/// log. Returning `true` suppresses the default `warn`-level log line.
pub type InstrumentErrorHandler = Box<dyn FnMut(&InstrumentError) -> bool>;

/// Options applied while opening a file.
#[derive(Default)]
pub struct DecoderOptions {
    pub peak_mode: PeakMode,
    pub bookend_width: Option<u32>,
    pub instrument_error_handler: Option<InstrumentErrorHandler>,
}

impl Debug for DecoderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderOptions")
            .field("peak_mode", &self.peak_mode)
            .field("bookend_width", &self.bookend_width)
            .field(
                "instrument_error_handler",
                &self.instrument_error_handler.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

/// The rendered peak data of the most recently read survey scan. Dependent
/// scans read after it resolve their precursor intensities against this.
struct ParentScan {
    number: u32,
    peaks: Vec<(f64, f32)>,
}

/// A reader over a Finnigan RAW file.
///
/// Opening performs the whole front-matter traversal and decodes the scan
/// index, the trailer, the error log and the parameters stream for the full
/// acquired range; those streams are not random-accessible, so this is done
/// once. The source is held until the reader is dropped.
pub struct RawFileReader {
    source: Box<dyn ReadSeek>,
    chain: HeaderChain,
    scan_index: ScanIndex,
    events: Vec<ScanEvent>,
    params: Vec<ScanParameters>,
    error_log: Vec<InstrumentError>,
    peak_mode: PeakMode,
    bookend_width: u32,
    parent: Option<ParentScan>,
}

impl Debug for RawFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFileReader")
            .field("version", &self.version())
            .field("first_scan", &self.first_scan())
            .field("last_scan", &self.last_scan())
            .field("peak_mode", &self.peak_mode)
            .finish()
    }
}

impl RawFileReader {
    /// Open a RAW file from a path with default options.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        Self::open_with(path, DecoderOptions::default())
    }

    /// Open a RAW file from a path.
    pub fn open_with<P: Into<PathBuf>>(path: P, options: DecoderOptions) -> Result<Self> {
        let path: PathBuf = path.into();
        let file = File::open(&path).map_err(|e| RawFileError::Io {
            path: path.display().to_string(),
            offset: 0,
            source: e,
        })?;
        Self::open_source(BufReader::new(file), options)
    }

    /// Open a RAW file from any seekable byte source.
    pub fn open_source<R: Read + Seek + 'static>(
        source: R,
        mut options: DecoderOptions,
    ) -> Result<Self> {
        let mut source: Box<dyn ReadSeek> = Box::new(source);
        let mut handler = options.instrument_error_handler.take();

        let mut s = Stream::new(source.as_mut())?;
        let chain = HeaderChain::decode(&mut s)?;
        let version = chain.file_header.version;
        let rh = &chain.run_header;
        let first = rh.sample_info.first_scan;
        let last = rh.sample_info.last_scan;
        debug!("decoding tables for scans [{first}, {last}]");

        let scan_index =
            ScanIndex::decode(&mut s, rh.scan_index_addr, version, first, first, last)?;
        let events = decode_trailer(&mut s, rh.trailer_addr, version, first, first, last)?;
        let error_log = decode_error_log(&mut s, rh.error_log_addr, &mut |e| {
            handler.as_mut().map(|h| h(e)).unwrap_or(false)
        })?;
        skip_hierarchy(&mut s, version)?;
        let generic_header = GenericDataHeader::decode(&mut s)?;
        let params = decode_scan_parameters(
            &mut s,
            rh.params_addr,
            &generic_header,
            (last - first + 1) as usize,
        )?;
        drop(s);

        Ok(Self {
            source,
            chain,
            scan_index,
            events,
            params,
            error_log,
            peak_mode: options.peak_mode,
            bookend_width: options.bookend_width.unwrap_or(DEFAULT_BOOKEND_WIDTH),
            parent: None,
        })
    }

    pub fn version(&self) -> u32 {
        self.chain.file_header.version
    }

    /// The scan number of the first acquired scan.
    pub fn first_scan(&self) -> u32 {
        self.chain.run_header.sample_info.first_scan
    }

    /// The scan number of the last acquired scan.
    pub fn last_scan(&self) -> u32 {
        self.chain.run_header.sample_info.last_scan
    }

    /// The number of scans in the file.
    pub fn len(&self) -> usize {
        (self.last_scan() - self.first_scan() + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_info(&self) -> &SampleInfo {
        &self.chain.run_header.sample_info
    }

    /// The instrument hardware and software description.
    pub fn instrument(&self) -> &InstID {
        &self.chain.inst_id
    }

    /// Entries of the instrument's own error log, in file order.
    pub fn error_log(&self) -> &[InstrumentError] {
        &self.error_log
    }

    pub fn peak_mode(&self) -> PeakMode {
        self.peak_mode
    }

    /// Set which stored representation peak lists are built from.
    pub fn set_peak_mode(&mut self, mode: PeakMode) {
        self.peak_mode = mode;
    }

    /// Set the zero-bin padding width used for multi-chunk profiles.
    pub fn set_bookend_width(&mut self, width: u32) {
        self.bookend_width = width;
    }

    /// The total-ion-current trace: `(retention time in minutes, total ion
    /// current)` per scan, straight from the scan index.
    pub fn tic(&self) -> Vec<(f64, f64)> {
        self.scan_index
            .iter()
            .map(|e| (e.start_time, e.total_current))
            .collect()
    }

    /// The base-peak trace: `(retention time in minutes, base peak
    /// intensity)` per scan.
    pub fn bpc(&self) -> Vec<(f64, f64)> {
        self.scan_index
            .iter()
            .map(|e| (e.start_time, e.base_intensity))
            .collect()
    }

    /// The acquisition settings of a scan, as read from the trailer.
    pub fn event(&self, number: u32) -> Option<&ScanEvent> {
        number
            .checked_sub(self.first_scan())
            .and_then(|i| self.events.get(i as usize))
    }

    /// A scan's record from the parameters stream.
    pub fn parameters(&self, number: u32) -> Option<&ScanParameters> {
        number
            .checked_sub(self.first_scan())
            .and_then(|i| self.params.get(i as usize))
    }

    /// Read one scan by its 1-based number.
    pub fn get(&mut self, number: u32) -> Result<Scan> {
        let (first, last) = (self.first_scan(), self.last_scan());
        if number < first || number > last {
            return Err(RawFileError::Range {
                from: number,
                to: number,
                reason: format!("outside the acquired scans [{first}, {last}]"),
            });
        }
        self.read_scan(number)
    }

    /// Iterate scans `[from, to]` in ascending order.
    ///
    /// The range must lie within the acquired scans and must not start on a
    /// dependent scan, since its precursor would have no parent inside the
    /// range.
    pub fn scans(&mut self, range: RangeInclusive<u32>) -> Result<ScanIter<'_>> {
        let (from, to) = (*range.start(), *range.end());
        let (first, last) = (self.first_scan(), self.last_scan());
        if from > to {
            return Err(RawFileError::Range {
                from,
                to,
                reason: "empty range".to_string(),
            });
        }
        if from < first || to > last {
            return Err(RawFileError::Range {
                from,
                to,
                reason: format!("outside the acquired scans [{first}, {last}]"),
            });
        }
        let start_event = &self.events[(from - first) as usize];
        if start_event.preamble.dependent {
            return Err(RawFileError::Range {
                from,
                to,
                reason: format!("cannot form valid output starting with dependent scan {from}"),
            });
        }
        Ok(ScanIter {
            reader: self,
            next: from,
            to,
        })
    }

    /// Iterate every scan in the file.
    pub fn iter(&mut self) -> Result<ScanIter<'_>> {
        self.scans(self.first_scan()..=self.last_scan())
    }

    /// The maximum intensity within ±0.1 m/z of `mz` in the current parent
    /// scan's rendered peaks, or `0.0` when no survey scan has been read yet
    /// or nothing falls inside the window.
    pub fn find_peak_intensity(&self, mz: f64) -> f32 {
        self.parent
            .as_ref()
            .map(|p| find_peak_intensity(&p.peaks, mz))
            .unwrap_or(0.0)
    }

    /// The scan number of the current parent (survey) scan, if any.
    pub fn parent_scan_number(&self) -> Option<u32> {
        self.parent.as_ref().map(|p| p.number)
    }

    /// A utility for debugging: read a scan and print a summary of it to
    /// `STDOUT`.
    pub fn describe(&mut self, number: u32) {
        match self.get(number) {
            Ok(scan) => {
                let m = &scan.metadata;
                println!(
                    "{}|{} ms{} {} | rt {:.2} s | {} peaks",
                    m.num,
                    m.polarity.as_str(),
                    m.ms_level,
                    m.filter_line,
                    m.retention_time_seconds,
                    scan.peaks().len(),
                );
                if let Some(mz) = m.precursor_mz {
                    println!(
                        "precursor {mz:.4}, intensity {:.2}, charge {:?}",
                        m.precursor_intensity.unwrap_or(0.0),
                        m.charge_state,
                    );
                }
            }
            Err(e) => println!("scan {number}: {e}"),
        }
    }

    fn read_scan(&mut self, number: u32) -> Result<Scan> {
        let first = self.first_scan();
        let entry = self
            .scan_index
            .get(number)
            .cloned()
            .ok_or_else(|| RawFileError::Range {
                from: number,
                to: number,
                reason: "scan has no index entry".to_string(),
            })?;
        let event = self.events[(number - first) as usize].clone();
        let charge = self.params[(number - first) as usize].charge_state();

        let data_addr = self.chain.run_header.data_addr;
        let payload = {
            let mut s = Stream::new(self.source.as_mut())?;
            read_scan_payload(&mut s, data_addr, entry.offset)?
        };

        if self.peak_mode == PeakMode::Profile
            && payload.profile.is_none()
            && payload.centroids.is_some()
        {
            return Err(RawFileError::NoProfile(number));
        }

        let dependent = event.preamble.dependent;
        let reaction = event.reaction.clone();
        let precursor_intensity = if dependent {
            reaction
                .as_ref()
                .and_then(|r| self.parent.as_ref().map(|p| find_peak_intensity(&p.peaks, r.precursor_mz)))
        } else {
            None
        };

        let metadata = ScanMetadata {
            num: number,
            ms_level: event.preamble.ms_power,
            polarity: event.preamble.polarity,
            scan_type: event.preamble.scan_type,
            filter_line: event.to_string(),
            retention_time_seconds: entry.start_time * 60.0,
            low_mz: entry.low_mz,
            high_mz: entry.high_mz,
            base_peak_mz: entry.base_mz,
            base_peak_intensity: entry.base_intensity,
            total_ion_current: entry.total_current,
            charge_state: (charge > 0).then_some(charge),
            collision_energy: reaction.as_ref().map(|r| r.energy),
            precursor_mz: reaction.as_ref().map(|r| r.precursor_mz),
            precursor_intensity,
            activation_method: reaction.as_ref().map(|r| r.activation),
        };

        let scan = Scan {
            metadata,
            payload,
            converter: event.converter,
            peak_mode: self.peak_mode,
            bookend_width: self.bookend_width,
        };

        // a survey scan becomes the parent for the dependent scans that
        // follow it; dependent scans never displace it
        if !dependent {
            self.parent = Some(ParentScan {
                number,
                peaks: scan.peaks(),
            });
        }

        Ok(scan)
    }
}

/// Everything known about a scan without rendering its peaks.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanMetadata {
    /// 1-based scan number.
    pub num: u32,
    pub ms_level: u16,
    pub polarity: Polarity,
    pub scan_type: ScanType,
    pub filter_line: String,
    pub retention_time_seconds: f64,
    pub low_mz: f64,
    pub high_mz: f64,
    pub base_peak_mz: f64,
    pub base_peak_intensity: f64,
    pub total_ion_current: f64,
    pub charge_state: Option<u32>,
    pub collision_energy: Option<f64>,
    pub precursor_mz: Option<f64>,
    /// Intensity of the precursor looked up in the parent scan's peaks.
    /// Absent when no parent scan was read before this one.
    pub precursor_intensity: Option<f32>,
    pub activation_method: Option<ActivationMethod>,
}

/// One decoded scan: eager metadata plus the stored data sections, rendered
/// into a peak list on demand.
#[derive(Debug, Clone)]
pub struct Scan {
    pub metadata: ScanMetadata,
    payload: ScanPayload,
    converter: Converter,
    peak_mode: PeakMode,
    bookend_width: u32,
}

impl Scan {
    /// Render the `(m/z, intensity)` sequence according to the reader's peak
    /// mode. Empty when the scan stores no data at all.
    pub fn peaks(&self) -> Vec<(f64, f32)> {
        match self.peak_mode {
            PeakMode::Centroid => {
                if let Some(c) = &self.payload.centroids {
                    return c.peaks.clone();
                }
                self.render_profile()
            }
            PeakMode::Profile => self.render_profile(),
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.payload.profile.as_ref()
    }

    pub fn centroids(&self) -> Option<&CentroidList> {
        self.payload.centroids.as_ref()
    }

    fn render_profile(&self) -> Vec<(f64, f32)> {
        self.payload
            .profile
            .as_ref()
            .map(|p| p.render(&self.converter, self.bookend_width))
            .unwrap_or_default()
    }
}

/// An iterator reading successive scans from a [`RawFileReader`].
#[derive(Debug)]
pub struct ScanIter<'a> {
    reader: &'a mut RawFileReader,
    next: u32,
    to: u32,
}

impl Iterator for ScanIter<'_> {
    type Item = Result<Scan>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.to {
            return None;
        }
        let number = self.next;
        self.next += 1;
        Some(self.reader.read_scan(number))
    }
}
