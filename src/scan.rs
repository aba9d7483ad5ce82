//! Scan payloads: the profile and centroid data stored for each scan.
//!
//! A scan's data packet starts with a fixed [`ScanHeader`] whose size fields
//! say which of the two representations follow. Profiles are gap-compressed:
//! only runs of bins with signal are stored, as chunks anchored at a first
//! bin index. The m/z axis is reconstructed through the scan event's
//! [`Converter`].

use crate::error::{RawFileError, Result};
use crate::event::Converter;
use crate::stream::{t, FieldTemplate, Stream, Ty};

const MAX_CHUNKS: u32 = 1 << 22;
const MAX_BINS: u32 = 1 << 26;
const MAX_PEAKS: u32 = 1 << 24;

/// Zero bins padded onto each side of a chunk when rendering multi-chunk
/// profiles, so downstream tools see well-defined peak baselines.
pub const DEFAULT_BOOKEND_WIDTH: u32 = 4;

/// The m/z window searched around a precursor when looking up its intensity
/// in the parent scan.
pub const PRECURSOR_MZ_TOLERANCE: f64 = 0.1;

const SCAN_HEADER: &[FieldTemplate] = &[
    t("unknown", Ty::U32, "reserved"),
    t("profile_size", Ty::U32, "profile size, 4-byte words"),
    t("peak_list_size", Ty::U32, "centroid list size, 4-byte words"),
    t("layout", Ty::U32, "profile layout"),
    t("descriptor_list_size", Ty::U32, "descriptor list size"),
    t("unknown_stream_size", Ty::U32, "unknown stream size"),
    t("triplet_stream_size", Ty::U32, "triplet stream size"),
    t("unknown2", Ty::U32, "reserved"),
    t("low_mz", Ty::F32, "lowest m/z"),
    t("high_mz", Ty::F32, "highest m/z"),
];

/// The fixed head of a scan data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanHeader {
    pub profile_size: u32,
    pub peak_list_size: u32,
    pub layout: u32,
    pub low_mz: f32,
    pub high_mz: f32,
}

impl ScanHeader {
    pub fn decode(s: &mut Stream<'_>) -> Result<Self> {
        let rec = s.read_record("scan_header", SCAN_HEADER, 0)?;
        Ok(Self {
            profile_size: rec.u32("profile_size")?,
            peak_list_size: rec.u32("peak_list_size")?,
            layout: rec.u32("layout")?,
            low_mz: rec.f32("low_mz")?,
            high_mz: rec.f32("high_mz")?,
        })
    }
}

/// One stored run of profile bins.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileChunk {
    /// Index of the first stored bin on the profile's bin axis.
    pub first_bin: u32,
    /// Small m/z correction applied to every bin of the chunk.
    pub fudge: f32,
    pub signal: Vec<f32>,
}

/// A gap-compressed profile spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub first_value: f64,
    pub step: f64,
    /// Total number of valid bins on the profile's bin axis.
    pub nbins: u32,
    pub chunks: Vec<ProfileChunk>,
}

impl Profile {
    pub fn decode(s: &mut Stream<'_>, layout: u32) -> Result<Self> {
        let first_value = s.read_f64("profile.first_value")?;
        let step = s.read_f64("profile.step")?;
        let nchunks = s.read_count("profile.peak_count", MAX_CHUNKS)?;
        let nbins = s.read_count("profile.nbins", MAX_BINS)?;
        let mut chunks = Vec::with_capacity(nchunks as usize);
        for _ in 0..nchunks {
            let first_bin = s.read_u32("profile.chunk.first_bin")?;
            let n = s.read_count("profile.chunk.nbins", MAX_BINS)?;
            if u64::from(first_bin) + u64::from(n) > u64::from(nbins) {
                return Err(RawFileError::format(
                    "profile.chunk",
                    format!(
                        "chunk [{first_bin}, {}) exceeds the profile's {nbins} bins",
                        u64::from(first_bin) + u64::from(n)
                    ),
                ));
            }
            let fudge = if layout > 0 {
                s.read_f32("profile.chunk.fudge")?
            } else {
                0.0
            };
            let bytes = s.read_bytes("profile.chunk.signal", 4 * n as usize)?;
            #[cfg(target_endian = "little")]
            let signal: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
            #[cfg(target_endian = "big")]
            let signal: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            chunks.push(ProfileChunk {
                first_bin,
                fudge,
                signal,
            });
        }
        Ok(Self {
            first_value,
            step,
            nbins,
            chunks,
        })
    }

    /// Reconstruct the `(m/z, intensity)` sequence.
    ///
    /// A single-chunk profile renders one pair per stored bin. A multi-chunk
    /// profile additionally gets `bookend` synthetic zero bins on each side
    /// of every chunk, clipped so they neither overlap a neighboring chunk's
    /// stored bins nor leave the profile's valid bin range.
    pub fn render(&self, converter: &Converter, bookend: u32) -> Vec<(f64, f32)> {
        let nchunks = self.chunks.len();
        let bookended = nchunks > 1 && bookend > 0;
        let capacity: usize = self
            .chunks
            .iter()
            .map(|c| c.signal.len() + if bookended { 2 * bookend as usize } else { 0 })
            .sum();
        let mut out = Vec::with_capacity(capacity);
        for (i, chunk) in self.chunks.iter().enumerate() {
            let fudge = f64::from(chunk.fudge);
            let first = i64::from(chunk.first_bin);
            let last = first + chunk.signal.len() as i64 - 1;
            if bookended {
                let prev_last = if i == 0 {
                    -1
                } else {
                    let p = &self.chunks[i - 1];
                    i64::from(p.first_bin) + p.signal.len() as i64 - 1
                };
                let lo = (first - i64::from(bookend)).max(prev_last + 1).max(0);
                for k in lo..first {
                    out.push((converter.convert(k as f64) + fudge, 0.0));
                }
            }
            for (j, &v) in chunk.signal.iter().enumerate() {
                out.push((converter.convert((first + j as i64) as f64) + fudge, v));
            }
            if bookended {
                let next_first = if i + 1 < nchunks {
                    i64::from(self.chunks[i + 1].first_bin)
                } else {
                    i64::from(self.nbins)
                };
                let hi = (last + i64::from(bookend))
                    .min(next_first - 1)
                    .min(i64::from(self.nbins) - 1);
                for k in (last + 1)..=hi {
                    out.push((converter.convert(k as f64) + fudge, 0.0));
                }
            }
        }
        out
    }
}

/// An explicit peak list: `(m/z, intensity)` pairs in ascending m/z order.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidList {
    pub peaks: Vec<(f64, f32)>,
}

impl CentroidList {
    pub fn decode(s: &mut Stream<'_>) -> Result<Self> {
        let count = s.read_count("centroid_list.count", MAX_PEAKS)?;
        let mut peaks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mz = s.read_f64("centroid_list.mz")?;
            let intensity = s.read_f32("centroid_list.intensity")?;
            peaks.push((mz, intensity));
        }
        Ok(Self { peaks })
    }
}

/// The decoded data sections of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPayload {
    pub header: ScanHeader,
    pub profile: Option<Profile>,
    pub centroids: Option<CentroidList>,
}

/// Read one scan's data packet at `data_addr + offset`.
pub fn read_scan_payload(s: &mut Stream<'_>, data_addr: u64, offset: u64) -> Result<ScanPayload> {
    s.seek(data_addr + offset)?;
    let header = ScanHeader::decode(s)?;
    let profile_start = s.position();
    let profile = if header.profile_size > 0 {
        Some(Profile::decode(s, header.layout)?)
    } else {
        None
    };
    // the centroid list starts after the declared profile block, whatever
    // the profile itself consumed
    s.seek(profile_start + 4 * u64::from(header.profile_size))?;
    let centroids = if header.peak_list_size > 0 {
        Some(CentroidList::decode(s)?)
    } else {
        None
    };
    Ok(ScanPayload {
        header,
        profile,
        centroids,
    })
}

/// The maximum intensity within [`PRECURSOR_MZ_TOLERANCE`] of `mz` in a
/// rendered peak sequence (ascending m/z), or `0.0` when nothing falls
/// inside the window.
pub fn find_peak_intensity(peaks: &[(f64, f32)], mz: f64) -> f32 {
    let lo = peaks.partition_point(|p| p.0 < mz - PRECURSOR_MZ_TOLERANCE);
    let mut best = 0.0f32;
    for &(m, i) in &peaks[lo..] {
        if m > mz + PRECURSOR_MZ_TOLERANCE {
            break;
        }
        if i > best {
            best = i;
        }
    }
    best
}
