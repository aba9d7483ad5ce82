//! Builders that assemble complete, well-formed RAW files in memory, used
//! throughout the test modules. The byte layout mirrors the decoders
//! field-for-field.

use crate::event::preamble_slot_count;
use crate::header::{MAGIC, SIGNATURE};

pub(crate) fn w16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn w32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn w64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn wf32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn wf64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn wstr16(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    w32(buf, units.len() as u32);
    for u in units {
        w16(buf, u);
    }
}

fn waddr(buf: &mut Vec<u8>, wide: bool, v: u64) {
    if wide {
        w64(buf, v);
    } else {
        w32(buf, v as u32);
    }
}

fn patch_addr(buf: &mut [u8], pos: usize, wide: bool, v: u64) {
    if wide {
        buf[pos..pos + 8].copy_from_slice(&v.to_le_bytes());
    } else {
        buf[pos..pos + 4].copy_from_slice(&(v as u32).to_le_bytes());
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SynthReaction {
    pub mz: f64,
    pub width: f64,
    pub energy: f64,
    pub activation: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct SynthEvent {
    pub polarity: u16,
    pub ms_power: u16,
    pub scan_type: u16,
    pub dependent: bool,
    pub wideband: bool,
    pub ionization: u16,
    pub detector: u16,
    pub analyzer: u16,
    /// Calibration kind and coefficients.
    pub calibration: (u32, Vec<f64>),
    pub low_mz: f64,
    pub high_mz: f64,
    pub reaction: Option<SynthReaction>,
    /// Number of transient 32-bit words appended to the event.
    pub nunused: u32,
}

impl SynthEvent {
    /// A positive ESI FTMS survey scan with the identity-like calibration
    /// `mz(k) = 100 + k`.
    pub fn ms1() -> Self {
        Self {
            polarity: 1,
            ms_power: 1,
            scan_type: 0,
            dependent: false,
            wideband: false,
            ionization: 3,
            detector: 0,
            analyzer: 5,
            calibration: (0, vec![100.0, 1.0]),
            low_mz: 100.0,
            high_mz: 2000.0,
            reaction: None,
            nunused: 2,
        }
    }

    /// A dependent CID fragment scan of the given precursor.
    pub fn ms2(precursor_mz: f64, energy: f64) -> Self {
        let mut ev = Self::ms1();
        ev.ms_power = 2;
        ev.dependent = true;
        ev.reaction = Some(SynthReaction {
            mz: precursor_mz,
            width: 1.0,
            energy,
            activation: 0,
        });
        ev
    }
}

pub(crate) fn write_event(buf: &mut Vec<u8>, version: u32, ev: &SynthEvent) {
    let named = [
        0u16,
        ev.polarity,
        ev.ms_power,
        ev.scan_type,
        ev.dependent as u16,
        ev.wideband as u16,
        ev.ionization,
        ev.detector,
        ev.analyzer,
    ];
    for slot in 0..preamble_slot_count(version) {
        w16(buf, named.get(slot).copied().unwrap_or(0));
    }
    if ev.ms_power >= 2 {
        let r = ev.reaction.clone().unwrap_or(SynthReaction {
            mz: 0.0,
            width: 0.0,
            energy: 0.0,
            activation: 0,
        });
        wf64(buf, r.mz);
        wf64(buf, r.width);
        wf64(buf, r.energy);
        w32(buf, r.activation);
        w32(buf, 0);
    }
    w32(buf, ev.calibration.0);
    w32(buf, ev.calibration.1.len() as u32);
    for &c in &ev.calibration.1 {
        wf64(buf, c);
    }
    wf64(buf, ev.low_mz);
    wf64(buf, ev.high_mz);
    w32(buf, ev.nunused);
    for _ in 0..ev.nunused {
        w32(buf, 0xDEAD_BEEF);
    }
}

fn write_event_template(buf: &mut Vec<u8>, version: u32) {
    let ev = SynthEvent::ms1();
    let named = [
        0u16,
        ev.polarity,
        ev.ms_power,
        ev.scan_type,
        0,
        0,
        ev.ionization,
        ev.detector,
        ev.analyzer,
    ];
    for slot in 0..preamble_slot_count(version) {
        w16(buf, named.get(slot).copied().unwrap_or(0));
    }
    w32(buf, ev.calibration.0);
    w32(buf, ev.calibration.1.len() as u32);
    for &c in &ev.calibration.1 {
        wf64(buf, c);
    }
    wf64(buf, ev.low_mz);
    wf64(buf, ev.high_mz);
}

#[derive(Debug, Clone)]
pub(crate) struct SynthChunk {
    pub first_bin: u32,
    pub fudge: f32,
    pub signal: Vec<f32>,
}

#[derive(Debug, Clone)]
pub(crate) struct SynthScan {
    pub event: SynthEvent,
    /// `(first_value, step, nbins, chunks)`.
    pub profile: Option<(f64, f64, u32, Vec<SynthChunk>)>,
    /// Nonzero layouts store a fudge value per chunk.
    pub layout: u32,
    pub centroids: Option<Vec<(f64, f32)>>,
    pub start_time: f64,
    pub total_current: f64,
    pub base_intensity: f64,
    pub base_mz: f64,
    pub low_mz: f64,
    pub high_mz: f64,
    pub charge: u32,
}

impl SynthScan {
    fn base(event: SynthEvent) -> Self {
        Self {
            event,
            profile: None,
            layout: 1,
            centroids: None,
            start_time: 0.0,
            total_current: 0.0,
            base_intensity: 0.0,
            base_mz: 0.0,
            low_mz: 100.0,
            high_mz: 2000.0,
            charge: 0,
        }
    }

    /// A survey scan storing a single-chunk profile of the given
    /// intensities, anchored at bin 0.
    pub fn ms1_profile(signal: Vec<f32>) -> Self {
        let nbins = signal.len() as u32;
        let mut scan = Self::base(SynthEvent::ms1());
        scan.profile = Some((
            0.0,
            1.0,
            nbins,
            vec![SynthChunk {
                first_bin: 0,
                fudge: 0.0,
                signal,
            }],
        ));
        scan
    }

    /// A survey scan storing only a centroid list.
    pub fn ms1_centroid(peaks: Vec<(f64, f32)>) -> Self {
        let mut scan = Self::base(SynthEvent::ms1());
        scan.centroids = Some(peaks);
        scan
    }

    /// A dependent fragment scan storing only a centroid list.
    pub fn ms2_centroid(precursor_mz: f64, peaks: Vec<(f64, f32)>) -> Self {
        let mut scan = Self::base(SynthEvent::ms2(precursor_mz, 35.0));
        scan.centroids = Some(peaks);
        scan
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FileBuilder {
    version: u32,
    first_scan: u32,
    scans: Vec<SynthScan>,
    ntrailer_pair: Option<(u32, u32)>,
    trailer_count: Option<u32>,
    errors: Vec<(f64, String)>,
}

impl FileBuilder {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            first_scan: 1,
            scans: Vec::new(),
            ntrailer_pair: None,
            trailer_count: None,
            errors: Vec::new(),
        }
    }

    pub fn scan(mut self, scan: SynthScan) -> Self {
        self.scans.push(scan);
        self
    }

    /// Write two run headers with the given trailer-event counts instead
    /// of a single authoritative one.
    pub fn ntrailer_pair(mut self, first: u32, second: u32) -> Self {
        self.ntrailer_pair = Some((first, second));
        self
    }

    /// Override the count stored at the head of the trailer.
    pub fn trailer_count(mut self, count: u32) -> Self {
        self.trailer_count = Some(count);
        self
    }

    pub fn error(mut self, time: f64, message: &str) -> Self {
        self.errors.push((time, message.to_string()));
        self
    }

    fn write_run_header(&self, buf: &mut Vec<u8>, ntrailer: u32) -> (u64, [usize; 5]) {
        let wide = self.version >= 64;
        let start = buf.len() as u64;
        let nscans = self.scans.len() as u32;
        // sample info
        w32(buf, self.first_scan);
        w32(buf, self.first_scan + nscans.max(1) - 1);
        wf64(buf, 100.0);
        wf64(buf, 2000.0);
        wf64(buf, 0.0);
        wf64(buf, 10.0);
        wf64(buf, 1.0e6);
        // region addresses, patched once the regions are laid out
        let mut slots = [0usize; 5];
        for slot in &mut slots {
            *slot = buf.len();
            waddr(buf, wide, 0);
        }
        w32(buf, ntrailer);
        wstr16(buf, "stream");
        (start, slots)
    }

    fn write_inst_id(&self, buf: &mut Vec<u8>) {
        w32(buf, 0);
        wstr16(buf, "LTQ FT");
        wstr16(buf, "LTQ");
        wstr16(buf, "SN0001");
        wstr16(buf, "2.5.5");
    }

    pub fn build(&self) -> Vec<u8> {
        let v = self.version;
        let wide = v >= 64;
        let nscans = self.scans.len() as u32;
        let mut buf = Vec::new();

        // file header
        w16(&mut buf, MAGIC);
        wstr16(&mut buf, SIGNATURE);
        w32(&mut buf, v);
        wf64(&mut buf, 1.0);
        wstr16(&mut buf, "synthetic acquisition");

        // sequence row
        w32(&mut buf, 1);
        wstr16(&mut buf, "sample");
        wstr16(&mut buf, "S-01");
        wstr16(&mut buf, "");
        if v >= 62 {
            wstr16(&mut buf, "V1");
            wstr16(&mut buf, "direct");
        }

        // autosampler info
        w32(&mut buf, 0);
        wstr16(&mut buf, "AS");

        // raw file info
        for value in [2024u16, 6, 2, 11, 9, 30, 0, 0] {
            w16(&mut buf, value);
        }
        let addr0_pos = buf.len();
        waddr(&mut buf, wide, 0);
        let addr1_pos = buf.len();
        waddr(&mut buf, wide, 0);
        wstr16(&mut buf, "heading one");
        wstr16(&mut buf, "heading two");

        let (nt0, nt1, has_second) = match self.ntrailer_pair {
            Some((a, b)) => (a, b, true),
            None => (nscans, 0, false),
        };

        let rh0 = self.write_run_header(&mut buf, nt0);
        if nt0 > 0 {
            self.write_inst_id(&mut buf);
        }
        let rh1 = if has_second {
            let rh = self.write_run_header(&mut buf, nt1);
            Some(rh)
        } else {
            None
        };
        if nt0 == 0 {
            self.write_inst_id(&mut buf);
        }

        // scan data region
        let data_addr = buf.len() as u64;
        let mut offsets = Vec::with_capacity(self.scans.len());
        let mut sizes = Vec::with_capacity(self.scans.len());
        for scan in &self.scans {
            offsets.push(buf.len() as u64 - data_addr);
            let start = buf.len();

            let mut pbuf = Vec::new();
            if let Some((first_value, step, nbins, chunks)) = &scan.profile {
                wf64(&mut pbuf, *first_value);
                wf64(&mut pbuf, *step);
                w32(&mut pbuf, chunks.len() as u32);
                w32(&mut pbuf, *nbins);
                for chunk in chunks {
                    w32(&mut pbuf, chunk.first_bin);
                    w32(&mut pbuf, chunk.signal.len() as u32);
                    if scan.layout > 0 {
                        wf32(&mut pbuf, chunk.fudge);
                    }
                    for &x in &chunk.signal {
                        wf32(&mut pbuf, x);
                    }
                }
            }
            let mut cbuf = Vec::new();
            if let Some(peaks) = &scan.centroids {
                w32(&mut cbuf, peaks.len() as u32);
                for &(mz, intensity) in peaks {
                    wf64(&mut cbuf, mz);
                    wf32(&mut cbuf, intensity);
                }
            }

            w32(&mut buf, 0);
            w32(&mut buf, (pbuf.len() / 4) as u32);
            w32(&mut buf, (cbuf.len() / 4) as u32);
            w32(&mut buf, scan.layout);
            w32(&mut buf, 0);
            w32(&mut buf, 0);
            w32(&mut buf, 0);
            w32(&mut buf, 0);
            wf32(&mut buf, scan.low_mz as f32);
            wf32(&mut buf, scan.high_mz as f32);
            buf.extend_from_slice(&pbuf);
            buf.extend_from_slice(&cbuf);
            sizes.push((buf.len() - start) as u32);
        }

        // scan index
        let scan_index_addr = buf.len() as u64;
        for (i, scan) in self.scans.iter().enumerate() {
            waddr(&mut buf, wide, offsets[i]);
            w32(&mut buf, i as u32);
            w16(&mut buf, 0);
            w16(&mut buf, 0);
            w32(&mut buf, i as u32 + 1);
            w32(&mut buf, 0);
            w32(&mut buf, sizes[i]);
            wf64(&mut buf, scan.start_time);
            wf64(&mut buf, scan.total_current);
            wf64(&mut buf, scan.base_intensity);
            wf64(&mut buf, scan.base_mz);
            wf64(&mut buf, scan.low_mz);
            wf64(&mut buf, scan.high_mz);
        }

        // trailer
        let trailer_addr = buf.len() as u64;
        w32(&mut buf, self.trailer_count.unwrap_or(nscans));
        for scan in &self.scans {
            write_event(&mut buf, v, &scan.event);
        }

        // error log, hierarchy, generic data header
        let error_log_addr = buf.len() as u64;
        w32(&mut buf, self.errors.len() as u32);
        for (time, message) in &self.errors {
            wf64(&mut buf, *time);
            wstr16(&mut buf, message);
        }
        w32(&mut buf, 1);
        w32(&mut buf, 1);
        write_event_template(&mut buf, v);
        w32(&mut buf, 3);
        w32(&mut buf, 0x0);
        w32(&mut buf, 0);
        wstr16(&mut buf, "Scan Header:");
        w32(&mut buf, 0x9);
        w32(&mut buf, 4);
        wstr16(&mut buf, "Charge State:");
        w32(&mut buf, 0xB);
        w32(&mut buf, 8);
        wstr16(&mut buf, "Ion Injection Time (ms):");

        // scan parameters
        let params_addr = buf.len() as u64;
        for scan in &self.scans {
            w32(&mut buf, scan.charge);
            wf64(&mut buf, 12.5);
        }

        patch_addr(&mut buf, addr0_pos, wide, rh0.0);
        patch_addr(
            &mut buf,
            addr1_pos,
            wide,
            rh1.as_ref().map(|r| r.0).unwrap_or(0),
        );
        let regions = [
            data_addr,
            scan_index_addr,
            trailer_addr,
            params_addr,
            error_log_addr,
        ];
        for header in std::iter::once(&rh0).chain(rh1.as_ref()) {
            for (slot, addr) in header.1.iter().zip(regions) {
                patch_addr(&mut buf, *slot, wide, addr);
            }
        }
        buf
    }
}
