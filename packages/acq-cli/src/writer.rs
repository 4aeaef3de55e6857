//! Raw Segment Writer
//!
//! Writes each segment as interleaved little-endian i16 scans (.bin) plus a
//! JSON sidecar (.meta) describing the file. The sidecar is written on close
//! so it can carry the final scan count and size.

use acq_core::trigger::{Destination, SegmentSpec, SegmentWriter, WriterFactory};
use acq_core::{AcqError, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct BinWriter {
    dir: PathBuf,
    file: Option<BufWriter<File>>,
    bin_path: Option<PathBuf>,
    meta: BTreeMap<String, String>,
    n_chans: usize,
    scans: u64,
}

impl BinWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
            bin_path: None,
            meta: BTreeMap::new(),
            n_chans: 0,
            scans: 0,
        }
    }

    fn write_meta(&self, bin_path: &Path) -> Result<()> {
        let mut meta = self.meta.clone();
        meta.insert("fileSizeBytes".to_string(), (self.scans * self.n_chans as u64 * 2).to_string());
        meta.insert("fileTimeSecs".to_string(), self.duration_secs().to_string());
        meta.insert("scanCount".to_string(), self.scans.to_string());

        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| AcqError::Writer(format!("Failed to serialize metadata: {}", e)))?;
        std::fs::write(bin_path.with_extension("meta"), json)?;
        Ok(())
    }

    fn duration_secs(&self) -> f64 {
        self.meta
            .get("sampleRate")
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|r| *r > 0.0)
            .map_or(0.0, |r| self.scans as f64 / r)
    }
}

impl SegmentWriter for BinWriter {
    fn open(&mut self, spec: &SegmentSpec, metadata: &BTreeMap<String, String>) -> Result<()> {
        let bin_path = self.dir.join(format!("{}.bin", spec.stem()));
        let file = File::create(&bin_path)?;

        self.file = Some(BufWriter::new(file));
        self.bin_path = Some(bin_path);
        self.meta = metadata.clone();
        self.meta.insert("runName".to_string(), spec.run_name.clone());
        self.meta.insert("stream".to_string(), spec.dst.to_string());
        self.n_chans = spec.n_chans;
        self.scans = 0;
        Ok(())
    }

    fn write_scans(&mut self, data: &[i16], n_scans: usize) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| AcqError::Writer("write to unopened segment".to_string()))?;

        let n = n_scans * self.n_chans;
        if data.len() < n {
            return Err(AcqError::Writer(format!(
                "{} scans of {} channels need {} samples, got {}",
                n_scans,
                self.n_chans,
                n,
                data.len()
            )));
        }

        for &v in &data[..n] {
            file.write_i16::<LittleEndian>(v)?;
        }
        self.scans += n_scans as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush()?;
        drop(file);

        match self.bin_path.take() {
            Some(path) => self.write_meta(&path),
            None => Ok(()),
        }
    }

    fn scan_count(&self) -> u64 {
        self.scans
    }

    fn path(&self) -> Option<&Path> {
        self.bin_path.as_deref()
    }
}

/// Creates `BinWriter`s rooted at one output directory.
pub struct BinWriterFactory {
    dir: PathBuf,
}

impl BinWriterFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl WriterFactory for BinWriterFactory {
    fn create(&self, _dst: Destination) -> Box<dyn SegmentWriter> {
        Box::new(BinWriter::new(self.dir.clone()))
    }
}
