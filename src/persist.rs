//! Capture container read/write.
//!
//! The container pairs one metadata record with one named dataset per active
//! channel, exactly enough to reconstruct physical units later:
//! raw counts, the channel's range, the device's full-scale code and the
//! sample interval. Writes go to a temporary sibling and are renamed into
//! place, so a failed write never leaves a corrupt file at the destination.

use crate::buffers::{BufferError, BufferSet, SegmentBuffer};
use crate::channel::{ChannelId, VoltageRange};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Metadata persisted with every capture.
///
/// `channels` and `ranges` are parallel lists in active-channel registry
/// order, matching the dataset order in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub sample_interval_ns: f32,
    pub max_adc: i16,
    pub channels: Vec<ChannelId>,
    pub ranges: Vec<VoltageRange>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelDataset {
    name: String,
    channel: ChannelId,
    captures: u32,
    samples_per_capture: u32,
    data: Vec<i16>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CaptureFile {
    metadata: CaptureMetadata,
    datasets: Vec<ChannelDataset>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("capture file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture container is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("capture container dataset rejected: {0}")]
    Dataset(#[from] BufferError),
}

fn dataset_name(channel: ChannelId) -> String {
    format!("adc_counts_{channel}")
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("capture"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize metadata plus one dataset per buffer, in buffer-set order, and
/// atomically replace whatever is at `path`.
pub fn write_capture_file(
    path: &Path,
    metadata: &CaptureMetadata,
    buffers: &BufferSet,
) -> Result<(), PersistError> {
    let datasets = buffers
        .iter()
        .map(|(channel, buffer)| ChannelDataset {
            name: dataset_name(channel),
            channel,
            captures: buffer.captures() as u32,
            samples_per_capture: buffer.samples_per_capture() as u32,
            data: buffer.raw().to_vec(),
        })
        .collect();
    let container = CaptureFile {
        metadata: metadata.clone(),
        datasets,
    };

    let tmp = temp_sibling(path);
    let result: Result<(), PersistError> = (|| {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &container)?;
        writer.flush()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path)?;
    log::info!(
        "wrote capture file {} ({} channels)",
        path.display(),
        container.datasets.len()
    );
    Ok(())
}

/// Read a capture file back into metadata and per-channel buffers, in the
/// order they were written.
pub fn read_capture_file(path: &Path) -> Result<(CaptureMetadata, BufferSet), PersistError> {
    let file = File::open(path)?;
    let container: CaptureFile = serde_json::from_reader(BufReader::new(file))?;
    let mut buffers = BufferSet::default();
    for dataset in container.datasets {
        let buffer = SegmentBuffer::from_raw(
            dataset.channel,
            dataset.captures,
            dataset.samples_per_capture,
            dataset.data,
        )?;
        buffers.push(dataset.channel, buffer);
    }
    Ok((container.metadata, buffers))
}
