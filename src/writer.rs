use crate::LoggingOperation;
use anyhow::{anyhow, Result};
use ndarray::{s, Array1, ArrayView1};
use std::{
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, Write},
    path::Path,
};

/// Magic bytes at the start of every segment written by [`WaveformWriter`].
pub const SEGMENT_MAGIC: &[u8; 8] = b"SIMWFM1\0";

/// Metadata written in front of a segment's samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentHeader {
    pub group: String,
    pub channel: String,
    pub rate: f64,
    pub n_samples: u64,
}

/// One segment read back from a waveform file.
#[derive(Debug, Clone)]
pub struct WaveformSegment {
    pub header: SegmentHeader,
    pub samples: Array1<f64>,
}

/// Opens `path` the way the driver treats its log file for `operation`.
pub fn open_log_file(path: &Path, operation: LoggingOperation) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    match operation {
        LoggingOperation::Open => options.append(true),
        LoggingOperation::OpenOrCreate => options.append(true).create(true),
        LoggingOperation::CreateOrReplace => options.write(true).create(true).truncate(true),
        LoggingOperation::Create => options.write(true).create_new(true),
    };
    options.open(path)
}

/// Streams one segment of f64 samples to a file, buffering `buffer_capacity`
/// samples between writes.
pub struct WaveformWriter {
    file: BufWriter<File>,
    expected: u64,
    written: u64,
    buffer: Array1<f64>,
    buffer_count: usize,
}

impl WaveformWriter {
    pub fn new(file: File, header: &SegmentHeader, buffer_capacity: usize) -> Result<Self> {
        if buffer_capacity == 0 {
            return Err(anyhow!("Buffer capacity must be non-zero"));
        }
        let mut file = BufWriter::new(file);
        file.write_all(SEGMENT_MAGIC)?;
        write_str(&mut file, &header.group)?;
        write_str(&mut file, &header.channel)?;
        file.write_all(&header.rate.to_le_bytes())?;
        file.write_all(&header.n_samples.to_le_bytes())?;

        Ok(Self {
            file,
            expected: header.n_samples,
            written: 0,
            buffer: Array1::zeros(buffer_capacity),
            buffer_count: 0,
        })
    }

    /// Append samples, flushing each time the buffer fills.
    pub fn append(&mut self, samples: ArrayView1<f64>) -> Result<()> {
        let incoming = samples.len() as u64;
        if self.written + self.buffer_count as u64 + incoming > self.expected {
            return Err(anyhow!("Segment already holds its declared sample count"));
        }

        let mut offset = 0;
        while offset < samples.len() {
            let room = self.buffer.len() - self.buffer_count;
            let take = room.min(samples.len() - offset);
            self.buffer
                .slice_mut(s![self.buffer_count..self.buffer_count + take])
                .assign(&samples.slice(s![offset..offset + take]));
            self.buffer_count += take;
            offset += take;

            if self.buffer_count == self.buffer.len() {
                self.flush()?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer_count == 0 {
            return Ok(());
        }
        for v in self.buffer.slice(s![0..self.buffer_count]) {
            self.file.write_all(&v.to_le_bytes())?;
        }
        self.written += self.buffer_count as u64;
        self.buffer_count = 0;
        Ok(())
    }

    /// Flush everything and return the number of samples in the segment.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        self.file.flush()?;
        if self.written != self.expected {
            return Err(anyhow!(
                "Segment declared {} samples but {} were written",
                self.expected,
                self.written
            ));
        }
        Ok(self.written)
    }
}

fn write_str(file: &mut impl Write, value: &str) -> std::io::Result<()> {
    file.write_all(&(value.len() as u32).to_le_bytes())?;
    file.write_all(value.as_bytes())
}

fn read_u32(reader: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Bytes left between the reader's position and `file_len`.
fn remaining(reader: &mut BufReader<File>, file_len: u64) -> Result<u64> {
    Ok(file_len.saturating_sub(reader.stream_position()?))
}

fn read_str(reader: &mut BufReader<File>, file_len: u64) -> Result<String> {
    let len = u64::from(read_u32(reader)?);
    if len > remaining(reader, file_len)? {
        return Err(anyhow!("String length {len} runs past the end of the file"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Read every segment stored in a waveform file.
pub fn read_segments(path: &Path) -> Result<Vec<WaveformSegment>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut segments = Vec::new();
    loop {
        let mut magic = [0u8; 8];
        match reader.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        if &magic != SEGMENT_MAGIC {
            return Err(anyhow!("Bad segment magic in {}", path.display()));
        }
        let group = read_str(&mut reader, file_len)?;
        let channel = read_str(&mut reader, file_len)?;
        let rate = f64::from_bits(read_u64(&mut reader)?);
        let n_samples = read_u64(&mut reader)?;
        if n_samples > remaining(&mut reader, file_len)? / 8 {
            return Err(anyhow!(
                "Segment in {} declares {n_samples} samples but the file is too short",
                path.display()
            ));
        }
        let mut samples = Array1::<f64>::zeros(n_samples as usize);
        for v in samples.iter_mut() {
            *v = f64::from_bits(read_u64(&mut reader)?);
        }
        segments.push(WaveformSegment {
            header: SegmentHeader {
                group,
                channel,
                rate,
                n_samples,
            },
            samples,
        });
    }
    Ok(segments)
}
