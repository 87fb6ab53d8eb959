//! Minimal mono PCM16 WAV read/write sinks for the audio stream's
//! wav-read-outgoing / wav-write-incoming overrides (spec §3, §4.2 step 1;
//! grounded in `original_source`'s `MT_AudioStream` wav hooks). Deliberately
//! narrow: no compressed formats, no multi-channel — the spec only asks for
//! a file override/dump, not a general-purpose WAV library.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{MediaError, Result};

const RIFF_HEADER_LEN: u32 = 44;

/// Sequentially yields PCM16 samples from a mono WAV file, looping back to
/// the start once exhausted (so a configured "wav read" override can feed an
/// indefinitely long call).
pub struct WavReader {
    reader: BufReader<File>,
    data_start: u64,
    sample_rate: u32,
}

impl WavReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(|e| MediaError::Wav(e.to_string()))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; 44];
        reader.read_exact(&mut header).map_err(|e| MediaError::Wav(e.to_string()))?;
        if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
            return Err(MediaError::Wav("not a RIFF/WAVE file".to_string()));
        }
        let sample_rate = u32::from_le_bytes(header[24..28].try_into().unwrap());
        Ok(Self { reader, data_start: RIFF_HEADER_LEN as u64, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fills `out` with `out.len()` samples, looping from the start of the
    /// data chunk on EOF.
    pub fn read_samples(&mut self, out: &mut [i16]) -> Result<()> {
        for slot in out.iter_mut() {
            let mut buf = [0u8; 2];
            match self.reader.read_exact(&mut buf) {
                Ok(()) => *slot = i16::from_le_bytes(buf),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.reader.seek(SeekFrom::Start(self.data_start)).map_err(|e| MediaError::Wav(e.to_string()))?;
                    self.reader.read_exact(&mut buf).map_err(|e| MediaError::Wav(e.to_string()))?;
                    *slot = i16::from_le_bytes(buf);
                }
                Err(e) => return Err(MediaError::Wav(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Writes a mono PCM16 WAV file incrementally, patching the RIFF/data
/// length fields on [`WavWriter::finish`] (or on drop).
pub struct WavWriter {
    writer: BufWriter<File>,
    sample_rate: u32,
    samples_written: u32,
}

impl WavWriter {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let file = File::create(path).map_err(|e| MediaError::Wav(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        write_placeholder_header(&mut writer, sample_rate).map_err(|e| MediaError::Wav(e.to_string()))?;
        Ok(Self { writer, sample_rate, samples_written: 0 })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        for &s in samples {
            self.writer.write_all(&s.to_le_bytes()).map_err(|e| MediaError::Wav(e.to_string()))?;
        }
        self.samples_written += samples.len() as u32;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(|e| MediaError::Wav(e.to_string()))?;
        let file = self.writer.into_inner().map_err(|e| MediaError::Wav(e.to_string()))?;
        patch_header_lengths(file, self.samples_written)
    }
}

fn write_placeholder_header(writer: &mut BufWriter<File>, sample_rate: u32) -> io::Result<()> {
    writer.write_all(b"RIFF")?;
    writer.write_all(&0u32.to_le_bytes())?; // patched in finish()
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?; // PCM
    writer.write_all(&1u16.to_le_bytes())?; // mono
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&(sample_rate * 2).to_le_bytes())?; // byte rate
    writer.write_all(&2u16.to_le_bytes())?; // block align
    writer.write_all(&16u16.to_le_bytes())?; // bits per sample
    writer.write_all(b"data")?;
    writer.write_all(&0u32.to_le_bytes())?; // patched in finish()
    Ok(())
}

fn patch_header_lengths(mut file: File, samples_written: u32) -> Result<()> {
    let data_bytes = samples_written * 2;
    let riff_len = RIFF_HEADER_LEN - 8 + data_bytes;
    file.seek(SeekFrom::Start(4)).map_err(|e| MediaError::Wav(e.to_string()))?;
    file.write_all(&riff_len.to_le_bytes()).map_err(|e| MediaError::Wav(e.to_string()))?;
    file.seek(SeekFrom::Start(40)).map_err(|e| MediaError::Wav(e.to_string()))?;
    file.write_all(&data_bytes.to_le_bytes()).map_err(|e| MediaError::Wav(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_then_reads_back_samples() {
        let path = std::env::temp_dir().join(format!("rvoip-media-core-test-{}.wav", std::process::id()));
        let mut writer = WavWriter::create(&path, 8000).unwrap();
        let samples: Vec<i16> = (0..160).map(|i| i as i16).collect();
        writer.write_samples(&samples).unwrap();
        writer.finish().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.sample_rate(), 8000);
        let mut out = vec![0i16; 160];
        reader.read_samples(&mut out).unwrap();
        assert_eq!(out, samples);

        std::fs::remove_file(&path).ok();
    }
}
