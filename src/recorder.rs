// src/recorder.rs
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use image::{codecs::jpeg::JpegEncoder, RgbImage};
use log::{debug, info};

/// Writes raw camera frames to disk as a motion-JPEG elementary stream
/// (JPEG images back to back, playable with e.g. `ffplay -f mjpeg`).
pub struct MjpegSink {
    path: PathBuf,
    writer: BufWriter<File>,
    quality: u8,
    frames: u64,
}

impl MjpegSink {
    pub fn create(path: &Path, quality: u8) -> io::Result<Self> {
        let file = File::create(path)?;
        info!("Recording sink opened at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            quality,
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> io::Result<()> {
        JpegEncoder::new_with_quality(&mut self.writer, self.quality)
            .encode_image(frame)
            .map_err(io::Error::other)?;
        // Write errors belong to the frame that caused them.
        self.writer.flush()?;
        self.frames += 1;
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<u64> {
        self.writer.flush()?;
        debug!("Flushed {} frames to {}", self.frames, self.path.display());
        Ok(self.frames)
    }
}
