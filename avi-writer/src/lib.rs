//! Minimal MJPEG-in-AVI muxer.
//!
//! Frames arrive already JPEG-encoded, so muxing is pure container work: a
//! RIFF `AVI ` file with one `vids`/`MJPG` stream, `00dc` chunks in the
//! `movi` list and an `idx1` index. Header size fields are written as
//! placeholders and patched in [`AviWriter::finish`].

use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("file too large for AVI container")]
    TooLarge,
}

const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

fn u32_of(len: u64) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::TooLarge)
}

struct IndexEntry {
    /// Offset of the chunk header relative to the `movi` fourcc.
    offset: u32,
    length: u32,
}

/// Writes one MJPEG video stream into an AVI container.
pub struct AviWriter<W: Write + Seek> {
    w: W,
    fps: u32,
    index: Vec<IndexEntry>,
    max_chunk: u32,
    riff_size_pos: u64,
    total_frames_pos: u64,
    buffer_size_pos: u64,
    stream_length_pos: u64,
    movi_size_pos: u64,
    /// Position of the `movi` fourcc; idx1 offsets are relative to it.
    movi_fourcc_pos: u64,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Write the container headers. `width`/`height` are the pixel
    /// dimensions of every JPEG frame to come.
    pub fn new(mut w: W, width: u32, height: u32, fps: u32) -> Result<Self> {
        let fps = fps.max(1);

        w.write_all(b"RIFF")?;
        let riff_size_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // patched in finish()
        w.write_all(b"AVI ")?;

        // hdrl list: avih + one strl.
        // sizes: "hdrl" + (avih chunk 8+56) + (LIST strl 8+116)
        w.write_all(b"LIST")?;
        w.write_u32::<LittleEndian>(4 + (8 + 56) + (8 + 116))?;
        w.write_all(b"hdrl")?;

        w.write_all(b"avih")?;
        w.write_u32::<LittleEndian>(56)?;
        w.write_u32::<LittleEndian>(1_000_000 / fps)?; // microseconds per frame
        w.write_u32::<LittleEndian>(0)?; // max bytes per second
        w.write_u32::<LittleEndian>(0)?; // padding granularity
        w.write_u32::<LittleEndian>(AVIF_HASINDEX)?;
        let total_frames_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // total frames, patched
        w.write_u32::<LittleEndian>(0)?; // initial frames
        w.write_u32::<LittleEndian>(1)?; // stream count
        let buffer_size_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // suggested buffer size, patched
        w.write_u32::<LittleEndian>(width)?;
        w.write_u32::<LittleEndian>(height)?;
        for _ in 0..4 {
            w.write_u32::<LittleEndian>(0)?; // reserved
        }

        // strl list: strh + strf. size: "strl" + (8+56) + (8+40)
        w.write_all(b"LIST")?;
        w.write_u32::<LittleEndian>(4 + (8 + 56) + (8 + 40))?;
        w.write_all(b"strl")?;

        w.write_all(b"strh")?;
        w.write_u32::<LittleEndian>(56)?;
        w.write_all(b"vids")?;
        w.write_all(b"MJPG")?;
        w.write_u32::<LittleEndian>(0)?; // flags
        w.write_u16::<LittleEndian>(0)?; // priority
        w.write_u16::<LittleEndian>(0)?; // language
        w.write_u32::<LittleEndian>(0)?; // initial frames
        w.write_u32::<LittleEndian>(1)?; // scale
        w.write_u32::<LittleEndian>(fps)?; // rate; rate/scale = fps
        w.write_u32::<LittleEndian>(0)?; // start
        let stream_length_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // length in frames, patched
        w.write_u32::<LittleEndian>(0)?; // suggested buffer size
        w.write_u32::<LittleEndian>(u32::MAX)?; // quality: default
        w.write_u32::<LittleEndian>(0)?; // sample size
        w.write_u16::<LittleEndian>(0)?; // rcFrame left
        w.write_u16::<LittleEndian>(0)?; // rcFrame top
        w.write_u16::<LittleEndian>(width as u16)?; // rcFrame right
        w.write_u16::<LittleEndian>(height as u16)?; // rcFrame bottom

        // strf: BITMAPINFOHEADER
        w.write_all(b"strf")?;
        w.write_u32::<LittleEndian>(40)?;
        w.write_u32::<LittleEndian>(40)?; // biSize
        w.write_i32::<LittleEndian>(width as i32)?;
        w.write_i32::<LittleEndian>(height as i32)?;
        w.write_u16::<LittleEndian>(1)?; // planes
        w.write_u16::<LittleEndian>(24)?; // bit count
        w.write_all(b"MJPG")?; // compression
        w.write_u32::<LittleEndian>(width * height * 3)?; // image size
        w.write_i32::<LittleEndian>(0)?; // x pels per meter
        w.write_i32::<LittleEndian>(0)?; // y pels per meter
        w.write_u32::<LittleEndian>(0)?; // colors used
        w.write_u32::<LittleEndian>(0)?; // colors important

        // movi list, chunks appended by write_frame().
        w.write_all(b"LIST")?;
        let movi_size_pos = w.stream_position()?;
        w.write_u32::<LittleEndian>(0)?; // patched in finish()
        let movi_fourcc_pos = w.stream_position()?;
        w.write_all(b"movi")?;

        Ok(Self {
            w,
            fps,
            index: Vec::new(),
            max_chunk: 0,
            riff_size_pos,
            total_frames_pos,
            buffer_size_pos,
            stream_length_pos,
            movi_size_pos,
            movi_fourcc_pos,
        })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn num_frames(&self) -> usize {
        self.index.len()
    }

    /// Append one JPEG frame as a `00dc` chunk.
    pub fn write_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        let chunk_pos = self.w.stream_position()?;
        let length = u32_of(jpeg.len() as u64)?;
        self.w.write_all(b"00dc")?;
        self.w.write_u32::<LittleEndian>(length)?;
        self.w.write_all(jpeg)?;
        if length % 2 == 1 {
            self.w.write_u8(0)?; // chunks are word-aligned
        }
        self.index.push(IndexEntry {
            offset: u32_of(chunk_pos - self.movi_fourcc_pos)?,
            length,
        });
        self.max_chunk = self.max_chunk.max(length);
        Ok(())
    }

    /// Write the index, patch the deferred size fields and return the
    /// underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let movi_end = self.w.stream_position()?;
        let movi_size = u32_of(movi_end - self.movi_fourcc_pos)?;

        self.w.write_all(b"idx1")?;
        self.w
            .write_u32::<LittleEndian>(u32_of(self.index.len() as u64 * 16)?)?;
        for entry in &self.index {
            self.w.write_all(b"00dc")?;
            self.w.write_u32::<LittleEndian>(AVIIF_KEYFRAME)?;
            self.w.write_u32::<LittleEndian>(entry.offset)?;
            self.w.write_u32::<LittleEndian>(entry.length)?;
        }

        let file_end = self.w.stream_position()?;
        let num_frames = u32_of(self.index.len() as u64)?;

        self.w.seek(SeekFrom::Start(self.riff_size_pos))?;
        self.w.write_u32::<LittleEndian>(u32_of(file_end - 8)?)?;
        self.w.seek(SeekFrom::Start(self.total_frames_pos))?;
        self.w.write_u32::<LittleEndian>(num_frames)?;
        self.w.seek(SeekFrom::Start(self.buffer_size_pos))?;
        self.w.write_u32::<LittleEndian>(self.max_chunk)?;
        self.w.seek(SeekFrom::Start(self.stream_length_pos))?;
        self.w.write_u32::<LittleEndian>(num_frames)?;
        self.w.seek(SeekFrom::Start(self.movi_size_pos))?;
        self.w.write_u32::<LittleEndian>(movi_size)?;

        self.w.seek(SeekFrom::Start(file_end))?;
        self.w.flush()?;
        Ok(self.w)
    }
}
