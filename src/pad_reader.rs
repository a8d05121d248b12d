//! Seekable padded-domain view over an unpadded random-access source.
//!
//! Piece payloads sit on disk in their compact 127-byte-group form;
//! retrieval serves the expanded 128-byte-group form. [`PadReader`] adapts
//! between the two: the cursor and the declared total length both live in
//! the padded output domain, and the only 127/128 conversion happens when a
//! group's source offset is computed.

use std::io::{self, Read, Seek, SeekFrom};

use crate::fr32::{self, PADDED_GROUP, UNPADDED_GROUP};

/// Range-aware stream adapter expanding stored raw bytes on read.
pub struct PadReader<R> {
    src: R,
    /// Position in the padded domain.
    cursor: u64,
    /// Total stream length in the padded domain, from piece metadata.
    padded_len: u64,
}

impl<R: Read + Seek> PadReader<R> {
    pub fn new(src: R, padded_len: u64) -> Self {
        Self {
            src,
            cursor: 0,
            padded_len,
        }
    }

    /// Pads the group starting at `group_start` (a multiple of 128) into
    /// `out`. A source shorter than the full group is zero-filled first.
    fn fill_group(&mut self, group_start: u64, out: &mut [u8; PADDED_GROUP]) -> io::Result<()> {
        let src_off = group_start / PADDED_GROUP as u64 * UNPADDED_GROUP as u64;
        self.src.seek(SeekFrom::Start(src_off))?;

        let mut raw = [0u8; UNPADDED_GROUP];
        let mut filled = 0;
        while filled < UNPADDED_GROUP {
            match self.src.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        fr32::pad(&raw, out);
        Ok(())
    }
}

impl<R: Read + Seek> Read for PadReader<R> {
    /// Produces at most one padded group per call, starting at the current
    /// cursor. `buf` must hold at least one full group; shorter buffers fail
    /// without any state change.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.len() < PADDED_GROUP {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer shorter than one padded group",
            ));
        }
        if self.cursor >= self.padded_len {
            return Ok(0);
        }

        let group_start = self.cursor - self.cursor % PADDED_GROUP as u64;
        let mut group = [0u8; PADDED_GROUP];
        self.fill_group(group_start, &mut group)?;

        let group_end = (group_start + PADDED_GROUP as u64).min(self.padded_len);
        let intra = (self.cursor - group_start) as usize;
        let n = (group_end - group_start) as usize - intra;
        buf[..n].copy_from_slice(&group[intra..intra + n]);
        self.cursor += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for PadReader<R> {
    /// All offsets are padded-domain bytes. Seeking past the end is allowed;
    /// subsequent reads report end of stream.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::End(off) => self.padded_len as i128 + off as i128,
            SeekFrom::Current(off) => self.cursor as i128 + off as i128,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.cursor = next as u64;
        Ok(self.cursor)
    }
}
