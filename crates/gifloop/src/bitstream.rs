//! Low-level cursor over a seekable GIF byte source.

use std::io::{self, BufReader, Read, Seek, SeekFrom};

/// Maximum payload of a single GIF data sub-block.
pub const MAX_SUB_BLOCK_LEN: usize = 255;

/// A buffered, position-tracking reader for GIF fields.
///
/// All multi-byte integers in GIF are little-endian. Sub-block sequences are
/// runs of `len, payload[len]` terminated by a zero length byte.
pub struct BitstreamReader<R> {
    inner: BufReader<R>,
    position: u64,
}

impl<R: Read + Seek> BitstreamReader<R> {
    /// Wrap a source, verifying that it can report and change its position.
    ///
    /// The source is rewound to its start.
    pub fn new(mut source: R) -> io::Result<Self> {
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: BufReader::new(source),
            position: 0,
        })
    }

    /// Absolute offset of the next byte to be read.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move to an absolute offset.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset != self.position {
            self.inner.seek(SeekFrom::Start(offset))?;
            self.position = offset;
        }
        Ok(())
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Fill `buf` completely, failing with `UnexpectedEof` on a short read.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Read `len` raw bytes into a new vector.
    pub fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Skip `len` bytes without copying them out.
    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        self.inner.seek_relative(len as i64)?;
        self.position += len;
        Ok(())
    }

    /// Read the next sub-block into `buf`, returning the number of payload
    /// bytes read.
    ///
    /// A return of `0` means the block terminator was consumed. A block cut
    /// short by the end of the stream yields the bytes that were present.
    pub fn read_sub_block(&mut self, buf: &mut [u8; MAX_SUB_BLOCK_LEN]) -> io::Result<usize> {
        let len = self.read_u8()? as usize;
        let mut filled = 0;
        while filled < len {
            match self.inner.read(&mut buf[filled..len]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    /// Skip a whole sub-block sequence including its terminator.
    ///
    /// Returns the total payload size skipped.
    pub fn skip_sub_blocks(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            let len = self.read_u8()? as u64;
            if len == 0 {
                return Ok(total);
            }
            self.skip(len)?;
            total += len;
        }
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R> std::fmt::Debug for BitstreamReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstreamReader")
            .field("position", &self.position)
            .finish()
    }
}
