// Copyright (c) 2022-2023 The MobileCoin Foundation

use byteorder::{ByteOrder, LittleEndian as LE};

use crate::ApduError;

/// Maximum BIP-0032 derivation path depth
pub const MAX_PATH_DEPTH: usize = 8;

/// BIP-0032 derivation path, hardened components have the top bit set
pub type Path = heapless::Vec<u32, MAX_PATH_DEPTH>;

/// Sequential writer over an APDU buffer
pub(crate) struct Encoder<'a> {
    buff: &'a mut [u8],
    index: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(buff: &'a mut [u8]) -> Self {
        Self { buff, index: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&mut [u8], ApduError> {
        if self.buff.len() < self.index + n {
            return Err(ApduError::InvalidLength);
        }
        let b = &mut self.buff[self.index..][..n];
        self.index += n;
        Ok(b)
    }

    pub fn u8(&mut self, v: u8) -> Result<(), ApduError> {
        self.take(1)?[0] = v;
        Ok(())
    }

    pub fn u16(&mut self, v: u16) -> Result<(), ApduError> {
        LE::write_u16(self.take(2)?, v);
        Ok(())
    }

    pub fn u32(&mut self, v: u32) -> Result<(), ApduError> {
        LE::write_u32(self.take(4)?, v);
        Ok(())
    }

    pub fn u64(&mut self, v: u64) -> Result<(), ApduError> {
        LE::write_u64(self.take(8)?, v);
        Ok(())
    }

    pub fn reserved(&mut self, n: usize) -> Result<(), ApduError> {
        self.take(n)?.fill(0);
        Ok(())
    }

    pub fn raw(&mut self, d: &[u8]) -> Result<(), ApduError> {
        self.take(d.len())?.copy_from_slice(d);
        Ok(())
    }

    /// Write path components (depth is encoded separately in the fixed header)
    pub fn path(&mut self, p: &[u32]) -> Result<(), ApduError> {
        for c in p {
            self.u32(*c)?;
        }
        Ok(())
    }

    /// Write u16 length-prefixed bytes
    pub fn bytes(&mut self, d: &[u8]) -> Result<(), ApduError> {
        if d.len() > u16::MAX as usize {
            return Err(ApduError::InvalidLength);
        }
        self.u16(d.len() as u16)?;
        self.raw(d)
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Sequential reader over an APDU buffer
pub(crate) struct Decoder<'a> {
    buff: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buff: &'a [u8]) -> Self {
        Self { buff, index: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ApduError> {
        if self.buff.len() < self.index + n {
            return Err(ApduError::InvalidLength);
        }
        let b = &self.buff[self.index..][..n];
        self.index += n;
        Ok(b)
    }

    pub fn u8(&mut self) -> Result<u8, ApduError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ApduError> {
        Ok(LE::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, ApduError> {
        Ok(LE::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, ApduError> {
        Ok(LE::read_u64(self.take(8)?))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ApduError> {
        self.take(n).map(|_| ())
    }

    pub fn raw(&mut self, n: usize) -> Result<&'a [u8], ApduError> {
        self.take(n)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ApduError> {
        let mut d = [0u8; N];
        d.copy_from_slice(self.take(N)?);
        Ok(d)
    }

    pub fn path(&mut self, depth: usize) -> Result<Path, ApduError> {
        if depth > MAX_PATH_DEPTH {
            return Err(ApduError::InvalidLength);
        }

        let mut p = Path::new();
        for _ in 0..depth {
            // Capacity checked above
            let _ = p.push(self.u32()?);
        }
        Ok(p)
    }

    /// Read u16 length-prefixed bytes
    pub fn bytes(&mut self) -> Result<&'a [u8], ApduError> {
        let n = self.u16()? as usize;
        self.take(n)
    }

    pub fn str(&mut self, n: usize) -> Result<&'a str, ApduError> {
        core::str::from_utf8(self.take(n)?).map_err(|_| ApduError::InvalidEncoding)
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Length of a u16 length-prefixed field
pub(crate) const fn bytes_len(d: &[u8]) -> usize {
    2 + d.len()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_fields() {
        let mut buff = [0u8; 64];

        let mut e = Encoder::new(&mut buff);
        e.u8(0xab).unwrap();
        e.reserved(1).unwrap();
        e.u16(0x0102).unwrap();
        e.u32(0xdeadbeef).unwrap();
        e.u64(1_000_000).unwrap();
        e.path(&[0x8000_002c, 0, 7]).unwrap();
        e.bytes(&[1, 2, 3]).unwrap();
        let n = e.index();

        assert_eq!(n, 1 + 1 + 2 + 4 + 8 + 12 + bytes_len(&[1, 2, 3]));
        assert_eq!(&buff[..4], &[0xab, 0x00, 0x02, 0x01]);

        let mut d = Decoder::new(&buff[..n]);
        assert_eq!(d.u8().unwrap(), 0xab);
        d.skip(1).unwrap();
        assert_eq!(d.u16().unwrap(), 0x0102);
        assert_eq!(d.u32().unwrap(), 0xdeadbeef);
        assert_eq!(d.u64().unwrap(), 1_000_000);
        assert_eq!(&d.path(3).unwrap()[..], &[0x8000_002c, 0, 7]);
        assert_eq!(d.bytes().unwrap(), &[1, 2, 3]);
        assert_eq!(d.index(), n);

        // Reads past the end of the buffer must fail
        assert_eq!(d.u8(), Err(ApduError::InvalidLength));
    }

    #[test]
    fn reject_deep_paths() {
        let buff = [0u8; 64];
        let mut d = Decoder::new(&buff);
        assert_eq!(d.path(MAX_PATH_DEPTH + 1), Err(ApduError::InvalidLength));
    }
}
