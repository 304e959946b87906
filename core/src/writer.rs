// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Byte sinks and Bitcoin-style wire encoding helpers

use heapless::Vec;

use crate::engine::Error;

/// Sink for wire-encoded bytes (serializer buffers and hash contexts)
pub trait Writer {
    /// Append bytes to the sink
    fn write(&mut self, d: &[u8]) -> Result<(), Error>;
}

impl<T: Writer> Writer for &mut T {
    fn write(&mut self, d: &[u8]) -> Result<(), Error> {
        T::write(self, d)
    }
}

impl<const N: usize> Writer for Vec<u8, N> {
    fn write(&mut self, d: &[u8]) -> Result<(), Error> {
        self.extend_from_slice(d).map_err(|_| Error::BufferOverflow)
    }
}

pub fn write_u8(w: &mut impl Writer, v: u8) -> Result<(), Error> {
    w.write(&[v])
}

pub fn write_u16(w: &mut impl Writer, v: u16) -> Result<(), Error> {
    w.write(&v.to_le_bytes())
}

pub fn write_u32(w: &mut impl Writer, v: u32) -> Result<(), Error> {
    w.write(&v.to_le_bytes())
}

pub fn write_u64(w: &mut impl Writer, v: u64) -> Result<(), Error> {
    w.write(&v.to_le_bytes())
}

/// Write a compact size (varint) prefix
pub fn write_varint(w: &mut impl Writer, n: u64) -> Result<(), Error> {
    match n {
        0..=0xfc => w.write(&[n as u8]),
        0xfd..=0xffff => {
            w.write(&[0xfd])?;
            w.write(&(n as u16).to_le_bytes())
        }
        0x1_0000..=0xffff_ffff => {
            w.write(&[0xfe])?;
            w.write(&(n as u32).to_le_bytes())
        }
        _ => {
            w.write(&[0xff])?;
            w.write(&n.to_le_bytes())
        }
    }
}

/// Encoded length of a compact size prefix
pub const fn varint_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Write compact size prefixed bytes
pub fn write_prefixed(w: &mut impl Writer, d: &[u8]) -> Result<(), Error> {
    write_varint(w, d.len() as u64)?;
    w.write(d)
}

/// Write a 32-byte hash in reversed (internal) byte order
pub fn write_reversed(w: &mut impl Writer, h: &[u8; 32]) -> Result<(), Error> {
    let mut r = *h;
    r.reverse();
    w.write(&r)
}

/// Write a script push opcode for `n` bytes of data
pub fn write_op_push(w: &mut impl Writer, n: usize) -> Result<(), Error> {
    match n {
        0..=0x4b => w.write(&[n as u8]),
        0x4c..=0xff => w.write(&[0x4c, n as u8]),
        0x100..=0xffff => {
            w.write(&[0x4d])?;
            w.write(&(n as u16).to_le_bytes())
        }
        _ => {
            w.write(&[0x4e])?;
            w.write(&(n as u32).to_le_bytes())
        }
    }
}

/// Length of the push opcode for `n` bytes of data
pub const fn op_push_len(n: usize) -> usize {
    match n {
        0..=0x4b => 1,
        0x4c..=0xff => 2,
        0x100..=0xffff => 3,
        _ => 5,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn varints() {
        let tests: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (0xfc, &[0xfc]),
            (0xfd, &[0xfd, 0xfd, 0x00]),
            (0xffff, &[0xfd, 0xff, 0xff]),
            (0x1_0000, &[0xfe, 0x00, 0x00, 0x01, 0x00]),
            (
                0x1_0000_0000,
                &[0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
            ),
        ];

        for (n, e) in tests {
            let mut b = Vec::<u8, 16>::new();
            write_varint(&mut b, *n).unwrap();
            assert_eq!(&b[..], *e, "varint {n:#x}");
            assert_eq!(varint_len(*n), e.len());
        }
    }

    #[test]
    fn op_push() {
        for (n, l) in [(20, 1), (0x4b, 1), (0x4c, 2), (0xff, 2), (0x100, 3)] {
            let mut b = Vec::<u8, 8>::new();
            write_op_push(&mut b, n).unwrap();
            assert_eq!(b.len(), l);
            assert_eq!(op_push_len(n), l);
        }
    }

    #[test]
    fn bounded_writes() {
        let mut b = Vec::<u8, 4>::new();
        write_u32(&mut b, 1).unwrap();
        assert_eq!(write_u8(&mut b, 0), Err(Error::BufferOverflow));
    }

    #[test]
    fn reversed_hash() {
        let mut h = [0u8; 32];
        h[0] = 0xaa;
        h[31] = 0x55;

        let mut b = Vec::<u8, 32>::new();
        write_reversed(&mut b, &h).unwrap();
        assert_eq!(b[0], 0x55);
        assert_eq!(b[31], 0xaa);
    }
}
