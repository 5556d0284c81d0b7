//! Fixed-layout record encoding.
//!
//! Both ends of the channel are always the same build running on the same
//! machine, so records use the platform's natural byte representation and
//! no endianness is negotiated.

use bytes::{Buf, BufMut, BytesMut};

/// A value with a fixed wire layout.
///
/// `decode` may assume the buffer holds at least [`Record::SIZE`] bytes;
/// the channel reads exactly that many before calling it.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    fn encode(&self, buf: &mut BytesMut);

    fn decode<B: Buf>(buf: &mut B) -> Self;
}

impl Record for u8 {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u8()
    }
}

impl Record for bool {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u8() != 0
    }
}

impl Record for u32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_ne(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u32_ne()
    }
}

impl Record for i32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_ne(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_i32_ne()
    }
}

impl Record for u64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_ne(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u64_ne()
    }
}

impl Record for i64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64_ne(*self);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_i64_ne()
    }
}

/// Seconds/nanoseconds timestamp, matching the host `timespec` layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

impl Record for TimeSpec {
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64_ne(self.sec);
        buf.put_i64_ne(self.nsec);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            sec: buf.get_i64_ne(),
            nsec: buf.get_i64_ne(),
        }
    }
}

/// Per-entry file metadata returned by stat and enumeration operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInformation {
    pub access_time: TimeSpec,
    pub modification_time: TimeSpec,
    pub status_change_time: TimeSpec,
    pub size: u64,
    pub mode: u32,
}

impl Record for FileInformation {
    const SIZE: usize = 3 * TimeSpec::SIZE + 8 + 4;

    fn encode(&self, buf: &mut BytesMut) {
        self.access_time.encode(buf);
        self.modification_time.encode(buf);
        self.status_change_time.encode(buf);
        buf.put_u64_ne(self.size);
        buf.put_u32_ne(self.mode);
    }

    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self {
            access_time: TimeSpec::decode(buf),
            modification_time: TimeSpec::decode(buf),
            status_change_time: TimeSpec::decode(buf),
            size: buf.get_u64_ne(),
            mode: buf.get_u32_ne(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Record + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = BytesMut::with_capacity(T::SIZE);
        value.encode(&mut buf);
        assert_eq!(buf.len(), T::SIZE);
        let mut slice = &buf[..];
        assert_eq!(T::decode(&mut slice), value);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_scalar_records() {
        roundtrip(0xA5u8);
        roundtrip(true);
        roundtrip(0xDEAD_BEEFu32);
        roundtrip(-7i32);
        roundtrip(u64::MAX - 1);
        roundtrip(i64::MIN + 1);
    }

    #[test]
    fn test_file_information_layout() {
        let info = FileInformation {
            access_time: TimeSpec::new(1_700_000_000, 123),
            modification_time: TimeSpec::new(1_700_000_001, 456),
            status_change_time: TimeSpec::new(1_700_000_002, 789),
            size: 4096,
            mode: 0o100644,
        };
        roundtrip(info);
        assert_eq!(FileInformation::SIZE, 60);
    }

    #[test]
    fn test_bool_decodes_any_nonzero() {
        let mut slice = &[2u8][..];
        assert!(bool::decode(&mut slice));
    }
}
