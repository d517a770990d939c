// PCAP file format.
//
// Classic little-endian pcap: a 24-byte global header followed by
// 16-byte-header records. Read honors the format exactly; write emits it
// exactly. Timestamps come from a pluggable clock so that serialization is
// testable with a fixed time source.

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::mbuf::Mbuf;

pub const PCAP_MAGIC: u32 = 0xA1B2_C3D4;
pub const PCAP_VERSION_MAJOR: u16 = 2;
pub const PCAP_VERSION_MINOR: u16 = 4;
pub const PCAP_SNAPLEN: u32 = 65_535;
/// LINKTYPE_ETHERNET
pub const PCAP_NETWORK: u32 = 1;

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

/// Source of record timestamps.
pub trait Clock: Send + Sync {
    /// Current time as `(seconds, microseconds)` since the Unix epoch.
    fn timestamp(&self) -> (u32, u32);
}

/// Wall-clock timestamps.
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> (u32, u32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now.as_secs() as u32, now.subsec_micros())
    }
}

/// A clock frozen at one instant, for deterministic serialization in tests.
pub struct FixedClock {
    pub sec: u32,
    pub usec: u32,
}

impl Clock for FixedClock {
    fn timestamp(&self) -> (u32, u32) {
        (self.sec, self.usec)
    }
}

/// The 24-byte pcap global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapGlobalHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub network: u32,
}

impl Default for PcapGlobalHeader {
    fn default() -> Self {
        Self {
            magic: PCAP_MAGIC,
            version_major: PCAP_VERSION_MAJOR,
            version_minor: PCAP_VERSION_MINOR,
            thiszone: 0,
            sigfigs: 0,
            snaplen: PCAP_SNAPLEN,
            network: PCAP_NETWORK,
        }
    }
}

impl PcapGlobalHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = [0u8; GLOBAL_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version_major.to_le_bytes());
        buf[6..8].copy_from_slice(&self.version_minor.to_le_bytes());
        buf[8..12].copy_from_slice(&self.thiszone.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sigfigs.to_le_bytes());
        buf[16..20].copy_from_slice(&self.snaplen.to_le_bytes());
        buf[20..24].copy_from_slice(&self.network.to_le_bytes());
        w.write_all(&buf)
    }

    pub fn read_from<R: Read>(r: &mut R, path: &str) -> Result<Self> {
        let mut buf = [0u8; GLOBAL_HEADER_LEN];
        r.read_exact(&mut buf).map_err(|_| Error::PcapFormat {
            path: path.to_string(),
            reason: "truncated global header",
        })?;
        let header = Self {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            version_major: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            version_minor: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            thiszone: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            sigfigs: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            snaplen: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            network: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        };
        if header.magic != PCAP_MAGIC {
            return Err(Error::PcapFormat {
                path: path.to_string(),
                reason: "bad magic (only little-endian microsecond pcap is supported)",
            });
        }
        Ok(header)
    }
}

/// The 16-byte per-record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapRecordHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub incl_len: u32,
    pub orig_len: u32,
}

impl PcapRecordHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.ts_sec.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ts_usec.to_le_bytes());
        buf[8..12].copy_from_slice(&self.incl_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.orig_len.to_le_bytes());
        w.write_all(&buf)
    }

    /// Read a record header. Returns `None` at a clean end of file.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < RECORD_HEADER_LEN {
            let n = r.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated pcap record header",
                )));
            }
            filled += n;
        }
        Ok(Some(Self {
            ts_sec: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            ts_usec: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            incl_len: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            orig_len: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }))
    }
}

/// Write one packet as a pcap record, stamping it with `clock`.
pub fn write_record<W: Write>(w: &mut W, clock: &dyn Clock, data: &[u8]) -> io::Result<()> {
    let (ts_sec, ts_usec) = clock.timestamp();
    let header = PcapRecordHeader {
        ts_sec,
        ts_usec,
        incl_len: data.len() as u32,
        orig_len: data.len() as u32,
    };
    header.write_to(w)?;
    w.write_all(data)
}

/// Read the next record into `mbuf`. Returns `true` at end of file.
pub fn read_record<R: Read>(r: &mut R, mbuf: &mut Mbuf) -> Result<bool> {
    let header = match PcapRecordHeader::read_from(r)? {
        Some(h) => h,
        None => return Ok(true),
    };
    let len = header.incl_len as usize;
    mbuf.reset();
    let room = mbuf
        .append(len)
        .ok_or(Error::PacketTooLarge(len))?;
    r.read_exact(room)?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_global_header_layout() {
        let mut buf = Vec::new();
        PcapGlobalHeader::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), GLOBAL_HEADER_LEN);
        assert_eq!(&buf[0..4], &[0xD4, 0xC3, 0xB2, 0xA1]);
        assert_eq!(&buf[4..6], &[2, 0]);
        assert_eq!(&buf[6..8], &[4, 0]);
        assert_eq!(&buf[16..20], &[0xFF, 0xFF, 0, 0]);
        assert_eq!(&buf[20..24], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_foreign_magic() {
        let mut buf = Vec::new();
        PcapGlobalHeader {
            magic: 0xA1B2_3C4D, // nanosecond pcap
            ..Default::default()
        }
        .write_to(&mut buf)
        .unwrap();
        let err = PcapGlobalHeader::read_from(&mut Cursor::new(buf), "x.pcap").unwrap_err();
        assert!(matches!(err, Error::PcapFormat { .. }));
    }

    #[test]
    fn test_record_roundtrip_with_fixed_clock() {
        let clock = FixedClock { sec: 1700, usec: 42 };
        let mut buf = Vec::new();
        write_record(&mut buf, &clock, &[9, 8, 7, 6]).unwrap();
        write_record(&mut buf, &clock, &[5]).unwrap();

        let mut cursor = Cursor::new(buf);
        let mut mbuf = Mbuf::new();
        assert!(!read_record(&mut cursor, &mut mbuf).unwrap());
        assert_eq!(mbuf.data(), &[9, 8, 7, 6]);
        assert!(!read_record(&mut cursor, &mut mbuf).unwrap());
        assert_eq!(mbuf.data(), &[5]);
        assert!(read_record(&mut cursor, &mut mbuf).unwrap());
    }

    #[test]
    fn test_record_header_stamps() {
        let clock = FixedClock { sec: 11, usec: 22 };
        let mut buf = Vec::new();
        write_record(&mut buf, &clock, &[0; 60]).unwrap();
        let header = PcapRecordHeader::read_from(&mut Cursor::new(&buf[..]))
            .unwrap()
            .unwrap();
        assert_eq!(header.ts_sec, 11);
        assert_eq!(header.ts_usec, 22);
        assert_eq!(header.incl_len, 60);
        assert_eq!(header.orig_len, 60);
    }
}
