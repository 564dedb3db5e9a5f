//! image/preamble — заголовки crash-образа.
//!
//! Преамбула (128 B, LE):
//! [signature u64]
//! [page_bytes u32][card_bytes u32][card_table_nbits u32][nthreads u32]
//! [static_base u64][static_nbytes u64]
//! [dynamic_base u64][dynamic_page_count u64]
//! [fixedobj_base u64][fixedobj_size u64][fixedobj_free u64]
//! [varyobj_base u64][varyobj_size u64][varyobj_free u64]
//! [tls_nbytes u32][sizeof_context u32]
//! [runtime_info u64]
//! [feature_flags u8][pad 7]
//!
//! Пер-тредовая преамбула (32 B, LE):
//! [orig_id u64][has_context u64][control_nbytes u64][binding_nbytes u64]
//!
//! Сигнатура = (размер преамбулы << 16) | размер тредовой преамбулы:
//! любое изменение layout'а меняет сигнатуру и ловит несовпадение сборок.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::{checked_read, checked_write};
use crate::consts::{
    CRASH_PREAMBLE_NBYTES, CRASH_SIGNATURE, CRASH_THREAD_PREAMBLE_NBYTES, FEATURE_SIDE_REGIONS,
};
use crate::errors::CrashImageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashPreamble {
    pub signature: u64,
    pub page_bytes: u32,
    pub card_bytes: u32,
    pub card_table_nbits: u32,
    pub nthreads: u32,
    pub static_base: u64,
    pub static_nbytes: u64,
    pub dynamic_base: u64,
    pub dynamic_page_count: u64,
    pub fixedobj_base: u64,
    pub fixedobj_size: u64,
    pub fixedobj_free: u64,
    pub varyobj_base: u64,
    pub varyobj_size: u64,
    pub varyobj_free: u64,
    pub tls_nbytes: u32,
    pub sizeof_context: u32,
    pub runtime_info: u64,
    pub feature_flags: u8,
}

impl CrashPreamble {
    pub fn has_side_regions(&self) -> bool {
        self.feature_flags & FEATURE_SIDE_REGIONS != 0
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(CRASH_PREAMBLE_NBYTES);
        buf.write_u64::<LittleEndian>(self.signature)?;
        buf.write_u32::<LittleEndian>(self.page_bytes)?;
        buf.write_u32::<LittleEndian>(self.card_bytes)?;
        buf.write_u32::<LittleEndian>(self.card_table_nbits)?;
        buf.write_u32::<LittleEndian>(self.nthreads)?;
        buf.write_u64::<LittleEndian>(self.static_base)?;
        buf.write_u64::<LittleEndian>(self.static_nbytes)?;
        buf.write_u64::<LittleEndian>(self.dynamic_base)?;
        buf.write_u64::<LittleEndian>(self.dynamic_page_count)?;
        buf.write_u64::<LittleEndian>(self.fixedobj_base)?;
        buf.write_u64::<LittleEndian>(self.fixedobj_size)?;
        buf.write_u64::<LittleEndian>(self.fixedobj_free)?;
        buf.write_u64::<LittleEndian>(self.varyobj_base)?;
        buf.write_u64::<LittleEndian>(self.varyobj_size)?;
        buf.write_u64::<LittleEndian>(self.varyobj_free)?;
        buf.write_u32::<LittleEndian>(self.tls_nbytes)?;
        buf.write_u32::<LittleEndian>(self.sizeof_context)?;
        buf.write_u64::<LittleEndian>(self.runtime_info)?;
        buf.write_u8(self.feature_flags)?;
        buf.extend_from_slice(&[0u8; 7]);
        debug_assert_eq!(buf.len(), CRASH_PREAMBLE_NBYTES);
        checked_write(w, &buf, "writing crash preamble")?;
        Ok(())
    }

    /// Прочитать и проверить преамбулу. Несовпадение сигнатуры —
    /// FormatMismatch: образ произведён другой сборкой формата.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut raw = [0u8; CRASH_PREAMBLE_NBYTES];
        checked_read(r, &mut raw, "reading crash preamble")?;
        let mut c = &raw[..];
        let signature = c.read_u64::<LittleEndian>()?;
        if signature != CRASH_SIGNATURE {
            return Err(CrashImageError::FormatMismatch {
                detail: format!(
                    "bad preamble signature (have {:#x}, expect {:#x})",
                    signature, CRASH_SIGNATURE
                ),
            }
            .into());
        }
        let page_bytes = c.read_u32::<LittleEndian>()?;
        let card_bytes = c.read_u32::<LittleEndian>()?;
        let card_table_nbits = c.read_u32::<LittleEndian>()?;
        let nthreads = c.read_u32::<LittleEndian>()?;
        let static_base = c.read_u64::<LittleEndian>()?;
        let static_nbytes = c.read_u64::<LittleEndian>()?;
        let dynamic_base = c.read_u64::<LittleEndian>()?;
        let dynamic_page_count = c.read_u64::<LittleEndian>()?;
        let fixedobj_base = c.read_u64::<LittleEndian>()?;
        let fixedobj_size = c.read_u64::<LittleEndian>()?;
        let fixedobj_free = c.read_u64::<LittleEndian>()?;
        let varyobj_base = c.read_u64::<LittleEndian>()?;
        let varyobj_size = c.read_u64::<LittleEndian>()?;
        let varyobj_free = c.read_u64::<LittleEndian>()?;
        let tls_nbytes = c.read_u32::<LittleEndian>()?;
        let sizeof_context = c.read_u32::<LittleEndian>()?;
        let runtime_info = c.read_u64::<LittleEndian>()?;
        let feature_flags = c.read_u8()?;
        Ok(Self {
            signature,
            page_bytes,
            card_bytes,
            card_table_nbits,
            nthreads,
            static_base,
            static_nbytes,
            dynamic_base,
            dynamic_page_count,
            fixedobj_base,
            fixedobj_size,
            fixedobj_free,
            varyobj_base,
            varyobj_size,
            varyobj_free,
            tls_nbytes,
            sizeof_context,
            runtime_info,
            feature_flags,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPreamble {
    pub orig_id: u64,
    pub has_context: bool,
    pub control_nbytes: u64,
    pub binding_nbytes: u64,
}

impl ThreadPreamble {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(CRASH_THREAD_PREAMBLE_NBYTES);
        buf.write_u64::<LittleEndian>(self.orig_id)?;
        buf.write_u64::<LittleEndian>(self.has_context as u64)?;
        buf.write_u64::<LittleEndian>(self.control_nbytes)?;
        buf.write_u64::<LittleEndian>(self.binding_nbytes)?;
        debug_assert_eq!(buf.len(), CRASH_THREAD_PREAMBLE_NBYTES);
        checked_write(w, &buf, "writing thread preamble")?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut raw = [0u8; CRASH_THREAD_PREAMBLE_NBYTES];
        checked_read(r, &mut raw, "reading thread preamble")?;
        let mut c = &raw[..];
        Ok(Self {
            orig_id: c.read_u64::<LittleEndian>()?,
            has_context: c.read_u64::<LittleEndian>()? != 0,
            control_nbytes: c.read_u64::<LittleEndian>()?,
            binding_nbytes: c.read_u64::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CrashPreamble {
        CrashPreamble {
            signature: CRASH_SIGNATURE,
            page_bytes: 4096,
            card_bytes: 512,
            card_table_nbits: 15,
            nthreads: 3,
            static_base: 0x0300_0000,
            static_nbytes: 1024,
            dynamic_base: 0x1000_0000,
            dynamic_page_count: 4,
            fixedobj_base: 0x0400_0000,
            fixedobj_size: 256 * 1024,
            fixedobj_free: 0x0400_1000,
            varyobj_base: 0x0500_0000,
            varyobj_size: 512 * 1024,
            varyobj_free: 0x0500_2000,
            tls_nbytes: 4096,
            sizeof_context: 136,
            runtime_info: 0xCAFE,
            feature_flags: FEATURE_SIDE_REGIONS,
        }
    }

    #[test]
    fn preamble_roundtrip() {
        let p = sample();
        let mut buf = Vec::new();
        p.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CRASH_PREAMBLE_NBYTES);
        let q = CrashPreamble::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(q, p);
        assert!(q.has_side_regions());
    }

    #[test]
    fn bad_signature_is_format_mismatch() {
        let p = sample();
        let mut buf = Vec::new();
        p.write_to(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        let err = CrashPreamble::read_from(&mut buf.as_slice()).unwrap_err();
        let ce = err.downcast_ref::<CrashImageError>().unwrap();
        assert!(matches!(ce, CrashImageError::FormatMismatch { .. }));
    }

    #[test]
    fn thread_preamble_roundtrip() {
        let t = ThreadPreamble {
            orig_id: 0x55AA,
            has_context: true,
            control_nbytes: 640,
            binding_nbytes: 64,
        };
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CRASH_THREAD_PREAMBLE_NBYTES);
        let u = ThreadPreamble::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(u, t);
    }
}
