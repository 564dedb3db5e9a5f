//! heap/side — вспомогательные регионы адресно-стабильных объектов.
//!
//! Два региона для объектов, которым нужна стабильность адреса между
//! сборками:
//! - fixedobj: объекты фиксированного размера; таблица страниц хранит
//!   размер объекта на странице (4 B/страница, LE:
//!   [obj_size_words u16][gen u8][flags u8]);
//! - varyobj: объекты переменного размера; таблица страниц — u32
//!   scan-start (байты назад от базы страницы), плюс touched-битмап с
//!   гранулой мельче страницы (TOUCH_GRANULE_BYTES), упакованный в u32.
//!
//! Таблицы и битмап пишутся в образ целиком под декларированную ёмкость,
//! payload — только до free pointer'а.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::config::LayoutConfig;
use crate::consts::{FIXEDOBJ_PTE_NBYTES, TOUCH_GRANULE_BYTES, VARYOBJ_PTE_NBYTES};
use crate::heap::region::{Region, RegionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedObjPage {
    pub obj_size_words: u16,
    pub gen: u8,
    pub flags: u8,
}

impl FixedObjPage {
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), FIXEDOBJ_PTE_NBYTES);
        LittleEndian::write_u16(&mut buf[0..2], self.obj_size_words);
        buf[2] = self.gen;
        buf[3] = self.flags;
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            obj_size_words: LittleEndian::read_u16(&buf[0..2]),
            gen: buf[2],
            flags: buf[3],
        }
    }
}

#[derive(Debug)]
pub struct SideRegions {
    pub fixedobj: Region,
    pub fixedobj_pages: Vec<FixedObjPage>,
    pub varyobj: Region,
    /// Scan-start (байты назад от базы страницы), по странице.
    pub varyobj_pages: Vec<u32>,
    /// Touched-битмап varyobj-региона, бит на гранулу.
    pub touched: Vec<u32>,
}

impl SideRegions {
    pub fn new(cfg: &LayoutConfig) -> Result<Self> {
        let fixedobj = Region::new(RegionKind::FixedObj, cfg.fixedobj_base, cfg.fixedobj_size)?;
        let varyobj = Region::new(RegionKind::VaryObj, cfg.varyobj_base, cfg.varyobj_size)?;
        let page = cfg.page_bytes as u64;
        let n_fixed = (cfg.fixedobj_size / page) as usize;
        let n_vary = (cfg.varyobj_size / page) as usize;
        let n_granules = cfg.varyobj_size / TOUCH_GRANULE_BYTES;
        let n_touch_elts = (n_granules.div_ceil(32)) as usize;
        Ok(Self {
            fixedobj,
            fixedobj_pages: vec![FixedObjPage::default(); n_fixed],
            varyobj,
            varyobj_pages: vec![0u32; n_vary],
            touched: vec![0u32; n_touch_elts],
        })
    }

    // ---------- touched bitmap ----------

    pub fn touch(&mut self, addr: u64) -> Result<()> {
        let g = self.granule_of(addr)?;
        self.touched[g / 32] |= 1 << (g % 32);
        Ok(())
    }

    pub fn is_touched(&self, addr: u64) -> Result<bool> {
        let g = self.granule_of(addr)?;
        Ok(self.touched[g / 32] & (1 << (g % 32)) != 0)
    }

    fn granule_of(&self, addr: u64) -> Result<usize> {
        if !self.varyobj.contains(addr) {
            return Err(anyhow!("address {:#x} outside varyobj region", addr));
        }
        Ok(((addr - self.varyobj.base) / TOUCH_GRANULE_BYTES) as usize)
    }

    // ---------- serialized table sizes ----------

    pub fn fixedobj_table_nbytes(&self) -> usize {
        self.fixedobj_pages.len() * FIXEDOBJ_PTE_NBYTES
    }

    pub fn varyobj_table_nbytes(&self) -> usize {
        self.varyobj_pages.len() * VARYOBJ_PTE_NBYTES
    }

    pub fn touched_nbytes(&self) -> usize {
        self.touched.len() * 4
    }

    pub fn encode_fixedobj_table(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.fixedobj_table_nbytes()];
        for (i, p) in self.fixedobj_pages.iter().enumerate() {
            p.encode_into(&mut out[i * FIXEDOBJ_PTE_NBYTES..(i + 1) * FIXEDOBJ_PTE_NBYTES]);
        }
        out
    }

    pub fn decode_fixedobj_table(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.fixedobj_table_nbytes() {
            return Err(anyhow!("fixedobj page table size mismatch"));
        }
        for (i, p) in self.fixedobj_pages.iter_mut().enumerate() {
            *p = FixedObjPage::decode(&buf[i * FIXEDOBJ_PTE_NBYTES..(i + 1) * FIXEDOBJ_PTE_NBYTES]);
        }
        Ok(())
    }

    pub fn encode_varyobj_table(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.varyobj_table_nbytes()];
        for (i, &v) in self.varyobj_pages.iter().enumerate() {
            LittleEndian::write_u32(&mut out[i * 4..i * 4 + 4], v);
        }
        out
    }

    pub fn decode_varyobj_table(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.varyobj_table_nbytes() {
            return Err(anyhow!("varyobj page table size mismatch"));
        }
        for (i, v) in self.varyobj_pages.iter_mut().enumerate() {
            *v = LittleEndian::read_u32(&buf[i * 4..i * 4 + 4]);
        }
        Ok(())
    }

    pub fn encode_touched(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.touched_nbytes()];
        for (i, &v) in self.touched.iter().enumerate() {
            LittleEndian::write_u32(&mut out[i * 4..i * 4 + 4], v);
        }
        out
    }

    pub fn decode_touched(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() != self.touched_nbytes() {
            return Err(anyhow!("varyobj touched bitmap size mismatch"));
        }
        for (i, v) in self.touched.iter_mut().enumerate() {
            *v = LittleEndian::read_u32(&buf[i * 4..i * 4 + 4]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LayoutConfig {
        let mut c = LayoutConfig::default();
        c.fixedobj_size = 16 * 4096;
        c.varyobj_size = 16 * 4096;
        c
    }

    #[test]
    fn touched_bitmap() {
        let c = cfg();
        let mut side = SideRegions::new(&c).unwrap();
        let a = c.varyobj_base + 3 * TOUCH_GRANULE_BYTES + 17;
        assert!(!side.is_touched(a).unwrap());
        side.touch(a).unwrap();
        assert!(side.is_touched(a).unwrap());
        assert!(side.touch(c.varyobj_base + c.varyobj_size).is_err());
    }

    #[test]
    fn table_codecs_roundtrip() {
        let c = cfg();
        let mut side = SideRegions::new(&c).unwrap();
        side.fixedobj_pages[2] = FixedObjPage { obj_size_words: 8, gen: 3, flags: 1 };
        side.varyobj_pages[5] = 4096;
        side.touched[0] = 0xA5A5_0001;

        let ft = side.encode_fixedobj_table();
        let vt = side.encode_varyobj_table();
        let tb = side.encode_touched();

        let mut other = SideRegions::new(&c).unwrap();
        other.decode_fixedobj_table(&ft).unwrap();
        other.decode_varyobj_table(&vt).unwrap();
        other.decode_touched(&tb).unwrap();
        assert_eq!(other.fixedobj_pages[2], side.fixedobj_pages[2]);
        assert_eq!(other.varyobj_pages[5], 4096);
        assert_eq!(other.touched[0], 0xA5A5_0001);
    }
}
