//! heap/page — таблица страниц динамического региона.
//!
//! Формат сериализованной записи (16 B, LE):
//! [gen u8][kind u8][flags u8][reserved u8][words_used u32][scan_start_offset u64]
//!
//! Инварианты:
//! - gen осмыслен только при kind != Free;
//! - words_used считается от базы страницы и не превышает слов на страницу;
//! - scan_start_offset — байты НАЗАД от базы страницы до начала ближайшего
//!   предшествующего объекта (0, если объект начинается ровно на границе).
//!
//! Выход индекса за декларированные границы — внутренняя фатальная ошибка
//! (assert), не восстановимое условие: на точности этой арифметики стоят
//! все верхние слои.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    PAGE_KIND_BOXED, PAGE_KIND_CODE, PAGE_KIND_FREE, PAGE_KIND_MIXED, PAGE_KIND_UNBOXED,
    PTE_FLAG_OPEN_REGION, PTE_NBYTES, WORD_BYTES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Free,
    Boxed,
    Unboxed,
    Code,
    Mixed,
}

impl PageKind {
    pub fn as_u8(self) -> u8 {
        match self {
            PageKind::Free => PAGE_KIND_FREE,
            PageKind::Boxed => PAGE_KIND_BOXED,
            PageKind::Unboxed => PAGE_KIND_UNBOXED,
            PageKind::Code => PAGE_KIND_CODE,
            PageKind::Mixed => PAGE_KIND_MIXED,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            PAGE_KIND_FREE => Ok(PageKind::Free),
            PAGE_KIND_BOXED => Ok(PageKind::Boxed),
            PAGE_KIND_UNBOXED => Ok(PageKind::Unboxed),
            PAGE_KIND_CODE => Ok(PageKind::Code),
            PAGE_KIND_MIXED => Ok(PageKind::Mixed),
            _ => Err(anyhow!("unknown page kind {}", v)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageKind::Free => "free",
            PageKind::Boxed => "boxed",
            PageKind::Unboxed => "raw",
            PageKind::Code => "code",
            PageKind::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub gen: u8,
    pub kind: PageKind,
    pub open_region: bool,
    pub words_used: u32,
    pub scan_start_offset: u64,
}

impl PageTableEntry {
    pub fn free() -> Self {
        Self {
            gen: 0,
            kind: PageKind::Free,
            open_region: false,
            words_used: 0,
            scan_start_offset: 0,
        }
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), PTE_NBYTES);
        buf[0] = self.gen;
        buf[1] = self.kind.as_u8();
        buf[2] = if self.open_region { PTE_FLAG_OPEN_REGION } else { 0 };
        buf[3] = 0;
        LittleEndian::write_u32(&mut buf[4..8], self.words_used);
        LittleEndian::write_u64(&mut buf[8..16], self.scan_start_offset);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != PTE_NBYTES {
            return Err(anyhow!("page table entry must be {} bytes", PTE_NBYTES));
        }
        Ok(Self {
            gen: buf[0],
            kind: PageKind::from_u8(buf[1])?,
            open_region: buf[2] & PTE_FLAG_OPEN_REGION != 0,
            words_used: LittleEndian::read_u32(&buf[4..8]),
            scan_start_offset: LittleEndian::read_u64(&buf[8..16]),
        })
    }
}

/// Таблица страниц: адресная арифметика + записи.
#[derive(Debug)]
pub struct PageTable {
    base: u64,
    page_bytes: u32,
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub fn new(base: u64, page_bytes: u32, npages: u64) -> Self {
        Self {
            base,
            page_bytes,
            entries: vec![PageTableEntry::free(); npages as usize],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn page_bytes(&self) -> u32 {
        self.page_bytes
    }

    #[inline]
    pub fn words_per_page(&self) -> u32 {
        self.page_bytes / WORD_BYTES as u32
    }

    /// Индекс страницы для адреса; None вне декларированного конверта.
    pub fn index_of(&self, addr: u64) -> Option<usize> {
        if addr < self.base {
            return None;
        }
        let idx = ((addr - self.base) / self.page_bytes as u64) as usize;
        if idx < self.entries.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// База страницы по индексу. Индекс за границами таблицы — фатальная
    /// внутренняя ошибка.
    pub fn page_base(&self, idx: usize) -> u64 {
        assert!(idx < self.entries.len(), "page index {} out of bounds", idx);
        self.base + idx as u64 * self.page_bytes as u64
    }

    pub fn get(&self, idx: usize) -> &PageTableEntry {
        assert!(idx < self.entries.len(), "page index {} out of bounds", idx);
        &self.entries[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut PageTableEntry {
        assert!(idx < self.entries.len(), "page index {} out of bounds", idx);
        &mut self.entries[idx]
    }

    pub fn entries(&self) -> &[PageTableEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [PageTableEntry] {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pte_roundtrip() {
        let e = PageTableEntry {
            gen: 3,
            kind: PageKind::Mixed,
            open_region: true,
            words_used: 512,
            scan_start_offset: 4096,
        };
        let mut buf = [0u8; PTE_NBYTES];
        e.encode_into(&mut buf);
        let d = PageTableEntry::decode(&buf).unwrap();
        assert_eq!(d, e);
    }

    #[test]
    fn pte_rejects_unknown_kind() {
        let mut buf = [0u8; PTE_NBYTES];
        buf[1] = 0x7F;
        assert!(PageTableEntry::decode(&buf).is_err());
    }

    #[test]
    fn page_arithmetic() {
        let pt = PageTable::new(0x1000_0000, 4096, 4);
        assert_eq!(pt.index_of(0x1000_0000), Some(0));
        assert_eq!(pt.index_of(0x1000_0FFF), Some(0));
        assert_eq!(pt.index_of(0x1000_1000), Some(1));
        assert_eq!(pt.index_of(0x1000_4000), None);
        assert_eq!(pt.index_of(0x0FFF_FFFF), None);
        assert_eq!(pt.page_base(3), 0x1000_3000);
        assert_eq!(pt.words_per_page(), 512);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn page_base_out_of_bounds_is_fatal() {
        let pt = PageTable::new(0x1000_0000, 4096, 4);
        let _ = pt.page_base(4);
    }
}
