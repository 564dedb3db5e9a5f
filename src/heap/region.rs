//! heap/region — регионы с фиксированными базами и адресное пространство.
//!
//! Регион — непрерывный span виртуальных адресов с декларированной базой,
//! максимальным размером и free pointer'ом (high-water границей живой
//! аллокации). Байты региона принадлежат модели (Vec), база — данные:
//! участвует во всей арифметике и сериализуется в образ как есть.
//!
//! AddressSpace отслеживает уже размещённые span'ы. Формат нерелоцируемый,
//! поэтому map() по занятому/невыравненному адресу — PlacementConflict.

use anyhow::{anyhow, Result};

use crate::consts::WORD_BYTES;
use crate::errors::CrashImageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Static,
    Dynamic,
    FixedObj,
    VaryObj,
}

impl RegionKind {
    pub fn name(self) -> &'static str {
        match self {
            RegionKind::Static => "static",
            RegionKind::Dynamic => "dynamic",
            RegionKind::FixedObj => "fixedobj",
            RegionKind::VaryObj => "varyobj",
        }
    }
}

/// Непрерывный регион с фиксированной базой.
#[derive(Debug)]
pub struct Region {
    pub kind: RegionKind,
    pub base: u64,
    pub capacity: u64,
    /// High-water граница живой аллокации (абсолютный адрес).
    free_pointer: u64,
    bytes: Vec<u8>,
}

impl Region {
    pub fn new(kind: RegionKind, base: u64, capacity: u64) -> Result<Self> {
        if base % WORD_BYTES != 0 || capacity % WORD_BYTES != 0 {
            return Err(anyhow!(
                "{} region base/capacity must be word-aligned ({:#x}/{:#x})",
                kind.name(),
                base,
                capacity
            ));
        }
        Ok(Self {
            kind,
            base,
            capacity,
            free_pointer: base,
            bytes: vec![0u8; capacity as usize],
        })
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.base + self.capacity
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    #[inline]
    pub fn high_water(&self) -> u64 {
        self.free_pointer
    }

    #[inline]
    pub fn live_bytes(&self) -> u64 {
        self.free_pointer - self.base
    }

    /// Передвинуть free pointer. Инвариант: base <= fp <= base+capacity,
    /// выравнивание по слову.
    pub fn set_free_pointer(&mut self, fp: u64) -> Result<()> {
        if fp < self.base || fp > self.end() || fp % WORD_BYTES != 0 {
            return Err(anyhow!(
                "{} free pointer {:#x} outside region envelope {:#x}..{:#x}",
                self.kind.name(),
                fp,
                self.base,
                self.end()
            ));
        }
        self.free_pointer = fp;
        Ok(())
    }

    /// Смещение адреса внутри региона. Вызов с чужим адресом — внутренняя
    /// ошибка (валидность адреса проверяет слой выше).
    #[inline]
    pub fn offset_of(&self, addr: u64) -> usize {
        assert!(self.contains(addr), "address {:#x} outside {} region", addr, self.kind.name());
        (addr - self.base) as usize
    }

    pub fn read_word(&self, addr: u64) -> u64 {
        let off = self.offset_of(addr);
        let mut w = [0u8; 8];
        w.copy_from_slice(&self.bytes[off..off + 8]);
        u64::from_le_bytes(w)
    }

    pub fn write_word(&mut self, addr: u64, word: u64) {
        let off = self.offset_of(addr);
        self.bytes[off..off + 8].copy_from_slice(&word.to_le_bytes());
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Учёт размещённых span'ов адресного пространства процесса.
#[derive(Debug, Default)]
pub struct AddressSpace {
    spans: Vec<(u64, u64, RegionKind)>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Зарезервировать span под регион. Перекрытие с уже размещённым,
    /// невыравненная база или переполнение адресов — PlacementConflict.
    pub fn map(&mut self, kind: RegionKind, base: u64, size: u64) -> Result<()> {
        let conflict = |detail: String| -> anyhow::Error {
            CrashImageError::PlacementConflict { base, size, detail }.into()
        };
        if size == 0 {
            return Err(conflict("empty region".to_string()));
        }
        if base % WORD_BYTES != 0 {
            return Err(conflict("base is not word-aligned".to_string()));
        }
        let end = base
            .checked_add(size)
            .ok_or_else(|| conflict("span wraps the address space".to_string()))?;
        for &(b, e, k) in &self.spans {
            if base < e && b < end {
                return Err(conflict(format!(
                    "overlaps mapped {} region {:#x}..{:#x}",
                    k.name(),
                    b,
                    e
                )));
            }
        }
        self.spans.push((base, end, kind));
        Ok(())
    }

    pub fn span_of(&self, addr: u64) -> Option<RegionKind> {
        self.spans
            .iter()
            .find(|&&(b, e, _)| addr >= b && addr < e)
            .map(|&(_, _, k)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_invariants() {
        let mut r = Region::new(RegionKind::Dynamic, 0x1000, 0x2000).unwrap();
        assert_eq!(r.high_water(), 0x1000);
        r.set_free_pointer(0x1800).unwrap();
        assert_eq!(r.live_bytes(), 0x800);
        assert!(r.set_free_pointer(0x3001).is_err());
        assert!(r.set_free_pointer(0x1001).is_err()); // misaligned
        assert!(Region::new(RegionKind::Static, 0x1001, 8).is_err());
    }

    #[test]
    fn region_word_io() {
        let mut r = Region::new(RegionKind::Dynamic, 0x1000, 0x100).unwrap();
        r.write_word(0x1008, 0xDEAD_BEEF_0000_0001);
        assert_eq!(r.read_word(0x1008), 0xDEAD_BEEF_0000_0001);
        assert_eq!(r.read_word(0x1010), 0);
    }

    #[test]
    fn address_space_conflicts() {
        let mut space = AddressSpace::new();
        space.map(RegionKind::Static, 0x1000, 0x1000).unwrap();
        space.map(RegionKind::Dynamic, 0x2000, 0x1000).unwrap();

        let err = space.map(RegionKind::VaryObj, 0x1800, 0x1000).unwrap_err();
        let ce = err.downcast_ref::<CrashImageError>().unwrap();
        assert!(matches!(ce, CrashImageError::PlacementConflict { .. }));

        assert!(space.map(RegionKind::VaryObj, u64::MAX - 7, 0x1000).is_err());
        assert_eq!(space.span_of(0x1008), Some(RegionKind::Static));
        assert_eq!(space.span_of(0x5000), None);
    }
}
