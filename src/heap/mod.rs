//! heap — агрегат «что за память существует и что в ней лежит».
//!
//! Субмодули:
//! - region.rs: Region + AddressSpace (фиксированное размещение);
//! - page.rs: таблица страниц динамического региона;
//! - card.rs: card-таблица write-barrier'а;
//! - gens.rs: агрегаты поколений (пересчёт из таблицы страниц);
//! - side.rs: вспомогательные fixedobj/varyobj регионы.
//!
//! Здесь же — модель bump-аллокации через открытые allocation-регионы.
//! Открытый регион оставляет words_used страниц несинхронизированным до
//! close_region() — именно поэтому capture обязан видеть кучу без единого
//! открытого региона (page table иначе внутренне несогласован).

pub mod card;
pub mod gens;
pub mod page;
pub mod region;
pub mod side;

use anyhow::{anyhow, Result};
use log::debug;

use crate::config::LayoutConfig;
use crate::consts::{ALIGN_BYTES, WORD_BYTES};
use crate::heap::card::CardTable;
use crate::heap::gens::GenTable;
use crate::heap::page::{PageKind, PageTable};
use crate::heap::region::{AddressSpace, Region, RegionKind};
use crate::heap::side::SideRegions;
use crate::object::{make_header, total_words_for, TAG_FILLER};

/// Открытый thread-local allocation-регион: зарезервированный span, в
/// который владелец bump-аллоцирует без обновления таблицы страниц.
#[derive(Debug)]
pub struct AllocRegion {
    pub start: u64,
    pub free: u64,
    pub end: u64,
    pub kind: PageKind,
    pub gen: u8,
}

impl AllocRegion {
    /// Выделить nbytes внутри региона (dualword-выравнивание на вызывающем).
    pub fn bump(&mut self, nbytes: u64) -> Result<u64> {
        let addr = self.free;
        if addr + nbytes > self.end {
            return Err(anyhow!(
                "allocation region exhausted ({} bytes requested, {} left)",
                nbytes,
                self.end - addr
            ));
        }
        self.free += nbytes;
        Ok(addr)
    }
}

#[derive(Debug)]
pub struct Heap {
    pub config: LayoutConfig,
    space: AddressSpace,
    static_region: Region,
    dynamic: Region,
    page_table: PageTable,
    cards: CardTable,
    side: Option<SideRegions>,
    /// Opaque «extra runtime metadata» слово, переносимое образом как есть.
    runtime_info: u64,
    open_regions: usize,
}

impl Heap {
    /// Собрать свежую кучу по конфигурации (путь запуска процесса).
    pub fn new(config: LayoutConfig) -> Result<Self> {
        config.validate()?;
        let static_region = Region::new(RegionKind::Static, config.static_base, config.static_size)?;
        let dynamic = Region::new(RegionKind::Dynamic, config.dynamic_base, config.dynamic_size)?;
        let page_table = PageTable::new(config.dynamic_base, config.page_bytes, config.dynamic_pages());
        let cards = CardTable::new(config.card_table_nbits, config.card_bytes);
        let side = if config.side_regions {
            Some(SideRegions::new(&config)?)
        } else {
            None
        };
        Self::from_parts(config, static_region, dynamic, page_table, cards, side, 0)
    }

    /// Собрать кучу из готовых частей (путь restore). Все регионы проходят
    /// размещение в свежем AddressSpace: перекрытие — PlacementConflict.
    pub fn from_parts(
        config: LayoutConfig,
        static_region: Region,
        dynamic: Region,
        page_table: PageTable,
        cards: CardTable,
        side: Option<SideRegions>,
        runtime_info: u64,
    ) -> Result<Self> {
        if page_table.len() as u64 != dynamic.capacity / config.page_bytes as u64 {
            return Err(anyhow!(
                "page table covers {} pages, dynamic region has {}",
                page_table.len(),
                dynamic.capacity / config.page_bytes as u64
            ));
        }
        let mut space = AddressSpace::new();
        space.map(RegionKind::Static, static_region.base, static_region.capacity)?;
        space.map(RegionKind::Dynamic, dynamic.base, dynamic.capacity)?;
        if let Some(s) = &side {
            space.map(RegionKind::FixedObj, s.fixedobj.base, s.fixedobj.capacity)?;
            space.map(RegionKind::VaryObj, s.varyobj.base, s.varyobj.capacity)?;
        }
        Ok(Self {
            config,
            space,
            static_region,
            dynamic,
            page_table,
            cards,
            side,
            runtime_info,
            open_regions: 0,
        })
    }

    // ---------------- accessors ----------------

    pub fn static_region(&self) -> &Region {
        &self.static_region
    }
    pub fn static_region_mut(&mut self) -> &mut Region {
        &mut self.static_region
    }
    pub fn dynamic(&self) -> &Region {
        &self.dynamic
    }
    pub fn dynamic_mut(&mut self) -> &mut Region {
        &mut self.dynamic
    }
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }
    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }
    pub fn cards(&self) -> &CardTable {
        &self.cards
    }
    pub fn cards_mut(&mut self) -> &mut CardTable {
        &mut self.cards
    }
    pub fn side(&self) -> Option<&SideRegions> {
        self.side.as_ref()
    }
    pub fn side_mut(&mut self) -> Option<&mut SideRegions> {
        self.side.as_mut()
    }
    pub fn runtime_info(&self) -> u64 {
        self.runtime_info
    }
    pub fn set_runtime_info(&mut self, word: u64) {
        self.runtime_info = word;
    }

    /// Число страниц динамического региона, занятых аллокацией.
    pub fn pages_in_use(&self) -> u64 {
        self.dynamic.live_bytes().div_ceil(self.config.page_bytes as u64)
    }

    /// Адрес управляется кучей (лежит в любом размещённом регионе)?
    pub fn managed_addr_p(&self, addr: u64) -> bool {
        self.space.span_of(addr).is_some()
    }

    /// Регион, содержащий адрес.
    pub fn region_of(&self, addr: u64) -> Option<&Region> {
        match self.space.span_of(addr)? {
            RegionKind::Static => Some(&self.static_region),
            RegionKind::Dynamic => Some(&self.dynamic),
            RegionKind::FixedObj => self.side.as_ref().map(|s| &s.fixedobj),
            RegionKind::VaryObj => self.side.as_ref().map(|s| &s.varyobj),
        }
    }

    pub fn read_word(&self, addr: u64) -> Result<u64> {
        let r = self
            .region_of(addr)
            .ok_or_else(|| anyhow!("address {:#x} is not heap-managed", addr))?;
        Ok(r.read_word(addr))
    }

    pub fn write_word(&mut self, addr: u64, word: u64) -> Result<()> {
        let kind = self
            .space
            .span_of(addr)
            .ok_or_else(|| anyhow!("address {:#x} is not heap-managed", addr))?;
        let r = match kind {
            RegionKind::Static => &mut self.static_region,
            RegionKind::Dynamic => &mut self.dynamic,
            RegionKind::FixedObj => &mut self.side.as_mut().unwrap().fixedobj,
            RegionKind::VaryObj => &mut self.side.as_mut().unwrap().varyobj,
        };
        r.write_word(addr, word);
        Ok(())
    }

    /// Отметить card для адреса (write barrier снаружи).
    pub fn mark_card(&mut self, addr: u64) {
        self.cards.mark_addr(addr);
    }

    /// Пересчитать агрегаты поколений (перед любыми запросами к ним).
    pub fn generations(&self) -> GenTable {
        GenTable::recompute(&self.page_table)
    }

    // ---------------- allocation regions ----------------

    pub fn has_open_regions(&self) -> bool {
        self.open_regions > 0
    }

    /// Открыть allocation-регион: зарезервировать span и пометить страницы
    /// флагом open_region. words_used страниц НЕ обновляется до close.
    pub fn open_region(&mut self, nbytes: u64, kind: PageKind, gen: u8) -> Result<AllocRegion> {
        if kind == PageKind::Free {
            return Err(anyhow!("cannot open an allocation region of kind free"));
        }
        let nbytes = crate::util::align_up(nbytes, ALIGN_BYTES);
        let mut start = self.dynamic.high_water();
        // Регион другого вида/поколения не продолжает чужую страницу —
        // аллокация уезжает на ближайшую свежую.
        if start % self.config.page_bytes as u64 != 0 && start < self.dynamic.end() {
            let idx = self.page_table.index_of(start).expect("start inside dynamic");
            let pte = self.page_table.get(idx);
            if pte.kind != PageKind::Free && (pte.kind != kind || pte.gen != gen) {
                start = self.page_table.page_base(idx) + self.config.page_bytes as u64;
            }
        }
        let end = start + nbytes;
        if end > self.dynamic.end() {
            return Err(anyhow!(
                "dynamic region exhausted ({} bytes requested at {:#x})",
                nbytes,
                start
            ));
        }
        let first = self.page_table.index_of(start).expect("start inside dynamic");
        let last = self.page_table.index_of(end - 1).expect("end inside dynamic");
        for idx in first..=last {
            let pte = self.page_table.get_mut(idx);
            if pte.kind == PageKind::Free {
                pte.kind = kind;
                pte.gen = gen;
            } else if pte.kind != kind || pte.gen != gen {
                return Err(anyhow!(
                    "page {} already holds {} gen {} data",
                    idx,
                    pte.kind.name(),
                    pte.gen
                ));
            }
            pte.open_region = true;
        }
        self.dynamic.set_free_pointer(end)?;
        self.open_regions += 1;
        debug!(
            "open_region: {:#x}..{:#x} {} gen {}",
            start,
            end,
            kind.name(),
            gen
        );
        Ok(AllocRegion { start, free: start, end, kind, gen })
    }

    /// Закрыть allocation-регион: добить хвост filler-объектом, закоммитить
    /// words_used затронутых страниц и снять open-флаги.
    pub fn close_region(&mut self, region: AllocRegion) -> Result<()> {
        if region.free < region.start || region.free > region.end {
            return Err(anyhow!("region free pointer escaped its span"));
        }
        if region.free % ALIGN_BYTES != 0 {
            return Err(anyhow!("region free pointer must stay dualword-aligned"));
        }
        let tail_bytes = region.end - region.free;
        if tail_bytes > 0 {
            let tail_words = tail_bytes / WORD_BYTES;
            self.dynamic
                .write_word(region.free, make_header(TAG_FILLER, tail_words - 1));
            self.note_object_span(region.free, tail_bytes);
        }
        let first = self.page_table.index_of(region.start).expect("start inside dynamic");
        let last = self.page_table.index_of(region.end - 1).expect("end inside dynamic");
        for idx in first..=last {
            let page_base = self.page_table.page_base(idx);
            let page_end = page_base + self.config.page_bytes as u64;
            let used_end = region.end.min(page_end);
            let pte = self.page_table.get_mut(idx);
            pte.open_region = false;
            // max: соседний регион на той же странице мог закрыться позже
            pte.words_used = pte.words_used.max(((used_end - page_base) / WORD_BYTES) as u32);
        }
        self.open_regions -= 1;
        Ok(())
    }

    /// Записать scan-start для страниц, в которые «переливается» объект,
    /// начавшийся на более ранней странице.
    pub fn note_object_span(&mut self, start: u64, nbytes: u64) {
        let end = start + nbytes;
        let mut idx = self
            .page_table
            .index_of(start)
            .expect("object start inside dynamic")
            + 1;
        loop {
            if idx >= self.page_table.len() {
                break;
            }
            let page_base = self.page_table.page_base(idx);
            if page_base >= end {
                break;
            }
            self.page_table.get_mut(idx).scan_start_offset = page_base - start;
            idx += 1;
        }
    }

    /// Аллоцировать объект целиком: открыть регион точно под размер,
    /// записать заголовок, закрыть.
    pub fn alloc_object(
        &mut self,
        tag: u8,
        payload: u64,
        kind: PageKind,
        gen: u8,
    ) -> Result<u64> {
        let words = total_words_for(tag, payload)
            .ok_or_else(|| anyhow!("tag {:#x} has no size function", tag))?;
        let nbytes = words * WORD_BYTES;
        let mut region = self.open_region(nbytes, kind, gen)?;
        let addr = region.bump(nbytes)?;
        self.dynamic.write_word(addr, make_header(tag, payload));
        self.note_object_span(addr, nbytes);
        self.close_region(region)?;
        Ok(addr)
    }
}
