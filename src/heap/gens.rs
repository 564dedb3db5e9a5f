//! heap/gens — агрегаты поколений.
//!
//! bytes_allocated по поколениям в образ НЕ сохраняются: после restore они
//! пересчитываются из words_used восстановленной таблицы страниц (а любой
//! персистентный агрегат считается недоверенным). Scratch-псевдопоколение
//! учитывается отдельным слотом.

use crate::consts::{GEN_SLOTS, SCRATCH_GENERATION, WORD_BYTES};
use crate::heap::page::{PageKind, PageTable};

#[derive(Debug, Clone, Copy, Default)]
pub struct GenStats {
    pub id: u8,
    pub bytes_allocated: u64,
}

#[derive(Debug, Clone)]
pub struct GenTable {
    gens: [GenStats; GEN_SLOTS],
}

impl GenTable {
    /// Пересчитать агрегаты из таблицы страниц. Страницы с gen вне
    /// диапазона схлопываются в scratch-слот (gen осмыслен только при
    /// kind != Free, поэтому free-страницы не учитываются).
    pub fn recompute(page_table: &PageTable) -> Self {
        let mut gens = [GenStats::default(); GEN_SLOTS];
        for (i, g) in gens.iter_mut().enumerate() {
            g.id = i as u8;
        }
        for pte in page_table.entries() {
            if pte.kind == PageKind::Free {
                continue;
            }
            let slot = (pte.gen as usize).min(SCRATCH_GENERATION as usize);
            gens[slot].bytes_allocated += pte.words_used as u64 * WORD_BYTES;
        }
        Self { gens }
    }

    pub fn stats(&self) -> &[GenStats] {
        &self.gens
    }

    pub fn total_bytes(&self) -> u64 {
        self.gens.iter().map(|g| g.bytes_allocated).sum()
    }

    /// Однострочная сводка на поколение (для монитора и лога restore).
    pub fn summary_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        for g in &self.gens {
            if g.bytes_allocated == 0 {
                continue;
            }
            let name = if g.id == SCRATCH_GENERATION {
                "scratch".to_string()
            } else {
                format!("gen {}", g.id)
            };
            out.push(format!("{:<8} {:>12} bytes", name, g.bytes_allocated));
        }
        if out.is_empty() {
            out.push("heap is empty".to_string());
        }
        out
    }
}
