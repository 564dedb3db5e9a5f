//! image/scan — диагностический скан стеков после restore.
//!
//! Чистая функция над срезом live control-стека: считает слова, похожие
//! на ссылки, и делит их на разрешимые (valid) и повисшие (dangling —
//! классификатор не нашёл объект). Повисшая ссылка НЕ ошибка: скан —
//! advisory-телеметрия для оператора, печать строго отделена от счёта.

use serde::Serialize;

use crate::classify::{containing_object, looks_like_pointer};
use crate::heap::Heap;

/// Сколько повисших слов показывать пословно (остальные только считаем).
pub const MAX_DANGLING_SAMPLES: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct DanglingWord {
    /// Индекс слова от вершины живого среза.
    pub index: usize,
    pub word: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadScan {
    pub thread_id: u64,
    pub orig_id: u64,
    pub words_scanned: usize,
    pub valid: usize,
    pub dangling: usize,
    pub samples: Vec<DanglingWord>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub threads: Vec<ThreadScan>,
}

impl ScanReport {
    pub fn total_valid(&self) -> usize {
        self.threads.iter().map(|t| t.valid).sum()
    }

    pub fn total_dangling(&self) -> usize {
        self.threads.iter().map(|t| t.dangling).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_dangling() == 0
    }
}

/// Просканировать живой срез control-стека одного треда.
pub fn scan_control_stack(heap: &Heap, live: &[u8], thread_id: u64, orig_id: u64) -> ThreadScan {
    let mut scan = ThreadScan {
        thread_id,
        orig_id,
        words_scanned: 0,
        valid: 0,
        dangling: 0,
        samples: Vec::new(),
    };
    for (index, chunk) in live.chunks_exact(8).enumerate() {
        scan.words_scanned += 1;
        let word = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        if !looks_like_pointer(heap, word) {
            continue;
        }
        if containing_object(heap, word).is_some() {
            scan.valid += 1;
        } else {
            scan.dangling += 1;
            if scan.samples.len() < MAX_DANGLING_SAMPLES {
                scan.samples.push(DanglingWord { index, word });
            }
        }
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::heap::page::PageKind;
    use crate::object::{tag_ref, TAG_RECORD};

    #[test]
    fn scan_counts_valid_and_dangling() {
        let mut cfg = LayoutConfig::default();
        cfg.dynamic_size = 16 * 4096;
        cfg.card_table_nbits = crate::config::card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
        cfg.fixedobj_size = 4 * 4096;
        cfg.varyobj_size = 4 * 4096;
        let mut heap = crate::heap::Heap::new(cfg).unwrap();
        let obj = heap.alloc_object(TAG_RECORD, 3, PageKind::Boxed, 0).unwrap();

        let mut stack = Vec::new();
        stack.extend_from_slice(&tag_ref(obj, 0x3).to_le_bytes()); // valid
        stack.extend_from_slice(&(42u64 << 1).to_le_bytes()); // fixnum, не указатель
        // tagged-ссылка в свободную часть кучи — повисшая
        let dead = heap.config.dynamic_base + 8 * 4096 + 0x10;
        stack.extend_from_slice(&tag_ref(dead, 0x7).to_le_bytes());

        let scan = scan_control_stack(&heap, &stack, 7, 0x55);
        assert_eq!(scan.words_scanned, 3);
        assert_eq!(scan.valid, 1);
        assert_eq!(scan.dangling, 1);
        assert_eq!(scan.samples.len(), 1);
        assert_eq!(scan.samples[0].index, 2);

        let report = ScanReport { threads: vec![scan] };
        assert!(!report.is_clean());
        assert_eq!(report.total_valid(), 1);
    }
}
