//! classify — классификация машинных слов как ссылок на объекты кучи.
//!
//! Два вопроса, на которые отвечает модуль:
//! - looks_like_pointer: может ли слово со стека/из слота быть живой
//!   ссылкой (конверт динамического региона + lowtag, либо попадание на
//!   code-страницу — сырые адреса возврата тоже правдоподобны);
//! - containing_object: точное начало объекта, содержащего адрес.
//!
//! containing_object никогда не разбирает дальше words_used страницы и
//! прекращает разбор на нераспознанном заголовке: мусорное слово — это
//! «stop decoding», а не повод интерпретировать его как заголовок.

use crate::consts::WORD_BYTES;
use crate::heap::page::PageKind;
use crate::heap::Heap;
use crate::object::{is_object_ref, object_total_words, untag, TAG_FILLER};

/// Слово правдоподобно как ссылка в динамическую кучу.
pub fn looks_like_pointer(heap: &Heap, word: u64) -> bool {
    let dynamic = heap.dynamic();
    if !dynamic.contains(word) {
        return false;
    }
    if is_object_ref(word) {
        return true;
    }
    // Неtagged-слово засчитываем только если оно указывает в code-страницу.
    match heap.page_table().index_of(word) {
        Some(idx) => heap.page_table().get(idx).kind == PageKind::Code,
        None => false,
    }
}

/// Найти начало объекта, содержащего word (tagged-ссылка или сырой адрес).
///
/// None: адрес вне динамического конверта, на free-странице, за
/// words_used, внутри filler-padding'а или недостижим корректным разбором
/// заголовков от scan-start.
pub fn containing_object(heap: &Heap, word: u64) -> Option<u64> {
    let addr = if is_object_ref(word) { untag(word) } else { word };
    let pt = heap.page_table();
    let idx = pt.index_of(addr)?;
    let pte = pt.get(idx);
    if pte.kind == PageKind::Free {
        return None;
    }
    let page_base = pt.page_base(idx);
    // Конец живых данных на ЭТОЙ странице ограничивает и разбор, и ответ.
    let limit = page_base + pte.words_used as u64 * WORD_BYTES;
    if addr >= limit {
        return None;
    }
    // Повреждённый scan-start, уводящий до базы региона, — «не нашли»,
    // а не повод читать чужую память.
    let mut where_ = page_base
        .checked_sub(pte.scan_start_offset)
        .filter(|w| *w >= heap.dynamic().base)?;
    while where_ < limit {
        let header = heap.dynamic().read_word(where_);
        let words = match object_total_words(header) {
            Some(w) if w > 0 => w,
            // Нераспознанный заголовок: прекращаем разбор.
            _ => return None,
        };
        let obj_end = where_ + words * WORD_BYTES;
        if addr < obj_end {
            // Попадание в filler — интерьер мёртвого padding'а, не объект.
            if header & 0xFF == TAG_FILLER as u64 {
                return None;
            }
            return Some(where_);
        }
        where_ = obj_end;
    }
    None
}
