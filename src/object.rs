//! object — модель слова и заголовка объекта.
//!
//! Кодирование слов (64-bit, 4-битовое lowtag-пространство):
//! - fixnum:           (word & 1) == 0 — сдвинутое малое целое;
//! - other immediate:  (word & 3) == 1 — символы/маркеры и заголовки;
//! - object reference: (word & 3) == 3 — lowtags 0x3/0x7/0xB/0xF.
//!
//! Каждый объект кучи начинается со слова-заголовка:
//! [payload: биты 8..][tag: младший байт], (tag & 3) == 1.
//! Размер объекта — фиксированная функция от тега, взятая из таблицы
//! SIZETAB; неизвестный тег означает «прекратить разбор», никогда не
//! интерпретируется как заголовок.

use crate::consts::{ALIGN_WORDS, LOWTAG_MASK, WORD_BYTES};

// ---------- Теги заголовков ----------

/// Record: boxed-слоты, payload = число слов.
pub const TAG_RECORD: u8 = 0x05;
/// Vector: boxed-элементы, payload = число слов.
pub const TAG_VECTOR: u8 = 0x09;
/// Bytes: сырые байты, payload = длина в БАЙТАХ.
pub const TAG_BYTES: u8 = 0x0D;
/// Code: объект кода, payload = число слов (boxed-часть + текст).
pub const TAG_CODE: u8 = 0x11;
/// Bignum: unboxed-слова, payload = число слов.
pub const TAG_BIGNUM: u8 = 0x15;
/// Filler: мёртвый padding; интерьер не является объектом.
pub const TAG_FILLER: u8 = 0x3D;

const N_TAG_SLOTS: usize = 64;

// ---------- Предикаты слов ----------

#[inline]
pub fn is_fixnum(word: u64) -> bool {
    word & 1 == 0
}

/// Слово несёт lowtag ссылки на объект.
#[inline]
pub fn is_object_ref(word: u64) -> bool {
    word & 3 == 3
}

/// Снять lowtag ссылки: адрес начала объекта.
#[inline]
pub fn untag(word: u64) -> u64 {
    word & !LOWTAG_MASK
}

/// Навесить lowtag (для конструирования ссылок в тестах/демо).
#[inline]
pub fn tag_ref(addr: u64, lowtag: u64) -> u64 {
    debug_assert_eq!(addr & LOWTAG_MASK, 0);
    debug_assert_eq!(lowtag & 3, 3);
    addr | lowtag
}

// ---------- Заголовки ----------

/// Собрать слово-заголовок из тега и payload.
#[inline]
pub fn make_header(tag: u8, payload: u64) -> u64 {
    debug_assert_eq!(tag & 3, 1);
    (payload << 8) | tag as u64
}

#[inline]
pub fn header_tag(header: u64) -> u8 {
    (header & 0xFF) as u8
}

#[inline]
pub fn header_payload(header: u64) -> u64 {
    header >> 8
}

type SizeFn = fn(u64) -> u64;

fn size_boxed(payload: u64) -> u64 {
    align_obj(1 + payload)
}

fn size_bytes(payload_bytes: u64) -> u64 {
    align_obj(1 + payload_bytes.div_ceil(WORD_BYTES))
}

#[inline]
fn align_obj(words: u64) -> u64 {
    words.next_multiple_of(ALIGN_WORDS)
}

/// Фиксированная таблица size-функций, индекс = tag >> 2.
static SIZETAB: [Option<SizeFn>; N_TAG_SLOTS] = build_sizetab();

const fn build_sizetab() -> [Option<SizeFn>; N_TAG_SLOTS] {
    let mut t: [Option<SizeFn>; N_TAG_SLOTS] = [None; N_TAG_SLOTS];
    t[(TAG_RECORD >> 2) as usize] = Some(size_boxed as SizeFn);
    t[(TAG_VECTOR >> 2) as usize] = Some(size_boxed as SizeFn);
    t[(TAG_BYTES >> 2) as usize] = Some(size_bytes as SizeFn);
    t[(TAG_CODE >> 2) as usize] = Some(size_boxed as SizeFn);
    t[(TAG_BIGNUM >> 2) as usize] = Some(size_boxed as SizeFn);
    t[(TAG_FILLER >> 2) as usize] = Some(size_boxed as SizeFn);
    t
}

/// Человекочитаемые имена тегов (монитор).
pub fn tag_name(tag: u8) -> Option<&'static str> {
    match tag {
        TAG_RECORD => Some("record"),
        TAG_VECTOR => Some("vector"),
        TAG_BYTES => Some("bytes"),
        TAG_CODE => Some("code"),
        TAG_BIGNUM => Some("bignum"),
        TAG_FILLER => Some("filler"),
        _ => None,
    }
}

/// Слово валидно как заголовок объекта?
pub fn is_valid_header(word: u64) -> bool {
    word & 3 == 1 && SIZETAB[((word & 0xFF) >> 2) as usize].is_some()
}

/// Полный размер объекта в словах по слову-заголовку.
/// None для слова, не являющегося распознаваемым заголовком.
pub fn object_total_words(header: u64) -> Option<u64> {
    if header & 3 != 1 {
        return None;
    }
    let f = SIZETAB[((header & 0xFF) >> 2) as usize]?;
    Some(f(header_payload(header)))
}

/// Размер будущего объекта по тегу и payload (для аллокатора).
pub fn total_words_for(tag: u8, payload: u64) -> Option<u64> {
    object_total_words(make_header(tag, payload))
}
