//! Общие константы: слова/теги, виды страниц, формат crash-образа.

// -------- Machine words --------

/// Размер машинного слова (64-bit runtime).
pub const WORD_BYTES: u64 = 8;
pub const WORD_SHIFT: u32 = 3;

/// Выравнивание объектов: dualword (2 слова).
pub const ALIGN_WORDS: u64 = 2;
pub const ALIGN_BYTES: u64 = ALIGN_WORDS * WORD_BYTES;

// -------- Lowtags --------
// 4-битовое пространство lowtag'ов:
// - fixnum:            (word & 1) == 0
// - other immediate:   (word & 3) == 1
// - object reference:  (word & 3) == 3 (lowtags 0x3/0x7/0xB/0xF)
pub const LOWTAG_MASK: u64 = 0xF;

// -------- Page kinds (динамический регион) --------
pub const PAGE_KIND_FREE: u8 = 0;
pub const PAGE_KIND_BOXED: u8 = 1;
pub const PAGE_KIND_UNBOXED: u8 = 2;
pub const PAGE_KIND_CODE: u8 = 3;
pub const PAGE_KIND_MIXED: u8 = 4;

// -------- Generations --------

/// Число обычных поколений (0..=5).
pub const NUM_GENERATIONS: usize = 6;
/// Scratch-псевдопоколение, используемое транзиентно при сборке.
pub const SCRATCH_GENERATION: u8 = 6;
/// Всего слотов статистики (обычные + scratch).
pub const GEN_SLOTS: usize = NUM_GENERATIONS + 1;

// -------- Page table entry (serialized, LE) --------
// Layout (16 B):
// [gen u8][kind u8][flags u8][reserved u8][words_used u32][scan_start_offset u64]
pub const PTE_NBYTES: usize = 16;
pub const PTE_FLAG_OPEN_REGION: u8 = 0x1;

// -------- Side regions --------

/// Запись таблицы страниц fixedobj-региона (4 B):
/// [obj_size_words u16][gen u8][flags u8]
pub const FIXEDOBJ_PTE_NBYTES: usize = 4;
/// Запись таблицы страниц varyobj-региона: u32 scan-start (байты назад).
pub const VARYOBJ_PTE_NBYTES: usize = 4;
/// Гранула touched-битмапа varyobj-региона (мельче страницы).
pub const TOUCH_GRANULE_BYTES: u64 = 512;

// -------- Threads --------

/// Число сохраняемых регистров общего назначения.
pub const NREGS: usize = 16;
/// Индекс регистра stack pointer (rsp) в снапшоте контекста.
pub const REG_SP: usize = 4;
/// Размер снапшота контекста: 16 GPR + pc.
pub const CONTEXT_NBYTES: usize = (NREGS + 1) * 8;

/// Фиксированный префикс TLS-блока с identity-полями нового треда
/// ([id u64][control_base u64][binding_base u64][reserved..]).
/// При restore этот префикс НЕ перезаписывается из образа.
pub const THREAD_HEADER_NBYTES: usize = 64;

/// Направление роста control-стека — константа сборки под целевую
/// архитектуру (x86-64/aarch64: вниз). Binding-стек всегда растёт вверх.
pub const CONTROL_STACK_GROWS_DOWN: bool = true;

// -------- Crash image --------

/// Размер преамбулы образа (фиксированный).
pub const CRASH_PREAMBLE_NBYTES: usize = 128;
/// Размер пер-тредовой преамбулы.
pub const CRASH_THREAD_PREAMBLE_NBYTES: usize = 32;

/// Структурная сигнатура формата: меняется при любом изменении layout'а
/// преамбул, что ловит расхождение сборок writer/reader.
pub const CRASH_SIGNATURE: u64 =
    ((CRASH_PREAMBLE_NBYTES as u64) << 16) | (CRASH_THREAD_PREAMBLE_NBYTES as u64);

/// Хвостовая магия образа.
pub const CRASH_TRAILER_MAGIC: &[u8; 8] = b"HL.Crash";

// Feature-флаги преамбулы:
pub const FEATURE_SIDE_REGIONS: u8 = 0x1;
