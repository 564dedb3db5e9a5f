//! Centralized layout configuration for HeapLens.
//!
//! Goals:
//! - Single place for the memory-layout parameters negotiated once at
//!   process creation (region bases/sizes, page and card geometry, stack
//!   and TLS sizes) instead of scattering them across modules.
//! - Env override path: LayoutConfig::from_env() reads HL_* variables on
//!   top of the built-in defaults.
//!
//! Региональные базы здесь — «виртуальные» адреса модели: они участвуют во
//! всей адресной арифметике и сериализуются в образ как есть. Формат
//! нерелоцируемый, поэтому dump и restore обязаны стартовать с одинаковой
//! конфигурацией (reader дополнительно сверяет параметры из преамбулы).

use anyhow::{anyhow, Result};

use crate::consts::{ALIGN_BYTES, TOUCH_GRANULE_BYTES, WORD_BYTES};

/// Полная конфигурация адресного layout'а рантайма.
#[derive(Clone, Debug)]
pub struct LayoutConfig {
    /// Размер страницы динамического региона (степень двойки).
    /// Env: HL_PAGE_BYTES (default 4096)
    pub page_bytes: u32,

    /// Размер card-гранулы write-barrier'а (степень двойки, <= page_bytes).
    /// Env: HL_CARD_BYTES (default 512)
    pub card_bytes: u32,

    /// Ширина индекса card-таблицы: таблица покрывает 2^nbits карт.
    /// Derived by default; env: HL_CARD_TABLE_NBITS.
    pub card_table_nbits: u32,

    /// Static-регион: фиксированное содержимое, без таблицы страниц.
    pub static_base: u64,
    pub static_size: u64,

    /// Динамический (generational) регион.
    pub dynamic_base: u64,
    /// Env: HL_DYNAMIC_SIZE (default 16 MiB)
    pub dynamic_size: u64,

    /// Вспомогательные регионы адресно-стабильных объектов.
    /// Env: HL_SIDE_REGIONS = 0|1 (default on)
    pub side_regions: bool,
    pub fixedobj_base: u64,
    pub fixedobj_size: u64,
    pub varyobj_base: u64,
    pub varyobj_size: u64,

    /// Размеры тредовых стеков и TLS-блока.
    pub control_stack_bytes: u64,
    pub binding_stack_bytes: u64,
    pub tls_bytes: u32,

    /// База арены, из которой нарезаются стеки свежих тредов.
    pub stack_arena_base: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let dynamic_size: u64 = 16 * 1024 * 1024;
        let card_bytes: u32 = 512;
        Self {
            page_bytes: 4096,
            card_bytes,
            card_table_nbits: card_nbits_for(dynamic_size, card_bytes),

            static_base: 0x0300_0000,
            static_size: 64 * 1024,

            dynamic_base: 0x1000_0000,
            dynamic_size,

            side_regions: true,
            fixedobj_base: 0x0400_0000,
            fixedobj_size: 256 * 1024,
            varyobj_base: 0x0500_0000,
            varyobj_size: 512 * 1024,

            control_stack_bytes: 128 * 1024,
            binding_stack_bytes: 32 * 1024,
            tls_bytes: 4096,

            stack_arena_base: 0x7000_0000,
        }
    }
}

/// Минимальная ширина card-индекса, покрывающая весь динамический регион.
pub fn card_nbits_for(dynamic_size: u64, card_bytes: u32) -> u32 {
    let ncards = (dynamic_size / card_bytes as u64).max(1);
    ncards.next_power_of_two().trailing_zeros()
}

impl LayoutConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HL_PAGE_BYTES") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.page_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("HL_CARD_BYTES") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.card_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("HL_DYNAMIC_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.dynamic_size = n;
            }
        }
        if let Ok(v) = std::env::var("HL_SIDE_REGIONS") {
            let s = v.trim().to_ascii_lowercase();
            cfg.side_regions = s == "1" || s == "true" || s == "on" || s == "yes";
        }
        // Ширина card-индекса по умолчанию следует за размером региона.
        cfg.card_table_nbits = card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
        if let Ok(v) = std::env::var("HL_CARD_TABLE_NBITS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.card_table_nbits = n;
            }
        }
        cfg
    }

    /// Число страниц динамического региона по декларированной ёмкости.
    pub fn dynamic_pages(&self) -> u64 {
        self.dynamic_size / self.page_bytes as u64
    }

    /// Маска card-таблицы (размер таблицы = 1 + mask байт).
    pub fn card_table_mask(&self) -> u64 {
        (1u64 << self.card_table_nbits) - 1
    }

    /// Проверка согласованности параметров. Нарушение — ошибка конфигурации,
    /// а не условие времени выполнения.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_bytes)?;
        if !self.card_bytes.is_power_of_two() || self.card_bytes > self.page_bytes {
            return Err(anyhow!(
                "card_bytes must be a power of two <= page_bytes, got {}",
                self.card_bytes
            ));
        }
        if self.dynamic_size == 0 || self.dynamic_size % self.page_bytes as u64 != 0 {
            return Err(anyhow!(
                "dynamic_size {} must be a non-zero multiple of page_bytes {}",
                self.dynamic_size,
                self.page_bytes
            ));
        }
        if self.card_table_nbits == 0 || self.card_table_nbits > 32 {
            return Err(anyhow!(
                "card_table_nbits {} outside the sane range 1..=32",
                self.card_table_nbits
            ));
        }
        let covered = (1u64 << self.card_table_nbits) * self.card_bytes as u64;
        if covered < self.dynamic_size {
            return Err(anyhow!(
                "card table (2^{} cards of {} B) does not cover dynamic region of {} B",
                self.card_table_nbits,
                self.card_bytes,
                self.dynamic_size
            ));
        }
        for (name, base, size) in [
            ("static", self.static_base, self.static_size),
            ("dynamic", self.dynamic_base, self.dynamic_size),
        ] {
            if base % self.page_bytes as u64 != 0 || size % WORD_BYTES != 0 {
                return Err(anyhow!("{} region base/size misaligned", name));
            }
        }
        if self.side_regions {
            if self.fixedobj_size % self.page_bytes as u64 != 0
                || self.varyobj_size % self.page_bytes as u64 != 0
            {
                return Err(anyhow!("side region sizes must be page multiples"));
            }
            if self.varyobj_size % TOUCH_GRANULE_BYTES != 0 {
                return Err(anyhow!(
                    "varyobj_size must be a multiple of the touch granule ({})",
                    TOUCH_GRANULE_BYTES
                ));
            }
        }
        if self.control_stack_bytes % ALIGN_BYTES != 0
            || self.binding_stack_bytes % ALIGN_BYTES != 0
        {
            return Err(anyhow!("stack sizes must be dualword-aligned"));
        }
        if (self.tls_bytes as usize) < crate::consts::THREAD_HEADER_NBYTES {
            return Err(anyhow!(
                "tls_bytes {} smaller than the thread identity header",
                self.tls_bytes
            ));
        }
        Ok(())
    }
}

/// Проверка корректности размера страницы (2^n, 1 KiB .. 1 MiB).
pub fn validate_page_size(page_bytes: u32) -> Result<()> {
    const MAX: u32 = 1 << 20;
    if page_bytes < 1024 || page_bytes > MAX || !page_bytes.is_power_of_two() {
        return Err(anyhow!(
            "page_bytes must be a power of two in [1024 .. 1048576], got {}",
            page_bytes
        ));
    }
    Ok(())
}
