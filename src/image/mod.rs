//! image — формат crash-образа.
//!
//! Субмодули:
//! - preamble.rs: преамбула образа и пер-тредовая преамбула (codec +
//!   структурная сигнатура);
//! - writer.rs: capture (выгрузка живой кучи и тредов в образ);
//! - reader.rs: restore (регидрация кучи и тредов из образа);
//! - scan.rs: диагностический скан стеков после restore (чистые счётчики).
//!
//! Образ позиционный: кроме размеров в преамбуле он не самоописываемый,
//! поэтому writer и reader обязаны сходиться байт-в-байт — это и ловит
//! структурная сигнатура.

pub mod preamble;
pub mod reader;
pub mod scan;
pub mod writer;

pub use preamble::{CrashPreamble, ThreadPreamble};
pub use reader::{restore, restore_from_path, Restored};
pub use scan::{scan_control_stack, ScanReport, ThreadScan};
pub use writer::{capture, capture_to_path, trigger_capture};

use std::io::{Read, Write};

use crate::errors::CrashImageError;

/// Запись обязана передать весь буфер; короткая запись фатальна.
pub(crate) fn checked_write<W: Write>(
    w: &mut W,
    buf: &[u8],
    what: &'static str,
) -> Result<(), CrashImageError> {
    w.write_all(buf)
        .map_err(|e| CrashImageError::IncompleteTransfer { what, source: e })
}

/// Чтение обязано заполнить весь буфер; короткое чтение фатально.
pub(crate) fn checked_read<R: Read>(
    r: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), CrashImageError> {
    r.read_exact(buf)
        .map_err(|e| CrashImageError::IncompleteTransfer { what, source: e })
}
