//! Типизированная таксономия фатальных ошибок crash-образа.
//!
//! Все варианты фатальны для операции: capture/restore атомарны с точки
//! зрения вызывающего кода, частично записанный или частично прочитанный
//! образ не поддерживается. DanglingReference в таксономию не входит —
//! это не ошибка, а диагностические счётчики (см. image::scan).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrashImageError {
    /// Структурная сигнатура или параметры конфигурации не совпали:
    /// образ произведён несовместимой сборкой.
    #[error("crash image format mismatch: {detail}")]
    FormatMismatch { detail: String },

    /// Запись/чтение не передало ожидаемое число байт. Никогда не
    /// ретраится: дамп пишется в уже деградировавшем процессе.
    #[error("incomplete transfer while {what}")]
    IncompleteTransfer {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Регион не удалось разместить по записанному фиксированному адресу.
    /// Формат нерелоцируемый: встроенные указатели не переписываются.
    #[error("cannot place region at {base:#x} (+{size:#x} bytes): {detail}")]
    PlacementConflict { base: u64, size: u64, detail: String },

    /// Хвостовая магия отсутствует/не совпала, либо после неё остались
    /// непотреблённые байты (обрезанный или удлинённый образ).
    #[error("corrupt image trailer: {detail}")]
    CorruptTrailer { detail: String },
}
