#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod util;

// Модель кучи и объектов
pub mod object;
pub mod heap;   // src/heap/{mod,region,page,card,gens,side}.rs

// Классификатор указателей
pub mod classify;

// Формат crash-образа
pub mod image;  // src/image/{mod,preamble,writer,reader,scan}.rs

// Треды и stop-the-world шов
pub mod thread;

// Интерактивный монитор
pub mod monitor;

// Удобные реэкспорты
pub use config::LayoutConfig;
pub use errors::CrashImageError;
pub use heap::Heap;
pub use image::{
    capture, capture_to_path, restore, restore_from_path, trigger_capture, CrashPreamble,
    Restored, ScanReport,
};
pub use monitor::{restore_and_debug, Monitor};
pub use thread::{SingleThreadedWorld, ThreadRecord, ThreadSet, WorldStopper};
