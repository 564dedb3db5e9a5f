use anyhow::Result;
use std::path::PathBuf;

use HeapLens::config::LayoutConfig;
use HeapLens::monitor::restore_and_debug;

/// Восстановить образ и войти в интерактивный монитор.
pub fn exec(image: PathBuf) -> Result<()> {
    let config = LayoutConfig::from_env();
    restore_and_debug(&image, &config)
}
