use anyhow::Result;
use std::path::PathBuf;

use HeapLens::config::LayoutConfig;
use HeapLens::image::restore_from_path;

/// Восстановить образ и показать отчёт скана стеков.
pub fn exec(image: PathBuf, json: bool) -> Result<()> {
    let config = LayoutConfig::from_env();
    let restored = restore_from_path(&image, &config)?;
    let report = &restored.scan;

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for t in &report.threads {
        print!(
            "thread {} (originally {:#x}): {} words, {} valid",
            t.thread_id, t.orig_id, t.words_scanned, t.valid
        );
        if t.dangling > 0 {
            print!(" ({} dangling)", t.dangling);
        }
        println!();
        for s in &t.samples {
            println!("  ! sp[{:5}] = {:#x} (not found)", s.index, s.word);
        }
    }
    println!(
        "total: {} valid, {} dangling",
        report.total_valid(),
        report.total_dangling()
    );
    Ok(())
}
