use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;

use HeapLens::image::CrashPreamble;

/// Распечатать преамбулу образа без полного restore.
pub fn exec(image: PathBuf, json: bool) -> Result<()> {
    let mut f = OpenOptions::new()
        .read(true)
        .open(&image)
        .with_context(|| format!("open crash image {}", image.display()))?;
    let p = CrashPreamble::read_from(&mut f)?;

    if json {
        let obj = serde_json::json!({
            "signature": p.signature,
            "page_bytes": p.page_bytes,
            "card_bytes": p.card_bytes,
            "card_table_nbits": p.card_table_nbits,
            "nthreads": p.nthreads,
            "static_base": p.static_base,
            "static_nbytes": p.static_nbytes,
            "dynamic_base": p.dynamic_base,
            "dynamic_page_count": p.dynamic_page_count,
            "side_regions": p.has_side_regions(),
            "fixedobj_base": p.fixedobj_base,
            "fixedobj_size": p.fixedobj_size,
            "varyobj_base": p.varyobj_base,
            "varyobj_size": p.varyobj_size,
            "tls_nbytes": p.tls_nbytes,
            "sizeof_context": p.sizeof_context,
            "runtime_info": p.runtime_info,
        });
        println!("{}", serde_json::to_string_pretty(&obj)?);
        return Ok(());
    }

    println!("crash image {}", image.display());
    println!("  signature       = {:#x}", p.signature);
    println!("  page_bytes      = {}", p.page_bytes);
    println!("  card_bytes      = {}", p.card_bytes);
    println!("  card_nbits      = {}", p.card_table_nbits);
    println!("  static          = {:#x} (+{} bytes)", p.static_base, p.static_nbytes);
    println!("  dynamic         = {:#x} ({} pages)", p.dynamic_base, p.dynamic_page_count);
    if p.has_side_regions() {
        println!("  fixedobj        = {:#x} (+{} bytes)", p.fixedobj_base, p.fixedobj_free - p.fixedobj_base);
        println!("  varyobj         = {:#x} (+{} bytes)", p.varyobj_base, p.varyobj_free - p.varyobj_base);
    } else {
        println!("  side regions    = absent");
    }
    println!("  threads         = {}", p.nthreads);
    println!("  tls_nbytes      = {}", p.tls_nbytes);
    println!("  sizeof_context  = {}", p.sizeof_context);
    println!("  runtime_info    = {:#x}", p.runtime_info);
    Ok(())
}
