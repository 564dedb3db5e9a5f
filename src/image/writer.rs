//! image/writer — capture: выгрузка живой кучи и тредов в crash-образ.
//!
//! Предусловия на вызывающем: мир остановлен, все thread-local
//! allocation-регионы закрыты (capture это перепроверяет и отказывает —
//! page table с открытым регионом внутренне несогласован, такой образ
//! бесполезен). Любая короткая запись фатальна: дамп пишется в уже
//! деградировавшем процессе, ретраи и частичные образы не поддерживаются.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use super::preamble::{CrashPreamble, ThreadPreamble};
use super::checked_write;
use crate::consts::{CONTEXT_NBYTES, CRASH_SIGNATURE, CRASH_TRAILER_MAGIC, FEATURE_SIDE_REGIONS, PTE_NBYTES};
use crate::heap::Heap;
use crate::metrics::record_capture;
use crate::thread::{ThreadSet, WorldStopper};

/// Выгрузить кучу и треды в поток. Пишет строго последовательно:
/// преамбула, регионы с таблицами, треды, хвостовая магия.
pub fn capture<W: Write>(heap: &Heap, threads: &ThreadSet, w: &mut W) -> Result<u64> {
    if heap.has_open_regions() {
        return Err(anyhow!(
            "open allocation region present; flush thread regions before capture"
        ));
    }
    for (idx, pte) in heap.page_table().entries().iter().enumerate() {
        if pte.open_region {
            return Err(anyhow!(
                "page {} still flagged open; flush thread regions before capture",
                idx
            ));
        }
    }

    let page_bytes = heap.config.page_bytes;
    let page_count = heap.pages_in_use();
    let side = heap.side();

    let preamble = CrashPreamble {
        signature: CRASH_SIGNATURE,
        page_bytes,
        card_bytes: heap.cards().card_bytes(),
        card_table_nbits: heap.config.card_table_nbits,
        nthreads: threads.len() as u32,
        static_base: heap.static_region().base,
        static_nbytes: heap.static_region().live_bytes(),
        dynamic_base: heap.dynamic().base,
        dynamic_page_count: page_count,
        fixedobj_base: side.map_or(0, |s| s.fixedobj.base),
        fixedobj_size: side.map_or(0, |s| s.fixedobj.capacity),
        fixedobj_free: side.map_or(0, |s| s.fixedobj.high_water()),
        varyobj_base: side.map_or(0, |s| s.varyobj.base),
        varyobj_size: side.map_or(0, |s| s.varyobj.capacity),
        varyobj_free: side.map_or(0, |s| s.varyobj.high_water()),
        tls_nbytes: heap.config.tls_bytes,
        sizeof_context: CONTEXT_NBYTES as u32,
        runtime_info: heap.runtime_info(),
        feature_flags: if side.is_some() { FEATURE_SIDE_REGIONS } else { 0 },
    };

    let mut written: u64 = 0;
    preamble.write_to(w)?;
    written += crate::consts::CRASH_PREAMBLE_NBYTES as u64;

    // static: только живые байты
    let static_live = heap.static_region().live_bytes() as usize;
    checked_write(w, &heap.static_region().bytes()[..static_live], "writing static region")?;
    written += static_live as u64;

    // dynamic: целые занятые страницы + таблица страниц + card-таблица
    debug!("capture: writing dynamic space ({} pages)", page_count);
    let dyn_nbytes = (page_count * page_bytes as u64) as usize;
    checked_write(w, &heap.dynamic().bytes()[..dyn_nbytes], "writing dynamic region")?;
    written += dyn_nbytes as u64;

    let mut pte_buf = vec![0u8; page_count as usize * PTE_NBYTES];
    for (i, pte) in heap.page_table().entries()[..page_count as usize]
        .iter()
        .enumerate()
    {
        pte.encode_into(&mut pte_buf[i * PTE_NBYTES..(i + 1) * PTE_NBYTES]);
    }
    checked_write(w, &pte_buf, "writing page table")?;
    written += pte_buf.len() as u64;

    // card-таблица пишется целиком под декларированную ёмкость
    checked_write(w, heap.cards().bytes(), "writing card table")?;
    written += heap.cards().nbytes() as u64;

    if let Some(s) = side {
        let fixed_live = s.fixedobj.live_bytes() as usize;
        checked_write(w, &s.fixedobj.bytes()[..fixed_live], "writing fixedobj region")?;
        let ft = s.encode_fixedobj_table();
        checked_write(w, &ft, "writing fixedobj page table")?;

        let vary_live = s.varyobj.live_bytes() as usize;
        checked_write(w, &s.varyobj.bytes()[..vary_live], "writing varyobj region")?;
        let vt = s.encode_varyobj_table();
        checked_write(w, &vt, "writing varyobj page table")?;
        let tb = s.encode_touched();
        checked_write(w, &tb, "writing varyobj touched bitmap")?;
        written += (fixed_live + ft.len() + vary_live + vt.len() + tb.len()) as u64;
    }

    // треды: преамбула, [контекст], живые стеки, весь TLS
    for th in threads.iter() {
        let control = th.live_control();
        let binding = th.live_binding();
        let tp = ThreadPreamble {
            orig_id: th.id,
            has_context: th.context.is_some(),
            control_nbytes: control.len() as u64,
            binding_nbytes: binding.len() as u64,
        };
        tp.write_to(w)?;
        written += crate::consts::CRASH_THREAD_PREAMBLE_NBYTES as u64;
        if let Some(ctx) = &th.context {
            checked_write(w, &ctx.encode(), "writing register context")?;
            written += CONTEXT_NBYTES as u64;
        }
        checked_write(w, control, "writing control stack")?;
        checked_write(w, binding, "writing binding stack")?;
        checked_write(w, &th.tls, "writing thread-local block")?;
        written += (control.len() + binding.len() + th.tls.len()) as u64;
    }

    checked_write(w, CRASH_TRAILER_MAGIC, "writing trailer magic")?;
    written += CRASH_TRAILER_MAGIC.len() as u64;

    record_capture(written);
    info!(
        "capture: {} pages, {} thread(s), {} bytes",
        page_count,
        threads.len(),
        written
    );
    Ok(written)
}

/// Выгрузить образ в файл (создаётся/перезаписывается) и fsync'нуть.
pub fn capture_to_path(heap: &Heap, threads: &ThreadSet, path: &Path) -> Result<u64> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open crash image {}", path.display()))?;
    let written = capture(heap, threads, &mut f)?;
    f.sync_all()
        .with_context(|| format!("sync crash image {}", path.display()))?;
    Ok(written)
}

/// Внешняя точка входа «сними дамп сейчас»: остановить мир, проверить
/// flush-предусловие, записать образ, возобновить мир.
pub fn trigger_capture(
    heap: &Heap,
    threads: &ThreadSet,
    world: &dyn WorldStopper,
    path: &Path,
) -> Result<u64> {
    world.pause_all();
    let result = capture_to_path(heap, threads, path);
    world.resume_all();
    let written = result?;
    info!("crash image saved to {}", path.display());
    Ok(written)
}
