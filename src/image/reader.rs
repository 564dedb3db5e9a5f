//! image/reader — restore: регидрация кучи и тредов из crash-образа.
//!
//! Порядок строго повторяет writer: преамбула (сигнатура + сверка
//! параметров с работающей конфигурацией), размещение регионов по
//! записанным базам (формат нерелоцируемый — занятый адрес фатален),
//! дословный реплей payload'ов и таблиц, пересчёт агрегатов поколений,
//! реконструкция тредов (новая identity, старое содержимое), advisory
//! скан стеков и проверка хвостовой магии с контролем точного EOF.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;

use super::preamble::{CrashPreamble, ThreadPreamble};
use super::scan::{scan_control_stack, ScanReport};
use super::checked_read;
use crate::config::LayoutConfig;
use crate::consts::{
    CONTEXT_NBYTES, CONTROL_STACK_GROWS_DOWN, CRASH_TRAILER_MAGIC, PTE_NBYTES,
    THREAD_HEADER_NBYTES, WORD_BYTES,
};
use crate::errors::CrashImageError;
use crate::heap::card::CardTable;
use crate::heap::page::{PageTable, PageTableEntry};
use crate::heap::region::{AddressSpace, Region, RegionKind};
use crate::heap::side::SideRegions;
use crate::heap::Heap;
use crate::metrics::{record_restore, record_stack_scan};
use crate::thread::{RegisterContext, ThreadSet};

/// Результат успешного restore.
#[derive(Debug)]
pub struct Restored {
    pub heap: Heap,
    pub threads: ThreadSet,
    pub scan: ScanReport,
}

fn mismatch(detail: String) -> anyhow::Error {
    CrashImageError::FormatMismatch { detail }.into()
}

/// Сверить параметры образа с работающей конфигурацией.
fn check_parameters(p: &CrashPreamble, cfg: &LayoutConfig) -> Result<()> {
    if p.page_bytes != cfg.page_bytes {
        return Err(mismatch(format!(
            "page size differs (image {}, runtime {})",
            p.page_bytes, cfg.page_bytes
        )));
    }
    if p.card_bytes != cfg.card_bytes {
        return Err(mismatch(format!(
            "card size differs (image {}, runtime {})",
            p.card_bytes, cfg.card_bytes
        )));
    }
    if p.sizeof_context != CONTEXT_NBYTES as u32 {
        return Err(mismatch(format!(
            "register context size differs (image {}, runtime {})",
            p.sizeof_context, CONTEXT_NBYTES
        )));
    }
    if p.tls_nbytes != cfg.tls_bytes {
        return Err(mismatch(format!(
            "thread-local block size differs (image {}, runtime {})",
            p.tls_nbytes, cfg.tls_bytes
        )));
    }
    if p.has_side_regions() != cfg.side_regions {
        return Err(mismatch(format!(
            "side regions {} in image but {} in runtime",
            if p.has_side_regions() { "present" } else { "absent" },
            if cfg.side_regions { "enabled" } else { "disabled" }
        )));
    }
    if p.has_side_regions() {
        if p.fixedobj_size != cfg.fixedobj_size {
            return Err(mismatch(format!(
                "fixedobj size differs (image {}, runtime {})",
                p.fixedobj_size, cfg.fixedobj_size
            )));
        }
        if p.varyobj_size != cfg.varyobj_size {
            return Err(mismatch(format!(
                "varyobj size differs (image {}, runtime {})",
                p.varyobj_size, cfg.varyobj_size
            )));
        }
    }
    if p.static_nbytes > cfg.static_size {
        return Err(mismatch(format!(
            "static payload {} exceeds configured region of {}",
            p.static_nbytes, cfg.static_size
        )));
    }
    if p.dynamic_page_count * p.page_bytes as u64 > cfg.dynamic_size {
        return Err(mismatch(format!(
            "{} dynamic pages exceed configured capacity of {} bytes",
            p.dynamic_page_count, cfg.dynamic_size
        )));
    }
    Ok(())
}

/// Восстановить кучу и треды из потока.
pub fn restore<R: Read>(r: &mut R, config: &LayoutConfig) -> Result<Restored> {
    // 1. Преамбула: сигнатура проверяется при чтении, параметры — здесь.
    let p = CrashPreamble::read_from(r)?;
    check_parameters(&p, config)?;
    debug!(
        "restore: static={:#x}+{} dynamic={:#x} pages={} threads={}",
        p.static_base, p.static_nbytes, p.dynamic_base, p.dynamic_page_count, p.nthreads
    );

    // Конфигурация восстановленного процесса наследует ширину card-индекса
    // из образа (как и базы регионов — это данные, а не константы).
    let mut cfg = config.clone();
    cfg.card_table_nbits = p.card_table_nbits;
    cfg.static_base = p.static_base;
    cfg.dynamic_base = p.dynamic_base;
    if p.has_side_regions() {
        cfg.fixedobj_base = p.fixedobj_base;
        cfg.varyobj_base = p.varyobj_base;
    }
    // 2. Размещение регионов по записанным базам — до какого-либо реплея.
    let mut space = AddressSpace::new();
    space.map(RegionKind::Static, p.static_base, cfg.static_size)?;
    space.map(RegionKind::Dynamic, p.dynamic_base, cfg.dynamic_size)?;
    if p.has_side_regions() {
        space.map(RegionKind::FixedObj, p.fixedobj_base, p.fixedobj_size)?;
        space.map(RegionKind::VaryObj, p.varyobj_base, p.varyobj_size)?;
    }
    cfg.validate()?;

    let mut nread: u64 = crate::consts::CRASH_PREAMBLE_NBYTES as u64;

    // 3. Static-регион: дословный реплей живых байт.
    let mut static_region = Region::new(RegionKind::Static, p.static_base, cfg.static_size)?;
    let live = p.static_nbytes as usize;
    checked_read(r, &mut static_region.bytes_mut()[..live], "reading static region")?;
    static_region.set_free_pointer(p.static_base + p.static_nbytes)?;
    nread += live as u64;

    // Dynamic-регион: страницы, таблица страниц, card-таблица.
    let mut dynamic = Region::new(RegionKind::Dynamic, p.dynamic_base, cfg.dynamic_size)?;
    let dyn_nbytes = (p.dynamic_page_count * p.page_bytes as u64) as usize;
    checked_read(r, &mut dynamic.bytes_mut()[..dyn_nbytes], "reading dynamic region")?;
    dynamic.set_free_pointer(p.dynamic_base + dyn_nbytes as u64)?;
    nread += dyn_nbytes as u64;
    info!(
        "restore: {} pages in use ({} bytes)",
        p.dynamic_page_count, dyn_nbytes
    );

    let mut page_table = PageTable::new(p.dynamic_base, p.page_bytes, cfg.dynamic_pages());
    let mut pte_buf = vec![0u8; p.dynamic_page_count as usize * PTE_NBYTES];
    checked_read(r, &mut pte_buf, "reading page table")?;
    for i in 0..p.dynamic_page_count as usize {
        let pte = PageTableEntry::decode(&pte_buf[i * PTE_NBYTES..(i + 1) * PTE_NBYTES])
            .with_context(|| format!("page table entry {}", i))?;
        // scan-start не может указывать раньше базы региона, а words_used —
        // за пределы страницы
        if pte.scan_start_offset > i as u64 * p.page_bytes as u64 {
            return Err(anyhow!(
                "page table entry {}: scan start offset {} reaches before the region base",
                i,
                pte.scan_start_offset
            ));
        }
        if pte.words_used > page_table.words_per_page() {
            return Err(anyhow!(
                "page table entry {}: words_used {} exceeds the page",
                i,
                pte.words_used
            ));
        }
        *page_table.get_mut(i) = pte;
    }
    nread += pte_buf.len() as u64;

    let mut cards = CardTable::new(p.card_table_nbits, p.card_bytes);
    checked_read(r, cards.bytes_mut(), "reading card table")?;
    nread += cards.nbytes() as u64;

    // 4. Вспомогательные регионы, если присутствуют в образе.
    let side = if p.has_side_regions() {
        let mut s = SideRegions::new(&cfg)?;
        if p.fixedobj_free < p.fixedobj_base || p.fixedobj_free > p.fixedobj_base + p.fixedobj_size
        {
            return Err(mismatch(format!(
                "fixedobj free pointer {:#x} outside its region",
                p.fixedobj_free
            )));
        }
        if p.varyobj_free < p.varyobj_base || p.varyobj_free > p.varyobj_base + p.varyobj_size {
            return Err(mismatch(format!(
                "varyobj free pointer {:#x} outside its region",
                p.varyobj_free
            )));
        }
        let fixed_live = (p.fixedobj_free - p.fixedobj_base) as usize;
        checked_read(r, &mut s.fixedobj.bytes_mut()[..fixed_live], "reading fixedobj region")?;
        s.fixedobj.set_free_pointer(p.fixedobj_free)?;
        let mut ft = vec![0u8; s.fixedobj_table_nbytes()];
        checked_read(r, &mut ft, "reading fixedobj page table")?;
        s.decode_fixedobj_table(&ft)?;

        let vary_live = (p.varyobj_free - p.varyobj_base) as usize;
        checked_read(r, &mut s.varyobj.bytes_mut()[..vary_live], "reading varyobj region")?;
        s.varyobj.set_free_pointer(p.varyobj_free)?;
        let mut vt = vec![0u8; s.varyobj_table_nbytes()];
        checked_read(r, &mut vt, "reading varyobj page table")?;
        s.decode_varyobj_table(&vt)?;
        let mut tb = vec![0u8; s.touched_nbytes()];
        checked_read(r, &mut tb, "reading varyobj touched bitmap")?;
        s.decode_touched(&tb)?;

        nread += (fixed_live + ft.len() + vary_live + vt.len() + tb.len()) as u64;
        Some(s)
    } else {
        None
    };

    let heap = Heap::from_parts(
        cfg.clone(),
        static_region,
        dynamic,
        page_table,
        cards,
        side,
        p.runtime_info,
    )?;

    // Агрегаты поколений пересчитываются из восстановленной таблицы —
    // персистентному агрегату веры нет.
    let gens = heap.generations();
    for line in gens.summary_lines() {
        info!("restore: {}", line);
    }

    // 5-6. Треды: свежая identity + реплей содержимого + advisory скан.
    let mut threads = ThreadSet::new(&cfg);
    let mut scan_report = ScanReport::default();
    info!("restore: {} thread(s)", p.nthreads);
    for i in 0..p.nthreads {
        let tp = ThreadPreamble::read_from(r)?;
        nread += crate::consts::CRASH_THREAD_PREAMBLE_NBYTES as u64;
        if tp.control_nbytes > cfg.control_stack_bytes
            || tp.control_nbytes % WORD_BYTES != 0
        {
            return Err(mismatch(format!(
                "thread {} control stack of {} bytes does not fit the runtime stack",
                i, tp.control_nbytes
            )));
        }
        if tp.binding_nbytes > cfg.binding_stack_bytes
            || tp.binding_nbytes % WORD_BYTES != 0
        {
            return Err(mismatch(format!(
                "thread {} binding stack of {} bytes does not fit the runtime stack",
                i, tp.binding_nbytes
            )));
        }

        let mut th = threads.spawn(&cfg);

        // Контекст: реплей + патч sp на вершину свежеразмещённых байт.
        let new_sp = if CONTROL_STACK_GROWS_DOWN {
            th.control_end() - tp.control_nbytes
        } else {
            th.control_base + tp.control_nbytes
        };
        if tp.has_context {
            let mut raw = vec![0u8; CONTEXT_NBYTES];
            checked_read(r, &mut raw, "reading register context")?;
            nread += CONTEXT_NBYTES as u64;
            let mut ctx = RegisterContext::decode(&raw)?;
            ctx.set_sp(new_sp);
            th.context = Some(ctx);
        }
        th.sp = new_sp;

        // Control-стек: живые байты ложатся между sp и логическим концом.
        let n = tp.control_nbytes as usize;
        let control_slice = if CONTROL_STACK_GROWS_DOWN {
            let len = th.control.len();
            &mut th.control[len - n..]
        } else {
            &mut th.control[..n]
        };
        checked_read(r, control_slice, "reading control stack")?;

        let bn = tp.binding_nbytes as usize;
        checked_read(r, &mut th.binding[..bn], "reading binding stack")?;
        th.binding_sp = th.binding_base + tp.binding_nbytes;

        // TLS: identity-заголовок свежего треда сохраняется, остальное —
        // из образа.
        let mut tls = vec![0u8; p.tls_nbytes as usize];
        checked_read(r, &mut tls, "reading thread-local block")?;
        th.tls[THREAD_HEADER_NBYTES..].copy_from_slice(&tls[THREAD_HEADER_NBYTES..]);
        nread += (n + bn + tls.len()) as u64;

        info!(
            "thread @ {} originally {:#x}, {} control words, {} binding words{}",
            th.id,
            tp.orig_id,
            tp.control_nbytes / WORD_BYTES,
            tp.binding_nbytes / WORD_BYTES,
            if tp.has_context { " (interrupt context)" } else { "" }
        );

        let scan = scan_control_stack(&heap, th.live_control(), th.id, tp.orig_id);
        for s in &scan.samples {
            warn!("  ! sp[{:5}] = {:#x} (not found)", s.index, s.word);
        }
        if scan.dangling > 0 {
            info!("  {} valid pointers ({} dangling)", scan.valid, scan.dangling);
        } else {
            info!("  {} valid pointers", scan.valid);
        }
        record_stack_scan(scan.words_scanned as u64, scan.dangling as u64);
        scan_report.threads.push(scan);

        threads.link_front(th);
    }

    // 7. Хвостовая магия + точный EOF.
    let mut magic = [0u8; 8];
    checked_read(r, &mut magic, "reading trailer magic")?;
    nread += 8;
    if &magic != CRASH_TRAILER_MAGIC {
        return Err(CrashImageError::CorruptTrailer {
            detail: format!("bad trailer magic {:02x?}", magic),
        }
        .into());
    }
    let mut probe = [0u8; 1];
    match r.read(&mut probe) {
        Ok(0) => {}
        Ok(_) => {
            return Err(CrashImageError::CorruptTrailer {
                detail: "unconsumed bytes after trailer magic".to_string(),
            }
            .into())
        }
        Err(e) => {
            return Err(CrashImageError::IncompleteTransfer {
                what: "probing for end of image",
                source: e,
            }
            .into())
        }
    }

    record_restore(nread, p.nthreads as u64);
    info!("restore: complete ({} bytes)", nread);
    Ok(Restored { heap, threads, scan: scan_report })
}

/// Восстановить образ из файла.
pub fn restore_from_path(path: &Path, config: &LayoutConfig) -> Result<Restored> {
    let mut f = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open crash image {}", path.display()))?;
    restore(&mut f, config)
}
