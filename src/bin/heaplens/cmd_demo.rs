use anyhow::Result;
use std::path::PathBuf;

use HeapLens::config::LayoutConfig;
use HeapLens::consts::SCRATCH_GENERATION;
use HeapLens::heap::page::PageKind;
use HeapLens::heap::Heap;
use HeapLens::image::trigger_capture;
use HeapLens::object::{tag_ref, TAG_BYTES, TAG_CODE, TAG_RECORD, TAG_VECTOR};
use HeapLens::thread::{SingleThreadedWorld, ThreadSet};

/// Синтетическая куча + capture: артефакт для прогонов info/scan/inspect.
pub fn exec(out: PathBuf, threads: u32, dangling: bool) -> Result<()> {
    let config = LayoutConfig::from_env();
    let mut heap = Heap::new(config.clone())?;
    heap.set_runtime_info(0x4845_4150_4C45_4E53); // "HEAPLENS"

    // Объекты каждого распознаваемого вида, включая объект, переливающийся
    // на соседнюю страницу.
    let rec = heap.alloc_object(TAG_RECORD, 6, PageKind::Boxed, 0)?;
    let vec = heap.alloc_object(TAG_VECTOR, 30, PageKind::Boxed, 0)?;
    let big = heap.alloc_object(TAG_BYTES, 5992, PageKind::Unboxed, 1)?;
    let code = heap.alloc_object(TAG_CODE, 62, PageKind::Code, 2)?;
    let scratch = heap.alloc_object(TAG_RECORD, 2, PageKind::Mixed, SCRATCH_GENERATION)?;

    // ссылка из record в vector + отметка card (write barrier)
    heap.write_word(rec + 8, tag_ref(vec, 0x3))?;
    heap.mark_card(rec + 8);

    // пара слов в static и side-регионах
    let static_base = heap.config.static_base;
    heap.static_region_mut().write_word(static_base, 0x5354_4154_4943_0001);
    heap.static_region_mut()
        .set_free_pointer(static_base + 64)?;
    if let Some(side) = heap.side_mut() {
        let f = side.fixedobj.base;
        side.fixedobj.write_word(f, 0xF1);
        side.fixedobj.set_free_pointer(f + 32)?;
        side.fixedobj_pages[0].obj_size_words = 4;
        side.fixedobj_pages[0].gen = 1;
        let v = side.varyobj.base;
        side.varyobj.write_word(v, 0xF2);
        side.varyobj.set_free_pointer(v + 64)?;
        side.touch(v)?;
    }

    let mut set = ThreadSet::new(&config);
    for i in 0..threads.max(1) {
        let mut th = set.spawn(&config);
        th.push_control_word(tag_ref(rec, 0x3));
        th.push_control_word(tag_ref(big, 0xF));
        th.push_control_word(42 << 1); // fixnum
        th.push_control_word(code + 0x10); // сырой адрес в code-страницу
        th.push_control_word(tag_ref(scratch, 0x3));
        if dangling {
            // ссылка в свободную часть кучи: скан покажет её как повисшую
            th.push_control_word(tag_ref(heap.dynamic().base + heap.config.dynamic_size / 2, 0x7));
        }
        th.push_binding_word(0x1000 + i as u64);
        th.set_tls_word(0, 0xBEEF_0000 + i as u64);
        if i == 0 {
            th.enter_interrupt_context(code + 0x20);
        }
        set.link_back(th);
    }

    let written = trigger_capture(&heap, &set, &SingleThreadedWorld, &out)?;
    println!("demo image: {} bytes, {} thread(s) -> {}", written, set.len(), out.display());
    Ok(())
}
