//! Общие helpers интеграционных тестов.
#![allow(dead_code)]

use std::path::PathBuf;

use HeapLens::config::LayoutConfig;
use HeapLens::heap::page::PageKind;
use HeapLens::heap::Heap;
use HeapLens::object::{tag_ref, TAG_BYTES, TAG_CODE, TAG_RECORD, TAG_VECTOR};
use HeapLens::thread::ThreadSet;

pub fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("heaplens-{}-{}-{}", prefix, pid, t))
}

/// Маленькая конфигурация: 16 страниц динамики, компактные side-регионы
/// и стеки, чтобы образы оставались в десятках килобайт.
pub fn small_config() -> LayoutConfig {
    let mut cfg = LayoutConfig::default();
    cfg.dynamic_size = 16 * 4096;
    cfg.card_table_nbits = HeapLens::config::card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
    cfg.fixedobj_size = 4 * 4096;
    cfg.varyobj_size = 4 * 4096;
    cfg.control_stack_bytes = 16 * 1024;
    cfg.binding_stack_bytes = 4 * 1024;
    cfg.tls_bytes = 512;
    cfg
}

/// Куча с объектами каждого вида + помеченные card'ы + side-данные.
pub fn populated_heap(cfg: &LayoutConfig) -> (Heap, u64, u64) {
    let mut heap = Heap::new(cfg.clone()).unwrap();
    heap.set_runtime_info(0xC0FFEE);

    let rec = heap.alloc_object(TAG_RECORD, 6, PageKind::Boxed, 0).unwrap();
    let vec = heap.alloc_object(TAG_VECTOR, 14, PageKind::Boxed, 0).unwrap();
    let big = heap.alloc_object(TAG_BYTES, 5992, PageKind::Unboxed, 1).unwrap();
    let _code = heap.alloc_object(TAG_CODE, 30, PageKind::Code, 2).unwrap();

    heap.write_word(rec + 8, tag_ref(vec, 0x3)).unwrap();
    heap.mark_card(rec + 8);
    heap.mark_card(big);

    let sb = heap.config.static_base;
    heap.static_region_mut().write_word(sb, 0x1234_5678_9ABC_DEF0);
    heap.static_region_mut().set_free_pointer(sb + 128).unwrap();

    if let Some(side) = heap.side_mut() {
        let f = side.fixedobj.base;
        side.fixedobj.write_word(f, 0xFEED_0001);
        side.fixedobj.set_free_pointer(f + 64).unwrap();
        side.fixedobj_pages[0].obj_size_words = 8;
        side.fixedobj_pages[0].gen = 2;
        let v = side.varyobj.base;
        side.varyobj.write_word(v, 0xFEED_0002);
        side.varyobj.set_free_pointer(v + 96).unwrap();
        side.varyobj_pages[0] = 0;
        side.touch(v + 600).unwrap();
    }

    (heap, rec, big)
}

/// Треды: N штук, у первого — interrupt-контекст; каждый со ссылками
/// на объекты кучи в стеке.
pub fn populated_threads(cfg: &LayoutConfig, heap: &Heap, rec: u64, n: u32) -> ThreadSet {
    let mut set = ThreadSet::new(cfg);
    for i in 0..n {
        let mut th = set.spawn(cfg);
        th.push_control_word(tag_ref(rec, 0x3));
        th.push_control_word((100 + i as u64) << 1);
        th.push_binding_word(0xB00 + i as u64);
        th.set_tls_word(3, 0x7150 + i as u64);
        if i == 0 {
            th.enter_interrupt_context(heap.dynamic().base + 0x40);
        }
        set.link_back(th);
    }
    set
}
