//! Рандомизированный round-trip: случайное наполнение кучи и стеков,
//! capture/restore, сверка байтов и счётчиков скана.

mod common;

use anyhow::Result;
use oorandom::Rand64;

use common::small_config;
use HeapLens::classify::containing_object;
use HeapLens::consts::WORD_BYTES;
use HeapLens::heap::page::PageKind;
use HeapLens::heap::Heap;
use HeapLens::image::{capture, restore};
use HeapLens::object::{tag_ref, TAG_BIGNUM, TAG_BYTES, TAG_CODE, TAG_RECORD, TAG_VECTOR};
use HeapLens::thread::ThreadSet;

#[test]
fn randomized_heaps_roundtrip() -> Result<()> {
    let mut rng = Rand64::new(0x5EED_0001);

    for round in 0..8 {
        let mut cfg = small_config();
        cfg.dynamic_size = 64 * 4096;
        cfg.card_table_nbits =
            HeapLens::config::card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
        let mut heap = Heap::new(cfg.clone())?;

        // случайные объекты, пока не займём примерно половину кучи
        let mut objects: Vec<u64> = Vec::new();
        let budget = cfg.dynamic_size / 2;
        while heap.dynamic().live_bytes() < budget {
            let (tag, kind) = match rng.rand_range(0..5) {
                0 => (TAG_RECORD, PageKind::Boxed),
                1 => (TAG_VECTOR, PageKind::Boxed),
                2 => (TAG_BIGNUM, PageKind::Boxed),
                3 => (TAG_BYTES, PageKind::Unboxed),
                _ => (TAG_CODE, PageKind::Code),
            };
            let payload = 1 + rng.rand_range(0..2000);
            let gen = rng.rand_range(0..3) as u8;
            match heap.alloc_object(tag, payload, kind, gen) {
                Ok(addr) => objects.push(addr),
                Err(_) => break, // куча кончилась раньше бюджета
            }
        }
        assert!(!objects.is_empty());

        // случайные card-отметки
        for _ in 0..32 {
            let off = rng.rand_range(0..heap.dynamic().live_bytes());
            heap.mark_card(heap.dynamic().base + off);
        }

        // стеки: валидные ссылки + фиксированное число повисших
        let mut set = ThreadSet::new(&cfg);
        let nthreads = 1 + rng.rand_range(0..3) as u32;
        let mut planted_dangling = 0usize;
        for t in 0..nthreads {
            let mut th = set.spawn(&cfg);
            for _ in 0..rng.rand_range(1..40) {
                let pick = rng.rand_range(0..4);
                if pick == 0 {
                    // повисшая ссылка в незанятую часть кучи
                    let dead = heap.dynamic().high_water()
                        + 2 * cfg.page_bytes as u64
                        + rng.rand_range(0..1024) * WORD_BYTES;
                    if dead < heap.dynamic().end() {
                        th.push_control_word(tag_ref(dead & !0xF, 0x7));
                        planted_dangling += 1;
                    }
                } else if pick == 1 {
                    th.push_control_word(rng.rand_u64() << 1); // fixnum
                } else {
                    let obj = objects[rng.rand_range(0..objects.len() as u64) as usize];
                    th.push_control_word(tag_ref(obj, 0x3));
                }
            }
            if t == 0 {
                th.enter_interrupt_context(0x4000_0000 + rng.rand_range(0..0x1000));
            }
            set.link_back(th);
        }

        let mut img = Vec::new();
        capture(&heap, &set, &mut img)?;
        let restored = restore(&mut img.as_slice(), &cfg)?;

        // байтовая идентичность живой части
        let live = (heap.pages_in_use() * cfg.page_bytes as u64) as usize;
        assert_eq!(
            &restored.heap.dynamic().bytes()[..live],
            &heap.dynamic().bytes()[..live],
            "round {}",
            round
        );
        assert_eq!(restored.heap.cards().bytes(), heap.cards().bytes());
        for i in 0..heap.pages_in_use() as usize {
            assert_eq!(restored.heap.page_table().get(i), heap.page_table().get(i));
        }

        // классификатор на восстановленной куче находит каждый объект
        for &obj in &objects {
            assert_eq!(containing_object(&restored.heap, obj + 8), Some(obj));
        }

        // скан насчитал ровно посаженные повисшие ссылки
        assert_eq!(restored.scan.total_dangling(), planted_dangling, "round {}", round);
        assert_eq!(restored.threads.len(), nthreads as usize);
    }
    Ok(())
}
