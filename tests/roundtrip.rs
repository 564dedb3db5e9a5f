//! Round-trip identity: restore(capture(H)) побайтно совпадает с H по
//! регионам, таблицам страниц, card-таблице и тредам (кроме пропускаемого
//! identity-префикса TLS).

mod common;

use anyhow::Result;

use common::{populated_heap, populated_threads, small_config, unique_root};
use HeapLens::consts::THREAD_HEADER_NBYTES;
use HeapLens::image::{capture, capture_to_path, restore, restore_from_path};

#[test]
fn roundtrip_preserves_heap_bytes() -> Result<()> {
    let cfg = small_config();
    let (heap, rec, _big) = populated_heap(&cfg);
    let threads = populated_threads(&cfg, &heap, rec, 2);

    let mut img = Vec::new();
    capture(&heap, &threads, &mut img)?;
    let restored = restore(&mut img.as_slice(), &cfg)?;

    // региональные payload'ы: живые байты совпадают дословно
    let live = heap.static_region().live_bytes() as usize;
    assert_eq!(
        &restored.heap.static_region().bytes()[..live],
        &heap.static_region().bytes()[..live]
    );
    assert_eq!(restored.heap.static_region().high_water(), heap.static_region().high_water());

    let dyn_live = (heap.pages_in_use() * cfg.page_bytes as u64) as usize;
    assert_eq!(
        &restored.heap.dynamic().bytes()[..dyn_live],
        &heap.dynamic().bytes()[..dyn_live]
    );

    // таблица страниц: записи занятых страниц идентичны
    for i in 0..heap.pages_in_use() as usize {
        assert_eq!(
            restored.heap.page_table().get(i),
            heap.page_table().get(i),
            "page {}",
            i
        );
    }

    // card-таблица целиком
    assert_eq!(restored.heap.cards().bytes(), heap.cards().bytes());

    // side-регионы: payload, таблицы, touched-битмап
    let (s0, s1) = (heap.side().unwrap(), restored.heap.side().unwrap());
    let fl = s0.fixedobj.live_bytes() as usize;
    assert_eq!(&s1.fixedobj.bytes()[..fl], &s0.fixedobj.bytes()[..fl]);
    assert_eq!(s1.fixedobj_pages, s0.fixedobj_pages);
    let vl = s0.varyobj.live_bytes() as usize;
    assert_eq!(&s1.varyobj.bytes()[..vl], &s0.varyobj.bytes()[..vl]);
    assert_eq!(s1.varyobj_pages, s0.varyobj_pages);
    assert_eq!(s1.touched, s0.touched);
    assert!(s1.is_touched(s1.varyobj.base + 600)?);

    // runtime_info переносится как есть
    assert_eq!(restored.heap.runtime_info(), 0xC0FFEE);

    // агрегаты поколений пересчитаны и совпали с исходными
    let g0 = heap.generations();
    let g1 = restored.heap.generations();
    for (a, b) in g0.stats().iter().zip(g1.stats()) {
        assert_eq!(a.bytes_allocated, b.bytes_allocated, "gen {}", a.id);
    }
    assert!(g1.total_bytes() > 0);
    Ok(())
}

#[test]
fn roundtrip_preserves_threads() -> Result<()> {
    let cfg = small_config();
    let (heap, rec, _big) = populated_heap(&cfg);
    let threads = populated_threads(&cfg, &heap, rec, 2);

    let mut img = Vec::new();
    capture(&heap, &threads, &mut img)?;
    let restored = restore(&mut img.as_slice(), &cfg)?;
    assert_eq!(restored.threads.len(), 2);

    // front-insertion: порядок обратный, сматчим по живому содержимому
    for orig in threads.iter() {
        let found = restored
            .threads
            .iter()
            .find(|t| t.live_control() == orig.live_control())
            .expect("restored thread with identical control stack");
        assert_eq!(found.live_binding(), orig.live_binding());
        // identity новая
        assert_ne!(found.id, orig.id);
        // TLS за identity-заголовком — из образа
        assert_eq!(
            &found.tls[THREAD_HEADER_NBYTES..],
            &orig.tls[THREAD_HEADER_NBYTES..]
        );
        // identity-заголовок — от свежего треда
        assert_eq!(
            u64::from_le_bytes(found.tls[0..8].try_into().unwrap()),
            found.id
        );
        assert_eq!(found.context.is_some(), orig.context.is_some());
        if let (Some(fc), Some(oc)) = (&found.context, &orig.context) {
            // sp перепатчен на свежий стек, прочие регистры дословно
            assert_eq!(fc.sp(), found.sp);
            assert_eq!(fc.pc, oc.pc);
        }
    }

    // скан не нашёл повисших ссылок
    assert!(restored.scan.is_clean());
    assert!(restored.scan.total_valid() >= 2);
    Ok(())
}

#[test]
fn roundtrip_via_file() -> Result<()> {
    let cfg = small_config();
    let (heap, rec, _big) = populated_heap(&cfg);
    let threads = populated_threads(&cfg, &heap, rec, 1);

    let root = unique_root("rt");
    std::fs::create_dir_all(&root)?;
    let path = root.join("crash.img");
    capture_to_path(&heap, &threads, &path)?;

    let restored = restore_from_path(&path, &cfg)?;
    assert_eq!(restored.threads.len(), 1);
    assert_eq!(restored.heap.pages_in_use(), heap.pages_in_use());
    Ok(())
}

#[test]
fn empty_heap_roundtrip() -> Result<()> {
    let mut cfg = small_config();
    cfg.side_regions = false;
    let heap = HeapLens::heap::Heap::new(cfg.clone())?;
    let threads = HeapLens::thread::ThreadSet::new(&cfg);

    let mut img = Vec::new();
    capture(&heap, &threads, &mut img)?;
    let restored = restore(&mut img.as_slice(), &cfg)?;
    assert_eq!(restored.threads.len(), 0);
    assert_eq!(restored.heap.pages_in_use(), 0);
    assert!(restored.heap.side().is_none());
    assert_eq!(restored.heap.generations().total_bytes(), 0);
    Ok(())
}
