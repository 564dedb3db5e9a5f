//! Охранные свойства формата: отказ по сигнатуре, несовпадению параметров,
//! обрезке, мусору за хвостом и конфликту размещения.

mod common;

use anyhow::Result;

use common::{populated_heap, populated_threads, small_config};
use HeapLens::errors::CrashImageError;
use HeapLens::image::{capture, restore};

fn sample_image() -> (Vec<u8>, HeapLens::config::LayoutConfig) {
    let cfg = small_config();
    let (heap, rec, _big) = populated_heap(&cfg);
    let threads = populated_threads(&cfg, &heap, rec, 2);
    let mut img = Vec::new();
    capture(&heap, &threads, &mut img).unwrap();
    (img, cfg)
}

fn expect_variant(err: anyhow::Error, want: &str) {
    let ce = err
        .downcast_ref::<CrashImageError>()
        .unwrap_or_else(|| panic!("expected CrashImageError, got: {:#}", err));
    let got = match ce {
        CrashImageError::FormatMismatch { .. } => "FormatMismatch",
        CrashImageError::IncompleteTransfer { .. } => "IncompleteTransfer",
        CrashImageError::PlacementConflict { .. } => "PlacementConflict",
        CrashImageError::CorruptTrailer { .. } => "CorruptTrailer",
    };
    assert_eq!(got, want, "error was: {:#}", ce);
}

#[test]
fn perturbed_signature_is_rejected() {
    let (mut img, cfg) = sample_image();
    img[0] ^= 0x01;
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "FormatMismatch");
}

#[test]
fn differing_page_size_is_rejected() {
    let (img, mut cfg) = sample_image();
    cfg.page_bytes = 8192;
    cfg.card_table_nbits = HeapLens::config::card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "FormatMismatch");
}

#[test]
fn differing_card_size_is_rejected() {
    let (img, mut cfg) = sample_image();
    cfg.card_bytes = 256;
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "FormatMismatch");
}

#[test]
fn side_region_presence_must_match() {
    let (img, mut cfg) = sample_image();
    cfg.side_regions = false;
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "FormatMismatch");
}

#[test]
fn truncation_never_loads_partially() {
    let (img, cfg) = sample_image();
    // границы секций + шаг по телу + последний байт
    let mut cuts = vec![
        0,
        7,
        HeapLens::consts::CRASH_PREAMBLE_NBYTES - 1,
        HeapLens::consts::CRASH_PREAMBLE_NBYTES,
        img.len() - 9,
        img.len() - 8,
        img.len() - 1,
    ];
    let mut off = 1;
    while off < img.len() {
        cuts.push(off);
        off += 997;
    }
    for cut in cuts {
        let mut slice = &img[..cut];
        let err = restore(&mut slice, &cfg).unwrap_err();
        let ce = err.downcast_ref::<CrashImageError>();
        assert!(
            matches!(
                ce,
                Some(CrashImageError::IncompleteTransfer { .. })
                    | Some(CrashImageError::CorruptTrailer { .. })
            ),
            "cut at {} gave unexpected error: {:#}",
            cut,
            err
        );
    }
}

#[test]
fn trailing_garbage_is_rejected() {
    let (mut img, cfg) = sample_image();
    img.push(0x00);
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "CorruptTrailer");
}

#[test]
fn corrupted_trailer_magic_is_rejected() {
    let (mut img, cfg) = sample_image();
    let n = img.len();
    img[n - 3] ^= 0xFF;
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "CorruptTrailer");
}

#[test]
fn overlapping_region_bases_are_a_placement_conflict() -> Result<()> {
    let (mut img, cfg) = sample_image();
    // fixedobj_base (offset 56 в преамбуле) := dynamic_base — перекрытие
    let dynamic_base = cfg.dynamic_base.to_le_bytes();
    img[56..64].copy_from_slice(&dynamic_base);
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "PlacementConflict");
    Ok(())
}

#[test]
fn oversized_thread_stack_is_rejected() {
    let (img, mut cfg) = sample_image();
    // рантайм с меньшим control-стеком не может принять записанные байты
    cfg.control_stack_bytes = 0;
    let err = restore(&mut img.as_slice(), &cfg).unwrap_err();
    expect_variant(err, "FormatMismatch");
}
