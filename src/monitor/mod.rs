//! monitor — интерактивный низкоуровневый отладчик поверх кучи.
//!
//! Работает как над живой, так и над восстановленной из образа кучей;
//! сам ничего не мутирует — только форматирует ответы классификатора,
//! таблиц страниц и реестра тредов. Команды сокращаются до уникального
//! префикса; неоднозначный префикс и неизвестная команда сообщаются, как
//! и пустая строка игнорируется.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::classify::{containing_object, looks_like_pointer};
use crate::consts::WORD_BYTES;
use crate::heap::page::PageKind;
use crate::heap::Heap;
use crate::image::scan::scan_control_stack;
use crate::metrics;
use crate::object::{header_tag, is_object_ref, is_valid_header, object_total_words, tag_name};
use crate::thread::{ThreadSet, REGISTER_NAMES};
use crate::util::printable_byte;

struct Cmd {
    name: &'static str,
    help: &'static str,
}

static COMMANDS: &[Cmd] = &[
    Cmd { name: "help", help: "Display this help information." },
    Cmd { name: "?", help: "(an alias for help)" },
    Cmd { name: "dump", help: "Dump memory starting at ADDR for COUNT words (-d decodes object headers)." },
    Cmd { name: "d", help: "(an alias for dump)" },
    Cmd { name: "pte", help: "Page table entry for ADDR." },
    Cmd { name: "search", help: "Find the object containing ADDR." },
    Cmd { name: "threads", help: "List threads." },
    Cmd { name: "context", help: "Print register context of thread N." },
    Cmd { name: "regions", help: "List heap regions." },
    Cmd { name: "gens", help: "Print generation statistics." },
    Cmd { name: "scan", help: "Re-run the dangling-reference stack scan." },
    Cmd { name: "metrics", help: "Print subsystem counters." },
    Cmd { name: "quit", help: "Quit." },
    Cmd { name: "exit", help: "Exit this instance of the monitor." },
];

/// Разбор адреса: hex, с опциональным префиксом 0x.
fn parse_addr(tok: &str) -> Option<u64> {
    let t = tok.strip_prefix("0x").unwrap_or(tok);
    u64::from_str_radix(t, 16).ok()
}

fn parse_count(tok: &str) -> Option<i64> {
    tok.parse::<i64>().ok()
}

pub struct Monitor<'a> {
    heap: &'a Heap,
    threads: &'a ThreadSet,
    last_addr: u64,
    last_count: i64,
}

impl<'a> Monitor<'a> {
    pub fn new(heap: &'a Heap, threads: &'a ThreadSet) -> Self {
        let last_addr = heap.dynamic().base;
        Self { heap, threads, last_addr, last_count: 20 }
    }

    /// Главный цикл: строки из input, ответы в out. Возвращается на
    /// quit/exit или EOF.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<()> {
        writeln!(out, "Welcome to the HeapLens monitor, a low-level debugger for the GC runtime.")?;
        let mut lines = input.lines();
        loop {
            write!(out, "hl> ")?;
            out.flush()?;
            let line = match lines.next() {
                Some(l) => l?,
                None => return Ok(()),
            };
            if self.dispatch(&line, out)? {
                return Ok(());
            }
        }
    }

    /// Выполнить одну команду; true — пора выходить.
    pub fn dispatch<W: Write>(&mut self, line: &str, out: &mut W) -> Result<bool> {
        let mut toks = line.split_whitespace();
        let token = match toks.next() {
            Some(t) => t,
            None => return Ok(false),
        };
        let args: Vec<&str> = toks.collect();

        // точное совпадение, иначе уникальный префикс
        let mut found: Option<&Cmd> = None;
        let mut ambig = false;
        for cmd in COMMANDS {
            if cmd.name == token {
                found = Some(cmd);
                ambig = false;
                break;
            } else if cmd.name.starts_with(token) {
                if found.is_some() {
                    ambig = true;
                } else {
                    found = Some(cmd);
                }
            }
        }
        if ambig {
            writeln!(out, "``{}'' is ambiguous.", token)?;
            return Ok(false);
        }
        let cmd = match found {
            Some(c) => c,
            None => {
                writeln!(out, "unknown command: ``{}''", token)?;
                return Ok(false);
            }
        };

        match cmd.name {
            "help" | "?" => self.cmd_help(out)?,
            "dump" | "d" => self.cmd_dump(&args, out)?,
            "pte" => self.cmd_pte(&args, out)?,
            "search" => self.cmd_search(&args, out)?,
            "threads" => self.cmd_threads(out)?,
            "context" => self.cmd_context(&args, out)?,
            "regions" => self.cmd_regions(out)?,
            "gens" => self.cmd_gens(out)?,
            "scan" => self.cmd_scan(out)?,
            "metrics" => self.cmd_metrics(out)?,
            "quit" | "exit" => return Ok(true),
            _ => unreachable!(),
        }
        Ok(false)
    }

    fn cmd_help<W: Write>(&self, out: &mut W) -> Result<()> {
        for cmd in COMMANDS {
            writeln!(out, "{}\t{}", cmd.name, cmd.help)?;
        }
        Ok(())
    }

    fn cmd_dump<W: Write>(&mut self, args: &[&str], out: &mut W) -> Result<()> {
        let mut decode = false;
        let mut rest = args;
        if rest.first() == Some(&"-d") {
            decode = true;
            rest = &rest[1..];
        }
        let mut addr = self.last_addr;
        let mut count = self.last_count;
        if let Some(tok) = rest.first() {
            match parse_addr(tok) {
                Some(a) => addr = a,
                None => {
                    writeln!(out, "bad address ``{}''", tok)?;
                    return Ok(());
                }
            }
            if let Some(tok) = rest.get(1) {
                match parse_count(tok) {
                    Some(c) if c != 0 => count = c,
                    _ => {
                        writeln!(out, "COUNT must be a non-zero integer")?;
                        return Ok(());
                    }
                }
            }
        }
        self.last_count = count;

        let step: i64 = if count > 0 { WORD_BYTES as i64 } else { -(WORD_BYTES as i64) };
        let mut n = count.abs();
        let aligned = addr % WORD_BYTES == 0;
        if decode && (!aligned || step < 0) {
            writeln!(out, "can only decode when aligned and stepping forward")?;
            decode = false;
        }
        let mut next_object = addr;
        let mut cur = addr;
        while n > 0 {
            write!(out, "{:#018x}: ", cur)?;
            if !self.heap.managed_addr_p(cur) || !aligned {
                writeln!(out, "invalid heap address")?;
            } else {
                let word = self.heap.read_word(cur)?;
                let bytes = word.to_le_bytes();
                write!(out, "{:#018x} | ", word)?;
                for b in bytes {
                    write!(out, "{}", printable_byte(b))?;
                }
                // аннотация поколения для ссылок в динамический регион
                if is_object_ref(word) {
                    if let Some(idx) = self.heap.page_table().index_of(crate::object::untag(word)) {
                        let pte = self.heap.page_table().get(idx);
                        if pte.kind != PageKind::Free {
                            write!(out, " | g{}", pte.gen)?;
                        }
                    }
                }
                if decode && cur == next_object {
                    if is_valid_header(word) {
                        if let (Some(name), Some(words)) =
                            (tag_name(header_tag(word)), object_total_words(word))
                        {
                            write!(out, " {}", name)?;
                            next_object = cur + words * WORD_BYTES;
                        }
                    } else {
                        // дальше заголовков нет — выключаем декодер
                        decode = false;
                    }
                }
                writeln!(out)?;
            }
            cur = cur.wrapping_add_signed(step);
            n -= 1;
        }
        self.last_addr = cur;
        Ok(())
    }

    fn cmd_pte<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let addr = match args.first().and_then(|t| parse_addr(t)) {
            Some(a) => a,
            None => {
                writeln!(out, "usage: pte ADDR")?;
                return Ok(());
            }
        };
        match self.heap.page_table().index_of(addr) {
            Some(idx) => {
                let pte = self.heap.page_table().get(idx);
                writeln!(
                    out,
                    "page {} @ {:#x}: kind={} gen={} words_used={} scan_start_offset={}{}",
                    idx,
                    self.heap.page_table().page_base(idx),
                    pte.kind.name(),
                    pte.gen,
                    pte.words_used,
                    pte.scan_start_offset,
                    if pte.open_region { " (open region)" } else { "" }
                )?;
            }
            None => writeln!(out, "address {:#x} is outside the dynamic region", addr)?,
        }
        Ok(())
    }

    fn cmd_search<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let addr = match args.first().and_then(|t| parse_addr(t)) {
            Some(a) => a,
            None => {
                writeln!(out, "usage: search ADDR")?;
                return Ok(());
            }
        };
        match containing_object(self.heap, addr) {
            Some(start) => {
                let header = self.heap.dynamic().read_word(start);
                let name = tag_name(header_tag(header)).unwrap_or("object");
                writeln!(out, "{:#x} ({})", start, name)?;
            }
            None => writeln!(out, "not found")?,
        }
        if looks_like_pointer(self.heap, addr) && containing_object(self.heap, addr).is_none() {
            writeln!(out, "(word is pointer-like but resolves to nothing)")?;
        }
        Ok(())
    }

    fn cmd_threads<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "(id, sp, control words, binding words, context)")?;
        for th in self.threads.iter() {
            writeln!(
                out,
                "{:>4} {:#x} {:>8} {:>8} {}",
                th.id,
                th.capture_sp(),
                th.live_control().len() / 8,
                th.live_binding().len() / 8,
                if th.context.is_some() { "yes" } else { "no" }
            )?;
        }
        Ok(())
    }

    fn cmd_context<W: Write>(&self, args: &[&str], out: &mut W) -> Result<()> {
        let idx = args.first().and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let th = match self.threads.get(idx) {
            Some(t) => t,
            None => {
                writeln!(out, "there aren't that many threads")?;
                return Ok(());
            }
        };
        match &th.context {
            Some(ctx) => {
                writeln!(out, "thread {} interrupt context:", th.id)?;
                for (name, value) in REGISTER_NAMES.iter().zip(ctx.regs.iter()) {
                    writeln!(out, "{}:\t{:#018x}", name, value)?;
                }
                writeln!(out, "pc:\t{:#018x}", ctx.pc)?;
            }
            None => writeln!(out, "thread {} has no interrupt context", th.id)?,
        }
        Ok(())
    }

    fn cmd_regions<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut print = |name: &str, base: u64, cap: u64, hw: u64| -> Result<()> {
            writeln!(
                out,
                "{:<10} {:#014x}..{:#014x} live {} / {} bytes",
                name,
                base,
                base + cap,
                hw - base,
                cap
            )?;
            Ok(())
        };
        let s = self.heap.static_region();
        print("static", s.base, s.capacity, s.high_water())?;
        let d = self.heap.dynamic();
        print("dynamic", d.base, d.capacity, d.high_water())?;
        if let Some(side) = self.heap.side() {
            print("fixedobj", side.fixedobj.base, side.fixedobj.capacity, side.fixedobj.high_water())?;
            print("varyobj", side.varyobj.base, side.varyobj.capacity, side.varyobj.high_water())?;
        }
        Ok(())
    }

    fn cmd_gens<W: Write>(&self, out: &mut W) -> Result<()> {
        for line in self.heap.generations().summary_lines() {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    fn cmd_scan<W: Write>(&self, out: &mut W) -> Result<()> {
        for th in self.threads.iter() {
            let scan = scan_control_stack(self.heap, th.live_control(), th.id, th.id);
            write!(out, "thread {}: {} valid", th.id, scan.valid)?;
            if scan.dangling > 0 {
                write!(out, " ({} dangling)", scan.dangling)?;
            }
            writeln!(out)?;
            for s in &scan.samples {
                writeln!(out, "  ! sp[{:5}] = {:#x} (not found)", s.index, s.word)?;
            }
        }
        Ok(())
    }

    fn cmd_metrics<W: Write>(&self, out: &mut W) -> Result<()> {
        let ms = metrics::snapshot();
        writeln!(out, "captures_total        = {}", ms.captures_total)?;
        writeln!(out, "capture_bytes_written = {}", ms.capture_bytes_written)?;
        writeln!(out, "restores_total        = {}", ms.restores_total)?;
        writeln!(out, "restore_bytes_read    = {}", ms.restore_bytes_read)?;
        writeln!(out, "threads_restored      = {}", ms.threads_restored)?;
        writeln!(out, "stack_words_scanned   = {}", ms.stack_words_scanned)?;
        writeln!(out, "stack_words_dangling  = {}", ms.stack_words_dangling)?;
        Ok(())
    }
}

/// Точка входа процесса инспекции: restore + интерактивный цикл.
/// Возвращается после команды quit/exit (код 0 — graceful quit).
pub fn restore_and_debug(path: &std::path::Path, config: &crate::config::LayoutConfig) -> Result<()> {
    let restored = crate::image::restore_from_path(path, config)?;
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut mon = Monitor::new(&restored.heap, &restored.threads);
    mon.run(stdin.lock(), &mut stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::heap::page::PageKind;
    use crate::object::TAG_RECORD;

    fn setup() -> (Heap, ThreadSet) {
        let mut cfg = LayoutConfig::default();
        cfg.dynamic_size = 16 * 4096;
        cfg.card_table_nbits = crate::config::card_nbits_for(cfg.dynamic_size, cfg.card_bytes);
        cfg.fixedobj_size = 4 * 4096;
        cfg.varyobj_size = 4 * 4096;
        let mut heap = Heap::new(cfg.clone()).unwrap();
        heap.alloc_object(TAG_RECORD, 3, PageKind::Boxed, 0).unwrap();
        let mut threads = ThreadSet::new(&cfg);
        let th = threads.spawn(&cfg);
        threads.link_back(th);
        (heap, threads)
    }

    fn run_cmd(line: &str) -> String {
        let (heap, threads) = setup();
        let mut mon = Monitor::new(&heap, &threads);
        let mut out = Vec::new();
        mon.dispatch(line, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn search_finds_object_start() {
        let out = run_cmd("search 10000008");
        assert!(out.contains("0x10000000"), "{}", out);
        assert!(out.contains("record"), "{}", out);
    }

    #[test]
    fn search_reports_not_found() {
        let out = run_cmd("search 10002000");
        assert!(out.contains("not found"), "{}", out);
    }

    #[test]
    fn pte_shows_entry() {
        let out = run_cmd("pte 0x10000000");
        assert!(out.contains("kind=boxed"), "{}", out);
        assert!(out.contains("words_used=4"), "{}", out);
    }

    #[test]
    fn prefix_matching() {
        let out = run_cmd("se 10000008");
        assert!(out.contains("0x10000000"), "{}", out);
        // неоднозначный префикс: "s" = search|scan... (scan, search)
        let out = run_cmd("s");
        assert!(out.contains("ambiguous"), "{}", out);
        let out = run_cmd("frobnicate");
        assert!(out.contains("unknown command"), "{}", out);
    }

    #[test]
    fn dump_annotates_and_decodes() {
        let out = run_cmd("dump -d 0x10000000 4");
        assert!(out.contains("record"), "{}", out);
        let out = run_cmd("dump 0x0000dead 1");
        assert!(out.contains("invalid heap address"), "{}", out);
    }

    #[test]
    fn quit_exits_loop() {
        let (heap, threads) = setup();
        let mut mon = Monitor::new(&heap, &threads);
        let mut out = Vec::new();
        assert!(mon.dispatch("quit", &mut out).unwrap());
        let input = std::io::Cursor::new(b"help\nquit\n".to_vec());
        let mut out = Vec::new();
        mon.run(input, &mut out).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.contains("Welcome"), "{}", s);
    }
}
