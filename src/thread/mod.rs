//! thread — записи тредов, реестр и stop-the-world шов.
//!
//! ThreadRecord хранит сырьё, которое уходит в образ: control/binding
//! стеки (полные буферы с виртуальными базами), TLS-блок и опциональный
//! снапшот регистров. Снапшот присутствует только у треда, пойманного в
//! interrupt/signal-фрейме; остальные отдают только стеки и текущий sp.
//!
//! Реестр (ThreadSet) раздаёт identity и стековые базы; restore вставляет
//! восстановленные треды в начало списка (front-insertion, порядок нигде
//! не используется как гарантия).
//!
//! WorldStopper — явная точка координации global pause: capture получает
//! её как коллаборатора, а не через процесс-глобальное состояние;
//! SingleThreadedWorld — no-op вариант для однотредовых сценариев.

use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, ReadBytesExt};

use crate::config::LayoutConfig;
use crate::consts::{
    CONTEXT_NBYTES, CONTROL_STACK_GROWS_DOWN, NREGS, REG_SP, THREAD_HEADER_NBYTES, WORD_BYTES,
};

/// Имена регистров снапшота (порядок слотов контекста).
pub static REGISTER_NAMES: [&str; NREGS] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// Снапшот машинных регистров interrupt-контекста.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterContext {
    pub regs: [u64; NREGS],
    pub pc: u64,
}

impl RegisterContext {
    #[inline]
    pub fn sp(&self) -> u64 {
        self.regs[REG_SP]
    }

    #[inline]
    pub fn set_sp(&mut self, sp: u64) {
        self.regs[REG_SP] = sp;
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CONTEXT_NBYTES);
        for r in self.regs {
            buf.extend_from_slice(&r.to_le_bytes());
        }
        buf.extend_from_slice(&self.pc.to_le_bytes());
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != CONTEXT_NBYTES {
            return Err(anyhow!(
                "register context must be {} bytes, got {}",
                CONTEXT_NBYTES,
                raw.len()
            ));
        }
        let mut c = raw;
        let mut regs = [0u64; NREGS];
        for r in regs.iter_mut() {
            *r = c.read_u64::<LittleEndian>()?;
        }
        let pc = c.read_u64::<LittleEndian>()?;
        Ok(Self { regs, pc })
    }
}

/// Один тред рантайма, как его видит подсистема дампа.
#[derive(Debug)]
pub struct ThreadRecord {
    /// Opaque identity (у восстановленного треда — новая).
    pub id: u64,
    pub control_base: u64,
    pub control: Vec<u8>,
    /// Текущий stack pointer (абсолютный адрес внутри control-стека).
    pub sp: u64,
    pub binding_base: u64,
    pub binding: Vec<u8>,
    /// Вершина binding-стека (растёт вверх).
    pub binding_sp: u64,
    pub tls: Vec<u8>,
    pub context: Option<RegisterContext>,
}

impl ThreadRecord {
    /// Bring-up свежего треда: пустые стеки, TLS-заголовок с identity.
    pub fn bring_up(id: u64, control_base: u64, binding_base: u64, cfg: &LayoutConfig) -> Self {
        let control = vec![0u8; cfg.control_stack_bytes as usize];
        let binding = vec![0u8; cfg.binding_stack_bytes as usize];
        let mut tls = vec![0u8; cfg.tls_bytes as usize];
        // identity-заголовок TLS: [id][control_base][binding_base]
        tls[0..8].copy_from_slice(&id.to_le_bytes());
        tls[8..16].copy_from_slice(&control_base.to_le_bytes());
        tls[16..24].copy_from_slice(&binding_base.to_le_bytes());
        let sp = if CONTROL_STACK_GROWS_DOWN {
            control_base + cfg.control_stack_bytes
        } else {
            control_base
        };
        Self {
            id,
            control_base,
            control,
            sp,
            binding_base,
            binding,
            binding_sp: binding_base,
            tls,
            context: None,
        }
    }

    #[inline]
    pub fn control_end(&self) -> u64 {
        self.control_base + self.control.len() as u64
    }

    /// Stack pointer на момент capture: из interrupt-контекста, если тред
    /// был в нём, иначе — отслеживаемый sp.
    pub fn capture_sp(&self) -> u64 {
        match &self.context {
            Some(ctx) => ctx.sp(),
            None => self.sp,
        }
    }

    /// Живой срез control-стека (между sp и логическим концом стека).
    pub fn live_control(&self) -> &[u8] {
        let sp = self.capture_sp();
        if CONTROL_STACK_GROWS_DOWN {
            let off = (sp - self.control_base) as usize;
            &self.control[off..]
        } else {
            let off = (sp - self.control_base) as usize;
            &self.control[..off]
        }
    }

    /// Живой срез binding-стека (растёт вверх: base..sp).
    pub fn live_binding(&self) -> &[u8] {
        let off = (self.binding_sp - self.binding_base) as usize;
        &self.binding[..off]
    }

    /// Затолкать слово на control-стек (тестовое/демо наполнение).
    pub fn push_control_word(&mut self, word: u64) {
        if CONTROL_STACK_GROWS_DOWN {
            self.sp -= WORD_BYTES;
            let off = (self.sp - self.control_base) as usize;
            self.control[off..off + 8].copy_from_slice(&word.to_le_bytes());
        } else {
            let off = (self.sp - self.control_base) as usize;
            self.control[off..off + 8].copy_from_slice(&word.to_le_bytes());
            self.sp += WORD_BYTES;
        }
        if let Some(ctx) = &mut self.context {
            ctx.set_sp(self.sp);
        }
    }

    /// Затолкать слово на binding-стек.
    pub fn push_binding_word(&mut self, word: u64) {
        let off = (self.binding_sp - self.binding_base) as usize;
        self.binding[off..off + 8].copy_from_slice(&word.to_le_bytes());
        self.binding_sp += WORD_BYTES;
    }

    /// Запись в TLS за пределами identity-заголовка.
    pub fn set_tls_word(&mut self, index: usize, word: u64) {
        let off = THREAD_HEADER_NBYTES + index * 8;
        self.tls[off..off + 8].copy_from_slice(&word.to_le_bytes());
    }

    pub fn tls_word(&self, index: usize) -> u64 {
        let off = THREAD_HEADER_NBYTES + index * 8;
        let mut w = [0u8; 8];
        w.copy_from_slice(&self.tls[off..off + 8]);
        u64::from_le_bytes(w)
    }

    /// Поймать тред «в interrupt-фрейме»: появляется снапшот регистров с
    /// текущим sp.
    pub fn enter_interrupt_context(&mut self, pc: u64) {
        let mut ctx = RegisterContext { pc, ..Default::default() };
        ctx.set_sp(self.sp);
        self.context = Some(ctx);
    }
}

/// Процесс-wide реестр тредов.
#[derive(Debug)]
pub struct ThreadSet {
    threads: Vec<ThreadRecord>,
    next_id: u64,
    next_stack_base: u64,
}

impl ThreadSet {
    pub fn new(cfg: &LayoutConfig) -> Self {
        Self {
            threads: Vec::new(),
            next_id: 1,
            next_stack_base: cfg.stack_arena_base,
        }
    }

    /// Выдать identity и стековые базы новому треду (bring-up путь).
    pub fn spawn(&mut self, cfg: &LayoutConfig) -> ThreadRecord {
        let id = self.next_id;
        self.next_id += 1;
        let control_base = self.next_stack_base;
        let binding_base = control_base + cfg.control_stack_bytes;
        // guard-зазор между стековыми нарезками
        self.next_stack_base = binding_base + cfg.binding_stack_bytes + cfg.page_bytes as u64;
        ThreadRecord::bring_up(id, control_base, binding_base, cfg)
    }

    /// Вставить тред в начало списка (порядок — деталь реализации).
    pub fn link_front(&mut self, rec: ThreadRecord) {
        self.threads.insert(0, rec);
    }

    pub fn link_back(&mut self, rec: ThreadRecord) {
        self.threads.push(rec);
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord> {
        self.threads.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ThreadRecord> {
        self.threads.iter_mut()
    }

    pub fn get(&self, idx: usize) -> Option<&ThreadRecord> {
        self.threads.get(idx)
    }
}

/// Явный шов global pause: capture вызывает pause_all перед чтением
/// какого-либо байта таблиц и resume_all после.
pub trait WorldStopper {
    fn pause_all(&self);
    fn resume_all(&self);
}

/// No-op пауза для однотредовых сценариев и тестов.
pub struct SingleThreadedWorld;

impl WorldStopper for SingleThreadedWorld {
    fn pause_all(&self) {}
    fn resume_all(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LayoutConfig {
        LayoutConfig::default()
    }

    #[test]
    fn bring_up_initializes_identity_header() {
        let c = cfg();
        let mut set = ThreadSet::new(&c);
        let th = set.spawn(&c);
        assert_eq!(u64::from_le_bytes(th.tls[0..8].try_into().unwrap()), th.id);
        assert_eq!(
            u64::from_le_bytes(th.tls[8..16].try_into().unwrap()),
            th.control_base
        );
        assert_eq!(th.sp, th.control_end());
        assert!(th.live_control().is_empty());
        assert!(th.context.is_none());
    }

    #[test]
    fn stack_pushes_and_live_slices() {
        let c = cfg();
        let mut set = ThreadSet::new(&c);
        let mut th = set.spawn(&c);
        th.push_control_word(0x1111);
        th.push_control_word(0x2222);
        th.push_binding_word(0x3333);

        assert_eq!(th.live_control().len(), 16);
        assert_eq!(th.live_binding().len(), 8);
        // вершина (последний push) лежит по sp
        assert_eq!(
            u64::from_le_bytes(th.live_control()[0..8].try_into().unwrap()),
            0x2222
        );
    }

    #[test]
    fn interrupt_context_tracks_sp() {
        let c = cfg();
        let mut set = ThreadSet::new(&c);
        let mut th = set.spawn(&c);
        th.push_control_word(0xAA);
        th.enter_interrupt_context(0x4000_1234);
        assert_eq!(th.capture_sp(), th.sp);
        th.push_control_word(0xBB);
        assert_eq!(th.context.unwrap().sp(), th.sp);
    }

    #[test]
    fn context_codec_roundtrip() {
        let mut ctx = RegisterContext::default();
        ctx.regs[0] = 1;
        ctx.regs[15] = 0xF00D;
        ctx.set_sp(0x7000_1000);
        ctx.pc = 0x4000_0042;
        let raw = ctx.encode();
        assert_eq!(raw.len(), CONTEXT_NBYTES);
        assert_eq!(RegisterContext::decode(&raw).unwrap(), ctx);
    }
}
