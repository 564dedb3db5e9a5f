use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для HeapLens: инспекция crash-образов GC-рантайма
#[derive(Parser, Debug)]
#[command(name = "heaplens", version, about = "HeapLens crash-image tools")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Print the crash-image preamble (sizes, bases, thread count)
    Info {
        image: PathBuf,
        /// JSON output (single object)
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Restore the image and report dangling stack references
    Scan {
        image: PathBuf,
        /// JSON output (full per-thread report)
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Restore the image and enter the interactive monitor
    Inspect {
        image: PathBuf,
    },
    /// Build a small synthetic heap and capture it (smoke/e2e artifact)
    ///
    /// Пример:
    ///   heaplens demo /tmp/crash.img --threads 3
    ///   heaplens inspect /tmp/crash.img
    Demo {
        out: PathBuf,
        /// Number of threads to synthesize (first one gets an interrupt context)
        #[arg(long, default_value_t = 3)]
        threads: u32,
        /// Plant a dangling stack reference per thread
        #[arg(long, default_value_t = false)]
        dangling: bool,
    },
}
