use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error};
use memview_core::{Program, ProgramAssembler};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "memview")]
#[command(version, about = "Inspect a core dump, the live kernel, or a live process", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Report per-module/per-mapping debug-info discovery details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap from an ELF core dump
    Core {
        /// Path to the core file
        path: PathBuf,
    },
    /// Bootstrap from the live kernel via /proc/kcore
    Kernel,
    /// Bootstrap from a live process via /proc/<pid>/mem
    Pid {
        /// Target process id
        pid: u32,
    },
}

fn main() {
    env_logger::builder()
        .parse_env(env_logger::Env::new().filter_or("MEMVIEW_LOG", "info"))
        .format_timestamp(None)
        .init();

    if let Err(err) = run() {
        for cause in err.chain() {
            error!("{cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let program = match cli.command {
        Commands::Core { path } => {
            debug!("bootstrapping from core dump {}", path.display());
            ProgramAssembler::from_core_dump(&path, cli.verbose)
                .with_context(|| format!("failed to bootstrap from {}", path.display()))?
        }
        Commands::Kernel => {
            debug!("bootstrapping from /proc/kcore");
            ProgramAssembler::from_kernel(cli.verbose).context("failed to bootstrap from /proc/kcore")?
        }
        Commands::Pid { pid } => {
            debug!("bootstrapping from pid {pid}");
            ProgramAssembler::from_pid(pid).with_context(|| format!("failed to bootstrap from pid {pid}"))?
        }
    };

    print_summary(&program);
    Ok(())
}

fn print_summary(program: &Program) {
    println!("IS_LINUX_KERNEL: {}", program.is_linux_kernel());

    if let Some(info) = &program.vmcoreinfo {
        println!("osrelease: {}", info.osrelease);
        println!("kaslr_offset: 0x{:x}", info.kaslr_offset);
    }

    if let Some(vmlinux) = &program.debug_files.vmlinux {
        println!("vmlinux: {}", vmlinux.display());
    }
    if !program.debug_files.modules.is_empty() {
        println!("modules found: {}", program.debug_files.modules.len());
    }

    if !program.mappings.is_empty() {
        println!("mappings:");
        for mapping in program.mappings.iter() {
            let elf = match mapping.elf {
                Some(_) => "debug-info opened",
                None => "no debug info",
            };
            println!(
                "  0x{:x}-0x{:x} @0x{:x} {} [{elf}]",
                mapping.start, mapping.end, mapping.file_offset, mapping.path
            );
        }
    }
}
