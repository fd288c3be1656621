//! End-to-end demo: drives a disassembly view against a scripted backend and
//! prints the resulting document after each navigation.

use asmview::address::RelocatedAddress;
use asmview::backend::{
    Completion, DisassemblyBackend, DisassemblyBlock, FetchParams, FunctionLocator,
    InstructionData, SourceLineData, SourcePlace,
};
use asmview::proto::{session_channel, SessionExecutor};
use asmview::session::{BackendRegistry, ContextKind, ExecutionContext, TargetStatus};
use asmview::view::document::TextDocument;
use asmview::view::{DisassemblyView, ViewConfig, ViewFlags};
use clap::Parser;
use smallvec::smallvec;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the target is "stopped" at.
    #[arg(long, default_value = "0x1000", value_parser = parse_addr)]
    pc: u64,

    /// Interleave scripted source lines with instructions.
    #[arg(long)]
    mixed: bool,

    /// Execution context kind to resolve a backend for.
    #[arg(long, default_value = "Native", value_parser = parse_context)]
    context: ContextKind,
}

fn parse_context(raw: &str) -> Result<ContextKind, String> {
    use std::str::FromStr;
    ContextKind::from_str(raw).map_err(|e| e.to_string())
}

fn parse_addr(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let (digits, radix) = match raw.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (raw, 10),
    };
    u64::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

/// Backend producing a synthetic 4-byte-instruction stream, completing on its
/// own thread like a real transport would.
struct ScriptedBackend;

const FUNCTION_SPAN: u64 = 0x40;

impl DisassemblyBackend for ScriptedBackend {
    fn resolve_frame_address(&self, frame_level: u32, done: Completion<RelocatedAddress>) {
        done.complete(Ok((0x1000_u64 + frame_level as u64 * FUNCTION_SPAN).into()));
    }

    fn fetch_disassembly(&self, params: FetchParams, done: Completion<DisassemblyBlock>) {
        thread::spawn(move || {
            // source-driven fetches derive their window from the cut-off
            let start = params
                .start
                .map(|a| a.as_u64())
                .unwrap_or_else(|| {
                    params
                        .end
                        .as_u64()
                        .saturating_sub(params.line_hint.max(16) as u64 * 4)
                })
                & !3;
            let mut block = DisassemblyBlock::default();
            let mut line = SourceLineData::default();

            let mut addr = start;
            while addr < params.end.as_u64() {
                if params.mixed && addr % 0x10 == 0 {
                    if !line.instructions.is_empty() {
                        block.lines.push(std::mem::take(&mut line));
                    }
                    let source_line = ((addr - start) / 0x10) as u32 + 1;
                    line.place = Some(SourcePlace::new("demo.c", source_line));
                    line.text = Some(format!("x += {source_line};"));
                }
                let function = format!("fn_{:x}", addr & !(FUNCTION_SPAN - 1));
                line.instructions.push(InstructionData {
                    address: addr.into(),
                    opcode: smallvec![0x90, 0x90, 0x90, 0x90],
                    mnemonic: Some("mov".to_string()),
                    operands: Some(format!("$0x{:x}, %rax", addr)),
                    function: Some(FunctionLocator::new(function, addr % FUNCTION_SPAN)),
                });
                addr += 4;
            }
            if !line.instructions.is_empty() {
                block.lines.push(line);
            }

            done.complete(Ok(block));
        });
    }
}

fn drain(executor: &SessionExecutor<TextDocument>, view: &mut DisassemblyView<TextDocument>) {
    while view.update_pending() {
        if executor.run_until_idle(view) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
    executor.run_until_idle(view);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut registry = BackendRegistry::new();
    registry.register(ContextKind::Native, || Arc::new(ScriptedBackend));
    let backend = registry.resolve(args.context)?;

    let (executor, handle) = session_channel::<TextDocument>();
    let mut context = ExecutionContext::new(args.context);
    context.status = TargetStatus::Running;

    let mut view = DisassemblyView::new(
        TextDocument::new(),
        backend,
        context,
        ViewConfig {
            fetch_lines: 16,
            ..ViewConfig::default()
        },
        handle,
    );
    view.set_flags(ViewFlags {
        mixed: args.mixed,
        ..ViewFlags::default()
    });

    let pc = RelocatedAddress::from(args.pc);
    view.target_suspended(Some(pc), Some(SourcePlace::new("demo.c", 1)));
    drain(&executor, &mut view);
    println!("--- stopped at {pc} ---\n{}", view.document().text());

    let jump = pc.offset(0x100);
    view.goto_address(jump)?;
    drain(&executor, &mut view);
    println!("--- after goto {jump} ---\n{}", view.document().text());

    view.goto_frame(1)?;
    drain(&executor, &mut view);
    println!("--- after goto frame 1 ---\n{}", view.document().text());

    view.target_resumed();
    view.target_ended();
    println!(
        "--- target ended (document enabled: {}) ---",
        view.document().is_enabled()
    );

    Ok(())
}
