//! Human readable listing of a module, rendered through `pretty`.

use std::io;

use pretty::{BoxAllocator, DocAllocator, DocBuilder};
use termcolor::{Color, ColorSpec, NoColor, WriteColor};

use super::*;

pub fn disassemble(module: &IrModule, out: impl WriteColor) -> io::Result<()> {
    let allocator = BoxAllocator;
    internal::module(module, &allocator).1.render_colored(100, out)?;
    Ok(())
}

pub fn to_string(module: &IrModule) -> String {
    let mut out = NoColor::new(Vec::new());
    // writing into memory does not fail
    let _ = disassemble(module, &mut out);
    String::from_utf8_lossy(&out.into_inner()).into_owned()
}

/// Dump `module` at trace level.
pub fn trace(module: &IrModule) {
    if log::log_enabled!(target: "rain::compile", log::Level::Trace) {
        log::trace!(target: "rain::compile", "\n{}", to_string(module));
    }
}

fn slot(s: Slot) -> String {
    format!("s{}", s.0)
}

fn konst(c: &Const) -> String {
    match c {
        Const::Null => "null".to_string(),
        Const::Int(i) => format!("int {}", i),
        Const::Float(bits) => format!("float {:?}", f64::from_bits(*bits)),
        Const::Bool(b) => format!("bool {}", b),
        Const::Str(s) => format!("str {}.{}", s.module, s.index),
        Const::Table { table, meta } => match meta {
            Some(cell) => format!("table {}.{} :: cell {}.{}", table.module, table.index, cell.module, cell.index),
            None => format!("table {}.{}", table.module, table.index),
        },
        Const::Func { func, arity } => format!("func {}.{}/{}", func.module, func.index, arity),
        Const::Native { name, arity } => format!("native {}/{}", name, arity),
    }
}

fn global(g: &GlobalRef) -> String {
    format!("{}.{}[{}]", g.table.module, g.table.index, g.item.0)
}

fn instr(i: &Instr) -> String {
    match i {
        Instr::Const { dst, value } => format!("const {}, {}", slot(*dst), konst(value)),
        Instr::Move { dst, src } => format!("move {}, {}", slot(*dst), slot(*src)),
        Instr::LoadGlobal { dst, global: g } => format!("load.global {}, {}", slot(*dst), global(g)),
        Instr::StoreGlobal { global: g, src } => format!("store.global {}, {}", global(g), slot(*src)),
        Instr::LoadCapture { dst, index } => format!("load.capture {}, env[{}]", slot(*dst), index),
        Instr::StoreCapture { index, src } => format!("store.capture env[{}], {}", index, slot(*src)),
        Instr::AllocEnv { dst, len } => format!("alloc.env {}, {}", slot(*dst), len),
        Instr::InitEnv { env, index, src } => format!("init.env {}[{}], {}", slot(*env), index, slot(*src)),
        Instr::MakeClosure { dst, func, arity, env } => format!(
            "closure {}, func {}.{}/{}, {}",
            slot(*dst),
            func.module,
            func.index,
            arity,
            slot(*env)
        ),
        Instr::Binary { op, dst, lhs, rhs } => format!(
            "{} {}, {}, {}",
            op.method(),
            slot(*dst),
            slot(*lhs),
            slot(*rhs)
        ),
        Instr::Unary { op, dst, src } => format!("{} {}, {}", op.method(), slot(*dst), slot(*src)),
        Instr::NewTable { dst } => format!("table {}", slot(*dst)),
        Instr::Get { dst, table, key } => format!("get {}, {}[{}]", slot(*dst), slot(*table), slot(*key)),
        Instr::Put { table, key, value } => format!("put {}[{}], {}", slot(*table), slot(*key), slot(*value)),
        Instr::SetMeta { dst, table, meta } => format!("meta {}, {} :: {}", slot(*dst), slot(*table), slot(*meta)),
        Instr::CheckCall { callee, argc } => format!("check {}, {}", slot(*callee), argc),
        Instr::Call { dst, callee, args, pos } => {
            let args: Vec<_> = args.iter().map(|a| slot(*a)).collect();
            let at = pos.as_ref().map(|p| format!("  ; {}", p)).unwrap_or_default();
            format!("call {}, {}({}){}", slot(*dst), slot(*callee), args.join(", "), at)
        }
        Instr::Throw { src } => format!("throw {}", slot(*src)),
        Instr::Jump { target } => format!("jump L{}", target.0),
        Instr::Branch { test, src, target } => {
            let test = format!("{:?}", test).to_lowercase();
            format!("branch.{} {}, L{}", test, slot(*src), target.0)
        }
        Instr::EnterCatch { handler, into } => format!("catch.enter L{}, {}", handler.0, slot(*into)),
        Instr::LeaveCatch => "catch.leave".to_string(),
        Instr::SaveDepth { dst } => format!("depth.save {}", slot(*dst)),
        Instr::RestoreDepth { src } => format!("depth.restore {}", slot(*src)),
        Instr::Return { src: Some(src) } => format!("ret {}", slot(*src)),
        Instr::Return { src: None } => "ret".to_string(),
    }
}

mod internal {
    use super::*;

    fn keyword<'a, D>(text: &'static str, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        allocator
            .text(text)
            .annotate(ColorSpec::new().set_fg(Some(Color::Magenta)).clone())
    }

    fn func<'a, D>(index: usize, f: &Function, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let mut lines = vec![];
        for (pc, i) in f.code.iter().enumerate() {
            for (label, _) in f.labels.iter().enumerate().filter(|(_, at)| **at == pc) {
                lines.push(
                    allocator
                        .text(format!("L{}:", label))
                        .annotate(ColorSpec::new().set_fg(Some(Color::Yellow)).clone()),
                );
            }
            lines.push(allocator.text(format!("  {:04}  {}", pc, instr(i))));
        }

        keyword("func", allocator)
            .append(allocator.space())
            .append(
                allocator
                    .text(format!("{} {}", index, f.name))
                    .annotate(ColorSpec::new().set_fg(Some(Color::Cyan)).clone()),
            )
            .append(allocator.text(format!(
                " arity={} captures={} slots={}",
                f.arity, f.captures, f.slots
            )))
            .append(allocator.hardline())
            .append(allocator.intersperse(lines, allocator.hardline()))
            .nest(4)
    }

    fn table<'a, D>(
        index: usize,
        t: &crate::static_table::StaticTable<Const>,
        allocator: &'a D,
    ) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let items = t
            .items()
            .map(|(id, item)| allocator.text(format!("[{}] {} = {}", id.0, item.key, konst(&item.value))));

        keyword("table", allocator)
            .append(allocator.text(format!(" {} count={} capacity={}", index, t.count(), t.capacity())))
            .append(allocator.hardline())
            .append(allocator.intersperse(items, allocator.hardline()))
            .nest(4)
    }

    pub fn module<'a, D>(m: &IrModule, allocator: &'a D) -> DocBuilder<'a, D, ColorSpec>
    where
        D: DocAllocator<'a, ColorSpec>,
        D::Doc: Clone,
    {
        let mut parts = vec![];
        for (i, s) in m.strings.iter().enumerate() {
            parts.push(keyword("string", allocator).append(allocator.text(format!(" {} {:?}", i, s))));
        }
        for (i, t) in m.tables.iter().enumerate() {
            parts.push(table(i, t, allocator));
        }
        for (i, c) in m.cells.iter().enumerate() {
            parts.push(keyword("cell", allocator).append(allocator.text(format!(" {} = {}", i, konst(c)))));
        }
        for (i, f) in m.funcs.iter().enumerate() {
            parts.push(func(i, f, allocator));
        }
        for (symbol, g) in m.foreign.iter() {
            parts.push(keyword("foreign", allocator).append(allocator.text(format!(" {} = {}", symbol, global(g)))));
        }

        keyword("module", allocator)
            .append(allocator.text(format!(" {} {:?}", m.id, m.name)))
            .append(allocator.hardline())
            .append(allocator.intersperse(parts, allocator.hardline()))
            .nest(2)
            .append(allocator.hardline())
    }
}
