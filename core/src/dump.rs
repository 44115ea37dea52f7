//! Textual IR writer.
//!
//! Produces the line-oriented format accepted by [`crate::parse`]:
//!
//! ```text
//! %0:
//! i32 %1 = load_context i32 0x38
//! i32 %2 = add i32 %1, i32 0x4
//! store_context i32 0x38, i32 %2
//! branch i32 0x8c0000a0
//! ```

use std::collections::HashSet;
use std::io::Write;

use crate::instr::InstrId;
use crate::ir::Ir;
use crate::types::Type;
use crate::value::{Constant, ValueId, ValueKind};

/// Give every unlabeled block and instruction a sequential numeric
/// label so references can be printed.
pub fn assign_default_labels(ir: &mut Ir) {
    let mut used: HashSet<String> = HashSet::new();
    for block in ir.blocks().to_vec() {
        used.extend(ir.block(block).label.clone());
        for instr in ir.block_instrs(block) {
            used.extend(ir.instr(instr).label.clone());
        }
    }

    let mut id = 0u32;
    let mut fresh = || loop {
        let label = id.to_string();
        id += 1;
        if !used.contains(&label) {
            return label;
        }
    };
    for block in ir.blocks().to_vec() {
        if ir.block(block).label.is_none() {
            ir.set_block_label(block, fresh());
        }
        for instr in ir.block_instrs(block) {
            if ir.instr(instr).label.is_none() {
                ir.set_instr_label(instr, fresh());
            }
        }
    }
}

/// Quote-safe form of a string constant; the reader undoes this.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn write_value(
    ir: &Ir,
    v: ValueId,
    w: &mut impl Write,
) -> std::io::Result<()> {
    let value = ir.value(v);
    write!(w, "{} ", value.ty)?;
    match &value.kind {
        ValueKind::Const(c) => match c {
            Constant::F32(f) => write!(w, "0x{:x}", f.to_bits()),
            Constant::F64(f) => write!(w, "0x{:x}", f.to_bits()),
            Constant::Str(s) => write!(w, "'{}'", escape(s)),
            Constant::Blk(b) => {
                let label = ir.block(*b).label.as_deref().unwrap_or("?");
                write!(w, "%{label}")
            }
            _ => write!(w, "0x{:x}", value.zext()),
        },
        ValueKind::Def(instr) => {
            let label = ir.instr(*instr).label.as_deref().unwrap_or("?");
            write!(w, "%{label}")
        }
    }
}

fn write_instr(
    ir: &Ir,
    id: InstrId,
    w: &mut impl Write,
) -> std::io::Result<()> {
    let instr = ir.instr(id);
    if let Some(result) = instr.result {
        write_value(ir, result, w)?;
        write!(w, " = ")?;
    }
    write!(w, "{}", instr.op.name())?;

    let mut first = true;
    for (_, arg) in instr.args() {
        w.write_all(if first { b" " } else { b", " })?;
        write_value(ir, arg, w)?;
        first = false;
    }
    writeln!(w)
}

/// Write the whole unit. Labels are assigned first where missing.
pub fn write_ir(ir: &mut Ir, w: &mut impl Write) -> std::io::Result<()> {
    assign_default_labels(ir);
    for &block in ir.blocks() {
        let label = ir.block(block).label.as_deref().unwrap_or("?");
        writeln!(w, "%{label}:")?;
        for instr in ir.block_instrs(block) {
            write_instr(ir, instr, w)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Render the unit to a `String`.
pub fn to_text(ir: &mut Ir) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_ir(ir, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}

/// Short form of a value for log lines: constants print their
/// payload, definitions their label or arena index.
pub fn describe_value(ir: &Ir, v: ValueId) -> String {
    let value = ir.value(v);
    match value.constant() {
        Some(Constant::Str(s)) => format!("{} '{s}'", value.ty),
        Some(Constant::Blk(b)) => format!("blk #{}", b.0),
        Some(_) if value.ty == Type::F32 || value.ty == Type::F64 => {
            format!("{} 0x{:x}", value.ty, value.bits())
        }
        Some(_) => format!("{} 0x{:x}", value.ty, value.zext()),
        None => {
            let def = value.def().map(|i| ir.instr(i));
            match def.and_then(|i| i.label.as_deref()) {
                Some(label) => format!("{} %{label}", value.ty),
                None => format!("{} v{}", value.ty, v.0),
            }
        }
    }
}
