use indexmap::{IndexMap, IndexSet};

use super::*;
use crate::static_table::{Literal, StaticTable};

/// Emits the body of one function.
pub struct Builder {
    name: String,
    arity: u32,
    slots: u32,
    code: Vec<Instr>,
    labels: Vec<Option<usize>>,
}

impl Builder {
    /// Parameters occupy the first `arity` slots.
    pub fn new(name: impl Into<String>, arity: u32) -> Self {
        Self {
            name: name.into(),
            arity,
            slots: arity,
            code: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(&self, index: u32) -> Slot {
        debug_assert!(index < self.arity);
        Slot(index)
    }

    pub fn slot(&mut self) -> Slot {
        let slot = Slot(self.slots);
        self.slots += 1;
        slot
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    pub fn bind(&mut self, label: Label) {
        debug_assert!(self.labels[label.0 as usize].is_none(), "label bound twice");
        self.labels[label.0 as usize] = Some(self.code.len());
    }

    pub fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    pub fn is_terminated(&self) -> bool {
        self.code.last().map_or(false, Instr::is_terminator)
    }

    pub fn constant(&mut self, value: Const) -> Slot {
        let dst = self.slot();
        self.emit(Instr::Const { dst, value });
        dst
    }

    pub fn finish(mut self, captures: u32) -> Function {
        if !self.is_terminated() {
            self.emit(Instr::Return { src: None });
        }
        let end = self.code.len();
        Function {
            name: self.name,
            arity: self.arity,
            captures,
            slots: self.slots,
            code: self.code,
            labels: self.labels.into_iter().map(|l| l.unwrap_or(end)).collect(),
        }
    }
}

/// Collects the link-time data and functions of one module.
pub struct ModuleBuilder {
    id: ModuleId,
    name: String,
    strings: IndexSet<String>,
    tables: Vec<StaticTable<Const>>,
    cells: Vec<Const>,
    funcs: Vec<Option<Function>>,
    imports: Vec<ModuleId>,
    foreign: IndexMap<String, GlobalRef>,
    entry: Option<FuncRef>,
}

impl ModuleBuilder {
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            strings: IndexSet::new(),
            tables: vec![StaticTable::new()],
            cells: Vec::new(),
            funcs: Vec::new(),
            imports: Vec::new(),
            foreign: IndexMap::new(),
            entry: None,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intern(&mut self, s: &str) -> StrRef {
        let (index, _) = self.strings.insert_full(s.to_owned());
        StrRef {
            module: self.id,
            index: index as u32,
        }
    }

    pub fn string(&self, index: u32) -> &str {
        &self.strings[index as usize]
    }

    pub fn new_table(&mut self) -> TableRef {
        self.tables.push(StaticTable::new());
        TableRef {
            module: self.id,
            index: self.tables.len() as u32 - 1,
        }
    }

    pub fn table(&self, index: u32) -> &StaticTable<Const> {
        &self.tables[index as usize]
    }

    pub fn table_mut(&mut self, index: u32) -> &mut StaticTable<Const> {
        &mut self.tables[index as usize]
    }

    pub fn exports(&self) -> &StaticTable<Const> {
        &self.tables[0]
    }

    /// Declare or overwrite an export; returns the global naming its slot.
    pub fn export(&mut self, name: &str, value: Const) -> GlobalRef {
        let item = self.tables[0].put(Literal::Str(name.to_owned()), value);
        GlobalRef {
            table: TableRef::exports(self.id),
            item,
        }
    }

    pub fn new_cell(&mut self, value: Const) -> CellRef {
        self.cells.push(value);
        CellRef {
            module: self.id,
            index: self.cells.len() as u32 - 1,
        }
    }

    /// Reserve a function index before its body is compiled.
    pub fn declare_func(&mut self) -> FuncRef {
        self.funcs.push(None);
        FuncRef {
            module: self.id,
            index: self.funcs.len() as u32 - 1,
        }
    }

    pub fn define_func(&mut self, func: FuncRef, body: Function) {
        debug_assert_eq!(func.module, self.id);
        self.funcs[func.index as usize] = Some(body);
    }

    pub fn add_import(&mut self, module: ModuleId) {
        if !self.imports.contains(&module) {
            self.imports.push(module);
        }
    }

    pub fn imports(&self) -> &[ModuleId] {
        &self.imports
    }

    pub fn add_foreign(&mut self, symbol: &str, global: GlobalRef) {
        self.foreign.insert(symbol.to_owned(), global);
    }

    pub fn set_entry(&mut self, func: FuncRef) {
        self.entry = Some(func);
    }

    pub fn finish(self) -> IrModule {
        let name = self.name;
        let funcs = self
            .funcs
            .into_iter()
            .enumerate()
            .map(|(i, f)| {
                f.unwrap_or_else(|| Function {
                    name: format!("{}.undefined{}", name, i),
                    arity: 0,
                    captures: 0,
                    slots: 0,
                    code: vec![Instr::Return { src: None }],
                    labels: Vec::new(),
                })
            })
            .collect();

        IrModule {
            id: self.id,
            name,
            strings: self.strings.into_iter().collect(),
            tables: self.tables,
            cells: self.cells,
            funcs,
            imports: self.imports,
            foreign: self.foreign,
            entry: self.entry,
        }
    }
}
