//! # Modules
//!
//! A module is compiled once per resolved path. The [`ModuleCache`] owns
//! every compiled module of a program and hands out ids; importers refer to
//! each other's export tables through those ids, so two importers of one
//! module name the very same static-table entries.
//!
//! Finding and parsing source files is the business of a [`ModuleSource`].
//! A path is entered in the cache before its module is compiled, and the
//! module's slot stays empty until compilation finishes; meeting such a path
//! again means the imports form a cycle.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::ast::Node;
use crate::compiler::{compile_module, CompileOptions};
use crate::error::{CompileError, CompileResult};
use crate::lir::{IrModule, ModuleId};
use crate::runtime::corelib;

/// Resolves import names to paths and loads their syntax trees.
pub trait ModuleSource {
    /// Absolute path of the module `name` imported from the module at `from`.
    fn resolve(&mut self, name: &str, from: Option<&Path>) -> Option<PathBuf>;

    fn load(&mut self, path: &Path) -> CompileResult<Node>;
}

/// Syntax trees kept in memory, keyed by path.
///
/// `name` resolves to `<dir of importer>/<name>.rn` when that exists, and to
/// `/<name>.rn` otherwise.
#[derive(Default)]
pub struct MemorySource {
    trees: IndexMap<PathBuf, Node>,
    loads: IndexMap<PathBuf, usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(name: &str) -> PathBuf {
        Path::new("/").join(format!("{}.rn", name))
    }

    /// Register `tree` under `/<name>.rn`.
    pub fn add(&mut self, name: &str, tree: Node) -> PathBuf {
        let path = Self::path(name);
        self.trees.insert(path.clone(), tree);
        path
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, tree: Node) {
        self.trees.insert(path.into(), tree);
    }

    /// How many times `path` was loaded.
    pub fn loads(&self, path: &Path) -> usize {
        self.loads.get(path).copied().unwrap_or(0)
    }
}

impl ModuleSource for MemorySource {
    fn resolve(&mut self, name: &str, from: Option<&Path>) -> Option<PathBuf> {
        let file = format!("{}.rn", name);
        if let Some(dir) = from.and_then(Path::parent) {
            let path = dir.join(&file);
            if self.trees.contains_key(&path) {
                return Some(path);
            }
        }
        let path = Path::new("/").join(file);
        self.trees.contains_key(&path).then_some(path)
    }

    fn load(&mut self, path: &Path) -> CompileResult<Node> {
        *self.loads.entry(path.to_path_buf()).or_insert(0) += 1;
        self.trees
            .get(path)
            .cloned()
            .ok_or_else(|| CompileError::new(format!("Cannot read module {}", path.display())))
    }
}

pub struct ModuleCache {
    /// `None` while the module is being compiled.
    modules: Vec<Option<Rc<IrModule>>>,
    by_path: IndexMap<PathBuf, ModuleId>,
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleCache {
    /// A cache holding only the core library, as module `0`.
    pub fn new() -> Self {
        Self {
            modules: vec![Some(Rc::new(corelib::module()))],
            by_path: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, id: ModuleId) -> Option<Rc<IrModule>> {
        self.modules.get(id.index()).cloned().flatten()
    }

    pub fn get_ref(&self, id: ModuleId) -> Option<&IrModule> {
        self.modules.get(id.index()).and_then(|m| m.as_deref())
    }

    pub fn core(&self) -> Rc<IrModule> {
        match &self.modules[ModuleId::CORE.index()] {
            Some(core) => core.clone(),
            None => unreachable!("core module missing from cache"),
        }
    }

    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    fn reserve(&mut self) -> ModuleId {
        self.modules.push(None);
        ModuleId(self.modules.len() as u32 - 1)
    }

    /// The compiled module `name` as seen from the module at `from`,
    /// compiling it on first use.
    pub fn import(
        &mut self,
        source: &mut dyn ModuleSource,
        name: &str,
        from: Option<&Path>,
        options: CompileOptions,
    ) -> CompileResult<ModuleId> {
        let path = match source.resolve(name, from) {
            Some(path) => path,
            None => return Err(CompileError::new(format!("Unknown module {:?}", name))),
        };

        if let Some(id) = self.id_of(&path) {
            if self.get_ref(id).is_some() {
                log::debug!(target: "rain::compile", "cache hit {} ({})", path.display(), id);
                return Ok(id);
            }
            return Err(self.cycle(&path));
        }

        let tree = source.load(&path)?;
        let options = CompileOptions {
            entry: false,
            ..options
        };
        self.compile(source, name, Some(path), &tree, options)
    }

    /// Compile the program rooted at `path`, with an entry function.
    pub fn compile_program(
        &mut self,
        source: &mut dyn ModuleSource,
        path: &Path,
        options: CompileOptions,
    ) -> CompileResult<ModuleId> {
        if let Some(id) = self.id_of(path) {
            return match self.get_ref(id) {
                Some(module) if module.entry.is_some() => Ok(id),
                Some(_) => Err(CompileError::new(format!(
                    "{} was imported as a library and has no entry",
                    path.display()
                ))),
                None => Err(self.cycle(path)),
            };
        }
        let tree = source.load(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let options = CompileOptions { entry: true, ..options };
        self.compile(source, &name, Some(path.to_path_buf()), &tree, options)
    }

    /// Compile a tree under a fresh id. Trees with a path are memoized by it.
    pub fn compile(
        &mut self,
        source: &mut dyn ModuleSource,
        name: &str,
        path: Option<PathBuf>,
        tree: &Node,
        options: CompileOptions,
    ) -> CompileResult<ModuleId> {
        let id = self.reserve();
        if let Some(path) = &path {
            self.by_path.insert(path.clone(), id);
        }
        log::debug!(target: "rain::compile", "compiling module {:?} as {}", name, id);

        match compile_module(self, source, id, name, path.as_deref(), tree, options) {
            Ok(ir) => {
                self.modules[id.index()] = Some(Rc::new(ir));
                log::debug!(target: "rain::compile", "compiled module {:?}", name);
                Ok(id)
            }
            Err(e) => {
                if let Some(path) = &path {
                    self.by_path.shift_remove(path);
                }
                Err(e)
            }
        }
    }

    /// The modules being compiled, outermost first, closed by `path`.
    fn cycle(&self, path: &Path) -> CompileError {
        let mut names: Vec<String> = self
            .by_path
            .iter()
            .filter(|(_, id)| self.get_ref(**id).is_none())
            .map(|(p, _)| p.display().to_string())
            .collect();
        names.push(path.display().to_string());
        CompileError::new(format!("Import cycle: {}", names.join(" -> ")))
    }

    /// Dependencies of a module with `imports`, each after its own imports,
    /// core first.
    pub fn dependency_order(&self, imports: &[ModuleId]) -> CompileResult<Vec<ModuleId>> {
        let mut seen = IndexSet::new();
        self.visit(ModuleId::CORE, &mut seen)?;
        for import in imports {
            self.visit(*import, &mut seen)?;
        }
        Ok(seen.into_iter().collect())
    }

    fn visit(&self, id: ModuleId, seen: &mut IndexSet<ModuleId>) -> CompileResult<()> {
        if seen.contains(&id) {
            return Ok(());
        }
        let module = match self.get_ref(id) {
            Some(module) => module,
            None => return Err(CompileError::new(format!("Module {} is not compiled", id))),
        };
        for import in &module.imports {
            self.visit(*import, seen)?;
        }
        seen.insert(id);
        Ok(())
    }

    /// `root` and everything it imports, in load order.
    pub fn link_order(&self, root: ModuleId) -> CompileResult<Vec<ModuleId>> {
        let imports = match self.get_ref(root) {
            Some(module) => module.imports.clone(),
            None => return Err(CompileError::new(format!("Module {} is not compiled", root))),
        };
        let mut order = self.dependency_order(&imports)?;
        if !order.contains(&root) {
            order.push(root);
        }
        Ok(order)
    }
}
