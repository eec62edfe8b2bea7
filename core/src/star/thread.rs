//! Execution threads and module loading.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;

use super::attr::no_such_attr;
use super::error::{Error, ErrorKind, Result};
use super::value::{HasAttrs, Value};

/// Names visible to every module of a run, in addition to the universe.
pub type Predeclared = IndexMap<String, Value>;

/// Deepest nesting of script function calls on one thread.
pub(crate) const MAX_CALL_DEPTH: usize = 200;

type PrintFn = Box<dyn Fn(&Thread, &str)>;

/// State for one interpreter execution: host locals, loader, print hook.
///
/// Hosts stash per-run values (engine context, workflow capability) as
/// thread locals; builtins read them back by key.
pub struct Thread {
    name: String,
    locals: RefCell<HashMap<String, Rc<dyn Any>>>,
    loader: Option<Rc<dyn Loader>>,
    print: Option<PrintFn>,
    depth: Cell<usize>,
    max_depth: usize,
}

impl Thread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locals: RefCell::new(HashMap::new()),
            loader: None,
            print: None,
            depth: Cell::new(0),
            max_depth: MAX_CALL_DEPTH,
        }
    }

    pub fn with_loader(mut self, loader: Rc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_print(mut self, print: impl Fn(&Thread, &str) + 'static) -> Self {
        self.print = Some(Box::new(print));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_local<T: Any>(&self, key: &str, value: T) {
        self.locals.borrow_mut().insert(key.to_string(), Rc::new(value));
    }

    pub fn local<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.locals
            .borrow()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn print(&self, msg: &str) {
        match &self.print {
            Some(print) => print(self, msg),
            None => tracing::info!(thread = %self.name, "{}", msg),
        }
    }

    pub(crate) fn load<'a>(&'a self, module: &'a str) -> LocalBoxFuture<'a, Result<Rc<Module>>> {
        match &self.loader {
            Some(loader) => loader.load(self, module),
            None => Box::pin(async move {
                Err(Error::new(
                    ErrorKind::Load,
                    format!("cannot load {}: no module loader", module),
                ))
            }),
        }
    }

    pub(crate) fn enter(&self) -> Result<()> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            return Err(Error::new(
                ErrorKind::Recursion,
                format!("maximum call depth {} exceeded", self.max_depth),
            ));
        }
        self.depth.set(depth);
        Ok(())
    }

    pub(crate) fn exit(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/* ===================== Modules ===================== */

/// The frozen globals of an executed file.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    globals: IndexMap<String, Value>,
}

impl Module {
    pub(crate) fn new(name: String, globals: IndexMap<String, Value>) -> Self {
        Self { name, globals }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Exported symbols: globals not starting with an underscore.
    pub fn exported(&self, name: &str) -> Option<&Value> {
        if name.starts_with('_') {
            return None;
        }
        self.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }
}

impl HasAttrs for Module {
    fn type_name(&self) -> &'static str {
        "module"
    }

    fn attr(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.exported(name).cloned())
    }

    fn attr_names(&self) -> Vec<String> {
        self.globals
            .keys()
            .filter(|k| !k.starts_with('_'))
            .cloned()
            .collect()
    }

    fn repr(&self) -> String {
        format!("<module {}>", self.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/* ===================== Loading ===================== */

pub trait Loader {
    fn load<'a>(&'a self, thread: &'a Thread, module: &'a str) -> LocalBoxFuture<'a, Result<Rc<Module>>>;
}

/// Loads modules from an in-memory file set, executing each file once.
pub struct FileLoader {
    files: BTreeMap<String, String>,
    predeclared: Rc<Predeclared>,
    cache: RefCell<HashMap<String, Rc<Module>>>,
    in_progress: RefCell<HashSet<String>>,
}

impl FileLoader {
    pub fn new(files: BTreeMap<String, String>, predeclared: Rc<Predeclared>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, source)| (normalize_path(&path), source))
            .collect();
        Self {
            files,
            predeclared,
            cache: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
        }
    }

    pub fn predeclared(&self) -> &Rc<Predeclared> {
        &self.predeclared
    }
}

/// Resolve a module path against the bundle root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

impl Loader for FileLoader {
    fn load<'a>(&'a self, thread: &'a Thread, module: &'a str) -> LocalBoxFuture<'a, Result<Rc<Module>>> {
        Box::pin(async move {
            let path = normalize_path(module);
            if let Some(cached) = self.cache.borrow().get(&path) {
                return Ok(cached.clone());
            }
            if !self.in_progress.borrow_mut().insert(path.clone()) {
                return Err(Error::new(ErrorKind::Load, format!("cycle in load graph at {}", path)));
            }
            let result = match self.files.get(&path) {
                Some(source) => super::exec_file(thread, &path, source, self.predeclared.clone()).await,
                None => Err(Error::new(ErrorKind::Load, format!("module not found: {}", path))),
            };
            self.in_progress.borrow_mut().remove(&path);
            let module = result?;
            self.cache.borrow_mut().insert(path, module.clone());
            Ok(module)
        })
    }
}

/// Look up an exported symbol, with the error `load` reports.
pub(crate) fn exported_symbol(module: &Module, name: &str) -> Result<Value> {
    module
        .exported(name)
        .cloned()
        .ok_or_else(|| no_such_attr(&format!("module {}", module.name), name))
}
