//! Test helpers for running scripts

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::star::{self, Args, FileLoader, Module, Predeclared, Thread, Value};

/// Execute `source` as `/main.star` and return its globals.
pub fn exec(source: &str) -> star::Result<Rc<Module>> {
    exec_with_files(source, BTreeMap::new())
}

/// Execute `source` with extra loadable files.
pub fn exec_with_files(source: &str, files: BTreeMap<String, String>) -> star::Result<Rc<Module>> {
    let predeclared = Rc::new(Predeclared::new());
    let loader = FileLoader::new(files, predeclared.clone());
    let thread = Thread::new("test").with_loader(Rc::new(loader));
    futures::executor::block_on(star::exec_file(&thread, "/main.star", source, predeclared))
}

/// Execute `source` and call its global `function` with positional `args`.
pub fn call(source: &str, function: &str, args: Vec<Value>) -> star::Result<Value> {
    let module = exec(source)?;
    let f = module
        .get(function)
        .cloned()
        .unwrap_or_else(|| panic!("no global named {function}"));
    let thread = Thread::new("test");
    futures::executor::block_on(star::call(&thread, f, Args::new(args)))
}

/// Evaluate `expr` by assigning it to a global.
pub fn eval(expr: &str) -> Value {
    let module = exec(&format!("result = {expr}\n")).unwrap_or_else(|e| panic!("{expr}: {e}"));
    module.get("result").cloned().expect("result bound")
}

pub fn eval_err(expr: &str) -> star::Error {
    match exec(&format!("result = {expr}\n")) {
        Ok(module) => panic!("{expr}: expected error, got {:?}", module.get("result")),
        Err(err) => err,
    }
}
