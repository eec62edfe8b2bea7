//! The embedded scripting language.
//!
//! A small, deterministic, Python-flavoured language used to write workflow
//! code. Scripts are parsed with pest (see `star.pest`), evaluated by a
//! tree-walking interpreter, and reach the outside world only through
//! predeclared plugin modules and host-registered builtins.

pub mod ast;
pub mod attr;
mod encoding;
mod error;
mod eval;
mod layout;
mod parser;
mod thread;
mod universe;
mod value;

#[cfg(test)]
mod tests;

use std::rc::Rc;

pub use encoding::{from_json, to_json};
pub use error::{Error, ErrorKind, Result};
pub use eval::{call, Function};
pub use parser::{parse, parse_expr};
pub use thread::{normalize_path, FileLoader, Loader, Module, Predeclared, Thread};
pub use universe::ErrorValue;
pub use value::{Args, AsyncNative, Builtin, BuiltinDef, FromValue, HasAttrs, Key, NativeFn, SyncNative, Value};

/// Parse and execute one file, returning its globals.
pub async fn exec_file(thread: &Thread, name: &str, source: &str, predeclared: Rc<Predeclared>) -> Result<Rc<Module>> {
    let program = parse(name, source)?;
    eval::exec_program(thread, &program, predeclared).await
}
