//! Unit compilation.
//!
//! Each unit compiles on its own stream with its own labels, so units are
//! independent: `compile_all_*` runs one scoped thread per unit and returns
//! results in input order. A failing unit never affects its siblings.

mod managed;
mod native;


use relax_bytecode::MethodBody;
use relax_native::{CodeUnit, Image, ObjectWriter};

use crate::config::Config;
use crate::request::Unit;
use crate::symbols::SymbolTable;
use crate::{Result, UnitError};

pub use managed::compile_managed;
pub use native::compile_native;

/// Unit name used for errors raised while packing the object itself.
pub const OBJECT_UNIT: &str = "<object>";

fn compile_all<T: Send>(units: &[Unit], compile: impl Fn(&Unit) -> Result<T> + Sync) -> Vec<Result<T>> {
    let compile = &compile;
    std::thread::scope(|scope| {
        let handles: Vec<_> = units
            .iter()
            .map(|unit| scope.spawn(move || compile(unit)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

/// Compile every unit to a managed method body.
pub fn compile_all_managed(
    units: &[Unit],
    symbols: &SymbolTable,
    config: &Config,
) -> Vec<Result<MethodBody>> {
    compile_all(units, |unit| compile_managed(unit, symbols, config))
}

/// Compile every unit to native code.
pub fn compile_all_native(
    units: &[Unit],
    symbols: &SymbolTable,
    config: &Config,
) -> Vec<Result<CodeUnit>> {
    compile_all(units, |unit| compile_native(unit, symbols, config))
}

/// Compile every unit natively and pack the results into one object, with a
/// function symbol per unit.
///
/// Fails with every unit error when any unit fails.
pub fn build_object(
    units: &[Unit],
    symbols: &SymbolTable,
    config: &Config,
) -> std::result::Result<Image, Vec<UnitError>> {
    let mut writer = ObjectWriter::new(config.image);
    let mut errors = Vec::new();
    for (unit, result) in units.iter().zip(compile_all_native(units, symbols, config)) {
        match result {
            Ok(code) => {
                writer.add_function(unit.name.as_str(), &code);
            }
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        log::debug!("object build failed: {} of {} units", errors.len(), units.len());
        return Err(errors);
    }
    writer
        .finish()
        .map_err(|e| vec![UnitError::new(OBJECT_UNIT, e)])
}
