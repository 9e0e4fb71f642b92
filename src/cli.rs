use std::io;
use std::path::Path;

use crate::ast::{self, Program};
use crate::Error;

/// Reads one rule file, source or compiled. A `.dlc` file that cannot be
/// decoded is replaced by its `.dl` sibling when there is one; this is the
/// host's recovery policy, [`crate::Engine::load_file`] does not fall back.
pub fn read_program(path: &Path) -> Result<Program, Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    if ast::is_compiled(&bytes) || path.extension().is_some_and(|e| e == "dlc") {
        match ast::decode_program(&bytes) {
            Ok(program) => return Ok(program),
            Err(err) => {
                let source = path.with_extension("dl");
                if source == path || !source.is_file() {
                    return Err(err.into());
                }
                log::warn!(
                    "{}: {err}, falling back to {}",
                    path.display(),
                    source.display()
                );
                return read_program(&source);
            }
        }
    }
    let text = String::from_utf8(bytes).map_err(|e| {
        Error::Io(
            path.to_path_buf(),
            io::Error::new(io::ErrorKind::InvalidData, e),
        )
    })?;
    Ok(ast::parse_program(&text)?)
}

#[cfg(feature = "bin")]
pub mod bin {
    use super::read_program;
    use crate::ast::{self, Program};
    use crate::{Engine, Error};
    use clap::Parser;
    use std::path::{Path, PathBuf};

    #[derive(Debug, Parser)]
    #[command(version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"))]
    struct Args {
        /// Turns off the seminaive optimization
        #[clap(long)]
        naive: bool,
        /// Predicates to print after evaluation; all derived predicates if empty
        #[clap(short, long = "print", value_name = "PRED")]
        print: Vec<String>,
        /// Compiles the single input file to a `.dlc` file instead of running it
        #[clap(long, value_name = "OUT")]
        compile: Option<PathBuf>,
        /// Rule files (`.dl`) or compiled rule files (`.dlc`)
        #[clap(required = true)]
        inputs: Vec<PathBuf>,
    }

    /// Concatenates the inputs into a single program, so rules from every
    /// file are evaluated together.
    fn read_inputs(inputs: &[PathBuf]) -> Result<Program, Error> {
        let mut program = Program::default();
        for input in inputs {
            let next = read_program(input)?;
            log::debug!(
                "{}: {} declarations, {} facts, {} rules",
                input.display(),
                next.decls.len(),
                next.facts.len(),
                next.rules.len()
            );
            program.clear_derived |= next.clear_derived;
            program.decls.extend(next.decls);
            program.facts.extend(next.facts);
            program.rules.extend(next.rules);
        }
        Ok(program)
    }

    fn compile(inputs: &[PathBuf], out: &Path) -> Result<(), Error> {
        let [input] = inputs else {
            return Err(Error::Internal(format!(
                "--compile takes exactly one input, got {}",
                inputs.len()
            )));
        };
        let program = read_program(input)?;
        let bytes = ast::compile_program(&program)?;
        std::fs::write(out, &bytes).map_err(|e| Error::Io(out.to_path_buf(), e))?;
        log::info!("wrote {} ({} bytes)", out.display(), bytes.len());
        Ok(())
    }

    fn run(engine: &mut Engine, args: &Args) -> Result<(), Error> {
        let program = read_inputs(&args.inputs)?;
        engine.load_program(&program)?;
        let report = engine.evaluate()?;
        log::info!("{report}");

        let names: Vec<String> = if args.print.is_empty() {
            engine
                .preds()
                .iter()
                .filter(|(_, def)| def.is_idb)
                .map(|(_, def)| def.name.to_string())
                .collect()
        } else {
            args.print.clone()
        };
        for name in &names {
            let mut rows = engine.relation_strings(name)?;
            rows.sort();
            for row in rows {
                println!("{name}({})", row.join(", "));
            }
        }
        Ok(())
    }

    /// Start the `rulr` command-line interface.
    ///
    /// Custom builds that register providers or a different matcher on the
    /// engine first should call this function too.
    #[allow(clippy::disallowed_macros)]
    pub fn cli(mut engine: Engine) {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .format_timestamp(None)
            .format_target(false)
            .parse_default_env()
            .init();

        let args = Args::parse();
        engine.set_seminaive(!args.naive);

        let result = match &args.compile {
            Some(out) => compile(&args.inputs, out),
            None => run(&mut engine, &args),
        };
        if let Err(err) = result {
            log::error!("{}", err.bounded_message());
            std::process::exit(1)
        }
    }
}
